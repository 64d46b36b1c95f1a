//! Buildpack descriptors and the identity types shared by configs and labels.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::api::ApiVersion;
use crate::consts::UNIVERSAL_STACK;

/// Identity of a buildpack: `id` plus `version`.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BuildpackInfo {
  pub id: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub version: String,
}

impl BuildpackInfo {
  pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      version: version.into(),
    }
  }
}

impl fmt::Display for BuildpackInfo {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.version.is_empty() {
      write!(f, "{}", self.id)
    } else {
      write!(f, "{}@{}", self.id, self.version)
    }
  }
}

/// A stack a buildpack (or package) declares compatibility with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stack {
  pub id: String,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub mixins: Vec<String>,
}

impl Stack {
  pub fn new(id: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      mixins: Vec::new(),
    }
  }
}

fn is_false(value: &bool) -> bool {
  !*value
}

/// A reference to a buildpack inside an order group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildpackRef {
  #[serde(flatten)]
  pub info: BuildpackInfo,
  #[serde(default, skip_serializing_if = "is_false")]
  pub optional: bool,
}

/// One detection group; the first group that passes detection wins at build time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEntry {
  #[serde(default)]
  pub group: Vec<BuildpackRef>,
}

pub type Order = Vec<OrderEntry>;

/// A content-addressed artifact a buildpack layer references.
///
/// Identity is `sha256` alone: two assets with the same hash are interchangeable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
  pub sha256: String,
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub uri: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorInfo {
  #[serde(flatten)]
  pub info: BuildpackInfo,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub homepage: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorMetadata {
  #[serde(default)]
  pub assets: Vec<Asset>,
}

/// Parsed `buildpack.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildpackDescriptor {
  pub api: ApiVersion,
  pub buildpack: DescriptorInfo,
  #[serde(default)]
  pub stacks: Vec<Stack>,
  #[serde(default)]
  pub order: Order,
  #[serde(default)]
  pub metadata: DescriptorMetadata,
}

#[derive(Debug, Error)]
pub enum DescriptorError {
  #[error("could not find {file}")]
  Missing { file: String },

  #[error("invalid {file}: {source}")]
  Parse {
    file: String,
    #[source]
    source: toml::de::Error,
  },

  #[error("invalid {file}: {message}")]
  Invalid { file: String, message: String },

  #[error("{file} is not valid UTF-8")]
  Encoding { file: String },
}

impl BuildpackDescriptor {
  /// Parse the content of a `buildpack.toml`.
  pub fn parse(content: &str) -> Result<Self, DescriptorError> {
    let file = crate::consts::BUILDPACK_DESCRIPTOR.to_string();
    let descriptor: Self = toml::from_str(content).map_err(|source| DescriptorError::Parse {
      file: file.clone(),
      source,
    })?;

    if descriptor.buildpack.info.id.is_empty() {
      return Err(DescriptorError::Invalid {
        file,
        message: "buildpack.id is required".to_string(),
      });
    }
    if descriptor.buildpack.info.version.is_empty() {
      return Err(DescriptorError::Invalid {
        file,
        message: "buildpack.version is required".to_string(),
      });
    }
    if !descriptor.stacks.is_empty() && !descriptor.order.is_empty() {
      return Err(DescriptorError::Invalid {
        file,
        message: "cannot declare both stacks and an order".to_string(),
      });
    }

    Ok(descriptor)
  }

  pub fn info(&self) -> &BuildpackInfo {
    &self.buildpack.info
  }

  pub fn assets(&self) -> &[Asset] {
    &self.metadata.assets
  }

  /// A composite buildpack only groups other buildpacks through its order.
  pub fn is_composite(&self) -> bool {
    !self.order.is_empty()
  }

  pub fn supports_stack(&self, stack_id: &str) -> bool {
    supports_stack(&self.stacks, stack_id)
  }

  /// Mixins this buildpack requires when running on `stack_id`.
  pub fn required_mixins(&self, stack_id: &str) -> Vec<String> {
    self
      .stacks
      .iter()
      .filter(|s| s.id == stack_id || s.id == UNIVERSAL_STACK)
      .flat_map(|s| s.mixins.iter().cloned())
      .collect()
  }
}

/// Whether any declared stack is `stack_id` or the universal marker.
pub fn supports_stack(stacks: &[Stack], stack_id: &str) -> bool {
  stacks.iter().any(|s| s.id == stack_id || s.id == UNIVERSAL_STACK)
}
