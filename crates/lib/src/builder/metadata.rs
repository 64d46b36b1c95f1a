//! Builder image labels and their decoded form.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::{ENV_GROUP_ID, ENV_USER_ID, labels};
use crate::dist::{BuildpackInfo, BuildpackLayers, Order};
use crate::image::Image;
use crate::image::label::{LabelError, decode_label, decode_mixins};
use crate::lifecycle::LifecycleApis;

#[derive(Debug, Error)]
pub enum BuilderError {
  #[error("image '{image}' missing label '{label}'")]
  MissingLabel { image: String, label: String },

  #[error("image '{image}' missing required env var {key}")]
  MissingEnv { image: String, key: String },

  #[error("failed to parse {key}, value '{value}' should be an integer")]
  InvalidEnv { key: String, value: String },

  #[error(transparent)]
  Label(#[from] LabelError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuilderBuildpack {
  #[serde(flatten)]
  pub info: BuildpackInfo,
  #[serde(default)]
  pub latest: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunImageMetadata {
  pub image: String,
  #[serde(default)]
  pub mirrors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackMetadata {
  pub run_image: RunImageMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleMetadata {
  pub version: String,
  pub api: LifecycleApis,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedBy {
  pub name: String,
  pub version: String,
}

impl CreatedBy {
  pub fn current() -> Self {
    Self {
      name: crate::consts::APP_NAME.to_string(),
      version: env!("CARGO_PKG_VERSION").to_string(),
    }
  }
}

/// The `io.buildpacks.builder.metadata` label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuilderMetadata {
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub buildpacks: Vec<BuilderBuildpack>,
  pub stack: StackMetadata,
  pub lifecycle: LifecycleMetadata,
  #[serde(default)]
  pub created_by: CreatedBy,
}

/// `cnb/stack.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StackToml {
  pub run_image: RunImageMetadata,
}

/// `cnb/order.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderToml {
  pub order: Order,
}

/// UID and GID the image runs as.
pub fn image_user(image: &dyn Image) -> Result<(u64, u64), BuilderError> {
  let read = |key: &str| -> Result<u64, BuilderError> {
    let value = image.env(key).ok_or_else(|| BuilderError::MissingEnv {
      image: image.name().to_string(),
      key: key.to_string(),
    })?;
    value.parse().map_err(|_| BuilderError::InvalidEnv {
      key: key.to_string(),
      value: value.to_string(),
    })
  };
  Ok((read(ENV_USER_ID)?, read(ENV_GROUP_ID)?))
}

fn required_label<T: serde::de::DeserializeOwned>(image: &dyn Image, label: &str) -> Result<T, BuilderError> {
  decode_label(image, label)?.ok_or_else(|| BuilderError::MissingLabel {
    image: image.name().to_string(),
    label: label.to_string(),
  })
}

/// A saved builder, decoded from its labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Builder {
  pub name: String,
  pub description: String,
  pub uid: u64,
  pub gid: u64,
  pub stack_id: String,
  pub mixins: Vec<String>,
  pub buildpacks: Vec<BuilderBuildpack>,
  pub order: Order,
  pub layers: BuildpackLayers,
  pub lifecycle: LifecycleMetadata,
  pub run_image: RunImageMetadata,
  pub created_by: CreatedBy,
}

impl Builder {
  pub fn from_image(image: &dyn Image) -> Result<Self, BuilderError> {
    let (uid, gid) = image_user(image)?;
    let stack_id = image
      .label(labels::STACK_ID)
      .ok_or_else(|| BuilderError::MissingLabel {
        image: image.name().to_string(),
        label: labels::STACK_ID.to_string(),
      })?
      .to_string();
    let metadata: BuilderMetadata = required_label(image, labels::BUILDER_METADATA)?;
    let order: Order = decode_label(image, labels::BUILDPACK_ORDER)?.unwrap_or_default();
    let layers: BuildpackLayers = decode_label(image, labels::BUILDPACK_LAYERS)?.unwrap_or_default();

    Ok(Self {
      name: image.name().to_string(),
      description: metadata.description,
      uid,
      gid,
      stack_id,
      mixins: decode_mixins(image, labels::STACK_MIXINS)?,
      buildpacks: metadata.buildpacks,
      order,
      layers,
      lifecycle: metadata.lifecycle,
      run_image: metadata.stack.run_image,
      created_by: metadata.created_by,
    })
  }
}
