//! `builder.toml`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, load_toml, resolve_uri};
use crate::dist::{BuildpackInfo, Order};
use crate::lifecycle::LifecycleConfig;

/// A buildpack source listed in a builder config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildpackConfig {
  #[serde(default)]
  pub id: String,
  #[serde(default)]
  pub version: String,
  pub uri: String,
}

impl BuildpackConfig {
  /// The identity the config declares; empty fields mean "accept whatever the artifact says".
  pub fn info(&self) -> BuildpackInfo {
    BuildpackInfo::new(self.id.clone(), self.version.clone())
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StackConfig {
  #[serde(default)]
  pub id: String,
  #[serde(default)]
  pub build_image: String,
  #[serde(default)]
  pub run_image: String,
  #[serde(default)]
  pub run_image_mirrors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuilderConfig {
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub buildpacks: Vec<BuildpackConfig>,
  #[serde(default)]
  pub order: Order,
  #[serde(default)]
  pub stack: StackConfig,
  #[serde(default)]
  pub lifecycle: LifecycleConfig,
}

impl BuilderConfig {
  /// Load a builder config, resolving relative URIs against its directory.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let mut config: Self = load_toml(path)?;
    let base = path.parent().unwrap_or(Path::new("."));

    for bp in &mut config.buildpacks {
      bp.uri = resolve_uri(base, &bp.uri);
    }
    if let Some(uri) = config.lifecycle.uri.as_mut() {
      *uri = resolve_uri(base, uri);
    }

    Ok(config)
  }
}
