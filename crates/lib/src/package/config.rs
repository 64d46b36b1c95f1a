//! `package.toml`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, load_toml, resolve_uri};
use crate::dist::{BuildpackInfo, Stack};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageBuildpack {
  pub uri: String,
}

/// A nested package image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRef {
  #[serde(rename = "ref")]
  pub reference: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageConfig {
  /// The default buildpack.
  pub buildpack: BuildpackInfo,
  #[serde(default)]
  pub buildpacks: Vec<PackageBuildpack>,
  #[serde(default)]
  pub packages: Vec<PackageRef>,
  #[serde(default)]
  pub stacks: Vec<Stack>,
}

impl PackageConfig {
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let mut config: Self = load_toml(path)?;
    let base = path.parent().unwrap_or(Path::new("."));
    for bp in &mut config.buildpacks {
      bp.uri = resolve_uri(base, &bp.uri);
    }
    Ok(config)
  }
}
