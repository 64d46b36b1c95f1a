//! Lifecycle selection.
//!
//! A builder embeds exactly one lifecycle. The builder config names it by URI or by
//! version (never both); with neither, [`DEFAULT_LIFECYCLE_VERSION`] is used. A version
//! expands to the canonical release archive for the target platform.
//!
//! Which binaries get embedded depends on the lifecycle's platform API: before 0.2 a
//! separate `cacher` binary is required alongside the standard set.

use std::path::Path;

use semver::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::blob::{Blob, BlobError};
use crate::consts::{DEFAULT_LIFECYCLE_VERSION, LIFECYCLE_DESCRIPTOR, LIFECYCLE_DIR, LIFECYCLE_RELEASES_URL};
use crate::dist::ApiVersion;
use crate::layer::{LayerError, LayerWriter};
use crate::platform::Platform;

/// Binaries every lifecycle must provide.
pub const STANDARD_BINARIES: [&str; 6] = ["detector", "analyzer", "restorer", "builder", "exporter", "launcher"];

/// Standalone layer-caching binary required before platform API 0.2.
pub const LEGACY_CACHER: &str = "cacher";

const CACHER_REMOVED_IN: ApiVersion = ApiVersion::new(0, 2);

#[derive(Debug, Error)]
pub enum LifecycleError {
  #[error("'lifecycle' can only declare 'version' or 'uri', not both")]
  BothUriAndVersion,

  #[error("'lifecycle.version' must be a valid semver: {source}")]
  InvalidVersion {
    version: String,
    #[source]
    source: semver::Error,
  },

  #[error("could not find lifecycle.toml in lifecycle")]
  MissingDescriptor,

  #[error("invalid lifecycle.toml: {0}")]
  Descriptor(#[from] toml::de::Error),

  #[error("lifecycle.toml is not valid UTF-8")]
  Encoding,

  #[error("lifecycle {version} is missing required binary '{binary}'")]
  MissingBinary { version: String, binary: String },

  #[error("reading lifecycle: {0}")]
  Blob(#[from] BlobError),

  #[error(transparent)]
  Layer(#[from] LayerError),
}

/// The `[lifecycle]` table of a builder config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleConfig {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub uri: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub version: Option<String>,
}

impl LifecycleConfig {
  fn uri(&self) -> Option<&str> {
    self.uri.as_deref().filter(|s| !s.is_empty())
  }

  fn version(&self) -> Option<&str> {
    self.version.as_deref().filter(|s| !s.is_empty())
  }

  /// The URI to download the lifecycle from.
  pub fn resolve_uri(&self, platform: &Platform) -> Result<String, LifecycleError> {
    match (self.uri(), self.version()) {
      (Some(_), Some(_)) => Err(LifecycleError::BothUriAndVersion),
      (Some(uri), None) => Ok(uri.to_string()),
      (None, Some(version)) => Ok(release_uri(&parse_version(version)?, platform)),
      (None, None) => Ok(release_uri(&parse_version(DEFAULT_LIFECYCLE_VERSION)?, platform)),
    }
  }
}

fn parse_version(version: &str) -> Result<Version, LifecycleError> {
  Version::parse(version.trim_start_matches('v')).map_err(|source| LifecycleError::InvalidVersion {
    version: version.to_string(),
    source,
  })
}

/// Canonical release archive for `version` on `platform`.
pub fn release_uri(version: &Version, platform: &Platform) -> String {
  format!(
    "{base}/v{v}/lifecycle-v{v}+{suffix}.tgz",
    base = LIFECYCLE_RELEASES_URL,
    v = version,
    suffix = platform.release_suffix()
  )
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleApis {
  pub platform: ApiVersion,
  pub buildpack: ApiVersion,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleInfo {
  pub version: Version,
}

/// Parsed `lifecycle.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleDescriptor {
  pub api: LifecycleApis,
  pub lifecycle: LifecycleInfo,
}

impl LifecycleDescriptor {
  pub fn parse(content: &str) -> Result<Self, LifecycleError> {
    Ok(toml::from_str(content)?)
  }
}

/// The exact set of binaries to embed for `platform_api`.
pub fn required_binaries(platform_api: ApiVersion) -> Vec<&'static str> {
  let mut binaries = STANDARD_BINARIES.to_vec();
  if platform_api < CACHER_REMOVED_IN {
    binaries.push(LEGACY_CACHER);
  }
  binaries
}

/// A fetched lifecycle whose binaries have been verified.
#[derive(Debug, Clone)]
pub struct Lifecycle {
  pub descriptor: LifecycleDescriptor,
  blob: Blob,
}

impl Lifecycle {
  /// Read the descriptor and check every required binary is present under `lifecycle/`.
  pub fn from_blob(blob: Blob) -> Result<Self, LifecycleError> {
    let raw = blob
      .read_file(LIFECYCLE_DESCRIPTOR)?
      .ok_or(LifecycleError::MissingDescriptor)?;
    let content = String::from_utf8(raw).map_err(|_| LifecycleError::Encoding)?;
    let descriptor = LifecycleDescriptor::parse(&content)?;

    let lifecycle = Self { descriptor, blob };
    for binary in lifecycle.binaries() {
      if lifecycle.blob.read_file(&format!("lifecycle/{}", binary))?.is_none() {
        return Err(LifecycleError::MissingBinary {
          version: lifecycle.descriptor.lifecycle.version.to_string(),
          binary: binary.to_string(),
        });
      }
    }
    Ok(lifecycle)
  }

  pub fn version(&self) -> &Version {
    &self.descriptor.lifecycle.version
  }

  pub fn platform_api(&self) -> ApiVersion {
    self.descriptor.api.platform
  }

  pub fn buildpack_api(&self) -> ApiVersion {
    self.descriptor.api.buildpack
  }

  pub fn binaries(&self) -> Vec<&'static str> {
    required_binaries(self.platform_api())
  }

  /// Write a layer holding exactly the required binaries under `cnb/lifecycle`.
  pub fn write_layer(&self, dest: &Path) -> Result<(), LifecycleError> {
    let wanted: Vec<String> = self.binaries().iter().map(|b| format!("lifecycle/{}", b)).collect();
    let mut writer = LayerWriter::create(dest)?;
    writer.add_dir(LIFECYCLE_DIR, 0o755)?;

    self.blob.for_each_entry(|entry| {
      if !wanted.contains(&entry.path) {
        return Ok(());
      }
      let name = entry.path.trim_start_matches("lifecycle/");
      writer
        .add_file(&format!("{}/{}", LIFECYCLE_DIR, name), 0o755, entry.size, entry.reader)
        .map_err(BlobError::from)
    })?;

    writer.finish()?;
    Ok(())
  }
}
