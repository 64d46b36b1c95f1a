//! Loading declarative TOML configs.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("reading config '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("parsing config '{path}': {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },
}

/// Read and deserialize a TOML file.
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
  let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
    path: path.to_path_buf(),
    source,
  })?;
  toml::from_str(&content).map_err(|source| ConfigError::Parse {
    path: path.to_path_buf(),
    source,
  })
}

/// Resolve a config-relative URI against the directory containing the config.
///
/// URIs with a scheme and absolute paths are returned unchanged.
pub fn resolve_uri(base_dir: &Path, uri: &str) -> String {
  if uri.is_empty() || uri.contains("://") || Path::new(uri).is_absolute() {
    return uri.to_string();
  }
  base_dir.join(uri).to_string_lossy().into_owned()
}
