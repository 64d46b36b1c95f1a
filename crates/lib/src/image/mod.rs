//! Image store abstraction.
//!
//! Builders, packages and asset caches are all produced by mutating an image handle
//! obtained from an [`ImageStore`] and saving it as the very last step. A store has two
//! namespaces: the local daemon and the remote registry. Which one a fetch consults is
//! described by a [`FetchAttempt`]; see [`policy`] for how attempts are ordered.

pub mod label;
pub mod layout;
pub mod memory;
pub mod policy;

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::layer;
use crate::util::hash::hash_bytes;

pub use policy::{PullPolicy, fetch_first};

/// One fetch attempt against an image store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FetchAttempt {
  /// Read from the local daemon namespace instead of the registry.
  pub prefer_local: bool,
  /// When reading locally, pull from the registry first.
  pub allow_remote: bool,
}

impl FetchAttempt {
  pub const fn new(prefer_local: bool, allow_remote: bool) -> Self {
    Self {
      prefer_local,
      allow_remote,
    }
  }
}

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("image '{0}' not found")]
  NotFound(String),

  #[error("invalid image reference '{reference}': {message}")]
  InvalidReference { reference: String, message: String },

  #[error("layer {diff_id} not found in image '{reference}'")]
  LayerNotFound { reference: String, diff_id: String },

  #[error("saving image '{reference}': {message}")]
  Save { reference: String, message: String },

  #[error("corrupt image config for '{reference}': {message}")]
  Config { reference: String, message: String },

  #[error("fetching image '{reference}': {message}")]
  Remote { reference: String, message: String },

  #[error("I/O error: {0}")]
  Io(#[from] io::Error),
}

impl StoreError {
  pub fn is_not_found(&self) -> bool {
    matches!(self, StoreError::NotFound(_))
  }
}

/// The persisted state of an image: everything except layer content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
  pub name: String,
  #[serde(default)]
  pub os: String,
  #[serde(default)]
  pub labels: BTreeMap<String, String>,
  #[serde(default)]
  pub env: BTreeMap<String, String>,
  /// Layer diff ids, bottom first.
  #[serde(default)]
  pub layers: Vec<String>,
}

impl ImageConfig {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      os: "linux".to_string(),
      ..Default::default()
    }
  }

  /// Content digest of this config.
  pub fn digest(&self) -> Result<String, StoreError> {
    let bytes = serde_json::to_vec(self).map_err(|e| StoreError::Config {
      reference: self.name.clone(),
      message: e.to_string(),
    })?;
    Ok(hash_bytes(&bytes).digest())
  }
}

/// A mutable handle to an image.
///
/// Handles accumulate state and are not safe for concurrent writers; the composer owns
/// one exclusively until it calls [`Image::save`].
#[async_trait]
pub trait Image: Send + Sync {
  fn config(&self) -> &ImageConfig;

  fn config_mut(&mut self) -> &mut ImageConfig;

  /// Digest of the image as last fetched or saved, if any.
  fn identifier(&self) -> Option<String>;

  /// Location of a layer tarball by diff id.
  fn layer_path(&self, diff_id: &str) -> Option<PathBuf>;

  /// Append the tarball at `path` as a new top layer, returning its diff id.
  fn add_layer(&mut self, path: &Path) -> Result<String, StoreError>;

  /// Commit the image to its namespace, returning the new digest.
  async fn save(&mut self) -> Result<String, StoreError>;

  fn name(&self) -> &str {
    &self.config().name
  }

  fn rename(&mut self, name: &str) {
    self.config_mut().name = name.to_string();
  }

  fn label(&self, key: &str) -> Option<&str> {
    self.config().labels.get(key).map(String::as_str)
  }

  fn set_label(&mut self, key: &str, value: &str) {
    self.config_mut().labels.insert(key.to_string(), value.to_string());
  }

  fn env(&self, key: &str) -> Option<&str> {
    self.config().env.get(key).map(String::as_str)
  }

  fn set_env(&mut self, key: &str, value: &str) {
    self.config_mut().env.insert(key.to_string(), value.to_string());
  }

  fn os(&self) -> &str {
    &self.config().os
  }

  fn set_os(&mut self, os: &str) {
    self.config_mut().os = os.to_string();
  }

  fn layers(&self) -> &[String] {
    &self.config().layers
  }

  fn get_layer(&self, diff_id: &str) -> Result<PathBuf, StoreError> {
    if !self.layers().iter().any(|l| l == diff_id) {
      return Err(StoreError::LayerNotFound {
        reference: self.name().to_string(),
        diff_id: diff_id.to_string(),
      });
    }
    self.layer_path(diff_id).ok_or_else(|| StoreError::LayerNotFound {
      reference: self.name().to_string(),
      diff_id: diff_id.to_string(),
    })
  }

  /// Diff id of the topmost layer containing `path`.
  fn find_layer_with_path(&self, path: &str) -> Result<Option<String>, StoreError> {
    for diff_id in self.layers().iter().rev() {
      let layer_path = self.get_layer(diff_id)?;
      if layer::tar_contains(&layer_path, path)? {
        return Ok(Some(diff_id.clone()));
      }
    }
    Ok(None)
  }
}

/// Fetches existing images and creates new ones.
#[async_trait]
pub trait ImageStore: Send + Sync {
  async fn fetch(&self, reference: &str, attempt: FetchAttempt) -> Result<Box<dyn Image>, StoreError>;

  /// Start an empty image bound to the daemon (`local`) or the registry.
  async fn new_image(&self, reference: &str, local: bool) -> Result<Box<dyn Image>, StoreError>;
}

/// An image that has been committed by [`Image::save`].
pub struct SavedImage {
  pub image: Box<dyn Image>,
  pub digest: String,
}

impl std::fmt::Debug for SavedImage {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SavedImage")
      .field("name", &self.image.name())
      .field("digest", &self.digest)
      .finish()
  }
}

/// Copy a layer tarball into a content-addressed blob directory, returning its diff id.
pub(crate) fn store_blob(blobs_dir: &Path, source: &Path) -> Result<String, StoreError> {
  let hash = crate::util::hash::hash_file(source)?;
  let dest = blobs_dir.join(&hash.0);
  if !dest.exists() {
    std::fs::create_dir_all(blobs_dir)?;
    let mut staged = tempfile::NamedTempFile::new_in(blobs_dir)?;
    io::copy(&mut std::fs::File::open(source)?, staged.as_file_mut())?;
    staged.persist(&dest).map_err(|e| StoreError::Io(e.error))?;
  }
  Ok(hash.digest())
}

/// Reject references that can never name an image.
pub fn validate_reference(reference: &str) -> Result<(), StoreError> {
  let message = if reference.is_empty() {
    Some("reference is empty")
  } else if reference.chars().any(char::is_whitespace) {
    Some("reference contains whitespace")
  } else if reference.starts_with('/') || reference.ends_with('/') || reference.ends_with(':') {
    Some("reference is malformed")
  } else {
    None
  };

  match message {
    Some(message) => Err(StoreError::InvalidReference {
      reference: reference.to_string(),
      message: message.to_string(),
    }),
    None => Ok(()),
  }
}
