//! Directory-backed image store.
//!
//! Each namespace is a directory:
//!
//! ```text
//! <root>/images/<sha256(reference)>.json   image config (name, os, labels, env, layers)
//! <root>/blobs/sha256/<hex>                layer tarballs
//! ```
//!
//! The daemon namespace plays the local image store; the registry namespace is what
//! `--publish` pushes to. Layer blobs are content addressed, so a blob written by an
//! image that never gets saved is harmless; an image only becomes visible when its
//! config is renamed into place.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{FetchAttempt, Image, ImageConfig, ImageStore, StoreError, store_blob, validate_reference};
use crate::platform::paths;
use crate::util::hash::{bare_hex, hash_bytes};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Namespace {
  root: PathBuf,
}

impl Namespace {
  fn images_dir(&self) -> PathBuf {
    self.root.join("images")
  }

  fn blobs_dir(&self) -> PathBuf {
    self.root.join("blobs").join("sha256")
  }

  fn config_path(&self, reference: &str) -> PathBuf {
    self.images_dir().join(format!("{}.json", hash_bytes(reference.as_bytes())))
  }

  fn blob_path(&self, diff_id: &str) -> PathBuf {
    self.blobs_dir().join(bare_hex(diff_id))
  }

  /// Returns `Ok(None)` if the image doesn't exist.
  fn read(&self, reference: &str) -> Result<Option<(ImageConfig, String)>, StoreError> {
    let content = match fs::read(self.config_path(reference)) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(StoreError::Io(e)),
    };

    let config: ImageConfig = serde_json::from_slice(&content).map_err(|e| StoreError::Config {
      reference: reference.to_string(),
      message: e.to_string(),
    })?;
    let digest = config.digest()?;
    Ok(Some((config, digest)))
  }

  /// Write the image config atomically (write to temp, then rename).
  fn write(&self, config: &ImageConfig) -> Result<String, StoreError> {
    let dir = self.images_dir();
    fs::create_dir_all(&dir)?;

    for diff_id in &config.layers {
      if !self.blob_path(diff_id).exists() {
        return Err(StoreError::Save {
          reference: config.name.clone(),
          message: format!("layer {} is missing from the blob store", diff_id),
        });
      }
    }

    let content = serde_json::to_vec_pretty(config).map_err(|e| StoreError::Save {
      reference: config.name.clone(),
      message: e.to_string(),
    })?;
    let mut staged = tempfile::NamedTempFile::new_in(&dir)?;
    io::Write::write_all(staged.as_file_mut(), &content)?;
    staged
      .persist(self.config_path(&config.name))
      .map_err(|e| StoreError::Io(e.error))?;

    config.digest()
  }

  /// Copy an image from `other` into this namespace.
  fn pull_from(&self, other: &Namespace, config: &ImageConfig) -> Result<(), StoreError> {
    for diff_id in &config.layers {
      store_blob(&self.blobs_dir(), &other.blob_path(diff_id))?;
    }
    self.write(config)?;
    Ok(())
  }
}

/// An [`ImageStore`] persisted under two directories.
#[derive(Debug, Clone)]
pub struct LayoutStore {
  daemon: Namespace,
  registry: Namespace,
}

impl LayoutStore {
  pub fn new(daemon: impl Into<PathBuf>, registry: impl Into<PathBuf>) -> Self {
    Self {
      daemon: Namespace { root: daemon.into() },
      registry: Namespace { root: registry.into() },
    }
  }

  /// Store rooted at the user's data directory.
  pub fn from_env() -> Self {
    Self::new(paths::daemon_dir(), paths::registry_dir())
  }

  pub fn daemon_root(&self) -> &Path {
    &self.daemon.root
  }

  pub fn registry_root(&self) -> &Path {
    &self.registry.root
  }

  fn namespace(&self, local: bool) -> &Namespace {
    if local { &self.daemon } else { &self.registry }
  }
}

#[async_trait]
impl ImageStore for LayoutStore {
  async fn fetch(&self, reference: &str, attempt: FetchAttempt) -> Result<Box<dyn Image>, StoreError> {
    validate_reference(reference)?;

    if attempt.prefer_local
      && attempt.allow_remote
      && let Some((config, _)) = self.registry.read(reference)?
    {
      debug!(reference, "pulling image into daemon");
      self.daemon.pull_from(&self.registry, &config)?;
    }

    let namespace = self.namespace(attempt.prefer_local);
    let (config, digest) = namespace
      .read(reference)?
      .ok_or_else(|| StoreError::NotFound(reference.to_string()))?;

    Ok(Box::new(LayoutImage {
      config,
      namespace: namespace.clone(),
      digest: Some(digest),
    }))
  }

  async fn new_image(&self, reference: &str, local: bool) -> Result<Box<dyn Image>, StoreError> {
    validate_reference(reference)?;
    Ok(Box::new(LayoutImage {
      config: ImageConfig::new(reference),
      namespace: self.namespace(local).clone(),
      digest: None,
    }))
  }
}

struct LayoutImage {
  config: ImageConfig,
  namespace: Namespace,
  digest: Option<String>,
}

#[async_trait]
impl Image for LayoutImage {
  fn config(&self) -> &ImageConfig {
    &self.config
  }

  fn config_mut(&mut self) -> &mut ImageConfig {
    &mut self.config
  }

  fn identifier(&self) -> Option<String> {
    self.digest.clone()
  }

  fn layer_path(&self, diff_id: &str) -> Option<PathBuf> {
    let path = self.namespace.blob_path(diff_id);
    path.exists().then_some(path)
  }

  fn add_layer(&mut self, path: &Path) -> Result<String, StoreError> {
    let diff_id = store_blob(&self.namespace.blobs_dir(), path)?;
    self.config.layers.push(diff_id.clone());
    Ok(diff_id)
  }

  async fn save(&mut self) -> Result<String, StoreError> {
    validate_reference(&self.config.name)?;
    let digest = self.namespace.write(&self.config)?;
    debug!(name = %self.config.name, %digest, "saved image");
    self.digest = Some(digest.clone());
    Ok(digest)
  }
}
