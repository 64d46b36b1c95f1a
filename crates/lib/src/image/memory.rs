//! In-memory image store.
//!
//! Image configs live in two maps (daemon and registry); layer blobs are kept in a
//! private temporary directory. Every fetch attempt is recorded so callers can observe
//! which namespaces were consulted and in what order.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tempfile::TempDir;

use super::{FetchAttempt, Image, ImageConfig, ImageStore, StoreError, store_blob, validate_reference};
use crate::util::hash::bare_hex;

#[derive(Default)]
struct State {
  daemon: BTreeMap<String, ImageConfig>,
  registry: BTreeMap<String, ImageConfig>,
  attempts: Vec<(String, FetchAttempt)>,
  failures: BTreeMap<String, String>,
}

struct Inner {
  blobs: TempDir,
  state: Mutex<State>,
}

#[derive(Clone)]
pub struct MemoryStore {
  inner: Arc<Inner>,
}

impl MemoryStore {
  pub fn new() -> io::Result<Self> {
    Ok(Self {
      inner: Arc::new(Inner {
        blobs: tempfile::tempdir()?,
        state: Mutex::new(State::default()),
      }),
    })
  }

  fn state(&self) -> MutexGuard<'_, State> {
    self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn blobs_dir(&self) -> &Path {
    self.inner.blobs.path()
  }

  /// Every `(reference, attempt)` seen by [`ImageStore::fetch`], in call order.
  pub fn attempts(&self) -> Vec<(String, FetchAttempt)> {
    self.state().attempts.clone()
  }

  /// Attempts recorded for one reference.
  pub fn attempts_for(&self, reference: &str) -> Vec<FetchAttempt> {
    self
      .state()
      .attempts
      .iter()
      .filter(|(r, _)| r == reference)
      .map(|(_, a)| *a)
      .collect()
  }

  /// Make every fetch of `reference` fail with a non-not-found error.
  pub fn fail_fetch(&self, reference: &str, message: &str) {
    self.state().failures.insert(reference.to_string(), message.to_string());
  }

  pub fn contains(&self, reference: &str, local: bool) -> bool {
    let state = self.state();
    if local {
      state.daemon.contains_key(reference)
    } else {
      state.registry.contains_key(reference)
    }
  }

  fn bind(&self, config: ImageConfig, local: bool, digest: Option<String>) -> Box<dyn Image> {
    Box::new(MemoryImage {
      config,
      local,
      digest,
      store: self.clone(),
    })
  }
}

#[async_trait]
impl ImageStore for MemoryStore {
  async fn fetch(&self, reference: &str, attempt: FetchAttempt) -> Result<Box<dyn Image>, StoreError> {
    validate_reference(reference)?;
    let mut state = self.state();
    state.attempts.push((reference.to_string(), attempt));

    if let Some(message) = state.failures.get(reference) {
      return Err(StoreError::Remote {
        reference: reference.to_string(),
        message: message.clone(),
      });
    }

    let config = if attempt.prefer_local {
      if attempt.allow_remote
        && let Some(remote) = state.registry.get(reference).cloned()
      {
        state.daemon.insert(reference.to_string(), remote);
      }
      state.daemon.get(reference).cloned()
    } else {
      state.registry.get(reference).cloned()
    };
    drop(state);

    let config = config.ok_or_else(|| StoreError::NotFound(reference.to_string()))?;
    let digest = config.digest()?;
    Ok(self.bind(config, attempt.prefer_local, Some(digest)))
  }

  async fn new_image(&self, reference: &str, local: bool) -> Result<Box<dyn Image>, StoreError> {
    validate_reference(reference)?;
    Ok(self.bind(ImageConfig::new(reference), local, None))
  }
}

struct MemoryImage {
  config: ImageConfig,
  local: bool,
  digest: Option<String>,
  store: MemoryStore,
}

#[async_trait]
impl Image for MemoryImage {
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
    let path = self.store.blobs_dir().join(bare_hex(diff_id));
    path.exists().then_some(path)
  }

  fn add_layer(&mut self, path: &Path) -> Result<String, StoreError> {
    let diff_id = store_blob(self.store.blobs_dir(), path)?;
    self.config.layers.push(diff_id.clone());
    Ok(diff_id)
  }

  async fn save(&mut self) -> Result<String, StoreError> {
    validate_reference(&self.config.name)?;
    let digest = self.config.digest()?;
    let mut state = self.store.state();
    let namespace = if self.local {
      &mut state.daemon
    } else {
      &mut state.registry
    };
    namespace.insert(self.config.name.clone(), self.config.clone());
    drop(state);

    self.digest = Some(digest.clone());
    Ok(digest)
  }
}
