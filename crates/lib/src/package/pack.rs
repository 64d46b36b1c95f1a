//! Buildpack packaging.
//!
//! Direct buildpack URIs become one layer each. Nested packages are already flat, so
//! their layers are copied across unchanged and their outer identity label is dropped.
//! The result always carries a single flat `buildpack.layers` map.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info};

use super::config::PackageConfig;
use crate::acquire::{AcquireError, Acquirer, FetchedBuildpack};
use crate::blob::Downloader;
use crate::consts::labels;
use crate::dist::buildpack::supports_stack;
use crate::dist::layers::{all_buildpacks, insert_layer, layer_for};
use crate::dist::{BuildpackInfo, BuildpackLayerInfo, BuildpackLayers, PackageMetadata, Stack};
use crate::image::label::{LabelError, decode_label, encode_label};
use crate::image::policy::{attempts_for, fetch_first};
use crate::image::{ImageStore, SavedImage, StoreError};
use crate::layer::{LayerError, write_buildpack_layer};
use crate::platform::os::Os;
use crate::util::hash::hash_file;

#[derive(Debug, Error)]
pub enum PackageError {
  #[error("label '{label}' not present on package '{reference}'")]
  LabelMissing { label: String, reference: String },

  #[error("fetching package '{reference}': {source}")]
  Fetch {
    reference: String,
    #[source]
    source: StoreError,
  },

  #[error("package '{reference}' references a package that is already included ({digest})")]
  Cycle { reference: String, digest: String },

  #[error("buildpack '{buildpack}' is provided more than once with different content")]
  Conflict { buildpack: String },

  #[error("buildpack '{buildpack}' does not support stack '{stack}'")]
  IncompatibleStack { buildpack: String, stack: String },

  #[error("default buildpack '{0}' is not included in the package")]
  DefaultNotIncluded(String),

  #[error("package layer metadata for '{reference}' has no layer {diff_id}")]
  MissingLayer { reference: String, diff_id: String },

  #[error(transparent)]
  Acquire(#[from] AcquireError),

  #[error(transparent)]
  Label(#[from] LabelError),

  #[error(transparent)]
  Layer(#[from] LayerError),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error("saving package '{name}': {source}")]
  Save {
    name: String,
    #[source]
    source: StoreError,
  },

  #[error("fetch task failed: {0}")]
  Task(String),

  #[error("I/O error: {0}")]
  Io(#[from] io::Error),
}

impl PackageError {
  pub fn is_not_found(&self) -> bool {
    match self {
      PackageError::Fetch { source, .. } | PackageError::Save { source, .. } | PackageError::Store(source) => {
        source.is_not_found()
      }
      _ => false,
    }
  }
}

#[derive(Debug, Clone)]
pub struct CreatePackageOptions {
  pub name: String,
  pub config: PackageConfig,
  pub publish: bool,
  pub no_pull: bool,
}

/// A buildpack layer ready to be added to the package.
struct Included {
  layer: BuildpackLayerInfo,
  path: PathBuf,
}

/// Assembles buildpack package images.
#[derive(Clone)]
pub struct Packager {
  store: Arc<dyn ImageStore>,
  acquirer: Acquirer,
}

impl Packager {
  pub fn new(store: Arc<dyn ImageStore>, downloader: Arc<dyn Downloader>) -> Self {
    Self {
      store,
      acquirer: Acquirer::new(downloader),
    }
  }

  pub fn with_host_os(mut self, os: Os) -> Self {
    self.acquirer = self.acquirer.with_host_os(os);
    self
  }

  pub async fn pack(&self, opts: &CreatePackageOptions) -> Result<SavedImage, PackageError> {
    let config = &opts.config;
    info!(name = %opts.name, default = %config.buildpack, "creating package");

    let scratch = tempfile::tempdir()?;
    let mut included: BTreeMap<BuildpackInfo, Included> = BTreeMap::new();

    for (i, bp) in self.fetch_direct(config).await?.into_iter().enumerate() {
      let path = scratch.path().join(format!("buildpack-{}.tar", i));
      write_buildpack_layer(&path, bp.info(), &bp.blob, 0, 0)?;
      let diff_id = hash_file(&path)?.digest();
      let layer = BuildpackLayerInfo::from_descriptor(&bp.descriptor, diff_id);
      include(&mut included, bp.info().clone(), Included { layer, path })?;
    }

    let mut visited: BTreeSet<String> = BTreeSet::new();
    // Every nested package is already flat, so one pass over the references is enough.
    for nested in &config.packages {
      let reference = nested.reference.as_str();
      if reference == opts.name {
        return Err(PackageError::Cycle {
          reference: reference.to_string(),
          digest: opts.name.clone(),
        });
      }

      let image = fetch_first(
        self.store.as_ref(),
        reference,
        &attempts_for(opts.publish, opts.no_pull),
      )
      .await
      .map_err(|source| PackageError::Fetch {
        reference: reference.to_string(),
        source,
      })?;

      let digest = match image.identifier() {
        Some(digest) => digest,
        None => image.config().digest()?,
      };
      if !visited.insert(digest.clone()) {
        return Err(PackageError::Cycle {
          reference: reference.to_string(),
          digest,
        });
      }

      let label_missing = |label: &str| PackageError::LabelMissing {
        label: label.to_string(),
        reference: reference.to_string(),
      };
      let layers: BuildpackLayers =
        decode_label(image.as_ref(), labels::BUILDPACK_LAYERS)?.ok_or_else(|| label_missing(labels::BUILDPACK_LAYERS))?;
      let _metadata: PackageMetadata =
        decode_label(image.as_ref(), labels::PACKAGE_METADATA)?.ok_or_else(|| label_missing(labels::PACKAGE_METADATA))?;

      for info in all_buildpacks(&layers) {
        let Some(layer) = layer_for(&layers, &info) else {
          continue;
        };
        let path = image
          .layer_path(&layer.layer_diff_id)
          .ok_or_else(|| PackageError::MissingLayer {
            reference: reference.to_string(),
            diff_id: layer.layer_diff_id.clone(),
          })?;
        debug!(package = reference, buildpack = %info, "flattening nested buildpack");
        include(
          &mut included,
          info,
          Included {
            layer: layer.clone(),
            path,
          },
        )?;
      }
    }

    let stacks = target_stacks(config, &included);
    validate_stacks(&stacks, &included)?;

    if !included.contains_key(&config.buildpack) {
      return Err(PackageError::DefaultNotIncluded(config.buildpack.to_string()));
    }

    let mut image = self.store.new_image(&opts.name, !opts.publish).await?;
    let mut layers = BuildpackLayers::new();
    for (info, entry) in &included {
      let diff_id = image.add_layer(&entry.path)?;
      let mut layer = entry.layer.clone();
      layer.layer_diff_id = diff_id;
      insert_layer(&mut layers, info, layer);
    }

    encode_label(image.as_mut(), labels::BUILDPACK_LAYERS, &layers)?;
    encode_label(
      image.as_mut(),
      labels::PACKAGE_METADATA,
      &PackageMetadata {
        info: config.buildpack.clone(),
        stacks,
      },
    )?;

    let digest = image.save().await.map_err(|source| PackageError::Save {
      name: opts.name.clone(),
      source,
    })?;
    info!(name = %opts.name, %digest, buildpacks = included.len(), "package created");

    Ok(SavedImage { image, digest })
  }

  async fn fetch_direct(&self, config: &PackageConfig) -> Result<Vec<FetchedBuildpack>, PackageError> {
    let mut tasks: JoinSet<Result<(usize, FetchedBuildpack), AcquireError>> = JoinSet::new();
    for (i, bp) in config.buildpacks.iter().enumerate() {
      let acquirer = self.acquirer.clone();
      let uri = bp.uri.clone();
      tasks.spawn(async move { Ok((i, acquirer.fetch_buildpack(&uri).await?)) });
    }

    let mut fetched: Vec<Option<FetchedBuildpack>> = vec![None; config.buildpacks.len()];
    while let Some(joined) = tasks.join_next().await {
      let (i, bp) = joined.map_err(|e| PackageError::Task(e.to_string()))??;
      fetched[i] = Some(bp);
    }
    Ok(fetched.into_iter().flatten().collect())
  }
}

/// Add a buildpack, accepting a repeat only when its layer content is identical.
fn include(
  included: &mut BTreeMap<BuildpackInfo, Included>,
  info: BuildpackInfo,
  entry: Included,
) -> Result<(), PackageError> {
  match included.get(&info) {
    Some(existing) if existing.layer.layer_diff_id != entry.layer.layer_diff_id => Err(PackageError::Conflict {
      buildpack: info.to_string(),
    }),
    Some(_) => Ok(()),
    None => {
      included.insert(info, entry);
      Ok(())
    }
  }
}

/// The configured stacks, or the default buildpack's own when none are configured.
fn target_stacks(config: &PackageConfig, included: &BTreeMap<BuildpackInfo, Included>) -> Vec<Stack> {
  if !config.stacks.is_empty() {
    return config.stacks.clone();
  }
  included
    .get(&config.buildpack)
    .map(|entry| entry.layer.stacks.clone())
    .unwrap_or_default()
}

fn validate_stacks(stacks: &[Stack], included: &BTreeMap<BuildpackInfo, Included>) -> Result<(), PackageError> {
  for (info, entry) in included {
    if entry.layer.is_composite() {
      continue;
    }
    for stack in stacks {
      if !supports_stack(&entry.layer.stacks, &stack.id) {
        return Err(PackageError::IncompatibleStack {
          buildpack: info.to_string(),
          stack: stack.id.clone(),
        });
      }
    }
  }
  Ok(())
}
