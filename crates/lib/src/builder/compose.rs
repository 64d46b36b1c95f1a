//! Builder composition.
//!
//! 1. Validate the required stack fields.
//! 2. Fetch the build image and check its stack.
//! 3. In parallel: check every run image and mirror, fetch the lifecycle, fetch every
//!    buildpack.
//! 4. Validate stacks, mixins and the order.
//! 5. Add layers and labels to the build image, rename it and save it.
//!
//! Nothing is saved unless every step succeeds.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use semver::Version;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{Instrument, Span, debug, info, info_span, warn};

use super::config::BuilderConfig;
use super::metadata::{
  BuilderBuildpack, BuilderError, BuilderMetadata, CreatedBy, LifecycleMetadata, OrderToml, RunImageMetadata,
  StackMetadata, StackToml, image_user,
};
use crate::acquire::{AcquireError, Acquirer, FetchedBuildpack};
use crate::blob::Downloader;
use crate::consts::{ORDER_PATH, STACK_PATH, labels};
use crate::dist::buildpack::supports_stack;
use crate::dist::layers::insert_layer;
use crate::dist::{BuildpackInfo, BuildpackLayerInfo, BuildpackLayers, Order};
use crate::image::label::{LabelError, decode_mixins, encode_label};
use crate::image::policy::{attempts_for, fetch_first, run_image_attempts};
use crate::image::{FetchAttempt, Image, ImageStore, SavedImage, StoreError};
use crate::layer::{LayerError, LayerWriter, write_buildpack_layer};
use crate::lifecycle::{Lifecycle, LifecycleError};
use crate::platform::Platform;
use crate::platform::os::Os;
use crate::stack::{MixinError, check_mixins};
use crate::util::hash::hash_file;

#[derive(Debug, Error)]
pub enum ComposeError {
  #[error("{0} is required")]
  MissingField(&'static str),

  #[error("fetching build image '{reference}': {source}")]
  BuildImage {
    reference: String,
    #[source]
    source: StoreError,
  },

  #[error("fetching run image '{reference}': {source}")]
  RunImage {
    reference: String,
    #[source]
    source: StoreError,
  },

  #[error("stack '{expected}' from builder config is incompatible with stack '{actual}' from {origin}")]
  StackMismatch {
    expected: String,
    actual: String,
    origin: String,
  },

  #[error("buildpack '{buildpack}' does not support stack '{stack}'")]
  UnsupportedStack { buildpack: String, stack: String },

  #[error("validating buildpacks: {0}")]
  Mixins(#[from] MixinError),

  #[error("buildpack '{buildpack}' is provided more than once with different content")]
  Conflict { buildpack: String },

  #[error("order references buildpack '{0}' which is not included in the builder")]
  DanglingOrderRef(String),

  #[error(transparent)]
  Acquire(#[from] AcquireError),

  #[error(transparent)]
  Builder(#[from] BuilderError),

  #[error(transparent)]
  Label(#[from] LabelError),

  #[error(transparent)]
  Lifecycle(#[from] LifecycleError),

  #[error(transparent)]
  Layer(#[from] LayerError),

  #[error("encoding {file}: {source}")]
  Encode {
    file: &'static str,
    #[source]
    source: toml::ser::Error,
  },

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error("saving builder '{name}': {source}")]
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

impl ComposeError {
  pub fn is_not_found(&self) -> bool {
    match self {
      ComposeError::BuildImage { source, .. }
      | ComposeError::RunImage { source, .. }
      | ComposeError::Save { source, .. }
      | ComposeError::Store(source) => source.is_not_found(),
      _ => false,
    }
  }
}

/// Inputs to [`Composer::compose`].
#[derive(Debug, Clone)]
pub struct CreateBuilderOptions {
  pub name: String,
  pub config: BuilderConfig,
  pub publish: bool,
  pub no_pull: bool,
}

enum Fetched {
  RunImage,
  Lifecycle(Lifecycle),
  Buildpack(usize, FetchedBuildpack),
}

/// Assembles builder images.
#[derive(Clone)]
pub struct Composer {
  store: Arc<dyn ImageStore>,
  acquirer: Acquirer,
  platform: Platform,
}

impl Composer {
  pub fn new(store: Arc<dyn ImageStore>, downloader: Arc<dyn Downloader>) -> Self {
    Self {
      store,
      acquirer: Acquirer::new(downloader),
      platform: Platform::default(),
    }
  }

  /// Target platform used to pick the lifecycle release.
  pub fn with_platform(mut self, platform: Platform) -> Self {
    self.platform = platform;
    self
  }

  pub fn with_host_os(mut self, os: Os) -> Self {
    self.acquirer = self.acquirer.with_host_os(os);
    self
  }

  pub async fn compose(&self, opts: &CreateBuilderOptions) -> Result<SavedImage, ComposeError> {
    let config = &opts.config;
    validate_required(config)?;
    let stack_id = config.stack.id.as_str();

    info!(name = %opts.name, build_image = %config.stack.build_image, "creating builder");
    let mut image = fetch_first(
      self.store.as_ref(),
      &config.stack.build_image,
      &attempts_for(opts.publish, opts.no_pull),
    )
    .await
    .map_err(|source| ComposeError::BuildImage {
      reference: config.stack.build_image.clone(),
      source,
    })?;

    let build_stack = image.label(labels::STACK_ID).unwrap_or_default().to_string();
    if build_stack != stack_id {
      return Err(ComposeError::StackMismatch {
        expected: stack_id.to_string(),
        actual: build_stack,
        origin: "build image".to_string(),
      });
    }
    let mixins = decode_mixins(image.as_ref(), labels::STACK_MIXINS)?;
    let (uid, gid) = image_user(image.as_ref())?;

    let (lifecycle, fetched) = self
      .fetch_all(opts)
      .instrument(info_span!("fetch", builder = %opts.name))
      .await?;

    let scratch = tempfile::tempdir()?;
    let (buildpacks, buildpack_layers) = stage_buildpacks(scratch.path(), fetched, uid, gid)?;

    validate_buildpacks(stack_id, &mixins, &buildpacks)?;
    let order = resolve_order(&config.order, &buildpacks)?;

    image.rename(&opts.name);

    debug!(version = %lifecycle.version(), binaries = ?lifecycle.binaries(), "adding lifecycle layer");
    let lifecycle_layer = scratch.path().join("lifecycle.tar");
    lifecycle.write_layer(&lifecycle_layer)?;
    image.add_layer(&lifecycle_layer)?;

    let mut layers = BuildpackLayers::new();
    for (bp, path) in buildpacks.iter().zip(&buildpack_layers) {
      debug!(buildpack = %bp.info(), "adding buildpack layer");
      let diff_id = image.add_layer(path)?;
      insert_layer(
        &mut layers,
        bp.info(),
        BuildpackLayerInfo::from_descriptor(&bp.descriptor, diff_id),
      );
    }

    let run_image = RunImageMetadata {
      image: config.stack.run_image.clone(),
      mirrors: config.stack.run_image_mirrors.clone(),
    };
    let config_layer = scratch.path().join("config.tar");
    write_config_layer(&config_layer, &order, &run_image, uid, gid)?;
    image.add_layer(&config_layer)?;

    let metadata = BuilderMetadata {
      description: config.description.clone(),
      buildpacks: with_latest_flags(&buildpacks),
      stack: StackMetadata { run_image },
      lifecycle: LifecycleMetadata {
        version: lifecycle.version().to_string(),
        api: lifecycle.descriptor.api.clone(),
      },
      created_by: CreatedBy::current(),
    };

    image.set_label(labels::STACK_ID, stack_id);
    encode_label(image.as_mut(), labels::BUILDER_METADATA, &metadata)?;
    encode_label(image.as_mut(), labels::BUILDPACK_LAYERS, &layers)?;
    encode_label(image.as_mut(), labels::BUILDPACK_ORDER, &order)?;

    let digest = image.save().await.map_err(|source| ComposeError::Save {
      name: opts.name.clone(),
      source,
    })?;
    info!(name = %opts.name, %digest, "builder created");

    Ok(SavedImage { image, digest })
  }

  /// Run every independent fetch concurrently.
  ///
  /// Dropping the returned future, or failing early, aborts the remaining tasks.
  async fn fetch_all(&self, opts: &CreateBuilderOptions) -> Result<(Lifecycle, Vec<FetchedBuildpack>), ComposeError> {
    let config = &opts.config;
    let mut tasks: JoinSet<Result<Fetched, ComposeError>> = JoinSet::new();

    let run_images = std::iter::once(&config.stack.run_image).chain(config.stack.run_image_mirrors.iter());
    for reference in run_images {
      let store = self.store.clone();
      let reference = reference.clone();
      let stack_id = config.stack.id.clone();
      let attempts = run_image_attempts(opts.publish);
      tasks.spawn(
        async move {
          check_run_image(store.as_ref(), &reference, &attempts, &stack_id).await?;
          Ok(Fetched::RunImage)
        }
        .instrument(Span::current()),
      );
    }

    let acquirer = self.acquirer.clone();
    let lifecycle_config = config.lifecycle.clone();
    let platform = self.platform;
    tasks.spawn(
      async move {
        let lifecycle = acquirer.fetch_lifecycle(&lifecycle_config, &platform).await?;
        Ok(Fetched::Lifecycle(lifecycle))
      }
      .instrument(Span::current()),
    );

    for (i, bp) in config.buildpacks.iter().enumerate() {
      let acquirer = self.acquirer.clone();
      let uri = bp.uri.clone();
      let declared = bp.info();
      tasks.spawn(
        async move {
          let fetched = acquirer.fetch_declared(&uri, &declared).await?;
          Ok(Fetched::Buildpack(i, fetched))
        }
        .instrument(Span::current()),
      );
    }

    let mut lifecycle = None;
    let mut buildpacks: Vec<Option<FetchedBuildpack>> = vec![None; config.buildpacks.len()];
    while let Some(joined) = tasks.join_next().await {
      match joined.map_err(|e| ComposeError::Task(e.to_string()))?? {
        Fetched::RunImage => {}
        Fetched::Lifecycle(l) => lifecycle = Some(l),
        Fetched::Buildpack(i, bp) => buildpacks[i] = Some(bp),
      }
    }

    let lifecycle = lifecycle.ok_or_else(|| ComposeError::Task("lifecycle was not fetched".to_string()))?;
    Ok((lifecycle, buildpacks.into_iter().flatten().collect()))
  }
}

fn validate_required(config: &BuilderConfig) -> Result<(), ComposeError> {
  if config.stack.id.is_empty() {
    return Err(ComposeError::MissingField("stack.id"));
  }
  if config.stack.build_image.is_empty() {
    return Err(ComposeError::MissingField("stack.build-image"));
  }
  if config.stack.run_image.is_empty() {
    return Err(ComposeError::MissingField("stack.run-image"));
  }
  Ok(())
}

/// A run image that cannot be found is only a warning: it may be published later.
async fn check_run_image(
  store: &dyn ImageStore,
  reference: &str,
  attempts: &[FetchAttempt],
  stack_id: &str,
) -> Result<(), ComposeError> {
  let image = match fetch_first(store, reference, attempts).await {
    Ok(image) => image,
    Err(e) if e.is_not_found() => {
      warn!("run image '{}' is not accessible", reference);
      return Ok(());
    }
    Err(source) => {
      return Err(ComposeError::RunImage {
        reference: reference.to_string(),
        source,
      });
    }
  };

  let actual = image.label(labels::STACK_ID).unwrap_or_default();
  if actual != stack_id {
    return Err(ComposeError::StackMismatch {
      expected: stack_id.to_string(),
      actual: actual.to_string(),
      origin: format!("run image '{}'", reference),
    });
  }
  Ok(())
}

/// Write one layer per distinct buildpack. A repeated `id@version` is dropped when its
/// layer is identical and rejected when it differs.
fn stage_buildpacks(
  dir: &Path,
  fetched: Vec<FetchedBuildpack>,
  uid: u64,
  gid: u64,
) -> Result<(Vec<FetchedBuildpack>, Vec<PathBuf>), ComposeError> {
  let mut seen: BTreeMap<BuildpackInfo, String> = BTreeMap::new();
  let mut buildpacks = Vec::new();
  let mut paths = Vec::new();

  for (i, bp) in fetched.into_iter().enumerate() {
    let path = dir.join(format!("buildpack-{}.tar", i));
    write_buildpack_layer(&path, bp.info(), &bp.blob, uid, gid)?;
    let diff_id = hash_file(&path)?.digest();

    match seen.get(bp.info()) {
      Some(existing) if *existing != diff_id => {
        return Err(ComposeError::Conflict {
          buildpack: bp.info().to_string(),
        });
      }
      Some(_) => debug!(buildpack = %bp.info(), uri = %bp.uri, "skipping repeated buildpack"),
      None => {
        seen.insert(bp.info().clone(), diff_id);
        buildpacks.push(bp);
        paths.push(path);
      }
    }
  }

  Ok((buildpacks, paths))
}

fn validate_buildpacks(stack_id: &str, mixins: &[String], buildpacks: &[FetchedBuildpack]) -> Result<(), ComposeError> {
  let simple: Vec<_> = buildpacks
    .iter()
    .filter(|bp| !bp.descriptor.is_composite())
    .map(|bp| &bp.descriptor)
    .collect();

  for descriptor in &simple {
    if !supports_stack(&descriptor.stacks, stack_id) {
      return Err(ComposeError::UnsupportedStack {
        buildpack: descriptor.info().to_string(),
        stack: stack_id.to_string(),
      });
    }
  }

  check_mixins(stack_id, mixins, &simple)?;
  Ok(())
}

fn version_cmp(a: &str, b: &str) -> Ordering {
  match (Version::parse(a), Version::parse(b)) {
    (Ok(a), Ok(b)) => a.cmp(&b),
    _ => a.cmp(b),
  }
}

fn latest_versions(buildpacks: &[FetchedBuildpack]) -> BTreeMap<&str, &str> {
  let mut latest: BTreeMap<&str, &str> = BTreeMap::new();
  for bp in buildpacks {
    let info = bp.info();
    latest
      .entry(info.id.as_str())
      .and_modify(|v| {
        if version_cmp(&info.version, v) == Ordering::Greater {
          *v = info.version.as_str();
        }
      })
      .or_insert(info.version.as_str());
  }
  latest
}

fn with_latest_flags(buildpacks: &[FetchedBuildpack]) -> Vec<BuilderBuildpack> {
  let latest = latest_versions(buildpacks);
  buildpacks
    .iter()
    .map(|bp| BuilderBuildpack {
      info: bp.info().clone(),
      latest: latest.get(bp.info().id.as_str()) == Some(&bp.info().version.as_str()),
    })
    .collect()
}

/// Check every order reference and pin unversioned ones to the latest version present.
fn resolve_order(order: &Order, buildpacks: &[FetchedBuildpack]) -> Result<Order, ComposeError> {
  let latest = latest_versions(buildpacks);
  let mut resolved = order.clone();

  for entry in &mut resolved {
    for bp_ref in &mut entry.group {
      let info = &mut bp_ref.info;
      if info.version.is_empty() {
        match latest.get(info.id.as_str()) {
          Some(version) => info.version = version.to_string(),
          None => return Err(ComposeError::DanglingOrderRef(info.to_string())),
        }
      } else if !buildpacks.iter().any(|bp| bp.info() == &*info) {
        return Err(ComposeError::DanglingOrderRef(info.to_string()));
      }
    }
  }

  Ok(resolved)
}

fn write_config_layer(
  dest: &Path,
  order: &Order,
  run_image: &RunImageMetadata,
  uid: u64,
  gid: u64,
) -> Result<(), ComposeError> {
  let order_toml = toml::to_string(&OrderToml { order: order.clone() }).map_err(|source| ComposeError::Encode {
    file: ORDER_PATH,
    source,
  })?;
  let stack_toml = toml::to_string(&StackToml {
    run_image: run_image.clone(),
  })
  .map_err(|source| ComposeError::Encode {
    file: STACK_PATH,
    source,
  })?;

  let mut writer = LayerWriter::create(dest)?.with_owner(uid, gid);
  writer.add_bytes(ORDER_PATH, 0o644, order_toml.as_bytes())?;
  writer.add_bytes(STACK_PATH, 0o644, stack_toml.as_bytes())?;
  writer.finish()?;
  Ok(())
}
