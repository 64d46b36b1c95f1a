//! Asset cache images.
//!
//! Collects every asset referenced by a buildpack package (or every buildpack on a
//! builder) and their dependencies, downloads each one once and stores it as its own
//! layer at `cnb/assets/<sha256>`.

use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::blob::{BlobError, Downloader};
use crate::builder::metadata::BuilderMetadata;
use crate::consts::{ASSETS_DIR, labels};
use crate::dist::layers::{layer_for, resolve_dependencies};
use crate::dist::{Asset, BuildpackInfo, BuildpackLayers, DependencyError, PackageMetadata};
use crate::image::label::{LabelError, decode_label, encode_label};
use crate::image::policy::{PullPolicy, fetch_first, policy_to_attempts};
use crate::image::{Image, ImageStore, SavedImage, StoreError};
use crate::layer::{LayerError, LayerWriter};
use crate::platform::os::Os;
use crate::util::hash::bare_hex;

#[derive(Debug, Error)]
pub enum AssetCacheError {
  #[error("unknown os type: {0}")]
  UnsupportedOs(String),

  #[error("inspecting buildpack '{reference}': {source}")]
  Inspect {
    reference: String,
    #[source]
    source: StoreError,
  },

  #[error("label '{label}' not present on buildpack '{reference}'")]
  LabelMissing { label: String, reference: String },

  #[error(transparent)]
  Dependency(#[from] DependencyError),

  #[error("downloading asset '{name}' ({sha256}): {source}")]
  Download {
    name: String,
    sha256: String,
    #[source]
    source: BlobError,
  },

  #[error("asset '{name}' has sha256 '{actual}', expected '{expected}'")]
  HashMismatch {
    name: String,
    expected: String,
    actual: String,
  },

  #[error(transparent)]
  Label(#[from] LabelError),

  #[error(transparent)]
  Layer(#[from] LayerError),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error("saving asset cache '{name}': {source}")]
  Save {
    name: String,
    #[source]
    source: StoreError,
  },

  #[error("download task failed: {0}")]
  Task(String),

  #[error("I/O error: {0}")]
  Io(#[from] io::Error),
}

impl AssetCacheError {
  pub fn is_not_found(&self) -> bool {
    match self {
      AssetCacheError::Inspect { source, .. }
      | AssetCacheError::Save { source, .. }
      | AssetCacheError::Store(source) => source.is_not_found(),
      _ => false,
    }
  }
}

#[derive(Debug, Clone)]
pub struct CreateAssetCacheOptions {
  pub name: String,
  /// Image reference of the buildpack package or builder whose assets are cached.
  pub buildpack: String,
  pub pull_policy: PullPolicy,
  pub publish: bool,
  pub os: String,
}

/// One entry of the `io.buildpacks.asset.layers` label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetLayer {
  pub name: String,
  pub uri: String,
  #[serde(rename = "layerDiffID")]
  pub layer_diff_id: String,
}

/// `sha256 -> layer`, in hash order.
pub type AssetLayers = BTreeMap<String, AssetLayer>;

/// Every asset referenced by `deps`, one per hash, sorted by hash.
///
/// Fails if any dependency has no layer metadata.
pub fn collect_assets(layers: &BuildpackLayers, deps: &[BuildpackInfo]) -> Result<Vec<Asset>, DependencyError> {
  let mut assets: BTreeMap<String, Asset> = BTreeMap::new();
  for info in deps {
    let layer = layer_for(layers, info).ok_or_else(|| DependencyError::Missing {
      id: info.id.clone(),
      version: info.version.clone(),
    })?;
    for asset in &layer.assets {
      assets.entry(asset.sha256.clone()).or_insert_with(|| asset.clone());
    }
  }
  Ok(assets.into_values().collect())
}

#[derive(Clone)]
pub struct AssetCacheBuilder {
  store: Arc<dyn ImageStore>,
  downloader: Arc<dyn Downloader>,
}

impl AssetCacheBuilder {
  pub fn new(store: Arc<dyn ImageStore>, downloader: Arc<dyn Downloader>) -> Self {
    Self { store, downloader }
  }

  pub async fn build(&self, opts: &CreateAssetCacheOptions) -> Result<SavedImage, AssetCacheError> {
    let os: Os = opts
      .os
      .parse()
      .map_err(|_| AssetCacheError::UnsupportedOs(opts.os.clone()))?;

    let buildpack = fetch_first(
      self.store.as_ref(),
      &opts.buildpack,
      &policy_to_attempts(opts.pull_policy),
    )
    .await
    .map_err(|source| AssetCacheError::Inspect {
      reference: opts.buildpack.clone(),
      source,
    })?;

    let label_missing = |label: &str| AssetCacheError::LabelMissing {
      label: label.to_string(),
      reference: opts.buildpack.clone(),
    };
    let layers: BuildpackLayers = decode_label(buildpack.as_ref(), labels::BUILDPACK_LAYERS)?
      .ok_or_else(|| label_missing(labels::BUILDPACK_LAYERS))?;
    let roots = dependency_roots(buildpack.as_ref())?.ok_or_else(|| label_missing(labels::PACKAGE_METADATA))?;

    let mut deps: Vec<BuildpackInfo> = Vec::new();
    for root in &roots {
      for info in resolve_dependencies(&layers, root)? {
        if !deps.contains(&info) {
          deps.push(info);
        }
      }
    }
    let assets = collect_assets(&layers, &deps)?;
    info!(name = %opts.name, buildpack = %opts.buildpack, assets = assets.len(), "creating asset cache");

    let scratch = tempfile::tempdir()?;
    let staged = self.download_all(&assets, scratch.path().to_path_buf()).await?;

    let mut image = self.store.new_image(&opts.name, !opts.publish).await?;
    image.set_os(os.as_str());

    let mut asset_layers = AssetLayers::new();
    for (asset, path) in assets.iter().zip(&staged) {
      let layer_diff_id = image.add_layer(path)?;
      asset_layers.insert(
        asset.sha256.clone(),
        AssetLayer {
          name: asset.name.clone(),
          uri: asset.uri.clone(),
          layer_diff_id,
        },
      );
    }
    encode_label(image.as_mut(), labels::ASSET_LAYERS, &asset_layers)?;

    let digest = image.save().await.map_err(|source| AssetCacheError::Save {
      name: opts.name.clone(),
      source,
    })?;
    info!(name = %opts.name, %digest, "asset cache created");

    Ok(SavedImage { image, digest })
  }

  /// Download and verify every asset concurrently, returning layer paths in `assets` order.
  async fn download_all(&self, assets: &[Asset], scratch: PathBuf) -> Result<Vec<PathBuf>, AssetCacheError> {
    let mut tasks: JoinSet<Result<(usize, PathBuf), AssetCacheError>> = JoinSet::new();
    for (i, asset) in assets.iter().enumerate() {
      let downloader = self.downloader.clone();
      let asset = asset.clone();
      let dest = scratch.join(format!("asset-{}.tar", i));
      tasks.spawn(async move {
        debug!(name = %asset.name, uri = %asset.uri, "downloading asset");
        let blob = downloader
          .download_verified(&asset.uri, &asset.sha256)
          .await
          .map_err(|source| match source {
            BlobError::HashMismatch { expected, actual, .. } => AssetCacheError::HashMismatch {
              name: asset.name.clone(),
              expected,
              actual,
            },
            source => AssetCacheError::Download {
              name: asset.name.clone(),
              sha256: asset.sha256.clone(),
              source,
            },
          })?;

        let content = blob.path().to_path_buf();
        let sha256 = bare_hex(&asset.sha256).to_string();
        tokio::task::spawn_blocking(move || write_asset_layer(&sha256, &content, &dest).map(|()| (i, dest)))
          .await
          .map_err(|e| AssetCacheError::Task(e.to_string()))?
      });
    }

    let mut staged: Vec<Option<PathBuf>> = vec![None; assets.len()];
    while let Some(joined) = tasks.join_next().await {
      let (i, path) = joined.map_err(|e| AssetCacheError::Task(e.to_string()))??;
      staged[i] = Some(path);
    }
    Ok(staged.into_iter().flatten().collect())
  }
}

/// Store `content` as `cnb/assets/<sha256>` in a single-file layer at `dest`.
fn write_asset_layer(sha256: &str, content: &Path, dest: &Path) -> Result<(), AssetCacheError> {
  let mut file = File::open(content)?;
  let size = file.metadata()?.len();
  let mut writer = LayerWriter::create(dest)?;
  writer.add_file(&format!("{}/{}", ASSETS_DIR, sha256), 0o644, size, &mut file)?;
  writer.finish()?;
  Ok(())
}

/// The buildpacks whose dependencies are cached: a package's default buildpack, or
/// every buildpack listed on a builder. `None` when the image is neither.
fn dependency_roots(image: &dyn Image) -> Result<Option<Vec<BuildpackInfo>>, AssetCacheError> {
  if let Some(metadata) = decode_label::<PackageMetadata>(image, labels::PACKAGE_METADATA)? {
    return Ok(Some(vec![metadata.info]));
  }
  let builder: Option<BuilderMetadata> = decode_label(image, labels::BUILDER_METADATA)?;
  Ok(builder.map(|metadata| metadata.buildpacks.into_iter().map(|bp| bp.info).collect()))
}
