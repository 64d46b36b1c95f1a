//! Buildpack layer metadata carried by builder and package images.
//!
//! The `io.buildpacks.buildpack.layers` label maps `id -> version -> layer info`.
//! Composite buildpacks reference their components through `order`, so the set of
//! buildpacks a root depends on is found by walking that graph.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::api::ApiVersion;
use super::buildpack::{Asset, BuildpackDescriptor, BuildpackInfo, Order, Stack};

/// Metadata recorded for one buildpack layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildpackLayerInfo {
  pub api: ApiVersion,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub stacks: Vec<Stack>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub order: Order,
  #[serde(rename = "layerDiffID")]
  pub layer_diff_id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub homepage: Option<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub assets: Vec<Asset>,
}

impl BuildpackLayerInfo {
  pub fn from_descriptor(descriptor: &BuildpackDescriptor, layer_diff_id: String) -> Self {
    Self {
      api: descriptor.api,
      stacks: descriptor.stacks.clone(),
      order: descriptor.order.clone(),
      layer_diff_id,
      homepage: descriptor.buildpack.homepage.clone(),
      assets: descriptor.assets().to_vec(),
    }
  }

  pub fn is_composite(&self) -> bool {
    !self.order.is_empty()
  }
}

/// `id -> version -> layer info`.
pub type BuildpackLayers = BTreeMap<String, BTreeMap<String, BuildpackLayerInfo>>;

/// Look up the layer info for `info`.
pub fn layer_for<'a>(layers: &'a BuildpackLayers, info: &BuildpackInfo) -> Option<&'a BuildpackLayerInfo> {
  layers.get(&info.id)?.get(&info.version)
}

/// Insert layer info for `info`, returning any previous entry.
pub fn insert_layer(
  layers: &mut BuildpackLayers,
  info: &BuildpackInfo,
  layer: BuildpackLayerInfo,
) -> Option<BuildpackLayerInfo> {
  layers.entry(info.id.clone()).or_default().insert(info.version.clone(), layer)
}

/// Every `id@version` present in `layers`, sorted.
pub fn all_buildpacks(layers: &BuildpackLayers) -> Vec<BuildpackInfo> {
  layers
    .iter()
    .flat_map(|(id, versions)| versions.keys().map(move |v| BuildpackInfo::new(id.clone(), v.clone())))
    .collect()
}

/// Identity label written on buildpack packages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageMetadata {
  #[serde(flatten)]
  pub info: BuildpackInfo,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub stacks: Vec<Stack>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DependencyError {
  #[error("unable to find metadata for buildpack {id}, {version}")]
  Missing { id: String, version: String },
}

/// Collect `root` and every buildpack reachable from it through composite orders.
///
/// Uses an explicit worklist; each `id@version` is visited once, so diamond and
/// self-referencing orders terminate. The result is in discovery order.
pub fn resolve_dependencies(
  layers: &BuildpackLayers,
  root: &BuildpackInfo,
) -> Result<Vec<BuildpackInfo>, DependencyError> {
  let mut visited: BTreeSet<BuildpackInfo> = BTreeSet::new();
  let mut queue: VecDeque<BuildpackInfo> = VecDeque::from([root.clone()]);
  let mut resolved = Vec::new();

  while let Some(info) = queue.pop_front() {
    if !visited.insert(info.clone()) {
      continue;
    }

    let layer = layer_for(layers, &info).ok_or_else(|| DependencyError::Missing {
      id: info.id.clone(),
      version: info.version.clone(),
    })?;

    for entry in &layer.order {
      for bp_ref in &entry.group {
        queue.push_back(bp_ref.info.clone());
      }
    }

    resolved.push(info);
  }

  Ok(resolved)
}
