//! Distribution types: buildpack descriptors, order graphs and layer metadata.

pub mod api;
pub mod buildpack;
pub mod layers;

pub use api::ApiVersion;
pub use buildpack::{
  Asset, BuildpackDescriptor, BuildpackInfo, BuildpackRef, DescriptorError, Order, OrderEntry, Stack,
};
pub use layers::{BuildpackLayerInfo, BuildpackLayers, DependencyError, PackageMetadata};
