//! packsmith-lib: builder, buildpack package and asset cache composition.
//!
//! The engine assembles OCI images out of buildpacks and a lifecycle:
//! - `builder`: a build image plus lifecycle, buildpacks, order and run image metadata
//! - `package`: a flat, distributable set of buildpacks with a default entry point
//! - `asset_cache`: every asset a buildpack references, one layer per content hash
//!
//! Images are reached through the [`image::ImageStore`] trait and artifacts through
//! [`blob::Downloader`], so both can be swapped for in-memory doubles.

pub mod acquire;
pub mod asset_cache;
pub mod blob;
pub mod builder;
pub mod config;
pub mod consts;
pub mod dist;
pub mod image;
pub mod layer;
pub mod lifecycle;
pub mod package;
pub mod platform;
pub mod stack;
pub mod util;
