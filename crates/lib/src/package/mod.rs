//! Buildpack packages: a default buildpack plus every buildpack it needs, in one image.

pub mod config;
pub mod pack;

pub use config::{PackageBuildpack, PackageConfig, PackageRef};
pub use pack::{CreatePackageOptions, PackageError, Packager};
