/// Application name used for data and cache directories.
pub const APP_NAME: &str = "packsmith";

/// Overrides the data root (daemon store, registry store and download cache).
pub const HOME_ENV: &str = "PACKSMITH_HOME";

/// Label keys persisted on produced and inspected images.
pub mod labels {
  pub const STACK_ID: &str = "io.buildpacks.stack.id";
  pub const STACK_MIXINS: &str = "io.buildpacks.stack.mixins";
  pub const BUILDPACK_LAYERS: &str = "io.buildpacks.buildpack.layers";
  pub const BUILDPACK_ORDER: &str = "io.buildpacks.buildpack.order";
  pub const BUILDER_METADATA: &str = "io.buildpacks.builder.metadata";
  pub const PACKAGE_METADATA: &str = "io.buildpacks.buildpackage.metadata";
  pub const ASSET_LAYERS: &str = "io.buildpacks.asset.layers";
}

/// Environment keys carrying the build user identity.
pub const ENV_USER_ID: &str = "CNB_USER_ID";
pub const ENV_GROUP_ID: &str = "CNB_GROUP_ID";

/// Paths inside builder and package images (relative, as stored in layer tarballs).
pub const LIFECYCLE_DIR: &str = "cnb/lifecycle";
pub const BUILDPACKS_DIR: &str = "cnb/buildpacks";
pub const ASSETS_DIR: &str = "cnb/assets";
pub const ORDER_PATH: &str = "cnb/order.toml";
pub const STACK_PATH: &str = "cnb/stack.toml";

/// Descriptor file names inside fetched artifacts.
pub const BUILDPACK_DESCRIPTOR: &str = "buildpack.toml";
pub const LIFECYCLE_DESCRIPTOR: &str = "lifecycle.toml";

/// Lifecycle embedded when the builder config names neither a URI nor a version.
pub const DEFAULT_LIFECYCLE_VERSION: &str = "0.7.2";

/// Base of the canonical lifecycle release locator.
pub const LIFECYCLE_RELEASES_URL: &str = "https://github.com/buildpack/lifecycle/releases/download";

/// Stack id a buildpack declares to run on any stack.
pub const UNIVERSAL_STACK: &str = "*";

/// Modification time written to every layer entry (1980-01-01T00:00:01Z) so layers are reproducible.
pub const NORMALIZED_MTIME: u64 = 315_532_801;
