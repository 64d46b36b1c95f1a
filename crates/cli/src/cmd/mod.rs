mod create_asset_cache;
mod create_builder;
mod inspect_builder;
mod package_buildpack;

use std::sync::Arc;

use packsmith_lib::blob::{Downloader, HttpDownloader};
use packsmith_lib::image::ImageStore;
use packsmith_lib::image::layout::LayoutStore;
use packsmith_lib::platform::paths;
use tracing::debug;

pub use create_asset_cache::cmd_create_asset_cache;
pub use create_builder::cmd_create_builder;
pub use inspect_builder::cmd_inspect_builder;
pub use package_buildpack::cmd_package_buildpack;

/// The on-disk image store and download cache under the data root.
fn collaborators() -> (Arc<dyn ImageStore>, Arc<dyn Downloader>) {
  debug!(
    daemon = ?paths::daemon_dir(),
    registry = ?paths::registry_dir(),
    downloads = ?paths::downloads_dir(),
    "using on-disk image store"
  );
  (Arc::new(LayoutStore::from_env()), Arc::new(HttpDownloader::from_env()))
}

fn destination(publish: bool) -> &'static str {
  if publish { "registry" } else { "daemon" }
}
