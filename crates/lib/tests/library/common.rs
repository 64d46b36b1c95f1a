//! Shared fixtures for library integration tests.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use packsmith_lib::asset_cache::AssetCacheBuilder;
use packsmith_lib::blob::{Blob, BlobError, Downloader};
use packsmith_lib::builder::{BuilderConfig, BuildpackConfig, Composer, StackConfig};
use packsmith_lib::consts::{ENV_GROUP_ID, ENV_USER_ID, labels};
use packsmith_lib::image::ImageStore;
use packsmith_lib::image::memory::MemoryStore;
use packsmith_lib::lifecycle::{LifecycleConfig, STANDARD_BINARIES, release_uri};
use packsmith_lib::package::Packager;
use packsmith_lib::platform::Platform;
use packsmith_lib::platform::os::Os;
use packsmith_lib::util::hash::hash_bytes;
use tempfile::TempDir;

pub const STACK_ID: &str = "some.stack.id";
pub const BUILD_IMAGE: &str = "some/build";
pub const RUN_IMAGE: &str = "some/run";
pub const RUN_MIRROR: &str = "gcr.io/some/run2";
pub const LIFECYCLE_VERSION: &str = "3.4.5";

/// Serves registered URIs from local paths; anything else is not found.
#[derive(Default)]
pub struct FakeDownloader {
  served: Mutex<BTreeMap<String, PathBuf>>,
}

impl FakeDownloader {
  pub fn serve(&self, uri: &str, path: PathBuf) {
    self.served.lock().unwrap().insert(uri.to_string(), path);
  }
}

#[async_trait]
impl Downloader for FakeDownloader {
  async fn download(&self, uri: &str) -> Result<Blob, BlobError> {
    let path = self.served.lock().unwrap().get(uri).cloned();
    match path {
      Some(path) => Blob::open(path),
      None => Err(BlobError::NotFound(uri.to_string())),
    }
  }
}

/// Isolated fixture directory, image store and downloader.
pub struct TestEnv {
  pub temp: TempDir,
  pub store: MemoryStore,
  pub downloader: Arc<FakeDownloader>,
}

impl TestEnv {
  pub fn new() -> Self {
    Self {
      temp: TempDir::new().unwrap(),
      store: MemoryStore::new().unwrap(),
      downloader: Arc::new(FakeDownloader::default()),
    }
  }

  fn store(&self) -> Arc<dyn ImageStore> {
    Arc::new(self.store.clone())
  }

  pub fn composer(&self) -> Composer {
    Composer::new(self.store(), self.downloader.clone()).with_host_os(Os::Linux)
  }

  pub fn packager(&self) -> Packager {
    Packager::new(self.store(), self.downloader.clone()).with_host_os(Os::Linux)
  }

  pub fn asset_cache_builder(&self) -> AssetCacheBuilder {
    AssetCacheBuilder::new(self.store(), self.downloader.clone())
  }

  fn fixture_dir(&self, uri: &str) -> PathBuf {
    let dir = self.temp.path().join(hash_bytes(uri.as_bytes()).0);
    std::fs::create_dir_all(&dir).unwrap();
    dir
  }

  /// Serve a buildpack directory with the given `buildpack.toml` at `uri`.
  pub fn buildpack(&self, uri: &str, descriptor: &str) {
    let dir = self.fixture_dir(uri);
    std::fs::write(dir.join("buildpack.toml"), descriptor).unwrap();
    std::fs::create_dir_all(dir.join("bin")).unwrap();
    std::fs::write(dir.join("bin").join("detect"), "#!/bin/sh\nexit 0\n").unwrap();
    self.downloader.serve(uri, dir);
  }

  /// Serve a buildpack supporting [`STACK_ID`] with the given mixins.
  pub fn simple_buildpack(&self, uri: &str, id: &str, version: &str, mixins: &[&str]) {
    self.buildpack(uri, &simple_descriptor(id, version, mixins, ""));
  }

  /// Serve an arbitrary file at `uri`, returning its sha256.
  pub fn asset(&self, uri: &str, content: &[u8]) -> String {
    let path = self.fixture_dir(uri).join("content");
    std::fs::write(&path, content).unwrap();
    self.downloader.serve(uri, path);
    hash_bytes(content).0
  }

  /// Serve a lifecycle at the release URI for [`LIFECYCLE_VERSION`].
  pub fn lifecycle(&self, platform_api: &str) {
    let uri = release_uri(&LIFECYCLE_VERSION.parse().unwrap(), &Platform::default());
    let dir = self.fixture_dir(&uri);
    std::fs::write(
      dir.join("lifecycle.toml"),
      format!(
        "[api]\nplatform = \"{}\"\nbuildpack = \"0.2\"\n\n[lifecycle]\nversion = \"{}\"\n",
        platform_api, LIFECYCLE_VERSION
      ),
    )
    .unwrap();
    let bin_dir = dir.join("lifecycle");
    std::fs::create_dir_all(&bin_dir).unwrap();
    for binary in STANDARD_BINARIES.iter().chain(["cacher"].iter()) {
      std::fs::write(bin_dir.join(binary), format!("{} binary", binary)).unwrap();
    }
    self.downloader.serve(&uri, dir);
  }

  /// Save an image carrying stack labels and the build user env.
  pub async fn seed_image(&self, reference: &str, local: bool, stack_id: &str, mixins: &[&str]) {
    let mut image = self.store.new_image(reference, local).await.unwrap();
    image.set_label(labels::STACK_ID, stack_id);
    image.set_label(labels::STACK_MIXINS, &serde_json::to_string(mixins).unwrap());
    image.set_env(ENV_USER_ID, "1234");
    image.set_env(ENV_GROUP_ID, "4321");
    image.save().await.unwrap();
  }
}

pub fn simple_descriptor(id: &str, version: &str, mixins: &[&str], extra: &str) -> String {
  format!(
    "api = \"0.2\"\n\n[buildpack]\nid = \"{}\"\nversion = \"{}\"\n\n[[stacks]]\nid = \"{}\"\nmixins = {}\n{}",
    id,
    version,
    STACK_ID,
    serde_json::to_string(mixins).unwrap(),
    extra
  )
}

pub fn composite_descriptor(id: &str, version: &str, group: &[(&str, &str)]) -> String {
  let mut out = format!("api = \"0.2\"\n\n[buildpack]\nid = \"{}\"\nversion = \"{}\"\n\n[[order]]\n", id, version);
  for (id, version) in group {
    out.push_str(&format!("[[order.group]]\nid = \"{}\"\nversion = \"{}\"\n", id, version));
  }
  out
}

/// The standard builder config: `bp.one@1.2.3` on [`STACK_ID`].
pub fn builder_config() -> BuilderConfig {
  BuilderConfig {
    description: "Some description".to_string(),
    buildpacks: vec![BuildpackConfig {
      id: "bp.one".to_string(),
      version: "1.2.3".to_string(),
      uri: "https://example.com/bp-one.tgz".to_string(),
    }],
    order: toml::from_str::<BuilderConfig>(
      "[[order]]\n[[order.group]]\nid = \"bp.one\"\nversion = \"1.2.3\"\n",
    )
    .unwrap()
    .order,
    stack: StackConfig {
      id: STACK_ID.to_string(),
      build_image: BUILD_IMAGE.to_string(),
      run_image: RUN_IMAGE.to_string(),
      run_image_mirrors: vec![RUN_MIRROR.to_string()],
    },
    lifecycle: LifecycleConfig {
      uri: None,
      version: Some(LIFECYCLE_VERSION.to_string()),
    },
  }
}
