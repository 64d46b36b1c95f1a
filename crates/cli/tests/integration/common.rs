//! Shared test helpers for CLI integration tests.

use std::fs::File;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use flate2::Compression;
use flate2::write::GzEncoder;
use packsmith_lib::consts::{ENV_GROUP_ID, ENV_USER_ID, labels};
use packsmith_lib::image::{Image, ImageStore};
use packsmith_lib::image::layout::LayoutStore;
use packsmith_lib::lifecycle::STANDARD_BINARIES;
use tempfile::TempDir;

pub const STACK_ID: &str = "some.stack.id";

/// Isolated test environment.
///
/// Each test gets its own data root (image stores and download cache) and a
/// workspace directory for configs and artifacts.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  pub fn new() -> Self {
    Self {
      temp: TempDir::new().unwrap(),
    }
  }

  /// Data root passed as `PACKSMITH_HOME`.
  pub fn home(&self) -> PathBuf {
    let p = self.temp.path().join("home");
    std::fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  /// Directory holding configs and artifacts.
  pub fn workspace(&self) -> PathBuf {
    let p = self.temp.path().join("workspace");
    std::fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  pub fn store(&self) -> LayoutStore {
    LayoutStore::new(self.home().join("daemon"), self.home().join("registry"))
  }

  /// Get a Command for the packsmith binary bound to this environment.
  pub fn packsmith_cmd(&self) -> Command {
    let mut cmd = cargo_bin_cmd!("packsmith");
    cmd.env("PACKSMITH_HOME", self.home());
    cmd.current_dir(self.workspace());
    cmd
  }

  /// Write a file relative to the workspace.
  pub fn write_file(&self, relative_path: &str, content: impl AsRef<[u8]>) -> PathBuf {
    let path = self.workspace().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
  }

  /// Write a gzipped buildpack archive at `relative_path`.
  pub fn buildpack_tgz(&self, relative_path: &str, descriptor: &str) -> PathBuf {
    let path = self.workspace().join(relative_path);
    let encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
    let mut archive = tar::Builder::new(encoder);
    append(&mut archive, "buildpack.toml", descriptor.as_bytes(), 0o644);
    append(&mut archive, "bin/detect", b"#!/bin/sh\nexit 0\n", 0o755);
    append(&mut archive, "bin/build", b"#!/bin/sh\nexit 0\n", 0o755);
    archive.into_inner().unwrap().finish().unwrap();
    path
  }

  /// Write a lifecycle directory at `relative_path` with the standard binaries.
  pub fn lifecycle_dir(&self, relative_path: &str, platform_api: &str) {
    self.write_file(
      &format!("{}/lifecycle.toml", relative_path),
      format!(
        "[api]\nplatform = \"{}\"\nbuildpack = \"0.2\"\n\n[lifecycle]\nversion = \"3.4.5\"\n",
        platform_api
      ),
    );
    for binary in STANDARD_BINARIES {
      self.write_file(&format!("{}/lifecycle/{}", relative_path, binary), "binary");
    }
  }

  /// Save an image with stack labels and the build user env into the daemon store.
  pub fn seed_image(&self, reference: &str, stack_id: &str) {
    let store = self.store();
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
      let mut image = store.new_image(reference, true).await.unwrap();
      image.set_label(labels::STACK_ID, stack_id);
      image.set_label(labels::STACK_MIXINS, "[\"mixinX\"]");
      image.set_env(ENV_USER_ID, "1000");
      image.set_env(ENV_GROUP_ID, "1000");
      image.save().await.unwrap();
    });
  }
}

fn append<W: std::io::Write>(archive: &mut tar::Builder<W>, path: &str, data: &[u8], mode: u32) {
  let mut header = tar::Header::new_gnu();
  header.set_size(data.len() as u64);
  header.set_mode(mode);
  header.set_cksum();
  archive.append_data(&mut header, Path::new(path), data).unwrap();
}

pub fn simple_descriptor(id: &str, version: &str, extra: &str) -> String {
  format!(
    "api = \"0.2\"\n\n[buildpack]\nid = \"{}\"\nversion = \"{}\"\n\n[[stacks]]\nid = \"{}\"\nmixins = [\"mixinX\"]\n{}",
    id, version, STACK_ID, extra
  )
}
