//! Implementation of the `packsmith package-buildpack` command.

use std::path::Path;

use anyhow::{Context, Result};

use packsmith_lib::package::{CreatePackageOptions, PackageConfig, Packager};

use super::{collaborators, destination};
use crate::output::{print_stat, print_success, truncate_digest};

pub fn cmd_package_buildpack(name: &str, config: &Path, publish: bool, no_pull: bool) -> Result<()> {
  let config = PackageConfig::load(config).context("Failed to load package config")?;
  let (store, downloader) = collaborators();
  let packager = Packager::new(store, downloader);

  let options = CreatePackageOptions {
    name: name.to_string(),
    config,
    publish,
    no_pull,
  };

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let saved = rt
    .block_on(packager.pack(&options))
    .with_context(|| format!("Failed to package buildpack '{}'", name))?;

  print_success(&format!("Successfully created package '{}'", name));
  print_stat("Digest", truncate_digest(&saved.digest));
  print_stat("Saved to", destination(publish));
  print_stat("Default buildpack", &options.config.buildpack.to_string());

  Ok(())
}
