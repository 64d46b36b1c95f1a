//! Implementation of the `packsmith create-builder` command.

use std::path::Path;

use anyhow::{Context, Result};

use packsmith_lib::builder::{BuilderConfig, Composer, CreateBuilderOptions};

use super::{collaborators, destination};
use crate::output::{print_stat, print_success, truncate_digest};

/// Compose a builder image from `config` and save it under `name`.
pub fn cmd_create_builder(name: &str, config: &Path, publish: bool, no_pull: bool) -> Result<()> {
  let config = BuilderConfig::load(config).context("Failed to load builder config")?;
  let (store, downloader) = collaborators();
  let composer = Composer::new(store, downloader);

  let options = CreateBuilderOptions {
    name: name.to_string(),
    config,
    publish,
    no_pull,
  };

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let saved = rt
    .block_on(composer.compose(&options))
    .with_context(|| format!("Failed to create builder '{}'", name))?;

  print_success(&format!("Successfully created builder image '{}'", name));
  print_stat("Digest", truncate_digest(&saved.digest));
  print_stat("Saved to", destination(publish));
  print_stat("Buildpacks", &options.config.buildpacks.len().to_string());

  Ok(())
}
