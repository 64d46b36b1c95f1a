//! Implementation of the `packsmith create-asset-cache` command.

use anyhow::{Context, Result};

use packsmith_lib::asset_cache::{AssetCacheBuilder, CreateAssetCacheOptions};
use packsmith_lib::image::PullPolicy;

use super::{collaborators, destination};
use crate::output::{print_stat, print_success, truncate_digest};

pub fn cmd_create_asset_cache(name: &str, buildpack: &str, pull_policy: PullPolicy, publish: bool, os: &str) -> Result<()> {
  let (store, downloader) = collaborators();
  let builder = AssetCacheBuilder::new(store, downloader);

  let options = CreateAssetCacheOptions {
    name: name.to_string(),
    buildpack: buildpack.to_string(),
    pull_policy,
    publish,
    os: os.to_string(),
  };

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let saved = rt
    .block_on(builder.build(&options))
    .with_context(|| format!("Failed to create asset cache '{}'", name))?;

  print_success(&format!("Successfully created asset cache '{}'", name));
  print_stat("Digest", truncate_digest(&saved.digest));
  print_stat("Saved to", destination(publish));
  print_stat("Assets", &saved.image.layers().len().to_string());

  Ok(())
}
