mod cmd;
mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use packsmith_lib::image::PullPolicy;
use tracing_subscriber::EnvFilter;

use crate::cmd::{cmd_create_asset_cache, cmd_create_builder, cmd_inspect_builder, cmd_package_buildpack};
use crate::output::{OutputFormat, print_error};

/// packsmith - compose buildpack builders, packages and asset caches
#[derive(Parser)]
#[command(name = "packsmith")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable debug logging
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Create a builder image from a builder.toml
  CreateBuilder {
    /// Name of the builder image to create
    name: String,

    /// Path to the builder config
    #[arg(short, long)]
    config: PathBuf,

    /// Save the builder to the registry instead of the local daemon
    #[arg(long)]
    publish: bool,

    /// Do not pull the build image before composing
    #[arg(long)]
    no_pull: bool,
  },

  /// Package buildpacks into a single distributable image
  PackageBuildpack {
    /// Name of the package image to create
    name: String,

    /// Path to the package config
    #[arg(short, long)]
    config: PathBuf,

    /// Save the package to the registry instead of the local daemon
    #[arg(long)]
    publish: bool,

    /// Do not pull nested packages before packaging
    #[arg(long)]
    no_pull: bool,
  },

  /// Create an image holding every asset a buildpack references
  CreateAssetCache {
    /// Name of the asset cache image to create
    name: String,

    /// Buildpack package or builder whose assets are cached
    #[arg(short, long)]
    buildpack: String,

    /// When to pull the buildpack image: always, never or if-not-present
    #[arg(long, default_value_t = PullPolicy::Always)]
    pull_policy: PullPolicy,

    /// Save the cache to the registry instead of the local daemon
    #[arg(long)]
    publish: bool,

    /// Target operating system of the cache image
    #[arg(long, default_value = "linux")]
    os: String,
  },

  /// Show the metadata of a builder image
  InspectBuilder {
    /// Name of the builder image
    name: String,

    /// Read the builder from the registry instead of the local daemon
    #[arg(long)]
    remote: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,
  },
}

fn main() {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "info" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let result = match cli.command {
    Commands::CreateBuilder {
      name,
      config,
      publish,
      no_pull,
    } => cmd_create_builder(&name, &config, publish, no_pull),
    Commands::PackageBuildpack {
      name,
      config,
      publish,
      no_pull,
    } => cmd_package_buildpack(&name, &config, publish, no_pull),
    Commands::CreateAssetCache {
      name,
      buildpack,
      pull_policy,
      publish,
      os,
    } => cmd_create_asset_cache(&name, &buildpack, pull_policy, publish, &os),
    Commands::InspectBuilder { name, remote, output } => cmd_inspect_builder(&name, remote, output),
  };

  if let Err(err) = result {
    print_error(&format!("{:#}", err));
    std::process::exit(1);
  }
}
