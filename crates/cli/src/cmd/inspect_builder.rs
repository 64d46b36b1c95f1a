//! Implementation of the `packsmith inspect-builder` command.

use anyhow::{Context, Result};
use serde::Serialize;

use packsmith_lib::builder::{Builder, BuilderBuildpack};
use packsmith_lib::image::{FetchAttempt, fetch_first};

use super::collaborators;
use crate::output::{OutputFormat, print_info, print_json, print_stat};

#[derive(Serialize)]
struct BuilderReport<'a> {
  name: &'a str,
  description: &'a str,
  stack: &'a str,
  mixins: &'a [String],
  run_image: &'a str,
  run_image_mirrors: &'a [String],
  lifecycle: &'a str,
  platform_api: String,
  buildpack_api: String,
  buildpacks: &'a [BuilderBuildpack],
  created_by: String,
}

pub fn cmd_inspect_builder(name: &str, remote: bool, output: OutputFormat) -> Result<()> {
  let (store, _) = collaborators();

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let image = rt
    .block_on(fetch_first(store.as_ref(), name, &[FetchAttempt::new(!remote, false)]))
    .with_context(|| format!("Failed to read builder '{}'", name))?;
  let builder = Builder::from_image(image.as_ref()).with_context(|| format!("'{}' is not a builder", name))?;

  let report = BuilderReport {
    name: &builder.name,
    description: &builder.description,
    stack: &builder.stack_id,
    mixins: &builder.mixins,
    run_image: &builder.run_image.image,
    run_image_mirrors: &builder.run_image.mirrors,
    lifecycle: &builder.lifecycle.version,
    platform_api: builder.lifecycle.api.platform.to_string(),
    buildpack_api: builder.lifecycle.api.buildpack.to_string(),
    buildpacks: &builder.buildpacks,
    created_by: format!("{} {}", builder.created_by.name, builder.created_by.version),
  };

  if output.is_json() {
    return print_json(&report);
  }

  print_info(&format!("Builder {}", report.name));
  if !report.description.is_empty() {
    print_stat("Description", report.description);
  }
  print_stat("Stack", report.stack);
  print_stat("Run image", report.run_image);
  for mirror in report.run_image_mirrors {
    print_stat("Mirror", mirror);
  }
  print_stat(
    "Lifecycle",
    &format!(
      "{} (platform API {}, buildpack API {})",
      report.lifecycle, report.platform_api, report.buildpack_api
    ),
  );
  print_stat("Created by", &report.created_by);

  println!();
  print_info("Buildpacks");
  for bp in report.buildpacks {
    let marker = if bp.latest { " (latest)" } else { "" };
    println!("  {}{}", bp.info, marker);
  }

  Ok(())
}
