//! Buildpack packaging and nested-package flattening.

use packsmith_lib::consts::labels;
use packsmith_lib::dist::layers::all_buildpacks;
use packsmith_lib::dist::{BuildpackInfo, BuildpackLayers, PackageMetadata, Stack};
use packsmith_lib::image::{Image, ImageStore};
use packsmith_lib::image::label::decode_label;
use packsmith_lib::package::{CreatePackageOptions, PackageBuildpack, PackageConfig, PackageError, PackageRef};

use super::common::{STACK_ID, TestEnv, composite_descriptor, simple_descriptor};

fn package_options(name: &str, default: (&str, &str), uris: &[&str], nested: &[&str]) -> CreatePackageOptions {
  CreatePackageOptions {
    name: name.to_string(),
    config: PackageConfig {
      buildpack: BuildpackInfo::new(default.0, default.1),
      buildpacks: uris
        .iter()
        .map(|uri| PackageBuildpack { uri: uri.to_string() })
        .collect(),
      packages: nested
        .iter()
        .map(|r| PackageRef {
          reference: r.to_string(),
        })
        .collect(),
      stacks: vec![Stack::new(STACK_ID)],
    },
    publish: false,
    no_pull: false,
  }
}

fn buildpack_layers(image: &dyn Image) -> BuildpackLayers {
  decode_label(image, labels::BUILDPACK_LAYERS).unwrap().unwrap()
}

fn env_with_buildpacks() -> TestEnv {
  let env = TestEnv::new();
  env.simple_buildpack("bp-a.tgz", "bp.a", "1.0.0", &[]);
  env.simple_buildpack("bp-b.tgz", "bp.b", "2.0.0", &[]);
  env.simple_buildpack("bp-c.tgz", "bp.c", "3.0.0", &[]);
  env
}

mod flattening {
  use super::*;

  #[tokio::test]
  async fn single_buildpack_package_has_identity_and_layers() {
    let env = env_with_buildpacks();
    let saved = env
      .packager()
      .pack(&package_options("some/pkg-a", ("bp.a", "1.0.0"), &["bp-a.tgz"], &[]))
      .await
      .unwrap();

    let metadata: PackageMetadata = decode_label(saved.image.as_ref(), labels::PACKAGE_METADATA)
      .unwrap()
      .unwrap();
    assert_eq!(metadata.info, BuildpackInfo::new("bp.a", "1.0.0"));
    assert_eq!(metadata.stacks, vec![Stack::new(STACK_ID)]);

    let layers = buildpack_layers(saved.image.as_ref());
    assert_eq!(all_buildpacks(&layers), vec![BuildpackInfo::new("bp.a", "1.0.0")]);
    assert_eq!(saved.image.layers(), &[layers["bp.a"]["1.0.0"].layer_diff_id.clone()]);
    assert!(env.store.contains("some/pkg-a", true));
  }

  #[tokio::test]
  async fn nested_packages_flatten_at_any_depth() {
    let env = env_with_buildpacks();
    let packager = env.packager();

    let pkg_a = packager
      .pack(&package_options("some/pkg-a", ("bp.a", "1.0.0"), &["bp-a.tgz"], &[]))
      .await
      .unwrap();
    let pkg_ab = packager
      .pack(&package_options(
        "some/pkg-ab",
        ("bp.b", "2.0.0"),
        &["bp-b.tgz"],
        &["some/pkg-a"],
      ))
      .await
      .unwrap();

    let layers_ab = buildpack_layers(pkg_ab.image.as_ref());
    assert_eq!(
      all_buildpacks(&layers_ab),
      vec![BuildpackInfo::new("bp.a", "1.0.0"), BuildpackInfo::new("bp.b", "2.0.0")]
    );
    assert_eq!(
      layers_ab["bp.a"]["1.0.0"].layer_diff_id,
      buildpack_layers(pkg_a.image.as_ref())["bp.a"]["1.0.0"].layer_diff_id
    );

    let pkg_abc = packager
      .pack(&package_options(
        "some/pkg-abc",
        ("bp.c", "3.0.0"),
        &["bp-c.tgz"],
        &["some/pkg-ab"],
      ))
      .await
      .unwrap();
    assert_eq!(
      all_buildpacks(&buildpack_layers(pkg_abc.image.as_ref())),
      vec![
        BuildpackInfo::new("bp.a", "1.0.0"),
        BuildpackInfo::new("bp.b", "2.0.0"),
        BuildpackInfo::new("bp.c", "3.0.0"),
      ]
    );
    assert_eq!(pkg_abc.image.layers().len(), 3);
  }

  #[tokio::test]
  async fn same_buildpack_from_two_sources_is_deduplicated() {
    let env = env_with_buildpacks();
    let packager = env.packager();
    packager
      .pack(&package_options("some/pkg-a", ("bp.a", "1.0.0"), &["bp-a.tgz"], &[]))
      .await
      .unwrap();

    let saved = packager
      .pack(&package_options(
        "some/pkg-a2",
        ("bp.a", "1.0.0"),
        &["bp-a.tgz"],
        &["some/pkg-a"],
      ))
      .await
      .unwrap();
    assert_eq!(saved.image.layers().len(), 1);
  }

  #[tokio::test]
  async fn composite_default_pulls_in_its_components() {
    let env = env_with_buildpacks();
    env.buildpack(
      "meta.tgz",
      &composite_descriptor("bp.meta", "0.1.0", &[("bp.a", "1.0.0"), ("bp.b", "2.0.0")]),
    );

    let saved = env
      .packager()
      .pack(&package_options(
        "some/meta",
        ("bp.meta", "0.1.0"),
        &["meta.tgz", "bp-a.tgz", "bp-b.tgz"],
        &[],
      ))
      .await
      .unwrap();

    let layers = buildpack_layers(saved.image.as_ref());
    assert!(layers["bp.meta"]["0.1.0"].is_composite());
    assert_eq!(all_buildpacks(&layers).len(), 3);
  }
}

mod validation {
  use super::*;

  #[tokio::test]
  async fn nested_image_without_package_label_is_rejected() {
    let env = env_with_buildpacks();
    env.seed_image("some/not-a-package", true, STACK_ID, &[]).await;

    let err = env
      .packager()
      .pack(&package_options(
        "some/pkg",
        ("bp.a", "1.0.0"),
        &["bp-a.tgz"],
        &["some/not-a-package"],
      ))
      .await
      .unwrap_err();
    assert_eq!(
      err.to_string(),
      "label 'io.buildpacks.buildpack.layers' not present on package 'some/not-a-package'"
    );
  }

  #[tokio::test]
  async fn nested_image_without_package_metadata_fails() {
    let env = env_with_buildpacks();
    let mut image = env.store.new_image("some/layers-only", true).await.unwrap();
    image.set_label(labels::BUILDPACK_LAYERS, "{}");
    image.save().await.unwrap();

    let err = env
      .packager()
      .pack(&package_options(
        "some/pkg",
        ("bp.a", "1.0.0"),
        &["bp-a.tgz"],
        &["some/layers-only"],
      ))
      .await
      .unwrap_err();
    assert_eq!(
      err.to_string(),
      "label 'io.buildpacks.buildpackage.metadata' not present on package 'some/layers-only'"
    );
  }

  #[tokio::test]
  async fn repeated_nested_package_fails_fast() {
    let env = env_with_buildpacks();
    let packager = env.packager();
    packager
      .pack(&package_options("some/pkg-a", ("bp.a", "1.0.0"), &["bp-a.tgz"], &[]))
      .await
      .unwrap();

    let err = packager
      .pack(&package_options(
        "some/pkg",
        ("bp.a", "1.0.0"),
        &[],
        &["some/pkg-a", "some/pkg-a"],
      ))
      .await
      .unwrap_err();
    assert!(matches!(err, PackageError::Cycle { .. }));
  }

  #[tokio::test]
  async fn package_cannot_nest_itself() {
    let env = env_with_buildpacks();
    let err = env
      .packager()
      .pack(&package_options("some/pkg", ("bp.a", "1.0.0"), &["bp-a.tgz"], &["some/pkg"]))
      .await
      .unwrap_err();
    assert!(matches!(err, PackageError::Cycle { .. }));
  }

  #[tokio::test]
  async fn missing_nested_package_is_not_found() {
    let env = env_with_buildpacks();
    let err = env
      .packager()
      .pack(&package_options("some/pkg", ("bp.a", "1.0.0"), &["bp-a.tgz"], &["some/missing"]))
      .await
      .unwrap_err();
    assert!(err.is_not_found());
  }

  #[tokio::test]
  async fn buildpack_must_support_every_target_stack() {
    let env = env_with_buildpacks();
    let mut opts = package_options("some/pkg", ("bp.a", "1.0.0"), &["bp-a.tgz"], &[]);
    opts.config.stacks.push(Stack::new("other.stack.id"));

    let err = env.packager().pack(&opts).await.unwrap_err();
    assert_eq!(
      err.to_string(),
      "buildpack 'bp.a@1.0.0' does not support stack 'other.stack.id'"
    );
    assert!(!env.store.contains("some/pkg", true));
  }

  #[tokio::test]
  async fn universal_buildpack_supports_any_stack() {
    let env = TestEnv::new();
    env.buildpack(
      "any.tgz",
      "api = \"0.2\"\n[buildpack]\nid = \"bp.any\"\nversion = \"1.0.0\"\n[[stacks]]\nid = \"*\"\n",
    );
    let mut opts = package_options("some/pkg", ("bp.any", "1.0.0"), &["any.tgz"], &[]);
    opts.config.stacks.push(Stack::new("other.stack.id"));

    env.packager().pack(&opts).await.unwrap();
  }

  #[tokio::test]
  async fn default_buildpack_must_be_included() {
    let env = env_with_buildpacks();
    let err = env
      .packager()
      .pack(&package_options("some/pkg", ("bp.b", "2.0.0"), &["bp-a.tgz"], &[]))
      .await
      .unwrap_err();
    assert_eq!(
      err.to_string(),
      "default buildpack 'bp.b@2.0.0' is not included in the package"
    );
  }

  #[tokio::test]
  async fn conflicting_content_for_one_version_is_rejected() {
    let env = env_with_buildpacks();
    env.buildpack(
      "bp-a-fork.tgz",
      &simple_descriptor("bp.a", "1.0.0", &[], "\n[metadata]\nfork = true\n"),
    );

    let err = env
      .packager()
      .pack(&package_options(
        "some/pkg",
        ("bp.a", "1.0.0"),
        &["bp-a.tgz", "bp-a-fork.tgz"],
        &[],
      ))
      .await
      .unwrap_err();
    assert!(matches!(err, PackageError::Conflict { .. }));
  }
}
