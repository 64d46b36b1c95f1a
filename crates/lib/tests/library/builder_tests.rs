//! Builder composition.

use packsmith_lib::builder::{Builder, BuilderBuildpack, BuildpackConfig, ComposeError, CreateBuilderOptions};
use packsmith_lib::consts::labels;
use packsmith_lib::dist::BuildpackInfo;
use packsmith_lib::image::{FetchAttempt, Image};
use packsmith_lib::layer::tar_entries;

use super::common::{BUILD_IMAGE, RUN_IMAGE, RUN_MIRROR, STACK_ID, TestEnv, builder_config, simple_descriptor};

const BP_ONE_URI: &str = "https://example.com/bp-one.tgz";

/// Build image, run image, mirror, lifecycle and `bp.one` all available locally.
async fn ready_env(platform_api: &str, mixins: &[&str]) -> TestEnv {
  let env = TestEnv::new();
  env.seed_image(BUILD_IMAGE, true, STACK_ID, &["mixinX", "build:mixinY"]).await;
  env.seed_image(RUN_IMAGE, true, STACK_ID, &["mixinX"]).await;
  env.seed_image(RUN_MIRROR, true, STACK_ID, &["mixinX"]).await;
  env.lifecycle(platform_api);
  env.simple_buildpack(BP_ONE_URI, "bp.one", "1.2.3", mixins);
  env
}

fn options() -> CreateBuilderOptions {
  CreateBuilderOptions {
    name: "some/builder".to_string(),
    config: builder_config(),
    publish: false,
    no_pull: false,
  }
}

fn lifecycle_entries(image: &dyn Image) -> Vec<String> {
  let diff_id = image
    .find_layer_with_path("/cnb/lifecycle/detector")
    .unwrap()
    .expect("lifecycle layer");
  tar_entries(&image.get_layer(&diff_id).unwrap()).unwrap()
}

mod end_to_end {
  use super::*;

  #[tokio::test]
  async fn platform_api_0_2_embeds_the_standard_binaries() {
    let env = ready_env("0.2", &["mixinX"]).await;

    let saved = env.composer().compose(&options()).await.unwrap();
    let builder = Builder::from_image(saved.image.as_ref()).unwrap();

    assert_eq!(builder.name, "some/builder");
    assert_eq!(builder.stack_id, STACK_ID);
    assert_eq!(
      builder.buildpacks,
      vec![BuilderBuildpack {
        info: BuildpackInfo::new("bp.one", "1.2.3"),
        latest: true,
      }]
    );
    assert_eq!((builder.uid, builder.gid), (1234, 4321));
    assert_eq!(builder.lifecycle.version, "3.4.5");
    assert_eq!(builder.run_image.image, RUN_IMAGE);
    assert_eq!(builder.run_image.mirrors, vec![RUN_MIRROR]);
    assert_eq!(builder.description, "Some description");

    let entries = lifecycle_entries(saved.image.as_ref());
    for binary in ["detector", "restorer", "analyzer", "builder", "exporter", "launcher"] {
      assert!(entries.contains(&format!("cnb/lifecycle/{}", binary)), "missing {}", binary);
    }
    assert!(!entries.contains(&"cnb/lifecycle/cacher".to_string()));

    assert!(env.store.contains("some/builder", true));
  }

  #[tokio::test]
  async fn platform_api_0_1_also_embeds_the_cacher() {
    let env = ready_env("0.1", &["mixinX"]).await;

    let saved = env.composer().compose(&options()).await.unwrap();
    let entries = lifecycle_entries(saved.image.as_ref());

    assert!(entries.contains(&"cnb/lifecycle/cacher".to_string()));
    assert!(entries.contains(&"cnb/lifecycle/launcher".to_string()));
  }

  #[tokio::test]
  async fn builder_carries_buildpack_and_config_layers() {
    let env = ready_env("0.2", &[]).await;

    let saved = env.composer().compose(&options()).await.unwrap();
    let image = saved.image.as_ref();

    assert_eq!(image.label(labels::STACK_ID), Some(STACK_ID));
    assert!(
      image
        .find_layer_with_path("cnb/buildpacks/bp.one/1.2.3/buildpack.toml")
        .unwrap()
        .is_some()
    );
    assert!(image.find_layer_with_path("cnb/order.toml").unwrap().is_some());
    assert!(image.find_layer_with_path("cnb/stack.toml").unwrap().is_some());

    let builder = Builder::from_image(image).unwrap();
    assert_eq!(builder.order[0].group[0].info, BuildpackInfo::new("bp.one", "1.2.3"));
    assert!(builder.layers["bp.one"]["1.2.3"].layer_diff_id.starts_with("sha256:"));
  }

  #[tokio::test]
  async fn repeated_buildpack_is_added_once() {
    let env = ready_env("0.2", &[]).await;
    let mut opts = options();
    let repeat = opts.config.buildpacks[0].clone();
    opts.config.buildpacks.push(repeat);

    let saved = env.composer().compose(&opts).await.unwrap();
    let builder = Builder::from_image(saved.image.as_ref()).unwrap();

    assert_eq!(
      builder.buildpacks,
      vec![BuilderBuildpack {
        info: BuildpackInfo::new("bp.one", "1.2.3"),
        latest: true,
      }]
    );
    // lifecycle, bp.one, config
    assert_eq!(saved.image.layers().len(), 3);
  }
}

mod validation {
  use super::*;

  #[tokio::test]
  async fn missing_stack_id_is_named() {
    let env = TestEnv::new();
    let mut opts = options();
    opts.config.stack.id = String::new();

    let err = env.composer().compose(&opts).await.unwrap_err();
    assert_eq!(err.to_string(), "stack.id is required");
    assert!(env.store.attempts().is_empty());
  }

  #[tokio::test]
  async fn build_image_stack_mismatch_names_both_ids() {
    let env = ready_env("0.2", &[]).await;
    env.seed_image(BUILD_IMAGE, true, "other.stack.id", &[]).await;

    let err = env.composer().compose(&options()).await.unwrap_err();
    assert_eq!(
      err.to_string(),
      "stack 'some.stack.id' from builder config is incompatible with stack 'other.stack.id' from build image"
    );
  }

  #[tokio::test]
  async fn run_image_stack_mismatch_names_the_image() {
    let env = ready_env("0.2", &[]).await;
    env.seed_image(RUN_MIRROR, true, "other.stack.id", &[]).await;

    let err = env.composer().compose(&options()).await.unwrap_err();
    assert!(matches!(err, ComposeError::StackMismatch { .. }));
    assert!(err.to_string().contains("from run image 'gcr.io/some/run2'"));
    assert!(!env.store.contains("some/builder", true));
  }

  #[tokio::test]
  async fn missing_mixins_are_listed_exactly() {
    let env = ready_env("0.2", &["mixinX", "build:mixinY"]).await;
    env.seed_image(BUILD_IMAGE, true, STACK_ID, &["mixinX"]).await;

    let err = env.composer().compose(&options()).await.unwrap_err();
    let ComposeError::Mixins(mixin_err) = &err else {
      panic!("expected mixin error, got {}", err);
    };
    assert_eq!(mixin_err.all_missing(), vec!["build:mixinY"]);
    assert_eq!(
      err.to_string(),
      "validating buildpacks: buildpack 'bp.one@1.2.3' requires missing mixin(s): build:mixinY"
    );
  }

  #[tokio::test]
  async fn declared_version_must_match_the_artifact() {
    let env = ready_env("0.2", &[]).await;
    let mut opts = options();
    opts.config.buildpacks[0].version = "9.9.9".to_string();

    let err = env.composer().compose(&opts).await.unwrap_err();
    assert!(err.to_string().contains("does not match version '9.9.9'"));
  }

  #[tokio::test]
  async fn repeated_buildpack_with_different_content_is_rejected() {
    let env = ready_env("0.2", &[]).await;
    let fork_uri = "https://example.com/bp-one-fork.tgz";
    env.buildpack(fork_uri, &simple_descriptor("bp.one", "1.2.3", &["mixinX"], ""));
    let mut opts = options();
    opts.config.buildpacks.push(BuildpackConfig {
      id: "bp.one".to_string(),
      version: "1.2.3".to_string(),
      uri: fork_uri.to_string(),
    });

    let err = env.composer().compose(&opts).await.unwrap_err();
    assert!(matches!(err, ComposeError::Conflict { .. }));
    assert_eq!(
      err.to_string(),
      "buildpack 'bp.one@1.2.3' is provided more than once with different content"
    );
    assert!(!env.store.contains("some/builder", true));
  }

  #[tokio::test]
  async fn unreachable_buildpack_is_fatal() {
    let env = ready_env("0.2", &[]).await;
    let mut opts = options();
    opts.config.buildpacks[0].uri = "https://example.com/missing.tgz".to_string();

    let err = env.composer().compose(&opts).await.unwrap_err();
    assert!(matches!(err, ComposeError::Acquire(_)));
  }
}

mod run_images {
  use super::*;

  #[tokio::test]
  async fn inaccessible_run_image_does_not_fail() {
    let env = TestEnv::new();
    env.seed_image(BUILD_IMAGE, true, STACK_ID, &[]).await;
    env.lifecycle("0.2");
    env.simple_buildpack(BP_ONE_URI, "bp.one", "1.2.3", &[]);

    let saved = env.composer().compose(&options()).await.unwrap();

    assert_eq!(saved.image.name(), "some/builder");
    assert_eq!(env.store.attempts_for(RUN_IMAGE).len(), 2);
  }

  #[tokio::test]
  async fn non_not_found_errors_are_fatal() {
    let env = ready_env("0.2", &[]).await;
    env.store.fail_fetch(RUN_IMAGE, "connection refused");

    let err = env.composer().compose(&options()).await.unwrap_err();
    assert!(matches!(err, ComposeError::RunImage { .. }));
    assert!(!err.is_not_found());
  }
}

mod pull_policy {
  use super::*;

  #[tokio::test]
  async fn local_compose_pulls_the_build_image_and_never_the_run_image() {
    let env = ready_env("0.2", &[]).await;
    env.composer().compose(&options()).await.unwrap();

    assert_eq!(env.store.attempts_for(BUILD_IMAGE), vec![FetchAttempt::new(true, true)]);
    assert_eq!(env.store.attempts_for(RUN_IMAGE), vec![FetchAttempt::new(true, false)]);
  }

  #[tokio::test]
  async fn no_pull_reads_the_daemon_only() {
    let env = ready_env("0.2", &[]).await;
    let mut opts = options();
    opts.no_pull = true;
    env.composer().compose(&opts).await.unwrap();

    assert_eq!(env.store.attempts_for(BUILD_IMAGE), vec![FetchAttempt::new(true, false)]);
  }

  #[tokio::test]
  async fn publish_reads_and_writes_the_registry() {
    let env = TestEnv::new();
    env.seed_image(BUILD_IMAGE, false, STACK_ID, &[]).await;
    env.seed_image(RUN_IMAGE, false, STACK_ID, &[]).await;
    env.seed_image(RUN_MIRROR, false, STACK_ID, &[]).await;
    env.lifecycle("0.2");
    env.simple_buildpack(BP_ONE_URI, "bp.one", "1.2.3", &[]);

    let mut opts = options();
    opts.publish = true;
    env.composer().compose(&opts).await.unwrap();

    assert_eq!(env.store.attempts_for(BUILD_IMAGE), vec![FetchAttempt::new(false, true)]);
    assert_eq!(env.store.attempts_for(RUN_IMAGE), vec![FetchAttempt::new(false, false)]);
    assert!(env.store.contains("some/builder", false));
    assert!(!env.store.contains("some/builder", true));
  }
}
