//! Stack mixin compatibility.
//!
//! A mixin is either unscoped (`curl`) or scoped to a stage (`build:curl`,
//! `run:curl`). An unscoped stack mixin satisfies requirements of any scope.

use std::collections::BTreeSet;
use std::fmt;

use thiserror::Error;

use crate::dist::{BuildpackDescriptor, BuildpackInfo};

/// The stage a mixin applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
  Any,
  Build,
  Run,
}

/// Split a mixin into its scope and bare name.
pub fn parse_mixin(mixin: &str) -> (Scope, &str) {
  if let Some(name) = mixin.strip_prefix("build:") {
    (Scope::Build, name)
  } else if let Some(name) = mixin.strip_prefix("run:") {
    (Scope::Run, name)
  } else {
    (Scope::Any, mixin)
  }
}

/// Whether a stack providing `provided` satisfies `required`.
pub fn satisfies(provided: &str, required: &str) -> bool {
  let (provided_scope, provided_name) = parse_mixin(provided);
  let (required_scope, required_name) = parse_mixin(required);
  if provided_name != required_name {
    return false;
  }
  match required_scope {
    Scope::Any => true,
    scope => provided_scope == scope || provided_scope == Scope::Any,
  }
}

/// Mixins one buildpack requires that the stack lacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingMixins {
  pub buildpack: BuildpackInfo,
  /// Sorted and deduplicated.
  pub mixins: Vec<String>,
}

impl fmt::Display for MissingMixins {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "buildpack '{}' requires missing mixin(s): {}",
      self.buildpack,
      self.mixins.join(", ")
    )
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MixinError {
  #[error("{}", join_missing(.0))]
  Missing(Vec<MissingMixins>),
}

fn join_missing(entries: &[MissingMixins]) -> String {
  entries.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

impl MixinError {
  /// Every missing mixin across all buildpacks, sorted and deduplicated.
  pub fn all_missing(&self) -> Vec<String> {
    let MixinError::Missing(entries) = self;
    entries
      .iter()
      .flat_map(|m| m.mixins.iter().cloned())
      .collect::<BTreeSet<_>>()
      .into_iter()
      .collect()
  }
}

/// Mixins in `required` not satisfied by any of `provided`, sorted and deduplicated.
pub fn missing_mixins<'a>(provided: &[String], required: impl IntoIterator<Item = &'a String>) -> Vec<String> {
  required
    .into_iter()
    .filter(|r| !provided.iter().any(|p| satisfies(p, r)))
    .cloned()
    .collect::<BTreeSet<_>>()
    .into_iter()
    .collect()
}

/// Check every buildpack's mixin requirements for `stack_id` against `provided`.
///
/// All buildpacks are checked before failing so the error lists every gap at once.
pub fn check_mixins(stack_id: &str, provided: &[String], buildpacks: &[&BuildpackDescriptor]) -> Result<(), MixinError> {
  let missing: Vec<MissingMixins> = buildpacks
    .iter()
    .filter_map(|bp| {
      let required = bp.required_mixins(stack_id);
      let mixins = missing_mixins(provided, &required);
      (!mixins.is_empty()).then(|| MissingMixins {
        buildpack: bp.info().clone(),
        mixins,
      })
    })
    .collect();

  if missing.is_empty() {
    Ok(())
  } else {
    Err(MixinError::Missing(missing))
  }
}
