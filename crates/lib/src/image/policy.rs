//! Pull policies and the ordered fetch attempts they expand to.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing::debug;

use super::{FetchAttempt, Image, ImageStore, StoreError};

/// When to prefer local images over the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PullPolicy {
  /// Always pull, fall back to the daemon when the registry lacks the image.
  #[default]
  Always,
  /// Only ever look at the daemon.
  Never,
  /// Use the daemon copy when present, pull otherwise.
  IfNotPresent,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid pull policy '{0}': expected always, never or if-not-present")]
pub struct InvalidPullPolicy(pub String);

impl FromStr for PullPolicy {
  type Err = InvalidPullPolicy;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "always" => Ok(PullPolicy::Always),
      "never" => Ok(PullPolicy::Never),
      "if-not-present" => Ok(PullPolicy::IfNotPresent),
      other => Err(InvalidPullPolicy(other.to_string())),
    }
  }
}

impl fmt::Display for PullPolicy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      PullPolicy::Always => "always",
      PullPolicy::Never => "never",
      PullPolicy::IfNotPresent => "if-not-present",
    };
    f.write_str(s)
  }
}

const REMOTE: FetchAttempt = FetchAttempt::new(false, true);
const LOCAL: FetchAttempt = FetchAttempt::new(true, false);

/// Expand a pull policy into the attempts to make, in order.
pub fn policy_to_attempts(policy: PullPolicy) -> Vec<FetchAttempt> {
  match policy {
    PullPolicy::Never => vec![LOCAL],
    PullPolicy::Always => vec![REMOTE, LOCAL],
    PullPolicy::IfNotPresent => vec![LOCAL, REMOTE],
  }
}

/// Attempts for build images and nested packages.
///
/// Publishing reads the registry directly; otherwise the image is read from the daemon,
/// pulled first unless `no_pull` is set.
pub fn attempts_for(publish: bool, no_pull: bool) -> Vec<FetchAttempt> {
  vec![FetchAttempt::new(!publish, !no_pull)]
}

/// Attempts for run images and their mirrors, which are never pulled.
pub fn run_image_attempts(publish: bool) -> Vec<FetchAttempt> {
  if publish {
    vec![FetchAttempt::new(false, false)]
  } else {
    vec![FetchAttempt::new(true, false), FetchAttempt::new(false, false)]
  }
}

/// Fetch `reference` trying each attempt in order.
///
/// Not-found advances to the next attempt; any other error aborts.
pub async fn fetch_first(
  store: &dyn ImageStore,
  reference: &str,
  attempts: &[FetchAttempt],
) -> Result<Box<dyn Image>, StoreError> {
  for attempt in attempts {
    debug!(reference, ?attempt, "fetching image");
    match store.fetch(reference, *attempt).await {
      Ok(image) => return Ok(image),
      Err(e) if e.is_not_found() => continue,
      Err(e) => return Err(e),
    }
  }
  Err(StoreError::NotFound(reference.to_string()))
}
