use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A `major.minor` API version as declared by buildpacks and lifecycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ApiVersion {
  pub major: u32,
  pub minor: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid API version '{0}': expected <major>.<minor>")]
pub struct InvalidApiVersion(pub String);

impl ApiVersion {
  pub const fn new(major: u32, minor: u32) -> Self {
    Self { major, minor }
  }
}

impl FromStr for ApiVersion {
  type Err = InvalidApiVersion;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let trimmed = s.trim().trim_start_matches('v');
    let (major, minor) = trimmed.split_once('.').unwrap_or((trimmed, "0"));
    let parse = |part: &str| part.parse::<u32>().map_err(|_| InvalidApiVersion(s.to_string()));
    Ok(Self {
      major: parse(major)?,
      minor: parse(minor)?,
    })
  }
}

impl TryFrom<String> for ApiVersion {
  type Error = InvalidApiVersion;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    value.parse()
  }
}

impl From<ApiVersion> for String {
  fn from(value: ApiVersion) -> Self {
    value.to_string()
  }
}

impl fmt::Display for ApiVersion {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}.{}", self.major, self.minor)
  }
}
