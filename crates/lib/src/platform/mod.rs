pub mod arch;
pub mod os;
pub mod paths;

use arch::Arch;
use os::Os;
use std::fmt;

/// Target platform combining architecture and OS (e.g., "linux.x86-64")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Platform {
  pub arch: Arch,
  pub os: Os,
}

impl Platform {
  /// Create a new platform identifier
  pub fn new(arch: Arch, os: Os) -> Self {
    Self { arch, os }
  }

  /// Returns the suffix used by lifecycle release archives (e.g., "linux.x86-64")
  pub fn release_suffix(&self) -> String {
    format!("{}.{}", self.os, self.arch.release_name())
  }
}

impl Default for Platform {
  fn default() -> Self {
    Self::new(Arch::X86_64, Os::Linux)
  }
}

impl fmt::Display for Platform {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.os, self.arch)
  }
}
