//! Artifact acquisition.
//!
//! Turns a URI into a blob plus its parsed descriptor, verifying the identity the
//! caller declared against the identity the artifact declares.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::blob::{Blob, BlobError, Downloader};
use crate::consts::BUILDPACK_DESCRIPTOR;
use crate::dist::{BuildpackDescriptor, BuildpackInfo, DescriptorError};
use crate::lifecycle::{Lifecycle, LifecycleConfig, LifecycleError};
use crate::platform::Platform;
use crate::platform::os::Os;

#[derive(Debug, Error)]
pub enum AcquireError {
  #[error("downloading '{uri}': {source}")]
  Download {
    uri: String,
    #[source]
    source: BlobError,
  },

  #[error("buildpack '{uri}': directory-based buildpacks are not currently supported on Windows")]
  UnsupportedDirectory { uri: String },

  #[error("reading buildpack from '{uri}': {source}")]
  Descriptor {
    uri: String,
    #[source]
    source: DescriptorError,
  },

  #[error("buildpack from URI '{uri}' has ID '{actual}' which does not match ID '{declared}' from builder config")]
  IdMismatch {
    uri: String,
    actual: String,
    declared: String,
  },

  #[error(
    "buildpack from URI '{uri}' has version '{actual}' which does not match version '{declared}' from builder config"
  )]
  VersionMismatch {
    uri: String,
    actual: String,
    declared: String,
  },

  #[error(transparent)]
  LifecycleConfig(LifecycleError),

  #[error("fetching lifecycle from '{uri}': {source}")]
  Lifecycle {
    uri: String,
    #[source]
    source: LifecycleError,
  },
}

/// A downloaded buildpack and its descriptor.
#[derive(Debug, Clone)]
pub struct FetchedBuildpack {
  pub uri: String,
  pub descriptor: BuildpackDescriptor,
  pub blob: Blob,
}

impl FetchedBuildpack {
  pub fn info(&self) -> &BuildpackInfo {
    self.descriptor.info()
  }
}

/// Fetches buildpacks and lifecycles through a [`Downloader`].
#[derive(Clone)]
pub struct Acquirer {
  downloader: Arc<dyn Downloader>,
  host_os: Os,
}

impl Acquirer {
  pub fn new(downloader: Arc<dyn Downloader>) -> Self {
    Self {
      downloader,
      host_os: Os::current().unwrap_or(Os::Linux),
    }
  }

  /// Override the OS used to decide whether directory sources are allowed.
  pub fn with_host_os(mut self, os: Os) -> Self {
    self.host_os = os;
    self
  }

  pub fn downloader(&self) -> &Arc<dyn Downloader> {
    &self.downloader
  }

  async fn download(&self, uri: &str) -> Result<Blob, AcquireError> {
    self.downloader.download(uri).await.map_err(|source| AcquireError::Download {
      uri: uri.to_string(),
      source,
    })
  }

  /// Fetch a buildpack and parse its `buildpack.toml`.
  pub async fn fetch_buildpack(&self, uri: &str) -> Result<FetchedBuildpack, AcquireError> {
    debug!(uri, "fetching buildpack");
    let blob = self.download(uri).await?;

    if blob.is_dir() && self.host_os == Os::Windows {
      return Err(AcquireError::UnsupportedDirectory { uri: uri.to_string() });
    }

    let descriptor_err = |source| AcquireError::Descriptor {
      uri: uri.to_string(),
      source,
    };
    let raw = blob
      .read_file(BUILDPACK_DESCRIPTOR)
      .map_err(|source| AcquireError::Download {
        uri: uri.to_string(),
        source,
      })?
      .ok_or_else(|| {
        descriptor_err(DescriptorError::Missing {
          file: BUILDPACK_DESCRIPTOR.to_string(),
        })
      })?;
    let content = String::from_utf8(raw).map_err(|_| {
      descriptor_err(DescriptorError::Encoding {
        file: BUILDPACK_DESCRIPTOR.to_string(),
      })
    })?;
    let descriptor = BuildpackDescriptor::parse(&content).map_err(descriptor_err)?;

    Ok(FetchedBuildpack {
      uri: uri.to_string(),
      descriptor,
      blob,
    })
  }

  /// Fetch a buildpack and check it is the one the config declared.
  ///
  /// Empty declared fields are not checked.
  pub async fn fetch_declared(&self, uri: &str, declared: &BuildpackInfo) -> Result<FetchedBuildpack, AcquireError> {
    let fetched = self.fetch_buildpack(uri).await?;
    let actual = fetched.info();

    if !declared.id.is_empty() && declared.id != actual.id {
      return Err(AcquireError::IdMismatch {
        uri: uri.to_string(),
        actual: actual.id.clone(),
        declared: declared.id.clone(),
      });
    }
    if !declared.version.is_empty() && declared.version != actual.version {
      return Err(AcquireError::VersionMismatch {
        uri: uri.to_string(),
        actual: actual.version.clone(),
        declared: declared.version.clone(),
      });
    }

    Ok(fetched)
  }

  /// Resolve, download and verify the lifecycle named by `config`.
  pub async fn fetch_lifecycle(&self, config: &LifecycleConfig, platform: &Platform) -> Result<Lifecycle, AcquireError> {
    let uri = config.resolve_uri(platform).map_err(AcquireError::LifecycleConfig)?;
    debug!(uri = %uri, "fetching lifecycle");
    let blob = self.download(&uri).await?;
    Lifecycle::from_blob(blob).map_err(|source| AcquireError::Lifecycle { uri, source })
  }
}
