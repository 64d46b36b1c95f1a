//! Fetching URIs into blobs.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::{Blob, BlobError};
use crate::platform::paths;
use crate::util::hash::{ContentHash, bare_hex, hash_bytes, hash_file};

/// Resolves a URI to local content.
#[async_trait]
pub trait Downloader: Send + Sync {
  async fn download(&self, uri: &str) -> Result<Blob, BlobError>;

  /// Download `uri` and check its content against `sha256`.
  async fn download_verified(&self, uri: &str, sha256: &str) -> Result<Blob, BlobError> {
    let blob = self.download(uri).await?;
    let actual = hash_path(blob.path()).await?;
    let expected = bare_hex(sha256);
    if actual.0 != expected {
      return Err(BlobError::HashMismatch {
        uri: uri.to_string(),
        expected: expected.to_string(),
        actual: actual.0,
      });
    }
    Ok(blob)
  }
}

async fn hash_path(path: &Path) -> Result<ContentHash, BlobError> {
  let path = path.to_path_buf();
  let hash = tokio::task::spawn_blocking(move || hash_file(&path))
    .await
    .map_err(io::Error::other)??;
  Ok(hash)
}

/// Downloads `http(s)://` URIs with reqwest and resolves `file://` URIs and plain paths
/// from the filesystem.
///
/// Remote content is cached under `<cache>/<sha256(uri)>`. The body streams into a
/// temporary file in the cache directory that is only persisted once complete, so a
/// cancelled or failed download never leaves a partial entry behind. When a hash is
/// expected, a cached entry is re-hashed before reuse and a fresh body that does not
/// match is never persisted.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
  cache_dir: PathBuf,
  client: reqwest::Client,
}

impl HttpDownloader {
  pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
    Self {
      cache_dir: cache_dir.into(),
      client: reqwest::Client::new(),
    }
  }

  pub fn from_env() -> Self {
    Self::new(paths::downloads_dir())
  }

  pub fn cache_dir(&self) -> &Path {
    &self.cache_dir
  }

  fn cache_path(&self, uri: &str) -> PathBuf {
    self.cache_dir.join(hash_bytes(uri.as_bytes()).0)
  }

  async fn fetch_remote(&self, uri: &str, expected: Option<&str>) -> Result<Blob, BlobError> {
    let dest = self.cache_path(uri);
    if fs::try_exists(&dest).await? {
      match expected {
        None => {
          debug!(uri, path = ?dest, "using cached download");
          return Blob::open(dest);
        }
        Some(expected) => {
          let actual = hash_path(&dest).await?;
          if actual.0 == expected {
            debug!(uri, path = ?dest, "using cached download");
            return Blob::open(dest);
          }
          debug!(uri, %expected, actual = %actual, "cached download hash mismatch, re-downloading");
          fs::remove_file(&dest).await?;
        }
      }
    }

    info!(uri, "downloading");
    let download_err = |e: reqwest::Error| BlobError::Download {
      uri: uri.to_string(),
      message: e.to_string(),
    };

    let mut response = self.client.get(uri).send().await.map_err(download_err)?;
    if !response.status().is_success() {
      return Err(BlobError::Download {
        uri: uri.to_string(),
        message: format!("HTTP {}", response.status()),
      });
    }

    fs::create_dir_all(&self.cache_dir).await?;
    let staged = tempfile::NamedTempFile::new_in(&self.cache_dir)?;
    let mut file = fs::File::from_std(staged.reopen()?);
    let mut hasher = Sha256::new();
    let mut size = 0usize;
    while let Some(chunk) = response.chunk().await.map_err(download_err)? {
      hasher.update(&chunk);
      file.write_all(&chunk).await?;
      size += chunk.len();
    }
    file.flush().await?;
    drop(file);

    let actual = hex::encode(hasher.finalize());
    if let Some(expected) = expected
      && actual != expected
    {
      return Err(BlobError::HashMismatch {
        uri: uri.to_string(),
        expected: expected.to_string(),
        actual,
      });
    }
    staged.persist(&dest).map_err(|e| BlobError::Io(e.error))?;

    info!(uri, path = ?dest, size, "download complete");
    Blob::open(dest)
  }
}

#[async_trait]
impl Downloader for HttpDownloader {
  async fn download(&self, uri: &str) -> Result<Blob, BlobError> {
    match parse_uri(uri)? {
      Source::Remote => self.fetch_remote(uri, None).await,
      Source::Local(path) => Blob::open(path),
    }
  }

  async fn download_verified(&self, uri: &str, sha256: &str) -> Result<Blob, BlobError> {
    let expected = bare_hex(sha256);
    match parse_uri(uri)? {
      Source::Remote => self.fetch_remote(uri, Some(expected)).await,
      Source::Local(path) => {
        let blob = Blob::open(path)?;
        let actual = hash_path(blob.path()).await?;
        if actual.0 != expected {
          return Err(BlobError::HashMismatch {
            uri: uri.to_string(),
            expected: expected.to_string(),
            actual: actual.0,
          });
        }
        Ok(blob)
      }
    }
  }
}

#[derive(Debug, PartialEq, Eq)]
enum Source {
  Remote,
  Local(PathBuf),
}

fn parse_uri(uri: &str) -> Result<Source, BlobError> {
  if uri.starts_with("http://") || uri.starts_with("https://") {
    return Ok(Source::Remote);
  }
  if let Some(path) = uri.strip_prefix("file://") {
    return Ok(Source::Local(PathBuf::from(path)));
  }
  match uri.split_once("://") {
    Some(_) => Err(BlobError::UnsupportedUri(uri.to_string())),
    None => Ok(Source::Local(PathBuf::from(uri))),
  }
}
