//! Hashing utilities for content identity.
//!
//! Layers, assets and image configs are all identified by the SHA-256 of their
//! bytes. `ContentHash` holds the bare lowercase hex digest; `digest()` renders
//! the `sha256:` form used for layer diff ids and image digests.

use std::fs;
use std::io::{self, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A full 64-character SHA256 hash.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl ContentHash {
  /// The `sha256:<hex>` form.
  pub fn digest(&self) -> String {
    format!("sha256:{}", self.0)
  }
}

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Hash a file's contents.
pub fn hash_file(path: &Path) -> io::Result<ContentHash> {
  let mut file = fs::File::open(path)?;
  hash_reader(&mut file)
}

/// Hash everything readable from `reader`.
pub fn hash_reader(reader: &mut dyn Read) -> io::Result<ContentHash> {
  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];

  loop {
    let bytes_read = reader.read(&mut buffer)?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(ContentHash(hex::encode(hasher.finalize())))
}

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  let mut hasher = Sha256::new();
  hasher.update(data);
  ContentHash(hex::encode(hasher.finalize()))
}

/// Strip an optional `sha256:` prefix.
pub fn bare_hex(digest: &str) -> &str {
  digest.strip_prefix("sha256:").unwrap_or(digest)
}
