//! Downloaded artifact content.
//!
//! A [`Blob`] is either a directory or an archive file (`.tar` or gzip-compressed tar).
//! Archives are read in place; nothing is unpacked to disk.

pub mod download;

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use thiserror::Error;
use walkdir::WalkDir;

pub use download::{Downloader, HttpDownloader};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Error)]
pub enum BlobError {
  #[error("'{0}' does not exist")]
  NotFound(String),

  #[error("unsupported URI '{0}'")]
  UnsupportedUri(String),

  #[error("downloading '{uri}': {message}")]
  Download { uri: String, message: String },

  #[error("'{uri}' has sha256 '{actual}', expected '{expected}'")]
  HashMismatch {
    uri: String,
    expected: String,
    actual: String,
  },

  #[error("reading '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("I/O error: {0}")]
  Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlobKind {
  Dir,
  Archive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
  Dir,
  File,
  Symlink(PathBuf),
}

/// One entry visited by [`Blob::for_each_entry`].
pub struct BlobEntry<'a> {
  /// Path relative to the blob root, `/`-separated, without leading `./`.
  pub path: String,
  pub kind: EntryKind,
  pub mode: u32,
  pub size: u64,
  pub reader: &'a mut dyn Read,
}

/// Content fetched by a [`Downloader`]; safe to open repeatedly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
  path: PathBuf,
  kind: BlobKind,
}

impl Blob {
  pub fn open(path: impl Into<PathBuf>) -> Result<Self, BlobError> {
    let path = path.into();
    let metadata = std::fs::metadata(&path).map_err(|e| {
      if e.kind() == io::ErrorKind::NotFound {
        BlobError::NotFound(path.display().to_string())
      } else {
        BlobError::Read {
          path: path.clone(),
          source: e,
        }
      }
    })?;
    let kind = if metadata.is_dir() {
      BlobKind::Dir
    } else {
      BlobKind::Archive
    };
    Ok(Self { path, kind })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn is_dir(&self) -> bool {
    self.kind == BlobKind::Dir
  }

  /// Open the raw bytes of an archive blob, decompressing gzip when present.
  fn open_archive(&self) -> Result<Box<dyn Read>, BlobError> {
    let read_err = |source| BlobError::Read {
      path: self.path.clone(),
      source,
    };
    let mut file = File::open(&self.path).map_err(read_err)?;
    let mut magic = [0u8; 2];
    let n = file.read(&mut magic).map_err(read_err)?;
    let file = File::open(&self.path).map_err(read_err)?;

    if n == 2 && magic == GZIP_MAGIC {
      Ok(Box::new(GzDecoder::new(BufReader::new(file))))
    } else {
      Ok(Box::new(BufReader::new(file)))
    }
  }

  /// Read the file at `rel` (relative to the blob root), `Ok(None)` if absent.
  pub fn read_file(&self, rel: &str) -> Result<Option<Vec<u8>>, BlobError> {
    let wanted = normalize(rel);
    if self.is_dir() {
      let path = self.path.join(&wanted);
      return match std::fs::read(&path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(BlobError::Read { path, source }),
      };
    }

    let mut found = None;
    self.for_each_entry(|entry| {
      if found.is_none() && entry.kind == EntryKind::File && entry.path == wanted {
        let mut bytes = Vec::with_capacity(entry.size as usize);
        entry.reader.read_to_end(&mut bytes)?;
        found = Some(bytes);
      }
      Ok(())
    })?;
    Ok(found)
  }

  /// Visit every entry below the blob root. The root itself is not visited.
  pub fn for_each_entry<F>(&self, mut visit: F) -> Result<(), BlobError>
  where
    F: FnMut(BlobEntry<'_>) -> Result<(), BlobError>,
  {
    if self.is_dir() {
      return self.walk_dir(&mut visit);
    }

    let mut archive = tar::Archive::new(self.open_archive()?);
    let read_err = |source| BlobError::Read {
      path: self.path.clone(),
      source,
    };
    for entry in archive.entries().map_err(read_err)? {
      let mut entry = entry.map_err(read_err)?;
      let path = normalize(&entry.path().map_err(read_err)?.to_string_lossy());
      if path.is_empty() {
        continue;
      }
      let header = entry.header();
      let mode = header.mode().map_err(read_err)?;
      let size = header.size().map_err(read_err)?;
      let kind = match header.entry_type() {
        tar::EntryType::Directory => EntryKind::Dir,
        tar::EntryType::Symlink => match entry.link_name().map_err(read_err)? {
          Some(target) => EntryKind::Symlink(target.into_owned()),
          None => continue,
        },
        t if t.is_file() => EntryKind::File,
        _ => continue,
      };
      visit(BlobEntry {
        path,
        kind,
        mode,
        size,
        reader: &mut entry,
      })?;
    }
    Ok(())
  }

  fn walk_dir<F>(&self, visit: &mut F) -> Result<(), BlobError>
  where
    F: FnMut(BlobEntry<'_>) -> Result<(), BlobError>,
  {
    let walker = WalkDir::new(&self.path).min_depth(1).sort_by_file_name();
    for entry in walker {
      let entry = entry.map_err(|e| BlobError::Io(e.into()))?;
      let rel = entry.path().strip_prefix(&self.path).unwrap_or(entry.path());
      let path = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
      let metadata = entry.path().symlink_metadata()?;
      let mode = file_mode(&metadata);

      if metadata.file_type().is_symlink() {
        let target = std::fs::read_link(entry.path())?;
        visit(BlobEntry {
          path,
          kind: EntryKind::Symlink(target),
          mode,
          size: 0,
          reader: &mut io::empty(),
        })?;
      } else if metadata.is_dir() {
        visit(BlobEntry {
          path,
          kind: EntryKind::Dir,
          mode,
          size: 0,
          reader: &mut io::empty(),
        })?;
      } else {
        let mut file = File::open(entry.path())?;
        visit(BlobEntry {
          path,
          kind: EntryKind::File,
          mode,
          size: metadata.len(),
          reader: &mut file,
        })?;
      }
    }
    Ok(())
  }
}

#[cfg(unix)]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
  use std::os::unix::fs::PermissionsExt;
  metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
  if metadata.is_dir() { 0o755 } else { 0o644 }
}

/// Strip `./` and leading or trailing `/` from an archive path.
fn normalize(path: &str) -> String {
  let mut path = path.trim_matches('/');
  while let Some(rest) = path.strip_prefix("./") {
    path = rest;
  }
  if path == "." {
    return String::new();
  }
  path.trim_matches('/').to_string()
}
