//! Reproducible layer tarballs.
//!
//! Every entry gets the same modification time and an explicit owner, and parent
//! directories are emitted before their children, so identical inputs always produce
//! byte-identical layers (and therefore identical diff ids).

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use thiserror::Error;

use crate::blob::{Blob, BlobError, EntryKind};
use crate::consts::{BUILDPACKS_DIR, NORMALIZED_MTIME};
use crate::dist::BuildpackInfo;

#[derive(Debug, Error)]
pub enum LayerError {
  #[error("invalid layer path '{0}'")]
  InvalidPath(String),

  #[error(transparent)]
  Blob(#[from] BlobError),

  #[error("writing layer: {0}")]
  Io(#[from] io::Error),
}

/// Lets layer writes run inside [`Blob::for_each_entry`] visitors.
impl From<LayerError> for BlobError {
  fn from(e: LayerError) -> Self {
    match e {
      LayerError::Blob(e) => e,
      LayerError::Io(e) => BlobError::Io(e),
      LayerError::InvalidPath(p) => BlobError::Io(io::Error::new(io::ErrorKind::InvalidInput, p)),
    }
  }
}

/// Streams entries into a tar file.
pub struct LayerWriter {
  builder: tar::Builder<BufWriter<File>>,
  dirs: BTreeSet<String>,
  uid: u64,
  gid: u64,
}

impl LayerWriter {
  pub fn create(path: &Path) -> Result<Self, LayerError> {
    let file = File::create(path)?;
    Ok(Self {
      builder: tar::Builder::new(BufWriter::new(file)),
      dirs: BTreeSet::new(),
      uid: 0,
      gid: 0,
    })
  }

  pub fn with_owner(mut self, uid: u64, gid: u64) -> Self {
    self.uid = uid;
    self.gid = gid;
    self
  }

  fn header(&self, kind: tar::EntryType, mode: u32, size: u64) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(kind);
    header.set_mode(mode);
    header.set_size(size);
    header.set_uid(self.uid);
    header.set_gid(self.gid);
    header.set_mtime(NORMALIZED_MTIME);
    header
  }

  fn ensure_parents(&mut self, path: &str) -> Result<(), LayerError> {
    let mut prefix = String::new();
    let parts: Vec<&str> = path.split('/').collect();
    for part in &parts[..parts.len().saturating_sub(1)] {
      if !prefix.is_empty() {
        prefix.push('/');
      }
      prefix.push_str(part);
      if !self.dirs.contains(&prefix) {
        self.add_dir(&prefix.clone(), 0o755)?;
      }
    }
    Ok(())
  }

  pub fn add_dir(&mut self, path: &str, mode: u32) -> Result<(), LayerError> {
    let path = checked(path)?;
    if self.dirs.contains(&path) {
      return Ok(());
    }
    self.ensure_parents(&path)?;
    let mut header = self.header(tar::EntryType::Directory, mode, 0);
    self.builder.append_data(&mut header, format!("{}/", path), io::empty())?;
    self.dirs.insert(path);
    Ok(())
  }

  pub fn add_file(&mut self, path: &str, mode: u32, size: u64, reader: &mut dyn Read) -> Result<(), LayerError> {
    let path = checked(path)?;
    self.ensure_parents(&path)?;
    let mut header = self.header(tar::EntryType::Regular, mode, size);
    self.builder.append_data(&mut header, &path, reader)?;
    Ok(())
  }

  pub fn add_bytes(&mut self, path: &str, mode: u32, bytes: &[u8]) -> Result<(), LayerError> {
    self.add_file(path, mode, bytes.len() as u64, &mut &bytes[..])
  }

  pub fn add_symlink(&mut self, path: &str, target: &Path) -> Result<(), LayerError> {
    let path = checked(path)?;
    self.ensure_parents(&path)?;
    let mut header = self.header(tar::EntryType::Symlink, 0o777, 0);
    self.builder.append_link(&mut header, &path, target)?;
    Ok(())
  }

  /// Copy every entry of `blob` below `root`.
  pub fn add_blob(&mut self, root: &str, blob: &Blob) -> Result<(), LayerError> {
    self.add_dir(root, 0o755)?;
    blob.for_each_entry(|entry| {
      let path = format!("{}/{}", root, entry.path);
      let result = match entry.kind {
        EntryKind::Dir => self.add_dir(&path, entry.mode),
        EntryKind::File => self.add_file(&path, entry.mode, entry.size, entry.reader),
        EntryKind::Symlink(target) => self.add_symlink(&path, &target),
      };
      result.map_err(BlobError::from)
    })?;
    Ok(())
  }

  pub fn finish(self) -> Result<(), LayerError> {
    let mut writer = self.builder.into_inner()?;
    writer.flush()?;
    Ok(())
  }
}

fn checked(path: &str) -> Result<String, LayerError> {
  let trimmed = path.trim_matches('/');
  if trimmed.is_empty() || trimmed.split('/').any(|p| p.is_empty() || p == "..") {
    return Err(LayerError::InvalidPath(path.to_string()));
  }
  Ok(trimmed.to_string())
}

/// Directory a buildpack occupies inside an image, e.g. `cnb/buildpacks/bp.one/1.2.3`.
pub fn buildpack_dir(info: &BuildpackInfo) -> String {
  format!("{}/{}/{}", BUILDPACKS_DIR, info.id.replace('/', "_"), info.version)
}

/// Write a layer containing the buildpack blob at [`buildpack_dir`].
pub fn write_buildpack_layer(
  dest: &Path,
  info: &BuildpackInfo,
  blob: &Blob,
  uid: u64,
  gid: u64,
) -> Result<(), LayerError> {
  let mut writer = LayerWriter::create(dest)?.with_owner(uid, gid);
  writer.add_blob(&buildpack_dir(info), blob)?;
  writer.finish()
}

/// Paths of every entry in a layer tarball, without trailing slashes.
pub fn tar_entries(path: &Path) -> io::Result<Vec<String>> {
  let mut archive = tar::Archive::new(BufReader::new(File::open(path)?));
  let mut names = Vec::new();
  for entry in archive.entries()? {
    let entry = entry?;
    names.push(entry.path()?.to_string_lossy().trim_end_matches('/').to_string());
  }
  Ok(names)
}

/// Whether the layer tarball has an entry at `wanted` (leading `/` ignored).
pub fn tar_contains(path: &Path, wanted: &str) -> io::Result<bool> {
  let wanted = wanted.trim_matches('/');
  Ok(tar_entries(path)?.iter().any(|name| name == wanted))
}
