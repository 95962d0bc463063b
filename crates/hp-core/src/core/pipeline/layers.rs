//! Deterministic filesystem layers.
//!
//! Entries are walked in name order and every header gets the same owner,
//! normalized permissions and a fixed mtime, so identical trees produce
//! identical digests.

use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

use anyhow::Result;
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use tar::{Builder, EntryType, Header};
use tracing::debug;
use walkdir::WalkDir;

use crate::core::tooling::errors::{codes, hp_error};
use crate::core::tooling::outcome::InstallUserError;

/// An uncompressed layer stored as `blobs/sha256/<digest>`.
#[derive(Clone, Debug, Serialize)]
pub struct LayerBlob {
    pub digest: String,
    pub size: u64,
}

impl LayerBlob {
    #[must_use]
    pub fn oci_digest(&self) -> String {
        format!("sha256:{}", self.digest)
    }
}

/// Tars `root` so its contents land at `dest` inside the image.
pub(crate) fn tree_layer(root: &Path, dest: &str, blobs: &Path, mtime: u64) -> Result<LayerBlob> {
    let mut builder = Builder::new(Vec::new());
    let prefix = archive_prefix(dest);

    // Parents of the destination (`srv/`, `srv/app/`, ...).
    let mut parent = PathBuf::new();
    for component in prefix.components() {
        parent.push(component);
        append_dir(&mut builder, &parent, mtime)?;
    }
    let entries = append_tree(&mut builder, root, &prefix, mtime)?;
    debug!(root = %root.display(), dest, entries, "layer contents");
    finalize_layer(builder, blobs)
}

/// Appends everything below `root` (not `root` itself) under `prefix`, in
/// name order. Returns the number of entries written.
pub(crate) fn append_tree<W: io::Write>(
    builder: &mut Builder<W>,
    root: &Path,
    prefix: &Path,
    mtime: u64,
) -> Result<usize> {
    builder.follow_symlinks(false);
    let mut entries = 0usize;
    for entry in WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .min_depth(1)
    {
        let entry = entry
            .map_err(|err| layer_error("failed to walk layer contents", root, &err.to_string()))?;
        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
        append_path(builder, &prefix.join(rel), entry.path(), mtime)?;
        entries += 1;
    }
    Ok(entries)
}

fn archive_prefix(dest: &str) -> PathBuf {
    Path::new(dest)
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect()
}

fn append_path<W: io::Write>(
    builder: &mut Builder<W>,
    archive_path: &Path,
    path: &Path,
    mtime: u64,
) -> Result<(), InstallUserError> {
    let metadata = fs::symlink_metadata(path)
        .map_err(|err| layer_error("failed to read file metadata", path, &err.to_string()))?;
    let file_type = metadata.file_type();
    if file_type.is_dir() {
        return append_dir(builder, archive_path, mtime);
    }
    if file_type.is_symlink() {
        let target = fs::read_link(path)
            .map_err(|err| layer_error("failed to read symlink", path, &err.to_string()))?;
        let mut header = base_header(EntryType::Symlink, 0o777, mtime);
        return builder
            .append_link(&mut header, archive_path, &target)
            .map_err(|err| layer_error("failed to add symlink to layer", path, &err.to_string()));
    }
    if !file_type.is_file() {
        debug!(path = %path.display(), "skipping special file");
        return Ok(());
    }
    let mode = if is_executable(&metadata) { 0o755 } else { 0o644 };
    let mut header = base_header(EntryType::Regular, mode, mtime);
    header.set_size(metadata.len());
    let file = File::open(path)
        .map_err(|err| layer_error("failed to read file for layer", path, &err.to_string()))?;
    builder
        .append_data(&mut header, archive_path, file)
        .map_err(|err| layer_error("failed to add file to layer", path, &err.to_string()))
}

fn append_dir<W: io::Write>(
    builder: &mut Builder<W>,
    archive_path: &Path,
    mtime: u64,
) -> Result<(), InstallUserError> {
    let mut header = base_header(EntryType::Directory, 0o755, mtime);
    header.set_size(0);
    builder
        .append_data(&mut header, archive_path, io::empty())
        .map_err(|err| layer_error("failed to add directory to layer", archive_path, &err.to_string()))
}

fn base_header(kind: EntryType, mode: u32, mtime: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(kind);
    header.set_mode(mode);
    header.set_mtime(mtime);
    header.set_uid(0);
    header.set_gid(0);
    header.set_size(0);
    header
}

#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
    false
}

fn finalize_layer(builder: Builder<Vec<u8>>, blobs: &Path) -> Result<LayerBlob> {
    let data = builder
        .into_inner()
        .map_err(|err| layer_error("failed to finalize layer", blobs, &err.to_string()))?;
    write_blob(blobs, &data)
}

/// Stores `bytes` under its sha256 and describes it.
pub(crate) fn write_blob(blobs: &Path, bytes: &[u8]) -> Result<LayerBlob> {
    let digest = hex::encode(Sha256::digest(bytes));
    fs::create_dir_all(blobs)
        .map_err(|err| layer_error("failed to prepare blob directory", blobs, &err.to_string()))?;
    let path = blobs.join(&digest);
    if !path.exists() {
        fs::write(&path, bytes)
            .map_err(|err| layer_error("failed to write blob", &path, &err.to_string()))?;
    }
    Ok(LayerBlob {
        digest,
        size: bytes.len() as u64,
    })
}

fn layer_error(message: &str, path: &Path, error: &str) -> InstallUserError {
    hp_error(
        codes::IMAGE,
        message,
        json!({
            "reason": "layer_write_failed",
            "path": path.display().to_string(),
            "error": error,
        }),
    )
}
