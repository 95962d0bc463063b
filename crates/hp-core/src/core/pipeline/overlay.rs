//! The base layer's own `site-packages`, seen from the dependency stage.
//!
//! Distributions the base image ships are staged as bare `.dist-info`
//! metadata so the sync plan accounts for them. Anything the sync then
//! removes or replaces is hidden with OCI whiteouts in the dependency layer,
//! so the image ends up with exactly one `.dist-info` per distribution.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::json;
use tar::Archive;
use tracing::debug;

use crate::core::env::{normalize_lexically, record_paths, SitePackages};
use crate::core::tooling::errors::{codes, hp_error};

/// Installer tooling the base image provides and the lock usually omits.
pub(crate) const PRESERVED: &[&str] = &["pip", "setuptools", "wheel"];

const WHITEOUT_PREFIX: &str = ".wh.";

/// A distribution found in the base layer, staged under the build rootfs.
#[derive(Debug)]
pub(crate) struct BaseDist {
    dist_info: PathBuf,
    record: Vec<String>,
}

/// Copies `METADATA` and `RECORD` of every `.dist-info` directly under
/// `site_rel` from the base layer tar into `rootfs`.
pub(crate) fn stage_base_metadata(
    layer: &Path,
    rootfs: &Path,
    site_rel: &Path,
) -> Result<Vec<BaseDist>> {
    let file = File::open(layer)
        .with_context(|| format!("failed to open base layer {}", layer.display()))?;
    let mut archive = Archive::new(file);
    let entries = archive
        .entries()
        .map_err(|err| unreadable_layer(layer, &err))?;

    let mut staged = BTreeSet::new();
    for entry in entries {
        let mut entry = entry.map_err(|err| unreadable_layer(layer, &err))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = match entry.path() {
            Ok(path) => layer_relative(&path),
            Err(err) => return Err(unreadable_layer(layer, &err)),
        };
        let Some(path) = path else {
            continue;
        };
        let Some(dist_info) = base_dist_info(&path, site_rel) else {
            continue;
        };
        let mut contents = Vec::new();
        entry
            .read_to_end(&mut contents)
            .map_err(|err| unreadable_layer(layer, &err))?;
        let dest = rootfs.join(&path);
        fs::create_dir_all(rootfs.join(&dist_info))
            .with_context(|| format!("failed to stage {}", dist_info.display()))?;
        fs::write(&dest, contents).with_context(|| format!("failed to stage {}", dest.display()))?;
        staged.insert(rootfs.join(dist_info));
    }

    let mut dists = Vec::with_capacity(staged.len());
    for dist_info in staged {
        let record = match fs::read_to_string(dist_info.join("RECORD")) {
            Ok(text) => record_paths(&text),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read {}", dist_info.display()))
            }
        };
        dists.push(BaseDist { dist_info, record });
    }
    debug!(layer = %layer.display(), dists = dists.len(), "base distributions staged");
    Ok(dists)
}

/// Leaves the staged rootfs holding only what the dependency layer must add
/// on top of the base layer. Returns the number of whiteouts written.
pub(crate) fn mask_base_dists(
    rootfs: &Path,
    env: &SitePackages,
    dists: &[BaseDist],
) -> Result<usize> {
    let mut whiteouts = 0;
    for dist in dists {
        if dist.dist_info.is_dir() {
            // Kept as is; the base layer already carries these files.
            for name in ["METADATA", "RECORD"] {
                remove_staged(&dist.dist_info.join(name))?;
            }
            if fs::read_dir(&dist.dist_info).is_ok_and(|mut rest| rest.next().is_none()) {
                fs::remove_dir(&dist.dist_info)
                    .with_context(|| format!("failed to remove {}", dist.dist_info.display()))?;
            }
            continue;
        }
        for entry in &dist.record {
            let path = normalize_lexically(&env.root().join(entry));
            if !path.starts_with(rootfs)
                || path == rootfs
                || path.starts_with(&dist.dist_info)
                || fs::symlink_metadata(&path).is_ok()
            {
                continue;
            }
            write_whiteout(&path)?;
            whiteouts += 1;
        }
        write_whiteout(&dist.dist_info)?;
        whiteouts += 1;
        debug!(dist_info = %dist.dist_info.display(), "base distribution masked");
    }
    Ok(whiteouts)
}

fn write_whiteout(path: &Path) -> Result<()> {
    let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
        return Ok(());
    };
    let marker = parent.join(format!("{WHITEOUT_PREFIX}{}", name.to_string_lossy()));
    fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    fs::write(&marker, b"").with_context(|| format!("failed to write {}", marker.display()))
}

fn remove_staged(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("failed to remove {}", path.display())),
    }
}

/// `./usr/lib/x` and `/usr/lib/x` both mean `usr/lib/x`; `..` is refused.
fn layer_relative(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir | Component::Prefix(_) => return None,
        }
    }
    Some(out)
}

/// `<site>/<name>.dist-info` when `path` is its `METADATA` or `RECORD`.
fn base_dist_info(path: &Path, site_rel: &Path) -> Option<PathBuf> {
    let rest = path.strip_prefix(site_rel).ok()?;
    let mut parts = rest.components();
    let (Some(Component::Normal(dir)), Some(Component::Normal(file)), None) =
        (parts.next(), parts.next(), parts.next())
    else {
        return None;
    };
    let is_dist_info = Path::new(dir)
        .extension()
        .is_some_and(|ext| ext == "dist-info");
    (is_dist_info && (file == "METADATA" || file == "RECORD")).then(|| site_rel.join(dir))
}

fn unreadable_layer(layer: &Path, err: &io::Error) -> anyhow::Error {
    hp_error(
        codes::BASE_LAYER,
        "base layer is not a readable tar archive",
        json!({
            "reason": "base_layer_unreadable",
            "path": layer.display().to_string(),
            "error": err.to_string(),
        }),
    )
    .into()
}
