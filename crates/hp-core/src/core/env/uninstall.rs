use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{debug, warn};

use super::record;
use super::{normalize_lexically, InstalledDist, SitePackages};
use crate::core::tooling::errors::{codes, hp_error};

/// Removes every file listed in the distribution's `RECORD`, its
/// `.dist-info` directory, and any directories left empty. Returns the
/// number of files removed.
pub(crate) fn uninstall(env: &SitePackages, dist: &InstalledDist) -> Result<usize> {
    let record_path = dist.dist_info.join("RECORD");
    let text = match fs::read_to_string(&record_path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(hp_error(
                codes::INSTALL,
                format!("cannot uninstall {} {}", dist.name, dist.version),
                json!({
                    "reason": "missing_record",
                    "package": dist.name,
                    "version": dist.version,
                    "path": record_path.display().to_string(),
                    "hint": "the distribution was not installed by a RECORD-writing installer",
                }),
            )
            .into());
        }
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", record_path.display()))
        }
    };

    let mut removed = 0;
    let mut parents = BTreeSet::new();
    for entry in record::parse_paths(&text) {
        let path = normalize_lexically(&env.root().join(&entry));
        if !env.owns(&path) {
            warn!(path = %path.display(), "RECORD entry outside the environment, leaving it");
            continue;
        }
        if path.starts_with(&dist.dist_info) {
            continue;
        }
        if remove_file(&path)? {
            removed += 1;
            remove_bytecode(&path)?;
        }
        if let Some(parent) = path.parent() {
            parents.insert(parent.to_path_buf());
        }
    }

    fs::remove_dir_all(&dist.dist_info)
        .with_context(|| format!("failed to remove {}", dist.dist_info.display()))?;

    // Deepest first so nested empty directories collapse.
    for dir in parents.iter().rev() {
        prune_empty(env, dir);
    }
    debug!(name = %dist.name, version = %dist.version, removed, "uninstalled");
    Ok(removed)
}

fn remove_file(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err).with_context(|| format!("failed to remove {}", path.display())),
    }
}

/// `foo.py` leaves `__pycache__/foo.cpython-311.pyc` and friends behind.
fn remove_bytecode(path: &Path) -> Result<()> {
    if !path.extension().is_some_and(|ext| ext == "py") {
        return Ok(());
    }
    let (Some(parent), Some(stem)) = (path.parent(), path.file_stem()) else {
        return Ok(());
    };
    let cache = parent.join("__pycache__");
    let Ok(entries) = fs::read_dir(&cache) else {
        return Ok(());
    };
    let prefix = format!("{}.", stem.to_string_lossy());
    let stale: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|candidate| {
            candidate.extension().is_some_and(|ext| ext == "pyc")
                && candidate
                    .file_name()
                    .is_some_and(|name| name.to_string_lossy().starts_with(&prefix))
        })
        .collect();
    for pyc in stale {
        remove_file(&pyc)?;
    }
    prune_dir(&cache);
    Ok(())
}

fn prune_empty(env: &SitePackages, dir: &Path) {
    let stops = [env.root(), env.scripts(), env.data()];
    let mut current = Some(dir);
    while let Some(dir) = current {
        if stops.contains(&dir) || !env.owns(dir) || !prune_dir(dir) {
            break;
        }
        current = dir.parent();
    }
}

fn prune_dir(dir: &Path) -> bool {
    fs::read_dir(dir).is_ok_and(|mut entries| entries.next().is_none())
        && fs::remove_dir(dir).is_ok()
}
