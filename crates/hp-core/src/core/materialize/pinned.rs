use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::Result;
use hp_domain::{
    check_lock_closure, DependencyMode, LockGraph, LockManifest, ManifestError, PackageSource,
    TargetEnvironment,
};
use serde_json::json;
use tracing::info;

use super::{MaterializeInputs, Materializer, PreparedLock};
use crate::core::tooling::errors::{codes, hp_error, manifest_error, resolve_error};

/// Installs exactly what the committed lock lists; nothing is resolved.
pub(crate) struct PinnedInstall;

impl Materializer for PinnedInstall {
    fn mode(&self) -> DependencyMode {
        DependencyMode::Pinned
    }

    fn allow_yanked(&self) -> bool {
        true
    }

    fn prepare(&self, inputs: &MaterializeInputs<'_>) -> Result<PreparedLock> {
        let path = inputs.lock_path();
        let (lock, text, graph) = load_closed_lock(&path, inputs.source, inputs.target)?;
        info!(lock = %path.display(), pins = lock.pins.len(), "lock is pinned and closed");
        Ok(PreparedLock {
            lock,
            text,
            path,
            changed: false,
            edges: graph.edges,
            files: BTreeMap::new(),
        })
    }
}

/// Parses the lock at `path`, requiring exact pins and a closed dependency
/// set for `target`.
pub(crate) fn load_closed_lock(
    path: &Path,
    source: &dyn PackageSource,
    target: &TargetEnvironment,
) -> Result<(LockManifest, String, LockGraph)> {
    let text = fs::read_to_string(path).map_err(|err| {
        manifest_error(&ManifestError::Io {
            path: path.to_path_buf(),
            source: err,
        })
    })?;
    let label = path
        .file_name()
        .map_or_else(|| path.display().to_string(), |name| name.to_string_lossy().to_string());
    let lock = LockManifest::parse(&text, &label).map_err(|err| manifest_error(&err))?;
    let graph = check_lock_closure(&lock, source, target).map_err(|err| resolve_error(&err))?;
    if !graph.is_closed() {
        return Err(hp_error(
            codes::MANIFEST,
            format!("{label} is not closed over its dependencies"),
            json!({
                "reason": "lock_not_closed",
                "lock": path.display().to_string(),
                "issues": graph.gaps.iter().map(|gap| gap.describe()).collect::<Vec<_>>(),
                "gaps": graph.gaps,
                "hint": "Pin the missing dependencies, or switch to compile mode and run `hp compile`.",
            }),
        )
        .into());
    }
    Ok((lock, text, graph))
}
