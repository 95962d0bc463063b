use std::path::PathBuf;

use anyhow::Result;
use hp_domain::DependencyMode;

use super::LoadedRecipe;
use crate::core::config::context::CommandContext;
use crate::core::env::SitePackages;
use crate::core::materialize::{materialize, materializer_for};
use crate::core::tooling::outcome::ExecutionOutcome;

#[derive(Clone, Debug)]
pub struct SyncRequest {
    /// The `site-packages` directory to reconcile.
    pub target: PathBuf,
    pub dry_run: bool,
}

/// Reconciles `target` with the lock, compiling it first in compile mode.
///
/// # Errors
/// Returns an error if the lock cannot be prepared or a package cannot be
/// installed or removed.
pub fn deps_sync(ctx: &CommandContext, request: &SyncRequest) -> Result<ExecutionOutcome> {
    let loaded = LoadedRecipe::load(ctx)?;
    let mode = loaded.recipe.dependencies.mode;
    reconcile(ctx, &loaded, mode, request)
}

/// Pinned-install against `target`, whatever mode the recipe selects.
///
/// # Errors
/// Returns an error if the lock is loose or open, or a package cannot be
/// installed or removed.
pub fn deps_install(ctx: &CommandContext, request: &SyncRequest) -> Result<ExecutionOutcome> {
    let loaded = LoadedRecipe::load(ctx)?;
    reconcile(ctx, &loaded, DependencyMode::Pinned, request)
}

fn reconcile(
    ctx: &CommandContext,
    loaded: &LoadedRecipe,
    mode: DependencyMode,
    request: &SyncRequest,
) -> Result<ExecutionOutcome> {
    let target = loaded.target()?;
    let source = loaded.source(ctx)?;
    let inputs = loaded.inputs(ctx, &target, &source, request.dry_run);
    let env = SitePackages::target_dir(&request.target);
    let materializer = materializer_for(mode);
    let report = materialize(materializer.as_ref(), &inputs, &env)?;
    let mut details = serde_json::to_value(&report)?;
    details["target"] = serde_json::Value::String(request.target.display().to_string());
    Ok(ExecutionOutcome::success(report.summary(), details))
}
