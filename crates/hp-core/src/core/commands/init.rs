use anyhow::Result;
use hp_domain::{DependencyMode, Recipe};
use serde_json::json;
use tracing::info;

use crate::core::config::context::CommandContext;
use crate::core::tooling::errors::{codes, hp_error};
use crate::core::tooling::outcome::ExecutionOutcome;

#[derive(Clone, Debug, Default)]
pub struct InitRequest {
    pub mode: Option<DependencyMode>,
    pub force: bool,
}

/// Writes a default `hp.toml`.
///
/// # Errors
/// Returns an error if the recipe already exists (without `force`) or cannot
/// be written.
pub fn recipe_init(ctx: &CommandContext, request: &InitRequest) -> Result<ExecutionOutcome> {
    let path = ctx.recipe_path()?;
    let existed = path.exists();
    if existed && !request.force {
        return Err(hp_error(
            codes::RECIPE,
            format!("{} already exists", path.display()),
            json!({
                "reason": "recipe_exists",
                "path": path.display().to_string(),
                "hint": "Pass --force to overwrite it.",
            }),
        )
        .into());
    }
    let mode = request.mode.unwrap_or_default();
    ctx.fs()
        .write(&path, Recipe::render_default(mode).as_bytes())?;
    info!(path = %path.display(), mode = %mode, "wrote recipe");
    Ok(ExecutionOutcome::success(
        format!("wrote {} ({mode} mode)", path.display()),
        json!({
            "path": path.display().to_string(),
            "mode": mode,
            "overwritten": existed,
        }),
    ))
}
