use std::path::PathBuf;

use anyhow::Result;
use hp_domain::{render_dockerfile, DependencyMode};
use serde_json::json;

use super::LoadedRecipe;
use crate::core::config::context::CommandContext;
use crate::core::tooling::outcome::ExecutionOutcome;

#[derive(Clone, Debug, Default)]
pub struct RenderRequest {
    /// Overrides `dependencies.mode`.
    pub mode: Option<DependencyMode>,
    pub out: Option<PathBuf>,
}

/// Renders the Dockerfile equivalent of the recipe.
///
/// # Errors
/// Returns an error if the recipe is invalid or `out` cannot be written.
pub fn recipe_render(ctx: &CommandContext, request: &RenderRequest) -> Result<ExecutionOutcome> {
    let mut loaded = LoadedRecipe::load(ctx)?;
    if let Some(mode) = request.mode {
        loaded.recipe.dependencies.mode = mode;
    }
    let mode = loaded.recipe.dependencies.mode;
    let dockerfile = render_dockerfile(&loaded.recipe);
    match &request.out {
        Some(out) => {
            ctx.fs().write(out, dockerfile.as_bytes())?;
            Ok(ExecutionOutcome::success(
                format!("wrote {} ({mode} mode)", out.display()),
                json!({
                    "path": out.display().to_string(),
                    "mode": mode,
                }),
            ))
        }
        None => Ok(ExecutionOutcome::success(
            dockerfile.clone(),
            json!({
                "mode": mode,
                "dockerfile": dockerfile,
                "passthrough": true,
            }),
        )),
    }
}
