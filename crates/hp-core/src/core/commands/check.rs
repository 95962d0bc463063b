use anyhow::Result;
use hp_domain::DependencyMode;
use serde_json::json;
use tracing::info;

use super::LoadedRecipe;
use crate::core::config::context::CommandContext;
use crate::core::materialize::load_closed_lock;
use crate::core::tooling::errors::{codes, hp_error};
use crate::core::tooling::outcome::ExecutionOutcome;

/// Validates the recipe, the lock (exact pins, closed) and the payload
/// directory. Nothing is downloaded or installed.
///
/// # Errors
/// Returns an error describing the first invalid input.
pub fn recipe_check(ctx: &CommandContext) -> Result<ExecutionOutcome> {
    let loaded = LoadedRecipe::load(ctx)?;
    let recipe = &loaded.recipe;
    let target = loaded.target()?;
    let source = loaded.source(ctx)?;
    let lock_path = loaded.context.join(&recipe.dependencies.lock);
    if recipe.dependencies.mode == DependencyMode::Compile && !lock_path.exists() {
        return Err(hp_error(
            codes::MANIFEST,
            format!("{} has not been compiled yet", lock_path.display()),
            json!({
                "reason": "missing_lock",
                "path": lock_path.display().to_string(),
                "hint": "Run `hp compile` to write the lock.",
            }),
        )
        .into());
    }
    let (lock, _, graph) = load_closed_lock(&lock_path, &source, &target)?;
    info!(pins = lock.pins.len(), edges = graph.edges.len(), "lock is closed");

    let payload = loaded.context.join(&recipe.payload.source);
    if !payload.is_dir() {
        return Err(hp_error(
            codes::PAYLOAD,
            "application payload is missing",
            json!({
                "reason": "payload_missing",
                "path": payload.display().to_string(),
                "hint": "Point [payload] source at the application directory in the build context.",
            }),
        )
        .into());
    }

    Ok(ExecutionOutcome::success(
        format!("{} is ready to build", recipe.image_ref()),
        json!({
            "recipe": loaded.path.display().to_string(),
            "image": recipe.image_ref(),
            "base": recipe.image.base,
            "mode": recipe.dependencies.mode,
            "lock": lock_path.display().to_string(),
            "pins": lock.pins.len(),
            "python": target.python_version(),
            "platform": recipe.image.platform,
            "workdir": recipe.workdir(),
            "cmd": recipe.entrypoint_command(),
        }),
    ))
}
