use anyhow::Result;
use serde_json::json;

use super::LoadedRecipe;
use crate::core::config::context::CommandContext;
use crate::core::materialize::compile_lock;
use crate::core::tooling::outcome::ExecutionOutcome;

#[derive(Clone, Debug, Default)]
pub struct CompileRequest {
    pub dry_run: bool,
    pub generate_hashes: bool,
}

/// Resolves the loose manifest and writes the lock manifest.
///
/// # Errors
/// Returns an error if the recipe or manifest is invalid, resolution fails,
/// or the lock cannot be written.
pub fn deps_compile(ctx: &CommandContext, request: &CompileRequest) -> Result<ExecutionOutcome> {
    let loaded = LoadedRecipe::load(ctx)?;
    let target = loaded.target()?;
    let source = loaded.source(ctx)?;
    let inputs = loaded.inputs(ctx, &target, &source, request.dry_run);
    let generate_hashes =
        request.generate_hashes || loaded.recipe.dependencies.generate_hashes;
    let prepared = compile_lock(&inputs, generate_hashes)?;

    let lock = prepared.path.display().to_string();
    let pins = prepared.lock.pins.len();
    let message = match (prepared.changed, request.dry_run) {
        (false, _) => format!("{lock} is up to date ({pins} pins)"),
        (true, true) => format!("would write {lock} ({pins} pins)"),
        (true, false) => format!("wrote {lock} ({pins} pins)"),
    };
    let pinned: Vec<String> = prepared
        .lock
        .pins
        .iter()
        .map(|pin| format!("{}=={}", pin.name, pin.version))
        .collect();
    let mut details = json!({
        "lock": lock,
        "input": inputs.input_path().display().to_string(),
        "pins": pinned,
        "changed": prepared.changed,
        "sha256": prepared.sha256(),
        "python": target.python_version(),
        "platform": loaded.recipe.image.platform,
        "dry_run": request.dry_run,
    });
    if request.dry_run && prepared.changed {
        details["lockfile"] = json!(prepared.text);
    }
    Ok(ExecutionOutcome::success(message, details))
}
