use std::path::PathBuf;

use anyhow::Result;
use serde_json::json;

use super::LoadedRecipe;
use crate::core::config::context::CommandContext;
use crate::core::pipeline::{default_out, run_build, BuildInputs};
use crate::core::tooling::errors::recipe_error;
use crate::core::tooling::outcome::ExecutionOutcome;

#[derive(Clone, Debug, Default)]
pub struct BuildRequest {
    /// Directory for the OCI layout, or a `.tar` path.
    pub out: Option<PathBuf>,
    /// `name:tag` (or just `name`) replacing the recipe's.
    pub tag: Option<String>,
}

/// Runs the whole pipeline and writes the image.
///
/// # Errors
/// Returns an error from the first stage that fails; no image is written in
/// that case.
pub fn image_build(ctx: &CommandContext, request: &BuildRequest) -> Result<ExecutionOutcome> {
    let mut loaded = LoadedRecipe::load(ctx)?;
    if let Some(tag) = request.tag.as_deref() {
        apply_tag(&mut loaded, tag);
        loaded.recipe.validate().map_err(|err| recipe_error(&err))?;
    }
    let source = loaded.source(ctx)?;
    let out = request
        .out
        .clone()
        .unwrap_or_else(|| default_out(&loaded.recipe, &loaded.context));
    let config = ctx.config();
    let report = run_build(&BuildInputs {
        recipe: &loaded.recipe,
        context: &loaded.context,
        source: &source,
        cache_root: &ctx.cache().path,
        online: ctx.is_online(),
        base_layers: ctx.effects().base_layers(),
        backend: config.backend().container.as_deref(),
        source_date_epoch: config.build().source_date_epoch,
        out: &out,
    })?;
    let message = format!("built {} ({})", report.image, report.manifest_digest);
    let mut details = serde_json::to_value(&report)?;
    details["recipe"] = json!(loaded.path.display().to_string());
    Ok(ExecutionOutcome::success(message, details))
}

/// `name:tag` splits at the last colon after the last slash, so registry
/// ports stay part of the name.
fn apply_tag(loaded: &mut LoadedRecipe, value: &str) {
    let value = value.trim();
    let slash = value.rfind('/').map_or(0, |idx| idx + 1);
    match value[slash..].rfind(':') {
        Some(idx) => {
            let split = slash + idx;
            loaded.recipe.image.name = value[..split].to_string();
            loaded.recipe.image.tag = value[split + 1..].to_string();
        }
        None => loaded.recipe.image.name = value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hp_domain::Recipe;

    fn loaded() -> LoadedRecipe {
        LoadedRecipe {
            recipe: Recipe::default(),
            path: PathBuf::from("/ctx/hp.toml"),
            context: PathBuf::from("/ctx"),
        }
    }

    #[test]
    fn tag_override_keeps_registry_port_in_name() {
        let mut recipe = loaded();
        apply_tag(&mut recipe, "localhost:5000/hpath-sim:2.1");
        assert_eq!(recipe.recipe.image.name, "localhost:5000/hpath-sim");
        assert_eq!(recipe.recipe.image.tag, "2.1");

        let mut recipe = loaded();
        apply_tag(&mut recipe, "sim");
        assert_eq!(recipe.recipe.image.name, "sim");
        assert_eq!(recipe.recipe.image.tag, "latest");
    }
}
