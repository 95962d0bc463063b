use hp_domain::{ManifestError, RecipeError, ResolveError};
use serde_json::{json, Value};

use crate::core::config::context::CommandInfo;
use crate::core::tooling::outcome::{CommandStatus, ExecutionOutcome, InstallUserError};

/// Stable error codes attached to user-facing failures.
pub mod codes {
    pub const RECIPE: &str = "HP100";
    pub const MANIFEST: &str = "HP200";
    pub const RESOLUTION: &str = "HP300";
    pub const INSTALL: &str = "HP400";
    pub const PAYLOAD: &str = "HP500";
    pub const BASE_LAYER: &str = "HP600";
    pub const IMAGE: &str = "HP700";
}

/// Builds an [`InstallUserError`] whose details carry `code`.
pub(crate) fn hp_error(code: &str, message: impl Into<String>, details: Value) -> InstallUserError {
    let mut merged = details;
    match merged {
        Value::Object(ref mut map) => {
            map.insert("code".into(), Value::String(code.to_string()));
        }
        _ => {
            merged = json!({
                "code": code,
                "details": merged,
            });
        }
    }
    InstallUserError::new(message, merged)
}

pub(crate) fn recipe_error(err: &RecipeError) -> InstallUserError {
    let (reason, hint) = match err {
        RecipeError::Io { .. } => ("missing_recipe", "Run `hp init` to write a default hp.toml."),
        RecipeError::Parse { .. } => ("invalid_recipe", "Fix the TOML syntax or unknown keys."),
        RecipeError::Invalid { .. } => ("invalid_recipe", "Correct the named field in hp.toml."),
    };
    let mut details = json!({
        "reason": reason,
        "issues": [err.to_string()],
        "hint": hint,
    });
    if let RecipeError::Invalid { field, .. } = err {
        details["field"] = Value::String(field.clone());
    }
    hp_error(codes::RECIPE, "recipe is invalid", details)
}

pub(crate) fn manifest_error(err: &ManifestError) -> InstallUserError {
    let reason = match err {
        ManifestError::Io { .. } => "missing_manifest",
        ManifestError::NotPinned { .. } => "not_pinned",
        ManifestError::IncludeCycle { .. } => "include_cycle",
        _ => "invalid_manifest",
    };
    let mut details = json!({
        "reason": reason,
        "issues": [err.to_string()],
    });
    if let Some(origin) = err.origin() {
        details["origin"] = Value::String(origin.to_string());
    }
    if matches!(err, ManifestError::NotPinned { .. }) {
        details["hint"] = json!("Regenerate the lock with `hp compile`, or pin with `==`.");
    }
    hp_error(codes::MANIFEST, "dependency manifest is invalid", details)
}

pub(crate) fn resolve_error(err: &ResolveError) -> InstallUserError {
    let (reason, message) = match err {
        ResolveError::Conflict { .. } => ("conflict", "dependencies cannot be resolved"),
        ResolveError::NotFound(_) => ("not_found", "package not found"),
        ResolveError::Fetch { .. } => ("fetch_failed", "package index request failed"),
        ResolveError::InvalidRequirement { .. } => ("invalid_requirement", "invalid requirement"),
        ResolveError::TooComplex(_) => ("too_complex", "dependency resolution gave up"),
    };
    let mut details = json!({
        "reason": reason,
        "issues": [err.to_string()],
    });
    match err {
        ResolveError::Conflict {
            package,
            requirements,
        } => {
            details["package"] = json!(package);
            details["requirements"] = json!(requirements);
            details["hint"] = json!("Relax one of the conflicting requirements.");
        }
        ResolveError::Fetch { package, .. } => {
            details["package"] = json!(package);
            details["hint"] = json!("Check the index URL and network access (HP_ONLINE).");
        }
        ResolveError::NotFound(package) => {
            details["package"] = json!(package);
        }
        _ => {}
    }
    hp_error(codes::RESOLUTION, message, details)
}

#[must_use]
pub fn to_json_response(info: CommandInfo, outcome: &ExecutionOutcome) -> Value {
    let status = match outcome.status {
        CommandStatus::Ok => "ok",
        CommandStatus::UserError => "user-error",
        CommandStatus::Failure => "error",
    };
    let details = match &outcome.details {
        Value::Object(_) => outcome.details.clone(),
        Value::Null => json!({}),
        other => json!({ "value": other }),
    };
    json!({
        "status": status,
        "message": format_status_message(info, &outcome.message),
        "details": details,
    })
}

#[must_use]
pub fn format_status_message(info: CommandInfo, message: &str) -> String {
    let prefix = format!("hp {}", info.name);
    if message.is_empty() {
        prefix
    } else if message.starts_with(&prefix) {
        message.to_string()
    } else {
        format!("{prefix}: {message}")
    }
}
