use atty::Stream;
use color_eyre::Result;
use hp_core::{CommandInfo, CommandStatus, ExecutionOutcome};
use serde_json::Value;

use crate::style::Style;

#[derive(Clone, Copy, Debug)]
pub struct OutputOptions {
    pub quiet: bool,
    pub json: bool,
    pub no_color: bool,
}

pub fn emit_output(
    opts: &OutputOptions,
    info: CommandInfo,
    outcome: &ExecutionOutcome,
) -> Result<i32> {
    let code = outcome.exit_code();
    let style = Style::new(opts.no_color, atty::is(Stream::Stdout));

    if opts.json {
        let payload = hp_core::to_json_response(info, outcome);
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(code);
    }

    if let CommandStatus::Ok = outcome.status {
        if opts.quiet {
            return Ok(code);
        }
        if is_passthrough(&outcome.details) {
            print!("{}", outcome.message);
            return Ok(code);
        }
        let message = hp_core::format_status_message(info, &outcome.message);
        println!("{}", style.status(&outcome.status, &message));
        for line in summary_lines(&outcome.details) {
            println!("{}", style.info(&line));
        }
        if let Some(hint) = hint_from_details(&outcome.details) {
            println!("{}", style.info(&format!("Tip: {hint}")));
        }
        return Ok(code);
    }

    let header = format!("{}  {}", error_code(info, &outcome.details), outcome.message);
    eprintln!("{}", style.error_header(&header));
    if opts.quiet {
        return Ok(code);
    }
    eprintln!();
    eprintln!("Why:");
    for reason in collect_why_bullets(&outcome.details, &outcome.message) {
        eprintln!("  • {reason}");
    }
    let fixes = collect_fix_bullets(&outcome.details);
    if !fixes.is_empty() {
        eprintln!();
        eprintln!("Fix:");
        for fix in fixes {
            eprintln!("{}", style.fix_bullet(&format!("  • {fix}")));
        }
    }
    Ok(code)
}

fn hint_from_details(details: &Value) -> Option<&str> {
    details
        .as_object()
        .and_then(|map| map.get("hint"))
        .and_then(Value::as_str)
}

fn is_passthrough(details: &Value) -> bool {
    details
        .as_object()
        .and_then(|map| map.get("passthrough"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Per-stage digests for `hp build`, plan actions for `hp sync`/`hp install`.
fn summary_lines(details: &Value) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(layers) = details.get("layers").and_then(Value::as_array) {
        for layer in layers {
            let stage = layer.get("stage").and_then(Value::as_str).unwrap_or("layer");
            let digest = layer.get("digest").and_then(Value::as_str).unwrap_or_default();
            let size = layer.get("size").and_then(Value::as_u64).unwrap_or_default();
            let short = digest.get(..12).unwrap_or(digest);
            lines.push(format!("  {stage:<13} sha256:{short}  {size} bytes"));
        }
        if let Some(out) = details.get("out").and_then(Value::as_str) {
            lines.push(format!("  written to {out}"));
        }
    }
    if let Some(actions) = details
        .get("plan")
        .and_then(|plan| plan.get("actions"))
        .and_then(Value::as_array)
    {
        for action in actions {
            if let Some(line) = describe_action(action) {
                lines.push(format!("  {line}"));
            }
        }
    }
    lines
}

fn describe_action(action: &Value) -> Option<String> {
    let name = action.get("name")?.as_str()?;
    let field = |key: &str| action.get(key).and_then(Value::as_str).unwrap_or("?");
    Some(match action.get("action")?.as_str()? {
        "install" => format!("+ {name}=={}", field("version")),
        "uninstall" => format!("- {name}=={}", field("version")),
        _ => format!("~ {name} {} -> {}", field("from"), field("to")),
    })
}

fn error_code(info: CommandInfo, details: &Value) -> String {
    details
        .get("code")
        .and_then(Value::as_str)
        .map_or_else(|| format!("hp {}", info.name), ToString::to_string)
}

fn collect_why_bullets(details: &Value, fallback: &str) -> Vec<String> {
    let mut bullets = Vec::new();
    if let Some(reason) = details.get("reason").and_then(Value::as_str) {
        push_unique(
            &mut bullets,
            reason_display(reason).unwrap_or(reason).to_string(),
        );
    }
    if let Some(origin) = details.get("origin").and_then(Value::as_str) {
        push_unique(&mut bullets, format!("at {origin}"));
    }
    if let Some(issues) = details.get("issues").and_then(Value::as_array) {
        for entry in issues {
            if let Value::String(message) = entry {
                push_unique(&mut bullets, message.to_string());
            }
        }
    }
    if let Some(requirements) = details.get("requirements").and_then(Value::as_array) {
        for requirement in requirements.iter().filter_map(Value::as_str) {
            push_unique(&mut bullets, format!("requires {requirement}"));
        }
    }
    if bullets.is_empty() {
        bullets.push(fallback.to_string());
    }
    bullets
}

fn collect_fix_bullets(details: &Value) -> Vec<String> {
    let mut fixes = Vec::new();
    if let Some(hint) = hint_from_details(details) {
        push_unique(&mut fixes, hint.to_string());
    }
    if fixes.is_empty() {
        fixes.push("Re-run with --help for usage or -vv for detailed logs.".to_string());
    }
    fixes
}

fn push_unique(vec: &mut Vec<String>, text: impl Into<String>) {
    let entry = text.into();
    if entry.trim().is_empty() {
        return;
    }
    if !vec.iter().any(|existing| existing == &entry) {
        vec.push(entry);
    }
}

fn reason_display(code: &str) -> Option<&'static str> {
    match code {
        "conflict" => Some("No set of versions satisfies every requirement."),
        "not_found" => Some("A requested package does not exist on the index."),
        "fetch_failed" => Some("The package index could not be reached."),
        "not_pinned" => Some("The lock contains an entry that is not pinned with `==`."),
        "lock_not_closed" => Some("The lock is missing dependencies of packages it pins."),
        "payload_missing" => Some("The application payload directory does not exist."),
        "update_failed" => Some("The OS update commands failed inside the base image."),
        "backend_unavailable" | "backend_not_found" => {
            Some("No container backend is available to prepare the base image.")
        }
        "hash_mismatch" => Some("A downloaded wheel does not match the lock's --hash."),
        _ => None,
    }
}
