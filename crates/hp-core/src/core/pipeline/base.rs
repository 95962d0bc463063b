//! The base stage: the pinned base image with its OS packages refreshed,
//! flattened into a single layer by a container backend.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde_json::{json, Value};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::layers::LayerBlob;
use crate::core::runtime::process::{run_command, RunOutput};
use crate::core::store::compute_sha256;
use crate::core::tooling::errors::{codes, hp_error};
use crate::core::tooling::outcome::InstallUserError;

/// What the base stage needs to know.
#[derive(Clone, Debug)]
pub struct BaseLayerRequest<'a> {
    pub image: &'a str,
    pub platform: &'a str,
    pub commands: &'a [String],
    /// `docker`, `podman`, or a path; discovered when unset.
    pub backend: Option<&'a str>,
}

impl BaseLayerRequest<'_> {
    /// The update commands as one non-interactive shell script.
    #[must_use]
    pub fn script(&self) -> String {
        let mut parts = vec!["export DEBIAN_FRONTEND=noninteractive".to_string()];
        if self.commands.is_empty() {
            parts.push("true".to_string());
        } else {
            parts.extend(self.commands.iter().map(|c| c.trim().to_string()));
        }
        parts.join(" && ")
    }
}

/// Produces the base layer into `blobs`.
pub trait BaseLayerProvider: Send + Sync {
    fn base_layer(&self, request: &BaseLayerRequest<'_>, blobs: &Path) -> Result<LayerBlob>;
}

/// Drives `docker`/`podman`: create, start, wait, export, remove.
#[derive(Clone, Copy, Debug, Default)]
pub struct ContainerBaseLayers;

impl BaseLayerProvider for ContainerBaseLayers {
    fn base_layer(&self, request: &BaseLayerRequest<'_>, blobs: &Path) -> Result<LayerBlob> {
        let backend = detect_backend(request.backend)?;
        info!(
            image = request.image,
            backend = %backend.display(),
            "refreshing base image"
        );
        std::fs::create_dir_all(blobs)?;

        let create = backend_call(
            &backend,
            blobs,
            &[
                "create",
                "--platform",
                request.platform,
                request.image,
                "/bin/sh",
                "-c",
                &request.script(),
            ],
            "failed to create the base container",
        )?;
        let id = create
            .stdout
            .lines()
            .map(str::trim)
            .rev()
            .find(|line| !line.is_empty())
            .map(ToString::to_string)
            .ok_or_else(|| {
                base_error(
                    "failed to create the base container",
                    json!({
                        "reason": "missing_container_id",
                        "image": request.image,
                        "stdout": create.stdout,
                    }),
                )
            })?;
        debug!(container = %id, "created");

        let result = update_and_export(&backend, blobs, request, &id);
        if let Err(err) = run_command(&backend, &args(&["rm", "-f", &id]), &[], blobs) {
            debug!(container = %id, error = %err, "container cleanup failed");
        }
        result
    }
}

fn update_and_export(
    backend: &Path,
    blobs: &Path,
    request: &BaseLayerRequest<'_>,
    id: &str,
) -> Result<LayerBlob> {
    backend_call(backend, blobs, &["start", id], "failed to start the base container")?;
    let wait = backend_call(backend, blobs, &["wait", id], "failed to wait for the base container")?;
    let status = wait.stdout.trim().lines().next_back().unwrap_or_default().trim();
    if status != "0" {
        let logs = run_command(backend, &args(&["logs", id]), &[], blobs)
            .map(|out| tail(&format!("{}{}", out.stdout, out.stderr)))
            .unwrap_or_default();
        return Err(base_error(
            "OS update failed in the base image",
            json!({
                "reason": "update_failed",
                "image": request.image,
                "exit_code": status,
                "commands": request.commands,
                "issues": [logs],
                "hint": "Check the [base] update commands against the base image's package manager.",
            }),
        )
        .into());
    }

    let temp = NamedTempFile::new_in(blobs)?;
    let target = temp.path().display().to_string();
    backend_call(
        backend,
        blobs,
        &["export", "-o", &target, id],
        "failed to export the base filesystem",
    )?;
    let digest = compute_sha256(temp.path())?;
    let size = temp.as_file().metadata()?.len();
    let path = blobs.join(&digest);
    if let Err(err) = temp.persist_noclobber(&path) {
        if err.error.kind() != io::ErrorKind::AlreadyExists {
            return Err(base_error(
                "failed to store the base layer",
                json!({
                    "reason": "layer_write_failed",
                    "path": path.display().to_string(),
                    "error": err.error.to_string(),
                }),
            )
            .into());
        }
    }
    info!(digest = %digest, size, "base layer ready");
    Ok(LayerBlob { digest, size })
}

fn detect_backend(configured: Option<&str>) -> Result<PathBuf, InstallUserError> {
    if let Some(raw) = configured {
        return resolve_program(raw).ok_or_else(|| {
            base_error(
                "container backend unavailable",
                json!({
                    "reason": "backend_not_found",
                    "backend": raw,
                    "hint": "HP_CONTAINER_BACKEND must name docker, podman, or an executable path",
                }),
            )
        });
    }
    ["docker", "podman"]
        .into_iter()
        .find_map(resolve_program)
        .ok_or_else(|| {
            base_error(
                "container backend unavailable",
                json!({
                    "reason": "backend_unavailable",
                    "candidates": ["docker", "podman"],
                    "hint": "install docker or podman, or set HP_CONTAINER_BACKEND",
                }),
            )
        })
}

fn resolve_program(name: &str) -> Option<PathBuf> {
    let candidate = if name.contains('/') || name.contains(std::path::MAIN_SEPARATOR) {
        PathBuf::from(name)
    } else {
        which::which(name).ok()?
    };
    candidate.is_file().then_some(candidate)
}

fn backend_call(
    backend: &Path,
    cwd: &Path,
    argv: &[&str],
    message: &str,
) -> Result<RunOutput> {
    let output = run_command(backend, &args(argv), &[], cwd)?;
    if output.success() {
        return Ok(output);
    }
    Err(base_error(
        message,
        json!({
            "reason": "backend_failed",
            "command": argv.first().copied().unwrap_or_default(),
            "exit_code": output.code,
            "issues": [tail(&output.stderr)],
        }),
    )
    .into())
}

fn args(argv: &[&str]) -> Vec<String> {
    argv.iter().map(ToString::to_string).collect()
}

fn tail(text: &str) -> String {
    let lines: Vec<&str> = text.trim_end().lines().collect();
    lines[lines.len().saturating_sub(20)..].join("\n")
}

fn base_error(message: &str, details: Value) -> InstallUserError {
    hp_error(codes::BASE_LAYER, message, details)
}
