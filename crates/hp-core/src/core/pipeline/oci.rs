//! OCI image layout: config, manifest, index, and export to a directory or
//! a tarball.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde_json::{json, Value};
use tar::Builder;
use tempfile::{Builder as TempBuilder, NamedTempFile};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info};
use walkdir::WalkDir;

use super::layers::{append_tree, write_blob, LayerBlob};
use crate::core::tooling::errors::{codes, hp_error};
use crate::core::tooling::outcome::InstallUserError;

const MEDIA_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
const MEDIA_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
const MEDIA_LAYER: &str = "application/vnd.oci.image.layer.v1.tar";
pub(crate) const IMAGE_PATH: &str = "/usr/local/bin:/usr/local/sbin:/usr/sbin:/usr/bin:/sbin:/bin";

/// One line of the image history.
#[derive(Clone, Debug)]
pub(crate) struct HistoryEntry {
    pub(crate) created_by: String,
    pub(crate) empty_layer: bool,
}

impl HistoryEntry {
    pub(crate) fn layer(created_by: impl Into<String>) -> Self {
        Self {
            created_by: created_by.into(),
            empty_layer: false,
        }
    }

    pub(crate) fn metadata(created_by: impl Into<String>) -> Self {
        Self {
            created_by: created_by.into(),
            empty_layer: true,
        }
    }
}

/// Everything the config blob records besides the layers.
#[derive(Clone, Debug)]
pub(crate) struct ImageConfig {
    pub(crate) reference: String,
    pub(crate) architecture: String,
    pub(crate) working_dir: String,
    pub(crate) cmd: Vec<String>,
    pub(crate) labels: BTreeMap<String, String>,
    pub(crate) history: Vec<HistoryEntry>,
    pub(crate) created: u64,
}

#[derive(Clone, Debug)]
pub(crate) struct BuiltImage {
    pub(crate) manifest_digest: String,
    pub(crate) config_digest: String,
}

/// `amd64`/`arm64` for the machine names used in wheel tags.
pub(crate) fn oci_architecture(machine: &str) -> &str {
    match machine {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    }
}

pub(crate) fn rfc3339(epoch: u64) -> String {
    i64::try_from(epoch)
        .ok()
        .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok())
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
        .format(&Rfc3339)
        .unwrap_or_default()
}

/// Writes config, manifest, `index.json` and `oci-layout` into `layout`,
/// whose `blobs/sha256` already holds `layers`.
pub(crate) fn write_layout(
    layout: &Path,
    layers: &[LayerBlob],
    config: &ImageConfig,
) -> Result<BuiltImage> {
    let blobs = layout.join("blobs").join("sha256");
    let created = rfc3339(config.created);
    let env = vec![format!("PATH={IMAGE_PATH}"), "LANG=C.UTF-8".to_string()];
    let history: Vec<Value> = config
        .history
        .iter()
        .map(|entry| {
            let mut value = json!({
                "created": created,
                "created_by": entry.created_by,
            });
            if entry.empty_layer {
                value["empty_layer"] = json!(true);
            }
            value
        })
        .collect();
    let config_json = json!({
        "created": created,
        "architecture": config.architecture,
        "os": "linux",
        "config": {
            "Env": env,
            "Cmd": config.cmd,
            "WorkingDir": config.working_dir,
            "Labels": config.labels,
        },
        "rootfs": {
            "type": "layers",
            "diff_ids": layers.iter().map(LayerBlob::oci_digest).collect::<Vec<_>>(),
        },
        "history": history,
    });
    let config_bytes = encode(&config_json, "image config")?;
    let config_blob = write_blob(&blobs, &config_bytes)?;

    let manifest = json!({
        "schemaVersion": 2,
        "mediaType": MEDIA_MANIFEST,
        "config": {
            "mediaType": MEDIA_CONFIG,
            "digest": config_blob.oci_digest(),
            "size": config_blob.size,
        },
        "layers": layers
            .iter()
            .map(|layer| json!({
                "mediaType": MEDIA_LAYER,
                "digest": layer.oci_digest(),
                "size": layer.size,
            }))
            .collect::<Vec<_>>(),
    });
    let manifest_bytes = encode(&manifest, "image manifest")?;
    let manifest_blob = write_blob(&blobs, &manifest_bytes)?;

    let index = json!({
        "schemaVersion": 2,
        "manifests": [{
            "mediaType": MEDIA_MANIFEST,
            "digest": manifest_blob.oci_digest(),
            "size": manifest_blob.size,
            "annotations": {
                "org.opencontainers.image.ref.name": config.reference,
            },
        }],
    });
    write_file(&layout.join("index.json"), &encode(&index, "image index")?)?;
    write_file(
        &layout.join("oci-layout"),
        br#"{"imageLayoutVersion":"1.0.0"}"#,
    )?;
    debug!(manifest = %manifest_blob.oci_digest(), "layout written");
    Ok(BuiltImage {
        manifest_digest: manifest_blob.oci_digest(),
        config_digest: config_blob.oci_digest(),
    })
}

/// Moves the finished layout to `out`: a `.tar` path gets a tarball, anything
/// else a directory. An existing directory is only replaced when it already
/// holds an OCI layout.
pub(crate) fn export_layout(layout: &Path, out: &Path, mtime: u64) -> Result<()> {
    let parent = out
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    fs::create_dir_all(&parent)
        .map_err(|err| export_error("failed to prepare output directory", &parent, &err))?;

    if out.extension().is_some_and(|ext| ext == "tar") {
        let temp = NamedTempFile::new_in(&parent)
            .map_err(|err| export_error("failed to create image tarball", out, &err))?;
        let mut builder = Builder::new(temp.as_file());
        append_tree(&mut builder, layout, Path::new(""), mtime)?;
        builder
            .finish()
            .map_err(|err| export_error("failed to write image tarball", out, &err))?;
        drop(builder);
        temp.persist(out)
            .map_err(|err| export_error("failed to write image tarball", out, &err.error))?;
        info!(out = %out.display(), "image tarball written");
        return Ok(());
    }

    if out.exists() {
        if !out.join("oci-layout").is_file() {
            return Err(hp_error(
                codes::IMAGE,
                "output path exists and is not an OCI layout",
                json!({
                    "reason": "output_exists",
                    "path": out.display().to_string(),
                    "hint": "Choose another --out path or remove it first.",
                }),
            )
            .into());
        }
        fs::remove_dir_all(out)
            .map_err(|err| export_error("failed to replace previous image", out, &err))?;
    }
    let staged = TempBuilder::new()
        .prefix(".hp-out-")
        .tempdir_in(&parent)
        .map_err(|err| export_error("failed to stage image output", out, &err))?;
    copy_dir(layout, staged.path())?;
    fs::rename(staged.path(), out)
        .map_err(|err| export_error("failed to move image into place", out, &err))?;
    info!(out = %out.display(), "image layout written");
    Ok(())
}

fn copy_dir(from: &Path, to: &Path) -> Result<()> {
    for entry in WalkDir::new(from).sort_by_file_name().min_depth(1) {
        let entry = entry.map_err(|err| {
            export_error(
                "failed to walk image layout",
                from,
                &io::Error::other(err.to_string()),
            )
        })?;
        let rel = entry.path().strip_prefix(from).unwrap_or(entry.path());
        let dest = to.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest)
                .map_err(|err| export_error("failed to create output directory", &dest, &err))?;
        } else {
            fs::copy(entry.path(), &dest)
                .map_err(|err| export_error("failed to copy image file", &dest, &err))?;
        }
    }
    Ok(())
}

fn encode(value: &Value, what: &str) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(value).map_err(|err| {
        hp_error(
            codes::IMAGE,
            format!("failed to encode {what}"),
            json!({ "reason": "encode_failed", "error": err.to_string() }),
        )
        .into()
    })
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), InstallUserError> {
    fs::write(path, bytes).map_err(|err| export_error("failed to write image file", path, &err))
}

fn export_error(message: &str, path: &Path, err: &io::Error) -> InstallUserError {
    hp_error(
        codes::IMAGE,
        message,
        json!({
            "reason": "write_failed",
            "path": path.display().to_string(),
            "error": err.to_string(),
        }),
    )
}
