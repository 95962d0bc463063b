//! The image build: base, dependencies, payload, workdir, entrypoint.
//!
//! Stages run strictly in order and the first failure aborts the build. All
//! blobs are staged in a scratch layout; `--out` is only touched once every
//! stage has succeeded.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use hp_domain::{PackageSource, Recipe};
use serde::Serialize;
use serde_json::json;
use tempfile::Builder as TempBuilder;
use tracing::info;

use crate::core::env::SitePackages;
use crate::core::materialize::{materialize, materializer_for, MaterializeInputs, MaterializeReport};
use crate::core::tooling::errors::{codes, hp_error, recipe_error};

pub(crate) mod base;
mod layers;
mod oci;
mod overlay;

use base::{BaseLayerProvider, BaseLayerRequest};
use layers::LayerBlob;
use oci::{export_layout, oci_architecture, write_layout, HistoryEntry, ImageConfig};

pub(crate) struct BuildInputs<'a> {
    pub(crate) recipe: &'a Recipe,
    pub(crate) context: &'a Path,
    pub(crate) source: &'a dyn PackageSource,
    pub(crate) cache_root: &'a Path,
    pub(crate) online: bool,
    pub(crate) base_layers: &'a dyn BaseLayerProvider,
    pub(crate) backend: Option<&'a str>,
    pub(crate) source_date_epoch: u64,
    pub(crate) out: &'a Path,
}

#[derive(Debug, Serialize)]
pub(crate) struct StageLayer {
    pub(crate) stage: &'static str,
    #[serde(flatten)]
    pub(crate) blob: LayerBlob,
}

#[derive(Debug, Serialize)]
pub(crate) struct BuildReport {
    pub(crate) image: String,
    pub(crate) manifest_digest: String,
    pub(crate) config_digest: String,
    pub(crate) out: String,
    pub(crate) workdir: String,
    pub(crate) cmd: Vec<String>,
    pub(crate) layers: Vec<StageLayer>,
    pub(crate) dependencies: MaterializeReport,
}

pub(crate) fn run_build(inputs: &BuildInputs<'_>) -> Result<BuildReport> {
    let recipe = inputs.recipe;
    let target = recipe.target().map_err(|err| recipe_error(&err))?;
    let reference = recipe.image_ref();
    info!(image = %reference, base = %recipe.image.base, "building image");

    // The payload must exist before any stage runs.
    let payload_src = inputs.context.join(&recipe.payload.source);
    if !payload_src.is_dir() {
        return Err(hp_error(
            codes::PAYLOAD,
            "application payload is missing",
            json!({
                "reason": "payload_missing",
                "path": payload_src.display().to_string(),
                "hint": "Point [payload] source at the application directory in the build context.",
            }),
        )
        .into());
    }

    let staging = TempBuilder::new()
        .prefix("hp-build-")
        .tempdir()
        .context("failed to create build staging directory")?;
    let layout = staging.path().join("layout");
    let blobs = layout.join("blobs").join("sha256");
    let rootfs = staging.path().join("rootfs");
    fs::create_dir_all(&blobs).context("failed to prepare blob directory")?;
    fs::create_dir_all(&rootfs).context("failed to prepare staged root filesystem")?;
    let mut stages = Vec::new();
    let mut history = Vec::new();

    // base
    let request = BaseLayerRequest {
        image: &recipe.image.base,
        platform: &recipe.image.platform,
        commands: &recipe.base.update,
        backend: inputs.backend,
    };
    let base = inputs.base_layers.base_layer(&request, &blobs)?;
    let base_dists = overlay::stage_base_metadata(
        &blobs.join(&base.digest),
        &rootfs,
        Path::new(&target.site_packages_rel()),
    )?;
    history.push(HistoryEntry::layer(format!(
        "FROM {} RUN /bin/sh -c {}",
        recipe.image.base,
        request.script()
    )));
    stages.push(StageLayer {
        stage: "base",
        blob: base,
    });

    // dependencies
    let materializer = materializer_for(recipe.dependencies.mode);
    let env = SitePackages::image_prefix(&rootfs, &target);
    let dependencies = materialize(
        materializer.as_ref(),
        &MaterializeInputs {
            recipe,
            context: inputs.context,
            target: &target,
            source: inputs.source,
            cache_root: inputs.cache_root,
            online: inputs.online,
            dry_run: false,
            preserve: overlay::PRESERVED,
        },
        &env,
    )?;
    let whiteouts = overlay::mask_base_dists(&rootfs, &env, &base_dists)?;
    let deps = layers::tree_layer(&rootfs, "/", &blobs, inputs.source_date_epoch)?;
    info!(
        digest = %deps.digest,
        packages = dependencies.plan.unchanged.len() + dependencies.installed,
        whiteouts,
        "dependency layer ready"
    );
    history.push(HistoryEntry::layer(format!(
        "hp {} {}",
        recipe.dependencies.mode,
        recipe.dependencies.lock.display()
    )));
    stages.push(StageLayer {
        stage: "dependencies",
        blob: deps,
    });

    // payload
    let workdir = recipe.workdir().to_string();
    let payload = layers::tree_layer(&payload_src, &workdir, &blobs, inputs.source_date_epoch)?;
    info!(digest = %payload.digest, dest = %workdir, "payload layer ready");
    history.push(HistoryEntry::layer(format!(
        "COPY {} {}",
        recipe.payload.source.display(),
        workdir
    )));
    stages.push(StageLayer {
        stage: "payload",
        blob: payload,
    });

    // workdir + entrypoint
    let cmd = recipe.entrypoint_command();
    history.push(HistoryEntry::metadata(format!("WORKDIR {workdir}")));
    history.push(HistoryEntry::metadata(format!(
        "CMD {}",
        serde_json::to_string(&cmd).unwrap_or_default()
    )));

    let labels = BTreeMap::from([
        (
            "hp.dependency-mode".to_string(),
            recipe.dependencies.mode.to_string(),
        ),
        ("hp.lock.sha256".to_string(), dependencies.lock_sha256.clone()),
    ]);
    let blobs_only: Vec<LayerBlob> = stages.iter().map(|layer| layer.blob.clone()).collect();
    let built = write_layout(
        &layout,
        &blobs_only,
        &ImageConfig {
            reference: reference.clone(),
            architecture: oci_architecture(target.machine()).to_string(),
            working_dir: workdir.clone(),
            cmd: cmd.clone(),
            labels,
            history,
            created: inputs.source_date_epoch,
        },
    )?;
    export_layout(&layout, inputs.out, inputs.source_date_epoch)?;
    info!(image = %reference, manifest = %built.manifest_digest, "image written");

    Ok(BuildReport {
        image: reference,
        manifest_digest: built.manifest_digest,
        config_digest: built.config_digest,
        out: inputs.out.display().to_string(),
        workdir,
        cmd,
        layers: stages,
        dependencies,
    })
}

/// `dist/oci/<name>-<tag>` under the build context.
pub(crate) fn default_out(recipe: &Recipe, context: &Path) -> PathBuf {
    context
        .join("dist")
        .join("oci")
        .join(format!("{}-{}", recipe.image.name.replace('/', "-"), recipe.image.tag))
}
