//! Provisioning a `site-packages` directory from the recipe's dependency
//! manifests.
//!
//! Both strategies end the same way: a lock manifest is reconciled against
//! what is installed, uninstalls first, then installs dependencies-first.
//! They differ in where the lock comes from.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use hp_domain::{
    install_order, plan_sync, select_wheel, DependencyMode, DistFile, LockManifest,
    PackageSource, Recipe, ResolveError, SyncPlan, TargetEnvironment,
};
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::core::env::{install_wheel, uninstall, SitePackages};
use crate::core::store::{fetch_wheel, ArtifactRequest};
use crate::core::tooling::errors::{codes, hp_error, resolve_error};

mod compile;
mod pinned;

pub(crate) use compile::{compile_lock, CompileThenSync};
pub(crate) use pinned::{load_closed_lock, PinnedInstall};

/// Everything a materializer reads.
pub(crate) struct MaterializeInputs<'a> {
    pub(crate) recipe: &'a Recipe,
    /// Directory recipe-relative paths resolve against.
    pub(crate) context: &'a Path,
    pub(crate) target: &'a TargetEnvironment,
    pub(crate) source: &'a dyn PackageSource,
    pub(crate) cache_root: &'a Path,
    pub(crate) online: bool,
    pub(crate) dry_run: bool,
    /// Installed distributions left alone unless the lock pins them.
    pub(crate) preserve: &'a [&'a str],
}

impl MaterializeInputs<'_> {
    pub(crate) fn lock_path(&self) -> PathBuf {
        self.context.join(&self.recipe.dependencies.lock)
    }

    pub(crate) fn input_path(&self) -> PathBuf {
        self.context.join(&self.recipe.dependencies.input)
    }
}

/// The lock an environment must end up matching.
#[derive(Debug)]
pub(crate) struct PreparedLock {
    pub(crate) lock: LockManifest,
    pub(crate) text: String,
    pub(crate) path: PathBuf,
    /// Whether the lock file on disk was (or, on a dry run, would be) rewritten.
    pub(crate) changed: bool,
    pub(crate) edges: Vec<(String, String)>,
    /// Files already known from resolution, keyed by name.
    pub(crate) files: BTreeMap<String, Vec<DistFile>>,
}

impl PreparedLock {
    pub(crate) fn sha256(&self) -> String {
        hex::encode(Sha256::digest(self.text.as_bytes()))
    }
}

/// One strategy for producing the lock.
pub(crate) trait Materializer {
    fn mode(&self) -> DependencyMode;

    /// Yanked files may still be installed when a committed lock pins them.
    fn allow_yanked(&self) -> bool;

    fn prepare(&self, inputs: &MaterializeInputs<'_>) -> Result<PreparedLock>;
}

pub(crate) fn materializer_for(mode: DependencyMode) -> Box<dyn Materializer> {
    match mode {
        DependencyMode::Pinned => Box::new(PinnedInstall),
        DependencyMode::Compile => Box::new(CompileThenSync),
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct MaterializeReport {
    pub(crate) mode: DependencyMode,
    pub(crate) lock: String,
    pub(crate) lock_sha256: String,
    pub(crate) lock_changed: bool,
    pub(crate) plan: SyncPlan,
    pub(crate) installed: usize,
    pub(crate) uninstalled: usize,
    pub(crate) dry_run: bool,
}

impl MaterializeReport {
    pub(crate) fn summary(&self) -> String {
        let (install, replace, uninstall) = self.plan.counts();
        if self.plan.is_empty() {
            return format!(
                "environment matches {} ({} packages)",
                self.lock,
                self.plan.unchanged.len()
            );
        }
        let verb = if self.dry_run { "would apply" } else { "applied" };
        format!(
            "{verb} {install} install(s), {replace} upgrade(s)/downgrade(s), {uninstall} removal(s)"
        )
    }
}

/// Prepares the lock with `materializer` and reconciles `env` with it.
pub(crate) fn materialize(
    materializer: &dyn Materializer,
    inputs: &MaterializeInputs<'_>,
    env: &SitePackages,
) -> Result<MaterializeReport> {
    let mode = materializer.mode();
    info!(mode = %mode, target = %env.root().display(), "materializing dependencies");
    let prepared = materializer.prepare(inputs)?;
    let desired = desired_versions(&prepared.lock, inputs.target);
    let installed = env.installed()?;
    let installed_versions = installed
        .values()
        .map(|dist| (dist.name.clone(), dist.version.clone()))
        .collect();
    let plan = plan_sync(
        &desired,
        &managed(installed_versions, &desired, inputs.preserve),
    );
    debug!(actions = plan.actions.len(), unchanged = plan.unchanged.len(), "sync plan");

    let mut report = MaterializeReport {
        mode,
        lock: prepared.path.display().to_string(),
        lock_sha256: prepared.sha256(),
        lock_changed: prepared.changed,
        plan,
        installed: 0,
        uninstalled: 0,
        dry_run: inputs.dry_run,
    };
    if inputs.dry_run {
        return Ok(report);
    }

    for (name, version) in report.plan.removals() {
        let Some(dist) = installed.get(name) else {
            continue;
        };
        debug!(name, version, "removing");
        uninstall(env, dist)?;
        report.uninstalled += 1;
    }

    let additions: Vec<String> = report
        .plan
        .additions()
        .map(|(name, _)| name.to_string())
        .collect();
    for name in install_order(&additions, &prepared.edges) {
        let Some(pin) = prepared.lock.get(&name) else {
            continue;
        };
        let known = prepared.files.get(&name);
        let wheel = fetch_pinned(
            inputs,
            &name,
            &pin.version,
            &pin.hashes,
            known.map(Vec::as_slice),
            materializer.allow_yanked(),
        )?;
        install_wheel(env, &wheel, &name)?;
        report.installed += 1;
    }

    verify_environment(env, &desired, inputs.preserve)?;
    info!(
        installed = report.installed,
        uninstalled = report.uninstalled,
        unchanged = report.plan.unchanged.len(),
        "dependencies in sync"
    );
    Ok(report)
}

fn desired_versions(lock: &LockManifest, target: &TargetEnvironment) -> BTreeMap<String, String> {
    lock.applicable(target.marker_environment())
        .map(|pin| (pin.name.clone(), pin.version.clone()))
        .collect()
}

/// Downloads (or reuses) the wheel for one pin and checks it against the
/// lock's `--hash` options.
fn fetch_pinned(
    inputs: &MaterializeInputs<'_>,
    name: &str,
    version: &str,
    hashes: &[String],
    known: Option<&[DistFile]>,
    allow_yanked: bool,
) -> Result<PathBuf> {
    let files = match known {
        Some(files) => files.to_vec(),
        None => release_files(inputs.source, name, version)?,
    };
    let Some(file) = select_wheel(&files, inputs.target, allow_yanked) else {
        return Err(hp_error(
            codes::INSTALL,
            format!("no compatible wheel for {name}=={version}"),
            json!({
                "reason": "no_compatible_wheel",
                "package": name,
                "version": version,
                "issues": files.iter().map(|f| f.filename.clone()).collect::<Vec<_>>(),
                "hint": "hp installs wheels only; pin a version that publishes a wheel for the target platform",
            }),
        )
        .into());
    };
    let cached = fetch_wheel(
        inputs.cache_root,
        &ArtifactRequest {
            name,
            version,
            filename: &file.filename,
            url: &file.url,
            sha256: file.sha256.as_deref(),
        },
        inputs.online,
    )?;
    if !hashes.is_empty() {
        let actual = format!("sha256:{}", cached.sha256);
        if !hashes.iter().any(|hash| hash.eq_ignore_ascii_case(&actual)) {
            return Err(hp_error(
                codes::INSTALL,
                format!("{} does not match the lock's hashes", file.filename),
                json!({
                    "reason": "hash_mismatch",
                    "package": name,
                    "version": version,
                    "actual": actual,
                    "expected": hashes,
                    "hint": "Regenerate the lock with `hp compile --generate-hashes`.",
                }),
            )
            .into());
        }
    }
    debug!(name, version, wheel = %file.filename, size = cached.size, "wheel ready");
    Ok(cached.path)
}

fn release_files(source: &dyn PackageSource, name: &str, version: &str) -> Result<Vec<DistFile>> {
    let releases = source
        .releases(name)
        .map_err(|err| resolve_error(&ResolveError::from(err)))?;
    let wanted = version.parse::<pep440_rs::Version>().ok();
    let release = releases.into_iter().find(|release| match &wanted {
        Some(wanted) => release
            .version
            .parse::<pep440_rs::Version>()
            .is_ok_and(|v| v == *wanted),
        None => release.version == version,
    });
    release.map(|release| release.files).ok_or_else(|| {
        hp_error(
            codes::INSTALL,
            format!("{name}=={version} is not available from the package index"),
            json!({
                "reason": "version_missing",
                "package": name,
                "version": version,
            }),
        )
        .into()
    })
}

/// Drops preserved distributions the lock does not pin.
fn managed(
    mut installed: BTreeMap<String, String>,
    desired: &BTreeMap<String, String>,
    preserve: &[&str],
) -> BTreeMap<String, String> {
    installed.retain(|name, _| desired.contains_key(name) || !preserve.contains(&name.as_str()));
    installed
}

/// The installed set must equal the applicable pins exactly.
fn verify_environment(
    env: &SitePackages,
    desired: &BTreeMap<String, String>,
    preserve: &[&str],
) -> Result<()> {
    let installed = managed(env.installed_versions()?, desired, preserve);
    let drift = plan_sync(desired, &installed);
    if drift.is_empty() {
        return Ok(());
    }
    Err(hp_error(
        codes::INSTALL,
        "installed packages do not match the lock",
        json!({
            "reason": "environment_drift",
            "issues": drift.actions.iter().map(|a| format!("{a:?}")).collect::<Vec<_>>(),
        }),
    )
    .into())
}

/// Writes `text` to `path` unless it already holds exactly that.
pub(crate) fn write_if_changed(path: &Path, text: &str, dry_run: bool) -> Result<bool> {
    let current = fs::read_to_string(path).ok();
    if current.as_deref() == Some(text) {
        return Ok(false);
    }
    if !dry_run {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))?;
    }
    Ok(true)
}
