use anyhow::Result;
use hp_domain::{DependencyMode, LockHeader, LooseManifest, ResolveRequest, Resolver};
use tracing::{debug, info};

use super::{write_if_changed, MaterializeInputs, Materializer, PreparedLock};
use crate::core::runtime::HP_VERSION;
use crate::core::tooling::errors::{manifest_error, resolve_error};

/// Resolves the loose manifest, writes the lock, then syncs to it.
pub(crate) struct CompileThenSync;

impl Materializer for CompileThenSync {
    fn mode(&self) -> DependencyMode {
        DependencyMode::Compile
    }

    fn allow_yanked(&self) -> bool {
        false
    }

    fn prepare(&self, inputs: &MaterializeInputs<'_>) -> Result<PreparedLock> {
        compile_lock(inputs, inputs.recipe.dependencies.generate_hashes)
    }
}

/// Loose manifest to rendered lock. The lock file is only rewritten when its
/// contents change, and never on a dry run.
pub(crate) fn compile_lock(
    inputs: &MaterializeInputs<'_>,
    generate_hashes: bool,
) -> Result<PreparedLock> {
    let input = inputs.input_path();
    let manifest = LooseManifest::load(&input).map_err(|err| manifest_error(&err))?;
    let request = ResolveRequest::from_manifest(&manifest);
    debug!(
        requirements = request.requirements.len(),
        constraints = request.constraints.len(),
        "resolving"
    );
    let resolution = Resolver::new(inputs.source, inputs.target)
        .resolve(&request)
        .map_err(|err| resolve_error(&err))?;

    let path = inputs.lock_path();
    let label = path
        .file_name()
        .map_or_else(|| path.display().to_string(), |name| name.to_string_lossy().to_string());
    let lock = resolution.to_lock(&label, generate_hashes);
    let text = lock.render(&LockHeader {
        tool_version: HP_VERSION.to_string(),
        command: "hp compile".to_string(),
    });
    let changed = write_if_changed(&path, &text, inputs.dry_run)?;
    info!(
        lock = %path.display(),
        pins = lock.pins.len(),
        changed,
        "compiled {}",
        manifest.label()
    );

    let edges = resolution.edges();
    let files = resolution
        .packages
        .into_iter()
        .map(|package| (package.name, package.files))
        .collect();
    Ok(PreparedLock {
        lock,
        text,
        path,
        changed,
        edges,
        files,
    })
}
