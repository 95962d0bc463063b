#![deny(clippy::all, warnings)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod manifest;
pub mod name;
pub mod recipe;
pub mod resolution;
pub mod sync;

pub use manifest::{
    LockHeader, LockManifest, LooseManifest, ManifestError, Origin, PinnedPackage,
    RequirementEntry,
};
pub use name::{canonical_extras, normalize_dist_name};
pub use recipe::{
    render_dockerfile, DependencyMode, ImageReference, Recipe, RecipeError, DEFAULT_BASE_IMAGE,
    DEFAULT_INDEX_URL, DEFAULT_RECIPE_FILE, DEFAULT_SERVER_MODULE,
};
pub use resolution::{
    check_lock_closure, install_order, select_wheel, ClosureGap, DistFile, LockGraph,
    PackageSource, ReleaseFiles, ResolveError, ResolveRequest, Resolution, ResolvedPackage,
    Resolver, SourceError, TargetEnvironment, TargetError, WheelTags,
};
pub use sync::{plan_sync, SyncAction, SyncPlan};
