//! Dependency resolution against a package source for one target environment.

mod graph;
mod resolver;
mod source;
mod target;

#[cfg(test)]
pub(crate) mod fake;

pub use graph::{check_lock_closure, install_order, ClosureGap, LockGraph};
pub use resolver::{ResolveError, ResolveRequest, Resolution, ResolvedPackage, Resolver};
pub use source::{select_wheel, DistFile, PackageSource, ReleaseFiles, SourceError, WheelTags};
pub use target::{TargetEnvironment, TargetError};
