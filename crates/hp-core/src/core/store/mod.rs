use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use dirs_next::{cache_dir, home_dir};

mod wheel;

pub(crate) use wheel::{compute_sha256, fetch_wheel, http_client};

pub(crate) const USER_AGENT: &str = concat!("hp/", env!("CARGO_PKG_VERSION"));
pub(crate) const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct CacheLocation {
    pub path: PathBuf,
    pub source: &'static str,
}

/// What to fetch; `sha256` is checked when the index published one.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ArtifactRequest<'a> {
    pub(crate) name: &'a str,
    pub(crate) version: &'a str,
    pub(crate) filename: &'a str,
    pub(crate) url: &'a str,
    pub(crate) sha256: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub(crate) struct CachedWheelFile {
    pub(crate) path: PathBuf,
    pub(crate) size: u64,
    pub(crate) sha256: String,
}

/// Determine the root directory for the on-disk cache.
///
/// # Errors
///
/// Returns an error if a relative override cannot be made absolute.
pub(crate) fn resolve_cache_store_path(override_path: Option<&Path>) -> Result<CacheLocation> {
    if let Some(path) = override_path {
        return Ok(CacheLocation {
            path: absolutize(path.to_path_buf())?,
            source: "HP_CACHE_DIR",
        });
    }
    if let Some(base) = cache_dir() {
        return Ok(CacheLocation {
            path: base.join("hp"),
            source: "user cache dir",
        });
    }
    if let Some(home) = home_dir() {
        return Ok(CacheLocation {
            path: home.join(".cache").join("hp"),
            source: "HOME/.cache/hp",
        });
    }
    Ok(CacheLocation {
        path: PathBuf::from("/tmp/hp-cache"),
        source: "default (/tmp/hp-cache)",
    })
}

fn absolutize(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(std::env::current_dir()
            .context("failed to resolve HP_CACHE_DIR")?
            .join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_wins_and_is_absolute() {
        let location = resolve_cache_store_path(Some(Path::new("relative-cache"))).expect("cache");
        assert!(location.path.is_absolute());
        assert!(location.path.ends_with("relative-cache"));
        assert_eq!(location.source, "HP_CACHE_DIR");
    }

    #[test]
    fn default_location_ends_with_hp() {
        let location = resolve_cache_store_path(None).expect("cache");
        assert!(location.path.ends_with("hp") || location.path.ends_with("hp-cache"));
    }
}
