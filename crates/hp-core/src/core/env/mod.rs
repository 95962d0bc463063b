//! A `site-packages` directory and the distributions installed in it.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use hp_domain::{normalize_dist_name, TargetEnvironment};
use tracing::warn;

use crate::core::metadata::CoreMetadata;

mod install;
mod record;
mod uninstall;

pub(crate) use install::install_wheel;
pub(crate) use record::parse_paths as record_paths;
pub(crate) use uninstall::uninstall;

pub(crate) const INSTALLER: &str = "hp";

/// Where the pieces of a wheel land.
#[derive(Clone, Debug)]
pub(crate) struct SitePackages {
    root: PathBuf,
    scripts: PathBuf,
    data: PathBuf,
    interpreter: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct InstalledDist {
    pub(crate) name: String,
    pub(crate) version: String,
    pub(crate) dist_info: PathBuf,
}

impl SitePackages {
    /// A bare target directory, laid out like `pip install --target`:
    /// scripts in `<dir>/bin`, data files under `<dir>`.
    pub(crate) fn target_dir(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            scripts: root.join("bin"),
            data: root.to_path_buf(),
            interpreter: "/usr/bin/env python3".to_string(),
        }
    }

    /// The image's `/usr/local` prefix staged under `rootfs`.
    pub(crate) fn image_prefix(rootfs: &Path, target: &TargetEnvironment) -> Self {
        let prefix = rootfs.join("usr").join("local");
        Self {
            root: rootfs.join(target.site_packages_rel()),
            scripts: prefix.join("bin"),
            data: prefix,
            interpreter: "/usr/local/bin/python".to_string(),
        }
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn scripts(&self) -> &Path {
        &self.scripts
    }

    pub(crate) fn data(&self) -> &Path {
        &self.data
    }

    pub(crate) fn interpreter(&self) -> &str {
        &self.interpreter
    }

    /// Whether `path` lies inside one of the directories this environment owns.
    pub(crate) fn owns(&self, path: &Path) -> bool {
        [&self.root, &self.scripts, &self.data]
            .iter()
            .any(|dir| path.starts_with(dir))
    }

    /// Installed distributions keyed by normalized name.
    pub(crate) fn installed(&self) -> Result<BTreeMap<String, InstalledDist>> {
        let mut installed = BTreeMap::new();
        if !self.root.exists() {
            return Ok(installed);
        }
        let mut dirs: Vec<PathBuf> = fs::read_dir(&self.root)
            .with_context(|| format!("failed to read {}", self.root.display()))?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_dir() && path.extension().is_some_and(|ext| ext == "dist-info")
            })
            .collect();
        dirs.sort();
        for dist_info in dirs {
            let Some(dist) = read_dist_info(&dist_info) else {
                warn!(path = %dist_info.display(), "skipping unreadable .dist-info");
                continue;
            };
            if let Some(previous) = installed.insert(dist.name.clone(), dist) {
                warn!(
                    name = %previous.name,
                    path = %previous.dist_info.display(),
                    "multiple .dist-info directories for one distribution"
                );
            }
        }
        Ok(installed)
    }

    /// `name -> version` of everything installed.
    pub(crate) fn installed_versions(&self) -> Result<BTreeMap<String, String>> {
        Ok(self
            .installed()?
            .into_values()
            .map(|dist| (dist.name, dist.version))
            .collect())
    }
}

fn read_dist_info(dist_info: &Path) -> Option<InstalledDist> {
    let from_metadata = fs::read_to_string(dist_info.join("METADATA"))
        .ok()
        .and_then(|text| CoreMetadata::parse(&text).ok())
        .map(|meta| (meta.name, meta.version));
    let (name, version) = from_metadata.or_else(|| {
        let stem = dist_info.file_stem()?.to_str()?;
        let (name, version) = stem.split_once('-')?;
        Some((name.to_string(), version.to_string()))
    })?;
    Some(InstalledDist {
        name: normalize_dist_name(&name),
        version,
        dist_info: dist_info.to_path_buf(),
    })
}

/// Resolves `.` and `..` without touching the filesystem.
pub(crate) fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}
