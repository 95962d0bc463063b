use std::cell::OnceCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use hp_domain::{normalize_dist_name, DistFile, PackageSource, ReleaseFiles, SourceError, WheelTags};
use pep440_rs::Version;
use tracing::{debug, trace};
use url::Url;

use crate::core::metadata::read_wheel_metadata;
use crate::core::store::compute_sha256;

#[derive(Clone, Debug)]
struct LocalWheel {
    path: PathBuf,
    version: String,
    file: DistFile,
}

/// Directories of `.whl` files consulted before any index.
pub(crate) struct FindLinksIndex {
    dirs: Vec<PathBuf>,
    wheels: OnceCell<BTreeMap<String, Vec<LocalWheel>>>,
}

impl FindLinksIndex {
    pub(crate) fn new(dirs: Vec<PathBuf>) -> Self {
        Self {
            dirs,
            wheels: OnceCell::new(),
        }
    }

    fn wheels(&self) -> &BTreeMap<String, Vec<LocalWheel>> {
        self.wheels.get_or_init(|| scan(&self.dirs))
    }

    fn find(&self, name: &str, version: &str) -> Option<&LocalWheel> {
        let wanted = Version::from_str(version).ok();
        self.wheels().get(name)?.iter().find(|wheel| match &wanted {
            Some(wanted) => Version::from_str(&wheel.version).is_ok_and(|v| v == *wanted),
            None => wheel.version == version,
        })
    }
}

fn scan(dirs: &[PathBuf]) -> BTreeMap<String, Vec<LocalWheel>> {
    let mut wheels: BTreeMap<String, Vec<LocalWheel>> = BTreeMap::new();
    for dir in dirs {
        let Ok(entries) = fs::read_dir(dir) else {
            debug!(dir = %dir.display(), "find-links directory is not readable");
            continue;
        };
        let mut paths: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "whl"))
            .collect();
        paths.sort();
        for path in paths {
            if let Some((name, wheel)) = describe(&path) {
                wheels.entry(name).or_default().push(wheel);
            }
        }
    }
    wheels
}

fn describe(path: &Path) -> Option<(String, LocalWheel)> {
    let filename = path.file_name()?.to_str()?.to_string();
    let tags = WheelTags::parse(&filename)?;
    let sha256 = compute_sha256(path).ok()?;
    let url = Url::from_file_path(path).ok()?.to_string();
    let size = fs::metadata(path).ok().map(|meta| meta.len());
    trace!(wheel = %filename, "found local wheel");
    Some((
        normalize_dist_name(&tags.distribution),
        LocalWheel {
            path: path.to_path_buf(),
            version: tags.version,
            file: DistFile {
                filename,
                url,
                sha256: Some(sha256),
                yanked: false,
                size,
            },
        },
    ))
}

impl PackageSource for FindLinksIndex {
    fn releases(&self, name: &str) -> Result<Vec<ReleaseFiles>, SourceError> {
        let Some(local) = self.wheels().get(name) else {
            return Err(SourceError::NotFound(name.to_string()));
        };
        let mut releases: Vec<ReleaseFiles> = Vec::new();
        for wheel in local {
            match releases.iter_mut().find(|r| r.version == wheel.version) {
                Some(release) => release.files.push(wheel.file.clone()),
                None => releases.push(ReleaseFiles {
                    version: wheel.version.clone(),
                    files: vec![wheel.file.clone()],
                }),
            }
        }
        Ok(releases)
    }

    fn requires_dist(&self, name: &str, version: &str) -> Result<Vec<String>, SourceError> {
        let wheel = self
            .find(name, version)
            .ok_or_else(|| SourceError::NotFound(name.to_string()))?;
        read_wheel_metadata(&wheel.path)
            .map(|meta| meta.requires_dist)
            .map_err(|err| SourceError::Metadata {
                package: name.to_string(),
                version: version.to_string(),
                message: format!("{err:#}"),
            })
    }
}
