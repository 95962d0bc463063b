use std::cell::RefCell;
use std::collections::HashMap;
use std::str::FromStr;

use hp_domain::{PackageSource, ReleaseFiles, SourceError};
use pep440_rs::Version;

/// Queries every source in order and merges their releases. Answers are
/// memoized for the lifetime of the value.
pub(crate) struct ChainedSource {
    sources: Vec<Box<dyn PackageSource>>,
    releases: RefCell<HashMap<String, Vec<ReleaseFiles>>>,
    requires: RefCell<HashMap<(String, String), Vec<String>>>,
}

impl ChainedSource {
    pub(crate) fn new(sources: Vec<Box<dyn PackageSource>>) -> Self {
        Self {
            sources,
            releases: RefCell::new(HashMap::new()),
            requires: RefCell::new(HashMap::new()),
        }
    }

    fn missing(name: &str, offline: bool) -> SourceError {
        if offline {
            SourceError::Offline(name.to_string())
        } else {
            SourceError::NotFound(name.to_string())
        }
    }
}

fn same_version(a: &str, b: &str) -> bool {
    match (Version::from_str(a), Version::from_str(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

impl PackageSource for ChainedSource {
    fn releases(&self, name: &str) -> Result<Vec<ReleaseFiles>, SourceError> {
        if let Some(cached) = self.releases.borrow().get(name) {
            return Ok(cached.clone());
        }
        let mut merged: Vec<ReleaseFiles> = Vec::new();
        let mut found = false;
        let mut offline = false;
        for source in &self.sources {
            match source.releases(name) {
                Ok(releases) => {
                    found = true;
                    for release in releases {
                        match merged
                            .iter_mut()
                            .find(|known| same_version(&known.version, &release.version))
                        {
                            Some(known) => {
                                for file in release.files {
                                    if !known.files.iter().any(|f| f.filename == file.filename) {
                                        known.files.push(file);
                                    }
                                }
                            }
                            None => merged.push(release),
                        }
                    }
                }
                Err(SourceError::NotFound(_)) => {}
                Err(SourceError::Offline(_)) => offline = true,
                Err(err) => return Err(err),
            }
        }
        if !found {
            return Err(Self::missing(name, offline));
        }
        self.releases
            .borrow_mut()
            .insert(name.to_string(), merged.clone());
        Ok(merged)
    }

    fn requires_dist(&self, name: &str, version: &str) -> Result<Vec<String>, SourceError> {
        let key = (name.to_string(), version.to_string());
        if let Some(cached) = self.requires.borrow().get(&key) {
            return Ok(cached.clone());
        }
        let mut offline = false;
        for source in &self.sources {
            match source.requires_dist(name, version) {
                Ok(requires) => {
                    self.requires.borrow_mut().insert(key, requires.clone());
                    return Ok(requires);
                }
                Err(SourceError::NotFound(_)) => {}
                Err(SourceError::Offline(_)) => offline = true,
                Err(err) => return Err(err),
            }
        }
        Err(Self::missing(name, offline))
    }
}
