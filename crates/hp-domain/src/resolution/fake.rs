use super::source::{DistFile, PackageSource, ReleaseFiles, SourceError};

/// In-memory index of pure wheels: `(name, version, requires_dist)`.
pub(crate) struct FakeIndex {
    packages: Vec<(&'static str, &'static str, Vec<&'static str>)>,
}

impl FakeIndex {
    pub(crate) fn new(packages: Vec<(&'static str, &'static str, Vec<&'static str>)>) -> Self {
        Self { packages }
    }
}

impl PackageSource for FakeIndex {
    fn releases(&self, name: &str) -> Result<Vec<ReleaseFiles>, SourceError> {
        let releases: Vec<ReleaseFiles> = self
            .packages
            .iter()
            .filter(|(pkg, _, _)| *pkg == name)
            .map(|(pkg, version, _)| {
                let filename = format!("{}-{version}-py3-none-any.whl", pkg.replace('-', "_"));
                ReleaseFiles {
                    version: (*version).to_string(),
                    files: vec![DistFile {
                        url: format!("https://files.example.invalid/{filename}"),
                        sha256: Some(format!("{pkg}{version}")),
                        filename,
                        yanked: false,
                        size: None,
                    }],
                }
            })
            .collect();
        if releases.is_empty() {
            return Err(SourceError::NotFound(name.to_string()));
        }
        Ok(releases)
    }

    fn requires_dist(&self, name: &str, version: &str) -> Result<Vec<String>, SourceError> {
        self.packages
            .iter()
            .find(|(pkg, ver, _)| *pkg == name && *ver == version)
            .map(|(_, _, requires)| requires.iter().map(ToString::to_string).collect())
            .ok_or_else(|| SourceError::NotFound(name.to_string()))
    }
}
