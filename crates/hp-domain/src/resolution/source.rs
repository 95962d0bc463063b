use serde::{Deserialize, Serialize};

use super::target::TargetEnvironment;

/// One downloadable file of a release.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistFile {
    pub filename: String,
    pub url: String,
    pub sha256: Option<String>,
    #[serde(default)]
    pub yanked: bool,
    #[serde(default)]
    pub size: Option<u64>,
}

impl DistFile {
    pub fn is_wheel(&self) -> bool {
        self.filename.ends_with(".whl")
    }

    pub fn wheel_tags(&self) -> Option<WheelTags> {
        WheelTags::parse(&self.filename)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseFiles {
    pub version: String,
    pub files: Vec<DistFile>,
}

/// Tags decoded from a wheel filename
/// (`{dist}-{version}(-{build})?-{python}-{abi}-{platform}.whl`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WheelTags {
    pub distribution: String,
    pub version: String,
    pub python: Vec<String>,
    pub abi: Vec<String>,
    pub platform: Vec<String>,
}

impl WheelTags {
    pub fn parse(filename: &str) -> Option<Self> {
        let stem = filename.strip_suffix(".whl")?;
        let parts: Vec<&str> = stem.split('-').collect();
        if parts.len() != 5 && parts.len() != 6 {
            return None;
        }
        let split = |value: &str| value.split('.').map(str::to_string).collect::<Vec<_>>();
        let n = parts.len();
        Some(Self {
            distribution: parts[0].to_string(),
            version: parts[1].to_string(),
            python: split(parts[n - 3]),
            abi: split(parts[n - 2]),
            platform: split(parts[n - 1]),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("package `{0}` was not found")]
    NotFound(String),
    #[error("{package}: {message}")]
    Fetch { package: String, message: String },
    #[error("{package} {version}: invalid metadata: {message}")]
    Metadata {
        package: String,
        version: String,
        message: String,
    },
    #[error("network access is disabled (offline); cannot query `{0}`")]
    Offline(String),
}

/// Where releases and their declared dependencies come from.
pub trait PackageSource {
    /// Every known release of `name` (normalized) with its files.
    fn releases(&self, name: &str) -> Result<Vec<ReleaseFiles>, SourceError>;

    /// `Requires-Dist` entries of one release, verbatim.
    fn requires_dist(&self, name: &str, version: &str) -> Result<Vec<String>, SourceError>;
}

impl<T: PackageSource + ?Sized> PackageSource for &T {
    fn releases(&self, name: &str) -> Result<Vec<ReleaseFiles>, SourceError> {
        (**self).releases(name)
    }

    fn requires_dist(&self, name: &str, version: &str) -> Result<Vec<String>, SourceError> {
        (**self).requires_dist(name, version)
    }
}

/// Picks the best-ranked installable wheel; ties go to the smaller filename so
/// the choice never depends on listing order.
pub fn select_wheel<'a>(
    files: &'a [DistFile],
    target: &TargetEnvironment,
    allow_yanked: bool,
) -> Option<&'a DistFile> {
    files
        .iter()
        .filter(|file| file.is_wheel() && (allow_yanked || !file.yanked))
        .filter_map(|file| {
            let tags = file.wheel_tags()?;
            target.wheel_score(&tags).map(|score| (score, file))
        })
        .max_by(|(a_score, a), (b_score, b)| {
            a_score
                .cmp(b_score)
                .then_with(|| b.filename.cmp(&a.filename))
        })
        .map(|(_, file)| file)
}
