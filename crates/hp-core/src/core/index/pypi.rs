use std::collections::BTreeMap;

use anyhow::Result;
use hp_domain::{DistFile, PackageSource, ReleaseFiles, SourceError};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::trace;

use crate::core::store::http_client;

#[derive(Deserialize)]
struct PypiProjectResponse {
    #[serde(default)]
    releases: BTreeMap<String, Vec<PypiFile>>,
}

#[derive(Deserialize)]
struct PypiReleaseResponse {
    info: PypiReleaseInfo,
}

#[derive(Deserialize)]
struct PypiReleaseInfo {
    #[serde(default)]
    requires_dist: Option<Vec<String>>,
}

#[derive(Clone, Deserialize)]
struct PypiFile {
    filename: String,
    url: String,
    #[serde(default)]
    yanked: bool,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    digests: PypiDigests,
}

#[derive(Clone, Default, Deserialize)]
struct PypiDigests {
    #[serde(default)]
    sha256: Option<String>,
}

/// The PyPI JSON API (`<index>/<name>/json`, `<index>/<name>/<version>/json`).
pub(crate) struct PypiIndex {
    base: String,
    online: bool,
    client: Client,
}

impl PypiIndex {
    pub(crate) fn new(base: &str, online: bool) -> Result<Self> {
        Ok(Self {
            base: base.trim_end_matches('/').to_string(),
            online,
            client: http_client()?,
        })
    }

    fn get_json<T: DeserializeOwned>(&self, package: &str, url: &str) -> Result<T, SourceError> {
        if !self.online {
            return Err(SourceError::Offline(package.to_string()));
        }
        trace!(url, "index request");
        let fetch_error = |err: reqwest::Error| SourceError::Fetch {
            package: package.to_string(),
            message: err.to_string(),
        };
        let response = self.client.get(url).send().map_err(fetch_error)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound(package.to_string()));
        }
        response
            .error_for_status()
            .map_err(fetch_error)?
            .json::<T>()
            .map_err(fetch_error)
    }
}

impl PackageSource for PypiIndex {
    fn releases(&self, name: &str) -> Result<Vec<ReleaseFiles>, SourceError> {
        let url = format!("{}/{name}/json", self.base);
        let response: PypiProjectResponse = self.get_json(name, &url)?;
        Ok(response
            .releases
            .into_iter()
            .map(|(version, files)| ReleaseFiles {
                version,
                files: files
                    .into_iter()
                    .map(|file| DistFile {
                        filename: file.filename,
                        url: file.url,
                        sha256: file.digests.sha256,
                        yanked: file.yanked,
                        size: file.size,
                    })
                    .collect(),
            })
            .collect())
    }

    fn requires_dist(&self, name: &str, version: &str) -> Result<Vec<String>, SourceError> {
        let url = format!("{}/{name}/{version}/json", self.base);
        let response: PypiReleaseResponse = self.get_json(name, &url)?;
        Ok(response.info.requires_dist.unwrap_or_default())
    }
}
