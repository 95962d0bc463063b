use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{debug, trace};
use url::Url;

use super::{ArtifactRequest, CachedWheelFile, HTTP_TIMEOUT, USER_AGENT};
use crate::core::tooling::errors::{codes, hp_error};

/// Ensure the requested wheel is available locally and matches its digest.
///
/// `file://` URLs (find-links) are used in place; everything else goes through
/// the cache. Nothing is retried.
///
/// # Errors
///
/// Returns an error when the download fails, the digest does not match, the
/// cache cannot be written, or a download is needed while offline.
pub(crate) fn fetch_wheel(
    cache_root: &Path,
    request: &ArtifactRequest<'_>,
    online: bool,
) -> Result<CachedWheelFile> {
    if request.url.starts_with("file:") {
        return local_wheel(request);
    }

    let dest = wheel_path(cache_root, request.name, request.version, request.filename);
    let existing = match request.sha256 {
        Some(expected) => validate_existing(&dest, expected)?,
        None if dest.exists() => Some(describe(&dest)?),
        None => None,
    };
    if let Some(existing) = existing {
        trace!(wheel = %existing.path.display(), "cache hit");
        return Ok(existing);
    }

    if !online {
        return Err(hp_error(
            codes::INSTALL,
            format!("HP_ONLINE=1 required to download {}", request.filename),
            json!({
                "reason": "offline",
                "url": request.url,
                "filename": request.filename,
                "hint": "Re-run with --online / set HP_ONLINE=1, or populate the cache while online.",
            }),
        )
        .into());
    }
    download_once(&dest, request)
}

pub(crate) fn wheel_path(cache_root: &Path, name: &str, version: &str, filename: &str) -> PathBuf {
    cache_root
        .join("wheels")
        .join(name)
        .join(version)
        .join(filename)
}

fn validate_existing(path: &Path, expected_sha: &str) -> Result<Option<CachedWheelFile>> {
    if !path.exists() {
        return Ok(None);
    }

    match compute_sha256(path) {
        Ok(actual) if actual == expected_sha => {
            let size = fs::metadata(path)?.len();
            Ok(Some(CachedWheelFile {
                path: path.to_path_buf(),
                size,
                sha256: actual,
            }))
        }
        Ok(_) | Err(_) => {
            debug!(path = %path.display(), "discarding cached wheel with stale digest");
            let _ = fs::remove_file(path);
            Ok(None)
        }
    }
}

fn describe(path: &Path) -> Result<CachedWheelFile> {
    Ok(CachedWheelFile {
        path: path.to_path_buf(),
        size: fs::metadata(path)?.len(),
        sha256: compute_sha256(path)?,
    })
}

fn local_wheel(request: &ArtifactRequest<'_>) -> Result<CachedWheelFile> {
    let path = Url::parse(request.url)
        .ok()
        .and_then(|url| url.to_file_path().ok())
        .with_context(|| format!("invalid file URL {}", request.url))?;
    let file = describe(&path).with_context(|| format!("failed to read {}", path.display()))?;
    if let Some(expected) = request.sha256 {
        if file.sha256 != expected {
            return Err(digest_mismatch(request, expected, &file.sha256).into());
        }
    }
    Ok(file)
}

pub(crate) fn compute_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0_u8; 32 * 1024];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub(crate) fn http_client() -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(HTTP_TIMEOUT)
        .build()
        .context("failed to build http client")
}

fn download_once(dest: &Path, request: &ArtifactRequest<'_>) -> Result<CachedWheelFile> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    debug!(url = request.url, "downloading wheel");
    let client = http_client()?;
    let mut response = client
        .get(request.url)
        .send()
        .with_context(|| format!("failed to fetch {}", request.url))?
        .error_for_status()
        .with_context(|| format!("unexpected response for {}", request.url))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dest.parent().unwrap_or_else(|| Path::new(".")))?;
    let mut hasher = Sha256::new();
    let mut written: u64 = 0;
    let mut buffer = vec![0_u8; 64 * 1024];
    loop {
        let read = response
            .read(&mut buffer)
            .with_context(|| format!("stream error for {}", request.filename))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        tmp.write_all(&buffer[..read])?;
        written += read as u64;
    }

    let actual = hex::encode(hasher.finalize());
    if let Some(expected) = request.sha256 {
        if actual != expected {
            return Err(digest_mismatch(request, expected, &actual).into());
        }
    }

    let file = CachedWheelFile {
        path: dest.to_path_buf(),
        size: written,
        sha256: actual,
    };
    match tmp.persist(dest) {
        Ok(_) => Ok(file),
        Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => {
            if let Some(existing) = validate_existing(dest, &file.sha256)? {
                return Ok(existing);
            }
            let _ = fs::remove_file(dest);
            err.file.persist(dest)?;
            Ok(file)
        }
        Err(err) => Err(err.error.into()),
    }
}

fn digest_mismatch(
    request: &ArtifactRequest<'_>,
    expected: &str,
    actual: &str,
) -> crate::InstallUserError {
    hp_error(
        codes::INSTALL,
        format!("sha256 mismatch for {}", request.filename),
        json!({
            "reason": "digest_mismatch",
            "url": request.url,
            "expected": expected,
            "actual": actual,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tooling::outcome::InstallUserError;
    use httptest::{matchers::*, responders::*, Expectation, Server};
    use tempfile::tempdir;

    fn sha_of(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    fn request<'a>(url: &'a str, sha: Option<&'a str>) -> ArtifactRequest<'a> {
        ArtifactRequest {
            name: "demo",
            version: "1.0",
            filename: "demo-1.0-py3-none-any.whl",
            url,
            sha256: sha,
        }
    }

    #[test]
    fn downloads_verifies_and_caches() {
        let body = b"wheel-bytes".to_vec();
        let sha = sha_of(&body);
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/demo.whl"))
                .times(1)
                .respond_with(status_code(200).body(body.clone())),
        );
        let cache = tempdir().expect("tempdir");
        let url = server.url_str("/demo.whl");

        let first = fetch_wheel(cache.path(), &request(&url, Some(&sha)), true).expect("fetch");
        assert_eq!(first.sha256, sha);
        assert_eq!(first.size, body.len() as u64);
        assert_eq!(
            first.path,
            wheel_path(cache.path(), "demo", "1.0", "demo-1.0-py3-none-any.whl")
        );

        // second call is served from the cache, even offline
        let second = fetch_wheel(cache.path(), &request(&url, Some(&sha)), false).expect("cached");
        assert_eq!(second.path, first.path);
    }

    #[test]
    fn digest_mismatch_is_a_user_error() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/demo.whl"))
                .respond_with(status_code(200).body("tampered")),
        );
        let cache = tempdir().expect("tempdir");
        let url = server.url_str("/demo.whl");
        let err = fetch_wheel(cache.path(), &request(&url, Some("00ff")), true)
            .expect_err("mismatch");
        let user = err.downcast_ref::<InstallUserError>().expect("user error");
        assert_eq!(user.details()["reason"], "digest_mismatch");
        assert!(!wheel_path(cache.path(), "demo", "1.0", "demo-1.0-py3-none-any.whl").exists());
    }

    #[test]
    fn offline_refuses_to_download() {
        let cache = tempdir().expect("tempdir");
        let err = fetch_wheel(
            cache.path(),
            &request("https://files.example.invalid/demo.whl", None),
            false,
        )
        .expect_err("offline");
        let user = err.downcast_ref::<InstallUserError>().expect("user error");
        assert_eq!(user.details()["reason"], "offline");
        assert_eq!(user.code(), Some("HP400"));
    }

    #[test]
    fn stale_cache_entries_are_replaced() {
        let cache = tempdir().expect("tempdir");
        let dest = wheel_path(cache.path(), "demo", "1.0", "demo-1.0-py3-none-any.whl");
        fs::create_dir_all(dest.parent().expect("parent")).expect("mkdir");
        fs::write(&dest, b"corrupt").expect("seed");
        assert!(validate_existing(&dest, &sha_of(b"good")).expect("validate").is_none());
        assert!(!dest.exists());
    }

    #[test]
    fn file_urls_are_used_in_place() {
        let dir = tempdir().expect("tempdir");
        let wheel = dir.path().join("demo-1.0-py3-none-any.whl");
        fs::write(&wheel, b"local").expect("write");
        let url = Url::from_file_path(&wheel).expect("url").to_string();
        let sha = sha_of(b"local");
        let file = fetch_wheel(dir.path(), &request(&url, Some(&sha)), false).expect("local");
        assert_eq!(file.path, wheel);
        assert!(fetch_wheel(dir.path(), &request(&url, Some("bad")), false).is_err());
    }
}
