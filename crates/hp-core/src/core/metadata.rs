//! Core metadata (`METADATA`) as found in wheels and installed `.dist-info`
//! directories.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use zip::ZipArchive;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct CoreMetadata {
    pub(crate) name: String,
    pub(crate) version: String,
    pub(crate) requires_dist: Vec<String>,
}

impl CoreMetadata {
    /// Parses the RFC 822 style header block; the description body is ignored.
    pub(crate) fn parse(text: &str) -> Result<Self> {
        let mut headers: Vec<(String, String)> = Vec::new();
        for line in text.lines() {
            if line.trim().is_empty() {
                break;
            }
            if line.starts_with(|c: char| c == ' ' || c == '\t') {
                if let Some((_, value)) = headers.last_mut() {
                    value.push(' ');
                    value.push_str(line.trim());
                }
                continue;
            }
            if let Some((key, value)) = line.split_once(':') {
                headers.push((key.trim().to_ascii_lowercase(), value.trim().to_string()));
            }
        }
        let field = |key: &str| {
            headers
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .filter(|v| !v.is_empty())
        };
        let name = field("name").ok_or_else(|| anyhow!("METADATA has no Name"))?;
        let version = field("version").ok_or_else(|| anyhow!("METADATA has no Version"))?;
        let requires_dist = headers
            .iter()
            .filter(|(k, _)| k == "requires-dist")
            .map(|(_, v)| v.clone())
            .collect();
        Ok(Self {
            name,
            version,
            requires_dist,
        })
    }
}

/// Reads `<dist>.dist-info/METADATA` out of a wheel archive.
pub(crate) fn read_wheel_metadata(wheel: &Path) -> Result<CoreMetadata> {
    let file = File::open(wheel).with_context(|| format!("failed to open {}", wheel.display()))?;
    let mut archive = ZipArchive::new(file)
        .with_context(|| format!("{} is not a valid wheel", wheel.display()))?;
    let entry_name = archive
        .file_names()
        .find(|name| {
            let mut parts = name.split('/');
            matches!(
                (parts.next(), parts.next(), parts.next()),
                (Some(dir), Some("METADATA"), None) if dir.ends_with(".dist-info")
            )
        })
        .map(ToString::to_string)
        .ok_or_else(|| anyhow!("{} has no .dist-info/METADATA", wheel.display()))?;
    let mut text = String::new();
    archive
        .by_name(&entry_name)?
        .read_to_string(&mut text)
        .with_context(|| format!("failed to read {entry_name}"))?;
    CoreMetadata::parse(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_headers_and_stops_at_body() {
        let text = "Metadata-Version: 2.1\nName: Flask\nVersion: 2.3.3\n\
Requires-Dist: Werkzeug>=2.3.7\nRequires-Dist: click>=8.1.3\n\
Requires-Dist: asgiref>=3.2 ; extra == 'async'\nSummary: A simple\n  framework\n\n\
Requires-Dist: not-a-header\n";
        let meta = CoreMetadata::parse(text).expect("metadata");
        assert_eq!(meta.name, "Flask");
        assert_eq!(meta.version, "2.3.3");
        assert_eq!(
            meta.requires_dist,
            vec![
                "Werkzeug>=2.3.7",
                "click>=8.1.3",
                "asgiref>=3.2 ; extra == 'async'"
            ]
        );
    }

    #[test]
    fn missing_version_is_an_error() {
        assert!(CoreMetadata::parse("Name: demo\n").is_err());
    }
}
