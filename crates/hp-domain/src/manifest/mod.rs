//! Loose (`requirements.in`) and lock (`requirements.txt`) dependency manifests.

use std::fmt;
use std::path::PathBuf;

use pep508_rs::{Requirement as PepRequirement, VersionOrUrl};
use serde::Serialize;

use crate::name::{canonical_extras, normalize_dist_name};

mod lock;
mod loose;

pub use lock::{LockHeader, LockManifest, PinnedPackage};
pub use loose::LooseManifest;

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{origin}: invalid requirement `{line}`: {reason}")]
    InvalidRequirement {
        origin: Origin,
        line: String,
        reason: String,
    },
    #[error("{origin}: URL requirements are not supported: `{line}`")]
    UrlRequirement { origin: Origin, line: String },
    #[error("{origin}: `{line}` is not pinned to an exact version")]
    NotPinned { origin: Origin, line: String },
    #[error("{origin}: `{name}` is pinned more than once")]
    DuplicatePin { origin: Origin, name: String },
    #[error("{origin}: unsupported option `{option}`")]
    UnsupportedOption { origin: Origin, option: String },
    #[error("{origin}: `{option}` expects a value")]
    MissingOptionValue { origin: Origin, option: String },
    #[error("{origin}: include cycle through {}", path.display())]
    IncludeCycle { origin: Origin, path: PathBuf },
}

impl ManifestError {
    pub fn origin(&self) -> Option<&Origin> {
        match self {
            Self::Io { .. } => None,
            Self::InvalidRequirement { origin, .. }
            | Self::UrlRequirement { origin, .. }
            | Self::NotPinned { origin, .. }
            | Self::DuplicatePin { origin, .. }
            | Self::UnsupportedOption { origin, .. }
            | Self::MissingOptionValue { origin, .. }
            | Self::IncludeCycle { origin, .. } => Some(origin),
        }
    }
}

/// Option lines that are recorded verbatim but not interpreted.
const PASSTHROUGH_OPTIONS: &[&str] = &[
    "--index-url",
    "-i",
    "--extra-index-url",
    "--find-links",
    "-f",
    "--trusted-host",
    "--pre",
    "--no-binary",
    "--only-binary",
];

/// Returns `line` if it is an option both manifests carry along unread.
pub(crate) fn passthrough_option(line: &str, origin: Origin) -> Result<String, ManifestError> {
    let line = line.trim();
    let flag = line
        .split(|c: char| c == '=' || c.is_whitespace())
        .next()
        .unwrap_or(line);
    if PASSTHROUGH_OPTIONS.contains(&flag) {
        return Ok(line.to_string());
    }
    Err(ManifestError::UnsupportedOption {
        origin,
        option: line.to_string(),
    })
}

/// Where a manifest entry came from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Origin {
    pub file: String,
    pub line: usize,
}

impl Origin {
    pub fn new(file: impl Into<String>, line: usize) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// A single parsed PEP 508 requirement with its origin.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RequirementEntry {
    pub text: String,
    pub name: String,
    pub extras: Vec<String>,
    pub specifiers: Option<String>,
    pub marker: Option<String>,
    pub origin: Origin,
}

impl RequirementEntry {
    pub fn parse(line: &str, origin: Origin) -> Result<Self, ManifestError> {
        let requirement = line.parse::<PepRequirement>().map_err(|err| {
            ManifestError::InvalidRequirement {
                origin: origin.clone(),
                line: line.to_string(),
                reason: err.to_string(),
            }
        })?;
        let specifiers = match requirement.version_or_url.as_ref() {
            Some(VersionOrUrl::VersionSpecifier(specs)) => {
                let rendered = specs.to_string();
                (!rendered.is_empty()).then_some(rendered)
            }
            Some(VersionOrUrl::Url(_)) => {
                return Err(ManifestError::UrlRequirement {
                    origin,
                    line: line.to_string(),
                })
            }
            None => None,
        };
        let extras = canonical_extras(
            &requirement
                .extras
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>(),
        );
        Ok(Self {
            text: requirement.to_string(),
            name: normalize_dist_name(requirement.name.as_ref()),
            extras,
            specifiers,
            marker: requirement.marker.as_ref().map(ToString::to_string),
            origin,
        })
    }
}

/// Joins `\` continuations and strips comments, yielding `(first_line, text)`.
fn logical_lines(contents: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    let mut buffer = String::new();
    let mut start = 0;
    for (idx, raw) in contents.lines().enumerate() {
        let line = strip_comment(raw);
        if buffer.is_empty() {
            start = idx + 1;
        }
        let trimmed = line.trim_end();
        if let Some(head) = trimmed.strip_suffix('\\') {
            buffer.push_str(head);
            buffer.push(' ');
            continue;
        }
        buffer.push_str(trimmed);
        let joined = buffer.split_whitespace().collect::<Vec<_>>().join(" ");
        if !joined.is_empty() {
            out.push((start, joined));
        }
        buffer.clear();
    }
    let joined = buffer.split_whitespace().collect::<Vec<_>>().join(" ");
    if !joined.is_empty() {
        out.push((start, joined));
    }
    out
}

fn strip_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    for (idx, byte) in bytes.iter().enumerate() {
        if *byte == b'#' && (idx == 0 || bytes[idx - 1].is_ascii_whitespace()) {
            return &line[..idx];
        }
    }
    line
}

/// Splits `-r file`, `-rfile`, `--requirement file` and `--requirement=file`.
fn split_option<'a>(line: &'a str, short: &str, long: &str) -> Option<Option<&'a str>> {
    let value = |rest: &'a str| {
        let rest = rest.trim_start_matches('=').trim();
        (!rest.is_empty()).then_some(rest)
    };
    if let Some(rest) = line.strip_prefix(long) {
        if rest.is_empty() || rest.starts_with([' ', '=']) {
            return Some(value(rest));
        }
        return None;
    }
    line.strip_prefix(short).map(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_continuations_and_strips_comments() {
        let contents = "# header\nflask>=2 \\\n  ,<3  # web\n\nrequests\n";
        let lines = logical_lines(contents);
        assert_eq!(
            lines,
            vec![(2, "flask>=2 ,<3".to_string()), (5, "requests".to_string())]
        );
    }

    #[test]
    fn hash_inside_token_is_not_a_comment() {
        assert_eq!(strip_comment("pkg@https://x/y#egg=pkg"), "pkg@https://x/y#egg=pkg");
        assert_eq!(strip_comment("pkg # note"), "pkg ");
    }

    #[test]
    fn parses_requirement_fields() {
        let entry = RequirementEntry::parse(
            "Requests[Socks,security]>=2.31 ; python_version >= '3.8'",
            Origin::new("requirements.in", 3),
        )
        .expect("valid requirement");
        assert_eq!(entry.name, "requests");
        assert_eq!(entry.extras, vec!["security", "socks"]);
        assert_eq!(entry.specifiers.as_deref(), Some(">=2.31"));
        assert!(entry
            .marker
            .as_deref()
            .is_some_and(|m| m.contains("python_version")));
    }

    #[test]
    fn rejects_url_requirements() {
        let err = RequirementEntry::parse(
            "demo @ https://example.invalid/demo-1.0.tar.gz",
            Origin::new("requirements.in", 1),
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::UrlRequirement { .. }));
    }

    #[test]
    fn splits_option_forms() {
        assert_eq!(split_option("-r base.in", "-r", "--requirement"), Some(Some("base.in")));
        assert_eq!(split_option("-rbase.in", "-r", "--requirement"), Some(Some("base.in")));
        assert_eq!(
            split_option("--requirement=base.in", "-r", "--requirement"),
            Some(Some("base.in"))
        );
        assert_eq!(split_option("-r", "-r", "--requirement"), Some(None));
        assert_eq!(split_option("requests", "-r", "--requirement"), None);
    }
}
