use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use indexmap::IndexMap;
use pep440_rs::{Operator, VersionSpecifiers};
use pep508_rs::MarkerEnvironment;
use serde::Serialize;

use super::{passthrough_option, ManifestError, Origin, RequirementEntry};

/// One exact pin of a lock manifest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PinnedPackage {
    pub name: String,
    pub version: String,
    pub extras: Vec<String>,
    pub marker: Option<String>,
    pub hashes: Vec<String>,
    pub via: Vec<String>,
    pub origin: Origin,
}

impl PinnedPackage {
    pub fn requirement(&self) -> String {
        let mut out = self.name.clone();
        if !self.extras.is_empty() {
            out.push('[');
            out.push_str(&self.extras.join(","));
            out.push(']');
        }
        out.push_str("==");
        out.push_str(&self.version);
        out
    }

    /// Whether the pin applies to the given target environment.
    pub fn applies_to(&self, env: &MarkerEnvironment) -> bool {
        let Some(marker) = &self.marker else {
            return true;
        };
        let text = format!("{}; {marker}", self.requirement());
        match text.parse::<pep508_rs::Requirement>() {
            Ok(requirement) => requirement.evaluate_markers(env, &[]),
            Err(_) => true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct LockHeader {
    pub tool_version: String,
    pub command: String,
}

/// Fully pinned, transitively resolved dependency list.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LockManifest {
    pub pins: Vec<PinnedPackage>,
    /// Index options (`--index-url`, `--find-links`, ...) in file order.
    pub options: Vec<String>,
}

impl LockManifest {
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let contents = fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let label = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        Self::parse(&contents, &label)
    }

    pub fn parse(contents: &str, label: &str) -> Result<Self, ManifestError> {
        let mut pins: IndexMap<String, PinnedPackage> = IndexMap::new();
        let mut options = Vec::new();
        let mut current: Option<String> = None;
        let mut via_block = false;
        let mut buffer = String::new();
        let mut start = 0;

        for (idx, raw) in contents.lines().enumerate() {
            let trimmed = raw.trim();
            if buffer.is_empty() {
                if let Some(comment) = trimmed.strip_prefix('#') {
                    let comment = comment.trim();
                    if let Some(pin) = current.as_ref().and_then(|name| pins.get_mut(name)) {
                        if comment == "via" {
                            via_block = true;
                        } else if let Some(parent) = comment.strip_prefix("via ") {
                            pin.via.push(parent.trim().to_string());
                            via_block = false;
                        } else if via_block && !comment.is_empty() {
                            pin.via.push(comment.to_string());
                        } else {
                            via_block = false;
                        }
                    }
                    continue;
                }
                if trimmed.is_empty() {
                    continue;
                }
                start = idx + 1;
            }
            let content = super::strip_comment(raw).trim_end();
            if let Some(head) = content.strip_suffix('\\') {
                buffer.push_str(head);
                buffer.push(' ');
                continue;
            }
            buffer.push_str(content);
            let line = std::mem::take(&mut buffer);
            let origin = Origin::new(label, start);
            if line.trim_start().starts_with('-') {
                options.push(passthrough_option(&line, origin)?);
                current = None;
                via_block = false;
                continue;
            }
            let pin = parse_pin(&line, origin.clone())?;
            if pins.contains_key(&pin.name) {
                return Err(ManifestError::DuplicatePin {
                    origin,
                    name: pin.name,
                });
            }
            via_block = false;
            current = Some(pin.name.clone());
            pins.insert(pin.name.clone(), pin);
        }
        if !buffer.trim().is_empty() {
            let origin = Origin::new(label, start);
            if buffer.trim_start().starts_with('-') {
                options.push(passthrough_option(&buffer, origin)?);
            } else {
                let pin = parse_pin(&buffer, origin)?;
                pins.insert(pin.name.clone(), pin);
            }
        }
        Ok(Self {
            pins: pins.into_values().collect(),
            options,
        })
    }

    pub fn get(&self, name: &str) -> Option<&PinnedPackage> {
        self.pins.iter().find(|pin| pin.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    /// Pins that apply to `env`, in file order.
    pub fn applicable<'a>(
        &'a self,
        env: &'a MarkerEnvironment,
    ) -> impl Iterator<Item = &'a PinnedPackage> + 'a {
        self.pins.iter().filter(move |pin| pin.applies_to(env))
    }

    /// Renders the lock deterministically: sorted pins, no timestamps.
    pub fn render(&self, header: &LockHeader) -> String {
        let mut pins = self.pins.clone();
        pins.sort_by(|a, b| a.name.cmp(&b.name));

        let mut out = String::new();
        out.push_str("#\n");
        let _ = writeln!(
            out,
            "# This file is autogenerated by hp {}",
            header.tool_version
        );
        out.push_str("# To update, run:\n#\n");
        let _ = writeln!(out, "#    {}", header.command);
        out.push_str("#\n");
        for option in &self.options {
            out.push_str(option);
            out.push('\n');
        }
        if !self.options.is_empty() {
            out.push('\n');
        }
        for pin in &pins {
            let mut head = pin.requirement();
            if let Some(marker) = &pin.marker {
                let _ = write!(head, " ; {marker}");
            }
            if pin.hashes.is_empty() {
                out.push_str(&head);
                out.push('\n');
            } else {
                let _ = writeln!(out, "{head} \\");
                let mut hashes = pin.hashes.clone();
                hashes.sort();
                for (idx, hash) in hashes.iter().enumerate() {
                    let tail = if idx + 1 == hashes.len() { "" } else { " \\" };
                    let _ = writeln!(out, "    --hash={hash}{tail}");
                }
            }
            let mut via = pin.via.clone();
            via.sort();
            via.dedup();
            match via.as_slice() {
                [] => {}
                [single] => {
                    let _ = writeln!(out, "    # via {single}");
                }
                many => {
                    out.push_str("    # via\n");
                    for parent in many {
                        let _ = writeln!(out, "    #   {parent}");
                    }
                }
            }
        }
        out
    }
}

fn parse_pin(line: &str, origin: Origin) -> Result<PinnedPackage, ManifestError> {
    let mut hashes = Vec::new();
    let mut requirement_parts = Vec::new();
    let mut tokens = line.split_whitespace().peekable();
    while let Some(token) = tokens.next() {
        if let Some(value) = token.strip_prefix("--hash=") {
            hashes.push(value.to_string());
        } else if token == "--hash" {
            let Some(value) = tokens.next() else {
                return Err(ManifestError::MissingOptionValue {
                    origin,
                    option: token.to_string(),
                });
            };
            hashes.push(value.to_string());
        } else if token.starts_with("--") {
            return Err(ManifestError::UnsupportedOption {
                origin,
                option: token.to_string(),
            });
        } else {
            requirement_parts.push(token);
        }
    }
    let text = requirement_parts.join(" ");
    let entry = RequirementEntry::parse(&text, origin.clone())?;
    let Some(version) = entry.specifiers.as_deref().and_then(exact_version) else {
        return Err(ManifestError::NotPinned {
            origin,
            line: text,
        });
    };
    Ok(PinnedPackage {
        name: entry.name,
        version,
        extras: entry.extras,
        marker: entry.marker,
        hashes,
        via: Vec::new(),
        origin,
    })
}

/// Returns the version of a single `==`/`===` specifier.
pub(crate) fn exact_version(specifiers: &str) -> Option<String> {
    let parsed = VersionSpecifiers::from_str(specifiers).ok()?;
    let mut iter = parsed.iter();
    let first = iter.next()?;
    if iter.next().is_some() {
        return None;
    }
    match first.operator() {
        Operator::Equal | Operator::ExactEqual => Some(first.version().to_string()),
        _ => None,
    }
}
