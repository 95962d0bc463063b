//! `RECORD` files: one CSV row per installed path.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use sha2::{Digest, Sha256};

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct RecordEntry {
    pub(crate) path: String,
    pub(crate) hash: Option<String>,
    pub(crate) size: Option<u64>,
}

impl RecordEntry {
    pub(crate) fn for_contents(path: String, contents: &[u8]) -> Self {
        Self {
            path,
            hash: Some(format!(
                "sha256={}",
                URL_SAFE_NO_PAD.encode(Sha256::digest(contents))
            )),
            size: Some(contents.len() as u64),
        }
    }

    pub(crate) fn bare(path: String) -> Self {
        Self {
            path,
            hash: None,
            size: None,
        }
    }

    fn to_line(&self) -> String {
        format!(
            "{},{},{}",
            quote(&self.path),
            self.hash.as_deref().unwrap_or_default(),
            self.size.map(|size| size.to_string()).unwrap_or_default()
        )
    }
}

pub(crate) fn render(entries: &[RecordEntry]) -> String {
    let mut lines: Vec<String> = entries.iter().map(RecordEntry::to_line).collect();
    lines.sort();
    lines.dedup();
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Paths listed in a RECORD, in file order.
pub(crate) fn parse_paths(text: &str) -> Vec<String> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(first_field)
        .collect()
}

fn first_field(line: &str) -> Option<String> {
    let Some(rest) = line.strip_prefix('"') else {
        return line.split(',').next().map(ToString::to_string);
    };
    let mut out = String::new();
    let mut chars = rest.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '"' {
            if chars.peek() == Some(&'"') {
                out.push('"');
                chars.next();
            } else {
                return Some(out);
            }
        } else {
            out.push(c);
        }
    }
    None
}

fn quote(path: &str) -> String {
    if path.contains([',', '"']) {
        format!("\"{}\"", path.replace('"', "\"\""))
    } else {
        path.to_string()
    }
}

/// `path` relative to `root` with `/` separators, climbing with `..` when
/// `path` lies outside `root`.
pub(crate) fn relative_path(root: &Path, path: &Path) -> String {
    let mut base: PathBuf = root.to_path_buf();
    let mut ups = 0;
    loop {
        if let Ok(rel) = path.strip_prefix(&base) {
            let mut parts: Vec<String> = vec!["..".to_string(); ups];
            parts.extend(
                rel.components()
                    .map(|c| c.as_os_str().to_string_lossy().to_string()),
            );
            return parts.join("/");
        }
        if !base.pop() {
            return path.to_string_lossy().replace('\\', "/");
        }
        ups += 1;
    }
}
