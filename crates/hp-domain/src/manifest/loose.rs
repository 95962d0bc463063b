use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::{
    logical_lines, passthrough_option, split_option, ManifestError, Origin, RequirementEntry,
};

/// Human-authored dependency list with range constraints.
#[derive(Clone, Debug, Default, Serialize)]
pub struct LooseManifest {
    pub path: PathBuf,
    pub requirements: Vec<RequirementEntry>,
    pub constraints: Vec<RequirementEntry>,
    pub options: Vec<String>,
}

impl LooseManifest {
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let mut manifest = Self {
            path: path.to_path_buf(),
            ..Self::default()
        };
        let mut stack = Vec::new();
        manifest.include(path, &base, &mut stack, false, None)?;
        Ok(manifest)
    }

    /// Parses manifest text that has no include directives to follow.
    pub fn parse(contents: &str, label: &str) -> Result<Self, ManifestError> {
        let mut manifest = Self {
            path: PathBuf::from(label),
            ..Self::default()
        };
        for (line_no, line) in logical_lines(contents) {
            let origin = Origin::new(label, line_no);
            if line.starts_with('-') {
                if include_target(&line).is_some() {
                    return Err(ManifestError::UnsupportedOption {
                        origin,
                        option: line,
                    });
                }
                manifest.record_option(&line, origin)?;
                continue;
            }
            manifest
                .requirements
                .push(RequirementEntry::parse(&line, origin)?);
        }
        Ok(manifest)
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// Label used for `# via` annotations of direct requirements.
    pub fn label(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    fn include(
        &mut self,
        path: &Path,
        base: &Path,
        stack: &mut Vec<PathBuf>,
        as_constraints: bool,
        included_from: Option<&Origin>,
    ) -> Result<(), ManifestError> {
        let canonical = fs::canonicalize(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if stack.contains(&canonical) {
            return Err(ManifestError::IncludeCycle {
                origin: included_from
                    .cloned()
                    .unwrap_or_else(|| Origin::new(path.display().to_string(), 0)),
                path: path.to_path_buf(),
            });
        }
        let contents = fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let label = path
            .strip_prefix(base)
            .unwrap_or(path)
            .display()
            .to_string();
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        stack.push(canonical);
        for (line_no, line) in logical_lines(&contents) {
            let origin = Origin::new(label.clone(), line_no);
            if line.starts_with('-') {
                if let Some((target, constraint)) = include_target(&line) {
                    let Some(target) = target else {
                        return Err(ManifestError::MissingOptionValue {
                            origin,
                            option: line,
                        });
                    };
                    let nested = dir.join(target);
                    self.include(
                        &nested,
                        base,
                        stack,
                        as_constraints || constraint,
                        Some(&origin),
                    )?;
                } else {
                    self.record_option(&line, origin)?;
                }
                continue;
            }
            let entry = RequirementEntry::parse(&line, origin)?;
            if as_constraints {
                self.constraints.push(entry);
            } else {
                self.requirements.push(entry);
            }
        }
        stack.pop();
        Ok(())
    }

    fn record_option(&mut self, line: &str, origin: Origin) -> Result<(), ManifestError> {
        self.options.push(passthrough_option(line, origin)?);
        Ok(())
    }
}

/// Returns the include target and whether it is a constraints file.
fn include_target(line: &str) -> Option<(Option<&str>, bool)> {
    if let Some(target) = split_option(line, "-r", "--requirement") {
        return Some((target, false));
    }
    split_option(line, "-c", "--constraint").map(|target| (target, true))
}
