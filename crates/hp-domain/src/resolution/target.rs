use std::str::FromStr;

use pep508_rs::{MarkerEnvironment, StringVersion};

use super::source::WheelTags;

/// Newest glibc assumed for `manylinux_X_Y` wheels on Debian-based images.
const GLIBC: (u32, u32) = (2, 36);

#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    #[error("`{0}` is not a `major.minor` Python version")]
    InvalidPython(String),
    #[error("unsupported platform `{0}` (expected linux/amd64 or linux/arm64)")]
    UnsupportedPlatform(String),
}

/// The interpreter and platform the image runs; markers and wheel tags are
/// evaluated against this, never against the build host.
#[derive(Clone, Debug)]
pub struct TargetEnvironment {
    major: u32,
    minor: u32,
    machine: String,
    markers: MarkerEnvironment,
}

impl TargetEnvironment {
    pub fn new(python: &str, platform: &str) -> Result<Self, TargetError> {
        let (major, minor) = parse_python(python)?;
        let machine = match platform.trim().to_ascii_lowercase().as_str() {
            "linux/amd64" | "linux/x86_64" => "x86_64".to_string(),
            "linux/arm64" | "linux/arm64/v8" | "linux/aarch64" => "aarch64".to_string(),
            _ => return Err(TargetError::UnsupportedPlatform(platform.to_string())),
        };
        let short = format!("{major}.{minor}");
        let full = format!("{major}.{minor}.0");
        let version = |value: &str| {
            StringVersion::from_str(value).map_err(|_| TargetError::InvalidPython(python.into()))
        };
        let markers = MarkerEnvironment {
            implementation_name: "cpython".into(),
            implementation_version: version(&full)?,
            os_name: "posix".into(),
            platform_machine: machine.clone(),
            platform_python_implementation: "CPython".into(),
            platform_release: String::new(),
            platform_system: "Linux".into(),
            platform_version: String::new(),
            python_full_version: version(&full)?,
            python_version: version(&short)?,
            sys_platform: "linux".into(),
        };
        Ok(Self {
            major,
            minor,
            machine,
            markers,
        })
    }

    pub fn python_version(&self) -> String {
        format!("{}.{}", self.major, self.minor)
    }

    pub fn machine(&self) -> &str {
        &self.machine
    }

    pub fn marker_environment(&self) -> &MarkerEnvironment {
        &self.markers
    }

    /// `site-packages` relative to the image root.
    pub fn site_packages_rel(&self) -> String {
        format!(
            "usr/local/lib/python{}.{}/site-packages",
            self.major, self.minor
        )
    }

    /// Ranks a wheel for this target; `None` means it cannot be installed.
    /// Higher is better: platform-specific beats pure, `cpXY` beats `abi3`.
    pub fn wheel_score(&self, tags: &WheelTags) -> Option<u32> {
        let mut best = None;
        for python in &tags.python {
            let Some(py_score) = self.python_score(python, &tags.abi) else {
                continue;
            };
            for abi in &tags.abi {
                let Some(abi_score) = self.abi_score(abi, python) else {
                    continue;
                };
                for platform in &tags.platform {
                    let Some(platform_score) = self.platform_score(platform) else {
                        continue;
                    };
                    let score = platform_score * 100 + abi_score * 10 + py_score;
                    best = best.max(Some(score));
                }
            }
        }
        best
    }

    fn python_score(&self, tag: &str, abis: &[String]) -> Option<u32> {
        let tag = tag.to_ascii_lowercase();
        if tag == format!("cp{}{}", self.major, self.minor) {
            return Some(3);
        }
        if tag == format!("py{}{}", self.major, self.minor) {
            return Some(2);
        }
        if tag == format!("py{}", self.major) {
            return Some(1);
        }
        // cp3N wheels built against the stable ABI load on any later 3.x.
        let abi3 = abis.iter().any(|abi| abi.eq_ignore_ascii_case("abi3"));
        if let Some(minor) = tag
            .strip_prefix(&format!("cp{}", self.major))
            .and_then(|rest| rest.parse::<u32>().ok())
        {
            if abi3 && minor <= self.minor {
                return Some(1);
            }
        }
        None
    }

    fn abi_score(&self, abi: &str, python: &str) -> Option<u32> {
        let abi = abi.to_ascii_lowercase();
        if abi == format!("cp{}{}", self.major, self.minor) {
            return Some(3);
        }
        if abi == "abi3" && python.to_ascii_lowercase().starts_with("cp") {
            return Some(2);
        }
        (abi == "none").then_some(1)
    }

    fn platform_score(&self, platform: &str) -> Option<u32> {
        let platform = platform.to_ascii_lowercase();
        if platform == "any" {
            return Some(1);
        }
        let arch = platform.strip_suffix(self.machine.as_str())?;
        let arch = arch.strip_suffix('_')?;
        let glibc = match arch {
            "linux" => return Some(2),
            "manylinux1" => (2, 5),
            "manylinux2010" => (2, 12),
            "manylinux2014" => (2, 17),
            other => {
                let rest = other.strip_prefix("manylinux_")?;
                let (major, minor) = rest.split_once('_')?;
                (major.parse().ok()?, minor.parse().ok()?)
            }
        };
        (glibc <= GLIBC).then_some(3)
    }
}

fn parse_python(value: &str) -> Result<(u32, u32), TargetError> {
    let invalid = || TargetError::InvalidPython(value.to_string());
    let (major, minor) = value.trim().split_once('.').ok_or_else(invalid)?;
    let major = major.parse::<u32>().map_err(|_| invalid())?;
    let minor = minor.parse::<u32>().map_err(|_| invalid())?;
    if major < 3 {
        return Err(invalid());
    }
    Ok((major, minor))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> TargetEnvironment {
        TargetEnvironment::new("3.11", "linux/amd64").expect("target")
    }

    fn score(filename: &str) -> Option<u32> {
        target().wheel_score(&WheelTags::parse(filename).expect("wheel name"))
    }

    #[test]
    fn builds_marker_environment_for_target() {
        let target = target();
        let env = target.marker_environment();
        assert_eq!(env.platform_machine, "x86_64");
        assert_eq!(env.sys_platform, "linux");
        assert_eq!(target.python_version(), "3.11");
        assert_eq!(
            target.site_packages_rel(),
            "usr/local/lib/python3.11/site-packages"
        );
    }

    #[test]
    fn rejects_bad_python_and_platform() {
        assert!(matches!(
            TargetEnvironment::new("3", "linux/amd64"),
            Err(TargetError::InvalidPython(_))
        ));
        assert!(matches!(
            TargetEnvironment::new("3.11", "windows/amd64"),
            Err(TargetError::UnsupportedPlatform(_))
        ));
    }

    #[test]
    fn prefers_platform_wheels_over_pure() {
        let pure = score("demo-1.0-py3-none-any.whl").expect("pure wheel");
        let native = score("demo-1.0-cp311-cp311-manylinux_2_17_x86_64.whl").expect("native");
        let abi3 = score("demo-1.0-cp38-abi3-manylinux2014_x86_64.whl").expect("abi3");
        assert!(native > abi3);
        assert!(abi3 > pure);
    }

    #[test]
    fn rejects_incompatible_wheels() {
        assert_eq!(score("demo-1.0-cp312-cp312-manylinux_2_17_x86_64.whl"), None);
        assert_eq!(score("demo-1.0-cp311-cp311-manylinux_2_17_aarch64.whl"), None);
        assert_eq!(score("demo-1.0-cp311-cp311-musllinux_1_1_x86_64.whl"), None);
        assert_eq!(score("demo-1.0-cp311-cp311-manylinux_2_39_x86_64.whl"), None);
        assert_eq!(score("demo-1.0-py2-none-any.whl"), None);
        assert_eq!(score("demo-1.0-cp311-cp311-win_amd64.whl"), None);
    }

    #[test]
    fn accepts_compressed_tag_sets() {
        assert!(score("demo-1.0-cp311-cp311-manylinux_2_5_x86_64.manylinux1_x86_64.whl").is_some());
        assert!(score("demo-1.0-py2.py3-none-any.whl").is_some());
    }
}
