use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use anyhow::{anyhow, Context, Result};
use hp_domain::normalize_dist_name;
use serde_json::json;
use tracing::debug;
use zip::ZipArchive;

use super::record::{self, RecordEntry};
use super::{InstalledDist, SitePackages, INSTALLER};
use crate::core::metadata::CoreMetadata;
use crate::core::tooling::errors::{codes, hp_error};
use crate::core::tooling::outcome::InstallUserError;

/// Unpacks `wheel` into `env` and writes `INSTALLER` plus a fresh `RECORD`.
///
/// # Errors
///
/// Returns an error when the archive is malformed, names a different
/// distribution than `expected_name`, or cannot be written.
pub(crate) fn install_wheel(
    env: &SitePackages,
    wheel: &Path,
    expected_name: &str,
) -> Result<InstalledDist> {
    let file = File::open(wheel).with_context(|| format!("failed to open {}", wheel.display()))?;
    let mut archive = ZipArchive::new(file)
        .with_context(|| format!("{} is not a valid wheel", wheel.display()))?;

    let dist_info_name = find_dist_info(&mut archive)
        .ok_or_else(|| invalid_wheel(wheel, "no .dist-info directory with METADATA"))?;
    let metadata = read_entry(&mut archive, &format!("{dist_info_name}/METADATA"))?;
    let metadata = CoreMetadata::parse(&String::from_utf8_lossy(&metadata))?;
    let name = normalize_dist_name(&metadata.name);
    if name != expected_name {
        return Err(invalid_wheel(
            wheel,
            &format!("wheel contains `{name}`, expected `{expected_name}`"),
        )
        .into());
    }
    let data_prefix = format!(
        "{}.data/",
        dist_info_name.trim_end_matches(".dist-info")
    );

    fs::create_dir_all(env.root())?;
    let mut records = Vec::new();
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        if entry.is_dir() {
            continue;
        }
        let Some(enclosed) = entry.enclosed_name().map(Path::to_path_buf) else {
            return Err(invalid_wheel(wheel, &format!("unsafe path `{}`", entry.name())).into());
        };
        let entry_name = enclosed.to_string_lossy().replace('\\', "/");
        if is_signature_or_record(&entry_name, &dist_info_name) {
            continue;
        }
        let (dest, is_script) = destination(env, &entry_name, &data_prefix, &name)
            .ok_or_else(|| invalid_wheel(wheel, &format!("unknown data scheme in `{entry_name}`")))?;

        let mut contents = Vec::new();
        entry.read_to_end(&mut contents)?;
        if is_script {
            contents = rewrite_shebang(&contents, env.interpreter());
        }
        let mode = if is_script {
            Some(0o755)
        } else {
            entry.unix_mode()
        };
        write_file(&dest, &contents, mode)?;
        records.push(RecordEntry::for_contents(
            record::relative_path(env.root(), &dest),
            &contents,
        ));
    }

    let entry_points = format!("{dist_info_name}/entry_points.txt");
    if let Ok(text) = read_entry(&mut archive, &entry_points) {
        for (script, target) in console_scripts(&String::from_utf8_lossy(&text)) {
            let Some(launcher) = launcher(env.interpreter(), &target) else {
                debug!(script = %script, target = %target, "skipping entry point without module:attr");
                continue;
            };
            let dest = env.scripts().join(&script);
            write_file(&dest, launcher.as_bytes(), Some(0o755))?;
            records.push(RecordEntry::for_contents(
                record::relative_path(env.root(), &dest),
                launcher.as_bytes(),
            ));
        }
    }

    let dist_info = env.root().join(&dist_info_name);
    let installer = format!("{INSTALLER}\n");
    write_file(&dist_info.join("INSTALLER"), installer.as_bytes(), None)?;
    records.push(RecordEntry::for_contents(
        format!("{dist_info_name}/INSTALLER"),
        installer.as_bytes(),
    ));
    records.push(RecordEntry::bare(format!("{dist_info_name}/RECORD")));
    fs::write(dist_info.join("RECORD"), record::render(&records))?;

    debug!(name = %name, version = %metadata.version, files = records.len(), "installed wheel");
    Ok(InstalledDist {
        name,
        version: metadata.version,
        dist_info,
    })
}

fn find_dist_info(archive: &mut ZipArchive<File>) -> Option<String> {
    let mut candidates: Vec<String> = archive
        .file_names()
        .filter_map(|name| {
            let (dir, file) = name.split_once('/')?;
            (dir.ends_with(".dist-info") && file == "METADATA").then(|| dir.to_string())
        })
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

fn read_entry(archive: &mut ZipArchive<File>, name: &str) -> Result<Vec<u8>> {
    let mut entry = archive
        .by_name(name)
        .map_err(|err| anyhow!("{name}: {err}"))?;
    let mut buf = Vec::new();
    entry.read_to_end(&mut buf)?;
    Ok(buf)
}

fn is_signature_or_record(entry_name: &str, dist_info: &str) -> bool {
    let Some(file) = entry_name
        .strip_prefix(dist_info)
        .and_then(|rest| rest.strip_prefix('/'))
    else {
        return false;
    };
    matches!(file, "RECORD" | "RECORD.jws" | "RECORD.p7s" | "INSTALLER")
}

/// Maps an archive path to its install location; `.data/<scheme>/` entries
/// are redirected per scheme.
fn destination(
    env: &SitePackages,
    entry_name: &str,
    data_prefix: &str,
    dist_name: &str,
) -> Option<(PathBuf, bool)> {
    let Some(rest) = entry_name.strip_prefix(data_prefix) else {
        return Some((env.root().join(entry_name), false));
    };
    let (scheme, path) = rest.split_once('/')?;
    match scheme {
        "purelib" | "platlib" => Some((env.root().join(path), false)),
        "scripts" => Some((env.scripts().join(path), true)),
        "data" => Some((env.data().join(path), false)),
        "headers" => Some((
            env.data().join("include").join(dist_name).join(path),
            false,
        )),
        _ => None,
    }
}

fn rewrite_shebang(contents: &[u8], interpreter: &str) -> Vec<u8> {
    let Some(rest) = contents.strip_prefix(b"#!python") else {
        return contents.to_vec();
    };
    let line_end = rest.iter().position(|b| *b == b'\n').unwrap_or(rest.len());
    let mut out = format!("#!{interpreter}").into_bytes();
    out.extend_from_slice(&rest[line_end..]);
    out
}

fn write_file(dest: &Path, contents: &[u8], mode: Option<u32>) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::symlink_metadata(dest) {
        Ok(_) => fs::remove_file(dest)?,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }
    fs::write(dest, contents).with_context(|| format!("failed to write {}", dest.display()))?;
    #[cfg(unix)]
    {
        if let Some(mode) = mode {
            fs::set_permissions(dest, fs::Permissions::from_mode(mode & 0o777))?;
        }
    }
    #[cfg(not(unix))]
    let _ = mode;
    Ok(())
}

/// `(name, module:attr)` pairs from the `[console_scripts]` and
/// `[gui_scripts]` sections.
fn console_scripts(text: &str) -> Vec<(String, String)> {
    let mut scripts = Vec::new();
    let mut in_scripts = false;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if line.starts_with('[') {
            in_scripts = matches!(line, "[console_scripts]" | "[gui_scripts]");
            continue;
        }
        if !in_scripts {
            continue;
        }
        if let Some((name, target)) = line.split_once('=') {
            scripts.push((name.trim().to_string(), target.trim().to_string()));
        }
    }
    scripts
}

fn launcher(interpreter: &str, target: &str) -> Option<String> {
    let target = target.split('[').next().unwrap_or(target).trim();
    let (module, attr) = target.split_once(':')?;
    let (module, attr) = (module.trim(), attr.trim());
    if module.is_empty() || attr.is_empty() {
        return None;
    }
    let head = attr.split('.').next().unwrap_or(attr);
    Some(format!(
        "#!{interpreter}\n\
         # -*- coding: utf-8 -*-\n\
         import re\n\
         import sys\n\
         from {module} import {head}\n\
         if __name__ == \"__main__\":\n    \
         sys.argv[0] = re.sub(r\"(-script\\.pyw|\\.exe)?$\", \"\", sys.argv[0])\n    \
         sys.exit({attr}())\n"
    ))
}

fn invalid_wheel(wheel: &Path, reason: &str) -> InstallUserError {
    hp_error(
        codes::INSTALL,
        format!("invalid wheel {}", wheel.display()),
        json!({
            "reason": "invalid_wheel",
            "wheel": wheel.display().to_string(),
            "issues": [reason],
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::TestWheel;
    use tempfile::tempdir;

    #[test]
    fn installs_package_with_console_script() {
        let wheels = tempdir().expect("wheels");
        let site = tempdir().expect("site");
        let wheel = TestWheel::new("demo-tool", "1.2")
            .file("demo_tool/cli.py", "def main():\n    return 0\n")
            .console_script("demo", "demo_tool.cli:main")
            .write_to(wheels.path());
        let env = SitePackages::target_dir(site.path());

        let dist = install_wheel(&env, &wheel, "demo-tool").expect("install");
        assert_eq!(dist.name, "demo-tool");
        assert_eq!(dist.version, "1.2");
        assert!(site.path().join("demo_tool/cli.py").exists());
        assert_eq!(
            fs::read_to_string(dist.dist_info.join("INSTALLER")).expect("installer"),
            "hp\n"
        );

        let launcher = fs::read_to_string(site.path().join("bin/demo")).expect("launcher");
        assert!(launcher.starts_with("#!/usr/bin/env python3\n"));
        assert!(launcher.contains("from demo_tool.cli import main"));

        let record = fs::read_to_string(dist.dist_info.join("RECORD")).expect("record");
        assert!(record.contains("bin/demo,sha256="));
        assert!(record.contains("demo_tool/cli.py,sha256="));
        assert!(record.contains("demo_tool-1.2.dist-info/RECORD,,"));
    }

    #[test]
    fn data_scripts_get_interpreter_shebang() {
        let wheels = tempdir().expect("wheels");
        let stage = tempdir().expect("stage");
        let wheel = TestWheel::new("scripted", "0.1")
            .file("scripted-0.1.data/scripts/run-it", "#!python\nprint('hi')\n")
            .file("scripted-0.1.data/data/share/scripted/notes.txt", "notes")
            .write_to(wheels.path());
        let target = hp_domain::TargetEnvironment::new("3.11", "linux/amd64").expect("target");
        let env = SitePackages::image_prefix(stage.path(), &target);

        install_wheel(&env, &wheel, "scripted").expect("install");
        let script = stage.path().join("usr/local/bin/run-it");
        assert_eq!(
            fs::read_to_string(&script).expect("script"),
            "#!/usr/local/bin/python\nprint('hi')\n"
        );
        #[cfg(unix)]
        assert_eq!(
            fs::metadata(&script).expect("meta").permissions().mode() & 0o777,
            0o755
        );
        assert!(stage
            .path()
            .join("usr/local/share/scripted/notes.txt")
            .exists());
        assert!(!stage
            .path()
            .join("usr/local/lib/python3.11/site-packages/scripted-0.1.data")
            .exists());
    }

    #[test]
    fn rejects_wheel_for_another_distribution() {
        let wheels = tempdir().expect("wheels");
        let site = tempdir().expect("site");
        let wheel = TestWheel::new("other", "1.0").write_to(wheels.path());
        let err = install_wheel(&SitePackages::target_dir(site.path()), &wheel, "demo")
            .expect_err("mismatch");
        assert!(err.to_string().contains("invalid wheel"));
    }

    #[test]
    fn launcher_strips_extras_and_calls_dotted_attr() {
        let text = launcher("/usr/local/bin/python", "pkg.mod:App.run [cli]").expect("launcher");
        assert!(text.contains("from pkg.mod import App\n"));
        assert!(text.contains("sys.exit(App.run())"));
        assert!(launcher("/usr/local/bin/python", "pkg.mod").is_none());
    }
}
