#![allow(dead_code)]

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use assert_cmd::assert::Assert;
use assert_cmd::Command;
use serde_json::Value;
use tempfile::TempDir;
use zip::write::FileOptions;

pub struct Project {
    _temp: TempDir,
    pub root: PathBuf,
    pub cache: PathBuf,
}

impl Project {
    /// An empty build context with a find-links directory holding a small
    /// flask-like closure.
    pub fn new(prefix: &str) -> Self {
        let temp = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir()
            .expect("tempdir");
        let root = temp.path().join("context");
        let cache = temp.path().join("cache");
        fs::create_dir_all(root.join("wheels")).expect("wheels dir");
        let wheels = root.join("wheels");
        write_wheel(
            &wheels,
            "flask",
            "2.3.3",
            &["click>=8", "itsdangerous>=2; python_version >= \"3.8\""],
        );
        write_wheel(&wheels, "click", "7.1", &[]);
        write_wheel(&wheels, "click", "8.1.7", &[]);
        write_wheel(&wheels, "itsdangerous", "2.1.2", &[]);
        write_wheel(&wheels, "requests", "2.31.0", &["idna>=2.5,<4"]);
        write_wheel(&wheels, "idna", "3.6", &[]);
        Self {
            _temp: temp,
            root,
            cache,
        }
    }

    /// Writes `hp.toml` for `mode` with the local wheels as find-links.
    pub fn with_recipe(self, mode: &str) -> Self {
        self.write(
            "hp.toml",
            &format!(
                r#"[image]
name = "hpath-sim"
tag = "1.0"
base = "python:3.11-slim"
platform = "linux/amd64"

[base]
update = ["apt-get update", "apt-get -y upgrade"]

[dependencies]
mode = "{mode}"
find-links = ["wheels"]

[payload]
source = "app"
dest = "/app"

[entrypoint]
module = "restful.server"
"#
            ),
        );
        self
    }

    pub fn with_payload(self) -> Self {
        self.write("app/restful/__init__.py", "");
        self.write("app/restful/server.py", "print('hpath-sim up')\n");
        self
    }

    pub fn write(&self, rel: &str, contents: &str) {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("parent dir");
        }
        fs::write(path, contents).expect("write file");
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.root.join(rel)).expect("read file")
    }

    /// `hp` run inside the context, offline, with an isolated cache.
    pub fn hp(&self) -> Command {
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("hp");
        cmd.current_dir(&self.root)
            .env("HP_CACHE_DIR", &self.cache)
            .env("HP_ONLINE", "0")
            .env("NO_COLOR", "1")
            .env("SOURCE_DATE_EPOCH", "0")
            .env_remove("HP_INDEX_URL")
            .env_remove("HP_FIND_LINKS")
            .env_remove("HP_CONTAINER_BACKEND");
        cmd
    }
}

pub fn write_wheel(dir: &Path, name: &str, version: &str, requires: &[&str]) -> PathBuf {
    let path = dir.join(format!("{name}-{version}-py3-none-any.whl"));
    let file = File::create(&path).expect("create wheel");
    let mut writer = zip::ZipWriter::new(file);
    let options = FileOptions::default();
    let dist_info = format!("{name}-{version}.dist-info");
    let mut metadata = format!("Metadata-Version: 2.1\nName: {name}\nVersion: {version}\n");
    for requirement in requires {
        metadata.push_str(&format!("Requires-Dist: {requirement}\n"));
    }
    let entries = [
        (format!("{name}/__init__.py"), format!("VERSION = \"{version}\"\n")),
        (format!("{dist_info}/METADATA"), metadata),
        (
            format!("{dist_info}/WHEEL"),
            "Wheel-Version: 1.0\nRoot-Is-Purelib: true\nTag: py3-none-any\n".to_string(),
        ),
        (
            format!("{dist_info}/RECORD"),
            format!("{name}/__init__.py,,\n{dist_info}/METADATA,,\n{dist_info}/WHEEL,,\n{dist_info}/RECORD,,\n"),
        ),
    ];
    for (entry, contents) in entries {
        writer.start_file(entry, options).expect("start entry");
        writer.write_all(contents.as_bytes()).expect("write entry");
    }
    writer.finish().expect("finish wheel");
    path
}

/// A shell script speaking enough of the docker CLI for `hp build`.
#[cfg(unix)]
pub fn fake_backend(dir: &Path, update_exit: u8) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let rootfs = dir.join("base-rootfs.tar");
    {
        let file = File::create(&rootfs).expect("rootfs");
        let mut builder = tar::Builder::new(file);
        let mut header = tar::Header::new_gnu();
        let body = b"NAME=\"Debian GNU/Linux\"\n";
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_cksum();
        builder
            .append_data(&mut header, "etc/os-release", &body[..])
            .expect("append");
        builder.finish().expect("finish rootfs");
    }
    let script = dir.join("fake-docker");
    fs::write(
        &script,
        format!(
            "#!/bin/sh\n\
             echo \"$@\" >> '{log}'\n\
             case \"$1\" in\n\
             create) echo 0f1e2d3c ;;\n\
             wait) echo {update_exit} ;;\n\
             export) cp '{rootfs}' \"$3\" ;;\n\
             logs) echo 'E: Unable to fetch some archives' ;;\n\
             esac\n",
            log = dir.join("backend.log").display(),
            rootfs = rootfs.display(),
        ),
    )
    .expect("script");
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).expect("chmod");
    script
}

pub fn parse_json(assert: &Assert) -> Value {
    serde_json::from_slice(&assert.get_output().stdout).expect("valid json")
}
