//! Tiny wheels built on the fly for tests.

use std::fmt::Write as _;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use zip::write::FileOptions;

pub(crate) struct TestWheel {
    name: String,
    version: String,
    tag: String,
    requires: Vec<String>,
    files: Vec<(String, Vec<u8>)>,
    scripts: Vec<(String, String)>,
}

impl TestWheel {
    pub(crate) fn new(name: &str, version: &str) -> Self {
        let module = name.replace('-', "_").to_ascii_lowercase();
        Self {
            name: name.to_string(),
            version: version.to_string(),
            tag: "py3-none-any".to_string(),
            requires: Vec::new(),
            files: vec![(
                format!("{module}/__init__.py"),
                format!("__version__ = \"{version}\"\n").into_bytes(),
            )],
            scripts: Vec::new(),
        }
    }

    pub(crate) fn requires(mut self, requirement: &str) -> Self {
        self.requires.push(requirement.to_string());
        self
    }

    pub(crate) fn tag(mut self, tag: &str) -> Self {
        self.tag = tag.to_string();
        self
    }

    pub(crate) fn file(mut self, path: &str, contents: &str) -> Self {
        self.files.push((path.to_string(), contents.as_bytes().to_vec()));
        self
    }

    pub(crate) fn console_script(mut self, name: &str, target: &str) -> Self {
        self.scripts.push((name.to_string(), target.to_string()));
        self
    }

    pub(crate) fn filename(&self) -> String {
        format!("{}-{}-{}.whl", self.stem(), self.version, self.tag)
    }

    fn stem(&self) -> String {
        self.name.replace('-', "_")
    }

    pub(crate) fn write_to(&self, dir: &Path) -> PathBuf {
        let path = dir.join(self.filename());
        let file = File::create(&path).expect("create wheel");
        let mut writer = zip::ZipWriter::new(file);
        let options = FileOptions::default();
        let dist_info = format!("{}-{}.dist-info", self.stem(), self.version);

        let mut metadata = format!(
            "Metadata-Version: 2.1\nName: {}\nVersion: {}\n",
            self.name, self.version
        );
        for requirement in &self.requires {
            let _ = writeln!(metadata, "Requires-Dist: {requirement}");
        }
        let mut entries = self.files.clone();
        entries.push((format!("{dist_info}/METADATA"), metadata.into_bytes()));
        entries.push((
            format!("{dist_info}/WHEEL"),
            b"Wheel-Version: 1.0\nGenerator: hp-tests\nRoot-Is-Purelib: true\nTag: py3-none-any\n"
                .to_vec(),
        ));
        if !self.scripts.is_empty() {
            let mut text = String::from("[console_scripts]\n");
            for (name, target) in &self.scripts {
                let _ = writeln!(text, "{name} = {target}");
            }
            entries.push((format!("{dist_info}/entry_points.txt"), text.into_bytes()));
        }
        let mut record = String::new();
        for (path, _) in &entries {
            let _ = writeln!(record, "{path},,");
        }
        let _ = writeln!(record, "{dist_info}/RECORD,,");
        entries.push((format!("{dist_info}/RECORD"), record.into_bytes()));

        for (path, contents) in entries {
            writer.start_file(path, options).expect("start entry");
            writer.write_all(&contents).expect("write entry");
        }
        writer.finish().expect("finish wheel");
        path
    }
}
