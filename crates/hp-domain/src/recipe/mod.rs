//! The `hp.toml` build recipe.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use toml_edit::{Array, DocumentMut, Item, Table, Value as TomlValue};

use crate::resolution::{TargetEnvironment, TargetError};

mod dockerfile;

pub use dockerfile::render_dockerfile;

pub const DEFAULT_RECIPE_FILE: &str = "hp.toml";
pub const DEFAULT_BASE_IMAGE: &str = "python:3.11-slim";
pub const DEFAULT_SERVER_MODULE: &str = "restful.server";
pub const DEFAULT_INDEX_URL: &str = "https://pypi.org/pypi";

#[derive(Debug, thiserror::Error)]
pub enum RecipeError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
    #[error("`{field}`: {message}")]
    Invalid { field: String, message: String },
}

impl RecipeError {
    fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyMode {
    /// Resolve the loose manifest, write the lock, then sync to it.
    #[default]
    Compile,
    /// Install exactly what the committed lock lists.
    Pinned,
}

impl DependencyMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Compile => "compile",
            Self::Pinned => "pinned",
        }
    }
}

impl fmt::Display for DependencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DependencyMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compile" | "compile-then-sync" => Ok(Self::Compile),
            "pinned" | "pinned-install" => Ok(Self::Pinned),
            other => Err(format!(
                "unknown dependency mode `{other}` (expected compile or pinned)"
            )),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct ImageSection {
    pub name: String,
    pub tag: String,
    pub base: String,
    pub python: Option<String>,
    pub platform: String,
}

impl Default for ImageSection {
    fn default() -> Self {
        Self {
            name: "hpath-sim".into(),
            tag: "latest".into(),
            base: DEFAULT_BASE_IMAGE.into(),
            python: None,
            platform: "linux/amd64".into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct BaseSection {
    pub update: Vec<String>,
}

impl Default for BaseSection {
    fn default() -> Self {
        Self {
            update: vec!["apt-get update".into(), "apt-get -y upgrade".into()],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct DependencySection {
    pub mode: DependencyMode,
    pub input: PathBuf,
    pub lock: PathBuf,
    pub generate_hashes: bool,
    pub index_url: String,
    pub find_links: Vec<PathBuf>,
}

impl Default for DependencySection {
    fn default() -> Self {
        Self {
            mode: DependencyMode::Compile,
            input: PathBuf::from("requirements.in"),
            lock: PathBuf::from("requirements.txt"),
            generate_hashes: false,
            index_url: DEFAULT_INDEX_URL.into(),
            find_links: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct PayloadSection {
    pub source: PathBuf,
    pub dest: String,
}

impl Default for PayloadSection {
    fn default() -> Self {
        Self {
            source: PathBuf::from("app"),
            dest: "/app".into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct EntrypointSection {
    pub module: String,
    pub args: Vec<String>,
}

impl Default for EntrypointSection {
    fn default() -> Self {
        Self {
            module: DEFAULT_SERVER_MODULE.into(),
            args: Vec::new(),
        }
    }
}

/// Declarative description of one image build.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct Recipe {
    pub image: ImageSection,
    pub base: BaseSection,
    pub dependencies: DependencySection,
    pub payload: PayloadSection,
    pub entrypoint: EntrypointSection,
}

impl Recipe {
    pub fn load(path: &Path) -> Result<Self, RecipeError> {
        let contents = fs::read_to_string(path).map_err(|source| RecipeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents, path)
    }

    pub fn parse(contents: &str, path: &Path) -> Result<Self, RecipeError> {
        let recipe: Self = toml_edit::de::from_str(contents).map_err(|err| RecipeError::Parse {
            path: path.to_path_buf(),
            message: err.to_string().trim().to_string(),
        })?;
        recipe.validate()?;
        Ok(recipe)
    }

    pub fn validate(&self) -> Result<(), RecipeError> {
        validate_repository(&self.image.name)
            .map_err(|message| RecipeError::invalid("image.name", message))?;
        validate_tag(&self.image.tag).map_err(|message| RecipeError::invalid("image.tag", message))?;
        let base = self.base_image()?;
        if !base.is_pinned() {
            return Err(RecipeError::invalid(
                "image.base",
                format!("`{base}` must name an explicit tag or digest other than `latest`"),
            ));
        }
        self.target()?;
        if self.base.update.iter().any(|command| command.trim().is_empty()) {
            return Err(RecipeError::invalid("base.update", "commands must not be empty"));
        }
        let deps = &self.dependencies;
        if deps.lock.as_os_str().is_empty() {
            return Err(RecipeError::invalid("dependencies.lock", "path must not be empty"));
        }
        if deps.mode == DependencyMode::Compile && deps.input.as_os_str().is_empty() {
            return Err(RecipeError::invalid("dependencies.input", "path must not be empty"));
        }
        if !(deps.index_url.starts_with("https://") || deps.index_url.starts_with("http://")) {
            return Err(RecipeError::invalid(
                "dependencies.index-url",
                format!("`{}` is not an http(s) URL", deps.index_url),
            ));
        }
        if self.payload.source.as_os_str().is_empty() {
            return Err(RecipeError::invalid("payload.source", "path must not be empty"));
        }
        let dest = self.payload.dest.trim_end_matches('/');
        if !self.payload.dest.starts_with('/') || dest.is_empty() {
            return Err(RecipeError::invalid(
                "payload.dest",
                format!("`{}` must be an absolute path below /", self.payload.dest),
            ));
        }
        if !is_module_path(&self.entrypoint.module) {
            return Err(RecipeError::invalid(
                "entrypoint.module",
                format!("`{}` is not a dotted Python module path", self.entrypoint.module),
            ));
        }
        Ok(())
    }

    pub fn base_image(&self) -> Result<ImageReference, RecipeError> {
        ImageReference::parse(&self.image.base)
            .map_err(|message| RecipeError::invalid("image.base", message))
    }

    /// The explicit `image.python`, or the `X.Y` prefix of the base tag.
    pub fn python_version(&self) -> Result<String, RecipeError> {
        if let Some(python) = &self.image.python {
            return Ok(python.trim().to_string());
        }
        let base = self.base_image()?;
        base.tag
            .as_deref()
            .and_then(infer_python)
            .ok_or_else(|| {
                RecipeError::invalid(
                    "image.python",
                    format!("cannot infer the Python version from `{base}`; set it explicitly"),
                )
            })
    }

    pub fn target(&self) -> Result<TargetEnvironment, RecipeError> {
        let python = self.python_version()?;
        TargetEnvironment::new(&python, &self.image.platform).map_err(|err| match err {
            TargetError::InvalidPython(_) => RecipeError::invalid("image.python", err.to_string()),
            TargetError::UnsupportedPlatform(_) => {
                RecipeError::invalid("image.platform", err.to_string())
            }
        })
    }

    /// `name:tag` of the produced image.
    pub fn image_ref(&self) -> String {
        format!("{}:{}", self.image.name, self.image.tag)
    }

    pub fn workdir(&self) -> &str {
        let dest = self.payload.dest.trim_end_matches('/');
        if dest.is_empty() {
            "/"
        } else {
            dest
        }
    }

    /// `python -m <module> <args>...`
    pub fn entrypoint_command(&self) -> Vec<String> {
        let mut command = vec![
            "python".to_string(),
            "-m".to_string(),
            self.entrypoint.module.clone(),
        ];
        command.extend(self.entrypoint.args.iter().cloned());
        command
    }

    /// Recipe text written by `hp init`.
    pub fn render_default(mode: DependencyMode) -> String {
        let defaults = Self::default();
        let mut doc = DocumentMut::new();

        let mut image = Table::new();
        image.insert("name", str_item(&defaults.image.name));
        image.insert("tag", str_item(&defaults.image.tag));
        image.insert("base", str_item(&defaults.image.base));
        image.insert("platform", str_item(&defaults.image.platform));
        doc.insert("image", Item::Table(image));

        let mut base = Table::new();
        base.insert("update", array_item(&defaults.base.update));
        doc.insert("base", Item::Table(base));

        let mut deps = Table::new();
        deps.insert("mode", str_item(mode.as_str()));
        if mode == DependencyMode::Compile {
            deps.insert(
                "input",
                str_item(&defaults.dependencies.input.display().to_string()),
            );
        }
        deps.insert(
            "lock",
            str_item(&defaults.dependencies.lock.display().to_string()),
        );
        deps.insert("index-url", str_item(&defaults.dependencies.index_url));
        doc.insert("dependencies", Item::Table(deps));

        let mut payload = Table::new();
        payload.insert(
            "source",
            str_item(&defaults.payload.source.display().to_string()),
        );
        payload.insert("dest", str_item(&defaults.payload.dest));
        doc.insert("payload", Item::Table(payload));

        let mut entrypoint = Table::new();
        entrypoint.insert("module", str_item(&defaults.entrypoint.module));
        doc.insert("entrypoint", Item::Table(entrypoint));

        doc.to_string()
    }
}

fn str_item(value: &str) -> Item {
    Item::Value(TomlValue::from(value))
}

fn array_item(values: &[String]) -> Item {
    let mut array = Array::new();
    for value in values {
        array.push(value.as_str());
    }
    Item::Value(TomlValue::Array(array))
}

/// A container image reference: `[registry/]repository[:tag][@digest]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ImageReference {
    pub registry: Option<String>,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageReference {
    pub fn parse(value: &str) -> Result<Self, String> {
        let value = value.trim();
        if value.is_empty() {
            return Err("image reference is empty".into());
        }
        let (rest, digest) = match value.split_once('@') {
            Some((rest, digest)) => {
                let Some((algorithm, hex)) = digest.split_once(':') else {
                    return Err(format!("digest `{digest}` must be `algorithm:hex`"));
                };
                if algorithm.is_empty() || hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(format!("digest `{digest}` is malformed"));
                }
                (rest, Some(digest.to_string()))
            }
            None => (value, None),
        };
        let (path, tag) = match rest.rfind(':') {
            Some(idx) if !rest[idx..].contains('/') => {
                (&rest[..idx], Some(rest[idx + 1..].to_string()))
            }
            _ => (rest, None),
        };
        if let Some(tag) = &tag {
            validate_tag(tag)?;
        }
        let (registry, repository) = match path.split_once('/') {
            Some((first, remainder))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (Some(first.to_string()), remainder.to_string())
            }
            _ => (None, path.to_string()),
        };
        validate_repository(&repository)?;
        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// A tag other than `latest`, or any digest.
    pub fn is_pinned(&self) -> bool {
        self.digest.is_some() || self.tag.as_deref().is_some_and(|tag| tag != "latest")
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(registry) = &self.registry {
            write!(f, "{registry}/")?;
        }
        f.write_str(&self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

fn validate_repository(value: &str) -> Result<(), String> {
    let valid = !value.is_empty()
        && value.split('/').all(|part| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'))
        });
    if valid {
        Ok(())
    } else {
        Err(format!(
            "`{value}` is not a valid repository name (lowercase letters, digits, `._-/`)"
        ))
    }
}

fn validate_tag(value: &str) -> Result<(), String> {
    let valid = !value.is_empty()
        && value.len() <= 128
        && !value.starts_with(['.', '-'])
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(format!("`{value}` is not a valid image tag"))
    }
}

fn infer_python(tag: &str) -> Option<String> {
    let mut parts = tag.split(|c: char| !c.is_ascii_digit());
    let major = parts.next().filter(|part| !part.is_empty())?;
    let minor = parts.next().filter(|part| !part.is_empty())?;
    tag.starts_with(&format!("{major}.{minor}"))
        .then(|| format!("{major}.{minor}"))
}

fn is_module_path(value: &str) -> bool {
    !value.is_empty()
        && value.split('.').all(|segment| {
            let mut chars = segment.chars();
            chars
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<Recipe, RecipeError> {
        Recipe::parse(text, Path::new("hp.toml"))
    }

    #[test]
    fn empty_recipe_uses_defaults() {
        let recipe = parse("").expect("defaults");
        assert_eq!(recipe, Recipe::default());
        assert_eq!(recipe.python_version().expect("python"), "3.11");
        assert_eq!(recipe.entrypoint_command(), vec!["python", "-m", "restful.server"]);
        assert_eq!(recipe.workdir(), "/app");
        assert_eq!(recipe.image_ref(), "hpath-sim:latest");
    }

    #[test]
    fn parses_full_recipe() {
        let recipe = parse(
            r#"
[image]
name = "registry.example/hpath-sim"
tag = "2024.1"
base = "python:3.12-slim-bookworm"
platform = "linux/arm64"

[dependencies]
mode = "pinned"
lock = "locks/requirements.txt"
generate-hashes = true
find-links = ["wheels"]

[payload]
source = "src"
dest = "/srv/app/"

[entrypoint]
module = "restful.server"
args = ["--port", "8080"]
"#,
        )
        .expect("full recipe");
        assert_eq!(recipe.dependencies.mode, DependencyMode::Pinned);
        assert!(recipe.dependencies.generate_hashes);
        assert_eq!(recipe.python_version().expect("python"), "3.12");
        assert_eq!(recipe.target().expect("target").machine(), "aarch64");
        assert_eq!(recipe.workdir(), "/srv/app");
        assert_eq!(
            recipe.entrypoint_command(),
            vec!["python", "-m", "restful.server", "--port", "8080"]
        );
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = parse("[image]\nnmae = \"x\"\n").unwrap_err();
        assert!(matches!(err, RecipeError::Parse { .. }));
        let err = parse("[payload]\nsource = \"app\"\nentry = \"x\"\n").unwrap_err();
        assert!(matches!(err, RecipeError::Parse { .. }));
    }

    #[test]
    fn rejects_floating_base() {
        for base in ["python", "python:latest"] {
            let err = parse(&format!("[image]\nbase = \"{base}\"\npython = \"3.11\"\n")).unwrap_err();
            assert!(
                matches!(&err, RecipeError::Invalid { field, .. } if field == "image.base"),
                "{base}: {err}"
            );
        }
        let pinned = format!("python@sha256:{}", "a".repeat(64));
        let recipe = parse(&format!("[image]\nbase = \"{pinned}\"\npython = \"3.11\"\n"))
            .expect("digest pinned");
        assert_eq!(recipe.base_image().expect("base").to_string(), pinned);
    }

    #[test]
    fn rejects_relative_dest_and_bad_module() {
        let err = parse("[payload]\ndest = \"app\"\n").unwrap_err();
        assert!(matches!(&err, RecipeError::Invalid { field, .. } if field == "payload.dest"));
        let err = parse("[entrypoint]\nmodule = \"restful..server\"\n").unwrap_err();
        assert!(matches!(&err, RecipeError::Invalid { field, .. } if field == "entrypoint.module"));
        let err = parse("[entrypoint]\nmodule = \"9lives\"\n").unwrap_err();
        assert!(matches!(&err, RecipeError::Invalid { .. }));
    }

    #[test]
    fn requires_python_when_base_tag_has_none() {
        let err = parse("[image]\nbase = \"debian:bookworm\"\n").unwrap_err();
        assert!(matches!(&err, RecipeError::Invalid { field, .. } if field == "image.python"));
        let recipe = parse("[image]\nbase = \"debian:bookworm\"\npython = \"3.11\"\n")
            .expect("explicit python");
        assert_eq!(recipe.python_version().expect("python"), "3.11");
    }

    #[test]
    fn parses_image_references() {
        let reference = ImageReference::parse("localhost:5000/team/python:3.11-slim")
            .expect("reference");
        assert_eq!(reference.registry.as_deref(), Some("localhost:5000"));
        assert_eq!(reference.repository, "team/python");
        assert_eq!(reference.tag.as_deref(), Some("3.11-slim"));
        assert!(reference.is_pinned());
        assert!(ImageReference::parse("Python:3.11").is_err());
        assert!(!ImageReference::parse("python").expect("bare").is_pinned());
    }

    #[test]
    fn default_recipe_round_trips() {
        for mode in [DependencyMode::Compile, DependencyMode::Pinned] {
            let text = Recipe::render_default(mode);
            let recipe = parse(&text).expect("rendered recipe parses");
            assert_eq!(recipe.dependencies.mode, mode);
            assert_eq!(recipe.entrypoint.module, "restful.server");
        }
        assert!(Recipe::render_default(DependencyMode::Pinned).contains("mode = \"pinned\""));
    }

    #[test]
    fn mode_from_str_accepts_aliases() {
        assert_eq!(
            "pinned-install".parse::<DependencyMode>(),
            Ok(DependencyMode::Pinned)
        );
        assert_eq!("Compile".parse::<DependencyMode>(), Ok(DependencyMode::Compile));
        assert!("later".parse::<DependencyMode>().is_err());
    }
}
