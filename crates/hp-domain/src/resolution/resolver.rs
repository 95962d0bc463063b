use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::str::FromStr;

use pep440_rs::{Version, VersionSpecifiers};
use pep508_rs::{ExtraName, MarkerEnvironment, Requirement as PepRequirement, VersionOrUrl};
use serde::Serialize;
use tracing::{debug, trace, warn};

use super::source::{select_wheel, DistFile, PackageSource, SourceError};
use super::target::TargetEnvironment;
use crate::manifest::{LockManifest, LooseManifest, Origin, PinnedPackage, RequirementEntry};
use crate::name::{canonical_extras, normalize_dist_name};

const DEFAULT_MAX_STEPS: usize = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("no version of `{package}` satisfies: {}", .requirements.join("; "))]
    Conflict {
        package: String,
        requirements: Vec<String>,
    },
    #[error("package `{0}` was not found in any configured index")]
    NotFound(String),
    #[error("failed to fetch `{package}`: {message}")]
    Fetch { package: String, message: String },
    #[error("invalid requirement `{requirement}` ({origin}): {reason}")]
    InvalidRequirement {
        requirement: String,
        origin: String,
        reason: String,
    },
    #[error("resolution gave up after {0} steps")]
    TooComplex(usize),
}

impl ResolveError {
    /// Conflicts are local to one branch of the search; everything else aborts.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<SourceError> for ResolveError {
    fn from(err: SourceError) -> Self {
        let message = err.to_string();
        match err {
            SourceError::NotFound(name) => Self::NotFound(name),
            SourceError::Fetch { package, .. } | SourceError::Metadata { package, .. } => {
                Self::Fetch { package, message }
            }
            SourceError::Offline(package) => Self::Fetch { package, message },
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ResolveRequest {
    pub requirements: Vec<RequirementEntry>,
    pub constraints: Vec<RequirementEntry>,
    /// Shown as `-r <label>` in `# via` annotations.
    pub input_label: String,
    pub allow_prereleases: bool,
}

impl ResolveRequest {
    pub fn from_manifest(manifest: &LooseManifest) -> Self {
        Self {
            requirements: manifest.requirements.clone(),
            constraints: manifest.constraints.clone(),
            input_label: manifest.label(),
            allow_prereleases: manifest.options.iter().any(|option| option == "--pre"),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ResolvedPackage {
    pub name: String,
    pub version: String,
    pub extras: Vec<String>,
    pub dependencies: Vec<String>,
    pub via: Vec<String>,
    #[serde(skip)]
    pub files: Vec<DistFile>,
}

/// A conflict-free transitive closure, ordered by normalized name.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Resolution {
    pub packages: Vec<ResolvedPackage>,
}

impl Resolution {
    pub fn get(&self, name: &str) -> Option<&ResolvedPackage> {
        self.packages.iter().find(|package| package.name == name)
    }

    pub fn edges(&self) -> Vec<(String, String)> {
        self.packages
            .iter()
            .flat_map(|package| {
                package
                    .dependencies
                    .iter()
                    .map(|dep| (package.name.clone(), dep.clone()))
            })
            .collect()
    }

    pub fn to_lock(&self, label: &str, generate_hashes: bool) -> LockManifest {
        let pins = self
            .packages
            .iter()
            .map(|package| {
                let mut hashes = Vec::new();
                if generate_hashes {
                    hashes = package
                        .files
                        .iter()
                        .filter(|file| !file.yanked)
                        .filter_map(|file| file.sha256.as_ref())
                        .map(|sha| format!("sha256:{sha}"))
                        .collect::<Vec<_>>();
                    hashes.sort();
                    hashes.dedup();
                }
                PinnedPackage {
                    name: package.name.clone(),
                    version: package.version.clone(),
                    extras: package.extras.clone(),
                    marker: None,
                    hashes,
                    via: package.via.clone(),
                    origin: Origin::new(label, 0),
                }
            })
            .collect();
        LockManifest {
            pins,
            options: Vec::new(),
        }
    }
}

#[derive(Clone, Debug)]
struct Constraint {
    specifiers: VersionSpecifiers,
    text: String,
    via: String,
    origin: String,
}

impl Constraint {
    fn new(
        specifiers: Option<&str>,
        text: &str,
        via: &str,
        origin: String,
    ) -> Result<Self, ResolveError> {
        let specifiers = match specifiers {
            Some(raw) => VersionSpecifiers::from_str(raw).map_err(|err| {
                ResolveError::InvalidRequirement {
                    requirement: text.to_string(),
                    origin: origin.clone(),
                    reason: err.to_string(),
                }
            })?,
            None => VersionSpecifiers::from_iter(std::iter::empty()),
        };
        Ok(Self {
            specifiers,
            text: text.to_string(),
            via: via.to_string(),
            origin,
        })
    }

    fn describe(&self) -> String {
        format!("{} (from {})", self.text, self.origin)
    }
}

#[derive(Clone, Debug)]
struct Candidate {
    version: Version,
    raw: String,
    files: Vec<DistFile>,
}

#[derive(Clone, Debug, Default)]
struct Wanted {
    constraints: Vec<Constraint>,
    extras: BTreeSet<String>,
    via: BTreeSet<String>,
}

#[derive(Clone, Debug)]
struct Pin {
    version: Version,
    raw: String,
    files: Vec<DistFile>,
    expanded: BTreeSet<String>,
    dependencies: BTreeSet<String>,
}

#[derive(Clone, Debug, Default)]
struct State {
    wanted: BTreeMap<String, Wanted>,
    pins: BTreeMap<String, Pin>,
}

/// Backtracking resolver. Packages are decided in name order and candidates
/// are tried newest first, so the result only depends on the inputs and the
/// index contents.
pub struct Resolver<'a, S: ?Sized> {
    source: &'a S,
    target: &'a TargetEnvironment,
    max_steps: usize,
    steps: usize,
    allow_prereleases: bool,
    global: BTreeMap<String, Vec<Constraint>>,
    releases: HashMap<String, Vec<Candidate>>,
    requires: HashMap<(String, String), Vec<String>>,
}

impl<'a, S: PackageSource + ?Sized> Resolver<'a, S> {
    pub fn new(source: &'a S, target: &'a TargetEnvironment) -> Self {
        Self {
            source,
            target,
            max_steps: DEFAULT_MAX_STEPS,
            steps: 0,
            allow_prereleases: false,
            global: BTreeMap::new(),
            releases: HashMap::new(),
            requires: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn resolve(&mut self, request: &ResolveRequest) -> Result<Resolution, ResolveError> {
        self.steps = 0;
        self.allow_prereleases = request.allow_prereleases;
        self.global.clear();
        let target = self.target;
        let env = target.marker_environment();

        for entry in &request.constraints {
            if !requirement_applies(&entry.text, env, &[]) {
                continue;
            }
            let constraint = Constraint::new(
                entry.specifiers.as_deref(),
                &entry.text,
                &format!("-c {}", entry.origin.file),
                entry.origin.to_string(),
            )?;
            self.global
                .entry(entry.name.clone())
                .or_default()
                .push(constraint);
        }

        let via = format!("-r {}", request.input_label);
        let mut state = State::default();
        for entry in &request.requirements {
            if !requirement_applies(&entry.text, env, &[]) {
                debug!(requirement = %entry.text, "marker excludes requirement for target");
                continue;
            }
            let constraint = Constraint::new(
                entry.specifiers.as_deref(),
                &entry.text,
                &via,
                entry.origin.to_string(),
            )?;
            require(&mut state, &entry.name, constraint, &entry.extras)?;
        }

        let state = self.search(state)?;
        debug!(steps = self.steps, packages = state.pins.len(), "resolution finished");
        Ok(finish(state))
    }

    fn search(&mut self, state: State) -> Result<State, ResolveError> {
        let Some(name) = state
            .wanted
            .keys()
            .find(|name| !state.pins.contains_key(*name))
            .cloned()
        else {
            return Ok(state);
        };
        self.steps += 1;
        if self.steps > self.max_steps {
            return Err(ResolveError::TooComplex(self.max_steps));
        }

        let candidates = self.candidates(&name, &state)?;
        let mut last_conflict = None;
        for candidate in candidates {
            trace!(package = %name, version = %candidate.raw, "trying candidate");
            let mut next = state.clone();
            next.pins.insert(
                name.clone(),
                Pin {
                    version: candidate.version,
                    raw: candidate.raw,
                    files: candidate.files,
                    expanded: BTreeSet::new(),
                    dependencies: BTreeSet::new(),
                },
            );
            match self.settle(&mut next, VecDeque::from([name.clone()])) {
                Ok(()) => {}
                Err(err) if err.is_conflict() => {
                    last_conflict = Some(err);
                    continue;
                }
                Err(err) => return Err(err),
            }
            match self.search(next) {
                Ok(done) => return Ok(done),
                Err(err) if err.is_conflict() => last_conflict = Some(err),
                Err(err) => return Err(err),
            }
        }
        Err(last_conflict.unwrap_or_else(|| self.conflict(&name, &state)))
    }

    /// Adds the dependencies of newly pinned packages (and of newly requested
    /// extras) until nothing changes.
    fn settle(&mut self, state: &mut State, mut queue: VecDeque<String>) -> Result<(), ResolveError> {
        let target = self.target;
        let env = target.marker_environment();
        while let Some(name) = queue.pop_front() {
            let Some(pin) = state.pins.get(&name) else {
                continue;
            };
            let extras = state
                .wanted
                .get(&name)
                .map(|wanted| wanted.extras.clone())
                .unwrap_or_default();
            let pending: Vec<String> = std::iter::once(String::new())
                .chain(extras)
                .filter(|extra| !pin.expanded.contains(extra))
                .collect();
            if pending.is_empty() {
                continue;
            }
            let raw = pin.raw.clone();
            let requires = self.requires_dist(&name, &raw)?;
            let origin = format!("{name} {raw}");

            for extra in pending {
                if let Some(pin) = state.pins.get_mut(&name) {
                    pin.expanded.insert(extra.clone());
                }
                let extra_names = if extra.is_empty() {
                    Vec::new()
                } else {
                    match ExtraName::from_str(&extra) {
                        Ok(extra) => vec![extra],
                        Err(_) => continue,
                    }
                };
                for line in &requires {
                    let requirement = match line.parse::<PepRequirement>() {
                        Ok(requirement) => requirement,
                        Err(err) => {
                            warn!(package = %name, requirement = %line, %err, "skipping unparsable dependency");
                            continue;
                        }
                    };
                    if !requirement.evaluate_markers(env, &extra_names) {
                        continue;
                    }
                    let specifiers = match &requirement.version_or_url {
                        Some(VersionOrUrl::VersionSpecifier(specs)) => Some(specs.to_string()),
                        Some(VersionOrUrl::Url(_)) => {
                            warn!(package = %name, requirement = %line, "skipping URL dependency");
                            continue;
                        }
                        None => None,
                    };
                    let child = normalize_dist_name(requirement.name.as_ref());
                    let child_extras = canonical_extras(
                        &requirement
                            .extras
                            .iter()
                            .map(ToString::to_string)
                            .collect::<Vec<_>>(),
                    );
                    let text = format!("{child}{}", specifiers.as_deref().unwrap_or_default());
                    let constraint =
                        Constraint::new(specifiers.as_deref(), &text, &name, origin.clone())?;
                    require(state, &child, constraint, &child_extras)?;
                    if child != name {
                        if let Some(pin) = state.pins.get_mut(&name) {
                            pin.dependencies.insert(child.clone());
                        }
                    }
                    if state.pins.contains_key(&child) {
                        queue.push_back(child);
                    }
                }
            }
        }
        Ok(())
    }

    fn candidates(&mut self, name: &str, state: &State) -> Result<Vec<Candidate>, ResolveError> {
        let all = self.releases(name)?;
        let constraints: Vec<&Constraint> = state
            .wanted
            .get(name)
            .map(|wanted| wanted.constraints.iter())
            .into_iter()
            .flatten()
            .chain(self.global.get(name).into_iter().flatten())
            .collect();
        let explicit_pre = self.allow_prereleases
            || constraints.iter().any(|constraint| {
                constraint
                    .specifiers
                    .iter()
                    .any(|spec| spec.version().any_prerelease())
            });
        let matching: Vec<Candidate> = all
            .into_iter()
            .filter(|candidate| {
                constraints
                    .iter()
                    .all(|constraint| constraint.specifiers.contains(&candidate.version))
            })
            .collect();
        if explicit_pre {
            return Ok(matching);
        }
        let stable: Vec<Candidate> = matching
            .iter()
            .filter(|candidate| !candidate.version.any_prerelease())
            .cloned()
            .collect();
        Ok(if stable.is_empty() { matching } else { stable })
    }

    fn releases(&mut self, name: &str) -> Result<Vec<Candidate>, ResolveError> {
        if let Some(cached) = self.releases.get(name) {
            return Ok(cached.clone());
        }
        trace!(package = name, "fetching releases");
        let target = self.target;
        let mut candidates: Vec<Candidate> = self
            .source
            .releases(name)?
            .into_iter()
            .filter_map(|release| {
                let version = Version::from_str(&release.version).ok()?;
                select_wheel(&release.files, target, false)?;
                Some(Candidate {
                    version,
                    raw: release.version,
                    files: release.files,
                })
            })
            .collect();
        candidates.sort_by(|a, b| b.version.cmp(&a.version).then_with(|| a.raw.cmp(&b.raw)));
        candidates.dedup_by(|a, b| a.version == b.version);
        self.releases.insert(name.to_string(), candidates.clone());
        Ok(candidates)
    }

    fn requires_dist(&mut self, name: &str, version: &str) -> Result<Vec<String>, ResolveError> {
        let key = (name.to_string(), version.to_string());
        if let Some(cached) = self.requires.get(&key) {
            return Ok(cached.clone());
        }
        trace!(package = name, version, "fetching metadata");
        let requires = self.source.requires_dist(name, version)?;
        self.requires.insert(key, requires.clone());
        Ok(requires)
    }

    fn conflict(&self, name: &str, state: &State) -> ResolveError {
        let mut requirements: Vec<String> = state
            .wanted
            .get(name)
            .map(|wanted| wanted.constraints.iter().map(Constraint::describe).collect())
            .unwrap_or_default();
        if let Some(global) = self.global.get(name) {
            requirements.extend(global.iter().map(Constraint::describe));
        }
        if self.releases.get(name).is_some_and(Vec::is_empty) {
            requirements.push(format!(
                "no release has a wheel for CPython {} on {}",
                self.target.python_version(),
                self.target.machine()
            ));
        }
        ResolveError::Conflict {
            package: name.to_string(),
            requirements,
        }
    }
}

/// Records a requirement on `name`, failing when it rules out the current pin.
fn require(
    state: &mut State,
    name: &str,
    constraint: Constraint,
    extras: &[String],
) -> Result<(), ResolveError> {
    let wanted = state.wanted.entry(name.to_string()).or_default();
    wanted.via.insert(constraint.via.clone());
    wanted.extras.extend(extras.iter().cloned());
    let rejected = state
        .pins
        .get(name)
        .filter(|pin| !constraint.specifiers.contains(&pin.version));
    if !wanted
        .constraints
        .iter()
        .any(|existing| existing.text == constraint.text && existing.via == constraint.via)
    {
        wanted.constraints.push(constraint);
    }
    if let Some(pin) = rejected {
        let mut requirements: Vec<String> =
            wanted.constraints.iter().map(Constraint::describe).collect();
        requirements.push(format!("{name}=={} was already selected", pin.raw));
        return Err(ResolveError::Conflict {
            package: name.to_string(),
            requirements,
        });
    }
    Ok(())
}

fn finish(state: State) -> Resolution {
    let State { wanted, pins } = state;
    let packages = pins
        .into_iter()
        .map(|(name, pin)| {
            let (extras, via) = wanted
                .get(&name)
                .map(|wanted| {
                    (
                        wanted.extras.iter().cloned().collect(),
                        wanted.via.iter().cloned().collect(),
                    )
                })
                .unwrap_or_default();
            ResolvedPackage {
                version: pin.raw,
                extras,
                dependencies: pin.dependencies.into_iter().collect(),
                via,
                files: pin.files,
                name,
            }
        })
        .collect();
    Resolution { packages }
}

fn requirement_applies(
    text: &str,
    env: &MarkerEnvironment,
    extras: &[ExtraName],
) -> bool {
    text.parse::<PepRequirement>()
        .map_or(true, |requirement| requirement.evaluate_markers(env, extras))
}
