use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use pep440_rs::{Version, VersionSpecifiers};
use pep508_rs::{ExtraName, Requirement as PepRequirement, VersionOrUrl};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;

use super::resolver::ResolveError;
use super::source::PackageSource;
use super::target::TargetEnvironment;
use crate::manifest::{LockManifest, PinnedPackage};
use crate::name::{canonical_extras, normalize_dist_name};

/// A dependency of a pinned package that the lock does not satisfy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ClosureGap {
    pub package: String,
    pub requirement: String,
    /// The pinned version when one exists but falls outside the requirement.
    pub pinned: Option<String>,
}

impl ClosureGap {
    pub fn describe(&self) -> String {
        match &self.pinned {
            Some(version) => format!(
                "{} requires `{}` but the lock pins {version}",
                self.package, self.requirement
            ),
            None => format!(
                "{} requires `{}` which is not pinned",
                self.package, self.requirement
            ),
        }
    }
}

/// Dependency edges between applicable pins plus anything left unsatisfied.
#[derive(Clone, Debug, Default)]
pub struct LockGraph {
    pub edges: Vec<(String, String)>,
    pub gaps: Vec<ClosureGap>,
}

impl LockGraph {
    pub fn is_closed(&self) -> bool {
        self.gaps.is_empty()
    }
}

/// Checks that every applicable `Requires-Dist` of every applicable pin is
/// itself pinned at a satisfying version.
pub fn check_lock_closure<S: PackageSource + ?Sized>(
    lock: &LockManifest,
    source: &S,
    target: &TargetEnvironment,
) -> Result<LockGraph, ResolveError> {
    let env = target.marker_environment();
    let pins: BTreeMap<String, &PinnedPackage> = lock
        .applicable(env)
        .map(|pin| (pin.name.clone(), pin))
        .collect();

    let mut requires: BTreeMap<String, Vec<PepRequirement>> = BTreeMap::new();
    for (name, pin) in &pins {
        let parsed = source
            .requires_dist(name, &pin.version)?
            .iter()
            .filter_map(|line| line.parse::<PepRequirement>().ok())
            .collect();
        requires.insert(name.clone(), parsed);
    }

    // Extras requested by parents widen what a child must provide.
    let mut extras: BTreeMap<String, BTreeSet<String>> = pins
        .iter()
        .map(|(name, pin)| (name.clone(), pin.extras.iter().cloned().collect()))
        .collect();
    loop {
        let mut changed = false;
        for (name, reqs) in &requires {
            let active = extra_sets(extras.get(name));
            for requirement in reqs {
                if !active.iter().any(|set| requirement.evaluate_markers(env, set)) {
                    continue;
                }
                let child = normalize_dist_name(requirement.name.as_ref());
                let wanted = canonical_extras(
                    &requirement
                        .extras
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>(),
                );
                if let Some(known) = extras.get_mut(&child) {
                    for extra in wanted {
                        changed |= known.insert(extra);
                    }
                }
            }
        }
        if !changed {
            break;
        }
    }

    let mut graph = LockGraph::default();
    for (name, reqs) in &requires {
        let active = extra_sets(extras.get(name));
        for requirement in reqs {
            if !active.iter().any(|set| requirement.evaluate_markers(env, set)) {
                continue;
            }
            let child = normalize_dist_name(requirement.name.as_ref());
            if child == *name {
                continue;
            }
            let Some(dep) = pins.get(&child) else {
                graph.gaps.push(ClosureGap {
                    package: format!("{name}=={}", pins[name].version),
                    requirement: requirement_text(requirement),
                    pinned: None,
                });
                continue;
            };
            if !satisfied_by(requirement, &dep.version) {
                graph.gaps.push(ClosureGap {
                    package: format!("{name}=={}", pins[name].version),
                    requirement: requirement_text(requirement),
                    pinned: Some(dep.version.clone()),
                });
            }
            graph.edges.push((name.clone(), child));
        }
    }
    graph.edges.sort();
    graph.edges.dedup();
    Ok(graph)
}

/// Orders packages so every package comes after its dependencies. Cycles are
/// kept together and ordered by name.
pub fn install_order(names: &[String], edges: &[(String, String)]) -> Vec<String> {
    let mut sorted: Vec<&str> = names.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();

    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut index: BTreeMap<&str, NodeIndex> = BTreeMap::new();
    for name in sorted {
        index.insert(name, graph.add_node(name));
    }
    let mut edges: Vec<&(String, String)> = edges.iter().collect();
    edges.sort();
    for (parent, child) in edges {
        if let (Some(&from), Some(&to)) = (index.get(parent.as_str()), index.get(child.as_str())) {
            if from != to {
                graph.update_edge(from, to, ());
            }
        }
    }

    // tarjan_scc yields components in reverse topological order, which with
    // parent -> child edges puts dependencies first.
    tarjan_scc(&graph)
        .into_iter()
        .flat_map(|mut component| {
            component.sort_by_key(|node| graph[*node]);
            component
                .into_iter()
                .map(|node| graph[node].to_string())
                .collect::<Vec<_>>()
        })
        .collect()
}

fn extra_sets(extras: Option<&BTreeSet<String>>) -> Vec<Vec<ExtraName>> {
    let mut sets = vec![Vec::new()];
    for extra in extras.into_iter().flatten() {
        if let Ok(name) = ExtraName::from_str(extra) {
            sets.push(vec![name]);
        }
    }
    sets
}

fn satisfied_by(requirement: &PepRequirement, version: &str) -> bool {
    let Some(VersionOrUrl::VersionSpecifier(specs)) = &requirement.version_or_url else {
        return true;
    };
    let Ok(specifiers) = VersionSpecifiers::from_str(&specs.to_string()) else {
        return true;
    };
    Version::from_str(version).map_or(true, |version| specifiers.contains(&version))
}

fn requirement_text(requirement: &PepRequirement) -> String {
    let name = normalize_dist_name(requirement.name.as_ref());
    match &requirement.version_or_url {
        Some(VersionOrUrl::VersionSpecifier(specs)) => format!("{name}{specs}"),
        _ => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolution::fake::FakeIndex;

    fn index() -> FakeIndex {
        FakeIndex::new(vec![
            ("flask", "2.3.3", vec!["werkzeug>=2.3.7", "click>=8.1.3"]),
            ("werkzeug", "2.3.7", vec!["markupsafe>=2.1.1"]),
            ("markupsafe", "2.1.3", vec![]),
            ("click", "8.1.7", vec!["colorama ; platform_system == 'Windows'"]),
            ("requests", "2.31.0", vec!["PySocks>=1.5.6 ; extra == 'socks'"]),
            ("pysocks", "1.7.1", vec![]),
            ("client", "1.0", vec!["requests[socks]"]),
        ])
    }

    fn target() -> TargetEnvironment {
        TargetEnvironment::new("3.11", "linux/amd64").expect("target")
    }

    fn lock(text: &str) -> LockManifest {
        LockManifest::parse(text, "requirements.txt").expect("lock")
    }

    #[test]
    fn closed_lock_has_no_gaps() {
        let graph = check_lock_closure(
            &lock("flask==2.3.3\nwerkzeug==2.3.7\nmarkupsafe==2.1.3\nclick==8.1.7\n"),
            &index(),
            &target(),
        )
        .expect("graph");
        assert!(graph.is_closed());
        assert!(graph
            .edges
            .contains(&("flask".to_string(), "werkzeug".to_string())));
    }

    #[test]
    fn reports_missing_and_unsatisfied_pins() {
        let graph = check_lock_closure(
            &lock("flask==2.3.3\nwerkzeug==2.3.7\nclick==8.1.7\n"),
            &index(),
            &target(),
        )
        .expect("graph");
        assert_eq!(graph.gaps.len(), 1);
        assert_eq!(graph.gaps[0].requirement, "markupsafe>=2.1.1");
        assert!(graph.gaps[0].describe().contains("not pinned"));
    }

    #[test]
    fn extras_requested_by_parents_must_be_pinned() {
        let graph = check_lock_closure(
            &lock("client==1.0\nrequests==2.31.0\n"),
            &index(),
            &target(),
        )
        .expect("graph");
        assert_eq!(graph.gaps.len(), 1);
        assert!(graph.gaps[0].requirement.starts_with("pysocks"));
    }

    #[test]
    fn install_order_puts_dependencies_first() {
        let names: Vec<String> = ["flask", "werkzeug", "markupsafe", "click", "idna"]
            .iter()
            .map(ToString::to_string)
            .collect();
        let edges = vec![
            ("flask".to_string(), "werkzeug".to_string()),
            ("flask".to_string(), "click".to_string()),
            ("werkzeug".to_string(), "markupsafe".to_string()),
        ];
        let order = install_order(&names, &edges);
        let pos = |name: &str| order.iter().position(|n| n == name).expect("present");
        assert_eq!(order.len(), 5);
        assert!(pos("markupsafe") < pos("werkzeug"));
        assert!(pos("werkzeug") < pos("flask"));
        assert!(pos("click") < pos("flask"));
        assert_eq!(install_order(&names, &edges), order);
    }

    #[test]
    fn cycles_are_grouped() {
        let names = vec!["a".to_string(), "b".to_string()];
        let edges = vec![
            ("a".to_string(), "b".to_string()),
            ("b".to_string(), "a".to_string()),
        ];
        assert_eq!(install_order(&names, &edges), vec!["a", "b"]);
    }
}
