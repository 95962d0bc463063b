//! Reconciles an installed package set with a desired one.

use std::collections::BTreeMap;
use std::str::FromStr;

use pep440_rs::Version;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum SyncAction {
    Install { name: String, version: String },
    Uninstall { name: String, version: String },
    Replace { name: String, from: String, to: String },
}

impl SyncAction {
    pub fn name(&self) -> &str {
        match self {
            Self::Install { name, .. } | Self::Uninstall { name, .. } | Self::Replace { name, .. } => {
                name
            }
        }
    }

    /// The version that should be present once the action is applied.
    pub fn target_version(&self) -> Option<&str> {
        match self {
            Self::Install { version, .. } => Some(version),
            Self::Replace { to, .. } => Some(to),
            Self::Uninstall { .. } => None,
        }
    }

    /// The installed version that has to be removed first.
    pub fn removed_version(&self) -> Option<&str> {
        match self {
            Self::Uninstall { version, .. } => Some(version),
            Self::Replace { from, .. } => Some(from),
            Self::Install { .. } => None,
        }
    }
}

/// Actions ordered uninstalls, replacements, installs; each group by name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SyncPlan {
    pub actions: Vec<SyncAction>,
    pub unchanged: Vec<String>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn removals(&self) -> impl Iterator<Item = (&str, &str)> {
        self.actions
            .iter()
            .filter_map(|action| action.removed_version().map(|v| (action.name(), v)))
    }

    pub fn additions(&self) -> impl Iterator<Item = (&str, &str)> {
        self.actions
            .iter()
            .filter_map(|action| action.target_version().map(|v| (action.name(), v)))
    }

    pub fn counts(&self) -> (usize, usize, usize) {
        self.actions
            .iter()
            .fold((0, 0, 0), |(install, replace, uninstall), action| match action {
                SyncAction::Install { .. } => (install + 1, replace, uninstall),
                SyncAction::Replace { .. } => (install, replace + 1, uninstall),
                SyncAction::Uninstall { .. } => (install, replace, uninstall + 1),
            })
    }
}

/// Computes the actions that turn `installed` into `desired`. Both map
/// normalized names to versions. Pure and idempotent: planning against the
/// result of applying a plan yields an empty plan.
pub fn plan_sync(
    desired: &BTreeMap<String, String>,
    installed: &BTreeMap<String, String>,
) -> SyncPlan {
    let mut uninstalls = Vec::new();
    let mut replaces = Vec::new();
    let mut installs = Vec::new();
    let mut unchanged = Vec::new();

    for (name, version) in installed {
        if !desired.contains_key(name) {
            uninstalls.push(SyncAction::Uninstall {
                name: name.clone(),
                version: version.clone(),
            });
        }
    }
    for (name, version) in desired {
        match installed.get(name) {
            Some(current) if same_version(current, version) => unchanged.push(name.clone()),
            Some(current) => replaces.push(SyncAction::Replace {
                name: name.clone(),
                from: current.clone(),
                to: version.clone(),
            }),
            None => installs.push(SyncAction::Install {
                name: name.clone(),
                version: version.clone(),
            }),
        }
    }

    let mut actions = uninstalls;
    actions.extend(replaces);
    actions.extend(installs);
    SyncPlan { actions, unchanged }
}

fn same_version(a: &str, b: &str) -> bool {
    match (Version::from_str(a), Version::from_str(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[(&str, &str)]) -> BTreeMap<String, String> {
        items
            .iter()
            .map(|(name, version)| ((*name).to_string(), (*version).to_string()))
            .collect()
    }

    fn apply(plan: &SyncPlan, installed: &mut BTreeMap<String, String>) {
        for (name, _) in plan.removals() {
            installed.remove(name);
        }
        for (name, version) in plan.additions() {
            installed.insert(name.to_string(), version.to_string());
        }
    }

    #[test]
    fn plans_install_replace_and_uninstall() {
        let desired = set(&[("flask", "2.3.3"), ("click", "8.1.7"), ("idna", "3.6")]);
        let installed = set(&[("flask", "2.3.2"), ("click", "8.1.7"), ("six", "1.16.0")]);
        let plan = plan_sync(&desired, &installed);
        assert_eq!(
            plan.actions,
            vec![
                SyncAction::Uninstall {
                    name: "six".into(),
                    version: "1.16.0".into()
                },
                SyncAction::Replace {
                    name: "flask".into(),
                    from: "2.3.2".into(),
                    to: "2.3.3".into()
                },
                SyncAction::Install {
                    name: "idna".into(),
                    version: "3.6".into()
                },
            ]
        );
        assert_eq!(plan.unchanged, vec!["click"]);
        assert_eq!(plan.counts(), (1, 1, 1));
    }

    #[test]
    fn applying_a_plan_makes_the_next_one_empty() {
        let desired = set(&[("flask", "2.3.3"), ("werkzeug", "3.0.1")]);
        let mut installed = set(&[("flask", "1.0"), ("jinja2", "3.1.2")]);
        let plan = plan_sync(&desired, &installed);
        apply(&plan, &mut installed);
        assert_eq!(installed, desired);
        assert!(plan_sync(&desired, &installed).is_empty());
    }

    #[test]
    fn equivalent_versions_are_unchanged() {
        let plan = plan_sync(&set(&[("idna", "3.0")]), &set(&[("idna", "3.0.0")]));
        assert!(plan.is_empty());
        assert_eq!(plan.unchanged, vec!["idna"]);
    }
}
