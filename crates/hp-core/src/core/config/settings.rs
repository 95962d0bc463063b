use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::runtime::effects;
use crate::core::store::CacheLocation;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalOptions {
    pub quiet: bool,
    pub verbose: u8,
    pub trace: bool,
    pub json: bool,
    /// Path of the build recipe (`-C/--recipe`).
    pub recipe: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub(crate) fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    pub(crate) fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    #[cfg(test)]
    pub(crate) fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

#[derive(Debug)]
pub struct Config {
    pub(crate) cache: CacheConfig,
    pub(crate) network: NetworkConfig,
    pub(crate) index: IndexConfig,
    pub(crate) backend: BackendConfig,
    pub(crate) build: BuildConfig,
}

impl Config {
    pub(crate) fn from_snapshot(
        snapshot: &EnvSnapshot,
        cache_store: &dyn effects::CacheStore,
    ) -> anyhow::Result<Self> {
        let cache_override = non_empty(snapshot.var("HP_CACHE_DIR")).map(PathBuf::from);
        Ok(Self {
            cache: CacheConfig {
                store: cache_store.resolve_store_path(cache_override.as_deref())?,
            },
            network: NetworkConfig {
                online: match snapshot.var("HP_ONLINE") {
                    Some(value) => {
                        let lowered = value.trim().to_ascii_lowercase();
                        !matches!(lowered.as_str(), "0" | "false" | "no" | "off" | "")
                    }
                    None => true,
                },
            },
            index: IndexConfig {
                index_url: non_empty(snapshot.var("HP_INDEX_URL"))
                    .map(|url| url.trim_end_matches('/').to_string()),
                find_links: snapshot
                    .var("HP_FIND_LINKS")
                    .map(|raw| env::split_paths(raw).filter(|p| !p.as_os_str().is_empty()).collect())
                    .unwrap_or_default(),
            },
            backend: BackendConfig {
                container: non_empty(snapshot.var("HP_CONTAINER_BACKEND")).map(ToOwned::to_owned),
            },
            build: BuildConfig {
                source_date_epoch: non_empty(snapshot.var("SOURCE_DATE_EPOCH"))
                    .and_then(|raw| raw.parse::<u64>().ok())
                    .unwrap_or(0),
            },
        })
    }

    #[must_use]
    pub fn cache(&self) -> &CacheConfig {
        &self.cache
    }

    #[must_use]
    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    #[must_use]
    pub fn index(&self) -> &IndexConfig {
        &self.index
    }

    #[must_use]
    pub fn backend(&self) -> &BackendConfig {
        &self.backend
    }

    #[must_use]
    pub fn build(&self) -> &BuildConfig {
        &self.build
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

#[derive(Debug)]
pub struct CacheConfig {
    pub store: CacheLocation,
}

#[derive(Debug, Clone, Copy)]
pub struct NetworkConfig {
    pub online: bool,
}

/// Environment overrides for the recipe's `[dependencies]` index settings.
#[derive(Debug, Clone, Default)]
pub struct IndexConfig {
    pub index_url: Option<String>,
    pub find_links: Vec<PathBuf>,
}

impl IndexConfig {
    /// `HP_INDEX_URL` when set, otherwise the recipe's value.
    #[must_use]
    pub fn effective_index_url<'a>(&'a self, recipe_value: &'a str) -> &'a str {
        self.index_url
            .as_deref()
            .unwrap_or_else(|| recipe_value.trim_end_matches('/'))
    }

    /// `HP_FIND_LINKS` entries first, then the recipe's, resolved against
    /// `context`.
    #[must_use]
    pub fn effective_find_links(&self, recipe_value: &[PathBuf], context: &Path) -> Vec<PathBuf> {
        let mut links: Vec<PathBuf> = Vec::new();
        for path in self.find_links.iter().chain(recipe_value) {
            let resolved = if path.is_absolute() {
                path.clone()
            } else {
                context.join(path)
            };
            if !links.contains(&resolved) {
                links.push(resolved);
            }
        }
        links
    }
}

#[derive(Debug, Clone, Default)]
pub struct BackendConfig {
    /// `docker`, `podman`, or a path to a compatible binary.
    pub container: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BuildConfig {
    /// Timestamp stamped on every layer entry and on the image config.
    pub source_date_epoch: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    struct DummyCacheStore;

    impl effects::CacheStore for DummyCacheStore {
        fn resolve_store_path(&self, override_path: Option<&Path>) -> Result<CacheLocation> {
            Ok(CacheLocation {
                path: override_path.map_or_else(|| PathBuf::from("/tmp/cache"), Path::to_path_buf),
                source: "test",
            })
        }
    }

    #[test]
    fn defaults_are_online_without_overrides() -> Result<()> {
        let config = Config::from_snapshot(&EnvSnapshot::testing(&[]), &DummyCacheStore)?;
        assert!(config.network().online);
        assert!(config.index().index_url.is_none());
        assert!(config.index().find_links.is_empty());
        assert!(config.backend().container.is_none());
        assert_eq!(config.cache().store.path, PathBuf::from("/tmp/cache"));
        assert_eq!(config.build().source_date_epoch, 0);
        Ok(())
    }

    #[test]
    fn offline_values_disable_network() -> Result<()> {
        for value in ["0", "false", "NO", "off", ""] {
            let snapshot = EnvSnapshot::testing(&[("HP_ONLINE", value)]);
            let config = Config::from_snapshot(&snapshot, &DummyCacheStore)?;
            assert!(!config.network().online, "{value:?} should be offline");
        }
        let snapshot = EnvSnapshot::testing(&[("HP_ONLINE", "1")]);
        assert!(Config::from_snapshot(&snapshot, &DummyCacheStore)?.network().online);
        Ok(())
    }

    #[test]
    fn environment_overrides_recipe_index_settings() -> Result<()> {
        let snapshot = EnvSnapshot::testing(&[
            ("HP_INDEX_URL", "https://mirror.example.invalid/pypi/"),
            ("HP_FIND_LINKS", "/wheels"),
            ("HP_CACHE_DIR", "/var/cache/hp"),
            ("HP_CONTAINER_BACKEND", "podman"),
            ("SOURCE_DATE_EPOCH", "1700000000"),
        ]);
        let config = Config::from_snapshot(&snapshot, &DummyCacheStore)?;
        assert_eq!(
            config.index().effective_index_url("https://pypi.org/pypi"),
            "https://mirror.example.invalid/pypi"
        );
        let links = config
            .index()
            .effective_find_links(&[PathBuf::from("vendor")], Path::new("/ctx"));
        assert_eq!(links, vec![PathBuf::from("/wheels"), PathBuf::from("/ctx/vendor")]);
        assert_eq!(config.cache().store.path, PathBuf::from("/var/cache/hp"));
        assert_eq!(config.backend().container.as_deref(), Some("podman"));
        assert_eq!(config.build().source_date_epoch, 1_700_000_000);
        Ok(())
    }
}
