use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::core::pipeline::base::{BaseLayerProvider, ContainerBaseLayers};
use crate::core::store::{resolve_cache_store_path, CacheLocation};

pub trait FileSystem: Send + Sync {
    fn write(&self, path: &Path, contents: &[u8]) -> Result<()>;
    fn create_dir_all(&self, path: &Path) -> Result<()>;
}

pub trait CacheStore: Send + Sync {
    fn resolve_store_path(&self, override_path: Option<&Path>) -> Result<CacheLocation>;
}

pub trait Effects: Send + Sync {
    fn fs(&self) -> &dyn FileSystem;
    fn cache(&self) -> &dyn CacheStore;
    fn base_layers(&self) -> &dyn BaseLayerProvider;
}

pub type SharedEffects = Arc<dyn Effects>;

pub struct SystemEffects {
    fs: Arc<SystemFileSystem>,
    cache: Arc<SystemCacheStore>,
    base_layers: Arc<ContainerBaseLayers>,
}

impl SystemEffects {
    #[must_use]
    pub fn new() -> Self {
        Self {
            fs: Arc::new(SystemFileSystem),
            cache: Arc::new(SystemCacheStore),
            base_layers: Arc::new(ContainerBaseLayers),
        }
    }

    #[must_use]
    pub fn shared() -> SharedEffects {
        Arc::new(Self::new())
    }
}

impl Default for SystemEffects {
    fn default() -> Self {
        Self::new()
    }
}

impl Effects for SystemEffects {
    fn fs(&self) -> &dyn FileSystem {
        self.fs.as_ref()
    }

    fn cache(&self) -> &dyn CacheStore {
        self.cache.as_ref()
    }

    fn base_layers(&self) -> &dyn BaseLayerProvider {
        self.base_layers.as_ref()
    }
}

struct SystemFileSystem;

impl FileSystem for SystemFileSystem {
    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            self.create_dir_all(parent)?;
        }
        std::fs::write(path, contents).with_context(|| format!("writing {}", path.display()))
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        std::fs::create_dir_all(path).with_context(|| format!("creating {}", path.display()))
    }
}

struct SystemCacheStore;

impl CacheStore for SystemCacheStore {
    fn resolve_store_path(&self, override_path: Option<&Path>) -> Result<CacheLocation> {
        resolve_cache_store_path(override_path)
    }
}
