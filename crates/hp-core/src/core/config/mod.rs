pub(crate) mod context;
mod settings;

pub(crate) use settings::EnvSnapshot;
pub use settings::{
    BackendConfig, BuildConfig, CacheConfig, Config, GlobalOptions, IndexConfig, NetworkConfig,
};
