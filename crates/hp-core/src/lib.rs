#![deny(clippy::all, warnings)]

mod core;

pub use crate::core::commands::{
    deps_compile, deps_install, deps_sync, image_build, recipe_check, recipe_init, recipe_render,
    BuildRequest, CompileRequest, InitRequest, RenderRequest, SyncRequest,
};
pub use crate::core::config::context::{CommandContext, CommandInfo};
pub use crate::core::config::{
    BackendConfig, BuildConfig, CacheConfig, Config, GlobalOptions, IndexConfig, NetworkConfig,
};
pub use crate::core::runtime::effects::SystemEffects;
pub use crate::core::runtime::{CommandGroup, HP_VERSION};
pub use crate::core::tooling::errors::{codes, format_status_message, to_json_response};
pub use crate::core::tooling::outcome::{CommandStatus, ExecutionOutcome, InstallUserError};
pub use hp_domain::DependencyMode;
