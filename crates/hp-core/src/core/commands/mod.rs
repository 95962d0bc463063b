//! Handlers behind the `hp` subcommands.
//!
//! Handlers return `Err` for anything that goes wrong; user-caused failures
//! are [`InstallUserError`](crate::InstallUserError)s that the CLI turns into
//! exit code 1.

use std::path::{Path, PathBuf};

use anyhow::Result;
use hp_domain::{Recipe, TargetEnvironment};

use crate::core::config::context::CommandContext;
use crate::core::index::{package_source, ChainedSource};
use crate::core::materialize::MaterializeInputs;
use crate::core::tooling::errors::recipe_error;

mod build;
mod check;
mod compile;
mod init;
mod render;
mod sync;

pub use build::{image_build, BuildRequest};
pub use check::recipe_check;
pub use compile::{deps_compile, CompileRequest};
pub use init::{recipe_init, InitRequest};
pub use render::{recipe_render, RenderRequest};
pub use sync::{deps_install, deps_sync, SyncRequest};

/// A parsed recipe plus the directory its relative paths resolve against.
struct LoadedRecipe {
    recipe: Recipe,
    path: PathBuf,
    context: PathBuf,
}

impl LoadedRecipe {
    fn load(ctx: &CommandContext) -> Result<Self> {
        let path = ctx.recipe_path()?;
        let recipe = Recipe::load(&path).map_err(|err| recipe_error(&err))?;
        let context = path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Ok(Self {
            recipe,
            path,
            context,
        })
    }

    fn target(&self) -> Result<TargetEnvironment> {
        Ok(self.recipe.target().map_err(|err| recipe_error(&err))?)
    }

    fn source(&self, ctx: &CommandContext) -> Result<ChainedSource> {
        package_source(&self.recipe, ctx.config(), &self.context)
    }

    fn inputs<'a>(
        &'a self,
        ctx: &'a CommandContext,
        target: &'a TargetEnvironment,
        source: &'a ChainedSource,
        dry_run: bool,
    ) -> MaterializeInputs<'a> {
        MaterializeInputs {
            recipe: &self.recipe,
            context: &self.context,
            target,
            source,
            cache_root: &ctx.cache().path,
            online: ctx.is_online(),
            dry_run,
            preserve: &[],
        }
    }
}
