use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use hp_domain::DEFAULT_RECIPE_FILE;

use crate::core::config::{Config, EnvSnapshot, GlobalOptions};
use crate::core::runtime::effects::{self, Effects, SharedEffects};
use crate::core::runtime::CommandGroup;
use crate::core::store::CacheLocation;

#[derive(Clone, Copy, Debug)]
pub struct CommandInfo {
    pub group: CommandGroup,
    pub name: &'static str,
}

impl CommandInfo {
    #[must_use]
    pub const fn new(group: CommandGroup, name: &'static str) -> Self {
        Self { group, name }
    }
}

pub struct CommandContext<'a> {
    pub global: &'a GlobalOptions,
    config: Config,
    effects: SharedEffects,
}

impl<'a> CommandContext<'a> {
    /// Creates a new command context with the provided global options.
    ///
    /// # Errors
    /// Returns an error if the environment snapshot or configuration cannot be prepared.
    pub fn new(global: &'a GlobalOptions, effects: SharedEffects) -> Result<Self> {
        let env = EnvSnapshot::capture();
        Self::with_snapshot(global, &env, effects)
    }

    pub(crate) fn with_snapshot(
        global: &'a GlobalOptions,
        env: &EnvSnapshot,
        effects: SharedEffects,
    ) -> Result<Self> {
        let config = Config::from_snapshot(env, effects.cache())?;
        Ok(Self {
            global,
            config,
            effects,
        })
    }

    pub fn effects(&self) -> &dyn Effects {
        self.effects.as_ref()
    }

    pub fn cache(&self) -> &CacheLocation {
        &self.config.cache().store
    }

    pub fn is_online(&self) -> bool {
        self.config.network().online
    }

    pub fn fs(&self) -> &dyn effects::FileSystem {
        self.effects.fs()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The recipe path from `-C/--recipe`, or `hp.toml` in the working directory.
    ///
    /// # Errors
    /// Returns an error if the working directory cannot be determined.
    pub fn recipe_path(&self) -> Result<PathBuf> {
        let cwd = env::current_dir().context("unable to determine current directory")?;
        let path = self
            .global
            .recipe
            .as_deref()
            .map_or_else(|| PathBuf::from(DEFAULT_RECIPE_FILE), PathBuf::from);
        Ok(if path.is_absolute() {
            path
        } else {
            cwd.join(path)
        })
    }
}
