pub(crate) mod commands;
pub(crate) mod config;
pub(crate) mod env;
pub(crate) mod index;
pub(crate) mod materialize;
pub(crate) mod metadata;
pub(crate) mod pipeline;
pub(crate) mod runtime;
pub(crate) mod store;
pub(crate) mod tooling;

#[cfg(test)]
pub(crate) mod testing;
