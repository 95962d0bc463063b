//! Package sources backing resolution and installation.

use std::path::Path;

use anyhow::Result;
use hp_domain::{PackageSource, Recipe};
use tracing::debug;

mod chained;
mod find_links;
mod pypi;

pub(crate) use chained::ChainedSource;
pub(crate) use find_links::FindLinksIndex;
pub(crate) use pypi::PypiIndex;

use crate::core::config::Config;

/// Find-links directories first, then the package index.
pub(crate) fn package_source(
    recipe: &Recipe,
    config: &Config,
    context: &Path,
) -> Result<ChainedSource> {
    let deps = &recipe.dependencies;
    let index_url = config.index().effective_index_url(&deps.index_url);
    let find_links = config.index().effective_find_links(&deps.find_links, context);
    debug!(
        index = index_url,
        find_links = find_links.len(),
        online = config.network().online,
        "package sources"
    );

    let mut sources: Vec<Box<dyn PackageSource>> = Vec::new();
    if !find_links.is_empty() {
        sources.push(Box::new(FindLinksIndex::new(find_links)));
    }
    sources.push(Box::new(PypiIndex::new(index_url, config.network().online)?));
    Ok(ChainedSource::new(sources))
}
