//! Replace-by-title registration of deploy keys.
//!
//! Imports only from `crate::domain` and `crate::application::ports`.

use anyhow::{Context, Result};
use tracing::debug;

use crate::application::ports::KeyRegistry;
use crate::domain::DeployKey;

/// Register `key` under `title`, first removing every key with exactly that
/// title. Keys with other titles are never touched.
///
/// # Errors
///
/// Returns an error if listing, removing or creating keys fails.
pub async fn replace_key(registry: &impl KeyRegistry, title: &str, key: &str) -> Result<DeployKey> {
    let existing = registry.list().await.context("listing deploy keys")?;
    for old in existing.iter().filter(|k| k.title == title) {
        debug!(id = old.id, title = %old.title, "removing deploy key");
        registry
            .delete(old.id)
            .await
            .with_context(|| format!("removing deploy key {} ('{}')", old.id, old.title))?;
    }
    registry
        .create(title, key)
        .await
        .with_context(|| format!("adding deploy key '{title}'"))
}
