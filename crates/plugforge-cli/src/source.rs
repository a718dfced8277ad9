//! Loading a plugin from the path given on the command line.
//!
//! A path with an archive extension is imported as a package; anything else
//! is read as a JSON plugin snapshot.

use std::path::Path;

use anyhow::{Context, Result, anyhow};

use plugforge_core::package::{ArchiveFormat, ParsedPlugin, import_archive};
use plugforge_core::{PluginState, PluginStore};

use crate::config::PlugforgeConfig;

/// Import a package, giving up after the configured timeout.
pub async fn import_with_timeout(path: &Path, config: &PlugforgeConfig) -> Result<ParsedPlugin> {
    tokio::time::timeout(
        config.import_timeout,
        import_archive(path, config.max_archive_bytes),
    )
    .await
    .map_err(|_| {
        anyhow!(
            "import of {} timed out after {}s",
            path.display(),
            config.import_timeout.as_secs()
        )
    })?
    .with_context(|| format!("failed to import {}", path.display()))
}

/// Load a plugin snapshot from a package or a JSON file.
pub async fn load_plugin(path: &Path, config: &PlugforgeConfig) -> Result<PluginState> {
    let is_archive = path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(ArchiveFormat::from_file_name)
        .is_some();

    if is_archive {
        let parsed = import_with_timeout(path, config).await?;
        let mut store = PluginStore::new(parsed.plugin_name.clone());
        store.import_plugin(parsed);
        return Ok(store.into_state());
    }

    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let state: PluginState = serde_json::from_str(&contents)
        .with_context(|| format!("{} is not a plugin JSON snapshot", path.display()))?;
    Ok(state)
}
