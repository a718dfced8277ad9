//! `plugforge import` command: rebuild a plugin snapshot from a package.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use plugforge_core::PluginStore;

use crate::config::PlugforgeConfig;
use crate::source::import_with_timeout;

/// Import `archive` and print the plugin as JSON, or write it to `output`.
pub async fn run_import(
    archive: &Path,
    output: Option<&Path>,
    config: &PlugforgeConfig,
) -> Result<()> {
    let parsed = import_with_timeout(archive, config).await?;
    info!(
        plugin = %parsed.plugin_name,
        skills = parsed.skills.len(),
        agents = parsed.agents.len(),
        commands = parsed.commands.len(),
        hooks = parsed.hooks.len(),
        mcps = parsed.mcps.len(),
        "package imported"
    );

    let mut store = PluginStore::new(parsed.plugin_name.clone());
    store.import_plugin(parsed);
    let state = store.into_state();
    let json = serde_json::to_string_pretty(&state).context("failed to serialize plugin")?;

    match output {
        Some(path) => {
            tokio::fs::write(path, format!("{json}\n"))
                .await
                .with_context(|| format!("cannot create output file: {}", path.display()))?;
            println!(
                "Imported {} v{} to {}",
                state.plugin_name,
                state.version,
                path.display()
            );
        }
        None => println!("{json}"),
    }
    Ok(())
}
