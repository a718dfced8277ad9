//! `plugforge export` command: package a plugin as `.zip` or `.tar.gz`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use plugforge_core::package::{default_archive_name, serialize_plugin, slugify, write_archive};
use plugforge_core::{PluginState, Severity, validate_plugin};

use crate::config::PlugforgeConfig;

/// Run the export command. Returns the path written.
pub async fn run_export(
    state: &PluginState,
    output: Option<&Path>,
    config: &PlugforgeConfig,
) -> Result<PathBuf> {
    let report = validate_plugin(state);
    if !report.is_valid {
        for issue in report.errors() {
            eprintln!("  {issue}");
        }
        if !config.allow_invalid {
            bail!(
                "refusing to export {}: {} validation error(s)\nUse --allow-invalid to export anyway.",
                state.plugin_name,
                report.count(Severity::Error)
            );
        }
        warn!(
            plugin = %state.plugin_name,
            errors = report.count(Severity::Error),
            "exporting plugin with validation errors"
        );
    }

    let files = serialize_plugin(state);
    let mut root = slugify(&state.plugin_name);
    if root.is_empty() {
        root = "plugin".to_owned();
    }
    let bytes = write_archive(config.export_format, &root, &files)
        .with_context(|| format!("failed to build {} archive", config.export_format))?;

    let path = match output {
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(default_archive_name(state, config.export_format)),
    };
    tokio::fs::write(&path, &bytes)
        .await
        .with_context(|| format!("cannot create output file: {}", path.display()))?;

    info!(
        path = %path.display(),
        files = files.len(),
        bytes = bytes.len(),
        "plugin exported"
    );
    println!(
        "Exported {} ({} files) to {}",
        state.plugin_name,
        files.len(),
        path.display()
    );
    Ok(path)
}
