mod check_cmds;
mod config;
mod export_cmd;
mod import_cmd;
mod source;

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};

use config::PlugforgeConfig;

#[derive(Parser)]
#[command(
    name = "plugforge",
    about = "Validate, simulate, render and package agent plugins",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a plugforge config file with default settings
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Check a plugin for broken references and incomplete components
    Validate {
        /// Plugin JSON snapshot or package (.zip, .tar.gz, .tgz)
        source: PathBuf,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Dry-run a command and report what each step would do
    Simulate {
        /// Plugin JSON snapshot or package (.zip, .tar.gz, .tgz)
        source: PathBuf,
        /// Command name or id (omit to simulate every command)
        command: Option<String>,
        /// Print the results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Render commands as markdown documents
    Render {
        /// Plugin JSON snapshot or package (.zip, .tar.gz, .tgz)
        source: PathBuf,
        /// Command name or id (omit to render every command)
        command: Option<String>,
        /// Output file, or directory when rendering several commands
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Package a plugin as a .zip or .tar.gz archive
    Export {
        /// Plugin JSON snapshot or package (.zip, .tar.gz, .tgz)
        source: PathBuf,
        /// Output archive path (defaults to <plugin-slug>.<ext>)
        #[arg(long)]
        output: Option<PathBuf>,
        /// Archive format: zip or tar.gz (overrides PLUGFORGE_EXPORT_FORMAT)
        #[arg(long)]
        format: Option<String>,
        /// Export even if validation reports errors
        #[arg(long)]
        allow_invalid: bool,
    },
    /// Rebuild a plugin JSON snapshot from a package
    Import {
        /// Package to import (.zip, .tar.gz, .tgz)
        archive: PathBuf,
        /// Output file path (defaults to stdout)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print a shell completion script
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

/// Execute the `plugforge init` command: write config file.
fn cmd_init(force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile::default();
    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  export.format = {}", cfg.export.format);
    println!("  export.allow_invalid = {}", cfg.export.allow_invalid);
    println!("  import.timeout_secs = {}", cfg.import.timeout_secs);
    println!("  import.max_archive_bytes = {}", cfg.import.max_archive_bytes);

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so JSON written to stdout stays parseable.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { force } => {
            cmd_init(force)?;
        }
        Commands::Validate { source, json } => {
            let resolved = PlugforgeConfig::resolve(None, false)?;
            let state = source::load_plugin(&source, &resolved).await?;
            check_cmds::run_validate(&state, json)?;
        }
        Commands::Simulate {
            source,
            command,
            json,
        } => {
            let resolved = PlugforgeConfig::resolve(None, false)?;
            let state = source::load_plugin(&source, &resolved).await?;
            check_cmds::run_simulate(&state, command.as_deref(), json)?;
        }
        Commands::Render {
            source,
            command,
            output,
        } => {
            let resolved = PlugforgeConfig::resolve(None, false)?;
            let state = source::load_plugin(&source, &resolved).await?;
            check_cmds::run_render(&state, command.as_deref(), output.as_deref()).await?;
        }
        Commands::Export {
            source,
            output,
            format,
            allow_invalid,
        } => {
            let resolved = PlugforgeConfig::resolve(format.as_deref(), allow_invalid)?;
            let state = source::load_plugin(&source, &resolved).await?;
            export_cmd::run_export(&state, output.as_deref(), &resolved).await?;
        }
        Commands::Import { archive, output } => {
            let resolved = PlugforgeConfig::resolve(None, false)?;
            import_cmd::run_import(&archive, output.as_deref(), &resolved).await?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "plugforge", &mut std::io::stdout());
        }
    }

    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn export_flags_parse() {
        let cli = Cli::try_parse_from([
            "plugforge",
            "export",
            "plugin.json",
            "--format",
            "tgz",
            "--allow-invalid",
        ])
        .unwrap();
        match cli.command {
            Commands::Export {
                source,
                format,
                allow_invalid,
                output,
            } => {
                assert_eq!(source, PathBuf::from("plugin.json"));
                assert_eq!(format.as_deref(), Some("tgz"));
                assert!(allow_invalid);
                assert!(output.is_none());
            }
            _ => panic!("expected export command"),
        }
    }
}
