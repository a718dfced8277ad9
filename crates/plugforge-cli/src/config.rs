//! Configuration file management for plugforge.
//!
//! Provides a TOML-based config file at `~/.config/plugforge/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use plugforge_core::package::ArchiveFormat;

pub const EXPORT_FORMAT_ENV: &str = "PLUGFORGE_EXPORT_FORMAT";
pub const IMPORT_TIMEOUT_ENV: &str = "PLUGFORGE_IMPORT_TIMEOUT_SECS";

const DEFAULT_IMPORT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_ARCHIVE_BYTES: u64 = 50 * 1024 * 1024;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub export: ExportSection,
    pub import: ImportSection,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSection {
    /// `zip` or `tar.gz`.
    pub format: String,
    /// Export even when validation reports errors.
    pub allow_invalid: bool,
}

impl Default for ExportSection {
    fn default() -> Self {
        Self {
            format: ArchiveFormat::default().to_string(),
            allow_invalid: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportSection {
    pub timeout_secs: u64,
    /// Largest archive accepted, in bytes. `0` disables the check.
    pub max_archive_bytes: u64,
}

impl Default for ImportSection {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_IMPORT_TIMEOUT_SECS,
            max_archive_bytes: DEFAULT_MAX_ARCHIVE_BYTES,
        }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the plugforge config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/plugforge` or
/// `~/.config/plugforge`, also on macOS.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("plugforge");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("plugforge")
}

/// Return the path to the plugforge config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlugforgeConfig {
    pub export_format: ArchiveFormat,
    pub allow_invalid: bool,
    pub import_timeout: Duration,
    /// `None` when the size check is disabled.
    pub max_archive_bytes: Option<u64>,
}

impl PlugforgeConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// - Export format: `cli_format` > `PLUGFORGE_EXPORT_FORMAT` > `export.format` > `zip`
    /// - Allow invalid: `--allow-invalid` > `export.allow_invalid` > `false`
    /// - Import timeout: `PLUGFORGE_IMPORT_TIMEOUT_SECS` > `import.timeout_secs` > 30s
    /// - Size limit: `import.max_archive_bytes` > 50 MiB
    ///
    /// A missing config file is not an error; a malformed one is.
    pub fn resolve(cli_format: Option<&str>, cli_allow_invalid: bool) -> Result<Self> {
        let file_config = if config_path().exists() {
            Some(load_config()?)
        } else {
            None
        };
        Self::resolve_with(file_config.unwrap_or_default(), cli_format, cli_allow_invalid)
    }

    fn resolve_with(
        file: ConfigFile,
        cli_format: Option<&str>,
        cli_allow_invalid: bool,
    ) -> Result<Self> {
        let export_format: ArchiveFormat = if let Some(format) = cli_format {
            format
                .parse()
                .with_context(|| format!("invalid --format {format:?}"))?
        } else if let Ok(format) = std::env::var(EXPORT_FORMAT_ENV) {
            format
                .parse()
                .with_context(|| format!("{EXPORT_FORMAT_ENV} is not a valid archive format"))?
        } else {
            file.export
                .format
                .parse()
                .context("invalid export.format in config file")?
        };

        let timeout_secs: u64 = match std::env::var(IMPORT_TIMEOUT_ENV) {
            Ok(secs) => secs
                .trim()
                .parse()
                .with_context(|| format!("{IMPORT_TIMEOUT_ENV} must be a whole number of seconds"))?,
            Err(_) => file.import.timeout_secs,
        };

        Ok(Self {
            export_format,
            allow_invalid: cli_allow_invalid || file.export.allow_invalid,
            import_timeout: Duration::from_secs(timeout_secs),
            max_archive_bytes: Some(file.import.max_archive_bytes).filter(|&b| b > 0),
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        crate::test_util::lock_env()
    }

    fn clear_env() {
        unsafe { std::env::remove_var(EXPORT_FORMAT_ENV) };
        unsafe { std::env::remove_var(IMPORT_TIMEOUT_ENV) };
    }

    #[test]
    fn defaults_when_nothing_set() {
        let _lock = lock_env();
        clear_env();

        let config = PlugforgeConfig::resolve_with(ConfigFile::default(), None, false).unwrap();
        assert_eq!(config.export_format, ArchiveFormat::Zip);
        assert!(!config.allow_invalid);
        assert_eq!(config.import_timeout, Duration::from_secs(30));
        assert_eq!(config.max_archive_bytes, Some(50 * 1024 * 1024));
    }

    #[test]
    fn cli_flag_overrides_env_and_file() {
        let _lock = lock_env();
        clear_env();
        unsafe { std::env::set_var(EXPORT_FORMAT_ENV, "zip") };

        let mut file = ConfigFile::default();
        file.export.format = "zip".into();
        let config = PlugforgeConfig::resolve_with(file, Some("tgz"), false).unwrap();
        assert_eq!(config.export_format, ArchiveFormat::TarGz);

        clear_env();
    }

    #[test]
    fn env_var_overrides_config_file() {
        let _lock = lock_env();
        clear_env();
        unsafe { std::env::set_var(EXPORT_FORMAT_ENV, "tar.gz") };
        unsafe { std::env::set_var(IMPORT_TIMEOUT_ENV, "5") };

        let mut file = ConfigFile::default();
        file.import.timeout_secs = 120;
        let config = PlugforgeConfig::resolve_with(file, None, false).unwrap();
        assert_eq!(config.export_format, ArchiveFormat::TarGz);
        assert_eq!(config.import_timeout, Duration::from_secs(5));

        clear_env();
    }

    #[test]
    fn bad_values_are_reported() {
        let _lock = lock_env();
        clear_env();

        let err = PlugforgeConfig::resolve_with(ConfigFile::default(), Some("rar"), false)
            .unwrap_err();
        assert!(
            format!("{err:#}").contains("invalid --format"),
            "unexpected error: {err:#}"
        );

        unsafe { std::env::set_var(IMPORT_TIMEOUT_ENV, "soon") };
        let err = PlugforgeConfig::resolve_with(ConfigFile::default(), None, false).unwrap_err();
        assert!(
            err.to_string().contains(IMPORT_TIMEOUT_ENV),
            "unexpected error: {err:#}"
        );

        clear_env();
    }

    #[test]
    fn zero_size_limit_disables_check() {
        let _lock = lock_env();
        clear_env();

        let mut file = ConfigFile::default();
        file.import.max_archive_bytes = 0;
        file.export.allow_invalid = true;
        let config = PlugforgeConfig::resolve_with(file, None, false).unwrap();
        assert_eq!(config.max_archive_bytes, None);
        assert!(config.allow_invalid);
    }

    #[test]
    fn partial_config_file_fills_defaults() {
        let parsed: ConfigFile = toml::from_str("[export]\nformat = \"tar.gz\"\n").unwrap();
        assert_eq!(parsed.export.format, "tar.gz");
        assert!(!parsed.export.allow_invalid);
        assert_eq!(parsed.import.timeout_secs, 30);
    }

    #[test]
    fn default_config_roundtrips_through_toml() {
        let contents = toml::to_string_pretty(&ConfigFile::default()).unwrap();
        let loaded: ConfigFile = toml::from_str(&contents).unwrap();
        assert_eq!(loaded.export.format, "zip");
        assert_eq!(loaded.import.max_archive_bytes, DEFAULT_MAX_ARCHIVE_BYTES);
    }

    #[test]
    fn config_path_ends_with_expected_filename() {
        let path = config_path();
        assert!(
            path.ends_with("plugforge/config.toml"),
            "unexpected config path: {}",
            path.display()
        );
    }
}
