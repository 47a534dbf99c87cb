//! Configuration file lookup and logging settings

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable consulted when no config path is given on the command line
pub const CONFIG_ENV_VAR: &str = "SODA_CONFIG";

/// Logging configuration
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl LoggingConfig {
    /// Check that the level is one tracing understands
    pub fn validate(&self) -> Result<()> {
        match self.level.to_ascii_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
            other => Err(Error::Config(format!("Unknown log level: {}", other))),
        }
    }
}

/// Config file resolution following priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. OS-dependent default location, if a file exists there
///
/// Returns `Ok(None)` when nothing is configured and no default file exists;
/// callers then fall back to built-in defaults. An explicitly named file that
/// does not exist is an error.
pub fn resolve_config_file(
    cli_arg: Option<&str>,
    env_var_name: &str,
    app_name: &str,
) -> Result<Option<PathBuf>> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return require_existing(PathBuf::from(path)).map(Some);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return require_existing(PathBuf::from(path)).map(Some);
        }
    }

    // Priority 3: OS-dependent default
    Ok(default_config_file(app_name).filter(|p| p.exists()))
}

fn require_existing(path: PathBuf) -> Result<PathBuf> {
    if path.exists() {
        Ok(path)
    } else {
        Err(Error::NotFound(format!("Config file not found: {}", path.display())))
    }
}

/// Get the default configuration file path for the platform
pub fn default_config_file(app_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(app_name).join("config.toml"))
}

/// Read and parse a TOML file into any deserializable config type
pub fn load_toml_file<T>(path: &Path) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let content = std::fs::read_to_string(path)?;
    toml::from_str::<T>(&content)
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Read an environment variable and parse it, reporting parse failures as config errors
///
/// Returns `Ok(None)` when the variable is unset or blank.
pub fn env_override<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::Config(format!("Invalid value for {}: {} ({})", name, raw, e))),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    #[serial]
    fn test_cli_argument_wins() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nlevel = \"debug\"").unwrap();
        std::env::set_var("SODA_TEST_CONFIG_A", "/does/not/exist.toml");

        let path = file.path().to_str().unwrap();
        let resolved = resolve_config_file(Some(path), "SODA_TEST_CONFIG_A", "soda-test").unwrap();
        assert_eq!(resolved, Some(file.path().to_path_buf()));

        std::env::remove_var("SODA_TEST_CONFIG_A");
    }

    #[test]
    #[serial]
    fn test_env_var_used_without_cli() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::env::set_var("SODA_TEST_CONFIG_B", file.path());

        let resolved = resolve_config_file(None, "SODA_TEST_CONFIG_B", "soda-test").unwrap();
        assert_eq!(resolved, Some(file.path().to_path_buf()));

        std::env::remove_var("SODA_TEST_CONFIG_B");
    }

    #[test]
    #[serial]
    fn test_missing_explicit_file_is_error() {
        let result = resolve_config_file(Some("/no/such/soda.toml"), "SODA_TEST_CONFIG_C", "soda-test");
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_logging_level_validation() {
        assert!(LoggingConfig::default().validate().is_ok());
        let bad = LoggingConfig {
            level: "verbose".to_string(),
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_env_override_parsing() {
        std::env::set_var("SODA_TEST_WORKERS", "8");
        assert_eq!(env_override::<usize>("SODA_TEST_WORKERS").unwrap(), Some(8));

        std::env::set_var("SODA_TEST_WORKERS", "eight");
        assert!(env_override::<usize>("SODA_TEST_WORKERS").is_err());

        std::env::remove_var("SODA_TEST_WORKERS");
        assert_eq!(env_override::<usize>("SODA_TEST_WORKERS").unwrap(), None);
    }

    #[test]
    fn test_load_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "level = \"warn\"").unwrap();

        let config: LoggingConfig = load_toml_file(file.path()).unwrap();
        assert_eq!(config.level, "warn");
    }
}
