//! Daemon settings
//!
//! Layered with the `config` crate: built-in defaults, then an optional TOML
//! file, then `DOCFLOW__SECTION__KEY` environment variables.

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use docflow_api_rpc::RpcServerConfig;
use docflow_core::EngineSettings;
use docflow_infra_system::SubprocessConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Explicit settings file; when set, the file must exist
pub const CONFIG_ENV: &str = "DOCFLOW_CONFIG";
const ENV_PREFIX: &str = "DOCFLOW";
const ENV_SEPARATOR: &str = "__";
const DATA_DIR: &str = ".docflow";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    pub database: DatabaseSettings,
    pub rpc: RpcServerConfig,
    pub engine: EngineSettings,
    pub processor: SubprocessConfig,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub url: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        let path = data_dir().join("docflow.db");
        Self {
            url: format!("sqlite://{}", path.display()),
        }
    }
}

impl DatabaseSettings {
    /// Filesystem location of the database, `None` for in-memory URLs
    pub fn file_path(&self) -> Option<PathBuf> {
        if self.url.contains(":memory:") || self.url.contains("mode=memory") {
            return None;
        }
        let path = self
            .url
            .strip_prefix("sqlite://")
            .or_else(|| self.url.strip_prefix("sqlite:"))
            .unwrap_or(&self.url);
        let path = path.split('?').next().unwrap_or(path);
        Some(PathBuf::from(path))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directives; `RUST_LOG` wins when set
    pub level: String,
    pub format: LogFormat,
    /// Directory for daily-rotated log files; stdout only when unset
    pub directory: Option<PathBuf>,
    /// OTLP collector, used when built with the `telemetry` feature
    pub otlp_endpoint: Option<String>,
    pub service_name: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "docflow=info".to_string(),
            format: LogFormat::Pretty,
            directory: None,
            otlp_endpoint: None,
            service_name: "docflow-daemon".to_string(),
        }
    }
}

/// `~/.docflow`, or `.docflow` in the working directory without a home
pub fn data_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(DATA_DIR))
        .unwrap_or_else(|| PathBuf::from(DATA_DIR))
}

impl DaemonSettings {
    /// Load from `DOCFLOW_CONFIG` (or `~/.docflow/docflow.toml`) and the process environment
    pub fn load() -> Result<Self> {
        let (path, required) = match std::env::var_os(CONFIG_ENV) {
            Some(path) => (PathBuf::from(path), true),
            None => (data_dir().join("docflow.toml"), false),
        };
        Self::load_from(&path, required, None)
    }

    /// `env` replaces the process environment when given
    pub fn load_from(
        path: &Path,
        required: bool,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self> {
        let settings = Config::builder()
            .add_source(
                File::from(path)
                    .format(FileFormat::Toml)
                    .required(required),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true)
                    .source(env),
            )
            .build()
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;

        settings
            .try_deserialize()
            .context("Invalid daemon settings")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_defaults_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let settings =
            DaemonSettings::load_from(&dir.path().join("absent.toml"), false, Some(HashMap::new()))
                .unwrap();
        assert_eq!(settings.rpc, RpcServerConfig::default());
        assert_eq!(settings.engine, EngineSettings::default());
        assert_eq!(settings.logging.level, "docflow=info");
        assert!(settings.database.url.ends_with("docflow.db"));
    }

    #[test]
    fn test_missing_required_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result =
            DaemonSettings::load_from(&dir.path().join("absent.toml"), true, Some(HashMap::new()));
        assert!(result.is_err());
    }

    #[test]
    fn test_file_then_env_layering() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docflow.toml");
        fs::write(
            &path,
            r#"
[database]
url = "sqlite::memory:"

[rpc]
port = 7000

[engine]
max_backoff_secs = 120

[engine.sync]
poll_interval_secs = 2

[processor]
command = "/usr/local/bin/ocr"
terminal_exit_codes = [2, 3]

[logging]
format = "json"
"#,
        )
        .unwrap();

        let env = HashMap::from([
            ("DOCFLOW__RPC__PORT".to_string(), "7100".to_string()),
            (
                "DOCFLOW__ENGINE__SYNC__HEARTBEAT_INTERVAL_SECS".to_string(),
                "5".to_string(),
            ),
        ]);
        let settings = DaemonSettings::load_from(&path, true, Some(env)).unwrap();

        assert_eq!(settings.database.url, "sqlite::memory:");
        assert_eq!(settings.database.file_path(), None);
        assert_eq!(settings.rpc.port, 7100);
        assert_eq!(settings.rpc.host, "127.0.0.1");
        assert_eq!(settings.engine.max_backoff_secs, 120);
        assert_eq!(settings.engine.sync.poll_interval_secs, 2);
        assert_eq!(settings.engine.sync.heartbeat_interval_secs, 5);
        assert_eq!(settings.engine.idle_poll_ms, 100);
        assert_eq!(settings.processor.command, "/usr/local/bin/ocr");
        assert_eq!(settings.processor.terminal_exit_codes, vec![2, 3]);
        assert_eq!(settings.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_database_file_path() {
        let db = DatabaseSettings {
            url: "sqlite:///var/lib/docflow/docflow.db?mode=rwc".to_string(),
        };
        assert_eq!(
            db.file_path(),
            Some(PathBuf::from("/var/lib/docflow/docflow.db"))
        );
    }
}
