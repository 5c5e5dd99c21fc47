//! Configuration loading and data-directory resolution.
//!
//! Reads `config.toml` from the data directory (`~/.conclave/` in production)
//! into [`ConclaveConfig`]. The lenient loader falls back to defaults when
//! the file is missing or malformed; the strict one reports why.

use std::path::{Path, PathBuf};

use conclave_types::config::ConclaveConfig;
use conclave_types::error::ErrorCode;
use thiserror::Error;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "CONCLAVE_DATA_DIR";

pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::ConfigurationError
    }
}

/// Resolve the data directory.
///
/// Priority:
/// 1. `CONCLAVE_DATA_DIR` environment variable
/// 2. `~/.conclave`
/// 3. `.conclave` in the current directory
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".conclave");
    }

    PathBuf::from(".conclave")
}

pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE)
}

/// Load `{data_dir}/config.toml`, reporting every problem.
///
/// A missing file is not an error: it yields the defaults.
pub async fn try_load_config(data_dir: &Path) -> Result<ConclaveConfig, ConfigError> {
    let path = config_path(data_dir);

    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", path.display());
            return Ok(ConclaveConfig::default());
        }
        Err(source) => return Err(ConfigError::Read { path, source }),
    };

    let config: ConclaveConfig =
        toml::from_str(&content).map_err(|source| ConfigError::Parse { path, source })?;
    validate(&config)?;
    Ok(config)
}

/// Load `{data_dir}/config.toml`, falling back to defaults with a warning.
pub async fn load_config(data_dir: &Path) -> ConclaveConfig {
    match try_load_config(data_dir).await {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("{err}, using defaults");
            ConclaveConfig::default()
        }
    }
}

fn validate(config: &ConclaveConfig) -> Result<(), ConfigError> {
    if config.coordinator_bot.trim().is_empty() {
        return Err(ConfigError::Invalid("coordinator_bot must not be empty".into()));
    }
    if !(0.0..=1.0).contains(&config.escalation_confidence_threshold) {
        return Err(ConfigError::Invalid(format!(
            "escalation_confidence_threshold must be within 0..=1, got {}",
            config.escalation_confidence_threshold
        )));
    }
    if config.event_channel_capacity == 0 {
        return Err(ConfigError::Invalid("event_channel_capacity must be positive".into()));
    }
    Ok(())
}

/// Write a config file with every default spelled out, unless one exists.
/// Returns whether a file was written.
pub async fn write_default_config(data_dir: &Path) -> Result<bool, ConfigError> {
    let path = config_path(data_dir);
    if tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return Ok(false);
    }
    let content = toml::to_string_pretty(&ConclaveConfig::default())
        .map_err(|e| ConfigError::Invalid(e.to_string()))?;
    tokio::fs::create_dir_all(data_dir)
        .await
        .map_err(|source| ConfigError::Read {
            path: data_dir.to_path_buf(),
            source,
        })?;
    tokio::fs::write(&path, content)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(tmp.path()).await;
        assert_eq!(config, ConclaveConfig::default());
    }

    #[tokio::test]
    async fn load_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            config_path(tmp.path()),
            r#"
coordinator_bot = "researcher"
escalation_confidence_threshold = 0.7

[server]
port = 8080
"#,
        )
        .await
        .unwrap();

        let config = load_config(tmp.path()).await;
        assert_eq!(config.coordinator_bot, "researcher");
        assert_eq!(config.escalation_confidence_threshold, 0.7);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.max_delegation_depth, 4);
    }

    #[tokio::test]
    async fn load_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(config_path(tmp.path()), "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_config(tmp.path()).await;
        assert_eq!(config, ConclaveConfig::default());

        let err = try_load_config(tmp.path()).await.unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert_eq!(err.code(), ErrorCode::ConfigurationError);
    }

    #[tokio::test]
    async fn out_of_range_threshold_is_rejected() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(config_path(tmp.path()), "escalation_confidence_threshold = 3.0")
            .await
            .unwrap();

        let err = try_load_config(tmp.path()).await.unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[tokio::test]
    async fn write_default_config_round_trips() {
        let tmp = TempDir::new().unwrap();
        let data_dir = tmp.path().join("nested");
        assert!(write_default_config(&data_dir).await.unwrap());
        assert!(!write_default_config(&data_dir).await.unwrap());
        assert_eq!(try_load_config(&data_dir).await.unwrap(), ConclaveConfig::default());
    }

    #[test]
    fn test_resolve_data_dir_from_env() {
        // SAFETY: This test is single-threaded and restores the env var immediately.
        unsafe {
            std::env::set_var(DATA_DIR_ENV, "/tmp/test-conclave");
        }
        let dir = resolve_data_dir();
        assert_eq!(dir, PathBuf::from("/tmp/test-conclave"));
        unsafe {
            std::env::remove_var(DATA_DIR_ENV);
        }
    }
}
