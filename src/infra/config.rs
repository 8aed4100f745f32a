//! Configuration management infrastructure.
//!
//! Loads and persists user preferences: the vault password guarding private
//! keys at rest, network timeout overrides, and the identity-store directory.
//! The vault password is process-scoped once loaded; it is never logged.

use crate::infra::error::{SignerError, SignerResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Application configuration persisted as TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Password deriving the vault key for encrypted private keys at rest.
    pub vault_password: String,

    /// Manifest / JWKS fetch timeout in seconds.
    pub fetch_timeout_seconds: u64,

    /// Callback submission timeout in seconds.
    pub submit_timeout_seconds: u64,

    /// Overall deadline for system-store scans in seconds.
    pub scan_timeout_seconds: u64,

    /// Maximum parallel NSS scan workers.
    pub scan_parallelism: usize,

    /// Override for the identity-store directory (defaults to `<app-data>/store`).
    pub store_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            vault_password: "default-vault-password".to_string(),
            fetch_timeout_seconds: 10,
            submit_timeout_seconds: 30,
            scan_timeout_seconds: 60,
            scan_parallelism: 4,
            store_dir: None,
        }
    }
}

/// Configuration manager for handling the config file
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new configuration manager with the default path
    pub fn new() -> SignerResult<Self> {
        let config_path = Self::default_config_path()?;
        Ok(Self { config_path })
    }

    /// Create a configuration manager with a custom path
    pub fn with_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            config_path: path.as_ref().to_path_buf(),
        }
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> SignerResult<PathBuf> {
        if let Some(config_dir) = dirs::config_dir() {
            Ok(config_dir.join("vocsign").join("config.toml"))
        } else {
            Ok(PathBuf::from("vocsign-config.toml"))
        }
    }

    /// Load configuration from file, creating the default if it doesn't exist
    pub fn load_or_create_default(&self) -> SignerResult<AppConfig> {
        if self.config_path.exists() {
            self.load()
        } else {
            log::info!(
                "Configuration file not found, creating default: {}",
                self.config_path.display()
            );
            let default_config = AppConfig::default();
            self.save(&default_config)?;
            Ok(default_config)
        }
    }

    /// Load configuration from file
    pub fn load(&self) -> SignerResult<AppConfig> {
        let content = fs::read_to_string(&self.config_path).map_err(|e| {
            SignerError::Configuration(format!(
                "failed to read config file {}: {e}",
                self.config_path.display()
            ))
        })?;

        let config: AppConfig = toml::from_str(&content).map_err(|e| {
            SignerError::Configuration(format!("failed to parse config file: {e}"))
        })?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, config: &AppConfig) -> SignerResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                SignerError::Configuration(format!(
                    "failed to create config directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let content = toml::to_string_pretty(config)
            .map_err(|e| SignerError::Configuration(format!("failed to serialize config: {e}")))?;

        fs::write(&self.config_path, content).map_err(|e| {
            SignerError::Configuration(format!(
                "failed to write config file {}: {e}",
                self.config_path.display()
            ))
        })?;
        Ok(())
    }

    fn validate(config: &AppConfig) -> SignerResult<()> {
        if config.vault_password.is_empty() {
            return Err(SignerError::Configuration(
                "vault_password must not be empty".to_string(),
            ));
        }
        if config.fetch_timeout_seconds == 0 || config.submit_timeout_seconds == 0 {
            return Err(SignerError::Configuration(
                "network timeouts must be greater than 0".to_string(),
            ));
        }
        if config.scan_parallelism == 0 {
            return Err(SignerError::Configuration(
                "scan_parallelism must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_configuration() {
        let config = AppConfig::default();
        assert_eq!(config.fetch_timeout_seconds, 10);
        assert_eq!(config.submit_timeout_seconds, 30);
        assert_eq!(config.scan_parallelism, 4);
        assert!(config.store_dir.is_none());
    }

    #[test]
    fn test_config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.vault_password, deserialized.vault_password);
        assert_eq!(config.scan_timeout_seconds, deserialized.scan_timeout_seconds);
    }

    #[test]
    fn test_config_manager_with_temp_path() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        let manager = ConfigManager::with_path(&config_path);

        let config = manager.load_or_create_default().unwrap();
        assert!(config_path.exists());

        let loaded = manager.load().unwrap();
        assert_eq!(config.vault_password, loaded.vault_password);
    }

    #[test]
    fn test_rejects_empty_vault_password() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(
            &config_path,
            "vault_password = \"\"\nfetch_timeout_seconds = 10\nsubmit_timeout_seconds = 30\nscan_timeout_seconds = 60\nscan_parallelism = 4\n",
        )
        .unwrap();
        let manager = ConfigManager::with_path(&config_path);
        assert!(manager.load().is_err());
    }
}
