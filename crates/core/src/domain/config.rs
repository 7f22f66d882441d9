//! Configuration management for aggvol
//!
//! This module provides:
//! - Configuration structs for the controller and the aggregation engine
//! - TOML persistence with a factory-default fallback
//! - Hot-reload support via file system watcher

use crate::domain::engine::EngineOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument};

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur during configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("File watch error: {0}")]
    WatchError(#[from] notify::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Controller and refresh-loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Volume change per hotkey press (1/16 of full scale by default)
    pub volume_step: f32,

    /// Polling period of the run loop in milliseconds
    pub refresh_interval_ms: u64,

    /// Subscribe to OS change notifications where the platform supports it
    pub listen_for_changes: bool,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            volume_step: 0.0625,
            refresh_interval_ms: 50,
            listen_for_changes: true,
        }
    }
}

impl ControlConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}

/// Complete aggvol configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AggvolConfig {
    #[serde(default)]
    pub control: ControlConfig,

    #[serde(default)]
    pub engine: EngineOptions,
}

impl AggvolConfig {
    /// Load configuration from TOML file
    #[instrument(skip(path))]
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = fs::read_to_string(path).await?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;

        debug!("Configuration loaded successfully");
        Ok(config)
    }

    /// Save configuration to TOML file
    #[instrument(skip(self, path))]
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!(path = %path.display(), "Saving configuration");

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let toml_str = toml::to_string_pretty(self)?;
        fs::write(path, toml_str).await?;

        debug!("Configuration saved successfully");
        Ok(())
    }

    /// Create factory default configuration
    pub fn factory_default() -> Self {
        Self::default()
    }

    /// Reject values the controller cannot work with
    pub fn validate(&self) -> Result<()> {
        let step = self.control.volume_step;
        if !(step > 0.0 && step <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "volume_step must be in (0, 1], got {}",
                step
            )));
        }
        if self.control.refresh_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "refresh_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.engine.probe_channels.is_empty() {
            return Err(ConfigError::Invalid(
                "probe_channels must list at least one channel".to_string(),
            ));
        }
        Ok(())
    }
}

/// File system watcher for hot-reload
pub struct ConfigWatcher {
    _watcher: notify::RecommendedWatcher,
    config_tx: broadcast::Sender<PathBuf>,
}

impl ConfigWatcher {
    /// Watch the directory holding `config_path` and report changes to that file
    pub async fn new(config_path: PathBuf) -> Result<Self> {
        use notify::Watcher;

        let (config_tx, _config_rx) = broadcast::channel(32);

        let config_dir = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&config_dir).await?;

        let file_name = config_path.file_name().map(|name| name.to_os_string());
        let tx_clone = config_tx.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                if matches!(
                    event.kind,
                    notify::EventKind::Create(_) | notify::EventKind::Modify(_)
                ) {
                    for path in event.paths {
                        if path.file_name().map(|name| name.to_os_string()) == file_name {
                            // No receivers just means nobody is reloading yet
                            if let Err(e) = tx_clone.send(path) {
                                debug!("Config change not delivered: {}", e);
                            }
                        }
                    }
                }
            }
        })?;

        watcher.watch(&config_dir, notify::RecursiveMode::NonRecursive)?;

        info!(
            path = %config_path.display(),
            "Config watcher started"
        );

        Ok(Self {
            _watcher: watcher,
            config_tx,
        })
    }

    /// Subscribe to config change events
    pub fn subscribe(&self) -> broadcast::Receiver<PathBuf> {
        self.config_tx.subscribe()
    }
}

/// Configuration manager for the main aggvol config
///
/// Manages the configuration file at `~/.config/aggvol/config.toml`, or at
/// an explicit path given on the command line.
pub struct ConfigManager {
    config_dir: PathBuf,
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a manager for `config_dir/config.toml`
    pub fn new(config_dir: PathBuf) -> Self {
        let config_path = config_dir.join("config.toml");

        Self {
            config_dir,
            config_path,
        }
    }

    /// Create a manager for an explicit file path
    pub fn with_path(config_path: PathBuf) -> Self {
        let config_dir = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            config_dir,
            config_path,
        }
    }

    /// Get the default config directory path
    ///
    /// Returns `~/.config/aggvol` on Linux, `~/Library/Application Support/aggvol`
    /// on macOS
    pub fn default_config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join("aggvol"))
            .ok_or_else(|| ConfigError::Invalid("Could not determine config directory".to_string()))
    }

    /// Get the config file path
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load configuration from file
    ///
    /// If the config file doesn't exist, writes and returns the factory default.
    /// If the config file is corrupt or invalid, backs it up and returns the
    /// factory default.
    #[instrument(skip(self))]
    pub async fn load(&self) -> AggvolConfig {
        if !self.config_path.exists() {
            info!(
                path = %self.config_path.display(),
                "Config file not found, creating factory default"
            );

            let config = AggvolConfig::factory_default();

            if let Err(e) = self.save(&config).await {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to save factory default config"
                );
            }

            return config;
        }

        match AggvolConfig::load_from_file(&self.config_path).await {
            Ok(config) => {
                info!(
                    path = %self.config_path.display(),
                    "Configuration loaded successfully"
                );
                config
            }
            Err(e) => {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to load config, using factory default"
                );

                let backup_path = self.config_path.with_extension("toml.corrupt");
                if let Err(copy_err) = fs::copy(&self.config_path, &backup_path).await {
                    error!(
                        path = %backup_path.display(),
                        error = %copy_err,
                        "Failed to backup corrupt config"
                    );
                }

                AggvolConfig::factory_default()
            }
        }
    }

    /// Re-read the file after a change event, keeping `current` on failure
    #[instrument(skip(self, current))]
    pub async fn reload(&self, current: &AggvolConfig) -> AggvolConfig {
        match AggvolConfig::load_from_file(&self.config_path).await {
            Ok(config) => config,
            Err(e) => {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Ignoring config change"
                );
                current.clone()
            }
        }
    }

    /// Save configuration to file
    #[instrument(skip(self, config))]
    pub async fn save(&self, config: &AggvolConfig) -> Result<()> {
        config.validate()?;
        fs::create_dir_all(&self.config_dir).await?;

        config.save_to_file(&self.config_path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_serialization() {
        let config = AggvolConfig::factory_default();

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AggvolConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config, parsed);
        assert!(toml_str.contains("[control]"));
        assert!(toml_str.contains("[engine]"));
    }

    #[test]
    fn test_factory_defaults() {
        let config = AggvolConfig::factory_default();
        assert_eq!(config.control.volume_step, 0.0625);
        assert_eq!(config.control.refresh_interval(), Duration::from_millis(50));
        assert!(config.control.listen_for_changes);
        assert_eq!(config.engine.probe_channels, vec![0, 1, 2]);
        assert!(config.engine.virtual_main_volume);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: AggvolConfig = toml::from_str(
            r#"
            [control]
            volume_step = 0.1
            "#,
        )
        .unwrap();

        assert_eq!(config.control.volume_step, 0.1);
        assert_eq!(config.control.refresh_interval_ms, 50);
        assert_eq!(config.engine, EngineOptions::default());
    }

    #[test]
    fn test_validation() {
        let mut config = AggvolConfig::factory_default();
        config.control.volume_step = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.control.volume_step = 1.5;
        assert!(config.validate().is_err());

        config.control.volume_step = f32::NAN;
        assert!(config.validate().is_err());

        config.control.volume_step = 1.0;
        assert!(config.validate().is_ok());

        config.control.refresh_interval_ms = 0;
        assert!(config.validate().is_err());

        config.control.refresh_interval_ms = 50;
        config.engine.probe_channels.clear();
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_save_and_load_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let mut config = AggvolConfig::factory_default();
        config.control.volume_step = 0.125;
        config.engine.probe_channels = vec![0, 1, 2, 3, 4];
        config.save_to_file(&config_path).await.unwrap();

        assert!(config_path.exists());

        let loaded = AggvolConfig::load_from_file(&config_path).await.unwrap();
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn test_manager_creates_factory_default() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::new(temp_dir.path().join("aggvol"));

        assert!(!manager.config_path().exists());
        let config = manager.load().await;

        assert_eq!(config, AggvolConfig::factory_default());
        assert!(manager.config_path().exists());
    }

    #[tokio::test]
    async fn test_manager_backs_up_corrupt_config() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::new(temp_dir.path().to_path_buf());
        tokio::fs::write(manager.config_path(), "volume_step = [oops")
            .await
            .unwrap();

        let config = manager.load().await;

        assert_eq!(config, AggvolConfig::factory_default());
        assert!(temp_dir.path().join("config.toml.corrupt").exists());
    }

    #[tokio::test]
    async fn test_manager_rejects_invalid_values() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_path(temp_dir.path().join("custom.toml"));
        tokio::fs::write(manager.config_path(), "[control]\nvolume_step = 4.0\n")
            .await
            .unwrap();

        let config = manager.load().await;
        assert_eq!(config.control.volume_step, 0.0625);
        assert!(temp_dir.path().join("custom.toml.corrupt").exists());

        let mut bad = config.clone();
        bad.control.refresh_interval_ms = 0;
        assert!(manager.save(&bad).await.is_err());
    }

    #[tokio::test]
    async fn test_reload_keeps_current_on_error() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::new(temp_dir.path().to_path_buf());

        let mut current = AggvolConfig::factory_default();
        current.control.volume_step = 0.25;
        tokio::fs::write(manager.config_path(), "not toml at all = = =")
            .await
            .unwrap();
        assert_eq!(manager.reload(&current).await, current);

        let mut updated = AggvolConfig::factory_default();
        updated.control.refresh_interval_ms = 200;
        manager.save(&updated).await.unwrap();
        assert_eq!(manager.reload(&current).await, updated);
    }

    #[tokio::test]
    async fn test_watcher_subscribes() {
        let temp_dir = TempDir::new().unwrap();
        let watcher = ConfigWatcher::new(temp_dir.path().join("config.toml"))
            .await
            .unwrap();
        let _rx = watcher.subscribe();
    }
}
