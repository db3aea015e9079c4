use crate::models::AppConfig;
use ::config::{Config, Environment, File, FileFormat};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;

/// File name of the application configuration inside the config directory
pub const CONFIG_FILE_NAME: &str = "mknettest.yaml";

/// Prefix of environment variables that override the configuration file
pub const ENV_PREFIX: &str = "MKNETTEST";

/// Separates nested keys in environment variable names
pub const ENV_SEPARATOR: &str = "__";

/// Configuration manager for loading and saving `mknettest.yaml`.
///
/// Loading is layered: built-in defaults, then the YAML file (optional), then
/// `MKNETTEST__<SECTION>__<KEY>` environment variables. For example
/// `MKNETTEST__NETTEST__NAME=WebConnectivity` selects another test without
/// touching the file.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    app_config_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager with the specified configuration directory.
    ///
    /// The directory is created if it doesn't exist.
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            app_config_path: config_dir.join(CONFIG_FILE_NAME),
            config_dir,
        })
    }

    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    pub fn app_config_path(&self) -> &Utf8Path {
        &self.app_config_path
    }

    /// Load the application configuration from the file and the process
    /// environment.
    ///
    /// # Returns
    /// The merged AppConfig; defaults fill anything neither layer sets
    pub fn load_app_config(&self) -> Result<AppConfig> {
        self.load_with_environment(Self::environment())
    }

    /// Load with an explicit environment layer in place of the process one
    pub fn load_with_environment(&self, environment: Environment) -> Result<AppConfig> {
        if self.app_config_path.exists() {
            tracing::info!("Loading configuration from {}", self.app_config_path);
        } else {
            tracing::warn!(
                "Config file not found at {}, using defaults",
                self.app_config_path
            );
        }

        let merged = Config::builder()
            .add_source(File::new(self.app_config_path.as_str(), FileFormat::Yaml).required(false))
            .add_source(environment)
            .build()
            .with_context(|| format!("Failed to read configuration: {}", self.app_config_path))?;

        let config: AppConfig = merged
            .try_deserialize()
            .with_context(|| format!("Failed to parse configuration: {}", self.app_config_path))?;

        tracing::debug!("Effective configuration: {:?}", config);
        Ok(config)
    }

    /// Save the application configuration file.
    pub fn save_app_config(&self, config: &AppConfig) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(config).context("Failed to serialize config to YAML")?;

        fs::write(&self.app_config_path, yaml_string)
            .with_context(|| format!("Failed to write config: {}", self.app_config_path))?;

        tracing::info!("Saved config to {}", self.app_config_path);
        Ok(())
    }

    /// The `MKNETTEST__SECTION__KEY` environment layer
    pub fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator(ENV_SEPARATOR)
            .separator(ENV_SEPARATOR)
            .try_parsing(true)
    }
}
