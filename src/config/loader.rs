//! Configuration Loader
//!
//! Layers built-in defaults, an optional TOML file and `FANOUT__*` environment
//! variables into a [`FanoutConfig`]. Nested keys use a double underscore, so
//! `FANOUT__RETRY__MAX_ATTEMPTS=5` sets `retry.max_attempts`.

use super::error::{ConfigResult, ConfigurationError};
use super::FanoutConfig;
use config::{Config, Environment, File, FileFormat};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "FANOUT";

/// Builder for loading a [`FanoutConfig`]
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    env_source: Option<HashMap<String, String>>,
    skip_env: bool,
    validate: bool,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a TOML file; it must exist
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Read overrides from an explicit map instead of the process environment
    pub fn with_env_source(mut self, vars: HashMap<String, String>) -> Self {
        self.env_source = Some(vars);
        self
    }

    pub fn without_env(mut self) -> Self {
        self.skip_env = true;
        self
    }

    /// Run [`FanoutConfig::validate`] after loading.
    ///
    /// Off by default: deployment files usually omit the per-job fields that the
    /// dispatch event supplies.
    pub fn validated(mut self) -> Self {
        self.validate = true;
        self
    }

    pub fn load(&self) -> ConfigResult<FanoutConfig> {
        let defaults = Config::try_from(&FanoutConfig::default())?;
        let mut builder = Config::builder().add_source(defaults);

        if let Some(path) = &self.file {
            if !path.exists() {
                return Err(ConfigurationError::ConfigFileNotFound { path: path.clone() });
            }
            debug!(path = %path.display(), "Loading fanout configuration file");
            builder = builder.add_source(File::from(path.as_path()).format(FileFormat::Toml));
        }

        if !self.skip_env {
            let env = Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .source(self.env_source.clone());
            builder = builder.add_source(env);
        }

        let config: FanoutConfig = builder.build()?.try_deserialize()?;

        if self.validate {
            config.validate()?;
        }

        debug!(
            num_levels = config.num_levels,
            max_parallelism = config.max_parallelism,
            max_concurrent_jobs = ?config.max_concurrent_jobs,
            "Fanout configuration loaded"
        );
        Ok(config)
    }
}
