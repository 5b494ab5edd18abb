//! Configuration Error Types
//!
//! Specific, actionable errors for configuration loading and validation. Every one of
//! them is raised before the coordinator issues its first side effect.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration-related errors with detailed context
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Missing required configuration field
    #[error("Missing required configuration field '{field}' in {context}")]
    MissingRequiredField { field: String, context: String },

    /// Invalid configuration value
    #[error("Invalid value '{value}' for field '{field}': {context}")]
    InvalidValue {
        field: String,
        value: String,
        context: String,
    },

    /// Configuration file could not be read
    #[error("Failed to read configuration file '{file_path}': {error}")]
    FileReadError { file_path: String, error: String },

    /// Configuration file not found at the requested path
    #[error("Configuration file not found: {path}")]
    ConfigFileNotFound { path: PathBuf },

    /// Sources could not be merged or deserialized
    #[error("Failed to load configuration: {error}")]
    LoadError { error: String },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigurationError>;

impl ConfigurationError {
    /// Create a missing required field error
    pub fn missing_required_field(field: impl Into<String>, context: impl Into<String>) -> Self {
        Self::MissingRequiredField {
            field: field.into(),
            context: context.into(),
        }
    }

    /// Create an invalid value error
    pub fn invalid_value(
        field: impl Into<String>,
        value: impl ToString,
        context: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.to_string(),
            context: context.into(),
        }
    }

    /// Create a file read error
    pub fn file_read_error(file_path: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self::FileReadError {
            file_path: file_path.into(),
            error: error.to_string(),
        }
    }
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(error: config::ConfigError) -> Self {
        match error {
            config::ConfigError::Foreign(inner) => Self::FileReadError {
                file_path: "<source>".to_string(),
                error: inner.to_string(),
            },
            other => Self::LoadError {
                error: other.to_string(),
            },
        }
    }
}
