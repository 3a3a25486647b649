//! Error types for mtactl

use mta_control::ControlError;
use mta_types::DeployError;
use std::path::PathBuf;
use thiserror::Error;

/// CLI errors
#[derive(Debug, Error)]
pub enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid document {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Deploy(#[from] DeployError),

    #[error(transparent)]
    Control(#[from] ControlError),

    #[error("cannot render output: {0}")]
    Output(#[from] serde_json::Error),
}

/// Result type for CLI operations
pub type CliResult<T> = std::result::Result<T, CliError>;
