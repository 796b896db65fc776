use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ParseError(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    ValidationError(String),

    #[error("could not determine a user config directory")]
    NoUserConfigDir,
}
