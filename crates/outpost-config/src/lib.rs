//! # outpost-config: layered configuration for Outpost
//!
//! Three layers, lowest to highest precedence:
//! 1. Built-in defaults ([`ServerConfig::default`] / [`ClientConfig::default`])
//! 2. `outpost.toml` (user config dir, then the current project directory)
//! 3. CLI flags, applied by the caller after [`ConfigLoader::load`] returns
//!
//! There is deliberately no environment-variable layer here: the
//! original prototype this crate generalizes had no env-driven
//! configuration surface, and nothing about this cluster's operation
//! calls for adding one.

mod error;
mod paths;

pub use error::ConfigError;
pub use paths::Paths;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Server-side configuration: binding, replication peers, and storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub replication_port: u16,
    pub data_dir: PathBuf,
    pub replica_id: String,
    pub peers: Vec<PeerConfig>,
    pub custom_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5000,
            replication_port: 5500,
            data_dir: PathBuf::from("./data"),
            replica_id: "replica-1".to_string(),
            peers: Vec::new(),
            custom_mode: false,
        }
    }
}

/// A replication peer address, as configured ahead of time (the
/// specification has no peer-discovery mechanism; membership is static).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    pub id: String,
    pub host: String,
    pub port: u16,
}

/// Client-side configuration: the server list failed over across.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub servers: Vec<ServerAddr>,
    pub custom_mode: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            servers: vec![ServerAddr {
                host: "localhost".to_string(),
                port: 5000,
            }],
            custom_mode: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerAddr {
    pub host: String,
    pub port: u16,
}

/// Loads a layered TOML configuration into `T`.
///
/// Built for a struct with a `#[serde(default)]` `Default` impl, same
/// convention this loader's teacher crate uses.
pub struct ConfigLoader {
    project_dir: PathBuf,
    explicit_file: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            project_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            explicit_file: None,
        }
    }

    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Points the loader at an explicit config file (the `--config` CLI
    /// flag), layered above the user/project defaults.
    pub fn with_explicit_file(mut self, path: Option<PathBuf>) -> Self {
        self.explicit_file = path;
        self
    }

    pub fn load<T>(&self) -> Result<T, ConfigError>
    where
        T: Default + Serialize + serde::de::DeserializeOwned,
    {
        let mut builder = config::Config::builder();
        builder = builder.add_source(config::Config::try_from(&T::default())?);

        let paths = Paths::new();
        if let Ok(user_file) = paths.user_config_file() {
            if user_file.exists() {
                builder = builder.add_source(
                    config::File::from(user_file)
                        .required(false)
                        .format(config::FileFormat::Toml),
                );
            }
        }

        let project_file = Paths::project_config_file(&self.project_dir);
        if project_file.exists() {
            builder = builder.add_source(
                config::File::from(project_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        if let Some(path) = &self.explicit_file {
            builder = builder.add_source(
                config::File::from(path.clone())
                    .required(true)
                    .format(config::FileFormat::Toml),
            );
        }

        let built = builder.build()?;
        Ok(built.try_deserialize()?)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_defaults_when_no_files_present() {
        let dir = tempfile::tempdir().unwrap();
        let config: ServerConfig = ConfigLoader::new()
            .with_project_dir(dir.path())
            .load()
            .unwrap();
        assert_eq!(config.port, 5000);
    }

    #[test]
    fn project_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("outpost.toml"), "port = 12345\n").unwrap();
        let config: ServerConfig = ConfigLoader::new()
            .with_project_dir(dir.path())
            .load()
            .unwrap();
        assert_eq!(config.port, 12345);
    }

    #[test]
    fn explicit_file_outranks_project_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("outpost.toml"), "port = 1\n").unwrap();
        let explicit = dir.path().join("override.toml");
        std::fs::write(&explicit, "port = 2\n").unwrap();

        let config: ServerConfig = ConfigLoader::new()
            .with_project_dir(dir.path())
            .with_explicit_file(Some(explicit))
            .load()
            .unwrap();
        assert_eq!(config.port, 2);
    }
}
