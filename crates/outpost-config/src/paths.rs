//! Path discovery for config files, grounded on the same XDG-via-`directories`
//! approach used throughout this stack.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

use crate::ConfigError;

pub struct Paths {
    project_dirs: Option<ProjectDirs>,
}

impl Paths {
    pub fn new() -> Self {
        Self {
            project_dirs: ProjectDirs::from("chat", "Outpost", "outpost"),
        }
    }

    pub fn user_config_file(&self) -> Result<PathBuf, ConfigError> {
        self.project_dirs
            .as_ref()
            .map(|p| p.config_dir().join("outpost.toml"))
            .ok_or(ConfigError::NoUserConfigDir)
    }

    pub fn project_config_file(project_dir: impl AsRef<Path>) -> PathBuf {
        project_dir.as_ref().join("outpost.toml")
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}
