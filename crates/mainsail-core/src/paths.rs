use directories::{BaseDirs, ProjectDirs};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const APP_QUALIFIER: &str = "org";
pub const APP_ORG: &str = "Gennaker";
pub const APP_NAME: &str = "Gennaker";

pub const PRIMARY_CONFIG: &str = "config.toml";
pub const BACKUP_CONFIG: &str = "config_back.toml";
pub const TRUSTED_KEYS: &str = "trusted_keys.toml";

/// Roots every other location is derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    project_home: PathBuf,
    user_home: PathBuf,
}

impl AppPaths {
    pub fn new(project_home: impl Into<PathBuf>, user_home: impl Into<PathBuf>) -> Self {
        Self {
            project_home: project_home.into(),
            user_home: user_home.into(),
        }
    }

    /// Platform locations, overridable with `MAINSAIL_HOME` and
    /// `MAINSAIL_USER_HOME`.
    pub fn from_env() -> Result<Self> {
        let project_home = match std::env::var_os("MAINSAIL_HOME") {
            Some(p) => PathBuf::from(p),
            None => ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
                .ok_or(Error::NoHomeDirectory("project"))?
                .data_local_dir()
                .to_path_buf(),
        };
        let user_home = match std::env::var_os("MAINSAIL_USER_HOME") {
            Some(p) => PathBuf::from(p),
            None => BaseDirs::new()
                .ok_or(Error::NoHomeDirectory("home"))?
                .home_dir()
                .to_path_buf(),
        };
        Ok(Self::new(project_home, user_home))
    }

    pub fn project_home(&self) -> &Path {
        &self.project_home
    }

    pub fn user_home(&self) -> &Path {
        &self.user_home
    }

    pub fn config_dir(&self) -> PathBuf {
        self.project_home.join("config")
    }

    pub fn primary_config(&self) -> PathBuf {
        self.config_dir().join(PRIMARY_CONFIG)
    }

    pub fn backup_config(&self) -> PathBuf {
        self.config_dir().join(BACKUP_CONFIG)
    }

    pub fn trusted_keys(&self) -> PathBuf {
        self.config_dir().join(TRUSTED_KEYS)
    }
}
