use std::path::{Path, PathBuf};

use crate::infra::{
    config::{load, AppConfig},
    contracts::ConfigAdapter,
    error::AppError,
};

const LOCAL_CONFIG_PATH: &str = "config.toml";

/// Loads `config.toml` from an explicit path, the working directory, or the
/// per-user config directory, in that order.
#[derive(Debug, Clone, Default)]
pub struct FileConfigAdapter {
    path: Option<PathBuf>,
    user_path: Option<PathBuf>,
}

impl FileConfigAdapter {
    pub fn new(path: Option<&Path>) -> Self {
        Self {
            path: path.map(Path::to_path_buf),
            user_path: None,
        }
    }

    pub fn with_user_path(mut self, user_path: PathBuf) -> Self {
        self.user_path = Some(user_path);
        self
    }

    pub fn resolved_path(&self) -> PathBuf {
        if let Some(path) = &self.path {
            return path.clone();
        }

        let local = PathBuf::from(LOCAL_CONFIG_PATH);
        match &self.user_path {
            Some(user_path) if !local.exists() => user_path.clone(),
            _ => local,
        }
    }
}

impl ConfigAdapter for FileConfigAdapter {
    fn load(&self) -> Result<AppConfig, AppError> {
        load(Some(&self.resolved_path()))
    }
}
