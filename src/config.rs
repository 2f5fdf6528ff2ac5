use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::services::enumerator::MAX_DEPTH;
use crate::services::scan_service::DEFAULT_CHECKPOINT_INTERVAL;

pub const CONFIG_FILE_NAME: &str = "config.json";
pub const DATABASE_FILE_NAME: &str = "picfinder.db";

pub const DB_ENV: &str = "PICFINDER_DB";
pub const OCR_COMMAND_ENV: &str = "PICFINDER_OCR_CMD";

pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("app", "picfinder", "picfinder")
}

pub fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

fn default_database_path() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().join(DATABASE_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(DATABASE_FILE_NAME))
}

/// Runtime settings. Every field is optional in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub max_depth: usize,
    pub checkpoint_interval: usize,
    pub search_debounce_ms: u64,
    pub search_limit: Option<usize>,
    pub ocr_command: String,
    pub ocr_language: String,
    /// No deadline when unset.
    pub extraction_timeout_secs: Option<u64>,
    /// Grant name to granted root directory, served as `content://<grant>/...`.
    pub tree_grants: BTreeMap<String, PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            max_depth: MAX_DEPTH,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            search_debounce_ms: 300,
            search_limit: None,
            ocr_command: "tesseract".to_string(),
            ocr_language: "eng".to_string(),
            extraction_timeout_secs: None,
            tree_grants: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    /// Loads `explicit` if given, else the per-user config file when it
    /// exists, else defaults. Environment overrides are applied last.
    pub fn load(explicit: Option<&Path>) -> Result<Self, AppError> {
        let mut config = match explicit {
            Some(path) => Self::load_from(path)?,
            None => match default_config_path() {
                Some(path) if path.is_file() => Self::load_from(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            AppError::General(format!("cannot read config {}: {err}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    pub fn apply_env_overrides<F>(&mut self, get: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(db) = get(DB_ENV).filter(|v| !v.trim().is_empty()) {
            self.database_path = PathBuf::from(db);
        }
        if let Some(cmd) = get(OCR_COMMAND_ENV).filter(|v| !v.trim().is_empty()) {
            self.ocr_command = cmd;
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.checkpoint_interval == 0 {
            return Err(AppError::General(
                "checkpoint_interval must be at least 1".to_string(),
            ));
        }
        if self.ocr_command.trim().is_empty() {
            return Err(AppError::General("ocr_command must not be empty".to_string()));
        }
        if let Some(name) = self
            .tree_grants
            .keys()
            .find(|name| name.is_empty() || name.contains('/'))
        {
            return Err(AppError::General(format!("invalid tree grant name '{name}'")));
        }
        Ok(())
    }

    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }

    pub fn extraction_timeout(&self) -> Option<Duration> {
        self.extraction_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            r#"{ "max_depth": 3, "tree_grants": { "photos": "/mnt/photos" } }"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.max_depth, 3);
        assert_eq!(config.checkpoint_interval, DEFAULT_CHECKPOINT_INTERVAL);
        assert_eq!(config.ocr_command, "tesseract");
        assert_eq!(config.tree_grants["photos"], PathBuf::from("/mnt/photos"));
        assert_eq!(config.search_debounce(), Duration::from_millis(300));
        assert_eq!(config.extraction_timeout(), None);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(AppConfig::load_from(&path), Err(AppError::Serde(_))));
        assert!(AppConfig::load(Some(&dir.path().join("missing.json"))).is_err());
    }

    #[test]
    fn env_overrides_win() {
        let mut config = AppConfig::default();
        config.apply_env_overrides(|key| match key {
            DB_ENV => Some("/tmp/other.db".to_string()),
            OCR_COMMAND_ENV => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(config.database_path, PathBuf::from("/tmp/other.db"));
        assert_eq!(config.ocr_command, "tesseract");
    }

    #[test]
    fn validation_rejects_bad_values() {
        let config = AppConfig {
            checkpoint_interval: 0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.tree_grants.insert("a/b".to_string(), PathBuf::from("/x"));
        assert!(config.validate().is_err());

        let config = AppConfig {
            extraction_timeout_secs: Some(30),
            ..AppConfig::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.extraction_timeout(), Some(Duration::from_secs(30)));
    }
}
