//! Config-directory settings store.
//!
//! `settings.json` holds the active profile id, keyboard layout, and the
//! list of enabled signals. First run creates the directory tree and writes
//! defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Profile/settings persistence errors. Propagated to the caller of the
/// mutating operation; in-memory state is left as it was before the call.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown profile: {0}")]
    UnknownProfile(String),
}

fn io_err(path: &Path, source: std::io::Error) -> PersistenceError {
    PersistenceError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Active profile id; "null" selects the built-in all-off profile.
    pub profile: String,
    pub layout: String,
    /// Names of enabled signals.
    pub signals: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            profile: "null".to_string(),
            layout: "en-US".to_string(),
            signals: vec![
                "cpu_utilization_max".to_string(),
                "memory_utilization".to_string(),
            ],
        }
    }
}

pub struct SettingsStore {
    dir: PathBuf,
    settings: Settings,
}

impl SettingsStore {
    /// Default config directory, XDG layout.
    pub fn config_dir() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("keyglow")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home).join(".config/keyglow")
        } else {
            PathBuf::from("/tmp/keyglow")
        }
    }

    /// Open the store, creating the directory tree and default settings on
    /// first run.
    pub fn open(dir: PathBuf) -> Result<Self, PersistenceError> {
        let profiles = dir.join("profiles");
        std::fs::create_dir_all(&profiles).map_err(|e| io_err(&profiles, e))?;

        let path = dir.join("settings.json");
        let settings = if path.exists() {
            let data = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
            serde_json::from_str(&data)?
        } else {
            let defaults = Settings::default();
            let data = serde_json::to_string_pretty(&defaults)?;
            std::fs::write(&path, data).map_err(|e| io_err(&path, e))?;
            tracing::info!("initial setup complete: {}", path.display());
            defaults
        };

        Ok(Self { dir, settings })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn profiles_dir(&self) -> PathBuf {
        self.dir.join("profiles")
    }

    /// Mutate settings and persist them. On write failure the in-memory
    /// settings keep the previous value.
    pub fn update(
        &mut self,
        mutate: impl FnOnce(&mut Settings),
    ) -> Result<(), PersistenceError> {
        let mut next = self.settings.clone();
        mutate(&mut next);

        let path = self.dir.join("settings.json");
        let data = serde_json::to_string_pretty(&next)?;
        std::fs::write(&path, data).map_err(|e| io_err(&path, e))?;

        self.settings = next;
        Ok(())
    }
}
