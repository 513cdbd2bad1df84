//! Operation options and the TOML application config.
//!
//! Precedence: CLI flags > env > config file > defaults. The CLI applies its own
//! flags on top of [`AppConfig::load`].

use crate::errors::DbError;
use crate::model::{ModelRegistry, ResourceModel};
use crate::query::ReadPreference;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_CONFIG: &str = "DOCREST_CONFIG";
pub const ENV_TOTAL_COUNT: &str = "DOCREST_TOTAL_COUNT";
pub const ENV_READ_PREFERENCE: &str = "DOCREST_READ_PREFERENCE";

/// Per-resource operation options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Return plain documents from reads.
    pub lean: bool,
    pub read_preference: ReadPreference,
    /// Compute `total_count` for list requests with a second count query.
    pub total_count_header: bool,
    /// Delete-one uses a single atomic find-and-remove.
    pub find_one_and_remove: bool,
    /// Update uses a single atomic find-and-update.
    pub find_one_and_update: bool,
    pub run_validators: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            lean: true,
            read_preference: ReadPreference::Primary,
            total_count_header: false,
            find_one_and_remove: true,
            find_one_and_update: true,
            run_validators: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub options: Options,
    pub models: Vec<ResourceModel>,
}

impl AppConfig {
    /// # Errors
    /// Returns `DbError::Config` when the document is not a valid config.
    pub fn from_toml_str(s: &str) -> Result<Self, DbError> {
        toml::from_str(s).map_err(|e| DbError::Config(e.to_string()))
    }

    /// # Errors
    /// Returns `DbError::Io` when the file cannot be read, `DbError::Config` when it does not parse.
    pub fn from_file(path: &Path) -> Result<Self, DbError> {
        let s = std::fs::read_to_string(path)?;
        Self::from_toml_str(&s)
    }

    /// Read the file named by `cli_path` or `DOCREST_CONFIG` (defaults when neither is set),
    /// then apply env overrides.
    ///
    /// # Errors
    /// Propagates file and parse errors.
    pub fn load(cli_path: Option<&Path>) -> Result<Self, DbError> {
        let path = cli_path.map(Path::to_path_buf).or_else(|| std::env::var(ENV_CONFIG).ok().map(PathBuf::from));
        let mut cfg = match path {
            Some(p) => {
                log::debug!("loading config from {}", p.display());
                Self::from_file(&p)?
            }
            None => Self::default(),
        };
        cfg.apply_env(|k| std::env::var(k).ok())?;
        Ok(cfg)
    }

    /// Apply env overrides through `lookup`.
    ///
    /// # Errors
    /// Returns `DbError::Config` on unparsable values.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), DbError> {
        if let Some(v) = lookup(ENV_TOTAL_COUNT) {
            self.options.total_count_header = match v.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                other => return Err(DbError::Config(format!("{ENV_TOTAL_COUNT}: not a boolean: {other}"))),
            };
        }
        if let Some(v) = lookup(ENV_READ_PREFERENCE) {
            self.options.read_preference = serde_json::from_value(serde_json::Value::String(v.clone()))
                .map_err(|_| DbError::Config(format!("{ENV_READ_PREFERENCE}: unknown read preference: {v}")))?;
        }
        Ok(())
    }

    #[must_use]
    pub fn registry(&self) -> ModelRegistry {
        let mut reg = ModelRegistry::new();
        for m in &self.models {
            reg.register(m.clone());
        }
        reg
    }
}
