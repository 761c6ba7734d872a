//! Runtime configuration for a sync session.
//!
//! # Responsibility
//! - Provide typed settings with defaults for autosave, paging and logging.
//! - Parse settings from JSON and reject out-of-range values up front.
//!
//! # Invariants
//! - Page sizes are still clamped by `PageLimits::normalize` at call time.

use crate::logging::default_log_level;
use crate::store::PageLimits;
use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;

pub const DEFAULT_AUTOSAVE_DEBOUNCE_MS: u64 = 1_500;
pub const MIN_AUTOSAVE_DEBOUNCE_MS: u64 = 1;
pub const MAX_AUTOSAVE_DEBOUNCE_MS: u64 = 60_000;
pub const DEFAULT_PAGE_SIZE: u32 = 25;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Configuration load/validation errors.
#[derive(Debug)]
pub enum ConfigError {
    Parse(serde_json::Error),
    DebounceOutOfRange(u64),
    InvalidPageSize { default: u32, max: u32 },
    InvalidLogDir(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(err) => write!(f, "invalid config json: {err}"),
            Self::DebounceOutOfRange(value) => write!(
                f,
                "autosave_debounce_ms={value} outside {MIN_AUTOSAVE_DEBOUNCE_MS}..={MAX_AUTOSAVE_DEBOUNCE_MS}"
            ),
            Self::InvalidPageSize { default, max } => write!(
                f,
                "page sizes must satisfy 1 <= default_page_size ({default}) <= max_page_size ({max})"
            ),
            Self::InvalidLogDir(dir) => write!(f, "log_dir must be an absolute path, got `{dir}`"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Quiet period after the last edit before autosave fires.
    pub autosave_debounce_ms: u64,
    pub default_page_size: u32,
    pub max_page_size: u32,
    pub log_level: String,
    /// Absolute directory for rolling log files; `None` leaves logging off.
    pub log_dir: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            autosave_debounce_ms: DEFAULT_AUTOSAVE_DEBOUNCE_MS,
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
            log_level: default_log_level().to_string(),
            log_dir: None,
        }
    }
}

impl SyncConfig {
    /// Parses and validates a JSON config document. Missing keys take defaults.
    ///
    /// # Errors
    /// - [`ConfigError::Parse`] for malformed JSON or unknown keys.
    /// - Any error from [`SyncConfig::validate`].
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_AUTOSAVE_DEBOUNCE_MS..=MAX_AUTOSAVE_DEBOUNCE_MS)
            .contains(&self.autosave_debounce_ms)
        {
            return Err(ConfigError::DebounceOutOfRange(self.autosave_debounce_ms));
        }
        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            return Err(ConfigError::InvalidPageSize {
                default: self.default_page_size,
                max: self.max_page_size,
            });
        }
        if let Some(dir) = &self.log_dir {
            if !Path::new(dir.trim()).is_absolute() {
                return Err(ConfigError::InvalidLogDir(dir.clone()));
            }
        }
        Ok(())
    }

    pub fn page_limits(&self) -> PageLimits {
        PageLimits {
            default_page_size: self.default_page_size,
            max_page_size: self.max_page_size,
        }
    }
}
