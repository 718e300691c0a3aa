//! Engine configuration

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pool::PoolOptions;

/// Output buffers the live-preview path keeps in flight
pub const VIDEO_RETAINED_BUFFER_HINT: usize = 3;
/// Output buffers the still-photo path keeps in flight
pub const PHOTO_RETAINED_BUFFER_HINT: usize = 2;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on bytes held by one output pool (`None` = unlimited)
    pub max_pool_bytes: Option<usize>,
    pub video_retained_buffers: usize,
    pub photo_retained_buffers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_pool_bytes: None,
            video_retained_buffers: VIDEO_RETAINED_BUFFER_HINT,
            photo_retained_buffers: PHOTO_RETAINED_BUFFER_HINT,
        }
    }
}

impl EngineConfig {
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.video_retained_buffers == 0 || self.photo_retained_buffers == 0 {
            return Err(ConfigError::Invalid(
                "retained buffer counts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            max_bytes: self.max_pool_bytes,
        }
    }
}
