//! Checkpointer options
//!
//! Options can be built in code or loaded from a TOML file:
//!
//! ```toml
//! write_source_checkpoint = false   # source is read-only
//! write_target_checkpoint = true
//! max_conflict_retries = 5
//! ```

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

/// Which endpoints a checkpointer reads and writes, and how hard it retries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointerOptions {
    /// Keep a checkpoint document on the source endpoint
    pub write_source_checkpoint: bool,

    /// Keep a checkpoint document on the target endpoint
    pub write_target_checkpoint: bool,

    /// Re-read and re-apply attempts after a revision conflict
    pub max_conflict_retries: u32,
}

impl Default for CheckpointerOptions {
    fn default() -> Self {
        Self {
            write_source_checkpoint: true,
            write_target_checkpoint: true,
            max_conflict_retries: default_max_conflict_retries(),
        }
    }
}

impl CheckpointerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_write_source_checkpoint(mut self, enabled: bool) -> Self {
        self.write_source_checkpoint = enabled;
        self
    }

    pub fn with_write_target_checkpoint(mut self, enabled: bool) -> Self {
        self.write_target_checkpoint = enabled;
        self
    }

    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    /// Parse options from TOML; missing keys take their defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load options from a TOML file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path).await?;
        Self::from_toml_str(&content)
    }
}

fn default_max_conflict_retries() -> u32 {
    10
}
