//! Executor configuration.

use serde::{Deserialize, Serialize};

/// Default number of steps allowed to run at once.
pub const DEFAULT_MAX_PARALLELISM: usize = 4;

/// Errors raised when validating an [`ExecutorConfig`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("max_parallelism must be at least 1, got {0}")]
    InvalidParallelism(usize),
}

/// Knobs for a single [`crate::Executor`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Maximum number of steps probed or run concurrently.
    pub max_parallelism: usize,
    /// Stop starting new steps as soon as one fails. When unset, steps that
    /// do not depend on the failure keep running.
    pub fail_fast: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_parallelism: DEFAULT_MAX_PARALLELISM,
            fail_fast: false,
        }
    }
}

impl ExecutorConfig {
    pub fn with_max_parallelism(mut self, max_parallelism: usize) -> Self {
        self.max_parallelism = max_parallelism;
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_parallelism == 0 {
            return Err(ConfigError::InvalidParallelism(self.max_parallelism));
        }
        Ok(())
    }
}
