//! Per-job context shared by every step.

use std::sync::Mutex;

use cistep_core::{StepError, StepResult};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Where the job's own objects live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    namespace: String,
}

impl JobSpec {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

/// Objects steps would have created, rendered as JSON.
#[derive(Debug, Default)]
pub struct DryRunLog {
    entries: Mutex<Vec<String>>,
}

impl DryRunLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render `object` and keep it.
    pub fn record<T: Serialize>(&self, kind: &str, object: &T) -> StepResult<()> {
        let rendered = serde_json::to_string(object)
            .map_err(|e| StepError::failed(format!("failed to marshal {kind}: {e}")))?;
        info!(event = "dry_run.rendered", kind = %kind, "rendered {kind} instead of creating it");
        self.lock().push(rendered);
        Ok(())
    }

    pub fn entries(&self) -> Vec<String> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
