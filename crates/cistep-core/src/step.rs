//! The step contract.
//!
//! A [`Step`] is a self-contained piece of work the pipeline needs done. The
//! scheduler only ever talks to steps through this trait; concrete steps own
//! their remote clients and any caching of expensive lookups.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::StepResult;
use crate::link::Link;
use crate::params::ParameterMap;

/// Content fingerprint of what a step consumes.
pub type InputDefinition = Vec<String>;

#[async_trait]
pub trait Step: Send + Sync {
    /// Resolve the inputs this step will consume.
    async fn inputs(&self, dry: bool) -> StepResult<InputDefinition>;

    /// Apply the step's effect. Must be safe to call again while
    /// [`Step::done`] still reports `false`.
    async fn run(&self, dry: bool) -> StepResult<()>;

    /// Whether the step's effect already exists.
    async fn done(&self, dry: bool) -> StepResult<bool>;

    /// Name used to target the step. Empty if the step cannot be targeted.
    fn name(&self) -> &str;

    /// Links this step consumes. Must return the same answer on every call.
    fn requires(&self) -> Vec<Link>;

    /// Links this step produces. Must return the same answer on every call.
    fn creates(&self) -> Vec<Link>;

    /// Output parameters plus the link that gates when they may be read.
    fn provides(&self) -> (ParameterMap, Option<Link>) {
        (ParameterMap::new(), None)
    }
}

/// SHA-256 hex digest of an [`InputDefinition`].
pub fn input_digest(inputs: &InputDefinition) -> String {
    let mut hasher = Sha256::new();
    for input in inputs {
        hasher.update((input.len() as u64).to_le_bytes());
        hasher.update(input.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Human-readable identifier for logs and reports.
///
/// Untargetable steps are described by what they create.
pub fn step_label(step: &dyn Step) -> String {
    if !step.name().is_empty() {
        return step.name().to_string();
    }
    let creates: Vec<String> = step.creates().iter().map(ToString::to_string).collect();
    if creates.is_empty() {
        "<anonymous step>".to_string()
    } else {
        format!("<creates {}>", creates.join(", "))
    }
}
