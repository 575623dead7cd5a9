//! Error taxonomy for graph construction and step execution.

/// Errors produced while selecting and linking steps into a graph.
///
/// Both variants are fatal to the whole invocation and are reported before
/// any step executes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// One or more requested target names matched no remaining step.
    #[error(
        "the following names were not found in the config or were duplicates: {}",
        .targets.join(", ")
    )]
    UnresolvedTargets { targets: Vec<String> },

    /// One or more requested target names are carried by several steps.
    #[error("the following names match more than one step: {}", .targets.join(", "))]
    AmbiguousTargets { targets: Vec<String> },
}

/// Result type for graph construction.
pub type GraphResult<T> = std::result::Result<T, GraphError>;

/// Errors surfaced by a step's lifecycle operations or its parameters.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    /// The caller's cancel signal fired while the operation was in flight.
    #[error("step cancelled")]
    Cancelled,

    /// A parameter was read before any producer published it.
    #[error("parameter not found: {name}")]
    ParameterNotFound { name: String },

    /// A remote lookup the step depends on did not resolve.
    #[error("could not resolve {what}: {reason}")]
    Resolution { what: String, reason: String },

    /// The step's effect could not be applied.
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StepError {
    /// Shorthand for [`StepError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        StepError::Failed(message.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, StepError::Cancelled)
    }
}

/// Result type for step operations.
pub type StepResult<T> = std::result::Result<T, StepError>;
