//! cistep-core: step graphs for CI build orchestration
//!
//! Steps declare the links they require and create. This crate links them
//! into a dependency graph, optionally narrows it to a set of named targets
//! plus everything they transitively need, and executes it concurrently.
//!
//! ## Key Components
//!
//! - `Link`: matchable token a step requires or creates
//! - `Step`: the async contract every unit of work implements
//! - `build_graph` / `build_partial_graph`: graph construction and selection
//! - `Executor`: bounded, cancellable, failure-containing execution
//! - `DeferredParameters`: lazily evaluated parameters published between steps

pub mod cancel;
pub mod config;
mod error;
pub mod executor;
pub mod fakes;
pub mod graph;
pub mod link;
pub mod obs;
pub mod params;
pub mod report;
pub mod step;
pub mod telemetry;

pub use cancel::CancelSignal;
pub use config::{ConfigError, ExecutorConfig, DEFAULT_MAX_PARALLELISM};
pub use error::{GraphError, GraphResult, StepError, StepResult};
pub use executor::Executor;
pub use graph::{build_graph, build_partial_graph, NodeId, StepGraph, StepNode};
pub use link::{has_any_links, ImageStreamTagReference, Link, PipelineImageStreamTagReference};
pub use params::{
    cached_parameter, parameter, CachedParameter, DeferredParameters, FnParameter, Parameter,
    ParameterMap,
};
pub use report::{
    ExecuteError, ExecutionFailure, ExecutionReport, NodeFailure, NodeOutcome, NodeStatus,
};
pub use step::{input_digest, step_label, InputDefinition, Step};

/// Crate version, as reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
