//! cistep-steps: image tagging steps for cistep
//!
//! Concrete [`cistep_core::Step`] implementations that seed a CI job's
//! namespace with its input images, plus the control-plane client seam they
//! talk through.
//!
//! ## Key Components
//!
//! - `InputImageTagStep`: tags an external base image into the pipeline stream
//! - `ReleaseImagesTagStep`: tags a release suite in and records where it lives
//! - `ImageClient` / `ConfigMapClient` / `RouteClient`: injected cluster access
//! - `MemoryCluster`: in-memory cluster with a JSON snapshot
//! - `PipelineConfig`: JSON job description and step construction

pub mod api;
pub mod client;
pub mod input_image_tag;
pub mod job;
pub mod memory;
pub mod pipeline;
pub mod release_images;

pub use client::{
    ClusterError, ClusterResult, Clients, ConfigMapClient, ImageClient, RouteClient,
};
pub use input_image_tag::{InputImageTagStep, InputImageTagStepConfiguration};
pub use job::{DryRunLog, JobSpec};
pub use memory::{ClusterSnapshot, MemoryCluster};
pub use pipeline::{build_steps, PipelineConfig, PipelineConfigError};
pub use release_images::{
    component_param_name, image_format, ReleaseImagesTagStep, ReleaseTagConfiguration,
    IMAGE_FORMAT_PARAM,
};
