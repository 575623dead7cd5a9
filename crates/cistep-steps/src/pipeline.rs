//! Pipeline configuration and step construction.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cistep_core::{DeferredParameters, Step};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::Clients;
use crate::input_image_tag::{InputImageTagStep, InputImageTagStepConfiguration};
use crate::job::{DryRunLog, JobSpec};
use crate::release_images::{ReleaseImagesTagStep, ReleaseTagConfiguration};

/// Errors loading or validating a [`PipelineConfig`].
#[derive(Debug, thiserror::Error)]
pub enum PipelineConfigError {
    #[error("failed to read pipeline config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse pipeline config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid pipeline config: {0}")]
    Invalid(String),
}

/// What a job needs tagged in before its builds run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Namespace the job's objects are created in.
    pub namespace: String,
    #[serde(default)]
    pub input_images: Vec<InputImageTagStepConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_tag: Option<ReleaseTagConfiguration>,
}

impl PipelineConfig {
    /// Read and validate a JSON pipeline config.
    pub fn load(path: &Path) -> Result<Self, PipelineConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| PipelineConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self =
            serde_json::from_str(&contents).map_err(|source| PipelineConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        debug!(
            path = %path.display(),
            inputs = config.input_images.len(),
            release = config.release_tag.is_some(),
            "loaded pipeline config"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PipelineConfigError> {
        if self.namespace.is_empty() {
            return Err(PipelineConfigError::Invalid("namespace must be set".into()));
        }
        let mut seen = BTreeSet::new();
        for input in &self.input_images {
            if input.to.as_str().is_empty() {
                return Err(PipelineConfigError::Invalid(format!(
                    "input image {} has no target tag",
                    input.base_image
                )));
            }
            if !seen.insert(input.to.as_str()) {
                return Err(PipelineConfigError::Invalid(format!(
                    "pipeline tag {} is produced by more than one input image",
                    input.to
                )));
            }
        }
        if let Some(release) = &self.release_tag {
            if release.namespace.is_empty() {
                return Err(PipelineConfigError::Invalid(
                    "release_tag.namespace must be set".into(),
                ));
            }
            if release.name.is_empty() && release.tag.is_empty() {
                return Err(PipelineConfigError::Invalid(
                    "release_tag needs a name or a tag".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Instantiate every step the config describes.
///
/// Steps that publish parameters write them to `params`; dry-run renders go
/// to `dry_log`.
pub fn build_steps(
    config: &PipelineConfig,
    clients: &Clients,
    params: Arc<DeferredParameters>,
    dry_log: Arc<DryRunLog>,
) -> Vec<Arc<dyn Step>> {
    let job = Arc::new(JobSpec::new(config.namespace.clone()));
    let mut steps: Vec<Arc<dyn Step>> = Vec::new();

    for input in &config.input_images {
        steps.push(Arc::new(InputImageTagStep::new(
            input.clone(),
            Arc::clone(&clients.images),
            Arc::clone(&job),
            Arc::clone(&dry_log),
        )));
    }
    if let Some(release) = &config.release_tag {
        steps.push(Arc::new(ReleaseImagesTagStep::new(
            release.clone(),
            clients.clone(),
            params,
            Arc::clone(&job),
            dry_log,
        )));
    }
    debug!(steps = steps.len(), namespace = %config.namespace, "built pipeline steps");
    steps
}
