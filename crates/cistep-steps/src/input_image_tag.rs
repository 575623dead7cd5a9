//! Tag an external base image into the pipeline image stream.

use std::sync::Arc;

use async_trait::async_trait;
use cistep_core::{
    ImageStreamTagReference, InputDefinition, Link, PipelineImageStreamTagReference, Step,
    StepError, StepResult,
};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::info;

use crate::api::{
    ImageStreamTag, ObjectMeta, ObjectReference, ReferencePolicyType, TagReference,
    TagReferencePolicy, PIPELINE_IMAGE_STREAM,
};
use crate::client::{exists, ignore_already_exists, ImageClient};
use crate::job::{DryRunLog, JobSpec};

/// Which base image to tag in, and under which pipeline tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputImageTagStepConfiguration {
    pub base_image: ImageStreamTagReference,
    pub to: PipelineImageStreamTagReference,
}

/// Ensures `pipeline:<to>` resolves to the configured base image.
pub struct InputImageTagStep {
    config: InputImageTagStepConfiguration,
    client: Arc<dyn ImageClient>,
    job: Arc<JobSpec>,
    dry_log: Arc<DryRunLog>,
    name: String,
    image_id: OnceCell<String>,
}

impl InputImageTagStep {
    pub fn new(
        config: InputImageTagStepConfiguration,
        client: Arc<dyn ImageClient>,
        job: Arc<JobSpec>,
        dry_log: Arc<DryRunLog>,
    ) -> Self {
        let name = format!("[input:{}]", config.to);
        Self {
            config,
            client,
            job,
            dry_log,
            name,
            image_id: OnceCell::new(),
        }
    }

    fn pipeline_tag_name(&self) -> String {
        format!("{PIPELINE_IMAGE_STREAM}:{}", self.config.to)
    }

    /// Image id behind the base tag, looked up once per step.
    async fn base_image_id(&self) -> StepResult<String> {
        let base = &self.config.base_image;
        self.image_id
            .get_or_try_init(|| async {
                let resolution = |reason: String| StepError::Resolution {
                    what: "base image".to_string(),
                    reason,
                };
                let from = self
                    .client
                    .get_image_stream_tag(&base.namespace, &format!("{}:{}", base.name, base.tag))
                    .await
                    .map_err(|e| resolution(e.to_string()))?;
                let id = from
                    .image_id()
                    .ok_or_else(|| resolution(format!("{base} has no image")))?
                    .to_string();
                info!(base = %base, image = %id, "resolved base image");
                Ok::<_, StepError>(id)
            })
            .await
            .cloned()
    }
}

#[async_trait]
impl Step for InputImageTagStep {
    async fn inputs(&self, _dry: bool) -> StepResult<InputDefinition> {
        Ok(vec![self.base_image_id().await?])
    }

    async fn run(&self, dry: bool) -> StepResult<()> {
        let base = &self.config.base_image;
        info!(base = %base, to = %self.pipeline_tag_name(), "tagging base image into pipeline");

        let image_id = self.base_image_id().await?;
        let ist = ImageStreamTag {
            metadata: ObjectMeta::new(self.job.namespace(), self.pipeline_tag_name()),
            tag: Some(TagReference {
                name: String::new(),
                from: Some(ObjectReference::image_stream_image(
                    &base.namespace,
                    &base.name,
                    &image_id,
                )),
                reference_policy: Some(TagReferencePolicy {
                    policy: ReferencePolicyType::Local,
                }),
            }),
            image: None,
        };

        if dry {
            return self.dry_log.record("imagestreamtag", &ist);
        }
        ignore_already_exists(self.client.create_image_stream_tag(&ist).await)?;
        Ok(())
    }

    async fn done(&self, _dry: bool) -> StepResult<bool> {
        let name = self.pipeline_tag_name();
        info!(tag = %name, "checking for existence of pipeline tag");
        Ok(exists(
            self.client
                .get_image_stream_tag(self.job.namespace(), &name)
                .await,
        )?)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn requires(&self) -> Vec<Link> {
        vec![Link::external_image(self.config.base_image.clone())]
    }

    fn creates(&self) -> Vec<Link> {
        vec![Link::internal_image(self.config.to.clone())]
    }
}
