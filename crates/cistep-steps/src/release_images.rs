//! Tag a full release suite into the job namespace.
//!
//! Builds overwrite these tags selectively later on; this step only seeds
//! them. A release is addressed either by stream name (every tag of one
//! stable stream) or by tag (one tag across every stream in a namespace).

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use cistep_core::{
    parameter, DeferredParameters, InputDefinition, Link, ParameterMap, Step, StepError,
    StepResult,
};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::api::{
    ConfigMap, ImageStream, ImageStreamTag, ObjectMeta, ObjectReference, TagReference,
    ORIGIN_IMAGE_STREAM, PIPELINE_IMAGE_STREAM, RELEASE_CONFIG_MAP, RPM_REPO_ROUTE,
    STABLE_IMAGE_STREAM,
};
use crate::client::{exists, ignore_already_exists, Clients, ImageClient};
use crate::job::{DryRunLog, JobSpec};

/// Placeholder consumers substitute with a component name.
pub const COMPONENT_FORMAT_REPLACEMENT: &str = "${component}";

/// Parameter carrying the pull-spec template for release components.
pub const IMAGE_FORMAT_PARAM: &str = "IMAGE_FORMAT";

/// Registry used in `IMAGE_FORMAT` when the pipeline stream is unknown.
pub const REGISTRY_PLACEHOLDER: &str = "REGISTRY";

/// Value recorded in the release config map during dry runs.
const DRY_RUN_PLACEHOLDER: &str = "dry-fake";

/// Where to tag release images from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseTagConfiguration {
    /// Namespace holding the release streams.
    pub namespace: String,
    /// Single stable stream to copy. When empty, `tag` is used instead.
    #[serde(default)]
    pub name: String,
    /// Prefix applied to stream names in `IMAGE_FORMAT`.
    #[serde(default)]
    pub name_prefix: String,
    /// Tag to cross-tag from every stream in `namespace`.
    #[serde(default)]
    pub tag: String,
    /// Per-stream replacements for `tag`.
    #[serde(default)]
    pub tag_overrides: BTreeMap<String, String>,
}

impl ReleaseTagConfiguration {
    pub fn by_name(&self) -> bool {
        !self.name.is_empty()
    }

    /// Human-readable pull-spec template of the source.
    pub fn source_name(&self) -> String {
        if self.by_name() {
            format!("{}/{}:{}", self.namespace, self.name, COMPONENT_FORMAT_REPLACEMENT)
        } else {
            format!("{}/{}:{}", self.namespace, COMPONENT_FORMAT_REPLACEMENT, self.tag)
        }
    }

    fn tag_for(&self, stream: &str) -> &str {
        self.tag_overrides
            .get(stream)
            .map(String::as_str)
            .unwrap_or(self.tag.as_str())
    }
}

/// Parameter name a component's pull spec is published under: the
/// component uppercased, with `-` turned into `_`.
pub fn component_param_name(component: &str) -> String {
    component.replace('-', "_").to_uppercase()
}

/// Template under which release components are pulled from the job.
pub fn image_format(config: &ReleaseTagConfiguration, namespace: &str, registry: &str) -> String {
    if config.by_name() {
        format!(
            "{registry}/{namespace}/{}{STABLE_IMAGE_STREAM}:{COMPONENT_FORMAT_REPLACEMENT}",
            config.name_prefix
        )
    } else {
        format!(
            "{registry}/{namespace}/{}{COMPONENT_FORMAT_REPLACEMENT}:{}",
            config.name_prefix, config.tag
        )
    }
}

/// Registry host serving the job's pipeline stream.
async fn registry_host(images: &dyn ImageClient, namespace: &str) -> String {
    match images.get_image_stream(namespace, PIPELINE_IMAGE_STREAM).await {
        Ok(stream) => stream
            .repository()
            .and_then(|repo| repo.split('/').next())
            .unwrap_or(REGISTRY_PLACEHOLDER)
            .to_string(),
        Err(e) => {
            debug!(error = %e, "pipeline image stream unavailable; using registry placeholder");
            REGISTRY_PLACEHOLDER.to_string()
        }
    }
}

pub struct ReleaseImagesTagStep {
    config: ReleaseTagConfiguration,
    clients: Clients,
    params: Arc<DeferredParameters>,
    job: Arc<JobSpec>,
    dry_log: Arc<DryRunLog>,
}

impl ReleaseImagesTagStep {
    pub fn new(
        config: ReleaseTagConfiguration,
        clients: Clients,
        params: Arc<DeferredParameters>,
        job: Arc<JobSpec>,
        dry_log: Arc<DryRunLog>,
    ) -> Self {
        Self {
            config,
            clients,
            params,
            job,
            dry_log,
        }
    }

    /// Copy the resolvable tags of the configured stable stream.
    async fn copy_stable_stream(&self, dry: bool) -> StepResult<()> {
        let images = &self.clients.images;
        let source = images
            .get_image_stream(&self.config.namespace, &self.config.name)
            .await
            .map_err(|e| StepError::Resolution {
                what: "stable imagestream".to_string(),
                reason: e.to_string(),
            })?;

        let mut stable = ImageStream::new(self.job.namespace(), STABLE_IMAGE_STREAM);
        stable.spec.tags = source
            .spec
            .tags
            .iter()
            .filter_map(|tag| {
                let from = source.resolved_tag(&tag.name)?;
                Some(TagReference {
                    name: tag.name.clone(),
                    from: Some(from),
                    reference_policy: None,
                })
            })
            .collect();
        info!(
            source = %self.config.source_name(),
            tags = stable.spec.tags.len(),
            "copying stable image stream"
        );

        if dry {
            return self.dry_log.record("imagestream", &stable);
        }
        let created = ignore_already_exists(images.create_image_stream(&stable).await)
            .map_err(|e| StepError::failed(format!("could not copy stable imagestream: {e}")))?;
        let stable = match created {
            Some(created) => created,
            None => {
                images
                    .get_image_stream(self.job.namespace(), STABLE_IMAGE_STREAM)
                    .await?
            }
        };

        for tag in &stable.spec.tags {
            if let Some(spec) = stable.pull_spec(&tag.name) {
                self.params.set(component_param_name(&tag.name), spec);
            }
        }
        Ok(())
    }

    /// Cross-tag the configured tag from every stream in the source namespace.
    async fn cross_tag_streams(&self, dry: bool) -> StepResult<()> {
        let images = &self.clients.images;
        let streams = images
            .list_image_streams(&self.config.namespace)
            .await
            .map_err(|e| StepError::Resolution {
                what: "stable imagestreams".to_string(),
                reason: e.to_string(),
            })?;

        let mut planned: Vec<(&ImageStream, &str, ImageStreamTag)> = Vec::new();
        for stream in &streams {
            let name = stream.metadata.name.as_str();
            let target = self.config.tag_for(name);
            debug!(stream = %name, tag = %target, "considering stable image stream");
            if stream.spec_tag(target).is_none() {
                continue;
            }
            let image = stream
                .status_tag(target)
                .and_then(|t| t.items.first())
                .map(|item| item.image.as_str())
                .filter(|image| !image.is_empty())
                .ok_or_else(|| {
                    StepError::failed(format!(
                        "no image found backing {}/{name}:{target}",
                        self.config.namespace
                    ))
                })?;
            info!(stream = %name, tag = %target, image = %image, "cross-tagging release image");
            let ist = ImageStreamTag {
                metadata: ObjectMeta::new(self.job.namespace(), format!("{name}:{target}")),
                tag: Some(TagReference {
                    name: target.to_string(),
                    from: Some(ObjectReference::image_stream_image(
                        &self.config.namespace,
                        name,
                        image,
                    )),
                    reference_policy: None,
                }),
                image: None,
            };
            planned.push((stream, target, ist));
        }

        if dry {
            for (_, _, ist) in &planned {
                self.dry_log.record("imagestreamtag", ist)?;
            }
            return Ok(());
        }

        try_join_all(planned.iter().map(|(_, _, ist)| async move {
            ignore_already_exists(images.create_image_stream_tag(ist).await)
        }))
        .await
        .map_err(|e| StepError::failed(format!("could not copy stable imagestreamtag: {e}")))?;

        for (stream, target, _) in &planned {
            if let Some(spec) = stream.pull_spec(target) {
                self.params.set(component_param_name(&stream.metadata.name), spec);
            }
        }
        Ok(())
    }

    /// Externally reachable repository of the main release stream.
    async fn image_base(&self) -> StepResult<String> {
        let name = if self.config.by_name() {
            STABLE_IMAGE_STREAM
        } else {
            ORIGIN_IMAGE_STREAM
        };
        let stream = self
            .clients
            .images
            .get_image_stream(self.job.namespace(), name)
            .await
            .map_err(|e| StepError::Resolution {
                what: "main release ImageStream".to_string(),
                reason: e.to_string(),
            })?;
        if stream.status.public_docker_image_repository.is_empty() {
            return Err(StepError::failed(format!(
                "release ImageStream {}/{name} is not exposed externally",
                self.job.namespace()
            )));
        }
        Ok(stream.status.public_docker_image_repository)
    }

    /// Host of the RPM repository route, preferring the job namespace.
    async fn rpm_repo_host(&self) -> StepResult<String> {
        let routes = &self.clients.routes;
        let route = match routes.get_route(self.job.namespace(), RPM_REPO_ROUTE).await {
            Ok(route) => route,
            Err(e) if e.is_not_found() => {
                routes
                    .get_route(&self.config.namespace, RPM_REPO_ROUTE)
                    .await?
            }
            Err(e) => return Err(e.into()),
        };
        Ok(route.spec.host)
    }

    async fn create_release_config_map(&self, dry: bool) -> StepResult<()> {
        let (image_base, rpm_repo) = if dry {
            (DRY_RUN_PLACEHOLDER.to_string(), DRY_RUN_PLACEHOLDER.to_string())
        } else {
            (self.image_base().await?, self.rpm_repo_host().await?)
        };
        let config_map = ConfigMap {
            metadata: ObjectMeta::new(self.job.namespace(), RELEASE_CONFIG_MAP),
            data: BTreeMap::from([
                ("image-base".to_string(), image_base),
                ("rpm-repo".to_string(), rpm_repo),
            ]),
        };
        if dry {
            return self.dry_log.record("configmap", &config_map);
        }
        ignore_already_exists(self.clients.config_maps.create_config_map(&config_map).await)?;
        Ok(())
    }
}

#[async_trait]
impl Step for ReleaseImagesTagStep {
    async fn inputs(&self, _dry: bool) -> StepResult<InputDefinition> {
        Ok(Vec::new())
    }

    async fn run(&self, dry: bool) -> StepResult<()> {
        info!(source = %self.config.source_name(), "tagging release images");
        if self.config.by_name() {
            self.copy_stable_stream(dry).await?;
        } else {
            self.cross_tag_streams(dry).await?;
        }
        self.create_release_config_map(dry).await
    }

    async fn done(&self, _dry: bool) -> StepResult<bool> {
        info!(config_map = RELEASE_CONFIG_MAP, "checking for existence of release config map");
        Ok(exists(
            self.clients
                .config_maps
                .get_config_map(self.job.namespace(), RELEASE_CONFIG_MAP)
                .await,
        )?)
    }

    fn name(&self) -> &str {
        "[release-inputs]"
    }

    fn requires(&self) -> Vec<Link> {
        Vec::new()
    }

    fn creates(&self) -> Vec<Link> {
        vec![Link::ReleaseImages]
    }

    fn provides(&self) -> (ParameterMap, Option<Link>) {
        let images = Arc::clone(&self.clients.images);
        let namespace = self.job.namespace().to_string();
        let config = self.config.clone();
        let format = parameter(move || {
            let images = Arc::clone(&images);
            let namespace = namespace.clone();
            let config = config.clone();
            async move {
                let registry = registry_host(images.as_ref(), &namespace).await;
                Ok(image_format(&config, &namespace, &registry))
            }
        });
        let mut params = ParameterMap::new();
        params.insert(IMAGE_FORMAT_PARAM.to_string(), format);
        (params, Some(Link::ImagesReady))
    }
}
