//! In-memory control plane.
//!
//! `MemoryCluster` implements every client trait against a single
//! [`ClusterSnapshot`]. Image stream tags are views into their streams, as
//! on a real cluster: creating a tag adds a spec tag plus a resolved status
//! entry, and reading one reads the stream. The snapshot round-trips
//! through JSON so separate invocations observe each other's effects.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::{
    ConfigMap, Image, ImageStream, ImageStreamTag, NamedTagEventList, ObjectMeta, ObjectReference,
    Route, TagEvent, TagReference, KIND_DOCKER_IMAGE, KIND_IMAGE_STREAM_IMAGE,
};
use crate::client::{ClusterError, ClusterResult, ConfigMapClient, ImageClient, RouteClient};

/// Registry host every stream gets an internal repository on.
pub const INTERNAL_REGISTRY: &str = "image-registry.openshift-image-registry.svc:5000";

/// Serializable state of a [`MemoryCluster`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    /// Externally reachable registry host. Streams created while this is
    /// set are exposed publicly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_registry: Option<String>,
    #[serde(default)]
    pub image_streams: Vec<ImageStream>,
    #[serde(default)]
    pub config_maps: Vec<ConfigMap>,
    #[serde(default)]
    pub routes: Vec<Route>,
}

impl ClusterSnapshot {
    fn stream(&self, namespace: &str, name: &str) -> Option<&ImageStream> {
        self.image_streams
            .iter()
            .find(|s| s.metadata.namespace == namespace && s.metadata.name == name)
    }

    fn stream_mut(&mut self, namespace: &str, name: &str) -> Option<&mut ImageStream> {
        self.image_streams
            .iter_mut()
            .find(|s| s.metadata.namespace == namespace && s.metadata.name == name)
    }

    /// Resolve a tag source to the event recorded in stream status.
    fn resolve(&self, namespace: &str, from: &ObjectReference) -> TagEvent {
        match from.kind.as_str() {
            KIND_IMAGE_STREAM_IMAGE => {
                let source_ns = if from.namespace.is_empty() {
                    namespace
                } else {
                    from.namespace.as_str()
                };
                let (stream, image) = from.name.split_once('@').unwrap_or((from.name.as_str(), ""));
                let docker_image_reference = self
                    .stream(source_ns, stream)
                    .and_then(ImageStream::repository)
                    .map(|repo| format!("{repo}@{image}"))
                    .unwrap_or_default();
                TagEvent {
                    docker_image_reference,
                    image: image.to_string(),
                }
            }
            KIND_DOCKER_IMAGE => TagEvent {
                docker_image_reference: from.name.clone(),
                image: String::new(),
            },
            _ => TagEvent::default(),
        }
    }

    /// Fill in the status a freshly created stream would report.
    fn admit(&self, mut stream: ImageStream) -> ImageStream {
        let ns = stream.metadata.namespace.clone();
        let name = stream.metadata.name.clone();
        stream.status.docker_image_repository = format!("{INTERNAL_REGISTRY}/{ns}/{name}");
        if let Some(registry) = &self.public_registry {
            stream.status.public_docker_image_repository = format!("{registry}/{ns}/{name}");
        }
        stream.status.tags = stream
            .spec
            .tags
            .iter()
            .filter_map(|tag| {
                let from = tag.from.as_ref()?;
                Some(NamedTagEventList {
                    tag: tag.name.clone(),
                    items: vec![self.resolve(&ns, from)],
                })
            })
            .collect();
        stream
    }
}

fn tag_view(stream: &ImageStream, tag: &str) -> Option<ImageStreamTag> {
    let latest = stream.status_tag(tag)?.items.first()?;
    let image = (!latest.image.is_empty()).then(|| Image {
        metadata: ObjectMeta::new("", latest.image.clone()),
    });
    Some(ImageStreamTag {
        metadata: ObjectMeta::new(
            stream.metadata.namespace.clone(),
            format!("{}:{tag}", stream.metadata.name),
        ),
        tag: stream.spec_tag(tag).cloned(),
        image,
    })
}

/// In-memory implementation of every control-plane client.
#[derive(Debug, Default)]
pub struct MemoryCluster {
    state: Mutex<ClusterSnapshot>,
    calls: Mutex<BTreeMap<&'static str, usize>>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: ClusterSnapshot) -> Self {
        Self {
            state: Mutex::new(snapshot),
            calls: Mutex::default(),
        }
    }

    pub fn with_public_registry(self, registry: impl Into<String>) -> Self {
        self.lock().public_registry = Some(registry.into());
        self
    }

    /// Load a snapshot from `path`; a missing file yields an empty cluster.
    pub fn load(path: &Path) -> ClusterResult<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no cluster state file; starting empty");
            return Ok(Self::new());
        }
        let contents = std::fs::read_to_string(path)?;
        let snapshot: ClusterSnapshot = serde_json::from_str(&contents)?;
        Ok(Self::from_snapshot(snapshot))
    }

    pub fn save(&self, path: &Path) -> ClusterResult<()> {
        let json = serde_json::to_string_pretty(&self.snapshot())?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn snapshot(&self) -> ClusterSnapshot {
        self.lock().clone()
    }

    /// Store a stream exactly as given, replacing any existing one.
    pub fn insert_image_stream(&self, stream: ImageStream) {
        let mut state = self.lock();
        state.image_streams.retain(|s| {
            s.metadata.namespace != stream.metadata.namespace || s.metadata.name != stream.metadata.name
        });
        state.image_streams.push(stream);
    }

    pub fn insert_config_map(&self, config_map: ConfigMap) {
        let mut state = self.lock();
        state.config_maps.retain(|c| c.metadata != config_map.metadata);
        state.config_maps.push(config_map);
    }

    pub fn insert_route(&self, route: Route) {
        let mut state = self.lock();
        state.routes.retain(|r| r.metadata != route.metadata);
        state.routes.push(route);
    }

    pub fn image_stream(&self, namespace: &str, name: &str) -> Option<ImageStream> {
        self.lock().stream(namespace, name).cloned()
    }

    pub fn config_map(&self, namespace: &str, name: &str) -> Option<ConfigMap> {
        self.lock()
            .config_maps
            .iter()
            .find(|c| c.metadata.namespace == namespace && c.metadata.name == name)
            .cloned()
    }

    /// Number of calls made to the named client operation.
    pub fn calls(&self, operation: &str) -> usize {
        let calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        calls.get(operation).copied().unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ClusterSnapshot> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, operation: &'static str) {
        let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        *calls.entry(operation).or_insert(0) += 1;
    }
}

#[async_trait]
impl ImageClient for MemoryCluster {
    async fn get_image_stream_tag(&self, namespace: &str, name: &str) -> ClusterResult<ImageStreamTag> {
        self.record("get_image_stream_tag");
        let state = self.lock();
        ImageStreamTag::split_name(name)
            .and_then(|(stream, tag)| tag_view(state.stream(namespace, stream)?, tag))
            .ok_or_else(|| ClusterError::not_found("imagestreamtag", namespace, name))
    }

    async fn create_image_stream_tag(&self, ist: &ImageStreamTag) -> ClusterResult<ImageStreamTag> {
        self.record("create_image_stream_tag");
        let namespace = ist.metadata.namespace.as_str();
        let name = ist.metadata.name.as_str();
        let invalid = |reason: &str| ClusterError::Invalid {
            kind: "imagestreamtag",
            name: name.to_string(),
            reason: reason.to_string(),
        };
        let (stream_name, tag) =
            ImageStreamTag::split_name(name).ok_or_else(|| invalid("name must be <stream>:<tag>"))?;
        let reference = ist.tag.clone().ok_or_else(|| invalid("tag reference is required"))?;
        let from = reference
            .from
            .clone()
            .ok_or_else(|| invalid("tag reference has no source"))?;

        let mut state = self.lock();
        if state.stream(namespace, stream_name).is_none() {
            let admitted = state.admit(ImageStream::new(namespace, stream_name));
            state.image_streams.push(admitted);
        }
        let event = state.resolve(namespace, &from);
        let stream = state
            .stream_mut(namespace, stream_name)
            .ok_or_else(|| ClusterError::not_found("imagestream", namespace, stream_name))?;
        if stream.spec_tag(tag).is_some() {
            return Err(ClusterError::already_exists("imagestreamtag", namespace, name));
        }
        stream.spec.tags.push(TagReference {
            name: tag.to_string(),
            ..reference
        });
        stream.status.tags.retain(|t| t.tag != tag);
        stream.status.tags.push(NamedTagEventList {
            tag: tag.to_string(),
            items: vec![event],
        });
        debug!(namespace, name, "created image stream tag");
        tag_view(stream, tag).ok_or_else(|| ClusterError::not_found("imagestreamtag", namespace, name))
    }

    async fn get_image_stream(&self, namespace: &str, name: &str) -> ClusterResult<ImageStream> {
        self.record("get_image_stream");
        self.lock()
            .stream(namespace, name)
            .cloned()
            .ok_or_else(|| ClusterError::not_found("imagestream", namespace, name))
    }

    async fn list_image_streams(&self, namespace: &str) -> ClusterResult<Vec<ImageStream>> {
        self.record("list_image_streams");
        Ok(self
            .lock()
            .image_streams
            .iter()
            .filter(|s| s.metadata.namespace == namespace)
            .cloned()
            .collect())
    }

    async fn create_image_stream(&self, stream: &ImageStream) -> ClusterResult<ImageStream> {
        self.record("create_image_stream");
        let namespace = stream.metadata.namespace.as_str();
        let name = stream.metadata.name.as_str();
        let mut state = self.lock();
        if state.stream(namespace, name).is_some() {
            return Err(ClusterError::already_exists("imagestream", namespace, name));
        }
        let admitted = state.admit(stream.clone());
        state.image_streams.push(admitted.clone());
        debug!(namespace, name, tags = admitted.spec.tags.len(), "created image stream");
        Ok(admitted)
    }
}

#[async_trait]
impl ConfigMapClient for MemoryCluster {
    async fn get_config_map(&self, namespace: &str, name: &str) -> ClusterResult<ConfigMap> {
        self.record("get_config_map");
        self.config_map(namespace, name)
            .ok_or_else(|| ClusterError::not_found("configmap", namespace, name))
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> ClusterResult<ConfigMap> {
        self.record("create_config_map");
        let mut state = self.lock();
        if state.config_maps.iter().any(|c| c.metadata == config_map.metadata) {
            return Err(ClusterError::already_exists(
                "configmap",
                &config_map.metadata.namespace,
                &config_map.metadata.name,
            ));
        }
        state.config_maps.push(config_map.clone());
        Ok(config_map.clone())
    }
}

#[async_trait]
impl RouteClient for MemoryCluster {
    async fn get_route(&self, namespace: &str, name: &str) -> ClusterResult<Route> {
        self.record("get_route");
        self.lock()
            .routes
            .iter()
            .find(|r| r.metadata.namespace == namespace && r.metadata.name == name)
            .cloned()
            .ok_or_else(|| ClusterError::not_found("route", namespace, name))
    }
}
