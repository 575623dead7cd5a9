//! Control-plane client seam.
//!
//! Steps talk to the cluster only through these traits, so any backend
//! (the in-memory [`crate::memory::MemoryCluster`] included) can be injected.

use std::sync::Arc;

use async_trait::async_trait;
use cistep_core::StepError;

use crate::api::{ConfigMap, ImageStream, ImageStreamTag, Route};

/// Errors returned by control-plane clients.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("invalid {kind} {name}: {reason}")]
    Invalid {
        kind: &'static str,
        name: String,
        reason: String,
    },

    #[error("cluster API error: {0}")]
    Api(String),

    #[error("cluster state I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cluster state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClusterError {
    pub fn not_found(kind: &'static str, namespace: &str, name: &str) -> Self {
        ClusterError::NotFound {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn already_exists(kind: &'static str, namespace: &str, name: &str) -> Self {
        ClusterError::AlreadyExists {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, ClusterError::AlreadyExists { .. })
    }
}

impl From<ClusterError> for StepError {
    fn from(err: ClusterError) -> Self {
        StepError::Other(err.into())
    }
}

/// Result type for client calls.
pub type ClusterResult<T> = std::result::Result<T, ClusterError>;

/// Collapse "already exists" into success.
pub fn ignore_already_exists<T>(result: ClusterResult<T>) -> ClusterResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_already_exists() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Map a lookup to presence: "not found" is `false`, other errors propagate.
pub fn exists<T>(result: ClusterResult<T>) -> ClusterResult<bool> {
    match result {
        Ok(_) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

#[async_trait]
pub trait ImageClient: Send + Sync {
    /// Fetch `<stream>:<tag>` in `namespace`.
    async fn get_image_stream_tag(&self, namespace: &str, name: &str) -> ClusterResult<ImageStreamTag>;

    /// Create a tag in `tag.metadata.namespace`.
    async fn create_image_stream_tag(&self, tag: &ImageStreamTag) -> ClusterResult<ImageStreamTag>;

    async fn get_image_stream(&self, namespace: &str, name: &str) -> ClusterResult<ImageStream>;

    async fn list_image_streams(&self, namespace: &str) -> ClusterResult<Vec<ImageStream>>;

    /// Create a stream in `stream.metadata.namespace`.
    async fn create_image_stream(&self, stream: &ImageStream) -> ClusterResult<ImageStream>;
}

#[async_trait]
pub trait ConfigMapClient: Send + Sync {
    async fn get_config_map(&self, namespace: &str, name: &str) -> ClusterResult<ConfigMap>;

    async fn create_config_map(&self, config_map: &ConfigMap) -> ClusterResult<ConfigMap>;
}

#[async_trait]
pub trait RouteClient: Send + Sync {
    async fn get_route(&self, namespace: &str, name: &str) -> ClusterResult<Route>;
}

/// The set of clients handed to steps.
#[derive(Clone)]
pub struct Clients {
    pub images: Arc<dyn ImageClient>,
    pub config_maps: Arc<dyn ConfigMapClient>,
    pub routes: Arc<dyn RouteClient>,
}

impl Clients {
    /// Use one backend for every client.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: ImageClient + ConfigMapClient + RouteClient + 'static,
    {
        Self {
            images: backend.clone(),
            config_maps: backend.clone(),
            routes: backend,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_error_predicates() {
        let nf = ClusterError::not_found("configmap", "ci", "release");
        assert!(nf.is_not_found());
        assert!(!nf.is_already_exists());
        assert_eq!(nf.to_string(), "configmap ci/release not found");

        let ae = ClusterError::already_exists("imagestream", "ci", "stable");
        assert!(ae.is_already_exists());
        assert!(ae.to_string().contains("already exists"));
    }

    #[test]
    fn test_exists_and_ignore_already_exists() {
        assert!(!exists::<()>(Err(ClusterError::not_found("route", "ci", "rpm-repo"))).unwrap());
        assert!(exists(Ok(())).unwrap());
        assert!(exists::<()>(Err(ClusterError::Api("timeout".into()))).is_err());

        let created = ignore_already_exists(Ok(1)).unwrap();
        assert_eq!(created, Some(1));
        let existing =
            ignore_already_exists::<i32>(Err(ClusterError::already_exists("configmap", "ci", "release")))
                .unwrap();
        assert_eq!(existing, None);
    }

    #[test]
    fn test_cluster_error_converts_to_step_error() {
        let err: StepError = ClusterError::Api("connection refused".into()).into();
        assert!(err.to_string().contains("connection refused"));
    }
}
