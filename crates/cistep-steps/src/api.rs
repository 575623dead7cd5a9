//! Control-plane resource types.
//!
//! These mirror the subset of image, config map, and route objects the
//! steps read and write. Field names serialize in the cluster's camelCase
//! wire form so dry-run payloads can be applied as-is.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Image stream that holds the job's own images.
pub const PIPELINE_IMAGE_STREAM: &str = "pipeline";

/// Image stream a named release is copied into.
pub const STABLE_IMAGE_STREAM: &str = "stable";

/// Image stream whose repository is advertised as the release image base
/// when tagging by tag.
pub const ORIGIN_IMAGE_STREAM: &str = "origin";

/// Config map recording where the release images and RPMs live.
pub const RELEASE_CONFIG_MAP: &str = "release";

/// Route serving the RPM repository.
pub const RPM_REPO_ROUTE: &str = "rpm-repo";

/// Object kinds, as named on the wire.
pub const KIND_IMAGE_STREAM_IMAGE: &str = "ImageStreamImage";
pub const KIND_DOCKER_IMAGE: &str = "DockerImage";

fn is_empty(s: &str) -> bool {
    s.is_empty()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub namespace: String,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

/// Pointer to another object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub namespace: String,
}

impl ObjectReference {
    /// `<stream>@<image>` in `namespace`.
    pub fn image_stream_image(namespace: &str, stream: &str, image: &str) -> Self {
        Self {
            kind: KIND_IMAGE_STREAM_IMAGE.to_string(),
            name: format!("{stream}@{image}"),
            namespace: namespace.to_string(),
        }
    }

    pub fn docker_image(pull_spec: &str) -> Self {
        Self {
            kind: KIND_DOCKER_IMAGE.to_string(),
            name: pull_spec.to_string(),
            namespace: String::new(),
        }
    }

    /// Image id of an `ImageStreamImage` reference.
    pub fn image_id(&self) -> Option<&str> {
        if self.kind != KIND_IMAGE_STREAM_IMAGE {
            return None;
        }
        self.name.split_once('@').map(|(_, id)| id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferencePolicyType {
    #[default]
    Source,
    Local,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagReferencePolicy {
    #[serde(rename = "type")]
    pub policy: ReferencePolicyType,
}

/// Spec-side tag on an image stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagReference {
    #[serde(default, skip_serializing_if = "is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<ObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_policy: Option<TagReferencePolicy>,
}

/// Minimal image metadata; the name is the image id (a digest).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub metadata: ObjectMeta,
}

/// A single tag of a stream, addressed as `<stream>:<tag>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageStreamTag {
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<TagReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<Image>,
}

impl ImageStreamTag {
    /// Split `<stream>:<tag>` into its parts.
    pub fn split_name(name: &str) -> Option<(&str, &str)> {
        name.split_once(':')
            .filter(|(stream, tag)| !stream.is_empty() && !tag.is_empty())
    }

    pub fn image_id(&self) -> Option<&str> {
        self.image
            .as_ref()
            .map(|i| i.metadata.name.as_str())
            .filter(|id| !id.is_empty())
    }
}

/// One resolution of a tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagEvent {
    #[serde(default)]
    pub docker_image_reference: String,
    #[serde(default)]
    pub image: String,
}

/// Resolution history of one tag, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedTagEventList {
    pub tag: String,
    #[serde(default)]
    pub items: Vec<TagEvent>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageStreamSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<TagReference>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageStreamStatus {
    #[serde(default, skip_serializing_if = "is_empty")]
    pub docker_image_repository: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub public_docker_image_repository: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<NamedTagEventList>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageStream {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ImageStreamSpec,
    #[serde(default)]
    pub status: ImageStreamStatus,
}

impl ImageStream {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            ..Self::default()
        }
    }

    pub fn spec_tag(&self, tag: &str) -> Option<&TagReference> {
        self.spec.tags.iter().find(|t| t.name == tag)
    }

    pub fn status_tag(&self, tag: &str) -> Option<&NamedTagEventList> {
        self.status.tags.iter().find(|t| t.tag == tag)
    }

    /// Public repository if exposed, else the internal one.
    pub fn repository(&self) -> Option<&str> {
        [
            self.status.public_docker_image_repository.as_str(),
            self.status.docker_image_repository.as_str(),
        ]
        .into_iter()
        .find(|r| !r.is_empty())
    }

    /// Reference to the newest resolution of `tag`, if it has one.
    pub fn resolved_tag(&self, tag: &str) -> Option<ObjectReference> {
        let latest = self.status_tag(tag)?.items.first()?;
        if latest.image.is_empty() {
            return Some(ObjectReference::docker_image(&latest.docker_image_reference));
        }
        Some(ObjectReference::image_stream_image(
            &self.metadata.namespace,
            &self.metadata.name,
            &latest.image,
        ))
    }

    /// Pull spec for `tag`: by digest when the tag is resolved, otherwise
    /// by tag against the stream's repository.
    pub fn pull_spec(&self, tag: &str) -> Option<String> {
        let repository = self.repository()?;
        let image = self
            .status_tag(tag)
            .and_then(|t| t.items.first())
            .map(|item| item.image.as_str())
            .filter(|image| !image.is_empty());
        Some(match image {
            Some(image) => format!("{repository}@{image}"),
            None => format!("{repository}:{tag}"),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMap {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSpec {
    pub host: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub metadata: ObjectMeta,
    pub spec: RouteSpec,
}

impl Route {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec: RouteSpec { host: host.into() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_with(public: &str, internal: &str, tag: &str, image: &str) -> ImageStream {
        let mut is = ImageStream::new("ocp", "release");
        is.status.public_docker_image_repository = public.to_string();
        is.status.docker_image_repository = internal.to_string();
        is.status.tags.push(NamedTagEventList {
            tag: tag.to_string(),
            items: vec![TagEvent {
                docker_image_reference: format!("quay.io/ocp/release@{image}"),
                image: image.to_string(),
            }],
        });
        is
    }

    #[test]
    fn test_pull_spec_prefers_public_repository_and_digest() {
        let is = stream_with("registry.ci/ocp/release", "svc:5000/ocp/release", "cli", "sha256:1");
        assert_eq!(is.pull_spec("cli").as_deref(), Some("registry.ci/ocp/release@sha256:1"));
        assert_eq!(is.pull_spec("tests").as_deref(), Some("registry.ci/ocp/release:tests"));
    }

    #[test]
    fn test_pull_spec_falls_back_to_internal_repository() {
        let is = stream_with("", "svc:5000/ocp/release", "cli", "");
        assert_eq!(is.pull_spec("cli").as_deref(), Some("svc:5000/ocp/release:cli"));
        let bare = ImageStream::new("ocp", "release");
        assert_eq!(bare.pull_spec("cli"), None);
    }

    #[test]
    fn test_resolved_tag_reference_kinds() {
        let is = stream_with("", "", "cli", "sha256:1");
        let reference = is.resolved_tag("cli").unwrap();
        assert_eq!(reference.kind, KIND_IMAGE_STREAM_IMAGE);
        assert_eq!(reference.name, "release@sha256:1");
        assert_eq!(reference.namespace, "ocp");
        assert_eq!(reference.image_id(), Some("sha256:1"));

        let by_pull_spec = stream_with("", "", "cli", "");
        let reference = by_pull_spec.resolved_tag("cli").unwrap();
        assert_eq!(reference.kind, KIND_DOCKER_IMAGE);
        assert_eq!(reference.name, "quay.io/ocp/release@");
        assert!(is.resolved_tag("missing").is_none());
    }

    #[test]
    fn test_image_stream_tag_wire_form() {
        let ist = ImageStreamTag {
            metadata: ObjectMeta::new("ci-op-1234", "pipeline:root"),
            tag: Some(TagReference {
                name: String::new(),
                from: Some(ObjectReference::image_stream_image("ocp", "base", "sha256:1")),
                reference_policy: Some(TagReferencePolicy {
                    policy: ReferencePolicyType::Local,
                }),
            }),
            image: None,
        };
        let json = serde_json::to_value(&ist).unwrap();
        assert_eq!(json["metadata"]["name"], "pipeline:root");
        assert_eq!(json["tag"]["referencePolicy"]["type"], "Local");
        assert_eq!(json["tag"]["from"]["kind"], "ImageStreamImage");
        assert!(json.get("image").is_none());
    }

    #[test]
    fn test_split_image_stream_tag_name() {
        assert_eq!(ImageStreamTag::split_name("pipeline:root"), Some(("pipeline", "root")));
        assert_eq!(ImageStreamTag::split_name("pipeline"), None);
        assert_eq!(ImageStreamTag::split_name(":root"), None);
    }
}
