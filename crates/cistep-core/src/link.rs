//! Links: the tokens steps require and create.
//!
//! A [`Link`] carries no identity beyond what its kind compares. Two links
//! are interchangeable for scheduling purposes exactly when
//! [`Link::matches`] says so; the relation is symmetric and never holds
//! across kinds. `Link` has no `PartialEq`; compare with `matches`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Reference to a tag on an image stream outside the job namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageStreamTagReference {
    pub namespace: String,
    pub name: String,
    pub tag: String,
    /// Optional alias used by configuration; not part of link identity.
    #[serde(rename = "as", default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl ImageStreamTagReference {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            tag: tag.into(),
            alias: None,
        }
    }
}

impl fmt::Display for ImageStreamTagReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.namespace, self.name, self.tag)
    }
}

/// A tag on the job's own pipeline image stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineImageStreamTagReference(pub String);

impl PipelineImageStreamTagReference {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PipelineImageStreamTagReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A produced or required resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Link {
    /// An image stream tag sourced from outside the pipeline.
    ExternalImage { image: ImageStreamTagReference },
    /// A tag on the pipeline image stream.
    InternalImage { image: PipelineImageStreamTagReference },
    /// All images for the job are in place.
    ImagesReady,
    /// The RPM repository serving the job is available.
    RpmRepo,
    /// The release image set has been tagged in.
    ReleaseImages,
}

impl Link {
    pub fn external_image(image: ImageStreamTagReference) -> Self {
        Link::ExternalImage { image }
    }

    pub fn internal_image(image: PipelineImageStreamTagReference) -> Self {
        Link::InternalImage { image }
    }

    /// Whether `self` and `other` denote the same resource.
    pub fn matches(&self, other: &Link) -> bool {
        match (self, other) {
            (Link::ExternalImage { image: a }, Link::ExternalImage { image: b }) => {
                a.name == b.name && a.namespace == b.namespace && a.tag == b.tag
            }
            (Link::InternalImage { image: a }, Link::InternalImage { image: b }) => a == b,
            (Link::ImagesReady, Link::ImagesReady)
            | (Link::RpmRepo, Link::RpmRepo)
            | (Link::ReleaseImages, Link::ReleaseImages) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Link::ExternalImage { image } => write!(f, "external-image({image})"),
            Link::InternalImage { image } => write!(f, "internal-image({image})"),
            Link::ImagesReady => f.write_str("images-ready"),
            Link::RpmRepo => f.write_str("rpm-repo"),
            Link::ReleaseImages => f.write_str("release-images"),
        }
    }
}

/// Whether any link in `candidates` matches any link in `links`.
pub fn has_any_links(links: &[Link], candidates: &[Link]) -> bool {
    candidates
        .iter()
        .any(|candidate| links.iter().any(|link| link.matches(candidate)))
}
