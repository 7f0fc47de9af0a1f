use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors reported by the remote media server
#[derive(Debug, Clone, Error)]
pub enum MediaError {
    #[error("{operation} failed: {reason}")]
    Operation {
        operation: &'static str,
        reason: String,
    },

    #[error("unknown media object: {0}")]
    UnknownObject(String),
}

impl MediaError {
    pub fn operation(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Operation {
            operation,
            reason: reason.into(),
        }
    }
}

macro_rules! media_handle {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(u64);

        impl $name {
            pub fn new(raw: u64) -> Self {
                Self(raw)
            }

            pub fn raw(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "-{}"), self.0)
            }
        }
    };
}

media_handle!(
    /// Container owning the endpoint and filter of one session
    PipelineId,
    "pipeline"
);
media_handle!(
    /// Network-facing WebRTC transceiver inside a pipeline
    EndpointId,
    "endpoint"
);
media_handle!(FilterId, "filter");

/// Either end of a media connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaElement {
    Endpoint(EndpointId),
    Filter(FilterId),
}

impl fmt::Display for MediaElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaElement::Endpoint(id) => id.fmt(f),
            MediaElement::Filter(id) => id.fmt(f),
        }
    }
}

/// ICE candidate as exchanged with browsers and the media server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: String,
    pub sdp_m_line_index: u32,
}

/// Asynchronous notifications emitted by a session's media elements
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    /// The endpoint discovered a local candidate
    CandidateFound(IceCandidate),
    /// Opaque notification raised by the media filter
    Filter(serde_json::Value),
    /// A media element reported a runtime failure
    Error(String),
}

/// Ordered event stream for one endpoint/filter pair.
///
/// The stream ends when the owning pipeline is released.
pub type MediaEvents = mpsc::UnboundedReceiver<MediaEvent>;

/// Remote media server operations used by a session.
///
/// Releasing a pipeline releases every element created inside it.
#[async_trait]
pub trait MediaBackend: Send + Sync + 'static {
    async fn create_pipeline(&self) -> Result<PipelineId, MediaError>;

    async fn create_endpoint(&self, pipeline: PipelineId) -> Result<EndpointId, MediaError>;

    async fn create_filter(&self, pipeline: PipelineId) -> Result<FilterId, MediaError>;

    async fn connect(&self, source: MediaElement, sink: MediaElement) -> Result<(), MediaError>;

    /// Subscribe to candidate, filter and error events of the given elements
    async fn subscribe(
        &self,
        endpoint: EndpointId,
        filter: FilterId,
    ) -> Result<MediaEvents, MediaError>;

    async fn process_offer(&self, endpoint: EndpointId, sdp_offer: &str)
    -> Result<String, MediaError>;

    async fn add_candidate(
        &self,
        endpoint: EndpointId,
        candidate: IceCandidate,
    ) -> Result<(), MediaError>;

    async fn gather_candidates(&self, endpoint: EndpointId) -> Result<(), MediaError>;

    async fn release(&self, pipeline: PipelineId) -> Result<(), MediaError>;
}
