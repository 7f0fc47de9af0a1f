//! Remote media server interface and the in-process loopback implementation

mod backend;
mod loopback;
#[cfg(test)]
pub(crate) mod testing;

pub use backend::{
    EndpointId, FilterId, IceCandidate, MediaBackend, MediaElement, MediaError, MediaEvent,
    MediaEvents, PipelineId,
};
pub use loopback::LoopbackBackend;
