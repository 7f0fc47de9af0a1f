use std::fmt;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::types::{ConnectionId, SignalingError};
use crate::media::{EndpointId, IceCandidate, MediaBackend, MediaElement, MediaEvents, PipelineId};

/// Lifecycle of a media session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Created,
    Negotiating,
    Active,
    Released,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Created => "created",
            SessionState::Negotiating => "negotiating",
            SessionState::Active => "active",
            SessionState::Released => "released",
        };
        f.write_str(name)
    }
}

/// Outcome of a successful start
#[derive(Debug)]
pub struct Negotiated {
    pub sdp_answer: String,
    /// Endpoint and filter events, buffered until someone drains them
    pub events: MediaEvents,
}

#[derive(Debug, Default)]
struct SessionInner {
    state: SessionState,
    start_called: bool,
    pipeline: Option<PipelineId>,
    endpoint: Option<EndpointId>,
    /// Browser candidates received before the endpoint existed, in arrival order
    pending_candidates: Vec<IceCandidate>,
}

/// Server-side state of one client's media exchange.
///
/// Every operation takes the session lock for the duration of a single
/// backend call, so operations on one session never run concurrently and
/// queue behind whatever call is outstanding. `start` gives the lock up
/// between steps: a candidate or a release arriving mid-negotiation is
/// applied at the next step boundary.
pub struct Session {
    connection_id: ConnectionId,
    backend: Arc<dyn MediaBackend>,
    inner: Mutex<SessionInner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("connection_id", &self.connection_id)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(connection_id: ConnectionId, backend: Arc<dyn MediaBackend>) -> Self {
        Self {
            connection_id,
            backend,
            inner: Mutex::new(SessionInner::default()),
        }
    }

    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    /// Allocate the pipeline, wire endpoint and filter, answer the offer and
    /// start candidate gathering.
    ///
    /// On any failure everything allocated so far is released before the
    /// error is returned. A session released while `start` is in flight
    /// makes it fail with [`SignalingError::SessionReleased`].
    pub async fn start(&self, sdp_offer: &str) -> Result<Negotiated, SignalingError> {
        {
            let mut inner = self.lock_live().await?;
            if inner.start_called {
                return Err(SignalingError::AlreadyStarted);
            }
            inner.start_called = true;
        }

        match self.negotiate(sdp_offer).await {
            Ok(negotiated) => Ok(negotiated),
            Err(e) => {
                if !matches!(e, SignalingError::SessionReleased) {
                    warn!(connection = %self.connection_id, "Start failed: {}", e);
                }
                self.release().await;
                Err(e)
            }
        }
    }

    async fn negotiate(&self, sdp_offer: &str) -> Result<Negotiated, SignalingError> {
        let pipeline = {
            let mut inner = self.lock_live().await?;
            let pipeline = self.backend.create_pipeline().await?;
            inner.pipeline = Some(pipeline);
            pipeline
        };

        let endpoint = {
            let mut inner = self.lock_live().await?;
            let endpoint = self.backend.create_endpoint(pipeline).await?;
            inner.endpoint = Some(endpoint);
            inner.state = SessionState::Negotiating;
            self.flush_buffered_candidates(&mut inner, endpoint).await?;
            endpoint
        };
        debug!(connection = %self.connection_id, %pipeline, %endpoint, "endpoint ready");

        let events = {
            let _inner = self.lock_live().await?;
            let filter = self.backend.create_filter(pipeline).await?;
            let endpoint_element = MediaElement::Endpoint(endpoint);
            let filter_element = MediaElement::Filter(filter);
            self.backend
                .connect(endpoint_element, filter_element)
                .await?;
            self.backend
                .connect(filter_element, endpoint_element)
                .await?;
            self.backend.subscribe(endpoint, filter).await?
        };

        let sdp_answer = {
            let _inner = self.lock_live().await?;
            self.backend.process_offer(endpoint, sdp_offer).await?
        };

        {
            let mut inner = self.lock_live().await?;
            self.backend.gather_candidates(endpoint).await?;
            inner.state = SessionState::Active;
        }
        info!(connection = %self.connection_id, %pipeline, "Session active");

        Ok(Negotiated { sdp_answer, events })
    }

    /// Forward buffered candidates in arrival order, then clear the buffer.
    ///
    /// Runs under the same lock guard that stored the endpoint, so no other
    /// candidate can be forwarded ahead of the buffered ones.
    async fn flush_buffered_candidates(
        &self,
        inner: &mut SessionInner,
        endpoint: EndpointId,
    ) -> Result<(), SignalingError> {
        let pending = std::mem::take(&mut inner.pending_candidates);
        if !pending.is_empty() {
            debug!(connection = %self.connection_id, count = pending.len(), "flushing buffered candidates");
        }
        for candidate in pending {
            self.backend.add_candidate(endpoint, candidate).await?;
        }
        Ok(())
    }

    /// Forward a browser candidate, or buffer it until the endpoint exists
    pub async fn add_candidate(&self, candidate: IceCandidate) -> Result<(), SignalingError> {
        let mut inner = self.lock_live().await?;
        let endpoint = inner.endpoint;
        match endpoint {
            Some(endpoint) => self.backend.add_candidate(endpoint, candidate).await?,
            None => inner.pending_candidates.push(candidate),
        }
        Ok(())
    }

    /// Release the pipeline (and with it endpoint and filter).
    ///
    /// Idempotent; returns `true` only for the call that performed the release.
    pub async fn release(&self) -> bool {
        let mut inner = self.inner.lock().await;
        let previous = inner.state;
        if previous == SessionState::Released {
            return false;
        }
        inner.state = SessionState::Released;
        inner.endpoint = None;
        inner.pending_candidates.clear();

        if let Some(pipeline) = inner.pipeline.take() {
            match self.backend.release(pipeline).await {
                Ok(()) => info!(
                    connection = %self.connection_id,
                    %pipeline,
                    from = %previous,
                    "Session released"
                ),
                Err(e) => warn!(
                    connection = %self.connection_id,
                    %pipeline,
                    "Pipeline release failed: {}", e
                ),
            }
        } else {
            debug!(connection = %self.connection_id, "Session released before pipeline existed");
        }
        true
    }

    /// Run `f` under the session lock if the session has not been released.
    ///
    /// A release queued behind the lock runs either entirely before `f`
    /// (which is then skipped) or entirely after it.
    pub async fn with_live<R>(
        &self,
        f: impl FnOnce() -> Result<R, SignalingError>,
    ) -> Result<R, SignalingError> {
        let _inner = self.lock_live().await?;
        f()
    }

    async fn lock_live(&self) -> Result<MutexGuard<'_, SessionInner>, SignalingError> {
        let inner = self.inner.lock().await;
        if inner.state == SessionState::Released {
            return Err(SignalingError::SessionReleased);
        }
        Ok(inner)
    }
}
