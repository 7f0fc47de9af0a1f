use std::sync::Arc;

use tracing::{debug, info, warn};

use super::messages::{ClientMessage, ServerMessage};
use super::registry::SessionRegistry;
use super::relay::EventRelay;
use super::session::{Negotiated, Session};
use super::types::{ConnectionId, Outbox, SignalingError};
use crate::config::DuplicateStartPolicy;
use crate::media::IceCandidate;

/// Routes inbound client messages to sessions.
///
/// Callers feed one connection's messages in order. `start` registers the
/// session synchronously and negotiates in a background task, so later
/// candidates and `stop` for the same connection are routed to the session
/// while negotiation is still running.
pub struct SignalingDispatcher {
    registry: Arc<SessionRegistry>,
    duplicate_start: DuplicateStartPolicy,
}

impl SignalingDispatcher {
    pub fn new(registry: Arc<SessionRegistry>, duplicate_start: DuplicateStartPolicy) -> Self {
        Self {
            registry,
            duplicate_start,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Handle one text frame from `connection_id`
    pub async fn dispatch(&self, connection_id: &ConnectionId, text: &str, outbox: &Outbox) {
        let message = match ClientMessage::parse(text) {
            Ok(m) => m,
            Err(e) => {
                warn!(connection = %connection_id, "Rejected message: {}", e);
                outbox.send_error(e.to_string());
                return;
            }
        };
        debug!(connection = %connection_id, kind = message.kind(), "Incoming message");

        match message {
            ClientMessage::Start { sdp_offer } => self.start(connection_id, sdp_offer, outbox).await,
            ClientMessage::Stop => self.stop(connection_id).await,
            ClientMessage::OnIceCandidate { candidate } => {
                self.add_ice_candidate(connection_id, candidate).await
            }
        }
    }

    /// Release whatever the connection left behind
    pub async fn disconnect(&self, connection_id: &ConnectionId) {
        self.stop(connection_id).await;
    }

    async fn start(&self, connection_id: &ConnectionId, sdp_offer: String, outbox: &Outbox) {
        let session = match self.register(connection_id) {
            Ok(session) => session,
            Err(e) => {
                warn!(connection = %connection_id, "Start rejected: {}", e);
                outbox.send_error(e.to_string());
                return;
            }
        };

        tokio::spawn(negotiate(
            self.registry.clone(),
            session,
            sdp_offer,
            outbox.clone(),
        ));
    }

    fn register(&self, connection_id: &ConnectionId) -> Result<Arc<Session>, SignalingError> {
        match self.duplicate_start {
            DuplicateStartPolicy::Reject => self.registry.create_and_store(connection_id),
            DuplicateStartPolicy::Replace => {
                let (session, previous) = self.registry.replace(connection_id);
                // the old session may be mid-call; don't hold up this connection's reader
                if let Some(previous) = previous {
                    tokio::spawn(async move {
                        previous.release().await;
                    });
                }
                Ok(session)
            }
        }
    }

    async fn stop(&self, connection_id: &ConnectionId) {
        match self.registry.remove(connection_id) {
            Some(session) => {
                session.release().await;
            }
            None => debug!(connection = %connection_id, "No session to stop"),
        }
    }

    async fn add_ice_candidate(&self, connection_id: &ConnectionId, candidate: IceCandidate) {
        let Some(session) = self.registry.get(connection_id) else {
            debug!(connection = %connection_id, "Candidate for unknown session ignored");
            return;
        };

        match session.add_candidate(candidate).await {
            Ok(()) => {}
            Err(SignalingError::SessionReleased) => {
                debug!(connection = %connection_id, "Candidate for released session ignored");
            }
            Err(e) => warn!(connection = %connection_id, "Adding candidate failed: {}", e),
        }
    }
}

async fn negotiate(
    registry: Arc<SessionRegistry>,
    session: Arc<Session>,
    sdp_offer: String,
    outbox: Outbox,
) {
    let connection_id = *session.connection_id();

    match session.start(&sdp_offer).await {
        Ok(Negotiated { sdp_answer, events }) => {
            let response = ServerMessage::StartResponse { sdp_answer };
            // a stop or replacing start that got in after the last step wins
            let queued = session
                .with_live(|| {
                    if !registry.is_current(&connection_id, &session) {
                        return Err(SignalingError::SessionReleased);
                    }
                    outbox.send(&response)
                })
                .await;

            match queued {
                Ok(()) => {
                    // answer is queued first, so candidates can't overtake it
                    EventRelay::new(registry, session, outbox).spawn(events);
                }
                Err(SignalingError::SessionReleased) => {
                    info!(connection = %connection_id, "Start cancelled, session was released");
                }
                Err(e) => {
                    warn!(connection = %connection_id, "Start response not delivered: {}", e);
                    if registry.remove_if_current(&connection_id, &session) {
                        session.release().await;
                    }
                }
            }
        }
        Err(SignalingError::SessionReleased) => {
            info!(connection = %connection_id, "Start cancelled, session was released");
        }
        Err(e) => {
            registry.remove_if_current(&connection_id, &session);
            outbox.send_error(e.to_string());
        }
    }
}
