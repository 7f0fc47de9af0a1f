use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::messages::ServerMessage;
use super::registry::SessionRegistry;
use super::session::{Session, SessionState};
use super::types::Outbox;
use crate::media::MediaEvents;

/// Forwards one session's media events to its connection.
///
/// A single task drains the session's event stream into the connection's
/// outbox, so events reach the socket in the order the media server emitted
/// them. The relay stops when the stream ends, when the session is released,
/// or when the connection can no longer be written to; in the last case the
/// session is torn down as if the client had sent `stop`.
pub struct EventRelay {
    registry: Arc<SessionRegistry>,
    session: Arc<Session>,
    outbox: Outbox,
}

impl EventRelay {
    pub fn new(registry: Arc<SessionRegistry>, session: Arc<Session>, outbox: Outbox) -> Self {
        Self {
            registry,
            session,
            outbox,
        }
    }

    pub fn spawn(self, events: MediaEvents) -> JoinHandle<()> {
        tokio::spawn(self.run(events))
    }

    async fn run(self, mut events: MediaEvents) {
        let connection_id = *self.session.connection_id();

        while let Some(event) = events.recv().await {
            if self.session.state().await == SessionState::Released {
                break;
            }

            let message = ServerMessage::from(event);
            if let Err(e) = self.outbox.send(&message) {
                warn!(connection = %connection_id, "Event delivery failed: {}", e);
                if self.registry.remove_if_current(&connection_id, &self.session) {
                    self.session.release().await;
                }
                break;
            }
        }

        debug!(connection = %connection_id, "Event relay finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaEvent;
    use crate::media::testing::{RecordingBackend, candidate};
    use crate::signaling::types::ConnectionId;
    use serde_json::{Value, json};

    async fn active_session() -> (
        Arc<RecordingBackend>,
        Arc<SessionRegistry>,
        Arc<Session>,
        MediaEvents,
    ) {
        let backend = RecordingBackend::new();
        let registry = Arc::new(SessionRegistry::new(backend.clone()));
        let session = registry
            .create_and_store(&ConnectionId::from("conn_relay"))
            .unwrap();
        let negotiated = session.start("offer").await.unwrap();
        (backend, registry, session, negotiated.events)
    }

    #[tokio::test]
    async fn forwards_events_in_emission_order() {
        let (backend, registry, session, events) = active_session().await;
        let (outbox, mut rx) = Outbox::channel();
        let relay = EventRelay::new(registry, session.clone(), outbox).spawn(events);

        backend.emit(MediaEvent::CandidateFound(candidate(1)));
        backend.emit(MediaEvent::Filter(json!({"info": "frame saved"})));
        backend.emit(MediaEvent::CandidateFound(candidate(2)));

        let mut ids = Vec::new();
        for _ in 0..3 {
            let msg = rx.recv().await.unwrap();
            let value: Value = serde_json::from_str(msg.as_str()).unwrap();
            ids.push(value["id"].as_str().unwrap().to_string());
        }
        assert_eq!(ids, ["iceCandidate", "filterEvent", "iceCandidate"]);

        // releasing the pipeline ends the stream and the relay with it
        session.release().await;
        relay.await.unwrap();
    }

    #[tokio::test]
    async fn write_failure_tears_down_the_session() {
        let (backend, registry, session, events) = active_session().await;
        let (outbox, rx) = Outbox::channel();
        drop(rx);
        let relay = EventRelay::new(registry.clone(), session.clone(), outbox).spawn(events);

        backend.emit(MediaEvent::CandidateFound(candidate(1)));
        relay.await.unwrap();

        assert!(registry.is_empty());
        assert_eq!(session.state().await, SessionState::Released);
        assert_eq!(backend.released().len(), 1);
    }

    #[tokio::test]
    async fn released_session_events_are_dropped() {
        let (backend, registry, session, events) = active_session().await;
        let (outbox, mut rx) = Outbox::channel();

        // queue an event, then release before the relay drains it
        backend.emit(MediaEvent::CandidateFound(candidate(1)));
        session.release().await;
        EventRelay::new(registry, session, outbox)
            .spawn(events)
            .await
            .unwrap();

        assert!(rx.try_recv().is_err());
    }
}
