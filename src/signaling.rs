//! WebSocket signaling between browsers and the media server

mod dispatcher;
mod messages;
mod registry;
mod relay;
mod server;
mod session;
mod types;

pub use dispatcher::SignalingDispatcher;
pub use messages::{ClientMessage, ServerMessage};
pub use registry::SessionRegistry;
pub use relay::EventRelay;
pub use server::SignalingServer;
pub use session::{Negotiated, Session, SessionState};
pub use types::{ConnectionId, OutboundMessage, Outbox, SignalingError};
