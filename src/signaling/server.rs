use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Bytes, Message};
use tracing::{debug, error, info, warn};

use super::dispatcher::SignalingDispatcher;
use super::registry::SessionRegistry;
use super::types::{ConnectionId, Outbox};
use crate::config::SignalingConfig;
use crate::media::MediaBackend;

#[derive(Debug, Clone, Copy)]
struct KeepAlive {
    ping_interval: Duration,
    pong_timeout: Duration,
}

pub struct SignalingServer {
    listener: TcpListener,
    dispatcher: Arc<SignalingDispatcher>,
    keep_alive: KeepAlive,
}

impl SignalingServer {
    /// Bind the listener described by `config`
    pub async fn bind(
        config: SignalingConfig,
        backend: Arc<dyn MediaBackend>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(config.listen_addr).await?;
        info!("Signaling server listening on {}", listener.local_addr()?);

        let registry = Arc::new(SessionRegistry::new(backend));
        let dispatcher = Arc::new(SignalingDispatcher::new(registry, config.duplicate_start));

        Ok(Self {
            listener,
            dispatcher,
            keep_alive: KeepAlive {
                ping_interval: config.ping_interval,
                pong_timeout: config.pong_timeout,
            },
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.dispatcher.registry().clone()
    }

    /// Serve until Ctrl-C
    pub async fn run(self) -> std::io::Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Serve until `shutdown` resolves, then release every session
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> std::io::Result<()> {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            error!("Accept failed: {}", e);
                            continue;
                        }
                    };
                    let dispatcher = self.dispatcher.clone();
                    let keep_alive = self.keep_alive;

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, addr, dispatcher, keep_alive).await {
                            error!("Connection error from {}: {}", addr, e);
                        }
                    });
                }

                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }

        let sessions = self.dispatcher.registry().drain();
        info!("Releasing {} sessions", sessions.len());
        for session in sessions {
            session.release().await;
        }
        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    dispatcher: Arc<SignalingDispatcher>,
    keep_alive: KeepAlive,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let connection_id = ConnectionId::generate();
    info!(connection = %connection_id, "WebSocket connection from {}", addr);

    let (outbox, mut rx) = Outbox::channel();
    let (ctrl_tx, mut ctrl_rx) = mpsc::unbounded_channel::<Message>();

    let mut ping_interval = tokio::time::interval(keep_alive.ping_interval);
    let mut waiting_for_pong = false;
    let mut pong_deadline: Option<tokio::time::Instant> = None;

    // sole owner of the sink: every outbound frame for this connection goes through here
    let mut send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(msg) = rx.recv() => {
                    let ws_msg = Message::Text(msg.into_inner());
                    if let Err(e) = ws_tx.send(ws_msg).await {
                        warn!("WebSocket write failed: {}", e);
                        break;
                    }
                }
                Some(ctrl_msg) = ctrl_rx.recv() => {
                    if let Err(e) = ws_tx.send(ctrl_msg).await {
                        warn!("WebSocket write failed: {}", e);
                        break;
                    }
                }
                else => break,
            }
        }
    });

    loop {
        let pong_timeout = async {
            match pong_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = ping_interval.tick() => {
                if waiting_for_pong {
                    warn!("No Pong received, disconnecting {}", addr);
                    break;
                }
                if ctrl_tx.send(Message::Ping(Bytes::new())).is_err() {
                    break;
                }
                waiting_for_pong = true;
                pong_deadline = Some(tokio::time::Instant::now() + keep_alive.pong_timeout);
                debug!("Ping sent to {}", addr);
            }

            _ = pong_timeout => {
                warn!("Pong timeout, disconnecting {}", addr);
                break;
            }

            _ = &mut send_task => {
                warn!(connection = %connection_id, "Transport lost, disconnecting {}", addr);
                break;
            }

            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                };

                match msg {
                    Message::Text(text) => {
                        dispatcher.dispatch(&connection_id, text.as_str(), &outbox).await;
                    }
                    Message::Binary(_) => {
                        outbox.send_error("Invalid message: binary frames are not supported");
                    }
                    Message::Pong(_) => {
                        waiting_for_pong = false;
                        pong_deadline = None;
                        debug!("Pong received from {}", addr);
                    }
                    Message::Close(_) => {
                        info!("Close received from {}", addr);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    dispatcher.disconnect(&connection_id).await;

    send_task.abort();
    info!(connection = %connection_id, "WebSocket disconnected: {}", addr);

    Ok(())
}
