//! Realtime WebSocket listener
//!
//! Each connection presents a session token at the handshake, either as
//! `?token=` or an `Authorization: Bearer` header. Frames are JSON
//! `{"event": <name>, "data": <payload>}` in both directions.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{WebSocketStream, accept_hdr_async};
use tracing::{debug, error, info, warn};

use holdfast_auth::{AUTHORIZATION_HEADER, bearer_token, query_token};
use holdfast_common::VerifiedActor;
use holdfast_common::error::INVALID_EVENT_PAYLOAD;
use holdfast_core::event::EventError;
use holdfast_core::{ClientEvent, RealtimeBroadcaster, RealtimeClient, ServerEvent};

#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    #[error("failed to bind realtime listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("websocket handshake failed: {0}")]
    Handshake(#[source] tungstenite::Error),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("websocket transport error: {0}")]
    Transport(#[from] tungstenite::Error),
}

type WsSink = futures::stream::SplitSink<WebSocketStream<TcpStream>, Message>;

/// Token presented at the handshake; the header wins over the query string
fn handshake_token(req: &Request) -> Option<String> {
    if let Some(value) = req.headers().get(AUTHORIZATION_HEADER)
        && let Ok(s) = value.to_str()
        && let Some(token) = bearer_token(s.trim())
    {
        return Some(token.to_string());
    }

    req.uri().query().and_then(query_token).map(str::to_string)
}

fn authenticate(token: Option<&str>, secret: &str) -> Result<VerifiedActor, String> {
    let Some(token) = token else {
        return Err("authentication token required".to_string());
    };

    holdfast_auth::service::token::verify_session_token(token, secret).map_err(|e| {
        match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => "token expired".to_string(),
            _ => "invalid token".to_string(),
        }
    })
}

async fn send_event(sink: &mut WsSink, event: &ServerEvent) -> Result<(), RealtimeError> {
    let frame = serde_json::to_string(event)?;
    sink.send(Message::Text(frame)).await?;
    Ok(())
}

pub struct RealtimeServer {
    broadcaster: Arc<RealtimeBroadcaster>,
    jwt_secret: Arc<str>,
}

impl RealtimeServer {
    pub fn new(broadcaster: Arc<RealtimeBroadcaster>, jwt_secret: impl Into<Arc<str>>) -> Self {
        Self {
            broadcaster,
            jwt_secret: jwt_secret.into(),
        }
    }

    pub async fn bind(address: &str, port: u16) -> Result<TcpListener, RealtimeError> {
        let addr = format!("{}:{}", address, port);
        TcpListener::bind(&addr)
            .await
            .map_err(|source| RealtimeError::Bind { addr, source })
    }

    /// Accept connections until shutdown is signalled
    pub fn spawn(self, listener: TcpListener, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(listener, shutdown).await })
    }

    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) {
        match listener.local_addr() {
            Ok(addr) => info!("Realtime server listening on ws://{}", addr),
            Err(e) => warn!(error = %e, "Realtime server listening on unknown address"),
        }

        let server = Arc::new(self);
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => {
                            let server = server.clone();
                            let shutdown = shutdown.resubscribe();
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream, peer_addr, shutdown).await {
                                    match &e {
                                        RealtimeError::Authentication(_) => {
                                            debug!(peer_addr = %peer_addr, error = %e, "Realtime connection refused");
                                        }
                                        _ => warn!(peer_addr = %peer_addr, error = %e, "Realtime connection ended with error"),
                                    }
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept realtime connection");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Realtime server shutting down");
                    break;
                }
            }
        }
    }

    async fn handle_connection(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), RealtimeError> {
        let mut token: Option<String> = None;
        let ws_stream = accept_hdr_async(stream, |req: &Request, resp: Response| {
            token = handshake_token(req);
            Ok::<_, ErrorResponse>(resp)
        })
        .await
        .map_err(RealtimeError::Handshake)?;

        let (mut ws_sender, ws_receiver) = ws_stream.split();

        let actor = match authenticate(token.as_deref(), &self.jwt_secret) {
            Ok(actor) => actor,
            Err(message) => {
                send_event(&mut ws_sender, &ServerEvent::authentication_error(message.clone()))
                    .await?;
                ws_sender.send(Message::Close(None)).await?;
                return Err(RealtimeError::Authentication(message));
            }
        };

        let connection_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = self.broadcaster.outbound_channel();
        self.broadcaster.register(RealtimeClient::new(
            connection_id.clone(),
            actor,
            peer_addr.to_string(),
            tx,
        ));

        let result = self
            .pump(&connection_id, ws_sender, ws_receiver, rx, shutdown)
            .await;

        // Runs however the pump ended
        self.broadcaster.disconnect(&connection_id).await;
        result
    }

    async fn pump(
        &self,
        connection_id: &str,
        mut ws_sender: WsSink,
        mut ws_receiver: futures::stream::SplitStream<WebSocketStream<TcpStream>>,
        mut outbound: tokio::sync::mpsc::Receiver<ServerEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), RealtimeError> {
        loop {
            tokio::select! {
                inbound = ws_receiver.next() => {
                    match inbound {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(reply) = self.dispatch(connection_id, &text).await {
                                send_event(&mut ws_sender, &reply).await?;
                            }
                        }
                        Some(Ok(Message::Binary(bytes))) => {
                            let reply = match std::str::from_utf8(&bytes) {
                                Ok(text) => self.dispatch(connection_id, text).await,
                                Err(_) => Some(invalid_payload("frame is not valid UTF-8")),
                            };
                            if let Some(reply) = reply {
                                send_event(&mut ws_sender, &reply).await?;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            debug!(connection_id = %connection_id, "Realtime client closed the connection");
                            return Ok(());
                        }
                        // Pings are answered by tungstenite on the next write
                        Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                        Some(Err(e)) => return Err(e.into()),
                    }
                }
                event = outbound.recv() => {
                    match event {
                        Some(event) => send_event(&mut ws_sender, &event).await?,
                        None => return Ok(()),
                    }
                }
                _ = shutdown.recv() => {
                    let _ = ws_sender.send(Message::Close(None)).await;
                    return Ok(());
                }
            }
        }
    }

    /// Route one inbound frame; returns a reply for the sender only
    async fn dispatch(&self, connection_id: &str, text: &str) -> Option<ServerEvent> {
        let event = match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => event,
            Err(e) => {
                debug!(connection_id = %connection_id, error = %e, "Rejected realtime frame");
                return Some(invalid_payload(e.to_string()));
            }
        };

        match event {
            ClientEvent::Join(r) => self.broadcaster.join(connection_id, &r.record_id),
            ClientEvent::Leave(r) => self.broadcaster.leave(connection_id, &r.record_id),
            ClientEvent::CursorUpdate(c) => {
                self.broadcaster
                    .cursor_update(connection_id, &c.record_id, c.x, c.y);
            }
            ClientEvent::RenewLockRequest(r) => {
                self.broadcaster
                    .renew_lock_request(connection_id, &r.record_id)
                    .await
            }
            ClientEvent::ReleaseLockRequest(r) => {
                self.broadcaster
                    .release_lock_request(connection_id, &r.record_id)
                    .await
            }
        }
        None
    }
}

fn invalid_payload(message: impl Into<String>) -> ServerEvent {
    ServerEvent::Error(EventError::new(&INVALID_EVENT_PAYLOAD, message, None))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str, authorization: Option<&str>) -> Request {
        let mut builder = Request::builder().uri(uri);
        if let Some(value) = authorization {
            builder = builder.header(AUTHORIZATION_HEADER, value);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn test_handshake_token_sources() {
        let req = request("/?token=abc", None);
        assert_eq!(handshake_token(&req).as_deref(), Some("abc"));

        let req = request("/?token=abc", Some("Bearer xyz"));
        assert_eq!(handshake_token(&req).as_deref(), Some("xyz"));

        let req = request("/", None);
        assert_eq!(handshake_token(&req), None);
    }

    #[test]
    fn test_authenticate_requires_token() {
        assert_eq!(
            authenticate(None, "secret").unwrap_err(),
            "authentication token required"
        );
        assert_eq!(
            authenticate(Some("not-a-jwt"), "secret").unwrap_err(),
            "invalid token"
        );
    }

    #[test]
    fn test_invalid_payload_event() {
        match invalid_payload("bad frame") {
            ServerEvent::Error(e) => {
                assert_eq!(e.code, INVALID_EVENT_PAYLOAD.code);
                assert_eq!(e.message, "bad frame");
                assert!(e.record_id.is_none());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
