use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use murmur_db::Database;
use murmur_types::events::{GatewayEvent, IdentifyFrame};

use crate::presence::{ConnectionHandle, PresenceRegistry};
use crate::session::{self, AuthError};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const MAX_MISSED_PONGS: u8 = 2;

/// How long a fresh connection may stay silent before identifying.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("peer closed before identifying")]
    ClosedBeforeIdentify,
    #[error("no identify frame within {0:?}")]
    IdentifyTimeout(Duration),
    #[error("malformed identify frame: {0}")]
    MalformedIdentify(String),
    #[error("identify frame carried no token")]
    MissingToken,
    #[error(transparent)]
    Unauthorized(#[from] AuthError),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("heartbeat timeout (missed {0} pongs)")]
    HeartbeatTimeout(u8),
}

/// Entry point for an upgraded WebSocket.
pub async fn handle_connection(socket: WebSocket, presence: PresenceRegistry, db: Arc<Database>) {
    let (sender, receiver) = socket.split();

    match serve(sender, receiver, presence, db).await {
        Ok(user_id) => info!("{} disconnected from gateway", user_id),
        Err(e) => warn!("Gateway connection closed: {}", e),
    }
}

/// Drive one connection through `Connecting → Authenticated → Closed`.
///
/// The first data frame must be `{"token": "..."}`; there is exactly one
/// attempt. Once authenticated the connection holds its user's presence slot
/// until this future completes or is dropped, then releases it.
/// Returns the user id on a clean close.
pub async fn serve<Tx, Rx, E>(
    mut sender: Tx,
    mut receiver: Rx,
    presence: PresenceRegistry,
    db: Arc<Database>,
) -> Result<Uuid, ConnectionError>
where
    Tx: Sink<Message> + Unpin,
    Rx: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    // Connecting
    let user_id = match identify(&mut receiver, &db).await {
        Ok(user_id) => user_id,
        Err(e) => {
            let frame = CloseFrame {
                code: close_code::POLICY,
                reason: e.to_string().into(),
            };
            let _ = sender.send(Message::Close(Some(frame))).await;
            return Err(e);
        }
    };

    // Authenticated
    let (handle, mut outbox) = ConnectionHandle::new(user_id);
    let _registration = Registration::new(presence, handle);
    info!("{} connected to gateway", user_id);

    send_event(&mut sender, &GatewayEvent::Connected { user_id }).await?;

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut pong_received = true;
    let mut missed_heartbeats: u8 = 0;

    loop {
        tokio::select! {
            outbound = outbox.recv() => {
                // The registration keeps a sender alive, so the outbox only
                // closes once this function is already unwinding.
                let Some(outbound) = outbound else {
                    return Ok(user_id);
                };
                if outbound.is_abandoned() {
                    debug!("{} dropping push abandoned by its sender", user_id);
                    continue;
                }
                let written = send_event(&mut sender, &outbound.event).await;
                outbound.acknowledge(written.is_ok());
                written?;
            }
            frame = receiver.next() => {
                match frame {
                    None | Some(Ok(Message::Close(_))) => return Ok(user_id),
                    Some(Err(e)) => return Err(ConnectionError::Transport(e.to_string())),
                    Some(Ok(Message::Pong(_))) => pong_received = true,
                    // Inbound traffic is keep-alive only; nothing to process.
                    Some(Ok(_)) => {}
                }
            }
            _ = heartbeat.tick() => {
                if std::mem::replace(&mut pong_received, false) {
                    missed_heartbeats = 0;
                } else {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= MAX_MISSED_PONGS {
                        return Err(ConnectionError::HeartbeatTimeout(missed_heartbeats));
                    }
                }
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    return Err(ConnectionError::Transport("ping write failed".into()));
                }
            }
        }
    }
}

/// Holds a user's presence slot for the lifetime of a connection.
///
/// Deregistration lives in `Drop` so it runs on every exit path, including
/// task cancellation.
struct Registration {
    presence: PresenceRegistry,
    handle: ConnectionHandle,
}

impl Registration {
    fn new(presence: PresenceRegistry, handle: ConnectionHandle) -> Self {
        presence.register(handle.clone());
        Self { presence, handle }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if self.presence.deregister(&self.handle) {
            debug!("{} went offline", self.handle.user_id());
        } else {
            debug!(
                "{} connection {} was already displaced",
                self.handle.user_id(),
                self.handle.conn_id()
            );
        }
    }
}

async fn identify<Rx, E>(receiver: &mut Rx, db: &Arc<Database>) -> Result<Uuid, ConnectionError>
where
    Rx: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let payload = tokio::time::timeout(IDENTIFY_TIMEOUT, first_payload(receiver))
        .await
        .map_err(|_| ConnectionError::IdentifyTimeout(IDENTIFY_TIMEOUT))??;

    let frame: IdentifyFrame = serde_json::from_str(&payload)
        .map_err(|e| ConnectionError::MalformedIdentify(e.to_string()))?;
    let token = frame
        .token
        .filter(|t| !t.is_empty())
        .ok_or(ConnectionError::MissingToken)?;

    Ok(session::authenticate(db, &token).await?)
}

/// The first data frame, skipping control frames.
async fn first_payload<Rx, E>(receiver: &mut Rx) -> Result<String, ConnectionError>
where
    Rx: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    while let Some(frame) = receiver.next().await {
        match frame.map_err(|e| ConnectionError::Transport(e.to_string()))? {
            Message::Text(text) => return Ok(text.as_str().to_owned()),
            Message::Binary(data) => {
                return String::from_utf8(data.to_vec())
                    .map_err(|e| ConnectionError::MalformedIdentify(e.to_string()));
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => break,
        }
    }
    Err(ConnectionError::ClosedBeforeIdentify)
}

async fn send_event<Tx>(sender: &mut Tx, event: &GatewayEvent) -> Result<(), ConnectionError>
where
    Tx: Sink<Message> + Unpin,
{
    let text = serde_json::to_string(event)
        .map_err(|e| ConnectionError::Transport(format!("encode failed: {}", e)))?;
    sender
        .send(Message::Text(text.into()))
        .await
        .map_err(|_| ConnectionError::Transport("write failed".into()))
}
