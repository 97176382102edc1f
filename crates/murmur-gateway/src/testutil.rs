//! Shared fixtures for the gateway's unit tests.

use std::convert::Infallible;
use std::sync::{Arc, Mutex};

use axum::extract::ws::Message;
use futures_util::{Sink, Stream};
use tokio::sync::{Semaphore, mpsc};
use uuid::Uuid;

use murmur_db::Database;
use murmur_db::models::MessageRow;
use murmur_types::events::GatewayEvent;

use crate::presence::Outbound;
use crate::session::{generate_token, hash_token};

pub fn db() -> Arc<Database> {
    Arc::new(Database::open_in_memory().unwrap())
}

pub fn user(db: &Database, phone: &str) -> Uuid {
    let id = Uuid::new_v4();
    db.create_user(id, phone, "Test", None, murmur_db::time::now()).unwrap();
    id
}

/// Creates a live session for `user` and returns its bearer token.
pub fn session(db: &Database, user: Uuid) -> String {
    let token = generate_token();
    let now = murmur_db::time::now();
    db.create_session(Uuid::new_v4(), user, &hash_token(&token), now + chrono::Duration::days(1), now)
        .unwrap();
    token
}

pub fn message(db: &Database, from: Uuid, to: Uuid, text: &str) -> MessageRow {
    let msg = MessageRow::new_sent(from, to, Some(text.into()), None, None, murmur_db::time::now());
    db.insert_message(&msg).unwrap();
    msg
}

/// Stand-in for a connection's writer: records every pushed event and
/// acknowledges it with `written`.
pub fn acking_writer(
    mut outbox: mpsc::UnboundedReceiver<Outbound>,
    written: bool,
) -> Arc<Mutex<Vec<GatewayEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    tokio::spawn(async move {
        while let Some(outbound) = outbox.recv().await {
            log.lock().unwrap().push(outbound.event.clone());
            outbound.acknowledge(written);
        }
    });
    seen
}

/// The client side of an in-memory WebSocket.
pub struct Peer {
    to_server: Option<mpsc::UnboundedSender<Message>>,
    from_server: mpsc::UnboundedReceiver<Message>,
}

impl Peer {
    pub fn send(&self, msg: Message) {
        if let Some(tx) = &self.to_server {
            tx.send(msg).unwrap();
        }
    }

    pub fn send_text(&self, text: &str) {
        self.send(Message::Text(text.to_owned().into()));
    }

    /// Ends the inbound stream, like a dropped TCP connection.
    pub fn close(&mut self) {
        self.to_server = None;
    }

    pub async fn next_frame(&mut self) -> Option<Message> {
        self.from_server.recv().await
    }

    /// Next server event, skipping heartbeat pings.
    pub async fn next_event(&mut self) -> GatewayEvent {
        loop {
            match self.next_frame().await {
                Some(Message::Text(text)) => return serde_json::from_str(text.as_str()).unwrap(),
                Some(Message::Ping(_)) => continue,
                other => panic!("expected event, got {:?}", other),
            }
        }
    }
}

/// An in-memory transport: the server-side sink and stream plus the peer
/// driving them.
pub fn transport() -> (
    Peer,
    impl Sink<Message, Error = ()> + Unpin + Send + 'static,
    impl Stream<Item = Result<Message, Infallible>> + Unpin + Send + 'static,
) {
    let (peer, sink, stream, _gate) = gated_transport(Semaphore::MAX_PERMITS);
    (peer, sink, stream)
}

/// Like `transport`, but every server write takes a permit from the
/// returned semaphore; with none left the writer stalls, like a peer that
/// stopped reading.
pub fn gated_transport(
    permits: usize,
) -> (
    Peer,
    impl Sink<Message, Error = ()> + Unpin + Send + 'static,
    impl Stream<Item = Result<Message, Infallible>> + Unpin + Send + 'static,
    Arc<Semaphore>,
) {
    let (to_server, inbound) = mpsc::unbounded_channel::<Message>();
    let (outbound, from_server) = mpsc::unbounded_channel::<Message>();
    let gate = Arc::new(Semaphore::new(permits));

    let sink = Box::pin(futures_util::sink::unfold(
        (outbound, gate.clone()),
        |(tx, gate): (mpsc::UnboundedSender<Message>, Arc<Semaphore>), msg: Message| async move {
            gate.acquire().await.map_err(|_| ())?.forget();
            tx.send(msg).map_err(|_| ())?;
            Ok::<_, ()>((tx, gate))
        },
    ));
    let stream = Box::pin(futures_util::stream::unfold(inbound, |mut rx| async move {
        rx.recv().await.map(|msg| (Ok::<_, Infallible>(msg), rx))
    }));

    let peer = Peer {
        to_server: Some(to_server),
        from_server,
    };
    (peer, sink, stream, gate)
}
