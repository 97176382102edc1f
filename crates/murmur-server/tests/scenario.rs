//! Drives a real server over TCP: HTTP through reqwest, the gateway through
//! tokio-tungstenite.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use uuid::Uuid;

use murmur_api::notify::LogNotifier;
use murmur_api::routes;
use murmur_api::state::{AppStateInner, AuthSettings};
use murmur_db::Database;
use murmur_types::api::{MessageResponse, StartVerificationResponse, VerifyCodeResponse};
use murmur_types::events::GatewayEvent;
use murmur_types::models::MessageStatus;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_server() -> SocketAddr {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let settings = AuthSettings {
        expose_codes: true,
        ..AuthSettings::default()
    };
    let app = routes::router(AppStateInner::new(db, settings, Arc::new(LogNotifier)));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await });
    addr
}

struct Client {
    http: reqwest::Client,
    base: String,
    token: String,
    user_id: Uuid,
}

impl Client {
    async fn sign_in(addr: SocketAddr, phone: &str) -> Self {
        let http = reqwest::Client::new();
        let base = format!("http://{}", addr);

        let started: StartVerificationResponse = http
            .post(format!("{}/auth/start", base))
            .json(&json!({ "phone": phone }))
            .send()
            .await
            .unwrap()
            .error_for_status()
            .unwrap()
            .json()
            .await
            .unwrap();

        let verified: VerifyCodeResponse = http
            .post(format!("{}/auth/verify", base))
            .json(&json!({ "phone": phone, "code": started.code.unwrap() }))
            .send()
            .await
            .unwrap()
            .error_for_status()
            .unwrap()
            .json()
            .await
            .unwrap();

        Self {
            http,
            base,
            token: verified.token,
            user_id: verified.user_id,
        }
    }

    async fn send_text(&self, to: Uuid, text: &str) -> Uuid {
        let body: Value = self
            .http
            .post(format!("{}/messages/send", self.base))
            .bearer_auth(&self.token)
            .json(&json!({ "recipient_id": to, "text": text }))
            .send()
            .await
            .unwrap()
            .error_for_status()
            .unwrap()
            .json()
            .await
            .unwrap();
        body["message_id"].as_str().unwrap().parse().unwrap()
    }

    async fn history(&self, peer: Uuid) -> Vec<MessageResponse> {
        self.http
            .get(format!("{}/messages/history", self.base))
            .query(&[("peer_user_id", peer.to_string())])
            .bearer_auth(&self.token)
            .send()
            .await
            .unwrap()
            .error_for_status()
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    async fn mark_read(&self, ids: &[Uuid]) -> usize {
        let body: Value = self
            .http
            .post(format!("{}/messages/read", self.base))
            .bearer_auth(&self.token)
            .json(&json!({ "message_ids": ids }))
            .send()
            .await
            .unwrap()
            .error_for_status()
            .unwrap()
            .json()
            .await
            .unwrap();
        body["updated"].as_u64().unwrap() as usize
    }

    async fn connect(&self, addr: SocketAddr) -> Socket {
        let (mut socket, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
        socket
            .send(Message::text(json!({ "token": self.token }).to_string()))
            .await
            .unwrap();
        assert_eq!(
            next_event(&mut socket).await,
            GatewayEvent::Connected { user_id: self.user_id }
        );
        socket
    }
}

async fn next_event(socket: &mut Socket) -> GatewayEvent {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for event")
            .expect("socket closed")
            .unwrap();
        match frame {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame {:?}", other),
        }
    }
}

#[tokio::test]
async fn offline_then_online_delivery_and_read_receipts() {
    let addr = spawn_server().await;
    let a = Client::sign_in(addr, "+15550000001").await;
    let b = Client::sign_in(addr, "+15550000002").await;

    // B is offline: the message is only recorded.
    let first = a.send_text(b.user_id, "hi").await;
    let history = b.history(a.user_id).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, first);
    assert_eq!(history[0].status, MessageStatus::Sent);
    assert!(history[0].delivered_at.is_none());

    // B comes online and is pushed the next message.
    let mut b_socket = b.connect(addr).await;
    let second = a.send_text(b.user_id, "hi again").await;
    match next_event(&mut b_socket).await {
        GatewayEvent::Message { id, sender_id, text, .. } => {
            assert_eq!(id, second);
            assert_eq!(sender_id, a.user_id);
            assert_eq!(text.as_deref(), Some("hi again"));
        }
        other => panic!("expected message event, got {:?}", other),
    }

    let history = b.history(a.user_id).await;
    assert_eq!(history.iter().map(|m| m.id).collect::<Vec<_>>(), vec![first, second]);
    assert_eq!(history[0].status, MessageStatus::Sent);
    assert_eq!(history[1].status, MessageStatus::Delivered);
    assert!(history[1].delivered_at.unwrap() >= history[1].sent_at);

    // A is online to hear about the reads.
    let mut a_socket = a.connect(addr).await;
    assert_eq!(b.mark_read(&[first, second]).await, 2);

    let mut read = Vec::new();
    for _ in 0..2 {
        match next_event(&mut a_socket).await {
            GatewayEvent::Read { message_id, recipient_id, .. } => {
                assert_eq!(recipient_id, b.user_id);
                read.push(message_id);
            }
            other => panic!("expected read event, got {:?}", other),
        }
    }
    read.sort();
    let mut expected = vec![first, second];
    expected.sort();
    assert_eq!(read, expected);

    let history = a.history(b.user_id).await;
    assert!(history.iter().all(|m| m.status == MessageStatus::Read && m.read_at.is_some()));

    // A second read is a no-op and notifies no one.
    assert_eq!(b.mark_read(&[first, second]).await, 0);
}

#[tokio::test]
async fn gateway_rejects_bad_tokens_with_policy_close() {
    let addr = spawn_server().await;
    let (mut socket, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    socket
        .send(Message::text(json!({ "token": "not-a-session" }).to_string()))
        .await
        .unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .expect("timed out waiting for close")
        .expect("socket closed without a frame")
        .unwrap();
    match frame {
        Message::Close(Some(close)) => assert_eq!(u16::from(close.code), 1008),
        other => panic!("expected close frame, got {:?}", other),
    }
}

#[tokio::test]
async fn newest_connection_receives_pushes() {
    let addr = spawn_server().await;
    let a = Client::sign_in(addr, "+15550000001").await;
    let b = Client::sign_in(addr, "+15550000002").await;

    let mut old = b.connect(addr).await;
    let mut new = b.connect(addr).await;

    let id = a.send_text(b.user_id, "to the newest device").await;
    match next_event(&mut new).await {
        GatewayEvent::Message { id: got, .. } => assert_eq!(got, id),
        other => panic!("expected message event, got {:?}", other),
    }

    // Closing the displaced socket must not evict the live one.
    old.close(None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let id = a.send_text(b.user_id, "still here?").await;
    match next_event(&mut new).await {
        GatewayEvent::Message { id: got, .. } => assert_eq!(got, id),
        other => panic!("expected message event, got {:?}", other),
    }
}
