#![cfg(feature = "realtime")]
#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests, and https://github.com/rust-lang/rust-clippy/issues/13981"
)]
#![allow(
    unused,
    reason = "Deeply nested uses in sub-modules are falsely flagged as being unused"
)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use blox_realtime::client::{Client, Config};
use blox_realtime::realtime::{self, Event, EventTag};
use blox_realtime::rest;
use futures_util::{SinkExt as _, StreamExt as _};
use httpmock::{Mock, MockServer};
use reqwest::StatusCode;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

pub const USER_ID: u64 = 1;
pub const COOKIE: &str = "_|WARNING:-DO-NOT-SHARE-THIS.--test-cookie";
pub const TICKET: &str = "ticket-1";

pub const ALL_TAGS: [EventTag; 17] = [
    EventTag::Connecting,
    EventTag::Connected,
    EventTag::Reconnecting,
    EventTag::Disconnected,
    EventTag::AuthError,
    EventTag::UserTypingStarted,
    EventTag::UserTypingStopped,
    EventTag::MessageReceived,
    EventTag::MessageSentAck,
    EventTag::ConversationAdded,
    EventTag::ConversationRemoved,
    EventTag::MemberAdded,
    EventTag::MemberLeft,
    EventTag::FriendLost,
    EventTag::FriendRequestReceived,
    EventTag::FriendAdded,
    EventTag::UserPresenceChanged,
];

/// Mock notification endpoint.
///
/// Every connection must present a ticket first; afterwards the server forwards whatever
/// [`MockWsServer::send`] broadcasts and answers PING with PONG unless silenced.
pub struct MockWsServer {
    addr: SocketAddr,
    /// Broadcast frames to ALL authenticated clients
    message_tx: broadcast::Sender<String>,
    /// Drops every open connection without a close frame
    drop_tx: broadcast::Sender<()>,
    /// Tickets presented by clients, in order
    ticket_rx: mpsc::UnboundedReceiver<String>,
    reject_tickets: Arc<AtomicBool>,
    answer_pings: Arc<AtomicBool>,
    connections: Arc<AtomicUsize>,
    /// Connections the client ended with a close frame
    clean_closes: Arc<AtomicUsize>,
}

impl MockWsServer {
    /// Start a mock server on a random port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (message_tx, _) = broadcast::channel::<String>(100);
        let (drop_tx, _) = broadcast::channel::<()>(4);
        let (ticket_tx, ticket_rx) = mpsc::unbounded_channel::<String>();
        let reject_tickets = Arc::new(AtomicBool::new(false));
        let answer_pings = Arc::new(AtomicBool::new(true));
        let connections = Arc::new(AtomicUsize::new(0));
        let clean_closes = Arc::new(AtomicUsize::new(0));

        let broadcast_tx = message_tx.clone();
        let drop_all = drop_tx.clone();
        let reject = Arc::clone(&reject_tickets);
        let pong = Arc::clone(&answer_pings);
        let count = Arc::clone(&connections);
        let closed = Arc::clone(&clean_closes);

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                let Ok(ws_stream) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                count.fetch_add(1, Ordering::SeqCst);

                let (mut write, mut read) = ws_stream.split();
                let ticket_tx = ticket_tx.clone();
                let mut msg_rx = broadcast_tx.subscribe();
                let mut drop_rx = drop_all.subscribe();
                let reject = Arc::clone(&reject);
                let pong = Arc::clone(&pong);
                let closed = Arc::clone(&closed);

                tokio::spawn(async move {
                    // Handshake
                    let Some(Ok(Message::Text(text))) = read.next().await else {
                        return;
                    };
                    let request: Value = serde_json::from_str(text.as_str()).unwrap();
                    assert_eq!(request["type"], "authenticate");
                    drop(ticket_tx.send(request["ticket"].as_str().unwrap().to_owned()));

                    let reply = if reject.load(Ordering::SeqCst) {
                        json!({ "type": "authentication_failed", "reason": "ticket expired" })
                    } else {
                        json!({ "type": "authenticated" })
                    };
                    if write.send(Message::Text(reply.to_string().into())).await.is_err() {
                        return;
                    }

                    loop {
                        tokio::select! {
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) if text.as_str() == "PING" => {
                                        if pong.load(Ordering::SeqCst)
                                            && write.send(Message::Text("PONG".into())).await.is_err()
                                        {
                                            break;
                                        }
                                    }
                                    Some(Ok(Message::Close(_))) => {
                                        closed.fetch_add(1, Ordering::SeqCst);
                                        break;
                                    }
                                    Some(Ok(_)) => {}
                                    _ => break,
                                }
                            }
                            msg = msg_rx.recv() => {
                                match msg {
                                    Ok(text) => {
                                        if write.send(Message::Text(text.into())).await.is_err() {
                                            break;
                                        }
                                    }
                                    Err(_) => break,
                                }
                            }
                            _ = drop_rx.recv() => break,
                        }
                    }
                });
            }
        });

        Self {
            addr,
            message_tx,
            drop_tx,
            ticket_rx,
            reject_tickets,
            answer_pings,
            connections,
            clean_closes,
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/notifications", self.addr)
    }

    /// Send a frame to all connected clients.
    pub fn send(&self, frame: &str) {
        drop(self.message_tx.send(frame.to_owned()));
    }

    /// Send a `{topic, payload}` notification to all connected clients.
    pub fn notify(&self, topic: &str, payload: Value) {
        self.send(&json!({ "topic": topic, "payload": payload }).to_string());
    }

    pub fn drop_connections(&self) {
        drop(self.drop_tx.send(()));
    }

    pub fn reject_tickets(&self, reject: bool) {
        self.reject_tickets.store(reject, Ordering::SeqCst);
    }

    pub fn answer_pings(&self, answer: bool) {
        self.answer_pings.store(answer, Ordering::SeqCst);
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn clean_close_count(&self) -> usize {
        self.clean_closes.load(Ordering::SeqCst)
    }

    /// Receive the next presented ticket.
    pub async fn recv_ticket(&mut self) -> Option<String> {
        timeout(Duration::from_secs(2), self.ticket_rx.recv())
            .await
            .ok()
            .flatten()
    }
}

pub fn mock_login(server: &MockServer) -> Mock<'_> {
    server.mock(|when, then| {
        when.method(httpmock::Method::GET)
            .path("/users/v1/users/authenticated")
            .header("cookie", format!(".ROBLOSECURITY={COOKIE}"));
        then.status(StatusCode::OK).json_body(json!({
            "id": USER_ID,
            "name": "alice",
            "displayName": "Alice"
        }));
    })
}

pub fn mock_negotiate(server: &MockServer) -> Mock<'_> {
    server.mock(|when, then| {
        when.method(httpmock::Method::POST)
            .path("/realtime/notifications/negotiate");
        then.status(StatusCode::OK).json_body(json!({
            "Url": "/notifications",
            "ConnectionToken": TICKET,
            "ConnectionId": "7f1c",
            "ProtocolVersion": "1.5"
        }));
    })
}

/// Realtime settings that keep tests fast.
#[must_use]
pub fn fast_config() -> realtime::Config {
    realtime::Config::default()
        .with_heartbeat(Duration::from_millis(100), 3)
        .with_handshake_timeout(Duration::from_secs(2))
        .with_reconnect(
            realtime::ReconnectConfig::default()
                .with_backoff(Duration::from_millis(20), Duration::from_millis(100)),
        )
}

pub fn client(server: &MockServer, ws: &MockWsServer, realtime: realtime::Config) -> Client {
    let config = Config::builder()
        .rest(rest::Config::builder().base_url(server.base_url()).build())
        .realtime(realtime)
        .notifications_endpoint(ws.ws_url())
        .build();

    Client::new(config).unwrap()
}

pub async fn logged_in_client(
    server: &MockServer,
    ws: &MockWsServer,
    realtime: realtime::Config,
) -> anyhow::Result<Client> {
    let login = mock_login(server);

    let client = client(server, ws, realtime);
    client.login(COOKIE).await?;

    login.assert();
    Ok(client)
}

/// Records every event the client publishes.
pub fn record(client: &Client) -> mpsc::UnboundedReceiver<Event> {
    let (tx, rx) = mpsc::unbounded_channel();
    for tag in ALL_TAGS {
        let tx = tx.clone();
        client.subscribe(tag, move |event| {
            drop(tx.send(event.clone()));
            Ok(())
        });
    }
    rx
}

pub async fn next_event(events: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event stream closed")
}

/// Skips events until one tagged `tag` arrives.
pub async fn wait_for(events: &mut mpsc::UnboundedReceiver<Event>, tag: EventTag) -> Event {
    loop {
        let event = next_event(events).await;
        if event.tag() == tag {
            return event;
        }
    }
}

/// Asserts that nothing is published for a while.
pub async fn assert_quiet(events: &mut mpsc::UnboundedReceiver<Event>, window: Duration) {
    if let Ok(Some(event)) = timeout(window, events.recv()).await {
        panic!("unexpected event {event:?}");
    }
}
