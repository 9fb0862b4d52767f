#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff as _;
use futures::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, sleep, timeout};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

use super::config::Config;
use super::dispatch::Dispatcher;
use super::error::{AuthError, TransportError};
use super::events::{AuthFailure, Event};
use super::handshake::{HandshakeAuthenticator, HandshakeReply, Ticket, authenticate_frame, parse_reply};
use crate::Result;
use crate::error::{Error, Kind};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const PING: &str = "PING";
const PONG: &str = "PONG";

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected; [`ConnectionManager::open`] starts a connection
    Disconnected,
    /// Establishing the transport
    Connecting,
    /// Exchanging and presenting the ticket
    Authenticating,
    /// Authenticated; notifications are flowing
    Connected {
        /// When the connection was established
        since: Instant,
    },
    /// Waiting out the backoff after a failure
    Reconnecting {
        /// Current reconnection attempt number
        attempt: u32,
    },
    /// Terminal. Reached through [`ConnectionManager::close`] or a fatal authentication failure
    Closed,
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    #[must_use]
    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }

    fn lifecycle_event(self) -> Option<Event> {
        match self {
            Self::Connecting => Some(Event::Connecting),
            Self::Authenticating => None,
            Self::Connected { .. } => Some(Event::Connected),
            Self::Reconnecting { attempt } => Some(Event::Reconnecting { attempt }),
            Self::Disconnected | Self::Closed => Some(Event::Disconnected),
        }
    }
}

/// Work for the dispatch task, in arrival order.
enum Inbound {
    Frame(String),
    Lifecycle(Event),
    Close,
}

/// How a connection attempt or an established session ended.
enum SessionEnd {
    /// Reconnect with backoff
    Retry(Error),
    /// Close for good
    Fatal(AuthError),
    /// The manager was closed concurrently
    Cancelled,
}

impl From<TransportError> for SessionEnd {
    fn from(e: TransportError) -> Self {
        Self::Retry(e.into())
    }
}

impl From<AuthError> for SessionEnd {
    fn from(e: AuthError) -> Self {
        if e.is_fatal() {
            Self::Fatal(e)
        } else {
            Self::Retry(e.into())
        }
    }
}

struct Shared {
    endpoint: String,
    config: Config,
    authenticator: HandshakeAuthenticator,
    runtime: Handle,
    /// All state transitions go through `send_if_modified` on this sender
    state_tx: watch::Sender<ConnectionState>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    retry_count: AtomicU32,
    last_error: RwLock<Option<Arc<Error>>>,
    cancel: CancellationToken,
}

/// Owns the notification transport: connect, authenticate, heartbeat, reconnect, close.
///
/// Frames and lifecycle events are handed to a single dispatch task over one queue, so
/// subscribers observe them in arrival order. The read loop, the heartbeat timer and the
/// reconnect timer run on their own tasks and never decode or publish anything themselves.
///
/// Dropping the manager closes it.
///
/// # Example
///
/// ```ignore
/// let manager = ConnectionManager::new(endpoint, Config::default(), authenticator, dispatcher)?;
/// manager.open()?;
///
/// let mut state = manager.state_receiver();
/// while state.changed().await.is_ok() {
///     println!("{:?}", *state.borrow());
/// }
/// ```
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// Create a connection manager and start its dispatch task. Does not connect.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        endpoint: String,
        config: Config,
        authenticator: HandshakeAuthenticator,
        dispatcher: Dispatcher,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| Error::with_source(Kind::Internal, e))?;
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        runtime.spawn(Self::dispatch_loop(inbound_rx, dispatcher));

        Ok(Self {
            shared: Arc::new(Shared {
                endpoint,
                config,
                authenticator,
                runtime,
                state_tx,
                inbound_tx,
                retry_count: AtomicU32::new(0),
                last_error: RwLock::new(None),
                cancel: CancellationToken::new(),
            }),
        })
    }

    /// Start connecting. A no-op while a connection is already active or being retried.
    ///
    /// Fails once the manager is [`ConnectionState::Closed`].
    pub fn open(&self) -> Result<()> {
        let shared = &self.shared;
        let mut closed = false;

        let started = shared.state_tx.send_if_modified(|state| match *state {
            ConnectionState::Closed => {
                closed = true;
                false
            }
            ConnectionState::Disconnected => {
                *state = ConnectionState::Connecting;
                shared.enqueue(Inbound::Lifecycle(Event::Connecting));
                true
            }
            _ => false,
        });

        if closed {
            return Err(Error::validation("connection manager is closed"));
        }

        if started {
            #[cfg(feature = "tracing")]
            tracing::debug!(endpoint = %shared.endpoint, "opening notification connection");

            shared.retry_count.store(0, Ordering::Relaxed);
            shared
                .runtime
                .spawn(Self::connection_loop(Arc::clone(shared)));
        }

        Ok(())
    }

    /// Transition to [`ConnectionState::Closed`] and release the transport. Idempotent.
    ///
    /// Pending heartbeat and reconnect timers are cancelled immediately. Frames that were
    /// already received are still dispatched, followed by a final `disconnected` event.
    pub fn close(&self) {
        self.shared.close_with(None);
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Failed attempts since the last successful connection.
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.shared.retry_count.load(Ordering::Relaxed)
    }

    /// The error that ended the most recent session or attempt.
    #[must_use]
    pub fn last_error(&self) -> Option<Arc<Error>> {
        self.shared
            .last_error
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Main connection loop with automatic reconnection.
    async fn connection_loop(shared: Arc<Shared>) {
        let mut backoff: ExponentialBackoff = shared.config.reconnect.clone().into();

        loop {
            // The session sees the cancellation first so it can close the socket cleanly.
            let end = tokio::select! {
                biased;
                end = shared.run_session(&mut backoff) => end,
                () = shared.cancel.cancelled() => return,
            };

            let error = match end {
                SessionEnd::Cancelled => return,
                SessionEnd::Fatal(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!(error = %e, "notification authentication failed");

                    let failure = Event::AuthError(AuthFailure {
                        kind: e.kind(),
                        reason: e.reason().to_owned(),
                    });
                    shared.record_error(e.into());
                    shared.close_with(Some(failure));
                    return;
                }
                SessionEnd::Retry(e) => e,
            };

            #[cfg(feature = "tracing")]
            tracing::warn!(error = %error, "notification connection lost");
            shared.record_error(error);

            let attempt = shared.retry_count.fetch_add(1, Ordering::Relaxed).saturating_add(1);

            // Check if we should stop reconnecting
            if let Some(max) = shared.config.reconnect.max_attempts
                && attempt > max
            {
                shared.transition(ConnectionState::Disconnected);
                return;
            }

            if !shared.transition(ConnectionState::Reconnecting { attempt }) {
                return;
            }

            let max_delay = shared.config.reconnect.max_backoff;
            let delay = backoff.next_backoff().unwrap_or(max_delay).min(max_delay);

            #[cfg(feature = "tracing")]
            tracing::debug!(attempt, ?delay, "reconnecting");

            tokio::select! {
                () = shared.cancel.cancelled() => return,
                () = sleep(delay) => {}
            }

            if !shared.transition(ConnectionState::Connecting) {
                return;
            }
        }
    }

    /// Single consumer of the inbound queue; the only place frames are decoded and events
    /// are published.
    async fn dispatch_loop(mut inbound_rx: mpsc::UnboundedReceiver<Inbound>, dispatcher: Dispatcher) {
        while let Some(item) = inbound_rx.recv().await {
            match item {
                Inbound::Frame(text) => dispatcher.process_frame(&text),
                Inbound::Lifecycle(event) => {
                    dispatcher.publisher().publish(&event);
                }
                Inbound::Close => break,
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shared.close_with(None);
    }
}

impl Shared {
    fn enqueue(&self, item: Inbound) {
        _ = self.inbound_tx.send(item);
    }

    /// Moves to `next` and emits its lifecycle event. Returns `false` once closed.
    fn transition(&self, next: ConnectionState) -> bool {
        let mut moved = false;
        self.state_tx.send_if_modified(|state| {
            if state.is_closed() {
                return false;
            }
            moved = true;
            if *state == next {
                return false;
            }

            *state = next;
            if let Some(event) = next.lifecycle_event() {
                self.enqueue(Inbound::Lifecycle(event));
            }
            true
        });

        moved
    }

    fn close_with(&self, event: Option<Event>) {
        self.state_tx.send_if_modified(|state| {
            if state.is_closed() {
                return false;
            }

            *state = ConnectionState::Closed;
            if let Some(event) = event {
                self.enqueue(Inbound::Lifecycle(event));
            }
            self.enqueue(Inbound::Lifecycle(Event::Disconnected));
            self.enqueue(Inbound::Close);
            true
        });

        self.cancel.cancel();
    }

    fn record_error(&self, error: Error) {
        *self
            .last_error
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(error));
    }

    /// Connects, authenticates and serves one session until it fails.
    async fn run_session(&self, backoff: &mut ExponentialBackoff) -> SessionEnd {
        let stream = match self.establish().await {
            Ok(stream) => stream,
            Err(end) => return end,
        };

        if !self.transition(ConnectionState::Connected {
            since: Instant::now(),
        }) {
            return SessionEnd::Cancelled;
        }
        self.retry_count.store(0, Ordering::Relaxed);
        backoff.reset();

        #[cfg(feature = "tracing")]
        tracing::info!(endpoint = %self.endpoint, "notification connection established");

        self.handle_connection(stream).await
    }

    async fn establish(&self) -> std::result::Result<WsStream, SessionEnd> {
        let (mut stream, _) = connect_async(&self.endpoint)
            .await
            .map_err(TransportError::Connection)?;

        if !self.transition(ConnectionState::Authenticating) {
            return Err(SessionEnd::Cancelled);
        }

        // The ticket is fetched after the transport is up so it is as fresh as possible.
        let ticket = self.authenticator.authenticate().await?;
        self.present_ticket(&mut stream, &ticket).await?;

        Ok(stream)
    }

    async fn present_ticket(
        &self,
        stream: &mut WsStream,
        ticket: &Ticket,
    ) -> std::result::Result<(), SessionEnd> {
        let frame = authenticate_frame(ticket).map_err(|e| SessionEnd::Retry(e.into()))?;
        stream
            .send(Message::Text(frame.into()))
            .await
            .map_err(TransportError::Connection)?;

        let reply = timeout(self.config.handshake_timeout, async {
            while let Some(message) = stream.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        if let Some(reply) = parse_reply(text.as_str()) {
                            return Ok(reply);
                        }
                        // Anything else before the reply is discarded.
                    }
                    Ok(Message::Close(_)) => return Err(TransportError::ConnectionClosed),
                    Ok(_) => {}
                    Err(e) => return Err(TransportError::Connection(e)),
                }
            }
            Err(TransportError::ConnectionClosed)
        })
        .await
        .map_err(|_elapsed| TransportError::HandshakeTimeout)??;

        match reply {
            HandshakeReply::Authenticated => Ok(()),
            HandshakeReply::AuthenticationFailed { reason } => Err(SessionEnd::Fatal(
                AuthError::ticket_rejected(reason.unwrap_or_else(|| "ticket rejected".to_owned())),
            )),
        }
    }

    /// Handle an active connection until it fails or the manager is closed.
    async fn handle_connection(&self, stream: WsStream) -> SessionEnd {
        let (mut write, mut read) = stream.split();

        // Channel to tell the heartbeat loop that the far end is alive
        let (alive_tx, alive_rx) = watch::channel(Instant::now());
        let (ping_tx, mut ping_rx) = mpsc::unbounded_channel();

        let heartbeat = tokio::spawn(heartbeat_loop(
            self.config.clone(),
            ping_tx,
            alive_rx,
            self.cancel.child_token(),
        ));

        let end = loop {
            // Cancellation wins over the heartbeat's channel closing, which it also causes.
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    if let Err(e) = write.close().await {
                        #[cfg(feature = "tracing")]
                        tracing::debug!(error = %e, "close frame not sent");
                        #[cfg(not(feature = "tracing"))]
                        let _ = &e;
                    }
                    break SessionEnd::Cancelled;
                }

                message = read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            alive_tx.send_replace(Instant::now());
                            if text.as_str() != PONG {
                                #[cfg(feature = "tracing")]
                                tracing::trace!(%text, "received notification frame");
                                self.enqueue(Inbound::Frame(text.as_str().to_owned()));
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break TransportError::ConnectionClosed.into(),
                        Some(Ok(_)) => {
                            // Binary and control frames are not notifications, but they are traffic.
                            alive_tx.send_replace(Instant::now());
                        }
                        Some(Err(e)) => break TransportError::Connection(e).into(),
                    }
                }

                // Handle PING requests from heartbeat loop
                ping = ping_rx.recv() => {
                    match ping {
                        Some(()) => {
                            if let Err(e) = write.send(Message::Text(PING.into())).await {
                                break TransportError::Connection(e).into();
                            }
                        }
                        None => break TransportError::HeartbeatTimeout {
                            missed: self.config.max_missed_heartbeats,
                        }
                        .into(),
                    }
                }
            }
        };

        // Cleanup
        heartbeat.abort();

        end
    }
}

/// Sends a PING every interval and gives up after too many silent intervals.
///
/// Returning drops `ping_tx`, which the read loop treats as a heartbeat timeout. Stops as soon
/// as `cancel` fires.
async fn heartbeat_loop(
    config: Config,
    ping_tx: mpsc::UnboundedSender<()>,
    mut alive_rx: watch::Receiver<Instant>,
    cancel: CancellationToken,
) {
    let mut ticker = interval(config.heartbeat_interval);
    // The first tick completes immediately.
    ticker.tick().await;

    let mut missed = 0_u32;
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        match alive_rx.has_changed() {
            Ok(true) => {
                drop(alive_rx.borrow_and_update());
                missed = 0;
            }
            Ok(false) => {
                missed = missed.saturating_add(1);
                if missed >= config.max_missed_heartbeats {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(missed, "heartbeat timeout: no inbound traffic");
                    return;
                }
            }
            // Read loop has terminated
            Err(_) => return,
        }

        if ping_tx.send(()).is_err() {
            return;
        }
    }
}
