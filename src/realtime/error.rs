#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;

use super::events::EventTag;
use crate::error::{Error, Kind};

/// Boxed error returned by event subscribers.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Notification transport failures. All of them lead to a reconnect.
#[non_exhaustive]
#[derive(Debug)]
pub enum TransportError {
    /// Error connecting to or communicating with the notification endpoint
    Connection(tokio_tungstenite::tungstenite::Error),
    /// The far end closed the connection
    ConnectionClosed,
    /// No reply to the ticket presentation within the handshake timeout
    HandshakeTimeout,
    /// No inbound traffic for the configured number of heartbeat intervals
    HeartbeatTimeout {
        /// Consecutive intervals without a liveness signal
        missed: u32,
    },
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "notification connection error: {e}"),
            Self::ConnectionClosed => write!(f, "notification connection closed"),
            Self::HandshakeTimeout => write!(f, "notification handshake timed out"),
            Self::HeartbeatTimeout { missed } => {
                write!(f, "notification connection missed {missed} heartbeats")
            }
        }
    }
}

impl StdError for TransportError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Connection(e) => Some(e),
            _ => None,
        }
    }
}

/// Why a handshake failed.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    /// The session has no credential
    MissingCredential,
    /// The ticket exchange refused the credential (401/403)
    InvalidCredential,
    /// The far end refused the ticket, or the exchange returned no usable ticket
    TicketRejected,
    /// The exchange failed for a reason unrelated to the credential
    Transient,
}

/// Handshake failure. Every kind except [`AuthErrorKind::Transient`] is fatal.
#[derive(Debug)]
pub struct AuthError {
    kind: AuthErrorKind,
    reason: String,
    source: Option<Error>,
}

impl AuthError {
    pub(crate) fn missing_credential() -> Self {
        Self {
            kind: AuthErrorKind::MissingCredential,
            reason: "no session credential available".to_owned(),
            source: None,
        }
    }

    pub(crate) fn ticket_rejected<S: Into<String>>(reason: S) -> Self {
        Self {
            kind: AuthErrorKind::TicketRejected,
            reason: reason.into(),
            source: None,
        }
    }

    /// Classifies a failed ticket exchange call.
    pub(crate) fn from_exchange(error: Error) -> Self {
        let kind = if error.is_unauthorized() {
            AuthErrorKind::InvalidCredential
        } else {
            AuthErrorKind::Transient
        };

        Self {
            kind,
            reason: "ticket exchange failed".to_owned(),
            source: Some(error),
        }
    }

    #[must_use]
    pub fn kind(&self) -> AuthErrorKind {
        self.kind
    }

    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Whether retrying with the same credential cannot succeed.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.kind != AuthErrorKind::Transient
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "authentication failed ({:?}): {}", self.kind, self.reason)
    }
}

impl StdError for AuthError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source.as_ref().map(|e| e as &(dyn StdError + 'static))
    }
}

/// A frame that could not be turned into a typed notification.
#[non_exhaustive]
#[derive(Debug)]
pub enum DecodeError {
    /// The frame is not valid JSON
    InvalidJson(serde_json::Error),
    /// The frame is JSON but not an object
    NotAnObject,
    /// The frame has no string `topic` field
    MissingTopic,
    /// The payload does not match the topic's schema
    Schema {
        topic: String,
        source: serde_json::Error,
    },
    /// The payload matches the schema but carries inconsistent values
    Invalid { topic: String, reason: String },
    /// The topic requires a sequence payload
    NotASequence { topic: String },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidJson(e) => write!(f, "frame is not valid JSON: {e}"),
            Self::NotAnObject => write!(f, "frame is not a JSON object"),
            Self::MissingTopic => write!(f, "frame has no topic"),
            Self::Schema { topic, source } => write!(f, "invalid {topic} payload: {source}"),
            Self::Invalid { topic, reason } => write!(f, "invalid {topic} payload: {reason}"),
            Self::NotASequence { topic } => write!(f, "{topic} payload is not a sequence"),
        }
    }
}

impl StdError for DecodeError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::InvalidJson(e) | Self::Schema { source: e, .. } => Some(e),
            _ => None,
        }
    }
}

/// A handler needed client state that is not available, e.g. the authenticated user.
#[non_exhaustive]
#[derive(Debug)]
pub struct StaleEventError {
    pub topic: String,
    pub reason: &'static str,
}

impl fmt::Display for StaleEventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dropped stale {} notification: {}", self.topic, self.reason)
    }
}

impl StdError for StaleEventError {}

/// A subscriber callback failed while handling an event.
#[non_exhaustive]
#[derive(Debug)]
pub enum SubscriberError {
    /// The callback returned an error
    Failed { tag: EventTag, source: BoxError },
    /// The callback panicked
    Panicked { tag: EventTag, message: String },
}

impl fmt::Display for SubscriberError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { tag, source } => write!(f, "{tag} subscriber failed: {source}"),
            Self::Panicked { tag, message } => write!(f, "{tag} subscriber panicked: {message}"),
        }
    }
}

impl StdError for SubscriberError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Failed { source, .. } => Some(source.as_ref()),
            Self::Panicked { .. } => None,
        }
    }
}

/// Why a notification was dropped on the dispatch path.
#[non_exhaustive]
#[derive(Debug)]
pub enum DispatchError {
    Decode(DecodeError),
    Stale(StaleEventError),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(e) => e.fmt(f),
            Self::Stale(e) => e.fmt(f),
        }
    }
}

impl StdError for DispatchError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Decode(e) => Some(e),
            Self::Stale(e) => Some(e),
        }
    }
}

impl From<DecodeError> for DispatchError {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e)
    }
}

impl From<StaleEventError> for DispatchError {
    fn from(e: StaleEventError) -> Self {
        Self::Stale(e)
    }
}

// Integration with main Error type
impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Error::with_source(Kind::WebSocket, e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::with_source(Kind::WebSocket, TransportError::Connection(e))
    }
}

impl From<AuthError> for Error {
    fn from(e: AuthError) -> Self {
        Error::with_source(Kind::Authentication, e)
    }
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Error::with_source(Kind::Decode, e)
    }
}

impl From<StaleEventError> for Error {
    fn from(e: StaleEventError) -> Self {
        Error::with_source(Kind::StaleEvent, e)
    }
}

impl From<DispatchError> for Error {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::Decode(e) => e.into(),
            DispatchError::Stale(e) => e.into(),
        }
    }
}
