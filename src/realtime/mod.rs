#![expect(
    clippy::module_name_repetitions,
    reason = "Re-exported names intentionally match their modules for API clarity"
)]

//! Real-time notification channel.
//!
//! **Feature flag:** `realtime` (enabled by default)
//!
//! A persistent, authenticated WebSocket connection to the platform's push endpoint. Every
//! inbound frame flows through one sequential path:
//!
//! ```text
//! transport -> ConnectionManager -> decoder -> Dispatcher -> topic handler -> EventPublisher
//! ```
//!
//! - [`ConnectionManager`]: connect, authenticate, heartbeat, reconnect with backoff, close
//! - [`HandshakeAuthenticator`]: exchanges the session credential for a connection [`Ticket`]
//! - [`decoder`]: splits frames into topic and payload
//! - [`Dispatcher`]: routes payloads to the chat, friendship and presence handlers
//! - [`EventPublisher`]: delivers typed [`Event`]s to subscribers, isolating their failures
//!
//! Most applications use [`crate::Client::subscribe`] and [`crate::Client::connect`] instead of
//! wiring these together by hand.

pub mod config;
pub mod connection;
pub mod decoder;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod handshake;
pub mod publisher;

pub use config::{Config, ReconnectConfig};
pub use connection::{ConnectionManager, ConnectionState};
pub use dispatch::{Dispatcher, Topic};
pub use error::{
    AuthError, AuthErrorKind, BoxError, DecodeError, DispatchError, StaleEventError,
    SubscriberError, TransportError,
};
pub use events::{AuthFailure, ConversationEvent, Event, EventTag, TypingEvent, UserEvent};
pub use handshake::{HandshakeAuthenticator, Ticket};
pub use publisher::{EventPublisher, SubscriptionHandle};
