//! Domain events delivered to subscribers.
//!
//! Events reference users and conversations by [`crate::entity::EntityRef`] only; nothing is
//! fetched on the dispatch path.

use strum_macros::Display;

use super::error::AuthErrorKind;
use crate::entity::{ConversationRef, UserRef};

/// Closed set of event tags used to subscribe.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum EventTag {
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
    #[strum(serialize = "authError")]
    AuthError,
    UserTypingStarted,
    UserTypingStopped,
    MessageReceived,
    MessageSentAck,
    ConversationAdded,
    ConversationRemoved,
    MemberAdded,
    MemberLeft,
    FriendLost,
    FriendRequestReceived,
    FriendAdded,
    UserPresenceChanged,
}

/// A user doing something in a conversation.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingEvent {
    pub user: UserRef,
    pub conversation: ConversationRef,
}

/// Something happened to a conversation.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationEvent {
    pub conversation: ConversationRef,
}

/// Something happened involving another user.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEvent {
    pub user: UserRef,
}

/// The handshake failed fatally; the connection is closing.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthFailure {
    pub kind: AuthErrorKind,
    pub reason: String,
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A connection attempt started
    Connecting,
    /// The ticket was accepted; notifications are flowing
    Connected,
    /// The connection was lost; the next attempt is scheduled
    Reconnecting {
        /// Reconnection attempt number, starting at 1
        attempt: u32,
    },
    /// The connection stopped and will not be retried
    Disconnected,
    AuthError(AuthFailure),
    UserTypingStarted(TypingEvent),
    UserTypingStopped(TypingEvent),
    MessageReceived(ConversationEvent),
    /// A message sent by the authenticated user was delivered
    MessageSentAck(ConversationEvent),
    ConversationAdded(ConversationEvent),
    ConversationRemoved(ConversationEvent),
    MemberAdded(ConversationEvent),
    MemberLeft(ConversationEvent),
    /// The authenticated user is no longer friends with `user`
    FriendLost(UserEvent),
    FriendRequestReceived(UserEvent),
    FriendAdded(UserEvent),
    UserPresenceChanged(UserEvent),
}

impl Event {
    #[must_use]
    pub const fn tag(&self) -> EventTag {
        match self {
            Event::Connecting => EventTag::Connecting,
            Event::Connected => EventTag::Connected,
            Event::Reconnecting { .. } => EventTag::Reconnecting,
            Event::Disconnected => EventTag::Disconnected,
            Event::AuthError(_) => EventTag::AuthError,
            Event::UserTypingStarted(_) => EventTag::UserTypingStarted,
            Event::UserTypingStopped(_) => EventTag::UserTypingStopped,
            Event::MessageReceived(_) => EventTag::MessageReceived,
            Event::MessageSentAck(_) => EventTag::MessageSentAck,
            Event::ConversationAdded(_) => EventTag::ConversationAdded,
            Event::ConversationRemoved(_) => EventTag::ConversationRemoved,
            Event::MemberAdded(_) => EventTag::MemberAdded,
            Event::MemberLeft(_) => EventTag::MemberLeft,
            Event::FriendLost(_) => EventTag::FriendLost,
            Event::FriendRequestReceived(_) => EventTag::FriendRequestReceived,
            Event::FriendAdded(_) => EventTag::FriendAdded,
            Event::UserPresenceChanged(_) => EventTag::UserPresenceChanged,
        }
    }

    /// The conversation this event is about, if any.
    #[must_use]
    pub fn conversation(&self) -> Option<&ConversationRef> {
        match self {
            Event::UserTypingStarted(e) | Event::UserTypingStopped(e) => Some(&e.conversation),
            Event::MessageReceived(e)
            | Event::MessageSentAck(e)
            | Event::ConversationAdded(e)
            | Event::ConversationRemoved(e)
            | Event::MemberAdded(e)
            | Event::MemberLeft(e) => Some(&e.conversation),
            _ => None,
        }
    }

    /// The user this event is about, if any.
    #[must_use]
    pub fn user(&self) -> Option<&UserRef> {
        match self {
            Event::UserTypingStarted(e) | Event::UserTypingStopped(e) => Some(&e.user),
            Event::FriendLost(e)
            | Event::FriendRequestReceived(e)
            | Event::FriendAdded(e)
            | Event::UserPresenceChanged(e) => Some(&e.user),
            _ => None,
        }
    }
}

impl TypingEvent {
    #[must_use]
    pub fn new(user: UserRef, conversation: ConversationRef) -> Self {
        Self { user, conversation }
    }
}

impl ConversationEvent {
    #[must_use]
    pub fn new(conversation: ConversationRef) -> Self {
        Self { conversation }
    }
}

impl UserEvent {
    #[must_use]
    pub fn new(user: UserRef) -> Self {
        Self { user }
    }
}
