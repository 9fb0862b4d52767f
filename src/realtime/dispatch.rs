//! Topic dispatch table and topic handlers.
//!
//! Each known topic maps to exactly one handler. A handler validates the payload into the
//! topic's schema, builds zero or more [`Event`]s that reference entities by id, and hands
//! them to the [`EventPublisher`] it is given. Unknown topics and unknown message types are
//! ignored so that new server-side notifications never break the channel.

use std::sync::Arc;

use phf::phf_map;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::decoder::{RawMessage, decode};
use super::error::{DecodeError, DispatchError, StaleEventError};
use super::events::{ConversationEvent, Event, TypingEvent, UserEvent};
use super::publisher::EventPublisher;
use crate::entity::ClientHandle;
use crate::types::{ConversationId, UserId};

/// Notification topics the client understands.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topic {
    Chat,
    Friendship,
    PresenceBulk,
    /// Any topic without a handler
    Ignored(String),
}

static TOPICS: phf::Map<&'static str, Topic> = phf_map! {
    "ChatNotifications" => Topic::Chat,
    "FriendshipNotifications" => Topic::Friendship,
    "PresenceBulkNotifications" => Topic::PresenceBulk,
};

type Handler = fn(&HandlerContext, Value, &EventPublisher) -> Result<(), DispatchError>;

impl Topic {
    /// Exact, case-sensitive lookup. Never fails.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        TOPICS
            .get(name)
            .cloned()
            .unwrap_or_else(|| Topic::Ignored(name.to_owned()))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Topic::Chat => "ChatNotifications",
            Topic::Friendship => "FriendshipNotifications",
            Topic::PresenceBulk => "PresenceBulkNotifications",
            Topic::Ignored(name) => name,
        }
    }

    fn handler(&self) -> Option<Handler> {
        match self {
            Topic::Chat => Some(handle_chat),
            Topic::Friendship => Some(handle_friendship),
            Topic::PresenceBulk => Some(handle_presence_bulk),
            Topic::Ignored(_) => None,
        }
    }
}

impl From<&str> for Topic {
    fn from(name: &str) -> Self {
        Self::from_name(name)
    }
}

/// What a handler may read besides the payload.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub client: ClientHandle,
}

/// Routes decoded frames to their topic handler.
pub struct Dispatcher {
    context: HandlerContext,
    publisher: Arc<EventPublisher>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(client: ClientHandle, publisher: Arc<EventPublisher>) -> Self {
        Self {
            context: HandlerContext { client },
            publisher,
        }
    }

    #[must_use]
    pub fn publisher(&self) -> &Arc<EventPublisher> {
        &self.publisher
    }

    /// Runs the handler for `topic`, if there is one.
    pub fn dispatch(&self, topic: &Topic, payload: Value) -> Result<(), DispatchError> {
        let Some(handler) = topic.handler() else {
            #[cfg(feature = "tracing")]
            tracing::trace!(topic = topic.name(), "ignoring notification without handler");
            return Ok(());
        };

        handler(&self.context, payload, &self.publisher)
    }

    /// Decodes and dispatches one text frame. Failures are logged and the frame is dropped.
    pub fn process_frame(&self, frame: &str) {
        let result = decode(frame)
            .map_err(DispatchError::from)
            .and_then(|RawMessage { topic, payload }| {
                self.dispatch(&Topic::from_name(&topic), payload)
            });

        if let Err(e) = result {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %e, %frame, "dropped notification");
            #[cfg(not(feature = "tracing"))]
            let _ = &e;
        }
    }
}

/// Validates `payload` against the schema for `topic`.
fn parse<T: DeserializeOwned>(topic: &Topic, payload: Value) -> Result<T, DecodeError> {
    serde_json::from_value(payload).map_err(|source| DecodeError::Schema {
        topic: topic.name().to_owned(),
        source,
    })
}

/// Message types are matched case-insensitively.
fn normalize_type(mut payload: Value) -> Value {
    if let Some(Value::String(kind)) = payload.get_mut("Type") {
        *kind = kind.to_ascii_lowercase();
    }
    payload
}

#[derive(Debug, Deserialize)]
#[serde(tag = "Type", rename_all = "lowercase")]
enum ChatNotification {
    #[serde(rename_all = "PascalCase")]
    ParticipantTyping {
        conversation_id: ConversationId,
        user_id: UserId,
        is_typing: bool,
    },
    #[serde(rename_all = "PascalCase")]
    NewMessage { conversation_id: ConversationId },
    #[serde(rename_all = "PascalCase")]
    NewMessageBySelf { conversation_id: ConversationId },
    #[serde(rename_all = "PascalCase")]
    NewConversation { conversation_id: ConversationId },
    #[serde(rename_all = "PascalCase")]
    ConversationRemoved { conversation_id: ConversationId },
    #[serde(rename_all = "PascalCase")]
    ParticipantAdded { conversation_id: ConversationId },
    #[serde(rename_all = "PascalCase")]
    ParticipantLeft { conversation_id: ConversationId },
    #[serde(other)]
    Other,
}

fn handle_chat(
    context: &HandlerContext,
    payload: Value,
    publisher: &EventPublisher,
) -> Result<(), DispatchError> {
    let client = &context.client;
    let conversation = |id| ConversationEvent::new(client.conversation(id));

    let event = match parse(&Topic::Chat, normalize_type(payload))? {
        ChatNotification::ParticipantTyping {
            conversation_id,
            user_id,
            is_typing,
        } => {
            let typing = TypingEvent::new(client.user(user_id), client.conversation(conversation_id));
            if is_typing {
                Event::UserTypingStarted(typing)
            } else {
                Event::UserTypingStopped(typing)
            }
        }
        ChatNotification::NewMessage { conversation_id } => {
            Event::MessageReceived(conversation(conversation_id))
        }
        ChatNotification::NewMessageBySelf { conversation_id } => {
            Event::MessageSentAck(conversation(conversation_id))
        }
        ChatNotification::NewConversation { conversation_id } => {
            Event::ConversationAdded(conversation(conversation_id))
        }
        ChatNotification::ConversationRemoved { conversation_id } => {
            Event::ConversationRemoved(conversation(conversation_id))
        }
        ChatNotification::ParticipantAdded { conversation_id } => {
            Event::MemberAdded(conversation(conversation_id))
        }
        ChatNotification::ParticipantLeft { conversation_id } => {
            Event::MemberLeft(conversation(conversation_id))
        }
        ChatNotification::Other => return Ok(()),
    };

    publisher.publish(&event);
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(tag = "Type", rename_all = "lowercase")]
enum FriendshipNotification {
    #[serde(rename_all = "PascalCase")]
    FriendshipDestroyed { user_id1: UserId, user_id2: UserId },
    #[serde(rename_all = "PascalCase")]
    FriendshipRequested { user_id1: UserId },
    #[serde(rename_all = "PascalCase")]
    FriendshipCreated { user_id1: UserId },
    #[serde(other)]
    Other,
}

fn handle_friendship(
    context: &HandlerContext,
    payload: Value,
    publisher: &EventPublisher,
) -> Result<(), DispatchError> {
    let client = &context.client;

    let event = match parse(&Topic::Friendship, normalize_type(payload))? {
        FriendshipNotification::FriendshipDestroyed { user_id1, user_id2 } => {
            let me = client.authenticated_user_id().ok_or_else(|| StaleEventError {
                topic: Topic::Friendship.name().to_owned(),
                reason: "friendship destroyed while not authenticated",
            })?;

            let other = match (user_id1 == me, user_id2 == me) {
                (true, true) => {
                    return Err(DecodeError::Invalid {
                        topic: Topic::Friendship.name().to_owned(),
                        reason: format!("both sides of the friendship are user {me}"),
                    }
                    .into());
                }
                (true, false) => user_id2,
                (false, _) => user_id1,
            };

            Event::FriendLost(UserEvent::new(client.user(other)))
        }
        FriendshipNotification::FriendshipRequested { user_id1 } => {
            Event::FriendRequestReceived(UserEvent::new(client.user(user_id1)))
        }
        FriendshipNotification::FriendshipCreated { user_id1 } => {
            Event::FriendAdded(UserEvent::new(client.user(user_id1)))
        }
        FriendshipNotification::Other => return Ok(()),
    };

    publisher.publish(&event);
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PresenceUpdate {
    user_id: UserId,
}

fn handle_presence_bulk(
    context: &HandlerContext,
    payload: Value,
    publisher: &EventPublisher,
) -> Result<(), DispatchError> {
    if !payload.is_array() {
        return Err(DecodeError::NotASequence {
            topic: Topic::PresenceBulk.name().to_owned(),
        }
        .into());
    }

    // Validate every element before publishing anything.
    let updates: Vec<PresenceUpdate> = parse(&Topic::PresenceBulk, payload)?;

    for update in updates {
        publisher.publish(&Event::UserPresenceChanged(UserEvent::new(
            context.client.user(update.user_id),
        )));
    }

    Ok(())
}
