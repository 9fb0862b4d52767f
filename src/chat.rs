//! Chat REST operations.
//!
//! A thin layer over [`SessionProvider::call_named`]: every method serializes a request,
//! performs one named call and deserializes the response. Conversations come back as
//! [`ConversationRecord`]s, the same record [`crate::entity::ConversationRef::resolve`] yields.

use std::sync::Arc;

use bon::Builder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::auth::SessionProvider;
use crate::entity::ConversationRecord;
use crate::rest::endpoints;
use crate::serde_helpers::deserialize_with_warnings;
use crate::types::{ConversationId, UserId};

/// Chat feature flags for the authenticated user.
#[non_exhaustive]
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSettings {
    pub chat_enabled: bool,
    #[serde(default)]
    pub is_active_chat_user: bool,
}

/// A message to post with [`ChatManager::send_message`].
#[non_exhaustive]
#[derive(Clone, Debug, Serialize, Builder)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub conversation_id: ConversationId,
    #[builder(into)]
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_experience_invite: Option<bool>,
}

#[non_exhaustive]
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSent {
    /// The message as delivered, after filtering
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub filtered_for_receivers: bool,
    pub message_id: Option<String>,
    pub result_type: String,
    pub status_message: Option<String>,
}

/// Outcome of a conversation mutation.
#[non_exhaustive]
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResult {
    pub conversation_id: Option<ConversationId>,
    pub result_type: Option<String>,
    pub status_message: Option<String>,
    #[serde(default)]
    pub rejected_participants: Vec<serde_json::Value>,
}

#[non_exhaustive]
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationStarted {
    pub conversation: ConversationRecord,
    pub result_type: Option<String>,
    pub status_message: Option<String>,
}

#[non_exhaustive]
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRenamed {
    pub conversation_title: String,
    pub result_type: Option<String>,
    pub status_message: Option<String>,
}

#[derive(Deserialize)]
struct UnreadCount {
    count: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConversationIds<'a> {
    conversation_ids: &'a [ConversationId],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TypingStatus {
    conversation_id: ConversationId,
    is_typing: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MarkSeen<'a> {
    conversations_to_mark_seen: &'a [ConversationId],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Participant {
    #[serde(skip_serializing_if = "Option::is_none")]
    conversation_id: Option<ConversationId>,
    participant_user_id: UserId,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Participants<'a> {
    conversation_id: ConversationId,
    participant_user_ids: &'a [UserId],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Rename<'a> {
    conversation_id: ConversationId,
    new_title: &'a str,
}

/// Chat operations for the session's user.
#[derive(Clone)]
pub struct ChatManager {
    session: Arc<dyn SessionProvider>,
}

impl ChatManager {
    #[must_use]
    pub fn new(session: Arc<dyn SessionProvider>) -> Self {
        Self { session }
    }

    async fn call<Req: Serialize + Sync, Res: DeserializeOwned>(
        &self,
        name: &str,
        request: &Req,
    ) -> Result<Res> {
        let params = serde_json::to_value(request)?;
        let response = self.session.call_named(name, params).await?;
        deserialize_with_warnings(response)
    }

    pub async fn settings(&self) -> Result<ChatSettings> {
        self.call(endpoints::CHAT_SETTINGS, &serde_json::Value::Null)
            .await
    }

    pub async fn conversations(&self, ids: &[ConversationId]) -> Result<Vec<ConversationRecord>> {
        self.call(
            endpoints::CHAT_GET_CONVERSATIONS,
            &ConversationIds {
                conversation_ids: ids,
            },
        )
        .await
    }

    /// A single conversation, or `None` if the API does not return it.
    pub async fn conversation(&self, id: ConversationId) -> Result<Option<ConversationRecord>> {
        let conversations = self.conversations(&[id]).await?;
        Ok(conversations.into_iter().find(|c| c.id == id))
    }

    pub async fn send_message(&self, request: &SendMessageRequest) -> Result<MessageSent> {
        self.call(endpoints::CHAT_SEND_MESSAGE, request).await
    }

    pub async fn update_typing_status(
        &self,
        conversation_id: ConversationId,
        is_typing: bool,
    ) -> Result<ChatResult> {
        self.call(
            endpoints::CHAT_UPDATE_TYPING_STATUS,
            &TypingStatus {
                conversation_id,
                is_typing,
            },
        )
        .await
    }

    pub async fn mark_conversations_seen(&self, ids: &[ConversationId]) -> Result<ChatResult> {
        self.call(
            endpoints::CHAT_MARK_AS_SEEN,
            &MarkSeen {
                conversations_to_mark_seen: ids,
            },
        )
        .await
    }

    pub async fn unread_conversation_count(&self) -> Result<u64> {
        let unread: UnreadCount = self
            .call(
                endpoints::CHAT_UNREAD_CONVERSATION_COUNT,
                &serde_json::Value::Null,
            )
            .await?;
        Ok(unread.count)
    }

    pub async fn start_one_to_one_conversation(&self, user: UserId) -> Result<ConversationStarted> {
        self.call(
            endpoints::CHAT_START_ONE_TO_ONE,
            &Participant {
                conversation_id: None,
                participant_user_id: user,
            },
        )
        .await
    }

    pub async fn add_users_to_conversation(
        &self,
        conversation_id: ConversationId,
        users: &[UserId],
    ) -> Result<ChatResult> {
        self.call(
            endpoints::CHAT_ADD_TO_CONVERSATION,
            &Participants {
                conversation_id,
                participant_user_ids: users,
            },
        )
        .await
    }

    pub async fn remove_user_from_conversation(
        &self,
        conversation_id: ConversationId,
        user: UserId,
    ) -> Result<ChatResult> {
        self.call(
            endpoints::CHAT_REMOVE_FROM_CONVERSATION,
            &Participant {
                conversation_id: Some(conversation_id),
                participant_user_id: user,
            },
        )
        .await
    }

    pub async fn rename_group_conversation(
        &self,
        conversation_id: ConversationId,
        title: &str,
    ) -> Result<ConversationRenamed> {
        self.call(
            endpoints::CHAT_RENAME_GROUP_CONVERSATION,
            &Rename {
                conversation_id,
                new_title: title,
            },
        )
        .await
    }
}
