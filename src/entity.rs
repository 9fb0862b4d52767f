//! Entity references: "the object with this id, not yet fetched".
//!
//! Every domain event refers to users and conversations through an [`EntityRef`], a plain
//! `(id, client handle)` pair. Building one never performs I/O. Turning it into a full record
//! is an explicit call to [`EntityRef::resolve`], which goes through the [`Entity`]
//! implementation for that kind of object.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::json;

use crate::Result;
use crate::auth::SessionProvider;
use crate::error::Error;
use crate::rest::endpoints;
use crate::serde_helpers::deserialize_with_warnings;
use crate::types::{ConversationId, DateTime, UserId, Utc};

/// Non-owning handle to the client an entity was observed through.
#[derive(Clone)]
pub struct ClientHandle {
    session: Weak<dyn SessionProvider>,
}

impl ClientHandle {
    #[must_use]
    pub fn new<S: SessionProvider>(session: &Arc<S>) -> Self {
        let session: Weak<S> = Arc::downgrade(session);
        Self { session }
    }

    /// The session, if the owning client is still alive.
    #[must_use]
    pub fn session(&self) -> Option<Arc<dyn SessionProvider>> {
        self.session.upgrade()
    }

    /// The authenticated user's id, if the client is alive and logged in.
    #[must_use]
    pub fn authenticated_user_id(&self) -> Option<UserId> {
        self.session()?.authenticated_user_id()
    }

    #[must_use]
    pub fn user(&self, id: UserId) -> UserRef {
        EntityRef::new(self.clone(), id)
    }

    #[must_use]
    pub fn conversation(&self, id: ConversationId) -> ConversationRef {
        EntityRef::new(self.clone(), id)
    }
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("attached", &(self.session.strong_count() > 0))
            .finish()
    }
}

/// A kind of remote object that can be resolved from its id.
#[async_trait]
pub trait Entity: Send + Sync + 'static {
    /// The full record produced by resolution.
    type Record: Send;

    /// Human readable kind, used in `Debug` output.
    const KIND: &'static str;

    async fn fetch(session: &dyn SessionProvider, id: u64) -> Result<Self::Record>;
}

/// Reference to an unresolved remote object of kind `E`.
pub struct EntityRef<E> {
    id: u64,
    client: ClientHandle,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> EntityRef<E> {
    #[must_use]
    pub fn new(client: ClientHandle, id: u64) -> Self {
        Self {
            id,
            client,
            _entity: PhantomData,
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn client(&self) -> &ClientHandle {
        &self.client
    }

    /// Fetches the full record through the owning client's session.
    pub async fn resolve(&self) -> Result<E::Record> {
        let session = self.client.session().ok_or_else(|| {
            Error::validation(format!(
                "cannot resolve {} {}: the owning client was dropped",
                E::KIND,
                self.id
            ))
        })?;

        E::fetch(session.as_ref(), self.id).await
    }
}

impl<E> Clone for EntityRef<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            client: self.client.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> fmt::Debug for EntityRef<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", E::KIND, self.id)
    }
}

impl<E> PartialEq for EntityRef<E> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<E> Eq for EntityRef<E> {}

impl<E> Hash for EntityRef<E> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Marker for platform users.
#[non_exhaustive]
#[derive(Debug)]
pub struct User;

/// Marker for chat conversations.
#[non_exhaustive]
#[derive(Debug)]
pub struct Conversation;

pub type UserRef = EntityRef<User>;
pub type ConversationRef = EntityRef<Conversation>;

/// A user as returned by `users.get`.
#[non_exhaustive]
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: UserId,
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_banned: bool,
    #[serde(default)]
    pub has_verified_badge: bool,
}

/// A conversation participant.
#[non_exhaustive]
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub target_id: UserId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// A conversation as returned by `chat.get_conversations`.
#[non_exhaustive]
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    pub id: ConversationId,
    #[serde(default)]
    pub title: String,
    /// e.g. `OneToOneConversation`, `MultiUserConversation`
    pub conversation_type: String,
    #[serde(default)]
    pub has_unread_messages: bool,
    #[serde(default)]
    pub participants: Vec<Participant>,
    pub last_updated: Option<DateTime<Utc>>,
}

#[async_trait]
impl Entity for User {
    type Record = UserRecord;

    const KIND: &'static str = "User";

    async fn fetch(session: &dyn SessionProvider, id: u64) -> Result<UserRecord> {
        let response = session
            .call_named(endpoints::USERS_GET, json!({ "userId": id }))
            .await?;
        deserialize_with_warnings(response)
    }
}

#[async_trait]
impl Entity for Conversation {
    type Record = ConversationRecord;

    const KIND: &'static str = "Conversation";

    async fn fetch(session: &dyn SessionProvider, id: u64) -> Result<ConversationRecord> {
        let response = session
            .call_named(
                endpoints::CHAT_GET_CONVERSATIONS,
                json!({ "conversationIds": [id] }),
            )
            .await?;
        let conversations: Vec<ConversationRecord> = deserialize_with_warnings(response)?;

        conversations
            .into_iter()
            .find(|conversation| conversation.id == id)
            .ok_or_else(|| {
                Error::status(
                    StatusCode::NOT_FOUND,
                    Method::GET,
                    endpoints::CHAT_GET_CONVERSATIONS.to_owned(),
                    format!("conversation {id} not found"),
                )
            })
    }
}
