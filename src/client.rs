//! The top-level client.
//!
//! [`Client`] owns the HTTP session, the [`EventPublisher`] and (once connected) the
//! notification [`ConnectionManager`]. Cloning it is cheap; all clones share the same state.

use std::sync::{Arc, Mutex, PoisonError};

use bon::Builder;

use crate::Result;
use crate::auth::{Credential, SessionProvider as _};
use crate::chat::ChatManager;
use crate::entity::{ClientHandle, ConversationRef, UserRef};
use crate::realtime::{
    self, BoxError, ConnectionManager, ConnectionState, Dispatcher, Event, EventPublisher,
    EventTag, HandshakeAuthenticator, SubscriptionHandle,
};
use crate::rest::{self, AuthenticatedUser};
use crate::types::{ConversationId, UserId};

const DEFAULT_NOTIFICATIONS_ENDPOINT: &str = "wss://realtime.roblox.com/notifications";

/// Configuration for [`Client`]
#[derive(Clone, Debug, Builder)]
pub struct Config {
    #[builder(default)]
    rest: rest::Config,
    #[builder(default)]
    realtime: realtime::Config,
    /// WebSocket URL of the notification endpoint
    #[builder(into, default = DEFAULT_NOTIFICATIONS_ENDPOINT.to_owned())]
    notifications_endpoint: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

struct ClientInner {
    session: Arc<rest::Client>,
    config: Config,
    publisher: Arc<EventPublisher>,
    connection: Mutex<Option<ConnectionManager>>,
}

/// Client for the platform's web API and its real-time notifications.
///
/// # Example
///
/// ```no_run
/// use blox_realtime::Client;
/// use blox_realtime::realtime::{Event, EventTag};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = Client::new(blox_realtime::client::Config::default())?;
/// client.login("_|WARNING:-DO-NOT-SHARE-THIS.--...").await?;
///
/// client.subscribe(EventTag::MessageReceived, |event| {
///     if let Event::MessageReceived(message) = event {
///         println!("new message in {:?}", message.conversation);
///     }
///     Ok(())
/// });
/// client.connect()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    pub fn new(config: Config) -> Result<Self> {
        let session = Arc::new(rest::Client::new(config.rest.clone())?);

        Ok(Self {
            inner: Arc::new(ClientInner {
                session,
                config,
                publisher: Arc::new(EventPublisher::new()),
                connection: Mutex::new(None),
            }),
        })
    }

    /// Logs in with the session cookie. See [`rest::Client::login`].
    pub async fn login<C: Into<Credential>>(&self, cookie: C) -> Result<AuthenticatedUser> {
        self.inner.session.login(cookie).await
    }

    /// Forgets the session. An open notification connection keeps running until its next
    /// reconnect, which will then fail authentication and close.
    pub fn logout(&self) {
        self.inner.session.logout();
    }

    /// The authenticated user, if logged in.
    #[must_use]
    pub fn user(&self) -> Option<AuthenticatedUser> {
        self.inner.session.user()
    }

    /// The HTTP session backing this client.
    #[must_use]
    pub fn session(&self) -> &Arc<rest::Client> {
        &self.inner.session
    }

    /// A non-owning handle for building entity references.
    #[must_use]
    pub fn handle(&self) -> ClientHandle {
        ClientHandle::new(&self.inner.session)
    }

    #[must_use]
    pub fn user_ref(&self, id: UserId) -> UserRef {
        self.handle().user(id)
    }

    #[must_use]
    pub fn conversation_ref(&self, id: ConversationId) -> ConversationRef {
        self.handle().conversation(id)
    }

    #[must_use]
    pub fn chat(&self) -> ChatManager {
        ChatManager::new(Arc::clone(&self.inner.session) as _)
    }

    #[must_use]
    pub fn authenticated_user_id(&self) -> Option<UserId> {
        self.inner.session.authenticated_user_id()
    }

    /// Registers `callback` for events tagged `tag`. See [`EventPublisher::subscribe`].
    pub fn subscribe<F>(&self, tag: EventTag, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Event) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.inner.publisher.subscribe(tag, callback)
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        self.inner.publisher.unsubscribe(handle)
    }

    #[must_use]
    pub fn publisher(&self) -> &Arc<EventPublisher> {
        &self.inner.publisher
    }

    /// Opens the notification channel. Idempotent while connected or reconnecting.
    ///
    /// After [`Client::disconnect`], a fresh connection is created.
    pub fn connect(&self) -> Result<()> {
        let mut connection = self
            .inner
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(manager) = connection.as_ref()
            && !manager.state().is_closed()
        {
            return manager.open();
        }

        let session = Arc::clone(&self.inner.session);
        let manager = ConnectionManager::new(
            self.inner.config.notifications_endpoint.clone(),
            self.inner.config.realtime.clone(),
            HandshakeAuthenticator::new(Arc::clone(&session) as _),
            Dispatcher::new(
                ClientHandle::new(&session),
                Arc::clone(&self.inner.publisher),
            ),
        )?;
        manager.open()?;
        *connection = Some(manager);

        Ok(())
    }

    /// Closes the notification channel. See [`ConnectionManager::close`].
    pub fn disconnect(&self) {
        if let Some(manager) = self
            .inner
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            manager.close();
        }
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.inner
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(ConnectionState::Disconnected, ConnectionManager::state)
    }

    /// State change notifications for the current connection, if one was created.
    #[must_use]
    pub fn connection_state_receiver(&self) -> Option<tokio::sync::watch::Receiver<ConnectionState>> {
        self.inner
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(ConnectionManager::state_receiver)
    }
}
