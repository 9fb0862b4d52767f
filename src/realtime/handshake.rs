//! Credential to ticket exchange and the ticket presentation frames.

use std::fmt;
use std::sync::Arc;

use secrecy::{ExposeSecret as _, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::AuthError;
use crate::auth::SessionProvider;
use crate::rest::endpoints;

/// Connection-scoped token presented to the notification endpoint.
///
/// Valid for a single connection attempt; never persisted.
#[derive(Clone)]
pub struct Ticket(SecretString);

impl Ticket {
    pub(crate) fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl fmt::Debug for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Ticket([REDACTED])")
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NegotiateResponse {
    connection_token: Option<String>,
}

/// Exchanges the session credential for a [`Ticket`].
///
/// Performs exactly one REST call per [`authenticate`](Self::authenticate) and never retries;
/// retry policy belongs to the connection.
#[derive(Clone)]
pub struct HandshakeAuthenticator {
    session: Arc<dyn SessionProvider>,
}

impl HandshakeAuthenticator {
    #[must_use]
    pub fn new(session: Arc<dyn SessionProvider>) -> Self {
        Self { session }
    }

    pub async fn authenticate(&self) -> Result<Ticket, AuthError> {
        if self.session.current_credential().is_none() {
            return Err(AuthError::missing_credential());
        }

        let response = self
            .session
            .call_named(endpoints::REALTIME_NEGOTIATE, Value::Object(Map::new()))
            .await
            .map_err(AuthError::from_exchange)?;

        let token = serde_json::from_value::<NegotiateResponse>(response)
            .ok()
            .and_then(|r| r.connection_token)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| AuthError::ticket_rejected("negotiate returned no connection token"))?;

        Ok(Ticket(SecretString::from(token)))
    }
}

impl fmt::Debug for HandshakeAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeAuthenticator").finish_non_exhaustive()
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename = "authenticate")]
struct Authenticate<'a> {
    ticket: &'a str,
}

/// First frame sent on a fresh transport.
pub(crate) fn authenticate_frame(ticket: &Ticket) -> Result<String, serde_json::Error> {
    serde_json::to_string(&Authenticate {
        ticket: ticket.expose(),
    })
}

/// The far end's answer to a ticket presentation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum HandshakeReply {
    Authenticated,
    AuthenticationFailed {
        #[serde(default)]
        reason: Option<String>,
    },
}

/// `None` for anything that is not a handshake reply.
pub(crate) fn parse_reply(text: &str) -> Option<HandshakeReply> {
    serde_json::from_str(text).ok()
}
