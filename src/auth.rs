//! Session credentials and the [`SessionProvider`] seam.
//!
//! The notification channel never builds REST requests itself. Everything it needs from the
//! web API (the current credential, the authenticated user and the ticket exchange) goes
//! through a [`SessionProvider`]. [`crate::rest::Client`] is the HTTP implementation.

use async_trait::async_trait;
/// Secret string types that redact values in debug output for security.
pub use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use crate::Result;
use crate::types::UserId;

/// Name of the session cookie carrying the [`Credential`].
pub const SESSION_COOKIE: &str = ".ROBLOSECURITY";

/// The session credential (the `.ROBLOSECURITY` cookie value).
///
/// Its contents are never inspected by this crate, only forwarded.
#[derive(Clone, Debug)]
pub struct Credential(SecretString);

impl Credential {
    #[must_use]
    pub fn new(cookie: String) -> Self {
        Self(SecretString::from(cookie))
    }

    /// Returns the raw cookie value.
    #[must_use]
    pub fn cookie(&self) -> &SecretString {
        &self.0
    }
}

impl From<String> for Credential {
    fn from(cookie: String) -> Self {
        Self::new(cookie)
    }
}

impl From<&str> for Credential {
    fn from(cookie: &str) -> Self {
        Self::new(cookie.to_owned())
    }
}

/// Supplies the authenticated session to the notification channel.
///
/// Implementations must be cheap to query for [`SessionProvider::current_credential`] and
/// [`SessionProvider::authenticated_user_id`] since both are read on the dispatch path.
#[async_trait]
pub trait SessionProvider: Send + Sync + 'static {
    /// The credential currently in use, if logged in.
    fn current_credential(&self) -> Option<Credential>;

    /// The id of the user the current credential belongs to, if known.
    fn authenticated_user_id(&self) -> Option<UserId>;

    /// Performs the named REST call with `params` and returns the decoded JSON response.
    async fn call_named(&self, name: &str, params: Value) -> Result<Value>;
}
