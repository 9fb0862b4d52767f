use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, Request, Response, StatusCode};
use secrecy::{ExposeSecret as _, SecretString};
use serde::Deserialize;
use serde_json::{Map, Value};
use url::Url;

use super::endpoints::{self, Verb};
use crate::Result;
use crate::auth::{Credential, SESSION_COOKIE, SessionProvider};
use crate::error::Error;
use crate::serde_helpers::deserialize_with_warnings;
use crate::types::UserId;

/// Header used by the web API to hand out and check cross-site request forgery tokens.
pub const CSRF_HEADER: &str = "x-csrf-token";

const DEFAULT_USER_AGENT: &str = "blox-realtime";

/// Configuration for [`Client`]
#[derive(Clone, Debug, Builder)]
pub struct Config {
    /// Replaces `https://{service}.roblox.com` with `{base_url}/{service}`.
    /// This is primarily useful for testing.
    #[builder(into)]
    base_url: Option<String>,
    /// Per-request timeout. The default is thirty (30) seconds.
    #[builder(default = Duration::from_secs(30))]
    timeout: Duration,
    #[builder(into, default = DEFAULT_USER_AGENT.to_owned())]
    user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// The user a credential belongs to, as returned by `users.authenticated`.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedUser {
    pub id: UserId,
    pub name: String,
    pub display_name: String,
}

/// HTTP [`SessionProvider`] backed by the session cookie.
///
/// # Example
///
/// ```no_run
/// use blox_realtime::rest::{Client, Config};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = Client::new(Config::default())?;
/// let user = client.login("_|WARNING:-DO-NOT-SHARE-THIS.--...").await?;
/// println!("logged in as {}", user.name);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Client {
    base_url: Option<Url>,
    client: ReqwestClient,
    credential: RwLock<Option<Credential>>,
    user: RwLock<Option<AuthenticatedUser>>,
    csrf_token: RwLock<Option<SecretString>>,
}

impl Client {
    pub fn new(config: Config) -> Result<Self> {
        let mut headers = HeaderMap::new();

        headers.insert(header::USER_AGENT, HeaderValue::from_str(&config.user_agent)?);
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        let client = ReqwestClient::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        let base_url = config.base_url.as_deref().map(Url::parse).transpose()?;

        Ok(Self {
            base_url,
            client,
            credential: RwLock::new(None),
            user: RwLock::new(None),
            csrf_token: RwLock::new(None),
        })
    }

    /// Stores `cookie` as the session credential and fetches the user it belongs to.
    ///
    /// On failure the credential is discarded again.
    pub async fn login<C: Into<Credential>>(&self, cookie: C) -> Result<AuthenticatedUser> {
        #[cfg(feature = "tracing")]
        tracing::info!("started login process");

        self.set_credential(Some(cookie.into()));

        let user = match self
            .call_named(endpoints::USERS_AUTHENTICATED, Value::Null)
            .await
            .and_then(deserialize_with_warnings::<AuthenticatedUser>)
        {
            Ok(user) => user,
            Err(e) => {
                self.logout();
                return Err(e);
            }
        };

        *self.user.write().unwrap_or_else(PoisonError::into_inner) = Some(user.clone());

        #[cfg(feature = "tracing")]
        tracing::info!(user_id = user.id, name = %user.name, "logged in");

        Ok(user)
    }

    /// Forgets the credential, the authenticated user and any CSRF token.
    pub fn logout(&self) {
        self.set_credential(None);
        *self.user.write().unwrap_or_else(PoisonError::into_inner) = None;
        *self.csrf_token.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// The authenticated user, if logged in.
    #[must_use]
    pub fn user(&self) -> Option<AuthenticatedUser> {
        self.user
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the credential without contacting the API.
    pub fn set_credential(&self, credential: Option<Credential>) {
        *self.credential.write().unwrap_or_else(PoisonError::into_inner) = credential;
    }

    fn url_for(&self, service: &str, path: &str) -> Result<Url> {
        let url = match &self.base_url {
            Some(base) => format!("{}/{service}{path}", base.as_str().trim_end_matches('/')),
            None => format!("https://{service}.roblox.com{path}"),
        };
        Ok(Url::parse(&url)?)
    }

    fn build_request(&self, verb: Verb, url: &Url, params: &Map<String, Value>) -> Result<Request> {
        let mut url = url.clone();
        if verb == Verb::Get && !params.is_empty() {
            let query = serde_html_form::to_string(params)
                .map_err(|e| Error::validation(format!("unable to encode query: {e}")))?;
            url.set_query(Some(&query));
        }

        let mut builder = self.client.request(verb.method(), url);

        if let Some(credential) = self.current_credential() {
            builder = builder.header(
                header::COOKIE,
                format!("{SESSION_COOKIE}={}", credential.cookie().expose_secret()),
            );
        }

        if let Some(token) = self
            .csrf_token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            builder = builder.header(CSRF_HEADER, token.expose_secret());
        }

        if verb == Verb::Post {
            builder = builder.json(params);
        }

        Ok(builder.build()?)
    }

    /// Remembers a CSRF token handed out on a 403. Returns whether the request should be retried.
    fn refresh_csrf(&self, response: &Response) -> bool {
        if response.status() != StatusCode::FORBIDDEN {
            return false;
        }

        let Some(token) = response
            .headers()
            .get(CSRF_HEADER)
            .and_then(|v| v.to_str().ok())
        else {
            return false;
        };

        #[cfg(feature = "tracing")]
        tracing::debug!("refreshed CSRF token");

        *self.csrf_token.write().unwrap_or_else(PoisonError::into_inner) =
            Some(SecretString::from(token.to_owned()));
        true
    }

    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(
            level = "debug",
            skip(self, params),
            fields(path = url.path(), status_code)
        )
    )]
    async fn send(&self, verb: Verb, url: &Url, params: &Map<String, Value>) -> Result<Value> {
        let mut response = self
            .client
            .execute(self.build_request(verb, url, params)?)
            .await?;

        if verb == Verb::Post && self.refresh_csrf(&response) {
            response = self
                .client
                .execute(self.build_request(verb, url, params)?)
                .await?;
        }

        let status_code = response.status();

        #[cfg(feature = "tracing")]
        tracing::Span::current().record("status_code", status_code.as_u16());

        if !status_code.is_success() {
            let message = response.text().await.unwrap_or_default();

            #[cfg(feature = "tracing")]
            tracing::warn!(
                status = %status_code,
                path = %url.path(),
                message = %message,
                "API request failed"
            );

            return Err(Error::status(
                status_code,
                verb.method(),
                url.path().to_owned(),
                message,
            ));
        }

        let body = response.bytes().await?;
        if body.is_empty() {
            return Ok(Value::Null);
        }

        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl SessionProvider for Client {
    fn current_credential(&self) -> Option<Credential> {
        self.credential
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn authenticated_user_id(&self) -> Option<UserId> {
        self.user
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|user| user.id)
    }

    async fn call_named(&self, name: &str, params: Value) -> Result<Value> {
        let endpoint = endpoints::endpoint(name)
            .ok_or_else(|| Error::validation(format!("unknown endpoint {name}")))?;

        let mut params = match params {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(Error::validation(format!(
                    "parameters for {name} must be an object, got {other}"
                )));
            }
        };

        let path = endpoints::render_path(endpoint.path, &mut params)?;
        let url = self.url_for(endpoint.service, &path)?;

        self.send(endpoint.verb, &url, &params).await
    }
}
