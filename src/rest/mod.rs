//! HTTP session for the platform's web API.
//!
//! [`Client`] keeps the session cookie, performs named REST calls and implements
//! [`crate::auth::SessionProvider`] for the notification channel.

pub mod client;
pub mod endpoints;

pub use client::{AuthenticatedUser, Client, Config};
