//! Identifier aliases and re-exported types from external crates.
//!
//! The re-exports are commonly used in this SDK and are provided here
//! so users don't need to add these dependencies to their `Cargo.toml`.

/// Date and time types for timestamps in API responses.
pub use chrono::{DateTime, Utc};
/// URL type used for host overrides.
pub use url::Url;

/// Identifier of a platform user.
pub type UserId = u64;

/// Identifier of a chat conversation.
pub type ConversationId = u64;
