//! Static table of named REST endpoints.
//!
//! Callers address the web API by name (e.g. `"users.get"`) through
//! [`crate::auth::SessionProvider::call_named`]. Each entry names the service subdomain, the
//! HTTP verb and a path template whose `{placeholder}` segments are filled from the call's
//! parameters.

use phf::phf_map;
use reqwest::Method;
use serde_json::{Map, Value};

use crate::Result;
use crate::error::Error;

/// Exchanges the session credential for a notification channel ticket.
pub const REALTIME_NEGOTIATE: &str = "realtime.negotiate";
/// Returns the user the current credential belongs to.
pub const USERS_AUTHENTICATED: &str = "users.authenticated";
/// Returns a single user by `userId`.
pub const USERS_GET: &str = "users.get";
pub const CHAT_SETTINGS: &str = "chat.settings";
pub const CHAT_GET_CONVERSATIONS: &str = "chat.get_conversations";
pub const CHAT_SEND_MESSAGE: &str = "chat.send_message";
pub const CHAT_UPDATE_TYPING_STATUS: &str = "chat.update_user_typing_status";
pub const CHAT_MARK_AS_SEEN: &str = "chat.mark_as_seen";
pub const CHAT_UNREAD_CONVERSATION_COUNT: &str = "chat.get_unread_conversation_count";
pub const CHAT_START_ONE_TO_ONE: &str = "chat.start_one_to_one_conversation";
pub const CHAT_ADD_TO_CONVERSATION: &str = "chat.add_to_conversation";
pub const CHAT_REMOVE_FROM_CONVERSATION: &str = "chat.remove_from_conversation";
pub const CHAT_RENAME_GROUP_CONVERSATION: &str = "chat.rename_group_conversation";

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Post,
}

impl Verb {
    #[must_use]
    pub fn method(self) -> Method {
        match self {
            Verb::Get => Method::GET,
            Verb::Post => Method::POST,
        }
    }
}

/// A named REST endpoint.
#[non_exhaustive]
#[derive(Debug)]
pub struct Endpoint {
    /// Service subdomain, e.g. `users` for `users.roblox.com`
    pub service: &'static str,
    pub verb: Verb,
    /// Path template, e.g. `/v1/users/{userId}`
    pub path: &'static str,
}

static ENDPOINTS: phf::Map<&'static str, Endpoint> = phf_map! {
    "realtime.negotiate" => Endpoint {
        service: "realtime",
        verb: Verb::Post,
        path: "/notifications/negotiate",
    },
    "users.authenticated" => Endpoint {
        service: "users",
        verb: Verb::Get,
        path: "/v1/users/authenticated",
    },
    "users.get" => Endpoint {
        service: "users",
        verb: Verb::Get,
        path: "/v1/users/{userId}",
    },
    "chat.settings" => Endpoint {
        service: "chat",
        verb: Verb::Get,
        path: "/v2/chat-settings",
    },
    "chat.get_conversations" => Endpoint {
        service: "chat",
        verb: Verb::Get,
        path: "/v2/get-conversations",
    },
    "chat.send_message" => Endpoint {
        service: "chat",
        verb: Verb::Post,
        path: "/v2/send-message",
    },
    "chat.update_user_typing_status" => Endpoint {
        service: "chat",
        verb: Verb::Post,
        path: "/v2/update-user-typing-status",
    },
    "chat.mark_as_seen" => Endpoint {
        service: "chat",
        verb: Verb::Post,
        path: "/v2/mark-as-seen",
    },
    "chat.get_unread_conversation_count" => Endpoint {
        service: "chat",
        verb: Verb::Get,
        path: "/v2/get-unread-conversation-count",
    },
    "chat.start_one_to_one_conversation" => Endpoint {
        service: "chat",
        verb: Verb::Post,
        path: "/v2/start-one-to-one-conversation",
    },
    "chat.add_to_conversation" => Endpoint {
        service: "chat",
        verb: Verb::Post,
        path: "/v2/add-to-conversation",
    },
    "chat.remove_from_conversation" => Endpoint {
        service: "chat",
        verb: Verb::Post,
        path: "/v2/remove-from-conversation",
    },
    "chat.rename_group_conversation" => Endpoint {
        service: "chat",
        verb: Verb::Post,
        path: "/v2/rename-group-conversation",
    },
};

/// Looks up an endpoint by name.
#[must_use]
pub fn endpoint(name: &str) -> Option<&'static Endpoint> {
    ENDPOINTS.get(name)
}

/// Fills the `{placeholder}` segments of `template`, removing the used entries from `params`.
pub(crate) fn render_path(template: &str, params: &mut Map<String, Value>) -> Result<String> {
    let mut path = String::with_capacity(template.len());

    for (index, part) in template.split('{').enumerate() {
        if index == 0 {
            path.push_str(part);
            continue;
        }

        let Some((key, rest)) = part.split_once('}') else {
            return Err(Error::validation(format!(
                "unterminated placeholder in path template {template}"
            )));
        };

        match params.remove(key) {
            Some(Value::String(value)) => path.push_str(&value),
            Some(Value::Number(value)) => path.push_str(&value.to_string()),
            Some(other) => {
                return Err(Error::validation(format!(
                    "path parameter {key} must be a string or number, got {other}"
                )));
            }
            None => {
                return Err(Error::validation(format!(
                    "missing path parameter {key} for {template}"
                )));
            }
        }
        path.push_str(rest);
    }

    Ok(path)
}
