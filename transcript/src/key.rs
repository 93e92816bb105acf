//! Correlation keys: the identity that groups a sent message with its
//! eventual received counterpart.
//!
//! Requests and their responses share a key derived from the JSON-RPC id and
//! the side that initiated the exchange, so the pairing is independent of
//! arrival order. Notifications never pair with anything: each one gets a
//! fresh random token.

use std::fmt;

use serde_json::Value;
use uuid::Uuid;

use crate::message::MessageKind;

const REQUEST_CLIENT_TO_SERVER: &str = "REQUEST_CLIENT_TO_SERVER_";
const REQUEST_SERVER_TO_CLIENT: &str = "REQUEST_SERVER_TO_CLIENT_";
const NOTIFY_CLIENT_TO_SERVER: &str = "NOTIFY_CLIENT_TO_SERVER_";
const NOTIFY_SERVER_TO_CLIENT: &str = "NOTIFY_SERVER_TO_CLIENT_";

/// Identity of one logical exchange in a transcript.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationKey(String);

impl CorrelationKey {
    /// Key for a request the client initiated, shared by its response.
    #[must_use]
    pub fn client_request(id: &Value) -> Self {
        Self(format!("{REQUEST_CLIENT_TO_SERVER}{}", render_id(id)))
    }

    /// Key for a request the server initiated, shared by the client's reply.
    #[must_use]
    pub fn server_request(id: &Value) -> Self {
        Self(format!("{REQUEST_SERVER_TO_CLIENT}{}", render_id(id)))
    }

    /// Derive the key for a message the client wrote to the server.
    ///
    /// A sent [`MessageKind::Response`] is the client answering a
    /// server-initiated request, so it lands under the server-request key.
    #[must_use]
    pub fn for_sent(message: &Value) -> Self {
        match MessageKind::classify(message) {
            MessageKind::Request => Self::client_request(&message["id"]),
            MessageKind::Response => Self::server_request(&message["id"]),
            MessageKind::Notification => Self::fresh(NOTIFY_CLIENT_TO_SERVER),
        }
    }

    /// Derive the key for a message read back from the server.
    ///
    /// A received [`MessageKind::Response`] answers a request this client
    /// sent earlier, so it lands under the client-request key.
    #[must_use]
    pub fn for_received(message: &Value) -> Self {
        match MessageKind::classify(message) {
            MessageKind::Request => Self::server_request(&message["id"]),
            MessageKind::Response => Self::client_request(&message["id"]),
            MessageKind::Notification => Self::fresh(NOTIFY_SERVER_TO_CLIENT),
        }
    }

    /// Whether this key names a client-to-server notification.
    #[must_use]
    pub fn is_client_notify(&self) -> bool {
        self.0.starts_with(NOTIFY_CLIENT_TO_SERVER)
    }

    /// Whether this key names a server-to-client notification.
    #[must_use]
    pub fn is_server_notify(&self) -> bool {
        self.0.starts_with(NOTIFY_SERVER_TO_CLIENT)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn fresh(prefix: &str) -> Self {
        Self(format!("{prefix}{}", Uuid::new_v4()))
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Render a JSON-RPC id the way it reads in the message: numbers bare,
/// strings without quotes.
fn render_id(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
