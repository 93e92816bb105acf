//! Shape classification for JSON-RPC messages.
//!
//! Correlation never inspects payloads; it only cares which of the `id` and
//! `method` keys a message carries. The classification is applied once at
//! ingestion and everything downstream dispatches on the closed variant set.

use serde_json::Value;

/// JSON-RPC message shape, decided by key presence alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Carries both `id` and `method`: expects a reply.
    Request,
    /// Carries `id` but no `method`: a reply to some request.
    Response,
    /// Carries no `id`: fire-and-forget, each occurrence its own exchange.
    Notification,
}

impl MessageKind {
    /// Classify a message by the presence of its `id` and `method` keys.
    ///
    /// Id-less traffic is a [`MessageKind::Notification`] even when the
    /// `method` key is also missing: without an id there is nothing to
    /// correlate against, so the message is recorded per-occurrence.
    #[must_use]
    pub fn classify(message: &Value) -> Self {
        match (message.get("id").is_some(), message.get("method").is_some()) {
            (true, true) => Self::Request,
            (true, false) => Self::Response,
            (false, _) => Self::Notification,
        }
    }
}
