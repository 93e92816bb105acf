//! Transcript accumulation: fold message events into keyed exchanges.

use std::collections::HashMap;

use serde_json::Value;

use crate::key::CorrelationKey;

/// One new message event to fold into a transcript.
///
/// The variant set makes the empty observation unrepresentable: there is
/// always at least one side to derive a key from.
#[derive(Debug, Clone)]
pub enum Observation {
    /// A message this client wrote to the server.
    Sent(Value),
    /// A message read back from the server.
    Received(Value),
    /// Both sides of an exchange at once. The key derives from `sent`.
    Exchange { sent: Value, received: Value },
}

impl Observation {
    fn key(&self) -> CorrelationKey {
        match self {
            Self::Sent(message) | Self::Exchange { sent: message, .. } => {
                CorrelationKey::for_sent(message)
            }
            Self::Received(message) => CorrelationKey::for_received(message),
        }
    }

    fn into_sides(self) -> (Option<Value>, Option<Value>) {
        match self {
            Self::Sent(message) => (Some(message), None),
            Self::Received(message) => (None, Some(message)),
            Self::Exchange { sent, received } => (Some(sent), Some(received)),
        }
    }
}

/// Best-known state of one logical exchange: what was sent and what came
/// back. At least one side is populated by construction.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEntry {
    sent: Option<Value>,
    received: Option<Value>,
}

impl TranscriptEntry {
    #[must_use]
    pub fn sent(&self) -> Option<&Value> {
        self.sent.as_ref()
    }

    #[must_use]
    pub fn received(&self) -> Option<&Value> {
        self.received.as_ref()
    }

    /// Whether both sides of the exchange have been observed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.sent.is_some() && self.received.is_some()
    }

    /// True when the received side carries an `error.message` string
    /// containing `needle`. Absent sides and non-error responses are false.
    #[must_use]
    pub fn received_error_contains(&self, needle: &str) -> bool {
        self.received
            .as_ref()
            .and_then(|message| message.get("error"))
            .and_then(|error| error.get("message"))
            .and_then(Value::as_str)
            .is_some_and(|text| text.contains(needle))
    }
}

/// Accumulated mapping from [`CorrelationKey`] to [`TranscriptEntry`].
///
/// A transcript is threaded through the session phases as a value: every
/// merge consumes the old transcript and yields a new one, so each phase
/// works from an explicit snapshot and aliasing never arises.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    entries: HashMap<CorrelationKey, TranscriptEntry>,
}

impl Transcript {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one observation into the transcript.
    ///
    /// The observation's key selects the entry; a populated side in the
    /// observation takes that slot, an absent side keeps whatever the
    /// existing entry had. Arrival order of the two sides does not matter.
    #[must_use]
    pub fn merge(mut self, observation: Observation) -> Self {
        let key = observation.key();
        let (sent, received) = observation.into_sides();
        let entry = match self.entries.remove(&key) {
            Some(existing) => TranscriptEntry {
                sent: sent.or(existing.sent),
                received: received.or(existing.received),
            },
            None => TranscriptEntry { sent, received },
        };
        self.entries.insert(key, entry);
        self
    }

    /// Drop the entry under `key`, if any. Harmless when absent.
    #[must_use]
    pub fn remove(mut self, key: &CorrelationKey) -> Self {
        self.entries.remove(key);
        self
    }

    #[must_use]
    pub fn get(&self, key: &CorrelationKey) -> Option<&TranscriptEntry> {
        self.entries.get(key)
    }

    #[must_use]
    pub fn contains(&self, key: &CorrelationKey) -> bool {
        self.entries.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CorrelationKey, &TranscriptEntry)> {
        self.entries.iter()
    }

    /// Whether any entry's received side reports an error containing
    /// `needle`. The readiness probe polls this across the whole transcript.
    #[must_use]
    pub fn any_received_error_contains(&self, needle: &str) -> bool {
        self.entries
            .values()
            .any(|entry| entry.received_error_contains(needle))
    }
}
