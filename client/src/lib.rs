//! Scripted LSP conversation harness.
//!
//! Drives a language client process through an ordered batch of JSON-RPC
//! commands and reconstructs a causally matched [`Transcript`] of the
//! exchange: every sent message paired with whatever the server sent back,
//! plus any unsolicited traffic, keyed by correlation identity.

pub mod codec;
pub mod commands;
pub mod correlator;
pub mod session;
pub mod transport;

pub use correlator::{Correlator, PROBE_REQUEST_ID, ProbeExhausted, ProbePolicy, Timeouts};
pub use session::{LspSession, SessionConfig};
pub use transport::{FramedTransport, Transport};

pub use scribe_transcript::{CorrelationKey, MessageKind, Observation, Transcript, TranscriptEntry};
