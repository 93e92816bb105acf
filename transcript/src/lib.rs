//! Correlation model for scripted JSON-RPC conversations.
//!
//! A scripted session produces a stream of message events: commands written
//! to the server and whatever the server emits back, in whatever order it
//! arrives. This crate pairs those events into logical exchanges, keyed by a
//! stable [`CorrelationKey`], and accumulates them into an immutable
//! [`Transcript`] the harness returns to its caller.

mod key;
mod message;
mod transcript;

pub use key::CorrelationKey;
pub use message::MessageKind;
pub use transcript::{Observation, Transcript, TranscriptEntry};
