//! Correlation engine: drives a scripted conversation over a [`Transport`]
//! and records it as a [`Transcript`].
//!
//! One `communicate` call runs three phases against the live server:
//! send (with a readiness probe after any `initialize`), a request-response
//! read phase sized by the number of id-bearing commands, and a drain phase
//! that soaks up unsolicited trailing traffic. Each phase takes a transcript
//! snapshot and returns a new one.

use std::time::Duration;

use anyhow::Result;
use serde_json::{Value, json};

use scribe_transcript::{CorrelationKey, Observation, Transcript};

use crate::commands;
use crate::transport::Transport;

/// Sentinel id of the readiness-probe request. A scripted command reusing
/// this id shares the probe's correlation key and is stripped from the
/// returned transcript along with it.
pub const PROBE_REQUEST_ID: i64 = -1;

const PROBE_METHOD: &str = "workspace/symbol";
const PROBE_READ_TIMEOUT: Duration = Duration::from_secs(5);

// Error-message fragments hh_client emits while its backend connection is
// still coming up. Either one anywhere in the transcript keeps the probe
// looping.
const SERVER_BUSY: &str = "Server busy";
const SERVER_INITIALIZING: &str = "hh_server initializing";

/// Per-phase read timeouts for one `communicate` call.
///
/// `request` bounds each read in the request-response phase; it is generous
/// because it is rarely hit. `notify` bounds the drain phase, where silence
/// is the expected terminal state, so it stays short.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub request: Duration,
    pub notify: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(30),
            notify: Duration::from_secs(1),
        }
    }
}

/// Bound on the readiness-probe loop.
///
/// Production default is unbounded: the server connects to its backend
/// asynchronously and there is no upper bound on how long that takes, so
/// the probe must be willing to wait it out. Tests inject a ceiling.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProbePolicy {
    pub max_attempts: Option<u32>,
}

#[derive(Debug, thiserror::Error)]
#[error("server not ready after {attempts} probe attempts")]
pub struct ProbeExhausted {
    attempts: u32,
}

/// Scripts a send/receive protocol against one [`Transport`] and produces
/// a correlation transcript. Not for concurrent use; one logical thread of
/// control owns the transport for the whole session.
pub struct Correlator<T> {
    transport: T,
    probe_policy: ProbePolicy,
}

impl<T: Transport> Correlator<T> {
    pub fn new(transport: T) -> Self {
        Self::with_probe_policy(transport, ProbePolicy::default())
    }

    pub fn with_probe_policy(transport: T, probe_policy: ProbePolicy) -> Self {
        Self {
            transport,
            probe_policy,
        }
    }

    /// Run one scripted conversation and return its transcript.
    ///
    /// Commands go out in order; one response read happens per id-bearing
    /// command; then the stream is drained until `timeouts.notify` passes in
    /// silence. Reads that time out leave their entry's received side absent
    /// rather than failing — the caller inspects the transcript for gaps.
    /// The probe's bookkeeping entry is stripped unconditionally.
    pub async fn communicate(
        &mut self,
        json_commands: &[Value],
        timeouts: Timeouts,
    ) -> Result<Transcript> {
        let transcript = self.send_commands(Transcript::new(), json_commands).await?;
        let transcript = self
            .read_request_responses(transcript, json_commands, timeouts.request)
            .await?;
        let transcript = self.read_extra_responses(transcript, timeouts.notify).await?;
        Ok(transcript.remove(&probe_key()))
    }

    /// Send each command in order, recording it as a sent observation.
    /// After an `initialize` command, hold until the server proves ready.
    async fn send_commands(
        &mut self,
        mut transcript: Transcript,
        commands: &[Value],
    ) -> Result<Transcript> {
        for command in commands {
            transcript = self.send_one(transcript, command).await?;
            // The server only connects to its backend asynchronously after
            // initialize; delay the rest of the script until that settles.
            if command.get("method").and_then(Value::as_str) == Some("initialize") {
                transcript = self.wait_for_initialized(transcript).await?;
            }
        }
        Ok(transcript)
    }

    async fn send_one(&mut self, transcript: Transcript, command: &Value) -> Result<Transcript> {
        self.transport.write(command).await?;
        Ok(transcript.merge(Observation::Sent(command.clone())))
    }

    /// Poll the server with a dummy request until it answers without a
    /// busy/initializing error.
    ///
    /// Each attempt goes through the ordinary send path, so every probe
    /// lands in the transcript under the sentinel key. The loop ends only
    /// when no entry anywhere in the transcript carries a busy or
    /// initializing error and the dummy request has a received side — or
    /// when the injected attempt ceiling (unbounded by default) runs out.
    async fn wait_for_initialized(&mut self, mut transcript: Transcript) -> Result<Transcript> {
        let probe = probe_request()?;
        let key = probe_key();
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            tracing::debug!(attempt = attempts, "sending readiness probe");
            transcript = self.send_one(transcript, &probe).await?;
            transcript = self
                .read_request_responses(transcript, std::slice::from_ref(&probe), PROBE_READ_TIMEOUT)
                .await?;

            let settling = transcript.any_received_error_contains(SERVER_BUSY)
                || transcript.any_received_error_contains(SERVER_INITIALIZING);
            let answered = transcript
                .get(&key)
                .is_some_and(|entry| entry.received().is_some());
            if !settling && answered {
                tracing::debug!(attempts, "server ready");
                return Ok(transcript);
            }

            if let Some(limit) = self.probe_policy.max_attempts
                && attempts >= limit
            {
                return Err(ProbeExhausted { attempts }.into());
            }
        }
    }

    /// Read one message per id-bearing command in `commands`.
    ///
    /// A read that returns nothing within `timeout` is skipped, not an
    /// error; the phase may under-collect and leave entries incomplete.
    async fn read_request_responses(
        &mut self,
        mut transcript: Transcript,
        commands: &[Value],
        timeout: Duration,
    ) -> Result<Transcript> {
        let expected = commands
            .iter()
            .filter(|command| command.get("id").is_some())
            .count();
        for _ in 0..expected {
            match self.transport.read(timeout).await? {
                Some(message) => {
                    transcript = transcript.merge(Observation::Received(message));
                }
                None => tracing::debug!(?timeout, "expected response did not arrive"),
            }
        }
        Ok(transcript)
    }

    /// Keep reading until `timeout` passes with no traffic. Collects
    /// unsolicited notifications and server requests that arrive bunched
    /// with or after the expected responses.
    async fn read_extra_responses(
        &mut self,
        mut transcript: Transcript,
        timeout: Duration,
    ) -> Result<Transcript> {
        while let Some(message) = self.transport.read(timeout).await? {
            transcript = transcript.merge(Observation::Received(message));
        }
        Ok(transcript)
    }
}

/// The probe request sent after `initialize`. The query payload is
/// arbitrary; only the error-or-result shape of the reply matters.
fn probe_request() -> Result<Value> {
    let id = json!(PROBE_REQUEST_ID);
    let params = json!({"query": "readiness probe"});
    commands::request(&id, PROBE_METHOD, Some(&params))
}

/// Correlation key of the probe entry, computed without sending anything.
#[must_use]
pub fn probe_key() -> CorrelationKey {
    CorrelationKey::client_request(&json!(PROBE_REQUEST_ID))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Deterministic transport: records writes, plays back a scripted reply
    /// queue where `None` stands for a timed-out read.
    struct ScriptedTransport {
        written: Vec<Value>,
        replies: VecDeque<Option<Value>>,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<Option<Value>>) -> Self {
            Self {
                written: Vec::new(),
                replies: replies.into(),
            }
        }
    }

    impl Transport for ScriptedTransport {
        async fn write(&mut self, message: &Value) -> Result<()> {
            self.written.push(message.clone());
            Ok(())
        }

        async fn read(&mut self, _timeout: Duration) -> Result<Option<Value>> {
            Ok(self.replies.pop_front().flatten())
        }
    }

    fn fast() -> Timeouts {
        Timeouts {
            request: Duration::from_millis(50),
            notify: Duration::from_millis(50),
        }
    }

    fn initializing_error() -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": PROBE_REQUEST_ID,
            "error": {"code": -32603, "message": "hh_server initializing: please wait"}
        })
    }

    fn probe_success() -> Value {
        json!({"jsonrpc": "2.0", "id": PROBE_REQUEST_ID, "result": []})
    }

    #[tokio::test]
    async fn request_and_response_make_one_complete_entry() {
        let transport = ScriptedTransport::new(vec![Some(
            json!({"jsonrpc": "2.0", "id": 1, "result": {}}),
        )]);
        let mut correlator = Correlator::new(transport);

        let commands = vec![json!({"jsonrpc": "2.0", "id": 1, "method": "foo", "params": {}})];
        let transcript = correlator.communicate(&commands, fast()).await.unwrap();

        assert_eq!(transcript.len(), 1);
        let entry = transcript
            .get(&CorrelationKey::client_request(&json!(1)))
            .unwrap();
        assert!(entry.is_complete());
    }

    #[tokio::test]
    async fn missed_response_leaves_received_absent() {
        // One expected response, the read times out, drain is silent.
        let transport = ScriptedTransport::new(vec![None]);
        let mut correlator = Correlator::new(transport);

        let commands = vec![json!({"jsonrpc": "2.0", "id": 1, "method": "foo"})];
        let transcript = correlator.communicate(&commands, fast()).await.unwrap();

        let entry = transcript
            .get(&CorrelationKey::client_request(&json!(1)))
            .unwrap();
        assert!(entry.sent().is_some());
        assert!(entry.received().is_none());
    }

    #[tokio::test]
    async fn notifications_collect_on_both_sides() {
        // Scripted notification sends expect no response reads; the
        // unsolicited server notification arrives during the drain.
        let transport = ScriptedTransport::new(vec![Some(
            json!({"jsonrpc": "2.0", "method": "baz", "params": {}}),
        )]);
        let mut correlator = Correlator::new(transport);

        let commands = vec![json!({"jsonrpc": "2.0", "method": "bar", "params": {}})];
        let transcript = correlator.communicate(&commands, fast()).await.unwrap();

        assert_eq!(transcript.len(), 2);
        let client_side = transcript
            .iter()
            .find(|(key, _)| key.is_client_notify())
            .unwrap()
            .1;
        assert!(client_side.sent().is_some() && client_side.received().is_none());
        let server_side = transcript
            .iter()
            .find(|(key, _)| key.is_server_notify())
            .unwrap()
            .1;
        assert!(server_side.received().is_some() && server_side.sent().is_none());
    }

    #[tokio::test]
    async fn server_request_recorded_under_server_key() {
        let transport = ScriptedTransport::new(vec![Some(
            json!({"jsonrpc": "2.0", "id": 5, "method": "window/showMessageRequest"}),
        )]);
        let mut correlator = Correlator::new(transport);

        let transcript = correlator.communicate(&[], fast()).await.unwrap();

        assert_eq!(transcript.len(), 1);
        assert!(transcript.contains(&CorrelationKey::server_request(&json!(5))));
    }

    #[tokio::test]
    async fn initialize_triggers_probe_and_probe_entry_is_stripped() {
        let transport = ScriptedTransport::new(vec![
            // Probe answered immediately.
            Some(probe_success()),
            // Then the initialize response in the request-response phase.
            Some(json!({"jsonrpc": "2.0", "id": 0, "result": {"capabilities": {}}})),
        ]);
        let mut correlator = Correlator::new(transport);

        let commands = vec![json!({"jsonrpc": "2.0", "id": 0, "method": "initialize", "params": {}})];
        let transcript = correlator.communicate(&commands, fast()).await.unwrap();

        assert_eq!(transcript.len(), 1);
        assert!(!transcript.contains(&probe_key()));
        assert!(
            transcript
                .get(&CorrelationKey::client_request(&json!(0)))
                .unwrap()
                .is_complete()
        );
    }

    #[tokio::test]
    async fn probe_retries_until_server_stops_initializing() {
        let failures = 3;
        let mut replies = vec![Some(initializing_error()); failures];
        replies.push(Some(probe_success()));
        replies.push(Some(
            json!({"jsonrpc": "2.0", "id": 0, "result": {"capabilities": {}}}),
        ));
        let mut correlator = Correlator::new(ScriptedTransport::new(replies));

        let commands = vec![json!({"jsonrpc": "2.0", "id": 0, "method": "initialize", "params": {}})];
        let transcript = correlator.communicate(&commands, fast()).await.unwrap();

        // N failing answers mean N+1 probe sends: initialize plus four probes.
        let probes_sent = correlator
            .transport
            .written
            .iter()
            .filter(|message| message["method"] == PROBE_METHOD)
            .count();
        assert_eq!(probes_sent, failures + 1);
        assert!(!transcript.contains(&probe_key()));
    }

    #[tokio::test]
    async fn probe_retries_on_busy_and_on_silence() {
        // First probe read times out entirely, second comes back busy,
        // third succeeds.
        let replies = vec![
            None,
            Some(json!({
                "jsonrpc": "2.0",
                "id": PROBE_REQUEST_ID,
                "error": {"code": -32603, "message": "Server busy: typechecking"}
            })),
            Some(probe_success()),
            Some(json!({"jsonrpc": "2.0", "id": 0, "result": {}})),
        ];
        let mut correlator = Correlator::new(ScriptedTransport::new(replies));

        let commands = vec![json!({"jsonrpc": "2.0", "id": 0, "method": "initialize"})];
        let transcript = correlator.communicate(&commands, fast()).await.unwrap();

        let probes_sent = correlator
            .transport
            .written
            .iter()
            .filter(|message| message["method"] == PROBE_METHOD)
            .count();
        assert_eq!(probes_sent, 3);
        assert!(!transcript.contains(&probe_key()));
    }

    #[tokio::test]
    async fn bounded_probe_policy_gives_up() {
        // The server never recovers; every probe read times out.
        let transport = ScriptedTransport::new(vec![]);
        let mut correlator = Correlator::with_probe_policy(
            transport,
            ProbePolicy {
                max_attempts: Some(3),
            },
        );

        let commands = vec![json!({"jsonrpc": "2.0", "id": 0, "method": "initialize"})];
        let err = correlator.communicate(&commands, fast()).await.unwrap_err();

        assert!(err.is::<ProbeExhausted>());
        assert_eq!(correlator.transport.written.len(), 4); // initialize + 3 probes
    }

    #[tokio::test]
    async fn probe_key_is_stripped_even_without_initialize() {
        let transport = ScriptedTransport::new(vec![Some(
            json!({"jsonrpc": "2.0", "id": 1, "result": {}}),
        )]);
        let mut correlator = Correlator::new(transport);

        let commands = vec![json!({"jsonrpc": "2.0", "id": 1, "method": "foo"})];
        let transcript = correlator.communicate(&commands, fast()).await.unwrap();

        assert!(!transcript.contains(&probe_key()));
        assert_eq!(transcript.len(), 1);
    }

    #[tokio::test]
    async fn drain_collects_bunched_notifications() {
        let transport = ScriptedTransport::new(vec![
            Some(json!({"jsonrpc": "2.0", "id": 1, "result": {}})),
            Some(json!({"jsonrpc": "2.0", "method": "telemetry/event", "params": {"n": 1}})),
            Some(json!({"jsonrpc": "2.0", "method": "telemetry/event", "params": {"n": 2}})),
        ]);
        let mut correlator = Correlator::new(transport);

        let commands = vec![json!({"jsonrpc": "2.0", "id": 1, "method": "foo"})];
        let transcript = correlator.communicate(&commands, fast()).await.unwrap();

        assert_eq!(transcript.len(), 3);
        let notify_count = transcript
            .iter()
            .filter(|(key, _)| key.is_server_notify())
            .count();
        assert_eq!(notify_count, 2);
    }

    #[tokio::test]
    async fn responses_interleaved_with_notifications_still_pair() {
        // Two requests; a notification lands between the responses, so the
        // request-response phase reads it instead of a response and the
        // second response arrives in the drain.
        let transport = ScriptedTransport::new(vec![
            Some(json!({"jsonrpc": "2.0", "id": 1, "result": {"a": 1}})),
            Some(json!({"jsonrpc": "2.0", "method": "baz", "params": {}})),
            Some(json!({"jsonrpc": "2.0", "id": 2, "result": {"b": 2}})),
        ]);
        let mut correlator = Correlator::new(transport);

        let commands = vec![
            json!({"jsonrpc": "2.0", "id": 1, "method": "foo"}),
            json!({"jsonrpc": "2.0", "id": 2, "method": "foo"}),
        ];
        let transcript = correlator.communicate(&commands, fast()).await.unwrap();

        assert_eq!(transcript.len(), 3);
        for id in [1, 2] {
            assert!(
                transcript
                    .get(&CorrelationKey::client_request(&json!(id)))
                    .unwrap()
                    .is_complete()
            );
        }
    }
}
