//! Session handle — owns the language client child process and scripts
//! conversations against its pipes.

use std::process::Stdio;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::process::{Child, ChildStdin, Command};

use scribe_transcript::Transcript;

use crate::correlator::{Correlator, ProbePolicy, Timeouts};
use crate::transport::FramedTransport;

const DEFAULT_COMMAND: &str = "hh_client";

/// How to launch the language client process.
///
/// The argument set is fixed: the `lsp` subcommand with enhanced hover
/// always on, plus `--serverless-ide` when requested. When `envs` is set it
/// replaces the child's entire environment.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    command: Option<String>,
    serverless_ide: bool,
    envs: Option<Vec<(String, String)>>,
    probe_policy: ProbePolicy,
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the client executable (default `hh_client`).
    #[must_use]
    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Run the server in serverless IDE mode.
    #[must_use]
    pub fn serverless_ide(mut self, enabled: bool) -> Self {
        self.serverless_ide = enabled;
        self
    }

    /// Replace the child's environment with exactly these variables.
    #[must_use]
    pub fn envs(mut self, envs: Vec<(String, String)>) -> Self {
        self.envs = Some(envs);
        self
    }

    /// Bound the readiness probe (unbounded by default).
    #[must_use]
    pub fn probe_policy(mut self, policy: ProbePolicy) -> Self {
        self.probe_policy = policy;
        self
    }

    fn command_name(&self) -> &str {
        self.command.as_deref().unwrap_or(DEFAULT_COMMAND)
    }

    fn args(&self) -> Vec<&'static str> {
        let mut args = vec!["lsp", "--enhanced-hover"];
        if self.serverless_ide {
            args.push("--serverless-ide");
        }
        args
    }
}

/// A live scripted-LSP session over one child process.
///
/// `communicate` may be called repeatedly against the same process. The
/// child is spawned with `kill_on_drop`, so its pipes and the process
/// itself are torn down on every exit path, including panics and early
/// returns. A scripted command that reuses the probe's sentinel id `-1`
/// collides with probe bookkeeping and is stripped from returned
/// transcripts; avoid it.
pub struct LspSession {
    child: Child,
    correlator: Correlator<FramedTransport<ChildStdin>>,
}

impl LspSession {
    /// Spawn the language client and wire its stdio up as the transport.
    pub async fn start(config: &SessionConfig) -> Result<Self> {
        let command_name = config.command_name();
        let resolved = which::which(command_name)
            .with_context(|| format!("{command_name} not found in PATH"))?;

        let mut command = Command::new(&resolved);
        command
            .args(config.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(envs) = &config.envs {
            command.env_clear();
            command.envs(envs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }

        let mut child = command
            .spawn()
            .with_context(|| format!("spawning {command_name}"))?;
        tracing::debug!(command = command_name, "language client started");

        let stdout = child.stdout.take().context("no stdout from child")?;
        let stdin = child.stdin.take().context("no stdin from child")?;
        let transport = FramedTransport::new(stdout, stdin);

        Ok(Self {
            child,
            correlator: Correlator::with_probe_policy(transport, config.probe_policy),
        })
    }

    /// Run one scripted conversation against the live process.
    pub async fn communicate(
        &mut self,
        json_commands: &[Value],
        timeouts: Timeouts,
    ) -> Result<Transcript> {
        self.correlator.communicate(json_commands, timeouts).await
    }

    /// Tear the session down, killing the child if it is still running.
    pub async fn shutdown(mut self) -> Result<()> {
        self.child.kill().await.context("killing language client")?;
        let status = self.child.wait().await.context("reaping language client")?;
        tracing::debug!(?status, "language client exited");
        Ok(())
    }
}
