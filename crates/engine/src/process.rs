//! Subprocess-backed runner.
//!
//! Spawns the configured agent command and speaks JSON lines over stdio:
//! requests (`{"op":"prompt",...}`, `{"op":"interrupt"}`) on stdin,
//! [`RunnerEvent`]s on stdout. stderr is forwarded to the log.

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use tr_domain::{Error, Result};

use crate::runner::{AgentRunner, PromptRequest, RunnerEvent, RunnerFactory};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire requests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum WireRequest<'a> {
    Prompt {
        #[serde(flatten)]
        req: &'a PromptRequest,
    },
    Interrupt,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Process runner
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ProcessRunner {
    child: Child,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
}

impl ProcessRunner {
    async fn write_request(&mut self, req: &WireRequest<'_>) -> Result<()> {
        let mut line = serde_json::to_string(req)?;
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl AgentRunner for ProcessRunner {
    async fn send_prompt(&mut self, req: PromptRequest) -> Result<()> {
        self.write_request(&WireRequest::Prompt { req: &req }).await
    }

    async fn next_event(&mut self) -> Result<Option<RunnerEvent>> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<RunnerEvent>(line) {
                Ok(event) => return Ok(Some(event)),
                Err(e) => {
                    // Tolerate garbage on stdout; the stream continues.
                    tracing::warn!(error = %e, "skipping unparsable engine line");
                }
            }
        }
    }

    async fn interrupt(&mut self) -> Result<()> {
        self.write_request(&WireRequest::Interrupt).await
    }

    async fn disconnect(&mut self) {
        // Closing stdin asks the agent to exit; kill covers the rest.
        let _ = self.stdin.shutdown().await;
        let _ = self.child.kill().await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Factory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Spawns the configured agent command for each new runner.
pub struct ProcessRunnerFactory {
    command: String,
    args: Vec<String>,
}

impl ProcessRunnerFactory {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self { command: command.into(), args }
    }

    pub fn from_config(cfg: &tr_domain::config::EngineConfig) -> Self {
        Self::new(cfg.command.clone(), cfg.args.clone())
    }
}

#[async_trait]
impl RunnerFactory for ProcessRunnerFactory {
    async fn create(&self) -> Result<Box<dyn AgentRunner>> {
        if self.command.is_empty() {
            return Err(Error::Internal("engine command not configured".into()));
        }

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Internal(format!("spawning agent subprocess: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Internal("agent subprocess has no stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("agent subprocess has no stdout".into()))?;

        // Forward stderr into the log so agent failures are diagnosable.
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "engine", "{line}");
                }
            });
        }

        tracing::debug!(command = %self.command, "agent subprocess spawned");

        Ok(Box::new(ProcessRunner {
            child,
            stdin,
            lines: BufReader::new(stdout).lines(),
        }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
