use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;

use super::events::ProgressBus;
use super::models::BuildProgressEvent;

/// Terminal result of one agent invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentOutcome {
    Completed {
        output: String,
    },
    Failed {
        error: String,
        output: String,
    },
    /// The agent paused mid-run and asked a clarifying question. The run
    /// is no longer progressing; the Interactive Session Manager takes
    /// over until a human answer arrives.
    NeedsInput {
        question: String,
        options: Vec<String>,
        output: String,
    },
}

/// One parsed line of agent stdout.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    Message(String),
    AwaitingInput {
        question: String,
        options: Vec<String>,
    },
}

pub struct OutputParser;

impl OutputParser {
    /// Parse a single line of agent stdout.
    ///
    /// The waiting-for-input marker comes in two shapes:
    /// 1. A JSON line: `{"type":"awaiting_input","question":"...","options":[...]}`
    /// 2. An inline tag: `<awaiting-input>question text</awaiting-input>`
    /// Everything else is a plain progress message.
    pub fn parse_line(line: &str) -> ParsedLine {
        let trimmed = line.trim();

        if trimmed.starts_with('{')
            && let Ok(parsed) = serde_json::from_str::<serde_json::Value>(trimmed)
            && parsed.get("type").and_then(|t| t.as_str()) == Some("awaiting_input")
        {
            let question = parsed
                .get("question")
                .and_then(|q| q.as_str())
                .unwrap_or("")
                .to_string();
            let options = parsed
                .get("options")
                .and_then(|o| o.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default();
            return ParsedLine::AwaitingInput { question, options };
        }

        const OPEN_TAG: &str = "<awaiting-input>";
        const CLOSE_TAG: &str = "</awaiting-input>";
        if let Some(start) = trimmed.find(OPEN_TAG) {
            let content_start = start + OPEN_TAG.len();
            let question = match trimmed.find(CLOSE_TAG) {
                Some(end) => &trimmed[content_start..end],
                None => &trimmed[content_start..],
            };
            return ParsedLine::AwaitingInput {
                question: question.trim().to_string(),
                options: Vec::new(),
            };
        }

        ParsedLine::Message(trimmed.to_string())
    }
}

/// Abstraction over agent invocation for testability.
/// Real implementation: `CliAgent`. Tests script outcomes directly.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Run the agent against a workspace with a composed prompt,
    /// streaming its output until it reaches a terminal result. No
    /// implicit timeout — build latency is open-ended by design; callers
    /// needing bounded latency cancel externally.
    async fn run(&self, project_id: &str, workspace: &Path, prompt: &str)
    -> Result<AgentOutcome>;

    /// Kill the agent process for a project, if one is running.
    /// Returns true if a process was found and signalled.
    async fn cancel(&self, project_id: &str) -> bool;
}

/// Invokes the external code-generation agent CLI.
pub struct CliAgent {
    program: String,
    bus: Arc<ProgressBus>,
    /// Map from project id to the running child, so cancellation can
    /// reach the process from another task.
    running: Arc<Mutex<HashMap<String, tokio::process::Child>>>,
}

impl CliAgent {
    pub fn new(program: impl Into<String>, bus: Arc<ProgressBus>) -> Self {
        Self {
            program: program.into(),
            bus,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl AgentRunner for CliAgent {
    async fn run(
        &self,
        project_id: &str,
        workspace: &Path,
        prompt: &str,
    ) -> Result<AgentOutcome> {
        let mut cmd = Command::new(&self.program);
        cmd.args(["--print", "--dangerously-skip-permissions", "-p", prompt])
            .current_dir(workspace)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn agent process '{}'", self.program))?;

        let stdout = child.stdout.take();

        {
            let mut running = self.running.lock().await;
            running.insert(project_id.to_string(), child);
        }

        // Stream stdout line by line, forwarding each chunk as a live
        // progress message and watching for the awaiting-input marker.
        let mut output = String::new();
        let mut awaiting: Option<(String, Vec<String>)> = None;
        if let Some(stdout) = stdout {
            let reader = BufReader::new(stdout);
            let mut lines = reader.lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match OutputParser::parse_line(&line) {
                    ParsedLine::Message(content) => {
                        if !content.is_empty() {
                            self.bus
                                .publish(BuildProgressEvent::message(project_id, &content));
                        }
                        output.push_str(&content);
                        output.push('\n');
                    }
                    ParsedLine::AwaitingInput { question, options } => {
                        tracing::info!(project = project_id, %question, "agent paused for input");
                        awaiting = Some((question, options));
                    }
                }
            }
        }

        let child = {
            let mut running = self.running.lock().await;
            running.remove(project_id)
        };
        let Some(mut child) = child else {
            // Removed by cancel() — the process was killed under us. The
            // pipeline re-checks the project status and discards this.
            return Ok(AgentOutcome::Failed {
                error: "Agent process terminated by cancellation".to_string(),
                output,
            });
        };

        // Capture stderr before waiting
        let stderr_content = if let Some(stderr) = child.stderr.take() {
            let mut content = String::new();
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                content.push_str(&line);
                content.push('\n');
            }
            content
        } else {
            String::new()
        };

        let status = child.wait().await.context("Failed to wait on agent")?;

        // A pause marker outranks the exit code: the agent exits after
        // asking and the continuation run picks the workspace back up.
        if let Some((question, options)) = awaiting {
            return Ok(AgentOutcome::NeedsInput {
                question,
                options,
                output,
            });
        }

        if status.success() {
            Ok(AgentOutcome::Completed { output })
        } else {
            let error = if stderr_content.trim().is_empty() {
                "Agent process exited with non-zero status".to_string()
            } else {
                stderr_content.trim().to_string()
            };
            Ok(AgentOutcome::Failed { error, output })
        }
    }

    async fn cancel(&self, project_id: &str) -> bool {
        let child = {
            let mut running = self.running.lock().await;
            running.remove(project_id)
        };
        match child {
            Some(mut child) => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(project = project_id, error = %e, "failed to kill agent process");
                }
                true
            }
            None => false,
        }
    }
}
