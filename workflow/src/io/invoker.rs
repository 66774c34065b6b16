//! Invoker abstraction for external generation calls.
//!
//! The [`Invoker`] trait decouples the role adapters from the program that
//! actually generates text. [`CommandInvoker`] spawns the configured command;
//! tests use scripted invokers that return canned responses.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::core::types::{Role, TerminationSignal};
use crate::io::process::run_command;

/// Parameters for one generation call.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    pub role: Role,
    /// Prompt text fed to the program on stdin.
    pub prompt: String,
    /// Working directory of the program (the session scratch directory).
    pub workdir: PathBuf,
    /// Where the program may write its final message. Falls back to stdout.
    pub output_path: PathBuf,
    pub timeout: Duration,
    /// Truncate captured output beyond this many bytes.
    pub output_limit_bytes: usize,
    pub cancel: CancelToken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeResponse {
    pub text: String,
    /// Termination side channel. Absence means no signal.
    pub signal: Option<TerminationSignal>,
}

impl InvokeResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            signal: None,
        }
    }
}

pub trait Invoker {
    fn invoke(&self, request: &InvokeRequest) -> Result<InvokeResponse>;
}

/// Invoker that spawns an external command per call.
#[derive(Debug, Clone)]
pub struct CommandInvoker {
    command: Vec<String>,
}

impl CommandInvoker {
    pub fn new(command: Vec<String>) -> Result<Self> {
        if command.first().is_none_or(|program| program.trim().is_empty()) {
            bail!("invoker command must not be empty");
        }
        Ok(Self { command })
    }

    fn build(&self, request: &InvokeRequest) -> Command {
        let args: Vec<String> = self
            .command
            .iter()
            .map(|arg| substitute(arg, request.role, &request.output_path))
            .collect();
        let mut cmd = Command::new(&args[0]);
        cmd.args(&args[1..])
            .current_dir(&request.workdir)
            .env("WORKFLOW_ROLE", request.role.as_str())
            .env("WORKFLOW_OUTPUT", &request.output_path);
        cmd
    }
}

impl Invoker for CommandInvoker {
    #[instrument(skip_all, fields(role = %request.role, timeout_secs = request.timeout.as_secs()))]
    fn invoke(&self, request: &InvokeRequest) -> Result<InvokeResponse> {
        info!(workdir = %request.workdir.display(), "starting generation call");

        if let Some(parent) = request.output_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create output dir {}", parent.display()))?;
        }
        if request.output_path.exists() {
            fs::remove_file(&request.output_path).with_context(|| {
                format!("remove stale output {}", request.output_path.display())
            })?;
        }

        let output = run_command(
            self.build(request),
            Some(request.prompt.as_bytes()),
            request.timeout,
            request.output_limit_bytes,
            &request.cancel,
        )
        .with_context(|| format!("run {} for {}", self.command[0], request.role))?;

        if output.cancelled {
            bail!("{} call cancelled", request.role);
        }
        if output.timed_out {
            warn!("generation call timed out");
            return Err(anyhow!(
                "{} call timed out after {:?}",
                request.role,
                request.timeout
            ));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "generation call failed");
            return Err(anyhow!(
                "{} exited with status {:?}: {}",
                self.command[0],
                output.status.code(),
                output.stderr_tail(500)
            ));
        }

        let raw = if request.output_path.exists() {
            read_output(&request.output_path)?
        } else {
            output.stdout_lossy()
        };
        let response = parse_response(&raw);
        debug!(bytes = response.text.len(), signal = response.signal.is_some(), "generation call completed");
        Ok(response)
    }
}

fn substitute(arg: &str, role: Role, output_path: &Path) -> String {
    arg.replace("{role}", role.as_str())
        .replace("{output}", &output_path.to_string_lossy())
}

fn read_output(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("read call output {}", path.display()))
}

/// Split a raw response into text and the termination side channel.
///
/// A response that is a JSON object with a string `text` field carries the
/// side channel in `approve`; only the literal `true` raises the signal.
/// Anything else is plain text with no signal.
pub fn parse_response(raw: &str) -> InvokeResponse {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw.trim())
        && let Some(Value::String(text)) = map.get("text")
    {
        let signal = matches!(map.get("approve"), Some(Value::Bool(true))).then_some(TerminationSignal);
        return InvokeResponse {
            text: text.clone(),
            signal,
        };
    }
    InvokeResponse::text(raw)
}
