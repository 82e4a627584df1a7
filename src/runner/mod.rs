//! Runs the external CLI agent against a scope directory.
//!
//! Every call spawns one disposable child process: the prompt is written to
//! its stdin, stdout and stderr are captured while it runs, and the whole
//! process group is killed if it outlives the configured timeout.

pub mod launcher;

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Child;
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::paths::{PathError, PathResolver, TrustMode, display_path};

pub use launcher::{AgentInvocation, NativeShell, ProcessLauncher, WslBridge};

const REAP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("{0}")]
    InvalidInput(String),

    #[error(transparent)]
    Scope(PathError),

    #[error("Agent credential {0} is not set")]
    MissingCredential(String),

    #[error("Failed to start agent: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Agent timed out after {:?}", .0)]
    Timeout(Duration),

    #[error("Agent {} without output: {stderr}", exit_label(.code))]
    Failed { code: Option<i32>, stderr: String },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exited with code {code}"),
        None => "was terminated by a signal".to_string(),
    }
}

/// Exit-status policy for agent runs.
///
/// | output | exit code | verdict |
/// |--------|-----------|---------|
/// | yes    | any       | success |
/// | no     | 0         | success |
/// | no     | non-zero  | failure |
///
/// The agent can report a non-zero status after completing its work, so
/// output takes precedence over the status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitVerdict {
    Success,
    Failure,
}

impl ExitVerdict {
    pub fn decide(has_output: bool, exit_code: Option<i32>) -> Self {
        match (has_output, exit_code) {
            (true, _) => Self::Success,
            (false, Some(0)) => Self::Success,
            (false, _) => Self::Failure,
        }
    }
}

/// Captured output of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct AgentOutput {
    pub output: String,
    pub stderr: String,
}

#[derive(Debug)]
pub struct AgentRunner {
    paths: PathResolver,
    config: AgentConfig,
    launcher: Arc<dyn ProcessLauncher>,
    timeout: Duration,
}

impl AgentRunner {
    pub fn new(paths: PathResolver, config: AgentConfig, launcher: Arc<dyn ProcessLauncher>) -> Self {
        let timeout = config.timeout();
        Self {
            paths,
            config,
            launcher,
            timeout,
        }
    }

    /// Override the configured wall-clock limit.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn launcher_name(&self) -> &'static str {
        self.launcher.name()
    }

    /// Run the agent with `prompt` on stdin inside `scope_directory`.
    ///
    /// All preconditions are checked before anything is spawned.
    pub async fn execute(
        &self,
        prompt: &str,
        scope_directory: &str,
    ) -> Result<AgentOutput, RunnerError> {
        if prompt.trim().is_empty() {
            return Err(RunnerError::InvalidInput("prompt is required".to_string()));
        }
        if scope_directory.trim().is_empty() {
            return Err(RunnerError::InvalidInput(
                "scopeDirectory is required".to_string(),
            ));
        }

        let scope = self
            .paths
            .validate(scope_directory, TrustMode::TrustedExternal)
            .map_err(RunnerError::Scope)?;
        self.ensure_credential()?;

        let invocation = AgentInvocation {
            program: &self.config.program,
            args: &self.config.args,
            credential_env: &self.config.credential_env,
        };

        let mut command = self.launcher.command(&scope, &invocation);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        info!(
            "Running agent via {} in {} ({} byte prompt)",
            self.launcher.name(),
            display_path(&scope),
            prompt.len()
        );

        let mut child = command.spawn().map_err(RunnerError::Spawn)?;
        let timeout = self.timeout;

        let (status, stdout, stderr) =
            match tokio::time::timeout(timeout, communicate(&mut child, prompt)).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!("Agent exceeded {:?}, killing it", timeout);
                    terminate(&mut child).await;
                    return Err(RunnerError::Timeout(timeout));
                }
            };

        let has_output = !stdout.trim().is_empty() || !stderr.trim().is_empty();
        let code = status.code();

        match ExitVerdict::decide(has_output, code) {
            ExitVerdict::Success => {
                if code != Some(0) {
                    debug!("Agent {} but produced output, accepting", exit_label(&code));
                }
                Ok(AgentOutput {
                    output: stdout.trim_end().to_string(),
                    stderr: stderr.trim_end().to_string(),
                })
            }
            ExitVerdict::Failure => {
                warn!("Agent {} without output", exit_label(&code));
                Err(RunnerError::Failed {
                    code,
                    stderr: stderr.trim_end().to_string(),
                })
            }
        }
    }

    fn ensure_credential(&self) -> Result<(), RunnerError> {
        let name = &self.config.credential_env;
        match std::env::var(name) {
            Ok(value) if !value.trim().is_empty() => Ok(()),
            _ => {
                warn!("Refusing to run agent: {} is not set", name);
                Err(RunnerError::MissingCredential(name.clone()))
            }
        }
    }
}

/// Feed the prompt, then collect both output streams and the exit status.
async fn communicate(
    child: &mut Child,
    prompt: &str,
) -> Result<(ExitStatus, String, String), RunnerError> {
    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let feed = async move {
        let Some(mut stdin) = stdin else {
            return;
        };
        if let Err(err) = stdin.write_all(prompt.as_bytes()).await {
            // The agent may exit without reading its input.
            debug!("Writing prompt to agent stdin failed: {}", err);
        }
        // Dropping stdin closes the pipe.
    };

    let ((), stdout, stderr) = tokio::join!(feed, read_stream(stdout), read_stream(stderr));

    let status = child.wait().await.map_err(RunnerError::Spawn)?;
    Ok((status, stdout, stderr))
}

async fn read_stream<R: AsyncRead + Unpin>(stream: Option<R>) -> String {
    let Some(mut stream) = stream else {
        return String::new();
    };
    let mut buf = Vec::new();
    if let Err(err) = stream.read_to_end(&mut buf).await {
        debug!("Reading agent output failed: {}", err);
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Kill the child and anything it spawned, then reap it.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // The child leads its own process group; a negative pid targets the group.
        unsafe {
            libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
        }
    }

    if let Err(err) = child.start_kill() {
        debug!("start_kill after timeout: {}", err);
    }

    match tokio::time::timeout(REAP_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) => debug!("Agent reaped after timeout: {}", status),
        Ok(Err(err)) => warn!("Error waiting for killed agent: {}", err),
        Err(_) => warn!("Timeout waiting for killed agent to exit"),
    }
}
