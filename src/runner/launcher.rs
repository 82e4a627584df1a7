//! Platform-specific construction of the agent command.
//!
//! The launcher is chosen once at startup by [`detect`]. Both launchers leave
//! stdio configuration to the runner so the prompt always travels over stdin.

use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info};

use crate::config::{AgentConfig, LauncherKind};
use crate::paths::display_path;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// What to run, independent of how the host runs it.
#[derive(Debug, Clone, Copy)]
pub struct AgentInvocation<'a> {
    pub program: &'a str,
    pub args: &'a [String],
    /// Environment variable that must reach the agent
    pub credential_env: &'a str,
}

pub trait ProcessLauncher: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Command that runs the agent with `scope` as its working directory.
    fn command(&self, scope: &Path, invocation: &AgentInvocation<'_>) -> Command;
}

/// Runs the agent through the host shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeShell;

impl ProcessLauncher for NativeShell {
    fn name(&self) -> &'static str {
        "native"
    }

    #[cfg(not(windows))]
    fn command(&self, scope: &Path, invocation: &AgentInvocation<'_>) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command_line(invocation, posix_quote))
            .current_dir(scope);
        cmd
    }

    #[cfg(windows)]
    fn command(&self, scope: &Path, invocation: &AgentInvocation<'_>) -> Command {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C")
            .arg(command_line(invocation, cmd_quote))
            .current_dir(scope);
        cmd
    }
}

/// Runs the agent inside the Linux subsystem on a Windows host.
#[derive(Debug, Clone, Copy, Default)]
pub struct WslBridge;

impl ProcessLauncher for WslBridge {
    fn name(&self) -> &'static str {
        "wsl"
    }

    fn command(&self, scope: &Path, invocation: &AgentInvocation<'_>) -> Command {
        let mut cmd = Command::new("wsl.exe");
        cmd.arg("--cd")
            .arg(to_wsl_path(&display_path(scope)))
            .arg("--")
            .arg("bash")
            .arg("-lc")
            .arg(command_line(invocation, posix_quote));

        let existing = std::env::var("WSLENV").ok();
        cmd.env(
            "WSLENV",
            merge_wslenv(existing.as_deref(), invocation.credential_env),
        );
        cmd
    }
}

/// Pick the launcher for this host.
pub async fn detect(config: &AgentConfig) -> Arc<dyn ProcessLauncher> {
    let launcher: Arc<dyn ProcessLauncher> = match config.launcher {
        LauncherKind::Native => Arc::new(NativeShell),
        LauncherKind::Wsl => Arc::new(WslBridge),
        LauncherKind::Auto => {
            if cfg!(windows)
                && !probe("where", &[config.program.as_str()]).await
                && probe("wsl.exe", &["--", "which", config.program.as_str()]).await
            {
                Arc::new(WslBridge)
            } else {
                Arc::new(NativeShell)
            }
        }
    };

    info!(
        "Agent launcher: {} (program: {})",
        launcher.name(),
        config.program
    );
    launcher
}

async fn probe(program: &str, args: &[&str]) -> bool {
    let status = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status();

    match tokio::time::timeout(PROBE_TIMEOUT, status).await {
        Ok(Ok(status)) => status.success(),
        Ok(Err(err)) => {
            debug!("Probe {} {:?} failed: {}", program, args, err);
            false
        }
        Err(_) => {
            debug!("Probe {} {:?} timed out", program, args);
            false
        }
    }
}

fn command_line(invocation: &AgentInvocation<'_>, quote: fn(&str) -> String) -> String {
    std::iter::once(invocation.program)
        .chain(invocation.args.iter().map(String::as_str))
        .map(quote)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Translate a drive-letter path (`C:\x` or `C:/x`) to its `/mnt/c/x` mount.
/// Paths without a drive letter are returned with forward slashes.
pub fn to_wsl_path(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let unified = unified.strip_prefix("//?/").unwrap_or(&unified);

    let bytes = unified.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        let drive = (bytes[0] as char).to_ascii_lowercase();
        let rest = unified[2..].trim_matches('/');
        if rest.is_empty() {
            format!("/mnt/{drive}")
        } else {
            format!("/mnt/{drive}/{rest}")
        }
    } else {
        unified.to_string()
    }
}

/// Add `name` to a WSLENV list if it is not already forwarded.
fn merge_wslenv(existing: Option<&str>, name: &str) -> String {
    let existing = existing.unwrap_or_default();
    let forwarded = existing
        .split(':')
        .any(|entry| entry.split('/').next() == Some(name));

    if forwarded || name.is_empty() {
        existing.to_string()
    } else if existing.is_empty() {
        name.to_string()
    } else {
        format!("{existing}:{name}")
    }
}

fn posix_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./=:,+@%".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

#[cfg(windows)]
fn cmd_quote(arg: &str) -> String {
    if !arg.is_empty() && !arg.contains([' ', '\t', '"', '&', '|', '<', '>', '^']) {
        arg.to_string()
    } else {
        format!("\"{}\"", arg.replace('"', "\"\""))
    }
}
