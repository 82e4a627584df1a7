use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Maximum size for file reads and writes (in bytes)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Maximum depth for recursive scope listings
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Directories skipped by recursive scope listings
    #[serde(default = "default_hidden_dirs")]
    pub hidden_dirs: Vec<String>,

    /// Directory (relative to the project root) holding saved specifications
    #[serde(default = "default_specs_dir")]
    pub specs_dir: String,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub agent: AgentConfig,
}

/// Per-client request budget
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Window length in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Requests admitted per window
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    /// Interval between sweeps of expired client records
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

/// Which command bridge to use for the external agent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LauncherKind {
    /// Probe the host once at startup
    #[default]
    Auto,
    /// Run the agent through the host shell
    Native,
    /// Run the agent inside the Linux subsystem on Windows
    Wsl,
}

/// External agent invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent executable name
    #[serde(default = "default_agent_program")]
    pub program: String,

    /// Arguments passed to the agent. The prompt always goes through stdin.
    #[serde(default = "default_agent_args")]
    pub args: Vec<String>,

    /// Environment variable holding the credential the agent needs
    #[serde(default = "default_credential_env")]
    pub credential_env: String,

    /// Wall-clock limit for one agent run
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub launcher: LauncherKind,
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024 // 10 MB
}

fn default_max_depth() -> usize {
    20
}

fn default_hidden_dirs() -> Vec<String> {
    vec![
        ".git".to_string(),
        "node_modules".to_string(),
        "__pycache__".to_string(),
        ".cache".to_string(),
        "target".to_string(),
        ".venv".to_string(),
        "venv".to_string(),
    ]
}

fn default_specs_dir() -> String {
    "specs".to_string()
}

fn default_window_ms() -> u64 {
    60_000
}

fn default_max_requests() -> u32 {
    120
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

fn default_agent_program() -> String {
    "claude".to_string()
}

fn default_agent_args() -> Vec<String> {
    vec!["--print".to_string()]
}

fn default_credential_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            max_depth: default_max_depth(),
            hidden_dirs: default_hidden_dirs(),
            specs_dir: default_specs_dir(),
            rate_limit: RateLimitConfig::default(),
            agent: AgentConfig::default(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            max_requests: default_max_requests(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            program: default_agent_program(),
            args: default_agent_args(),
            credential_env: default_credential_env(),
            timeout_secs: default_timeout_secs(),
            launcher: LauncherKind::default(),
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Check if a directory should be skipped by recursive listings
    pub fn is_hidden_dir(&self, name: &str) -> bool {
        self.hidden_dirs.iter().any(|d| d == name)
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}

impl AgentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
