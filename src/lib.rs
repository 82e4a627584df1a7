//! Local bridge between the prompt pipeline editor and the host machine.
//!
//! The browser reaches the filesystem and the external CLI agent only
//! through this server. Every path goes through [`paths::PathResolver`],
//! every request through [`rate_limit::RateLimiter`].

pub mod config;
pub mod error;
pub mod handlers;
pub mod paths;
pub mod rate_limit;
pub mod routes;
pub mod runner;
pub mod schema;
pub mod watcher;

use std::path::PathBuf;
use std::sync::Arc;

pub use config::Config;
pub use error::BridgeError;

use paths::PathResolver;
use rate_limit::RateLimiter;
use runner::{AgentRunner, ProcessLauncher};
use watcher::DirectoryWatcherManager;

/// Server context shared across handlers.
///
/// Each instance owns its own registries, so isolated instances can coexist.
#[derive(Clone)]
pub struct AppState {
    /// Project root; the sandbox boundary
    pub root_dir: PathBuf,
    pub config: Arc<Config>,
    pub paths: PathResolver,
    pub watchers: Arc<DirectoryWatcherManager>,
    pub rate_limiter: Arc<RateLimiter>,
    pub runner: Arc<AgentRunner>,
}

impl AppState {
    pub fn new(root_dir: PathBuf, config: Config, launcher: Arc<dyn ProcessLauncher>) -> Self {
        let paths = PathResolver::new(&root_dir);
        let watchers = DirectoryWatcherManager::new(paths.clone());
        let rate_limiter = RateLimiter::from_config(&config.rate_limit);
        let runner = AgentRunner::new(paths.clone(), config.agent.clone(), launcher);

        Self {
            root_dir,
            config: Arc::new(config),
            paths,
            watchers: Arc::new(watchers),
            rate_limiter: Arc::new(rate_limiter),
            runner: Arc::new(runner),
        }
    }

    /// Replace the agent runner, e.g. to shorten its timeout.
    pub fn with_runner(mut self, runner: AgentRunner) -> Self {
        self.runner = Arc::new(runner);
        self
    }

    /// Release every OS resource held by this instance.
    pub async fn shutdown(&self) {
        self.watchers.shutdown().await;
    }
}
