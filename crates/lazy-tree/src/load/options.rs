//! Configuration for choosing and building a task runner.
//!
//! `RunnerOptions` selects which executor runs load jobs. Options can be
//! built in code with the builder methods, or read from the environment:
//!
//! - `LAZY_TREE_RUNNER`: `thread`, `rayon` or `inline`
//! - `LAZY_TREE_THREADS`: size of a dedicated rayon pool

use crate::load::runner::{InlineRunner, RayonRunner, TaskRunner, ThreadRunner};
use anyhow::{bail, Context};
use derive_more::Display;
use log::{debug, warn};
use std::str::FromStr;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Environment variable selecting the runner kind
pub const RUNNER_ENV: &str = "LAZY_TREE_RUNNER";

/// Environment variable setting the rayon pool size
pub const THREADS_ENV: &str = "LAZY_TREE_THREADS";

/// Default prefix for load thread names
pub const DEFAULT_THREAD_NAME: &str = "lazy-tree-load";

/// Which executor runs load jobs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RunnerKind {
    /// A dedicated OS thread per load
    #[default]
    #[display(fmt = "thread")]
    Thread,
    /// A rayon pool
    #[display(fmt = "rayon")]
    Rayon,
    /// The thread calling `load()`
    #[display(fmt = "inline")]
    Inline,
}

impl FromStr for RunnerKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "thread" => Ok(RunnerKind::Thread),
            "rayon" => Ok(RunnerKind::Rayon),
            "inline" => Ok(RunnerKind::Inline),
            other => bail!("unknown runner kind {:?}", other),
        }
    }
}

/// Options controlling how load jobs are executed
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RunnerOptions {
    /// The executor to build
    pub kind: RunnerKind,

    /// Thread name prefix for `Thread` runners and dedicated rayon pools
    pub thread_name: String,

    /// Size of a dedicated rayon pool; `None` uses rayon's global pool
    pub num_threads: Option<usize>,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            kind: RunnerKind::default(),
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            num_threads: None,
        }
    }
}

impl RunnerOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `LAZY_TREE_RUNNER` and `LAZY_TREE_THREADS`
    ///
    /// Invalid values are logged and ignored.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(value) = lookup(RUNNER_ENV) {
            match value.parse() {
                Ok(kind) => self.kind = kind,
                Err(err) => warn!("ignoring {}: {:#}", RUNNER_ENV, err),
            }
        }
        if let Some(value) = lookup(THREADS_ENV) {
            match value.trim().parse::<usize>() {
                Ok(0) => warn!("ignoring {}: must be at least 1", THREADS_ENV),
                Ok(n) => self.num_threads = Some(n),
                Err(err) => warn!("ignoring {}={:?}: {}", THREADS_ENV, value, err),
            }
        }
        self
    }

    /// Set the runner kind.
    pub fn kind(mut self, kind: RunnerKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set the thread name prefix.
    pub fn thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }

    /// Use a dedicated rayon pool of `num_threads` threads.
    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = Some(num_threads);
        self
    }

    /// Build the configured runner
    pub fn build(&self) -> anyhow::Result<Arc<dyn TaskRunner>> {
        debug!("building {} runner", self.kind);
        let runner: Arc<dyn TaskRunner> = match self.kind {
            RunnerKind::Thread => Arc::new(ThreadRunner::new(self.thread_name.clone())),
            RunnerKind::Inline => Arc::new(InlineRunner),
            RunnerKind::Rayon => match self.num_threads {
                None => Arc::new(RayonRunner::global()),
                Some(num_threads) => {
                    let prefix = self.thread_name.clone();
                    let pool = rayon::ThreadPoolBuilder::new()
                        .num_threads(num_threads)
                        .thread_name(move |index| format!("{}-{}", prefix, index))
                        .build()
                        .context("failed to build rayon pool for load jobs")?;
                    Arc::new(RayonRunner::with_pool(Arc::new(pool)))
                }
            },
        };
        Ok(runner)
    }
}
