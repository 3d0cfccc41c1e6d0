//! Executors that run load jobs

use log::{trace, warn};
use std::fmt;
use std::sync::Arc;
use std::thread;

/// The work behind a [`LoadJob`]
pub(crate) trait JobBody: Send {
    /// Run the loader and the task's completion handling
    fn run(self: Box<Self>);
    /// Complete the task as failed without running the loader
    fn abandon(self: Box<Self>);
}

/// A load ready to execute, run at most once
///
/// A runner should call [`run`](Self::run) exactly once. Dropping a job
/// without running it fails the task, so the owning node never stays stuck in
/// the loading state.
pub struct LoadJob {
    task_id: u64,
    body: Option<Box<dyn JobBody>>,
}

impl LoadJob {
    pub(crate) fn new(task_id: u64, body: Box<dyn JobBody>) -> Self {
        Self {
            task_id,
            body: Some(body),
        }
    }

    /// Id of the task this job belongs to
    pub fn task_id(&self) -> u64 {
        self.task_id
    }

    /// Execute the load on the current thread
    pub fn run(mut self) {
        if let Some(body) = self.body.take() {
            trace!("running load job for task {}", self.task_id);
            body.run();
        }
    }
}

impl Drop for LoadJob {
    fn drop(&mut self) {
        if let Some(body) = self.body.take() {
            warn!("load job for task {} dropped before it ran", self.task_id);
            body.abandon();
        }
    }
}

impl fmt::Debug for LoadJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadJob")
            .field("task_id", &self.task_id)
            .field("pending", &self.body.is_some())
            .finish()
    }
}

/// Something that executes load jobs
///
/// Implementations decide where a job runs (a thread pool, a dedicated thread,
/// the caller's thread) but must not run a job twice.
pub trait TaskRunner: Send + Sync {
    /// Arrange for `job` to run
    fn spawn(&self, job: LoadJob);
}

impl<R: TaskRunner + ?Sized> TaskRunner for Arc<R> {
    fn spawn(&self, job: LoadJob) {
        (**self).spawn(job)
    }
}

/// Runs every job on its own named OS thread
#[derive(Debug, Clone)]
pub struct ThreadRunner {
    name_prefix: String,
}

impl ThreadRunner {
    /// Create a runner whose threads are named `<prefix>-<task id>`
    pub fn new(name_prefix: impl Into<String>) -> Self {
        Self {
            name_prefix: name_prefix.into(),
        }
    }
}

impl Default for ThreadRunner {
    fn default() -> Self {
        Self::new(super::options::DEFAULT_THREAD_NAME)
    }
}

impl TaskRunner for ThreadRunner {
    fn spawn(&self, job: LoadJob) {
        let name = format!("{}-{}", self.name_prefix, job.task_id());
        // On failure the closure, and with it the job, is dropped, which fails
        // the task.
        if let Err(err) = thread::Builder::new()
            .name(name)
            .spawn(move || job.run())
        {
            warn!("failed to spawn load thread: {}", err);
        }
    }
}

/// Runs jobs on a rayon thread pool
#[derive(Debug, Clone, Default)]
pub struct RayonRunner {
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl RayonRunner {
    /// Use rayon's global pool
    pub fn global() -> Self {
        Self { pool: None }
    }

    /// Use a dedicated pool
    pub fn with_pool(pool: Arc<rayon::ThreadPool>) -> Self {
        Self { pool: Some(pool) }
    }
}

impl TaskRunner for RayonRunner {
    fn spawn(&self, job: LoadJob) {
        match &self.pool {
            Some(pool) => pool.spawn(move || job.run()),
            None => rayon::spawn(move || job.run()),
        }
    }
}

/// Runs jobs synchronously on the calling thread
///
/// With this runner `load()` returns only after the load finished. Intended
/// for tests and scripts.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineRunner;

impl TaskRunner for InlineRunner {
    fn spawn(&self, job: LoadJob) {
        job.run();
    }
}
