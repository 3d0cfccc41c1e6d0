//! A single load attempt for a lazy node

use crate::error::Cancelled;
use crate::load::fanout::ProgressFanout;
use crate::load::runner::{JobBody, LoadJob, TaskRunner};
use crate::tree::{LazyTreeNode, NodeInner, TreeNode};
use anyhow::anyhow;
use derive_more::Display;
use log::{debug, warn};
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// What a loader reports when it returns normally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum LoadOutcome {
    /// The children were loaded
    #[display(fmt = "Completed")]
    Completed,
    /// The loader noticed a cancellation request and stopped early
    #[display(fmt = "Cancelled")]
    Cancelled,
}

/// Lifecycle state of a [`LoadTask`], without the failure cause
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TaskState {
    /// Created but not yet handed to a runner
    #[display(fmt = "Pending")]
    Pending,
    /// Handed to a runner; the loader may be executing
    #[display(fmt = "Running")]
    Running,
    /// The loader completed
    #[display(fmt = "Succeeded")]
    Succeeded,
    /// The loader returned an error or panicked
    #[display(fmt = "Failed")]
    Failed,
    /// The loader honoured a cancellation request
    #[display(fmt = "Cancelled")]
    Cancelled,
}

impl TaskState {
    /// Returns true for `Succeeded`, `Failed` and `Cancelled`
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Cancelled
        )
    }
}

/// Status of a [`LoadTask`], carrying the cause of a failure
#[derive(Debug, Clone, Display)]
pub enum TaskStatus {
    #[display(fmt = "Pending")]
    Pending,
    #[display(fmt = "Running")]
    Running,
    #[display(fmt = "Succeeded")]
    Succeeded,
    /// The loader failed; the cause is kept for inspection
    #[display(fmt = "Failed: {:#}", _0)]
    Failed(Arc<anyhow::Error>),
    #[display(fmt = "Cancelled")]
    Cancelled,
}

impl TaskStatus {
    /// The state without its payload
    pub fn state(&self) -> TaskState {
        match self {
            TaskStatus::Pending => TaskState::Pending,
            TaskStatus::Running => TaskState::Running,
            TaskStatus::Succeeded => TaskState::Succeeded,
            TaskStatus::Failed(_) => TaskState::Failed,
            TaskStatus::Cancelled => TaskState::Cancelled,
        }
    }

    /// Returns true once the task can no longer change
    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// The failure cause, if the task failed
    pub fn error(&self) -> Option<&anyhow::Error> {
        match self {
            TaskStatus::Failed(err) => Some(err.as_ref()),
            _ => None,
        }
    }

    fn from_result(result: std::thread::Result<anyhow::Result<LoadOutcome>>) -> Self {
        match result {
            Ok(Ok(LoadOutcome::Completed)) => TaskStatus::Succeeded,
            Ok(Ok(LoadOutcome::Cancelled)) => TaskStatus::Cancelled,
            Ok(Err(err)) if err.is::<Cancelled>() => TaskStatus::Cancelled,
            Ok(Err(err)) => TaskStatus::Failed(Arc::new(err)),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!("loader panicked: {}", message);
                TaskStatus::Failed(Arc::new(anyhow!("loader panicked: {}", message)))
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

type CompletionCallback = Box<dyn FnOnce(&TaskStatus) + Send>;

struct TaskCell {
    status: TaskStatus,
    callbacks: Vec<CompletionCallback>,
}

pub(crate) struct TaskInner<V> {
    id: u64,
    owner: Weak<NodeInner<V>>,
    fanout: ProgressFanout,
    finished: AtomicBool,
    cell: Mutex<TaskCell>,
}

/// One execution attempt of a lazy node's loader
///
/// Handles are cheap to clone and compare by identity. A task that reached a
/// terminal status is inert but stays inspectable through any handle still
/// held.
pub struct LoadTask<V> {
    inner: Arc<TaskInner<V>>,
}

impl<V> Clone for LoadTask<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> LoadTask<V> {
    pub(crate) fn new(owner: Weak<NodeInner<V>>) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
                owner,
                fanout: ProgressFanout::new(),
                finished: AtomicBool::new(false),
                cell: Mutex::new(TaskCell {
                    status: TaskStatus::Pending,
                    callbacks: Vec::new(),
                }),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<TaskInner<V>>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Arc<TaskInner<V>> {
        &self.inner
    }

    /// Process-unique id, increasing in creation order
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Returns true if both handles refer to the same task
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Current status
    pub fn status(&self) -> TaskStatus {
        self.inner.cell.lock().status.clone()
    }

    /// Current state without the failure cause
    pub fn state(&self) -> TaskState {
        self.inner.cell.lock().status.state()
    }

    /// Returns true once the task reached a terminal status
    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// The progress fan-out observers can attach to
    pub fn fanout(&self) -> &ProgressFanout {
        &self.inner.fanout
    }

    /// Request cooperative cancellation of the load
    pub fn cancel(&self) {
        debug!("cancel requested for load task {}", self.inner.id);
        self.inner.fanout.request_cancel();
    }

    /// The node this task loads, if it is still alive
    pub fn owner(&self) -> Option<TreeNode<V>> {
        self.inner.owner.upgrade().map(TreeNode::from_inner)
    }

    /// Register `callback` to run once with the terminal status
    ///
    /// If the task already finished, `callback` runs immediately on the
    /// calling thread. Otherwise it runs on the thread that completes the
    /// task, after the owner node has been updated.
    pub fn on_completion<F>(&self, callback: F)
    where
        F: FnOnce(&TaskStatus) + Send + 'static,
    {
        let mut cell = self.inner.cell.lock();
        if cell.status.is_terminal() {
            let status = cell.status.clone();
            drop(cell);
            callback(&status);
        } else {
            cell.callbacks.push(Box::new(callback));
        }
    }

    /// Channel that receives the terminal status once
    pub fn completion(&self) -> flume::Receiver<TaskStatus> {
        let (tx, rx) = flume::bounded(1);
        self.on_completion(move |status| {
            let _ = tx.send(status.clone());
        });
        rx
    }

    /// Block until the task finishes
    pub fn wait(&self) -> TaskStatus {
        self.completion().recv().unwrap_or_else(|_| self.status())
    }

    /// Block until the task finishes or `timeout` elapses
    ///
    /// Returns `None` on timeout. Callers wanting a deadline on a load
    /// typically [`cancel`](Self::cancel) the task at that point.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<TaskStatus> {
        self.completion().recv_timeout(timeout).ok()
    }
}

impl<V: Send + Sync + 'static> LoadTask<V> {
    /// Move from `Pending` to `Running` and hand the load to `runner`
    pub(crate) fn start(&self, node: LazyTreeNode<V>, runner: &dyn TaskRunner) {
        {
            let mut cell = self.inner.cell.lock();
            if !matches!(cell.status, TaskStatus::Pending) {
                warn!(
                    "load task {} started twice (status {})",
                    self.inner.id, cell.status
                );
                return;
            }
            cell.status = TaskStatus::Running;
        }
        debug!("starting load task {}", self.inner.id);
        let job = TaskJob {
            task: self.clone(),
            node,
        };
        runner.spawn(LoadJob::new(self.inner.id, Box::new(job)));
    }

    /// Internal completion handling, run exactly once per task
    ///
    /// The owner is updated before the status is published, so a callback or
    /// a waiter never sees a terminal task still occupying the node's slot.
    fn finish(&self, status: TaskStatus) {
        if self.inner.finished.swap(true, Ordering::AcqRel) {
            warn!("load task {} completed more than once", self.inner.id);
            return;
        }
        debug!("load task {} finished: {}", self.inner.id, status);

        if let Some(lazy) = self.owner().and_then(|node| node.as_lazy()) {
            lazy.settle(self, matches!(status, TaskStatus::Succeeded));
        }
        self.inner.fanout.complete(&status);

        let callbacks = {
            let mut cell = self.inner.cell.lock();
            cell.status = status.clone();
            std::mem::take(&mut cell.callbacks)
        };
        for callback in callbacks {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(&status))).is_err() {
                warn!(
                    "completion callback for load task {} panicked",
                    self.inner.id
                );
            }
        }
    }
}

impl<V> PartialEq for LoadTask<V> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<V> Eq for LoadTask<V> {}

impl<V> fmt::Debug for LoadTask<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadTask")
            .field("id", &self.inner.id)
            .field("status", &self.inner.cell.lock().status)
            .finish()
    }
}

/// The body a runner executes for one task
struct TaskJob<V> {
    task: LoadTask<V>,
    node: LazyTreeNode<V>,
}

impl<V: Send + Sync + 'static> JobBody for TaskJob<V> {
    fn run(self: Box<Self>) {
        let TaskJob { task, node } = *self;
        let loader = node.loader();
        let result = panic::catch_unwind(AssertUnwindSafe(|| loader.load(&node, task.fanout())));
        task.finish(TaskStatus::from_result(result));
    }

    fn abandon(self: Box<Self>) {
        self.task.finish(TaskStatus::Failed(Arc::new(anyhow!(
            "load job dropped before it ran"
        ))));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_status_mapping() {
        let status = TaskStatus::from_result(Ok(Ok(LoadOutcome::Completed)));
        assert_eq!(status.state(), TaskState::Succeeded);

        let status = TaskStatus::from_result(Ok(Ok(LoadOutcome::Cancelled)));
        assert_eq!(status.state(), TaskState::Cancelled);

        let status = TaskStatus::from_result(Ok(Err(Cancelled.into())));
        assert_eq!(status.state(), TaskState::Cancelled);

        let status = TaskStatus::from_result(Ok(Err(anyhow!("disk on fire"))));
        assert_eq!(status.state(), TaskState::Failed);
        assert_eq!(status.to_string(), "Failed: disk on fire");
        assert_eq!(status.error().unwrap().to_string(), "disk on fire");
    }

    #[test]
    fn test_panic_payload_becomes_failure() {
        let result = panic::catch_unwind(|| -> anyhow::Result<LoadOutcome> { panic!("boom") });
        let status = TaskStatus::from_result(result);
        assert_eq!(status.to_string(), "Failed: loader panicked: boom");
    }

    #[test]
    fn test_terminal_states() {
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(TaskState::Succeeded.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
    }

    #[test]
    fn test_new_task_is_pending() {
        let task: LoadTask<()> = LoadTask::new(Weak::new());
        assert_eq!(task.state(), TaskState::Pending);
        assert!(task.owner().is_none());
        assert!(task.wait_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn test_ids_increase() {
        let first: LoadTask<()> = LoadTask::new(Weak::new());
        let second: LoadTask<()> = LoadTask::new(Weak::new());
        assert!(second.id() > first.id());
        assert_ne!(first, second);
        assert_eq!(first, first.clone());
    }
}
