//! Nodes that load their children on demand
//!
//! A [`LazyTreeNode`] is a [`TreeNode`] with a loader attached. Calling
//! [`load`](LazyTreeNode::load) hands the loader to a [`TaskRunner`] and
//! returns immediately with the [`LoadTask`] tracking it. At most one task is
//! active per node: the task slot is only ever filled by a compare-and-swap
//! from empty, so concurrent callers all receive the same task.
//!
//! ```text
//! Unloaded --load()--> Loading --Succeeded--> Loaded
//!                         |
//!                         +--Failed/Cancelled--> Unloaded
//! ```

use crate::load::{LoadOutcome, LoadTask, ProgressFanout, TaskInner, TaskRunner, TaskStatus};
use crate::tree::TreeNode;
use anyhow::anyhow;
use arc_swap::ArcSwapOption;
use log::debug;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Populates a lazy node's children
///
/// Runs on the runner's thread. Implementations add children with
/// [`TreeNode::add`] (or [`LazyTreeNode::add_lazy`]), report progress on
/// `progress`, and poll [`ProgressFanout::is_cancel_requested`] during long
/// loads. Returning an error, or panicking, fails the task.
pub trait Loader<V>: Send + Sync + 'static {
    /// Load the children of `node`
    fn load(&self, node: &LazyTreeNode<V>, progress: &ProgressFanout) -> anyhow::Result<LoadOutcome>;
}

impl<V, F> Loader<V> for F
where
    F: Fn(&LazyTreeNode<V>, &ProgressFanout) -> anyhow::Result<LoadOutcome> + Send + Sync + 'static,
{
    fn load(&self, node: &LazyTreeNode<V>, progress: &ProgressFanout) -> anyhow::Result<LoadOutcome> {
        self(node, progress)
    }
}

/// Build a [`Loader`] from a closure
///
/// Closures already implement `Loader`; this helper only pins down the
/// closure's signature so argument types need no annotations.
pub fn from_fn<V, F>(f: F) -> F
where
    F: Fn(&LazyTreeNode<V>, &ProgressFanout) -> anyhow::Result<LoadOutcome> + Send + Sync + 'static,
{
    f
}

/// Load bookkeeping stored inside a lazy node
pub(crate) struct LazyState<V> {
    loaded: AtomicBool,
    current: ArcSwapOption<TaskInner<V>>,
    loader: Arc<dyn Loader<V>>,
    runner: Arc<dyn TaskRunner>,
}

impl<V> LazyState<V> {
    pub(crate) fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }
}

/// A tree node whose children are loaded on demand
///
/// Dereferences to [`TreeNode`] for structure and value access. Clones share
/// the same node.
pub struct LazyTreeNode<V> {
    node: TreeNode<V>,
    state: Arc<LazyState<V>>,
}

impl<V> Clone for LazyTreeNode<V> {
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

impl<V> LazyTreeNode<V> {
    pub(crate) fn from_parts(node: TreeNode<V>, state: Arc<LazyState<V>>) -> Self {
        Self { node, state }
    }

    /// Create a detached, unloaded node
    pub fn new(value: V, loader: impl Loader<V>, runner: Arc<dyn TaskRunner>) -> Self {
        Self::with_shared(value, Arc::new(loader), runner)
    }

    /// Create a detached, unloaded node sharing an existing loader
    pub fn with_shared(value: V, loader: Arc<dyn Loader<V>>, runner: Arc<dyn TaskRunner>) -> Self {
        let state = Arc::new(LazyState {
            loaded: AtomicBool::new(false),
            current: ArcSwapOption::empty(),
            loader,
            runner,
        });
        let node = TreeNode::with_state(value, Some(Arc::clone(&state)));
        Self { node, state }
    }

    /// The underlying tree node
    pub fn node(&self) -> &TreeNode<V> {
        &self.node
    }

    /// Consume the lazy view, keeping the tree node
    pub fn into_node(self) -> TreeNode<V> {
        self.node
    }

    /// The loader that populates this node
    pub fn loader(&self) -> Arc<dyn Loader<V>> {
        Arc::clone(&self.state.loader)
    }

    /// The runner that executes this node's loads
    pub fn runner(&self) -> Arc<dyn TaskRunner> {
        Arc::clone(&self.state.runner)
    }

    /// Returns true once a load has succeeded
    pub fn is_loaded(&self) -> bool {
        self.state.is_loaded()
    }

    /// The task currently loading this node, if any
    pub fn current_task(&self) -> Option<LoadTask<V>> {
        self.state
            .current
            .load_full()
            .map(LoadTask::from_inner)
    }

    /// Rows to render beneath this node: 1 placeholder while unloaded
    pub fn child_count(&self) -> usize {
        self.node.child_count()
    }

    /// Create an unloaded child with the same loader and runner and append it
    pub fn add_lazy(&self, value: V) -> LazyTreeNode<V> {
        let child = Self::with_shared(value, self.loader(), self.runner());
        self.node.add(child.node.clone());
        child
    }

    /// Record the outcome of `task` and clear the task slot
    ///
    /// A task that no longer occupies the slot changes nothing. Only the
    /// occupying task ever clears the slot, so ownership cannot change between
    /// the check and the swap. The flag is written first so that a caller who
    /// sees the slot empty also sees the outcome.
    pub(crate) fn settle(&self, task: &LoadTask<V>, succeeded: bool) {
        let owns_slot = matches!(
            &*self.state.current.load(),
            Some(current) if Arc::ptr_eq(current, task.inner())
        );
        if !owns_slot {
            debug!(
                "load task {} no longer occupies its node's slot; leaving it alone",
                task.id()
            );
            return;
        }

        self.state.loaded.store(succeeded, Ordering::Release);
        let expected = Some(Arc::clone(task.inner()));
        self.state
            .current
            .compare_and_swap(&expected, None::<Arc<TaskInner<V>>>);
    }
}

impl<V: Send + Sync + 'static> LazyTreeNode<V> {
    /// Start loading, or join the load already in progress
    ///
    /// Never blocks on the load itself (unless the runner runs jobs inline).
    /// Failures are reported through the task, never returned here.
    pub fn load(&self) -> LoadTask<V> {
        if let Some(task) = self.current_task() {
            return task;
        }

        let task = LoadTask::new(self.node.downgrade());
        let empty: Option<Arc<TaskInner<V>>> = None;
        let previous = self
            .state
            .current
            .compare_and_swap(&empty, Some(Arc::clone(task.inner())));

        if let Some(winner) = &*previous {
            let winner = LoadTask::from_inner(Arc::clone(winner));
            debug!(
                "discarding load task {}; task {} won the race",
                task.id(),
                winner.id()
            );
            return winner;
        }
        drop(previous);

        task.start(self.clone(), self.state.runner.as_ref());
        task
    }

    /// Start a load unless the node is already loaded
    pub fn ensure_loaded(&self) -> Option<LoadTask<V>> {
        if self.is_loaded() {
            None
        } else {
            Some(self.load())
        }
    }

    /// Load this node and every lazy descendant, waiting for each load
    ///
    /// Stops at the first load that does not succeed.
    pub fn load_recursive(&self) -> anyhow::Result<()> {
        if let Some(task) = self.ensure_loaded() {
            match task.wait() {
                TaskStatus::Succeeded => {}
                TaskStatus::Failed(err) => {
                    return Err(anyhow!("load task {} failed: {:#}", task.id(), err))
                }
                other => return Err(anyhow!("load task {} ended {}", task.id(), other)),
            }
        }

        for child in self.node.children() {
            if let Some(lazy) = child.as_lazy() {
                lazy.load_recursive()?;
            }
        }
        Ok(())
    }
}

impl<V> Deref for LazyTreeNode<V> {
    type Target = TreeNode<V>;

    fn deref(&self) -> &TreeNode<V> {
        &self.node
    }
}

impl<V> From<LazyTreeNode<V>> for TreeNode<V> {
    fn from(lazy: LazyTreeNode<V>) -> Self {
        lazy.node
    }
}

impl<V> PartialEq for LazyTreeNode<V> {
    fn eq(&self, other: &Self) -> bool {
        self.node.ptr_eq(&other.node)
    }
}

impl<V> Eq for LazyTreeNode<V> {}

impl<V: fmt::Debug> fmt::Debug for LazyTreeNode<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyTreeNode")
            .field("value", &*self.node.value())
            .field("loaded", &self.is_loaded())
            .field("loading", &self.state.current.load().is_some())
            .finish()
    }
}
