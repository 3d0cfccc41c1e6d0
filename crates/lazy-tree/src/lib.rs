//! Lazy Tree Library
//!
//! A generic n-ary tree whose nodes populate their children on demand through
//! background load operations.
//!
//! # Core Concepts
//!
//! - **TreeNode**: an element of the tree holding a value and its children
//! - **LazyTreeNode**: a node whose children are produced by a [`Loader`](tree::Loader)
//! - **LoadTask**: one attempt at loading a node, with a terminal outcome
//! - **ProgressFanout**: broadcasts a load's progress to any number of observers
//! - **TaskRunner**: where loads execute (thread per load, rayon, inline)
//!
//! At most one load is in flight per node. Calling `load()` again while a load
//! runs returns the same task.
//!
//! # Example
//!
//! ```no_run
//! use lazy_tree::prelude::*;
//!
//! let runner = RunnerOptions::from_env().build().expect("Failed to build runner");
//! let tree = FilesystemLoader::open("./src", runner).expect("Failed to open directory");
//!
//! // Start loading the root's children and wait for them
//! let task = tree.load();
//! println!("load finished: {}", task.wait());
//!
//! // Walk the tree
//! for node in tree.walk(TraversalOrder::PreOrder) {
//!     let depth = node.depth();
//!     println!("{:indent$}{}", "", *node.value(), indent = depth * 2);
//! }
//! ```

pub mod error;
pub mod load;
pub mod tree;

pub use error::{Cancelled, TreeError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{Cancelled, TreeError};
    pub use crate::load::{
        ChannelObserver, FanoutEvent, InlineRunner, LoadOutcome, LoadTask, ProgressEvent,
        ProgressFanout, ProgressObserver, RayonRunner, RunnerKind, RunnerOptions, TaskRunner,
        TaskState, TaskStatus, ThreadRunner,
    };
    pub use crate::tree::prelude::*;
}
