//! Tree structure and lazily loaded nodes
//!
//! [`TreeNode`] is the plain n-ary node; [`LazyTreeNode`] adds on-demand
//! loading on top of it. [`FilesystemLoader`] is a ready-made loader for
//! directory hierarchies.

pub mod filesystem;
mod lazy;
mod node;
mod traversal;

pub use filesystem::{EntryKind, FilesystemLoader, FsEntry};
pub use lazy::{from_fn, LazyTreeNode, Loader};
pub use node::TreeNode;
pub use traversal::{TraversalOrder, TreeWalker};

pub(crate) use node::NodeInner;

/// Re-export common types for convenience
pub mod prelude {
    pub use super::{
        EntryKind, FilesystemLoader, FsEntry, LazyTreeNode, Loader, TraversalOrder, TreeNode,
        TreeWalker,
    };
}
