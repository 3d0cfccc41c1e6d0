//! Core node type for the tree abstraction

use crate::error::TreeError;
use crate::tree::lazy::{LazyState, LazyTreeNode};
use parking_lot::{RwLock, RwLockReadGuard};
use std::fmt;
use std::sync::{Arc, Weak};

/// Shared storage behind a [`TreeNode`] handle
pub(crate) struct NodeInner<V> {
    value: RwLock<V>,
    /// Non-owning back-reference; empty for roots and detached nodes
    parent: RwLock<Weak<NodeInner<V>>>,
    children: RwLock<Vec<TreeNode<V>>>,
    /// Present only for nodes created as lazy nodes
    lazy: Option<Arc<LazyState<V>>>,
}

/// A node in an n-ary tree
///
/// `TreeNode` is a cheap handle: cloning it yields another handle to the same
/// node. Equality is identity, never value equality. A node owns its children;
/// the link back to the parent is weak, so dropping the last handle to a root
/// releases the whole subtree.
///
/// Children are kept in insertion order and are never sorted. Lookups by
/// position (`index`, `remove`) scan by identity.
///
/// Structural edits on a single node assume one writer at a time. Reads from
/// other threads are safe but may observe an edit half-way (for example a
/// child whose parent is already set but which is not yet in the list).
pub struct TreeNode<V> {
    inner: Arc<NodeInner<V>>,
}

impl<V> Clone for TreeNode<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> TreeNode<V> {
    /// Create a detached node holding `value`
    pub fn new(value: V) -> Self {
        Self::with_state(value, None)
    }

    pub(crate) fn with_state(value: V, lazy: Option<Arc<LazyState<V>>>) -> Self {
        Self {
            inner: Arc::new(NodeInner {
                value: RwLock::new(value),
                parent: RwLock::new(Weak::new()),
                children: RwLock::new(Vec::new()),
                lazy,
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<NodeInner<V>>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<NodeInner<V>> {
        Arc::downgrade(&self.inner)
    }

    /// Returns true if both handles refer to the same node
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// The lazy view of this node, if it was created as a lazy node
    pub fn as_lazy(&self) -> Option<LazyTreeNode<V>> {
        self.inner
            .lazy
            .as_ref()
            .map(|state| LazyTreeNode::from_parts(self.clone(), Arc::clone(state)))
    }

    /// Returns true if this node loads its children on demand
    pub fn is_lazy(&self) -> bool {
        self.inner.lazy.is_some()
    }

    // ------------------------------------------------------------------
    // Value access
    // ------------------------------------------------------------------

    /// Borrow the node's value
    ///
    /// The returned guard blocks writers to this value until dropped.
    pub fn value(&self) -> RwLockReadGuard<'_, V> {
        self.inner.value.read()
    }

    /// Run `f` with a shared borrow of the value
    pub fn with_value<R>(&self, f: impl FnOnce(&V) -> R) -> R {
        f(&self.inner.value.read())
    }

    /// Run `f` with an exclusive borrow of the value
    pub fn with_value_mut<R>(&self, f: impl FnOnce(&mut V) -> R) -> R {
        f(&mut self.inner.value.write())
    }

    /// Replace the value, returning the previous one
    pub fn set_value(&self, value: V) -> V {
        std::mem::replace(&mut *self.inner.value.write(), value)
    }

    // ------------------------------------------------------------------
    // Structure queries
    // ------------------------------------------------------------------

    /// The parent node, or `None` for a root
    pub fn parent(&self) -> Option<TreeNode<V>> {
        self.inner.parent.read().upgrade().map(Self::from_inner)
    }

    /// Returns true if this node has no parent
    pub fn is_root(&self) -> bool {
        self.inner.parent.read().upgrade().is_none()
    }

    /// The topmost ancestor (the node itself for a root)
    pub fn root(&self) -> TreeNode<V> {
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    /// Snapshot of the children in insertion order
    pub fn children(&self) -> Vec<TreeNode<V>> {
        self.inner.children.read().clone()
    }

    /// The child at `index`, if any
    pub fn child_at(&self, index: usize) -> Option<TreeNode<V>> {
        self.inner.children.read().get(index).cloned()
    }

    /// Returns true if this node currently has no children
    pub fn is_leaf(&self) -> bool {
        self.inner.children.read().is_empty()
    }

    /// Number of rows a consumer should render beneath this node
    ///
    /// This is the real child count, except for a lazy node that has not
    /// finished loading, which reports a single placeholder row.
    pub fn child_count(&self) -> usize {
        match &self.inner.lazy {
            Some(state) if !state.is_loaded() => 1,
            _ => self.inner.children.read().len(),
        }
    }

    /// Position of this node within its parent's children
    ///
    /// Returns `None` for a root.
    pub fn index(&self) -> Option<usize> {
        let parent = self.parent()?;
        let children = parent.inner.children.read();
        children.iter().position(|child| child.ptr_eq(self))
    }

    /// Distance from the root (root = 0)
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.parent();
        while let Some(node) = current {
            depth += 1;
            current = node.parent();
        }
        depth
    }

    // ------------------------------------------------------------------
    // Structural mutation
    // ------------------------------------------------------------------

    /// Append `child`, returning its position
    pub fn add(&self, child: TreeNode<V>) -> usize {
        self.insert(usize::MAX, child)
    }

    /// Insert `child` at `index`, returning the position actually used
    ///
    /// An index past the end appends. A child that belongs to a different
    /// parent loses every slot it holds there first. Inserting a node that is
    /// already a child of this node adds a second slot for it.
    ///
    /// Callers must not insert a node beneath itself.
    pub fn insert(&self, index: usize, child: TreeNode<V>) -> usize {
        debug_assert!(
            !child.ptr_eq(self) && !child.is_ancestor_of(self),
            "inserting a node beneath itself would create a cycle"
        );

        if let Some(previous) = child.parent() {
            if !previous.ptr_eq(self) {
                while previous.remove(&child) {}
            }
        }

        *child.inner.parent.write() = Arc::downgrade(&self.inner);
        let mut children = self.inner.children.write();
        let position = index.min(children.len());
        children.insert(position, child);
        position
    }

    /// Remove `child` if it is a direct child of this node
    ///
    /// Returns false when `child` is not found. The lookup is by identity.
    pub fn remove(&self, child: &TreeNode<V>) -> bool {
        let removed = {
            let mut children = self.inner.children.write();
            match children.iter().position(|c| c.ptr_eq(child)) {
                Some(position) => {
                    children.remove(position);
                    true
                }
                None => false,
            }
        };

        if removed {
            self.release(child);
        }
        removed
    }

    /// Remove and return the child at `index`
    pub fn remove_at(&self, index: usize) -> Result<TreeNode<V>, TreeError> {
        let child = {
            let mut children = self.inner.children.write();
            if index >= children.len() {
                return Err(TreeError::IndexOutOfRange {
                    index,
                    len: children.len(),
                });
            }
            children.remove(index)
        };

        self.release(&child);
        Ok(child)
    }

    /// Detach this node from its parent; a no-op for a root
    pub fn remove_from_parent(&self) {
        if let Some(parent) = self.parent() {
            parent.remove(self);
        }
    }

    /// Detach every child, returning them in their former order
    pub fn clear_children(&self) -> Vec<TreeNode<V>> {
        let children = std::mem::take(&mut *self.inner.children.write());
        for child in &children {
            self.release(child);
        }
        children
    }

    /// Clear `child`'s back-reference once it no longer occupies a slot here
    fn release(&self, child: &TreeNode<V>) {
        if self.inner.children.read().iter().any(|c| c.ptr_eq(child)) {
            return;
        }
        let mut parent = child.inner.parent.write();
        if std::ptr::eq(parent.as_ptr(), Arc::as_ptr(&self.inner)) {
            *parent = Weak::new();
        }
    }
}

impl<V> PartialEq for TreeNode<V> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<V> Eq for TreeNode<V> {}

impl<V: fmt::Debug> fmt::Debug for TreeNode<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeNode")
            .field("value", &*self.inner.value.read())
            .field("children", &self.inner.children.read().len())
            .field("lazy", &self.inner.lazy.is_some())
            .finish()
    }
}

impl<V: fmt::Display> fmt::Display for TreeNode<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &*self.inner.value.read())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn values(node: &TreeNode<&'static str>) -> Vec<&'static str> {
        node.children().iter().map(|c| *c.value()).collect()
    }

    #[test]
    fn test_new_node_is_detached() {
        let node = TreeNode::new("root");
        assert!(node.is_root());
        assert!(node.is_leaf());
        assert_eq!(node.index(), None);
        assert_eq!(node.depth(), 0);
        assert_eq!(node.child_count(), 0);
    }

    #[test]
    fn test_add_and_insert() {
        let root = TreeNode::new("root");
        let a = TreeNode::new("a");
        let b = TreeNode::new("b");
        let c = TreeNode::new("c");

        assert_eq!(root.add(a.clone()), 0);
        assert_eq!(root.add(c.clone()), 1);
        assert_eq!(root.insert(1, b.clone()), 1);
        assert_eq!(values(&root), vec!["a", "b", "c"]);

        assert_eq!(b.index(), Some(1));
        assert_eq!(c.index(), Some(2));
        assert!(b.parent().unwrap().ptr_eq(&root));
        assert_eq!(b.depth(), 1);
    }

    #[test]
    fn test_insert_past_end_appends() {
        let root = TreeNode::new("root");
        root.add(TreeNode::new("a"));
        assert_eq!(root.insert(42, TreeNode::new("z")), 1);
        assert_eq!(values(&root), vec!["a", "z"]);
    }

    #[test]
    fn test_insert_moves_between_parents() {
        let left = TreeNode::new("left");
        let right = TreeNode::new("right");
        let child = TreeNode::new("child");

        left.add(child.clone());
        right.add(child.clone());

        assert!(left.is_leaf());
        assert_eq!(values(&right), vec!["child"]);
        assert!(child.parent().unwrap().ptr_eq(&right));
    }

    #[test]
    fn test_same_child_twice_gets_two_slots() {
        let root = TreeNode::new("root");
        let child = TreeNode::new("child");
        root.add(child.clone());
        root.add(child.clone());
        assert_eq!(root.children().len(), 2);

        // Removing one slot keeps the back-reference for the other
        assert!(root.remove(&child));
        assert!(child.parent().is_some());
        assert!(root.remove(&child));
        assert!(child.parent().is_none());
    }

    #[test]
    fn test_move_takes_every_slot_from_old_parent() {
        let old = TreeNode::new("old");
        let new = TreeNode::new("new");
        let child = TreeNode::new("child");
        old.add(TreeNode::new("keep"));
        old.add(child.clone());
        old.add(child.clone());

        new.add(child.clone());
        assert_eq!(values(&old), vec!["keep"]);
        assert_eq!(values(&new), vec!["child"]);
        assert!(child.parent().unwrap().ptr_eq(&new));
        assert_eq!(child.index(), Some(0));
    }

    #[test]
    fn test_remove_by_identity_not_value() {
        let root = TreeNode::new("root");
        let first = TreeNode::new("same");
        let second = TreeNode::new("same");
        root.add(first.clone());
        root.add(second.clone());

        assert!(root.remove(&second));
        assert!(root.child_at(0).unwrap().ptr_eq(&first));
        assert!(second.is_root());
        assert!(!first.is_root());

        let stranger = TreeNode::new("same");
        assert!(!root.remove(&stranger));
    }

    #[test]
    fn test_remove_at() {
        let root = TreeNode::new("root");
        root.add(TreeNode::new("a"));
        root.add(TreeNode::new("b"));

        let removed = root.remove_at(0).unwrap();
        assert_eq!(*removed.value(), "a");
        assert!(removed.is_root());
        assert_eq!(values(&root), vec!["b"]);

        assert_eq!(
            root.remove_at(1).unwrap_err(),
            TreeError::IndexOutOfRange { index: 1, len: 1 }
        );
    }

    #[test]
    fn test_remove_from_parent() {
        let root = TreeNode::new("root");
        let child = TreeNode::new("child");
        root.add(child.clone());

        child.remove_from_parent();
        assert!(child.is_root());
        assert!(root.is_leaf());

        // Root is a no-op
        root.remove_from_parent();
        assert!(root.is_root());
    }

    #[test]
    fn test_clear_children() {
        let root = TreeNode::new("root");
        let a = TreeNode::new("a");
        root.add(a.clone());
        root.add(TreeNode::new("b"));

        let removed = root.clear_children();
        assert_eq!(removed.len(), 2);
        assert!(root.is_leaf());
        assert!(a.is_root());
    }

    #[test]
    fn test_depth_and_root() {
        let root = TreeNode::new("root");
        let mid = TreeNode::new("mid");
        let leaf = TreeNode::new("leaf");
        root.add(mid.clone());
        mid.add(leaf.clone());

        assert_eq!(leaf.depth(), 2);
        assert!(leaf.root().ptr_eq(&root));
    }

    #[test]
    fn test_parent_is_weak() {
        let child = TreeNode::new("child");
        {
            let root = TreeNode::new("root");
            root.add(child.clone());
            assert!(child.parent().is_some());
        }
        assert!(child.parent().is_none());
    }

    #[test]
    fn test_value_access() {
        let node = TreeNode::new(1);
        node.with_value_mut(|v| *v += 1);
        assert_eq!(node.with_value(|v| *v), 2);
        assert_eq!(node.set_value(10), 2);
        assert_eq!(*node.value(), 10);
        assert_eq!(node.to_string(), "10");
    }
}
