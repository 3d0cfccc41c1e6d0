//! Traversal and search over a subtree

use crate::tree::TreeNode;
use std::collections::VecDeque;

/// Traversal order for walking the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraversalOrder {
    /// Visit parent before children (top-down)
    PreOrder,
    /// Visit children before parent (bottom-up)
    PostOrder,
    /// Visit level by level (breadth-first)
    BreadthFirst,
}

/// Iterator over a subtree in a given order
///
/// A node's children are snapshotted when the walker reaches it, so edits
/// made during the walk only show up in parts not yet visited.
pub struct TreeWalker<V> {
    order: TraversalOrder,
    /// Nodes still to visit; the flag marks nodes whose children were pushed
    pending: VecDeque<(TreeNode<V>, bool)>,
}

impl<V> TreeWalker<V> {
    /// Create a new tree walker starting from the given node
    pub fn new(start: TreeNode<V>, order: TraversalOrder) -> Self {
        let mut pending = VecDeque::new();
        pending.push_back((start, false));
        Self { order, pending }
    }

    fn next_preorder(&mut self) -> Option<TreeNode<V>> {
        let (current, _) = self.pending.pop_back()?;

        // Add children in reverse order so they're popped in correct order
        for child in current.children().into_iter().rev() {
            self.pending.push_back((child, false));
        }

        Some(current)
    }

    fn next_postorder(&mut self) -> Option<TreeNode<V>> {
        while let Some((current, expanded)) = self.pending.pop_back() {
            if expanded {
                return Some(current);
            }

            let children = current.children();
            self.pending.push_back((current, true));
            for child in children.into_iter().rev() {
                self.pending.push_back((child, false));
            }
        }
        None
    }

    fn next_breadthfirst(&mut self) -> Option<TreeNode<V>> {
        let (current, _) = self.pending.pop_front()?;

        for child in current.children() {
            self.pending.push_back((child, false));
        }

        Some(current)
    }
}

impl<V> Iterator for TreeWalker<V> {
    type Item = TreeNode<V>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.order {
            TraversalOrder::PreOrder => self.next_preorder(),
            TraversalOrder::PostOrder => self.next_postorder(),
            TraversalOrder::BreadthFirst => self.next_breadthfirst(),
        }
    }
}

impl<V> TreeNode<V> {
    /// Walk this node and its descendants in the specified order
    pub fn walk(&self, order: TraversalOrder) -> TreeWalker<V> {
        TreeWalker::new(self.clone(), order)
    }

    /// All ancestors, from parent to root
    pub fn ancestors(&self) -> Vec<TreeNode<V>> {
        let mut ancestors = Vec::new();
        let mut current = self.parent();
        while let Some(parent) = current {
            current = parent.parent();
            ancestors.push(parent);
        }
        ancestors
    }

    /// Check if this node is a proper ancestor of `other`
    pub fn is_ancestor_of(&self, other: &TreeNode<V>) -> bool {
        let mut current = other.parent();
        while let Some(parent) = current {
            if parent.ptr_eq(self) {
                return true;
            }
            current = parent.parent();
        }
        false
    }

    /// Number of nodes in this subtree, including this one
    pub fn node_count(&self) -> usize {
        self.walk(TraversalOrder::PreOrder).count()
    }

    /// All nodes without children, in pre-order
    pub fn leaves(&self) -> Vec<TreeNode<V>> {
        self.walk(TraversalOrder::PreOrder)
            .filter(|node| node.is_leaf())
            .collect()
    }

    /// Nodes whose value matches `predicate`, in pre-order
    pub fn find<F>(&self, predicate: F) -> Vec<TreeNode<V>>
    where
        F: Fn(&V) -> bool,
    {
        self.walk(TraversalOrder::PreOrder)
            .filter(|node| node.with_value(&predicate))
            .collect()
    }

    /// First node (pre-order) whose value matches `predicate`
    pub fn find_first<F>(&self, predicate: F) -> Option<TreeNode<V>>
    where
        F: Fn(&V) -> bool,
    {
        self.walk(TraversalOrder::PreOrder)
            .find(|node| node.with_value(&predicate))
    }

    /// Indented outline of this subtree, one line per node
    ///
    /// Lazy nodes that have not loaded yet get a `loading...` row beneath
    /// them, the same single placeholder row [`child_count`](Self::child_count)
    /// accounts for.
    pub fn outline<F>(&self, label: F) -> String
    where
        F: Fn(&V) -> String,
    {
        let base = self.depth();
        let mut out = String::new();
        for node in self.walk(TraversalOrder::PreOrder) {
            let indent = "  ".repeat(node.depth() - base);
            out.push_str(&format!("{}{}\n", indent, node.with_value(&label)));
            if node.as_lazy().is_some_and(|lazy| !lazy.is_loaded()) {
                out.push_str(&format!("{}  loading...\n", indent));
            }
        }
        out
    }
}
