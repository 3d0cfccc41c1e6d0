use lazy_tree::prelude::*;
use lazy_tree::tree::from_fn;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::Arc;

const POOL: usize = 6;

#[derive(Debug, Clone)]
enum Op {
    Add { parent: usize, child: usize },
    Insert { parent: usize, index: usize, child: usize },
    Remove { parent: usize, child: usize },
    RemoveAt { parent: usize, index: usize },
    RemoveFromParent { node: usize },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..POOL, 0..POOL).prop_map(|(parent, child)| Op::Add { parent, child }),
        (0..POOL, 0..8usize, 0..POOL)
            .prop_map(|(parent, index, child)| Op::Insert { parent, index, child }),
        (0..POOL, 0..POOL).prop_map(|(parent, child)| Op::Remove { parent, child }),
        (0..POOL, 0..8usize).prop_map(|(parent, index)| Op::RemoveAt { parent, index }),
        (0..POOL).prop_map(|node| Op::RemoveFromParent { node }),
    ]
}

fn is_child_of(child: &TreeNode<usize>, parent: &TreeNode<usize>) -> bool {
    child.parent().is_some_and(|p| p.ptr_eq(parent))
}

fn slots_in(parent: &TreeNode<usize>, child: &TreeNode<usize>) -> usize {
    parent.children().iter().filter(|c| c.ptr_eq(child)).count()
}

/// Attaching `child` under `parent` would create a cycle
fn rejects(parent: &TreeNode<usize>, child: &TreeNode<usize>) -> bool {
    parent.ptr_eq(child) || child.is_ancestor_of(parent)
}

fn apply(nodes: &[TreeNode<usize>], op: &Op) {
    match *op {
        Op::Add { parent, child } => {
            let (p, c) = (&nodes[parent], &nodes[child]);
            if rejects(p, c) {
                return;
            }
            let len = p.children().len();
            let slots = slots_in(p, c);
            assert_eq!(p.add(c.clone()), len);
            assert!(is_child_of(c, p));
            assert_eq!(slots_in(p, c), slots + 1);
        }
        Op::Insert {
            parent,
            index,
            child,
        } => {
            let (p, c) = (&nodes[parent], &nodes[child]);
            if rejects(p, c) {
                return;
            }
            let len = p.children().len();
            let at = p.insert(index, c.clone());
            assert_eq!(at, index.min(len));
            assert!(p.child_at(at).unwrap().ptr_eq(c));
        }
        Op::Remove { parent, child } => {
            let (p, c) = (&nodes[parent], &nodes[child]);
            let slots = slots_in(p, c);
            assert_eq!(p.remove(c), slots > 0);
            assert_eq!(is_child_of(c, p), slots > 1);
        }
        Op::RemoveAt { parent, index } => {
            let p = &nodes[parent];
            let len = p.children().len();
            match p.remove_at(index) {
                Ok(removed) => {
                    assert!(index < len);
                    assert_eq!(removed.is_root(), slots_in(p, &removed) == 0);
                }
                Err(err) => assert_eq!(err, TreeError::IndexOutOfRange { index, len }),
            }
        }
        Op::RemoveFromParent { node } => {
            let n = &nodes[node];
            let slots = n.parent().map_or(0, |p| slots_in(&p, n));
            n.remove_from_parent();
            assert_eq!(n.is_root(), slots <= 1);
        }
    }
}

fn check_structure(nodes: &[TreeNode<usize>]) {
    for node in nodes {
        let children = node.children();
        for child in &children {
            assert!(is_child_of(child, node));
            assert_eq!(
                child.index(),
                children.iter().position(|c| c.ptr_eq(child))
            );
            assert_eq!(child.depth(), node.depth() + 1);
        }

        // Every slot holding `node` lives in its one parent
        let holders: Vec<&TreeNode<usize>> = nodes
            .iter()
            .filter(|p| slots_in(p, node) > 0)
            .collect();
        match node.parent() {
            None => {
                assert!(holders.is_empty());
                assert_eq!(node.index(), None);
                assert_eq!(node.depth(), 0);
                assert!(node.root().ptr_eq(node));
            }
            Some(parent) => {
                assert_eq!(holders.len(), 1);
                assert!(holders[0].ptr_eq(&parent));
                assert_eq!(node.depth(), node.ancestors().len());
            }
        }
    }
}

proptest! {
    #[test]
    fn structural_invariants_hold(ops in proptest::collection::vec(op(), 1..48)) {
        let nodes: Vec<TreeNode<usize>> = (0..POOL).map(TreeNode::new).collect();
        for op in &ops {
            apply(&nodes, op);
            check_structure(&nodes);
        }
    }

    #[test]
    fn walk_orders_visit_the_same_nodes(ops in proptest::collection::vec(op(), 1..32)) {
        let nodes: Vec<TreeNode<usize>> = (0..POOL).map(TreeNode::new).collect();
        for op in &ops {
            apply(&nodes, op);
        }
        let root = nodes[0].root();
        let count = root.node_count();
        let mut expected: Vec<usize> = root
            .walk(TraversalOrder::PreOrder)
            .map(|n| *n.value())
            .collect();
        expected.sort_unstable();
        for order in [TraversalOrder::PostOrder, TraversalOrder::BreadthFirst] {
            let mut seen: Vec<usize> = root.walk(order).map(|n| *n.value()).collect();
            prop_assert_eq!(seen.len(), count);
            seen.sort_unstable();
            prop_assert_eq!(&seen, &expected);
        }
    }
}

#[test]
fn test_moving_a_child_with_duplicate_slots() {
    let a = TreeNode::new(0usize);
    let b = TreeNode::new(1);
    let c = TreeNode::new(2);
    a.add(c.clone());
    a.add(c.clone());

    b.add(c.clone());
    assert_eq!(slots_in(&a, &c), 0);
    assert_eq!(slots_in(&b, &c), 1);
    assert!(is_child_of(&c, &b));
    check_structure(&[a, b, c]);
}

#[test]
fn test_moving_a_subtree() {
    let a = TreeNode::new(0usize);
    let b = TreeNode::new(1);
    let c = TreeNode::new(2);
    let d = TreeNode::new(3);
    a.add(b.clone());
    b.add(c.clone());
    a.add(d.clone());

    // Re-parenting b moves its whole subtree under d
    d.add(b.clone());
    assert_eq!(a.children().len(), 1);
    assert!(is_child_of(&b, &d));
    assert_eq!(c.depth(), 3);
    assert!(a.is_ancestor_of(&c));
    assert_eq!(
        c.ancestors().iter().map(|n| *n.value()).collect::<Vec<_>>(),
        vec![1, 3, 0]
    );
}

#[test]
fn test_outline_marks_unloaded_nodes() {
    let root = LazyTreeNode::new(
        "docs".to_string(),
        from_fn(|node: &LazyTreeNode<String>, _progress| {
            let name = node.value().clone();
            if name == "docs" {
                node.add_lazy("guide".to_string());
                node.add(TreeNode::new("README".to_string()));
            }
            Ok(LoadOutcome::Completed)
        }),
        Arc::new(InlineRunner),
    );

    let before = root.outline(|name| name.clone());
    insta::assert_snapshot!(before.trim_end(), @r###"
    docs
      loading...
    "###);

    root.load();
    let after = root.outline(|name| name.clone());
    insta::assert_snapshot!(after.trim_end(), @r###"
    docs
      guide
        loading...
      README
    "###);
}
