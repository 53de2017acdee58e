#![forbid(unsafe_code)]

//! Property-based invariant tests for document tree edits.
//!
//! Random sequences of inserts, moves and detaches are applied to a fresh
//! document; after every step the tree must satisfy:
//!
//! 1. Parent and child links agree in both directions, with no duplicates.
//! 2. No node is its own ancestor.
//! 3. `contains(a, b)` holds exactly when `a` is `b` or one of its ancestors.
//! 4. `query_selector_all(root, "*")` lists the element descendants of `root`
//!    in the same order as `descendants(root)`.
//! 5. Failed edits leave the tree untouched.
//! 6. Every record seen by an observer on the document node targets a
//!    container and names at least one added or removed node.

use proptest::prelude::*;
use sitekit_dom::{Document, DomError, NodeId, NodeKind, ObserveOptions};

// ── Strategies ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Op {
    Append { parent: usize, child: usize },
    InsertBefore { parent: usize, child: usize, reference: usize },
    Detach { node: usize },
    Replace { old: usize, new: usize },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0usize..16, 0usize..16).prop_map(|(parent, child)| Op::Append { parent, child }),
        2 => (0usize..16, 0usize..16, 0usize..16)
            .prop_map(|(parent, child, reference)| Op::InsertBefore { parent, child, reference }),
        2 => (0usize..16).prop_map(|node| Op::Detach { node }),
        1 => (0usize..16, 0usize..16).prop_map(|(old, new)| Op::Replace { old, new }),
    ]
}

fn ops_strategy() -> impl Strategy<Value = Vec<Op>> {
    proptest::collection::vec(op_strategy(), 1..60)
}

// ── Helpers ───────────────────────────────────────────────────────────────

fn pool(doc: &Document) -> Vec<NodeId> {
    let mut nodes = vec![doc.body()];
    let tags = ["div", "section", "p", "ul", "li", "svg", "span"];
    for i in 0..14 {
        nodes.push(doc.create_element(tags[i % tags.len()]));
    }
    nodes.push(doc.create_text("leaf"));
    nodes
}

fn snapshot(doc: &Document, nodes: &[NodeId]) -> Vec<(Option<NodeId>, Vec<NodeId>)> {
    nodes
        .iter()
        .map(|&n| (doc.parent(n), doc.children(n)))
        .collect()
}

fn assert_links_consistent(doc: &Document, nodes: &[NodeId]) {
    for &n in nodes {
        if let Some(p) = doc.parent(n) {
            let count = doc.children(p).iter().filter(|&&c| c == n).count();
            assert_eq!(count, 1, "{n} listed {count} times under {p}");
        }
        for c in doc.children(n) {
            assert_eq!(doc.parent(c), Some(n));
        }
        assert!(!doc.ancestors(n).contains(&n), "{n} is its own ancestor");
    }
}

fn apply(doc: &Document, nodes: &[NodeId], op: &Op) -> Result<(), DomError> {
    let at = |i: usize| nodes[i % nodes.len()];
    match *op {
        Op::Append { parent, child } => doc.append_child(at(parent), at(child)).map(drop),
        Op::InsertBefore {
            parent,
            child,
            reference,
        } => doc
            .insert_before(at(parent), at(child), Some(at(reference)))
            .map(drop),
        Op::Detach { node } => doc.detach(at(node)).map(drop),
        Op::Replace { old, new } => doc.replace_with(at(old), at(new)),
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 1–3. Structural invariants
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn edits_preserve_tree_shape(ops in ops_strategy()) {
        let doc = Document::new();
        let nodes = pool(&doc);
        for op in &ops {
            let before = snapshot(&doc, &nodes);
            if apply(&doc, &nodes, op).is_err() {
                prop_assert_eq!(before, snapshot(&doc, &nodes), "failed edit {:?} changed the tree", op);
            }
            assert_links_consistent(&doc, &nodes);
        }
    }

    #[test]
    fn contains_agrees_with_ancestors(ops in ops_strategy()) {
        let doc = Document::new();
        let nodes = pool(&doc);
        for op in &ops {
            let _ = apply(&doc, &nodes, op);
        }
        for &a in &nodes {
            for &b in &nodes {
                let expected = a == b || doc.ancestors(b).contains(&a);
                prop_assert_eq!(doc.contains(a, b), expected);
            }
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 4. Selector queries follow document order
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn universal_query_matches_element_descendants(ops in ops_strategy()) {
        let doc = Document::new();
        let nodes = pool(&doc);
        for op in &ops {
            let _ = apply(&doc, &nodes, op);
        }
        let root = doc.document_node();
        let expected: Vec<NodeId> = doc
            .descendants(root)
            .into_iter()
            .filter(|&n| doc.kind(n) == Some(NodeKind::Element))
            .collect();
        prop_assert_eq!(doc.query_selector_all(root, "*").unwrap(), expected);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 6. Observation
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn recorded_edits_name_their_nodes(ops in ops_strategy()) {
        let doc = Document::new();
        let nodes = pool(&doc);
        let observer = doc.observe(doc.document_node(), ObserveOptions::CHILD_TREE).unwrap();
        for op in &ops {
            let _ = apply(&doc, &nodes, op);
            for record in doc.take_records(observer) {
                let kind = doc.kind(record.target);
                prop_assert!(kind.is_some_and(NodeKind::is_container), "record target {} is not a container", record.target);
                prop_assert!(record.added_nodes.len() + record.removed_nodes.len() > 0);
            }
        }
    }
}
