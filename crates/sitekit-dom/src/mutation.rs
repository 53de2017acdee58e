#![forbid(unsafe_code)]

//! Mutation records and observer registrations.
//!
//! A [`Document`](crate::Document) keeps one registration per
//! [`Document::observe`](crate::Document::observe) call. Every qualifying
//! tree edit appends a [`MutationRecord`] to each interested registration's
//! pending queue; the host hands the queue out as one batch through
//! [`Document::take_records`](crate::Document::take_records).
//!
//! # Invariants
//!
//! 1. Records are queued in the order the edits happened.
//! 2. `take_records` drains the queue; a record is delivered at most once.
//! 3. A child-list record's target is the parent whose child list changed.

use bitflags::bitflags;

use crate::node::NodeId;

bitflags! {
    /// What an observer registration listens to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ObserveOptions: u8 {
        /// Child insertions and removals on the target.
        const CHILD_LIST = 1 << 0;
        /// Attribute changes on the target.
        const ATTRIBUTES = 1 << 1;
        /// Text changes on character-data targets.
        const CHARACTER_DATA = 1 << 2;
        /// Extend the above to every descendant of the target.
        const SUBTREE = 1 << 3;
    }
}

impl ObserveOptions {
    /// Child-list changes anywhere under the target.
    pub const CHILD_TREE: Self = Self::CHILD_LIST.union(Self::SUBTREE);

    /// Whether at least one record-producing flag is set.
    #[must_use]
    pub const fn is_observing_anything(self) -> bool {
        self.intersects(
            Self::CHILD_LIST
                .union(Self::ATTRIBUTES)
                .union(Self::CHARACTER_DATA),
        )
    }
}

/// Identifier of one observer registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub(crate) u64);

impl ObserverId {
    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// What changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationKind {
    ChildList,
    Attributes {
        name: String,
        old_value: Option<String>,
    },
    CharacterData {
        old_value: String,
    },
}

/// One change record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub kind: MutationKind,
    pub target: NodeId,
    pub added_nodes: Vec<NodeId>,
    pub removed_nodes: Vec<NodeId>,
    pub previous_sibling: Option<NodeId>,
    pub next_sibling: Option<NodeId>,
}

impl MutationRecord {
    /// Child-list record with the given additions and removals.
    #[must_use]
    pub fn child_list(target: NodeId, added: Vec<NodeId>, removed: Vec<NodeId>) -> Self {
        Self {
            kind: MutationKind::ChildList,
            target,
            added_nodes: added,
            removed_nodes: removed,
            previous_sibling: None,
            next_sibling: None,
        }
    }

    /// Attribute record.
    #[must_use]
    pub fn attribute(target: NodeId, name: impl Into<String>, old_value: Option<String>) -> Self {
        Self {
            kind: MutationKind::Attributes {
                name: name.into(),
                old_value,
            },
            target,
            added_nodes: Vec::new(),
            removed_nodes: Vec::new(),
            previous_sibling: None,
            next_sibling: None,
        }
    }

    /// Character-data record.
    #[must_use]
    pub fn character_data(target: NodeId, old_value: impl Into<String>) -> Self {
        Self {
            kind: MutationKind::CharacterData {
                old_value: old_value.into(),
            },
            target,
            added_nodes: Vec::new(),
            removed_nodes: Vec::new(),
            previous_sibling: None,
            next_sibling: None,
        }
    }

    #[must_use]
    pub fn with_siblings(mut self, previous: Option<NodeId>, next: Option<NodeId>) -> Self {
        self.previous_sibling = previous;
        self.next_sibling = next;
        self
    }

    /// Added and removed nodes, additions first.
    pub fn touched_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.added_nodes
            .iter()
            .chain(self.removed_nodes.iter())
            .copied()
    }

    /// Record flag this kind needs to be queued.
    #[must_use]
    pub(crate) fn required_flag(&self) -> ObserveOptions {
        match self.kind {
            MutationKind::ChildList => ObserveOptions::CHILD_LIST,
            MutationKind::Attributes { .. } => ObserveOptions::ATTRIBUTES,
            MutationKind::CharacterData { .. } => ObserveOptions::CHARACTER_DATA,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Registration {
    pub(crate) id: ObserverId,
    pub(crate) target: NodeId,
    pub(crate) options: ObserveOptions,
    pub(crate) pending: Vec<MutationRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_tree_combines_flags() {
        let opts = ObserveOptions::CHILD_TREE;
        assert!(opts.contains(ObserveOptions::CHILD_LIST));
        assert!(opts.contains(ObserveOptions::SUBTREE));
        assert!(!opts.contains(ObserveOptions::ATTRIBUTES));
        assert!(opts.is_observing_anything());
    }

    #[test]
    fn subtree_alone_observes_nothing() {
        assert!(!ObserveOptions::SUBTREE.is_observing_anything());
        assert!(!ObserveOptions::empty().is_observing_anything());
    }

    #[test]
    fn required_flag_follows_kind() {
        let n = NodeId::from_index(1);
        assert_eq!(
            MutationRecord::child_list(n, vec![], vec![]).required_flag(),
            ObserveOptions::CHILD_LIST
        );
        assert_eq!(
            MutationRecord::attribute(n, "class", None).required_flag(),
            ObserveOptions::ATTRIBUTES
        );
        assert_eq!(
            MutationRecord::character_data(n, "x").required_flag(),
            ObserveOptions::CHARACTER_DATA
        );
    }

    #[test]
    fn touched_nodes_lists_additions_first() {
        let [a, b, c] = [1, 2, 3].map(NodeId::from_index);
        let record = MutationRecord::child_list(a, vec![b], vec![c]);
        assert_eq!(record.touched_nodes().collect::<Vec<_>>(), vec![b, c]);
    }
}
