#![forbid(unsafe_code)]

//! Error types for tree edits and selector parsing.

use thiserror::Error;

use crate::node::NodeId;

pub type Result<T> = std::result::Result<T, DomError>;

/// Errors raised by tree edits and observation requests.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomError {
    #[error("unknown node: {node}")]
    UnknownNode { node: NodeId },

    #[error("node {parent} cannot have children")]
    NotAContainer { parent: NodeId },

    #[error("inserting {child} into {parent} would create a cycle")]
    Cycle { parent: NodeId, child: NodeId },

    #[error("a document node cannot be inserted into another node")]
    DocumentInsertion,

    #[error("node {child} is not a child of {parent}")]
    NotAChild { parent: NodeId, child: NodeId },

    #[error("node {node} has no parent")]
    Orphan { node: NodeId },

    #[error("node {node} is not an element")]
    NotAnElement { node: NodeId },

    #[error("node {node} does not carry text")]
    NotCharacterData { node: NodeId },

    #[error("observe options must include child-list, attributes, or character-data")]
    EmptyObserveOptions,

    #[error(transparent)]
    Selector(#[from] SelectorError),
}

impl DomError {
    #[must_use]
    pub fn unknown(node: NodeId) -> Self {
        Self::UnknownNode { node }
    }
}

/// Errors raised while parsing a selector list.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("selector is empty")]
    Empty,

    #[error("unexpected character {found:?} at offset {offset}")]
    UnexpectedChar { found: char, offset: usize },

    #[error("unexpected end of selector")]
    UnexpectedEnd,

    #[error("missing compound selector at offset {offset}")]
    MissingCompound { offset: usize },

    #[error("unsupported selector syntax {what:?} at offset {offset}")]
    Unsupported { what: String, offset: usize },
}
