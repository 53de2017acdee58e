#![forbid(unsafe_code)]

//! Node identity and per-node storage.

use std::fmt;

use ahash::AHashMap;

/// Identity of a node inside one [`Document`](crate::Document).
///
/// Ids are allocated sequentially and never reused, so two equal ids always
/// refer to the same node for the lifetime of the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    #[inline]
    pub(crate) const fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    #[inline]
    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }

    /// Raw numeric value, stable for the document lifetime.
    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kind of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Document,
    Element,
    Text,
    Comment,
    Fragment,
}

impl NodeKind {
    /// Whether nodes of this kind may hold children.
    #[inline]
    pub const fn is_container(self) -> bool {
        matches!(self, Self::Document | Self::Element | Self::Fragment)
    }

    /// Whether nodes of this kind carry character data.
    #[inline]
    pub const fn is_character_data(self) -> bool {
        matches!(self, Self::Text | Self::Comment)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct NodeData {
    pub(crate) kind: NodeKind,
    /// Lowercased tag name, only for elements.
    pub(crate) tag: Option<Box<str>>,
    /// Lowercased attribute names.
    pub(crate) attributes: AHashMap<String, String>,
    pub(crate) text: String,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
}

impl NodeData {
    pub(crate) fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            tag: None,
            attributes: AHashMap::new(),
            text: String::new(),
            parent: None,
            children: Vec::new(),
        }
    }

    pub(crate) fn element(tag: &str) -> Self {
        let mut data = Self::new(NodeKind::Element);
        data.tag = Some(tag.to_ascii_lowercase().into_boxed_str());
        data
    }

    pub(crate) fn character_data(kind: NodeKind, text: &str) -> Self {
        let mut data = Self::new(kind);
        data.text.push_str(text);
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_tag_is_lowercased() {
        let data = NodeData::element("DIV");
        assert_eq!(data.tag.as_deref(), Some("div"));
        assert_eq!(data.kind, NodeKind::Element);
    }

    #[test]
    fn container_kinds() {
        assert!(NodeKind::Document.is_container());
        assert!(NodeKind::Element.is_container());
        assert!(NodeKind::Fragment.is_container());
        assert!(!NodeKind::Text.is_container());
        assert!(!NodeKind::Comment.is_container());
    }

    #[test]
    fn node_id_display() {
        assert_eq!(NodeId::from_index(7).to_string(), "#7");
        assert_eq!(NodeId::from_index(7).get(), 7);
    }
}
