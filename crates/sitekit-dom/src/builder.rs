#![forbid(unsafe_code)]

//! Fluent construction of detached element subtrees.
//!
//! ```
//! use sitekit_dom::Document;
//!
//! let doc = Document::new();
//! let list = doc
//!     .element("ul")
//!     .class("menu")
//!     .child(doc.element("li").attr("data-js-tab", "").text("One"))
//!     .child(doc.element("li").attr("data-js-tab", "").text("Two"))
//!     .finish();
//!
//! doc.append_child(doc.body(), list).unwrap();
//! assert_eq!(doc.query_selector_all(doc.body(), "[data-js-tab]").unwrap().len(), 2);
//! ```

use crate::document::Document;
use crate::node::NodeId;

/// Builder for a detached element. Obtain one with [`Document::element`].
#[derive(Debug, Clone)]
#[must_use = "call finish() to obtain the element id"]
pub struct ElementBuilder {
    doc: Document,
    node: NodeId,
}

impl Document {
    /// Start building a detached element.
    pub fn element(&self, tag: &str) -> ElementBuilder {
        ElementBuilder {
            doc: self.clone(),
            node: self.create_element(tag),
        }
    }
}

impl ElementBuilder {
    /// Set an attribute (name is lowercased).
    pub fn attr(self, name: &str, value: &str) -> Self {
        let name = name.to_ascii_lowercase();
        self.doc.with_tree_mut(|tree| tree.set_attribute_raw(self.node, name, value));
        self
    }

    /// Append a class to the `class` attribute.
    pub fn class(self, class: &str) -> Self {
        let merged = match self.doc.get_attribute(self.node, "class") {
            Some(existing) if !existing.is_empty() => format!("{existing} {class}"),
            _ => class.to_owned(),
        };
        self.attr("class", &merged)
    }

    pub fn id(self, id: &str) -> Self {
        self.attr("id", id)
    }

    /// Append a text child.
    pub fn text(self, text: &str) -> Self {
        let text_node = self.doc.create_text(text);
        self.doc.with_tree_mut(|tree| tree.link(self.node, text_node));
        self
    }

    /// Append a child element built by another builder.
    pub fn child(self, child: ElementBuilder) -> Self {
        let child = child.finish();
        self.adopt(child)
    }

    /// Append several children.
    pub fn children(self, children: impl IntoIterator<Item = ElementBuilder>) -> Self {
        children.into_iter().fold(self, Self::child)
    }

    /// Append an existing node, moving it out of its current parent.
    ///
    /// Nodes that cannot be placed here (the document node, or an ancestor of
    /// this element) are left where they are.
    pub fn adopt(self, node: NodeId) -> Self {
        let _ = self.doc.append_child(self.node, node);
        self
    }

    /// The element being built.
    #[must_use]
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Finish and return the element id.
    #[must_use]
    pub fn finish(self) -> NodeId {
        self.node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::ObserveOptions;

    #[test]
    fn builder_produces_detached_subtree() {
        let doc = Document::new();
        let card = doc
            .element("DIV")
            .id("card")
            .class("card")
            .class("card--wide")
            .child(doc.element("h2").text("Title"))
            .finish();

        assert_eq!(doc.parent(card), None);
        assert_eq!(doc.tag_name(card).as_deref(), Some("div"));
        assert_eq!(doc.class_list(card), vec!["card", "card--wide"]);
        assert_eq!(doc.get_attribute(card, "id").as_deref(), Some("card"));
        assert_eq!(doc.text_content(card), "Title");
    }

    #[test]
    fn building_does_not_notify_body_observers() {
        let doc = Document::new();
        let id = doc.observe(doc.body(), ObserveOptions::CHILD_TREE).unwrap();
        let _detached = doc
            .element("ul")
            .children((0..3).map(|_| doc.element("li")))
            .finish();
        assert_eq!(doc.pending_count(id), 0);
    }

    #[test]
    fn adopt_moves_attached_nodes() {
        let doc = Document::new();
        let existing = doc.create_element("p");
        doc.append_child(doc.body(), existing).unwrap();
        let wrapper = doc.element("section").adopt(existing).finish();
        assert_eq!(doc.parent(existing), Some(wrapper));
        assert!(doc.children(doc.body()).is_empty());
    }
}
