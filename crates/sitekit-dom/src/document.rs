#![forbid(unsafe_code)]

//! The shared document tree.
//!
//! [`Document`] is a cheap, cloneable handle to one arena of nodes. All
//! methods take `&self` and hold the interior borrow only for the duration of
//! the call, so callers (component factories in particular) may freely read
//! and edit the tree from inside callbacks that were handed a `Document`.
//!
//! # Invariants
//!
//! 1. Every node has at most one parent, and a node's parent lists it exactly
//!    once among its children.
//! 2. The tree is acyclic: no node is its own ancestor.
//! 3. Node ids are never reused, so a detached node keeps its identity and can
//!    be re-inserted later.
//! 4. Each child-list edit produces exactly one [`MutationRecord`] per
//!    interested observer registration, in edit order.
//!
//! # Failure Modes
//!
//! - Edits referencing unknown ids return [`DomError::UnknownNode`].
//! - Queries on unknown ids answer negatively (`None`, `false`, empty `Vec`).

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::{DomError, Result, SelectorError};
use crate::mutation::{MutationRecord, ObserveOptions, ObserverId, Registration};
use crate::node::{NodeData, NodeId, NodeKind};
use crate::selector::{MatchContext, SelectorList};

/// Cloneable handle to a shared document tree.
#[derive(Clone)]
pub struct Document {
    tree: Rc<RefCell<Tree>>,
}

pub(crate) struct Tree {
    nodes: Vec<NodeData>,
    document: NodeId,
    html: NodeId,
    head: NodeId,
    body: NodeId,
    registrations: Vec<Registration>,
    next_observer: u64,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tree = self.tree.borrow();
        f.debug_struct("Document")
            .field("nodes", &tree.nodes.len())
            .field("observers", &tree.registrations.len())
            .finish()
    }
}

impl Document {
    /// Create a document holding `html > (head, body)`.
    #[must_use]
    pub fn new() -> Self {
        let mut tree = Tree {
            nodes: Vec::new(),
            document: NodeId::from_index(0),
            html: NodeId::from_index(0),
            head: NodeId::from_index(0),
            body: NodeId::from_index(0),
            registrations: Vec::new(),
            next_observer: 1,
        };
        tree.document = tree.alloc(NodeData::new(NodeKind::Document));
        tree.html = tree.alloc(NodeData::element("html"));
        tree.head = tree.alloc(NodeData::element("head"));
        tree.body = tree.alloc(NodeData::element("body"));
        let (document, html, head, body) = (tree.document, tree.html, tree.head, tree.body);
        tree.link(document, html);
        tree.link(html, head);
        tree.link(html, body);
        Self {
            tree: Rc::new(RefCell::new(tree)),
        }
    }

    /// Whether both handles point at the same tree.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.tree, &other.tree)
    }

    pub(crate) fn with_tree_mut<R>(&self, f: impl FnOnce(&mut Tree) -> R) -> R {
        f(&mut self.tree.borrow_mut())
    }

    // --- Well-known nodes ---

    /// The document node (root of the tree).
    #[must_use]
    pub fn document_node(&self) -> NodeId {
        self.tree.borrow().document
    }

    /// The `<html>` element.
    #[must_use]
    pub fn document_element(&self) -> NodeId {
        self.tree.borrow().html
    }

    /// The `<head>` element.
    #[must_use]
    pub fn head(&self) -> NodeId {
        self.tree.borrow().head
    }

    /// The `<body>` element.
    #[must_use]
    pub fn body(&self) -> NodeId {
        self.tree.borrow().body
    }

    /// Total nodes ever allocated (attached or not).
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.tree.borrow().nodes.len()
    }

    // --- Creation ---

    /// Create a detached element.
    pub fn create_element(&self, tag: &str) -> NodeId {
        self.tree.borrow_mut().alloc(NodeData::element(tag))
    }

    /// Create a detached text node.
    pub fn create_text(&self, text: &str) -> NodeId {
        self.tree
            .borrow_mut()
            .alloc(NodeData::character_data(NodeKind::Text, text))
    }

    /// Create a detached comment node.
    pub fn create_comment(&self, text: &str) -> NodeId {
        self.tree
            .borrow_mut()
            .alloc(NodeData::character_data(NodeKind::Comment, text))
    }

    /// Create an empty fragment. Inserting a fragment moves its children.
    pub fn create_fragment(&self) -> NodeId {
        self.tree
            .borrow_mut()
            .alloc(NodeData::new(NodeKind::Fragment))
    }

    // --- Tree edits ---

    /// Append `child` as the last child of `parent`.
    ///
    /// A child that already has a parent is moved. A fragment contributes its
    /// children and is left empty. Returns `child`.
    pub fn append_child(&self, parent: NodeId, child: NodeId) -> Result<NodeId> {
        self.insert_before(parent, child, None)
    }

    /// Insert `child` before `reference` (or append when `reference` is `None`).
    pub fn insert_before(
        &self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> Result<NodeId> {
        let mut tree = self.tree.borrow_mut();
        tree.check_insert(parent, child)?;
        if let Some(reference) = reference {
            if tree.parent_of(reference) != Some(parent) {
                return Err(DomError::NotAChild {
                    parent,
                    child: reference,
                });
            }
            if reference == child {
                return Ok(child);
            }
        }

        let nodes = tree.take_for_insertion(child);
        let index = match reference {
            Some(reference) => tree.index_in_parent(parent, reference),
            None => tree.child_count(parent),
        };
        tree.insert_at(parent, index, nodes, Vec::new());
        Ok(child)
    }

    /// Remove `child` from `parent`. Returns `child`.
    pub fn remove_child(&self, parent: NodeId, child: NodeId) -> Result<NodeId> {
        let mut tree = self.tree.borrow_mut();
        tree.require(parent)?;
        tree.require(child)?;
        if tree.parent_of(child) != Some(parent) {
            return Err(DomError::NotAChild { parent, child });
        }
        tree.detach_recorded(child);
        Ok(child)
    }

    /// Remove `node` from its parent, if it has one.
    pub fn detach(&self, node: NodeId) -> Result<bool> {
        let mut tree = self.tree.borrow_mut();
        tree.require(node)?;
        Ok(tree.detach_recorded(node).is_some())
    }

    /// Replace `old` with `new` in `old`'s parent, as a single mutation.
    pub fn replace_with(&self, old: NodeId, new: NodeId) -> Result<()> {
        let mut tree = self.tree.borrow_mut();
        tree.require(old)?;
        let parent = tree.parent_of(old).ok_or(DomError::Orphan { node: old })?;
        if old == new {
            return Ok(());
        }
        tree.check_insert(parent, new)?;

        let nodes = tree.take_for_insertion(new);
        let index = tree.index_in_parent(parent, old);
        tree.unlink(old);
        tree.insert_at(parent, index, nodes, vec![old]);
        Ok(())
    }

    /// Remove every child of `node` as a single mutation.
    pub fn clear_children(&self, node: NodeId) -> Result<()> {
        let mut tree = self.tree.borrow_mut();
        tree.require(node)?;
        let removed = std::mem::take(&mut tree.nodes[node.index()].children);
        if removed.is_empty() {
            return Ok(());
        }
        for &child in &removed {
            tree.nodes[child.index()].parent = None;
        }
        tree.queue(MutationRecord::child_list(node, Vec::new(), removed));
        Ok(())
    }

    // --- Attributes ---

    /// Set an attribute on an element (name is lowercased).
    pub fn set_attribute(&self, element: NodeId, name: &str, value: &str) -> Result<()> {
        let mut tree = self.tree.borrow_mut();
        tree.require_element(element)?;
        tree.set_attribute_raw(element, name.to_ascii_lowercase(), value);
        Ok(())
    }

    /// Remove an attribute. Returns whether it was present.
    pub fn remove_attribute(&self, element: NodeId, name: &str) -> Result<bool> {
        let mut tree = self.tree.borrow_mut();
        tree.require_element(element)?;
        let name = name.to_ascii_lowercase();
        let old = tree.nodes[element.index()].attributes.remove(&name);
        let existed = old.is_some();
        if existed {
            tree.queue(MutationRecord::attribute(element, name, old));
        }
        Ok(existed)
    }

    /// Attribute value, if present.
    #[must_use]
    pub fn get_attribute(&self, element: NodeId, name: &str) -> Option<String> {
        let name = name.to_ascii_lowercase();
        self.tree
            .borrow()
            .attribute(element, &name)
            .map(str::to_owned)
    }

    /// Whether the attribute is present.
    #[must_use]
    pub fn has_attribute(&self, element: NodeId, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        self.tree.borrow().attribute(element, &name).is_some()
    }

    /// Attribute names of an element, sorted.
    #[must_use]
    pub fn attribute_names(&self, element: NodeId) -> Vec<String> {
        let tree = self.tree.borrow();
        let mut names: Vec<String> = tree
            .node(element)
            .map(|d| d.attributes.keys().cloned().collect())
            .unwrap_or_default();
        names.sort_unstable();
        names
    }

    /// Whitespace-separated entries of the `class` attribute.
    #[must_use]
    pub fn class_list(&self, element: NodeId) -> Vec<String> {
        self.tree
            .borrow()
            .attribute(element, "class")
            .map(|c| c.split_ascii_whitespace().map(str::to_owned).collect())
            .unwrap_or_default()
    }

    // --- Character data ---

    /// Replace the text of a text or comment node.
    pub fn set_text(&self, node: NodeId, text: &str) -> Result<()> {
        let mut tree = self.tree.borrow_mut();
        let data = tree.node(node).ok_or(DomError::unknown(node))?;
        if !data.kind.is_character_data() {
            return Err(DomError::NotCharacterData { node });
        }
        let old = std::mem::replace(&mut tree.nodes[node.index()].text, text.to_owned());
        tree.queue(MutationRecord::character_data(node, old));
        Ok(())
    }

    /// Concatenated text of `node` and its descendants.
    #[must_use]
    pub fn text_content(&self, node: NodeId) -> String {
        let tree = self.tree.borrow();
        let mut out = String::new();
        tree.collect_text(node, &mut out);
        out
    }

    // --- Structure queries ---

    #[must_use]
    pub fn kind(&self, node: NodeId) -> Option<NodeKind> {
        self.tree.borrow().node(node).map(|d| d.kind)
    }

    #[must_use]
    pub fn is_element(&self, node: NodeId) -> bool {
        self.kind(node) == Some(NodeKind::Element)
    }

    /// Lowercased tag name of an element.
    #[must_use]
    pub fn tag_name(&self, node: NodeId) -> Option<String> {
        self.tree
            .borrow()
            .node(node)
            .and_then(|d| d.tag.as_deref().map(str::to_owned))
    }

    #[must_use]
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.tree.borrow().parent_of(node)
    }

    #[must_use]
    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.tree
            .borrow()
            .node(node)
            .map(|d| d.children.clone())
            .unwrap_or_default()
    }

    /// Ancestors of `node`, nearest first, excluding `node`.
    #[must_use]
    pub fn ancestors(&self, node: NodeId) -> Vec<NodeId> {
        let tree = self.tree.borrow();
        let mut out = Vec::new();
        let mut cursor = tree.parent_of(node);
        while let Some(ancestor) = cursor {
            out.push(ancestor);
            cursor = tree.parent_of(ancestor);
        }
        out
    }

    /// Descendants of `node` in document order, excluding `node`.
    #[must_use]
    pub fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let tree = self.tree.borrow();
        let mut out = Vec::new();
        tree.walk(node, &mut |n| out.push(n));
        out
    }

    /// Whether `node` is `ancestor` or one of its descendants.
    #[must_use]
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        self.tree.borrow().is_inclusive_ancestor(ancestor, node)
    }

    /// Whether `node` is attached to the document node.
    #[must_use]
    pub fn is_connected(&self, node: NodeId) -> bool {
        let tree = self.tree.borrow();
        tree.is_inclusive_ancestor(tree.document, node)
    }

    // --- Selector queries ---

    /// Whether `node` matches `selector`.
    pub fn matches(&self, node: NodeId, selector: &str) -> std::result::Result<bool, SelectorError> {
        let list = SelectorList::parse(selector)?;
        Ok(self.matches_list(node, &list))
    }

    /// Whether `node` matches a pre-parsed selector list.
    #[must_use]
    pub fn matches_list(&self, node: NodeId, list: &SelectorList) -> bool {
        list.matches(&*self.tree.borrow(), node)
    }

    /// Nearest inclusive ancestor element matching `selector`.
    pub fn closest(
        &self,
        node: NodeId,
        selector: &str,
    ) -> std::result::Result<Option<NodeId>, SelectorError> {
        let list = SelectorList::parse(selector)?;
        Ok(self.closest_list(node, &list))
    }

    /// Nearest inclusive ancestor element matching a pre-parsed list.
    #[must_use]
    pub fn closest_list(&self, node: NodeId, list: &SelectorList) -> Option<NodeId> {
        let tree = self.tree.borrow();
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            if list.matches(&*tree, current) {
                return Some(current);
            }
            cursor = tree.parent_of(current);
        }
        None
    }

    /// Descendants of `scope` (excluding `scope`) matching `selector`, in
    /// document order.
    pub fn query_selector_all(
        &self,
        scope: NodeId,
        selector: &str,
    ) -> std::result::Result<Vec<NodeId>, SelectorError> {
        let list = SelectorList::parse(selector)?;
        Ok(self.select_all(scope, &list))
    }

    /// First descendant of `scope` matching `selector`.
    pub fn query_selector(
        &self,
        scope: NodeId,
        selector: &str,
    ) -> std::result::Result<Option<NodeId>, SelectorError> {
        let list = SelectorList::parse(selector)?;
        Ok(self.select_all(scope, &list).into_iter().next())
    }

    /// Descendants of `scope` (excluding `scope`) matching a pre-parsed list.
    #[must_use]
    pub fn select_all(&self, scope: NodeId, list: &SelectorList) -> Vec<NodeId> {
        #[cfg(feature = "tracing")]
        let _span = tracing::trace_span!("select_all", scope = %scope, selector = %list).entered();

        let tree = self.tree.borrow();
        let mut out = Vec::new();
        tree.walk(scope, &mut |n| {
            if list.matches(&*tree, n) {
                out.push(n);
            }
        });
        out
    }

    /// Connected element whose `id` attribute equals `id`.
    #[must_use]
    pub fn get_element_by_id(&self, id: &str) -> Option<NodeId> {
        let tree = self.tree.borrow();
        let mut found = None;
        tree.walk(tree.document, &mut |n| {
            if found.is_none() && tree.attribute(n, "id") == Some(id) {
                found = Some(n);
            }
        });
        found
    }

    // --- Observation ---

    /// Register interest in mutations under `target`.
    pub fn observe(&self, target: NodeId, options: ObserveOptions) -> Result<ObserverId> {
        if !options.is_observing_anything() {
            return Err(DomError::EmptyObserveOptions);
        }
        let mut tree = self.tree.borrow_mut();
        tree.require(target)?;
        let id = ObserverId(tree.next_observer);
        tree.next_observer += 1;
        tree.registrations.push(Registration {
            id,
            target,
            options,
            pending: Vec::new(),
        });

        #[cfg(feature = "tracing")]
        tracing::debug!(observer = id.get(), target = %target, ?options, "observe");

        Ok(id)
    }

    /// Drop a registration and its pending records. Returns whether it existed.
    pub fn unobserve(&self, id: ObserverId) -> bool {
        let mut tree = self.tree.borrow_mut();
        let before = tree.registrations.len();
        tree.registrations.retain(|r| r.id != id);
        tree.registrations.len() != before
    }

    /// Drain the pending batch for a registration.
    pub fn take_records(&self, id: ObserverId) -> Vec<MutationRecord> {
        self.tree
            .borrow_mut()
            .registrations
            .iter_mut()
            .find(|r| r.id == id)
            .map(|r| std::mem::take(&mut r.pending))
            .unwrap_or_default()
    }

    /// Number of records waiting for a registration.
    #[must_use]
    pub fn pending_count(&self, id: ObserverId) -> usize {
        self.tree
            .borrow()
            .registrations
            .iter()
            .find(|r| r.id == id)
            .map_or(0, |r| r.pending.len())
    }

    /// Copy of the pending batch, leaving it queued.
    #[must_use]
    pub fn pending_records(&self, id: ObserverId) -> Vec<MutationRecord> {
        self.tree
            .borrow()
            .registrations
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.pending.clone())
            .unwrap_or_default()
    }

    /// Whether a registration is live.
    #[must_use]
    pub fn is_observing(&self, id: ObserverId) -> bool {
        self.tree.borrow().registrations.iter().any(|r| r.id == id)
    }
}

// ---------------------------------------------------------------------------
// Tree internals
// ---------------------------------------------------------------------------

impl Tree {
    pub(crate) fn node(&self, id: NodeId) -> Option<&NodeData> {
        self.nodes.get(id.index())
    }

    fn alloc(&mut self, data: NodeData) -> NodeId {
        self.nodes.push(data);
        NodeId::from_index(self.nodes.len() - 1)
    }

    fn require(&self, id: NodeId) -> Result<&NodeData> {
        self.node(id).ok_or(DomError::unknown(id))
    }

    fn require_element(&self, id: NodeId) -> Result<()> {
        match self.require(id)?.kind {
            NodeKind::Element => Ok(()),
            _ => Err(DomError::NotAnElement { node: id }),
        }
    }

    pub(crate) fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|d| d.parent)
    }

    pub(crate) fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        self.node(id)
            .and_then(|d| d.attributes.get(name))
            .map(String::as_str)
    }

    fn child_count(&self, id: NodeId) -> usize {
        self.node(id).map_or(0, |d| d.children.len())
    }

    fn index_in_parent(&self, parent: NodeId, child: NodeId) -> usize {
        self.nodes[parent.index()]
            .children
            .iter()
            .position(|&c| c == child)
            .unwrap_or(self.nodes[parent.index()].children.len())
    }

    pub(crate) fn is_inclusive_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        if self.node(ancestor).is_none() || self.node(node).is_none() {
            return false;
        }
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.parent_of(current);
        }
        false
    }

    fn check_insert(&self, parent: NodeId, child: NodeId) -> Result<()> {
        if !self.require(parent)?.kind.is_container() {
            return Err(DomError::NotAContainer { parent });
        }
        if self.require(child)?.kind == NodeKind::Document {
            return Err(DomError::DocumentInsertion);
        }
        if self.is_inclusive_ancestor(child, parent) {
            return Err(DomError::Cycle { parent, child });
        }
        Ok(())
    }

    /// Detach `child` (or empty a fragment) and return the nodes to insert.
    fn take_for_insertion(&mut self, child: NodeId) -> Vec<NodeId> {
        if self.nodes[child.index()].kind == NodeKind::Fragment {
            let moved = std::mem::take(&mut self.nodes[child.index()].children);
            for &n in &moved {
                self.nodes[n.index()].parent = None;
            }
            if !moved.is_empty() {
                self.queue(MutationRecord::child_list(child, Vec::new(), moved.clone()));
            }
            moved
        } else {
            self.detach_recorded(child);
            vec![child]
        }
    }

    /// Set an attribute, recording the change like [`Document::set_attribute`].
    /// The caller guarantees `element` is an element.
    pub(crate) fn set_attribute_raw(&mut self, element: NodeId, name: String, value: &str) {
        let old = self.nodes[element.index()]
            .attributes
            .insert(name.clone(), value.to_owned());
        self.queue(MutationRecord::attribute(element, name, old));
    }

    /// Link without recording; only for freshly created, detached nodes.
    pub(crate) fn link(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[child.index()].parent = Some(parent);
        self.nodes[parent.index()].children.push(child);
    }

    /// Remove from parent without recording. Returns `(parent, index)`.
    fn unlink(&mut self, child: NodeId) -> Option<(NodeId, usize)> {
        let parent = self.nodes[child.index()].parent.take()?;
        let siblings = &mut self.nodes[parent.index()].children;
        let index = siblings.iter().position(|&c| c == child)?;
        siblings.remove(index);
        Some((parent, index))
    }

    pub(crate) fn detach_recorded(&mut self, child: NodeId) -> Option<NodeId> {
        let (parent, index) = self.unlink(child)?;
        let siblings = &self.nodes[parent.index()].children;
        let previous = index.checked_sub(1).map(|i| siblings[i]);
        let next = siblings.get(index).copied();
        self.queue(
            MutationRecord::child_list(parent, Vec::new(), vec![child]).with_siblings(previous, next),
        );
        Some(parent)
    }

    pub(crate) fn insert_at(
        &mut self,
        parent: NodeId,
        index: usize,
        nodes: Vec<NodeId>,
        removed: Vec<NodeId>,
    ) {
        if nodes.is_empty() && removed.is_empty() {
            return;
        }
        for &n in &nodes {
            self.nodes[n.index()].parent = Some(parent);
        }
        let siblings = &mut self.nodes[parent.index()].children;
        let index = index.min(siblings.len());
        let previous = index.checked_sub(1).map(|i| siblings[i]);
        let next = siblings.get(index).copied();
        siblings.splice(index..index, nodes.iter().copied());
        self.queue(MutationRecord::child_list(parent, nodes, removed).with_siblings(previous, next));
    }

    pub(crate) fn queue(&mut self, record: MutationRecord) {
        let flag = record.required_flag();
        let interested: Vec<usize> = self
            .registrations
            .iter()
            .enumerate()
            .filter(|(_, reg)| {
                reg.options.contains(flag)
                    && (reg.target == record.target
                        || (reg.options.contains(ObserveOptions::SUBTREE)
                            && self.is_inclusive_ancestor(reg.target, record.target)))
            })
            .map(|(i, _)| i)
            .collect();

        #[cfg(feature = "tracing")]
        tracing::trace!(target_node = %record.target, observers = interested.len(), "mutation queued");

        for i in interested {
            self.registrations[i].pending.push(record.clone());
        }
    }

    /// Pre-order walk over descendants of `root`, excluding `root`.
    fn walk(&self, root: NodeId, visit: &mut impl FnMut(NodeId)) {
        let Some(data) = self.node(root) else {
            return;
        };
        let mut stack: Vec<NodeId> = data.children.iter().rev().copied().collect();
        while let Some(n) = stack.pop() {
            visit(n);
            stack.extend(self.nodes[n.index()].children.iter().rev().copied());
        }
    }

    fn collect_text(&self, node: NodeId, out: &mut String) {
        let Some(data) = self.node(node) else {
            return;
        };
        if data.kind.is_character_data() {
            if data.kind == NodeKind::Text {
                out.push_str(&data.text);
            }
            return;
        }
        for &child in &data.children {
            self.collect_text(child, out);
        }
    }
}

impl MatchContext for Tree {
    fn tag_name(&self, node: NodeId) -> Option<&str> {
        self.node(node).and_then(|d| d.tag.as_deref())
    }

    fn attribute(&self, node: NodeId, name: &str) -> Option<&str> {
        Tree::attribute(self, node, name)
    }

    fn parent_element(&self, node: NodeId) -> Option<NodeId> {
        self.parent_of(node)
            .filter(|&p| self.nodes[p.index()].kind == NodeKind::Element)
    }
}
