#![forbid(unsafe_code)]

//! The runtime context.
//!
//! A [`RuntimeContext`] is one independent scope: a document handle, the
//! mutation watcher on its root, the change dispatcher, the signal hub, the
//! element claim set and the configuration. Registries are always constructed
//! against a context, and two contexts never see each other's state.
//!
//! ```
//! use sitekit_dom::Document;
//! use sitekit_runtime::{Component, RuntimeContext};
//!
//! struct Slider;
//! impl Component for Slider {}
//!
//! let doc = Document::new();
//! let ctx = RuntimeContext::new(doc.clone());
//! let sliders = ctx.register_infallible("[data-slider]", |_, _| Slider).unwrap();
//!
//! let el = doc.element("div").attr("data-slider", "").finish();
//! doc.append_child(doc.body(), el).unwrap();
//! ctx.settle().unwrap();
//! assert_eq!(sliders.len(), 1);
//! ```

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use ahash::AHashMap;
use sitekit_dom::{Document, NodeId};

use crate::component::{Action, Component};
use crate::config::RuntimeConfig;
use crate::dispatcher::ChangeDispatcher;
use crate::error::{BoxError, Result, RuntimeError};
use crate::registry::{InstanceRegistry, RegisterOptions};
use crate::signals::{ContentLoaded, Signals};
use crate::watcher::MutationWatcher;

// ---------------------------------------------------------------------------
// ClaimSet
// ---------------------------------------------------------------------------

/// Which registration owns each element.
///
/// An element claimed by one registry is never instantiated by another.
/// Owners are compared by handle identity, not by text: two registrations
/// of the same selector string are distinct owners.
#[derive(Clone, Default)]
pub struct ClaimSet {
    owners: Rc<RefCell<AHashMap<NodeId, Rc<str>>>>,
}

impl fmt::Debug for ClaimSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClaimSet")
            .field("claimed", &self.owners.borrow().len())
            .finish()
    }
}

impl ClaimSet {
    /// Selector of the registry owning `element`.
    #[must_use]
    pub fn owner(&self, element: NodeId) -> Option<Rc<str>> {
        self.owners.borrow().get(&element).cloned()
    }

    /// Whether `owner` (by identity) holds `element`.
    #[must_use]
    pub fn is_owned_by(&self, element: NodeId, owner: &Rc<str>) -> bool {
        self.owners
            .borrow()
            .get(&element)
            .is_some_and(|o| Rc::ptr_eq(o, owner))
    }

    /// Claim `element` for `owner`.
    ///
    /// Succeeds when the element is free or already held by `owner`;
    /// otherwise returns the current owner.
    pub fn try_claim(&self, element: NodeId, owner: &Rc<str>) -> std::result::Result<(), Rc<str>> {
        let mut owners = self.owners.borrow_mut();
        match owners.get(&element) {
            Some(current) if !Rc::ptr_eq(current, owner) => Err(Rc::clone(current)),
            Some(_) => Ok(()),
            None => {
                owners.insert(element, Rc::clone(owner));
                Ok(())
            }
        }
    }

    /// Release `element` if `owner` holds it.
    pub fn release(&self, element: NodeId, owner: &Rc<str>) -> bool {
        let mut owners = self.owners.borrow_mut();
        if owners.get(&element).is_some_and(|o| Rc::ptr_eq(o, owner)) {
            owners.remove(&element);
            true
        } else {
            false
        }
    }

    /// Release every element held by `owner`. Returns how many.
    pub fn release_all(&self, owner: &Rc<str>) -> usize {
        let mut owners = self.owners.borrow_mut();
        let before = owners.len();
        owners.retain(|_, o| !Rc::ptr_eq(o, owner));
        before - owners.len()
    }

    pub fn clear(&self) {
        self.owners.borrow_mut().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.owners.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.owners.borrow().is_empty()
    }
}

// ---------------------------------------------------------------------------
// RuntimeContext
// ---------------------------------------------------------------------------

/// Cloneable handle to one runtime scope.
#[derive(Clone)]
pub struct RuntimeContext {
    inner: Rc<ContextInner>,
}

struct ContextInner {
    document: Document,
    config: RuntimeConfig,
    watcher: MutationWatcher,
    dispatcher: ChangeDispatcher,
    signals: Signals,
    claims: ClaimSet,
}

impl fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeContext")
            .field("watcher", &self.inner.watcher)
            .field("dispatcher", &self.inner.dispatcher)
            .field("claims", &self.inner.claims)
            .finish()
    }
}

/// Builder for [`RuntimeContext`].
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    document: Document,
    config: RuntimeConfig,
    root: Option<NodeId>,
}

impl ContextBuilder {
    #[must_use]
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Watch `root` instead of `body`.
    #[must_use]
    pub fn with_root(mut self, root: NodeId) -> Self {
        self.root = Some(root);
        self
    }

    /// Normalize and validate the configuration, then assemble the context.
    pub fn build(self) -> Result<RuntimeContext> {
        let config = self.config.normalized()?;
        let root = self.root.unwrap_or_else(|| self.document.body());
        if !self.document.is_element(root) {
            tracing::error!(root = %root, "runtime context: watched root is not an element");
            return Err(RuntimeError::NotAnElement { node: root });
        }
        Ok(RuntimeContext::assemble(self.document, config, root))
    }
}

impl RuntimeContext {
    /// Context with the default configuration, watching `body`.
    #[must_use]
    pub fn new(document: Document) -> Self {
        let root = document.body();
        Self::assemble(document, RuntimeConfig::default(), root)
    }

    #[must_use]
    pub fn builder(document: Document) -> ContextBuilder {
        ContextBuilder {
            document,
            config: RuntimeConfig::default(),
            root: None,
        }
    }

    fn assemble(document: Document, config: RuntimeConfig, root: NodeId) -> Self {
        let watcher = MutationWatcher::new(document.clone(), root, config.observer.clone());
        let signals = Signals::new();
        let dispatcher = ChangeDispatcher::new(document.clone());
        dispatcher.bind(&signals);
        tracing::debug!(root = %root, "runtime context created");
        Self {
            inner: Rc::new(ContextInner {
                document,
                config,
                watcher,
                dispatcher,
                signals,
                claims: ClaimSet::default(),
            }),
        }
    }

    // --- Accessors ---

    #[must_use]
    pub fn document(&self) -> &Document {
        &self.inner.document
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn watcher(&self) -> &MutationWatcher {
        &self.inner.watcher
    }

    #[must_use]
    pub fn dispatcher(&self) -> &ChangeDispatcher {
        &self.inner.dispatcher
    }

    #[must_use]
    pub fn signals(&self) -> &Signals {
        &self.inner.signals
    }

    #[must_use]
    pub fn claims(&self) -> &ClaimSet {
        &self.inner.claims
    }

    /// The watched root.
    #[must_use]
    pub fn root(&self) -> NodeId {
        self.inner.watcher.root()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // --- Registration ---

    /// Register a component type for `selector` and scan the document.
    pub fn register<T, F, E>(&self, selector: &str, factory: F) -> Result<InstanceRegistry<T>>
    where
        T: Component,
        F: Fn(&Document, NodeId) -> std::result::Result<T, E> + 'static,
        E: Into<BoxError>,
    {
        InstanceRegistry::register(self, selector, factory, RegisterOptions::default())
    }

    /// Register with explicit options.
    pub fn register_with<T, F, E>(
        &self,
        selector: &str,
        factory: F,
        options: RegisterOptions,
    ) -> Result<InstanceRegistry<T>>
    where
        T: Component,
        F: Fn(&Document, NodeId) -> std::result::Result<T, E> + 'static,
        E: Into<BoxError>,
    {
        InstanceRegistry::register(self, selector, factory, options)
    }

    /// Register a factory that cannot fail.
    pub fn register_infallible<T, F>(&self, selector: &str, factory: F) -> Result<InstanceRegistry<T>>
    where
        T: Component,
        F: Fn(&Document, NodeId) -> T + 'static,
    {
        self.register(selector, move |doc, el| {
            Ok::<T, std::convert::Infallible>(factory(doc, el))
        })
    }

    // --- Signals and actions ---

    /// Announce that `content` was attached. Every registered component scans
    /// its subtree.
    ///
    /// Returns how many signal listeners ran (the dispatcher's binding plus
    /// any application listeners), not how many instances were added. Use
    /// [`ChangeDispatcher::reinitialize`] directly for the added count.
    pub fn dispatch_content_loaded(&self, content: NodeId) -> Result<usize> {
        self.inner
            .signals
            .content_loaded()
            .emit(&ContentLoaded { content })
    }

    /// Deliver `action` to every live instance under `root`.
    pub fn dispatch_action(&self, root: NodeId, action: &Action) -> usize {
        self.inner.dispatcher.dispatch_action(root, action)
    }

    /// Deliver `action` to every live instance under `body`.
    pub fn broadcast_action(&self, action: &Action) -> usize {
        self.dispatch_action(self.inner.document.body(), action)
    }

    // --- Delivery ---

    /// Deliver the currently queued mutation batch.
    pub fn flush(&self) -> Result<usize> {
        self.inner.watcher.flush()
    }

    /// Flush until no mutations are queued. Returns the rounds run.
    ///
    /// Fails with [`RuntimeError::Unsettled`] when reconciliation keeps
    /// producing mutations past `max_settle_rounds`. Returns `Ok(0)` when
    /// called from inside a delivery.
    pub fn settle(&self) -> Result<usize> {
        #[cfg(feature = "tracing")]
        let _span = tracing::debug_span!("context.settle").entered();

        let watcher = &self.inner.watcher;
        if watcher.is_delivering() {
            return Ok(0);
        }
        let max = self.inner.config.max_settle_rounds;
        let mut rounds = 0;
        while watcher.has_pending() {
            if rounds == max {
                tracing::warn!(rounds, "runtime context: mutations did not settle");
                return Err(RuntimeError::Unsettled { rounds });
            }
            watcher.flush()?;
            rounds += 1;
        }
        Ok(rounds)
    }

    /// Disconnect the watcher, unbind the dispatcher and release every claim.
    ///
    /// Registries that are still alive keep their instances but no longer
    /// receive batches or content-loaded scans.
    pub fn shutdown(&self) {
        self.inner.watcher.disconnect();
        self.inner.dispatcher.unbind();
        self.inner.dispatcher.clear();
        self.inner.claims.clear();
        tracing::debug!("runtime context shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_set_first_owner_wins() {
        let claims = ClaimSet::default();
        let doc = Document::new();
        let el = doc.create_element("div");
        let a: Rc<str> = Rc::from("[data-a]");
        let b: Rc<str> = Rc::from("[data-b]");
        assert!(claims.try_claim(el, &a).is_ok());
        assert!(claims.try_claim(el, &a).is_ok());
        assert_eq!(claims.try_claim(el, &b).unwrap_err(), a);
        assert!(!claims.release(el, &b));
        assert!(claims.release(el, &a));
        assert!(claims.is_empty());
    }

    #[test]
    fn owners_with_equal_text_are_distinct() {
        let claims = ClaimSet::default();
        let doc = Document::new();
        let el = doc.create_element("div");
        let first: Rc<str> = Rc::from("[data-x]");
        let second: Rc<str> = Rc::from("[data-x]");
        claims.try_claim(el, &first).unwrap();
        assert!(claims.try_claim(el, &second).is_err());
        assert!(!claims.release(el, &second));
        assert_eq!(claims.release_all(&second), 0);
        assert!(claims.is_owned_by(el, &first));
        assert_eq!(claims.owner(el).as_deref(), Some("[data-x]"));
    }

    #[test]
    fn release_all_only_touches_one_owner() {
        let claims = ClaimSet::default();
        let doc = Document::new();
        let a: Rc<str> = Rc::from("a");
        let b: Rc<str> = Rc::from("b");
        for _ in 0..3 {
            claims.try_claim(doc.create_element("div"), &a).unwrap();
        }
        claims.try_claim(doc.create_element("div"), &b).unwrap();
        assert_eq!(claims.release_all(&a), 3);
        assert_eq!(claims.len(), 1);
    }

    #[test]
    fn builder_validates_root_and_config() {
        let doc = Document::new();
        let text = doc.create_text("x");
        assert!(matches!(
            RuntimeContext::builder(doc.clone()).with_root(text).build(),
            Err(RuntimeError::NotAnElement { .. })
        ));
        assert!(matches!(
            RuntimeContext::builder(doc.clone())
                .with_config(RuntimeConfig::default().with_max_settle_rounds(0))
                .build(),
            Err(RuntimeError::Config(_))
        ));
        let main = doc.create_element("main");
        doc.append_child(doc.body(), main).unwrap();
        let ctx = RuntimeContext::builder(doc).with_root(main).build().unwrap();
        assert_eq!(ctx.root(), main);
    }

    #[test]
    fn new_context_is_bound_and_idle() {
        let ctx = RuntimeContext::new(Document::new());
        assert!(ctx.dispatcher().is_bound());
        assert!(!ctx.watcher().is_connected());
        assert_eq!(ctx.settle().unwrap(), 0);
        assert_eq!(ctx.dispatch_content_loaded(ctx.root()).unwrap(), 1);
    }

    #[test]
    fn content_loaded_reports_listeners_not_instances() {
        struct Tab;
        impl Component for Tab {}

        let doc = Document::new();
        let ctx = RuntimeContext::new(doc.clone());
        let tabs = ctx
            .register_with("[data-tab]", |_, _| Ok::<_, BoxError>(Tab), RegisterOptions::manual())
            .unwrap();
        let section = doc.create_element("section");
        for _ in 0..3 {
            let tab = doc.element("div").attr("data-tab", "").finish();
            doc.append_child(section, tab).unwrap();
        }
        doc.append_child(doc.body(), section).unwrap();

        let _app = ctx.signals().content_loaded().subscribe(|_| Ok(()));
        assert_eq!(ctx.dispatch_content_loaded(section).unwrap(), 2);
        assert_eq!(tabs.len(), 3);
        assert_eq!(ctx.dispatcher().reinitialize(section).unwrap(), 0);
    }

    #[test]
    fn contexts_are_independent() {
        let doc = Document::new();
        let a = RuntimeContext::new(doc.clone());
        let b = RuntimeContext::new(doc);
        assert!(!a.ptr_eq(&b));
        assert!(a.ptr_eq(&a.clone()));
    }
}
