#![forbid(unsafe_code)]

//! Per-component instance registries.
//!
//! An [`InstanceRegistry<T>`] owns the live set of `T` instances for one
//! `(selector, factory)` pair and keeps it in step with the document:
//!
//! - every accepted mutation batch triggers [`reconcile`](InstanceRegistry::reconcile),
//!   which drops instances whose element left the watched root and then
//!   instantiates newly matching elements;
//! - every content-loaded signal triggers a [`scan`](InstanceRegistry::scan)
//!   of the signalled subtree only.
//!
//! # Invariants
//!
//! 1. At most one instance per element within a registry.
//! 2. An element is tracked by at most one registry per context (claim set).
//! 3. Within one reconcile, removal precedes addition.
//! 4. A factory error leaves the element untracked and unclaimed.
//!
//! # Failure Modes
//!
//! - Factory errors abort the running scan and surface as
//!   [`RuntimeError::Factory`]. Elements already added in that scan stay.
//! - Hooks and factories may edit the document; those edits are queued and
//!   reach the registry on the next flush.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use ahash::AHashSet;
use sitekit_dom::{Document, NodeId, SelectorList};

use crate::component::Component;
use crate::context::RuntimeContext;
use crate::error::{BoxError, Result, RuntimeError};

type Factory<T> = dyn Fn(&Document, NodeId) -> std::result::Result<T, BoxError>;
type Hook = dyn Fn(NodeId);

// ---------------------------------------------------------------------------
// Options and outcomes
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct Hooks {
    before_add: Vec<Rc<Hook>>,
    after_add: Vec<Rc<Hook>>,
    before_remove: Vec<Rc<Hook>>,
    after_remove: Vec<Rc<Hook>>,
}

/// Registration options.
#[derive(Clone)]
pub struct RegisterOptions {
    /// Scan the whole document right after registering.
    pub auto_init: bool,
    hooks: Hooks,
}

impl Default for RegisterOptions {
    fn default() -> Self {
        Self {
            auto_init: true,
            hooks: Hooks::default(),
        }
    }
}

impl fmt::Debug for RegisterOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterOptions")
            .field("auto_init", &self.auto_init)
            .field("before_add", &self.hooks.before_add.len())
            .field("after_add", &self.hooks.after_add.len())
            .field("before_remove", &self.hooks.before_remove.len())
            .field("after_remove", &self.hooks.after_remove.len())
            .finish()
    }
}

impl RegisterOptions {
    #[must_use]
    pub fn with_auto_init(mut self, auto_init: bool) -> Self {
        self.auto_init = auto_init;
        self
    }

    /// Register without the initial document scan.
    #[must_use]
    pub fn manual() -> Self {
        Self::default().with_auto_init(false)
    }

    #[must_use]
    pub fn before_add(mut self, hook: impl Fn(NodeId) + 'static) -> Self {
        self.hooks.before_add.push(Rc::new(hook));
        self
    }

    #[must_use]
    pub fn after_add(mut self, hook: impl Fn(NodeId) + 'static) -> Self {
        self.hooks.after_add.push(Rc::new(hook));
        self
    }

    #[must_use]
    pub fn before_remove(mut self, hook: impl Fn(NodeId) + 'static) -> Self {
        self.hooks.before_remove.push(Rc::new(hook));
        self
    }

    #[must_use]
    pub fn after_remove(mut self, hook: impl Fn(NodeId) + 'static) -> Self {
        self.hooks.after_remove.push(Rc::new(hook));
        self
    }
}

/// Result of [`InstanceRegistry::add`].
pub enum AddOutcome<T> {
    /// A new instance was created and tracked.
    Added(Rc<T>),
    /// This registry already tracks the element.
    AlreadyTracked,
    /// Another registry in the same context owns the element.
    ClaimedElsewhere,
}

impl<T> AddOutcome<T> {
    #[must_use]
    pub fn is_added(&self) -> bool {
        matches!(self, Self::Added(_))
    }

    /// The new instance, if one was created.
    #[must_use]
    pub fn instance(self) -> Option<Rc<T>> {
        match self {
            Self::Added(instance) => Some(instance),
            Self::AlreadyTracked | Self::ClaimedElsewhere => None,
        }
    }
}

impl<T> fmt::Debug for AddOutcome<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Added(_) => f.write_str("Added(..)"),
            Self::AlreadyTracked => f.write_str("AlreadyTracked"),
            Self::ClaimedElsewhere => f.write_str("ClaimedElsewhere"),
        }
    }
}

/// What one [`InstanceRegistry::reconcile`] pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub removed: usize,
    pub added: usize,
}

impl ReconcileReport {
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.removed == 0 && self.added == 0
    }
}

// ---------------------------------------------------------------------------
// InstanceRegistry
// ---------------------------------------------------------------------------

/// Cloneable handle to one component registry.
///
/// Dropping the last handle unregisters it.
pub struct InstanceRegistry<T: Component> {
    inner: Rc<RegistryInner<T>>,
}

struct RegistryInner<T: Component> {
    ctx: RuntimeContext,
    selector: Rc<str>,
    list: SelectorList,
    factory: Box<Factory<T>>,
    state: RefCell<RegistryState<T>>,
    hooks: RefCell<Hooks>,
    /// Entry keys handed out by the watcher and the dispatcher. Teardown
    /// goes through these so a later registration of the same selector
    /// text is never touched.
    watch_key: RefCell<Option<Rc<str>>>,
    initiator_key: RefCell<Option<Rc<str>>>,
}

struct RegistryState<T> {
    live: Vec<(NodeId, Rc<T>)>,
    /// Elements already reported as claimed elsewhere.
    warned: AHashSet<NodeId>,
    /// Elements whose removal hooks are running.
    removing: AHashSet<NodeId>,
}

impl<T: Component> Clone for InstanceRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Component> fmt::Debug for InstanceRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceRegistry")
            .field("selector", &&*self.inner.selector)
            .field("live", &self.inner.state.borrow().live.len())
            .field("registered", &self.is_registered())
            .finish()
    }
}

impl<T: Component> InstanceRegistry<T> {
    /// Validate `selector`, subscribe to the context's watcher and dispatcher,
    /// and (with `auto_init`) scan the whole document.
    ///
    /// A failed initial scan drops the registry again and returns the error.
    pub fn register<F, E>(
        ctx: &RuntimeContext,
        selector: &str,
        factory: F,
        options: RegisterOptions,
    ) -> Result<Self>
    where
        F: Fn(&Document, NodeId) -> std::result::Result<T, E> + 'static,
        E: Into<BoxError>,
    {
        let selector = selector.trim();
        if selector.is_empty() {
            tracing::error!("registry: selector is empty");
            return Err(RuntimeError::EmptySelector);
        }
        let list = SelectorList::parse(selector).map_err(|source| {
            tracing::error!(selector, error = %source, "registry: invalid selector");
            RuntimeError::InvalidSelector {
                selector: selector.to_owned(),
                source,
            }
        })?;
        if ctx.watcher().is_subscribed(selector) || ctx.dispatcher().is_initiator_registered(selector)
        {
            tracing::warn!(selector, "registry: selector already registered");
            return Err(RuntimeError::duplicate(selector));
        }

        let inner = Rc::new(RegistryInner {
            ctx: ctx.clone(),
            selector: Rc::from(selector),
            list,
            factory: Box::new(move |doc, el| factory(doc, el).map_err(Into::into)),
            state: RefCell::new(RegistryState {
                live: Vec::new(),
                warned: AHashSet::new(),
                removing: AHashSet::new(),
            }),
            hooks: RefCell::new(options.hooks),
            watch_key: RefCell::new(None),
            initiator_key: RefCell::new(None),
        });

        let weak = Rc::downgrade(&inner);
        let watch_key = ctx.watcher().subscribe(selector, move |_records| match weak.upgrade() {
            Some(inner) => InstanceRegistry { inner }.reconcile().map(drop),
            None => Ok(()),
        })?;
        *inner.watch_key.borrow_mut() = Some(watch_key);

        let scan_weak = Rc::downgrade(&inner);
        let list_weak = Rc::downgrade(&inner);
        let initiator_key = ctx.dispatcher().register_initiator(
            selector,
            move |root| match scan_weak.upgrade() {
                Some(inner) => InstanceRegistry { inner }.scan(root),
                None => Ok(0),
            },
            move || {
                let Some(inner) = list_weak.upgrade() else {
                    return Vec::new();
                };
                let state = inner.state.borrow();
                state
                    .live
                    .iter()
                    .map(|(el, instance)| (*el, Rc::clone(instance) as Rc<dyn Component>))
                    .collect()
            },
        )?;
        *inner.initiator_key.borrow_mut() = Some(initiator_key);

        let registry = Self { inner };
        tracing::debug!(selector, auto_init = options.auto_init, "registry registered");
        if options.auto_init {
            let root = ctx.document().document_node();
            registry.scan(root)?;
        }
        Ok(registry)
    }

    // --- Accessors ---

    #[must_use]
    pub fn selector(&self) -> &str {
        &self.inner.selector
    }

    #[must_use]
    pub fn selector_list(&self) -> &SelectorList {
        &self.inner.list
    }

    #[must_use]
    pub fn context(&self) -> &RuntimeContext {
        &self.inner.ctx
    }

    /// Whether this registry still receives batches or scans.
    ///
    /// Turns `false` after [`unregister`](Self::unregister) and after the
    /// context shuts down.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        let inner = &self.inner;
        inner
            .watch_key
            .borrow()
            .as_ref()
            .is_some_and(|key| inner.ctx.watcher().holds_key(key))
            || inner
                .initiator_key
                .borrow()
                .as_ref()
                .is_some_and(|key| inner.ctx.dispatcher().holds_key(key))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.borrow().live.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.state.borrow().live.is_empty()
    }

    #[must_use]
    pub fn contains(&self, element: NodeId) -> bool {
        self.inner
            .state
            .borrow()
            .live
            .iter()
            .any(|(el, _)| *el == element)
    }

    /// Instance tracked for `element`.
    #[must_use]
    pub fn get_by_element(&self, element: NodeId) -> Option<Rc<T>> {
        self.inner
            .state
            .borrow()
            .live
            .iter()
            .find(|(el, _)| *el == element)
            .map(|(_, instance)| Rc::clone(instance))
    }

    /// Live instances in insertion order.
    #[must_use]
    pub fn collection(&self) -> Vec<Rc<T>> {
        self.inner
            .state
            .borrow()
            .live
            .iter()
            .map(|(_, instance)| Rc::clone(instance))
            .collect()
    }

    /// Tracked elements in insertion order.
    #[must_use]
    pub fn elements(&self) -> Vec<NodeId> {
        self.inner.state.borrow().live.iter().map(|(el, _)| *el).collect()
    }

    #[must_use]
    pub fn entries(&self) -> Vec<(NodeId, Rc<T>)> {
        self.inner.state.borrow().live.clone()
    }

    // --- Hooks ---

    pub fn on_before_add(&self, hook: impl Fn(NodeId) + 'static) {
        self.inner.hooks.borrow_mut().before_add.push(Rc::new(hook));
    }

    pub fn on_after_add(&self, hook: impl Fn(NodeId) + 'static) {
        self.inner.hooks.borrow_mut().after_add.push(Rc::new(hook));
    }

    pub fn on_before_remove(&self, hook: impl Fn(NodeId) + 'static) {
        self.inner.hooks.borrow_mut().before_remove.push(Rc::new(hook));
    }

    pub fn on_after_remove(&self, hook: impl Fn(NodeId) + 'static) {
        self.inner.hooks.borrow_mut().after_remove.push(Rc::new(hook));
    }

    // --- Membership ---

    /// Instantiate and track `element` unless it is already tracked here or
    /// claimed by another registry.
    pub fn add(&self, element: NodeId) -> Result<AddOutcome<T>> {
        if let Some(outcome) = self.precheck(element)? {
            return Ok(outcome);
        }
        let document = self.inner.ctx.document().clone();
        let instance = (self.inner.factory)(&document, element).map_err(|source| {
            tracing::error!(
                selector = %self.inner.selector,
                element = %element,
                error = %source,
                "registry: factory failed"
            );
            RuntimeError::Factory {
                selector: self.inner.selector.to_string(),
                element,
                source,
            }
        })?;
        self.insert(element, Rc::new(instance))
    }

    /// Track a pre-constructed instance for `element`.
    ///
    /// The instance is dropped when the element is already tracked or
    /// claimed elsewhere.
    pub fn adopt(&self, element: NodeId, instance: T) -> Result<AddOutcome<T>> {
        if let Some(outcome) = self.precheck(element)? {
            return Ok(outcome);
        }
        self.insert(element, Rc::new(instance))
    }

    /// Stop tracking `element`. Returns the instance it had.
    ///
    /// A call made from this element's own `before_remove` hook returns
    /// `None`; the outer removal completes once.
    pub fn remove(&self, element: NodeId) -> Option<Rc<T>> {
        {
            let mut state = self.inner.state.borrow_mut();
            if !state.live.iter().any(|(el, _)| *el == element) || !state.removing.insert(element) {
                return None;
            }
        }
        let hooks = self.inner.hooks.borrow().clone();
        for hook in &hooks.before_remove {
            hook(element);
        }
        let instance = {
            let mut state = self.inner.state.borrow_mut();
            state.removing.remove(&element);
            let index = state.live.iter().position(|(el, _)| *el == element)?;
            state.live.remove(index).1
        };
        self.inner.ctx.claims().release(element, &self.inner.selector);
        for hook in &hooks.after_remove {
            hook(element);
        }
        tracing::debug!(selector = %self.inner.selector, element = %element, "instance removed");
        Some(instance)
    }

    /// Add every matching element in `root`'s subtree (root included) that
    /// lies inside the watched root. Returns how many were added.
    pub fn scan(&self, root: NodeId) -> Result<usize> {
        let ctx = &self.inner.ctx;
        let document = ctx.document();
        let watched = ctx.root();

        let mut candidates = Vec::new();
        if document.matches_list(root, &self.inner.list) {
            candidates.push(root);
        }
        candidates.extend(document.select_all(root, &self.inner.list));

        let mut added = 0;
        for element in candidates {
            if !document.contains(watched, element) {
                continue;
            }
            if self.add(element)?.is_added() {
                added += 1;
            }
        }
        if added > 0 {
            tracing::debug!(selector = %self.inner.selector, root = %root, added, "scan added instances");
        }
        Ok(added)
    }

    /// Drop instances whose element left the watched root, then scan the
    /// watched root for new matches.
    pub fn reconcile(&self) -> Result<ReconcileReport> {
        #[cfg(feature = "tracing")]
        let _span = tracing::debug_span!("registry.reconcile", selector = %self.inner.selector)
            .entered();

        let ctx = &self.inner.ctx;
        let watched = ctx.root();
        let stale: Vec<NodeId> = {
            let document = ctx.document();
            self.inner
                .state
                .borrow()
                .live
                .iter()
                .map(|(el, _)| *el)
                .filter(|el| !document.contains(watched, *el))
                .collect()
        };
        let mut report = ReconcileReport::default();
        for element in stale {
            if self.remove(element).is_some() {
                report.removed += 1;
            }
        }
        report.added = self.scan(watched)?;
        if !report.is_noop() {
            tracing::debug!(
                selector = %self.inner.selector,
                removed = report.removed,
                added = report.added,
                "registry reconciled"
            );
        }
        Ok(report)
    }

    /// Leave the watcher and dispatcher and remove every instance (hooks
    /// run). Returns `false` when already unregistered.
    ///
    /// After a context shutdown the first call still clears the instances.
    pub fn unregister(&self) -> bool {
        if !self.inner.detach() {
            return false;
        }
        for element in self.elements() {
            self.remove(element);
        }
        tracing::debug!(selector = %self.inner.selector, "registry unregistered");
        true
    }

    // --- Internals ---

    fn precheck(&self, element: NodeId) -> Result<Option<AddOutcome<T>>> {
        if !self.inner.ctx.document().is_element(element) {
            tracing::error!(
                selector = %self.inner.selector,
                node = %element,
                "registry: refusing to track a non-element node"
            );
            return Err(RuntimeError::NotAnElement { node: element });
        }
        if self.contains(element) {
            return Ok(Some(AddOutcome::AlreadyTracked));
        }
        if self.claimed_elsewhere(element) {
            return Ok(Some(AddOutcome::ClaimedElsewhere));
        }
        Ok(None)
    }

    fn claimed_elsewhere(&self, element: NodeId) -> bool {
        let Some(owner) = self.inner.ctx.claims().owner(element) else {
            return false;
        };
        if Rc::ptr_eq(&owner, &self.inner.selector) {
            return false;
        }
        if self.inner.state.borrow_mut().warned.insert(element) {
            tracing::warn!(
                selector = %self.inner.selector,
                owner = %owner,
                element = %element,
                "registry: element already claimed by another component"
            );
        }
        true
    }

    fn insert(&self, element: NodeId, instance: Rc<T>) -> Result<AddOutcome<T>> {
        let hooks = self.inner.hooks.borrow().clone();
        for hook in &hooks.before_add {
            hook(element);
        }
        // Hooks and the factory may have touched this element.
        if self.contains(element) {
            return Ok(AddOutcome::AlreadyTracked);
        }
        if self
            .inner
            .ctx
            .claims()
            .try_claim(element, &self.inner.selector)
            .is_err()
        {
            self.claimed_elsewhere(element);
            return Ok(AddOutcome::ClaimedElsewhere);
        }
        self.inner
            .state
            .borrow_mut()
            .live
            .push((element, Rc::clone(&instance)));
        for hook in &hooks.after_add {
            hook(element);
        }
        tracing::debug!(selector = %self.inner.selector, element = %element, "instance added");
        Ok(AddOutcome::Added(instance))
    }
}

impl<T: Component> RegistryInner<T> {
    /// Give back both entry keys. Returns `false` when none was held.
    fn detach(&self) -> bool {
        let watch_key = self.watch_key.borrow_mut().take();
        let initiator_key = self.initiator_key.borrow_mut().take();
        let held = watch_key.is_some() || initiator_key.is_some();
        if let Some(key) = watch_key {
            self.ctx.watcher().unsubscribe_key(&key);
        }
        if let Some(key) = initiator_key {
            self.ctx.dispatcher().remove_initiator_key(&key);
        }
        held
    }
}

impl<T: Component> Drop for RegistryInner<T> {
    fn drop(&mut self) {
        self.detach();
        self.ctx.claims().release_all(&self.selector);
    }
}
