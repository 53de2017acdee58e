#![forbid(unsafe_code)]

//! The change dispatcher.
//!
//! [`ChangeDispatcher`] keeps one initiator per component selector: a
//! `reinitialize(root)` function that scans a freshly inserted subtree, and a
//! `list_instances()` function that exposes the live set for bulk actions.
//!
//! Once bound to a [`Signals`] hub it reacts to every [`ContentLoaded`]
//! signal by running each initiator over the signalled root. This is the path
//! for content that mutation observation does not cover, such as fragments
//! built off-document or content the application marks as new explicitly.
//!
//! # Invariants
//!
//! 1. At most one initiator per selector; the first registration wins.
//! 2. Initiators run in registration order.
//! 3. A reinitializer error stops the cycle and reaches the signal emitter.
//!
//! [`ContentLoaded`]: crate::signals::ContentLoaded

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use sitekit_dom::{Document, NodeId};

use crate::component::{Action, Component};
use crate::error::{Result, RuntimeError};
use crate::signals::{Signals, Subscription};

/// Scans a subtree for new instances; returns how many were added.
pub type Reinitialize = dyn Fn(NodeId) -> Result<usize>;

/// Lists live `(element, instance)` pairs.
pub type ListInstances = dyn Fn() -> Vec<(NodeId, Rc<dyn Component>)>;

/// Cloneable handle to the context's dispatcher.
#[derive(Clone)]
pub struct ChangeDispatcher {
    state: Rc<RefCell<DispatcherState>>,
}

struct DispatcherState {
    document: Document,
    initiators: Vec<Initiator>,
    binding: Option<Subscription>,
}

#[derive(Clone)]
struct Initiator {
    selector: Rc<str>,
    reinitialize: Rc<Reinitialize>,
    list_instances: Rc<ListInstances>,
}

impl fmt::Debug for ChangeDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("ChangeDispatcher")
            .field(
                "initiators",
                &state.initiators.iter().map(|i| &*i.selector).collect::<Vec<_>>(),
            )
            .field("bound", &state.binding.is_some())
            .finish()
    }
}

impl ChangeDispatcher {
    /// Create an unbound dispatcher.
    #[must_use]
    pub fn new(document: Document) -> Self {
        Self {
            state: Rc::new(RefCell::new(DispatcherState {
                document,
                initiators: Vec::new(),
                binding: None,
            })),
        }
    }

    /// Subscribe to content-loaded signals. Returns `false` when already bound.
    pub fn bind(&self, signals: &Signals) -> bool {
        if self.state.borrow().binding.is_some() {
            return false;
        }
        let weak = Rc::downgrade(&self.state);
        let subscription = signals.content_loaded().subscribe(move |event| {
            let Some(state) = weak.upgrade() else {
                return Ok(());
            };
            ChangeDispatcher { state }
                .reinitialize(event.content)
                .map(drop)
        });
        self.state.borrow_mut().binding = Some(subscription);
        true
    }

    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.state.borrow().binding.is_some()
    }

    /// Drop the content-loaded subscription.
    pub fn unbind(&self) {
        self.state.borrow_mut().binding = None;
    }

    /// Register the initiator pair for `selector`. Returns the entry key
    /// accepted by [`remove_initiator_key`](Self::remove_initiator_key).
    pub fn register_initiator(
        &self,
        selector: &str,
        reinitialize: impl Fn(NodeId) -> Result<usize> + 'static,
        list_instances: impl Fn() -> Vec<(NodeId, Rc<dyn Component>)> + 'static,
    ) -> Result<Rc<str>> {
        let selector = selector.trim();
        if selector.is_empty() {
            tracing::warn!("dispatcher: refusing initiator with empty selector");
            return Err(RuntimeError::EmptySelector);
        }
        let mut state = self.state.borrow_mut();
        if state.initiators.iter().any(|i| &*i.selector == selector) {
            tracing::warn!(selector, "dispatcher: initiator already registered");
            return Err(RuntimeError::duplicate(selector));
        }
        let reinitialize: Rc<Reinitialize> = Rc::new(reinitialize);
        let list_instances: Rc<ListInstances> = Rc::new(list_instances);
        let key: Rc<str> = Rc::from(selector);
        state.initiators.push(Initiator {
            selector: Rc::clone(&key),
            reinitialize,
            list_instances,
        });
        Ok(key)
    }

    /// Run every initiator over `content`. Returns the total added.
    pub fn reinitialize(&self, content: NodeId) -> Result<usize> {
        #[cfg(feature = "tracing")]
        let _span = tracing::debug_span!("dispatcher.reinitialize", content = %content).entered();

        let initiators = self.snapshot();
        let mut added = 0;
        for initiator in &initiators {
            added += (initiator.reinitialize)(content)?;
        }
        tracing::debug!(
            content = %content,
            initiators = initiators.len(),
            added,
            "content reinitialized"
        );
        Ok(added)
    }

    /// Deliver `action` to every live instance whose element is `root` or
    /// inside it. Returns how many instances handled it.
    pub fn dispatch_action(&self, root: NodeId, action: &Action) -> usize {
        #[cfg(feature = "tracing")]
        let _span = tracing::debug_span!("dispatcher.dispatch_action", root = %root, action = %action)
            .entered();

        let document = self.state.borrow().document.clone();
        let mut handled = 0;
        for initiator in self.snapshot() {
            for (element, instance) in (initiator.list_instances)() {
                if document.contains(root, element) && instance.handle_action(action).is_handled() {
                    handled += 1;
                }
            }
        }
        handled
    }

    /// Remove the initiator for `selector`.
    pub fn remove_initiator(&self, selector: &str) -> bool {
        let mut state = self.state.borrow_mut();
        let before = state.initiators.len();
        state.initiators.retain(|i| &*i.selector != selector);
        state.initiators.len() != before
    }

    /// Remove the initiator registered under `key`, leaving any later
    /// registration of the same selector text in place.
    pub fn remove_initiator_key(&self, key: &Rc<str>) -> bool {
        let mut state = self.state.borrow_mut();
        let before = state.initiators.len();
        state.initiators.retain(|i| !Rc::ptr_eq(&i.selector, key));
        state.initiators.len() != before
    }

    /// Whether the initiator registered under `key` is still present.
    #[must_use]
    pub fn holds_key(&self, key: &Rc<str>) -> bool {
        self.state
            .borrow()
            .initiators
            .iter()
            .any(|i| Rc::ptr_eq(&i.selector, key))
    }

    /// Remove every initiator. The signal binding is kept.
    pub fn clear(&self) {
        self.state.borrow_mut().initiators.clear();
    }

    #[must_use]
    pub fn is_initiator_registered(&self, selector: &str) -> bool {
        self.state
            .borrow()
            .initiators
            .iter()
            .any(|i| &*i.selector == selector)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.borrow().initiators.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.borrow().initiators.is_empty()
    }

    /// Registered selectors in registration order.
    #[must_use]
    pub fn selectors(&self) -> Vec<String> {
        self.state
            .borrow()
            .initiators
            .iter()
            .map(|i| i.selector.to_string())
            .collect()
    }

    fn snapshot(&self) -> Vec<Initiator> {
        self.state.borrow().initiators.clone()
    }
}
