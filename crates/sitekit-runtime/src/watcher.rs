#![forbid(unsafe_code)]

//! The mutation watcher.
//!
//! One [`MutationWatcher`] wraps one observer registration on the document
//! and fans each accepted mutation batch out to a list of named callbacks.
//! The registration is made lazily: nothing is observed until the first
//! callback subscribes.
//!
//! # Filtering
//!
//! A batch is dropped when every record in it is noise. A record is noise when
//!
//! - walking from its target towards the root reaches an element carrying the
//!   no-observe marker or an excluded tag before one carrying the
//!   force-observe marker, or
//! - it added or removed at least one node and every such node is an element
//!   with an excluded tag that is not inside a force-observe subtree.
//!
//! An empty batch is dropped as well.
//!
//! # Invariants
//!
//! 1. At most one callback per selector; the first registration wins.
//! 2. Callbacks run in registration order, each exactly once per accepted
//!    batch.
//! 3. Deliveries never nest. A flush requested from inside a callback returns
//!    without delivering; its records stay queued for the next flush.
//!
//! # Failure Modes
//!
//! - A callback error stops the delivery and is returned from
//!   [`deliver`](MutationWatcher::deliver) / [`flush`](MutationWatcher::flush).
//!   Callbacks later in the list do not run for that batch.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use sitekit_dom::{Document, MutationRecord, NodeId, ObserverId};

use crate::config::ObserverConfig;
use crate::error::{Result, RuntimeError};

/// Callback run for every accepted batch.
pub type WatchCallback = dyn Fn(&[MutationRecord]) -> Result<()>;

/// Nearest observation marker found walking up from a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationMark {
    /// Inside a force-observe subtree.
    Included,
    /// Inside a no-observe subtree or an excluded tag.
    Excluded,
    Unmarked,
}

/// Cloneable handle to the context's mutation watcher.
#[derive(Clone)]
pub struct MutationWatcher {
    state: Rc<RefCell<WatcherState>>,
    delivering: Rc<Cell<bool>>,
}

struct WatcherState {
    document: Document,
    root: NodeId,
    config: ObserverConfig,
    observer: Option<ObserverId>,
    callbacks: Vec<(Rc<str>, Rc<WatchCallback>)>,
    delivered_batches: u64,
    filtered_batches: u64,
}

struct DeliveryGuard<'a>(&'a Cell<bool>);

impl<'a> DeliveryGuard<'a> {
    fn enter(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        Self(flag)
    }
}

impl Drop for DeliveryGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl fmt::Debug for MutationWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("MutationWatcher")
            .field("root", &state.root)
            .field("connected", &state.observer.is_some())
            .field(
                "callbacks",
                &state.callbacks.iter().map(|(s, _)| &**s).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl MutationWatcher {
    /// Create a disconnected watcher for `root`.
    #[must_use]
    pub fn new(document: Document, root: NodeId, config: ObserverConfig) -> Self {
        Self {
            state: Rc::new(RefCell::new(WatcherState {
                document,
                root,
                config,
                observer: None,
                callbacks: Vec::new(),
                delivered_batches: 0,
                filtered_batches: 0,
            })),
            delivering: Rc::new(Cell::new(false)),
        }
    }

    #[must_use]
    pub fn root(&self) -> NodeId {
        self.state.borrow().root
    }

    #[must_use]
    pub fn document(&self) -> Document {
        self.state.borrow().document.clone()
    }

    #[must_use]
    pub fn config(&self) -> ObserverConfig {
        self.state.borrow().config.clone()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.borrow().observer.is_some()
    }

    /// Whether a delivery is running right now.
    #[must_use]
    pub fn is_delivering(&self) -> bool {
        self.delivering.get()
    }

    // --- Lifecycle ---

    /// Start observing the root.
    ///
    /// Returns `Ok(false)` without observing when already connected or when no
    /// callback is registered.
    pub fn connect(&self) -> Result<bool> {
        let mut state = self.state.borrow_mut();
        if state.observer.is_some() || state.callbacks.is_empty() {
            return Ok(false);
        }
        let id = state.document.observe(state.root, state.config.options)?;
        state.observer = Some(id);
        tracing::debug!(root = %state.root, observer = id.get(), "mutation watcher connected");
        Ok(true)
    }

    /// Stop observing, drop queued records, and forget every callback.
    pub fn disconnect(&self) {
        let mut state = self.state.borrow_mut();
        if let Some(id) = state.observer.take() {
            state.document.unobserve(id);
        }
        let dropped = state.callbacks.len();
        state.callbacks.clear();
        tracing::debug!(callbacks = dropped, "mutation watcher disconnected");
    }

    // --- Callbacks ---

    /// Register `callback` under `selector` and connect if needed.
    ///
    /// Returns the entry key. Unlike the selector text, the key identifies
    /// this one registration; see [`unsubscribe_key`](Self::unsubscribe_key).
    pub fn subscribe(
        &self,
        selector: &str,
        callback: impl Fn(&[MutationRecord]) -> Result<()> + 'static,
    ) -> Result<Rc<str>> {
        let selector = selector.trim();
        if selector.is_empty() {
            tracing::warn!("mutation watcher: refusing callback with empty selector");
            return Err(RuntimeError::EmptySelector);
        }
        let key: Rc<str> = Rc::from(selector);
        {
            let mut state = self.state.borrow_mut();
            if state.callbacks.iter().any(|(s, _)| &**s == selector) {
                tracing::warn!(selector, "mutation watcher: callback already registered");
                return Err(RuntimeError::duplicate(selector));
            }
            let callback: Rc<WatchCallback> = Rc::new(callback);
            state.callbacks.push((Rc::clone(&key), callback));
        }
        self.connect()?;
        Ok(key)
    }

    /// Remove the callback registered under `selector`.
    ///
    /// The observer stays connected even when the last callback goes.
    pub fn unsubscribe(&self, selector: &str) -> bool {
        let mut state = self.state.borrow_mut();
        let before = state.callbacks.len();
        state.callbacks.retain(|(s, _)| &**s != selector);
        state.callbacks.len() != before
    }

    /// Remove the callback registered under `key` by [`subscribe`](Self::subscribe).
    ///
    /// A later registration of the same selector text is left alone.
    pub fn unsubscribe_key(&self, key: &Rc<str>) -> bool {
        let mut state = self.state.borrow_mut();
        let before = state.callbacks.len();
        state.callbacks.retain(|(s, _)| !Rc::ptr_eq(s, key));
        state.callbacks.len() != before
    }

    /// Whether the callback registered under `key` is still present.
    #[must_use]
    pub fn holds_key(&self, key: &Rc<str>) -> bool {
        self.state
            .borrow()
            .callbacks
            .iter()
            .any(|(s, _)| Rc::ptr_eq(s, key))
    }

    #[must_use]
    pub fn is_subscribed(&self, selector: &str) -> bool {
        self.state
            .borrow()
            .callbacks
            .iter()
            .any(|(s, _)| &**s == selector)
    }

    /// Registered selectors in registration order.
    #[must_use]
    pub fn selectors(&self) -> Vec<String> {
        self.state
            .borrow()
            .callbacks
            .iter()
            .map(|(s, _)| s.to_string())
            .collect()
    }

    #[must_use]
    pub fn callback_count(&self) -> usize {
        self.state.borrow().callbacks.len()
    }

    // --- Markers ---

    /// Mark `element` as observed (`true`) or ignored (`false`).
    ///
    /// The two markers are mutually exclusive: setting one removes the other.
    pub fn set_element_observable_state(&self, element: NodeId, observable: bool) -> Result<()> {
        let (document, set, clear) = {
            let state = self.state.borrow();
            let (set, clear) = if observable {
                (&state.config.included_attr, &state.config.excluded_attr)
            } else {
                (&state.config.excluded_attr, &state.config.included_attr)
            };
            (state.document.clone(), set.clone(), clear.clone())
        };
        if !document.is_element(element) {
            return Err(RuntimeError::NotAnElement { node: element });
        }
        document.set_attribute(element, &set, "")?;
        document.remove_attribute(element, &clear)?;
        Ok(())
    }

    /// Nearest observation marker for `node`.
    #[must_use]
    pub fn observation_mark(&self, node: NodeId) -> ObservationMark {
        self.state.borrow().mark(node)
    }

    // --- Filtering ---

    /// Whether a single record is noise.
    #[must_use]
    pub fn is_excluded_record(&self, record: &MutationRecord) -> bool {
        self.state.borrow().is_excluded_record(record)
    }

    /// Whether a whole batch is noise (empty batches are).
    #[must_use]
    pub fn is_excluded_batch(&self, records: &[MutationRecord]) -> bool {
        let state = self.state.borrow();
        records.iter().all(|r| state.is_excluded_record(r))
    }

    // --- Delivery ---

    /// Run every callback once for `records` unless the batch is noise.
    ///
    /// Returns the number of callbacks that ran.
    pub fn deliver(&self, records: &[MutationRecord]) -> Result<usize> {
        if self.delivering.get() {
            tracing::trace!("mutation watcher: delivery already running");
            return Ok(0);
        }
        let callbacks: Vec<Rc<WatchCallback>> = {
            let mut state = self.state.borrow_mut();
            if records.iter().all(|r| state.is_excluded_record(r)) {
                state.filtered_batches += 1;
                tracing::trace!(records = records.len(), "mutation batch filtered");
                return Ok(0);
            }
            state.delivered_batches += 1;
            state.callbacks.iter().map(|(_, cb)| Rc::clone(cb)).collect()
        };

        #[cfg(feature = "tracing")]
        let _span = tracing::debug_span!(
            "watcher.deliver",
            records = records.len(),
            callbacks = callbacks.len()
        )
        .entered();

        let _guard = DeliveryGuard::enter(&self.delivering);
        for callback in &callbacks {
            callback(records)?;
        }
        Ok(callbacks.len())
    }

    /// Take the queued batch from the document and deliver it.
    pub fn flush(&self) -> Result<usize> {
        if self.delivering.get() {
            return Ok(0);
        }
        let (document, observer) = {
            let state = self.state.borrow();
            (state.document.clone(), state.observer)
        };
        let Some(id) = observer else {
            return Ok(0);
        };
        let records = document.take_records(id);
        if records.is_empty() {
            return Ok(0);
        }
        self.deliver(&records)
    }

    /// Whether records are waiting for the next flush.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        let state = self.state.borrow();
        state
            .observer
            .is_some_and(|id| state.document.pending_count(id) > 0)
    }

    /// Batches that reached the callbacks.
    #[must_use]
    pub fn delivered_batches(&self) -> u64 {
        self.state.borrow().delivered_batches
    }

    /// Batches dropped as noise.
    #[must_use]
    pub fn filtered_batches(&self) -> u64 {
        self.state.borrow().filtered_batches
    }
}

impl WatcherState {
    fn is_excluded_tag_element(&self, node: NodeId) -> bool {
        self.document
            .tag_name(node)
            .is_some_and(|tag| self.config.is_excluded_tag(&tag))
    }

    fn mark(&self, node: NodeId) -> ObservationMark {
        let doc = &self.document;
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            if doc.is_element(current) {
                if doc.has_attribute(current, &self.config.included_attr) {
                    return ObservationMark::Included;
                }
                if doc.has_attribute(current, &self.config.excluded_attr)
                    || self.is_excluded_tag_element(current)
                {
                    return ObservationMark::Excluded;
                }
            }
            cursor = doc.parent(current);
        }
        ObservationMark::Unmarked
    }

    fn inside_included(&self, node: NodeId) -> bool {
        let doc = &self.document;
        let included = &self.config.included_attr;
        doc.has_attribute(node, included)
            || doc
                .ancestors(node)
                .into_iter()
                .any(|a| doc.has_attribute(a, included))
    }

    fn is_excluded_record(&self, record: &MutationRecord) -> bool {
        match self.mark(record.target) {
            ObservationMark::Excluded => return true,
            ObservationMark::Included => return false,
            ObservationMark::Unmarked => {}
        }
        let mut touched = record.touched_nodes().peekable();
        if touched.peek().is_none() {
            return false;
        }
        touched.all(|n| self.is_excluded_tag_element(n) && !self.inside_included(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Document, MutationWatcher, Rc<Cell<u32>>) {
        let doc = Document::new();
        let watcher = MutationWatcher::new(doc.clone(), doc.body(), ObserverConfig::default());
        let calls = Rc::new(Cell::new(0));
        let c = Rc::clone(&calls);
        watcher
            .subscribe("[data-a]", move |_| {
                c.set(c.get() + 1);
                Ok(())
            })
            .unwrap();
        (doc, watcher, calls)
    }

    #[test]
    fn connects_lazily_on_first_subscribe() {
        let doc = Document::new();
        let watcher = MutationWatcher::new(doc.clone(), doc.body(), ObserverConfig::default());
        assert!(!watcher.connect().unwrap(), "no callbacks, no observation");
        assert!(!watcher.is_connected());
        watcher.subscribe("[data-a]", |_| Ok(())).unwrap();
        assert!(watcher.is_connected());
        assert!(!watcher.connect().unwrap(), "second connect is a no-op");
    }

    #[test]
    fn duplicate_and_empty_selectors_are_rejected() {
        let (_doc, watcher, _calls) = setup();
        assert!(matches!(
            watcher.subscribe("[data-a]", |_| Ok(())),
            Err(RuntimeError::DuplicateSelector { .. })
        ));
        assert!(matches!(
            watcher.subscribe("   ", |_| Ok(())),
            Err(RuntimeError::EmptySelector)
        ));
        assert_eq!(watcher.callback_count(), 1);
    }

    #[test]
    fn flush_delivers_each_batch_once() {
        let (doc, watcher, calls) = setup();
        for _ in 0..3 {
            let el = doc.create_element("div");
            doc.append_child(doc.body(), el).unwrap();
        }
        assert!(watcher.has_pending());
        assert_eq!(watcher.flush().unwrap(), 1);
        assert_eq!(calls.get(), 1, "three edits coalesce into one batch");
        assert_eq!(watcher.flush().unwrap(), 0);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn svg_only_batch_is_filtered() {
        let (doc, watcher, calls) = setup();
        let svg = doc.create_element("svg");
        doc.append_child(doc.body(), svg).unwrap();
        watcher.flush().unwrap();
        assert_eq!(calls.get(), 0, "adding a bare svg is noise");

        let path = doc.create_element("path");
        doc.append_child(svg, path).unwrap();
        watcher.flush().unwrap();
        assert_eq!(calls.get(), 0, "churn inside svg is noise");
        assert_eq!(watcher.filtered_batches(), 2);
    }

    #[test]
    fn mixed_batch_is_delivered() {
        let (doc, watcher, calls) = setup();
        let svg = doc.create_element("svg");
        let div = doc.create_element("div");
        doc.append_child(doc.body(), svg).unwrap();
        doc.append_child(doc.body(), div).unwrap();
        watcher.flush().unwrap();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn no_observe_subtree_is_filtered_and_force_observe_wins() {
        let (doc, watcher, calls) = setup();
        let embed = doc.create_element("div");
        doc.append_child(doc.body(), embed).unwrap();
        watcher.set_element_observable_state(embed, false).unwrap();
        watcher.flush().unwrap();
        let baseline = calls.get();

        let inner = doc.create_element("section");
        doc.append_child(embed, inner).unwrap();
        watcher.flush().unwrap();
        assert_eq!(calls.get(), baseline, "no-observe subtree is ignored");

        watcher.set_element_observable_state(inner, true).unwrap();
        let leaf = doc.create_element("p");
        doc.append_child(inner, leaf).unwrap();
        watcher.flush().unwrap();
        assert_eq!(calls.get(), baseline + 1, "nearest force-observe marker wins");
    }

    #[test]
    fn force_observed_iframe_is_not_noise() {
        let (doc, watcher, _calls) = setup();
        let iframe = doc.element("iframe").attr("data-js-force-observe", "").finish();
        let record = MutationRecord::child_list(doc.body(), vec![iframe], vec![]);
        assert!(!watcher.is_excluded_record(&record));

        let plain = doc.create_element("iframe");
        let record = MutationRecord::child_list(doc.body(), vec![plain], vec![]);
        assert!(watcher.is_excluded_record(&record));
    }

    #[test]
    fn markers_are_mutually_exclusive() {
        let (doc, watcher, _calls) = setup();
        let el = doc.create_element("div");
        watcher.set_element_observable_state(el, false).unwrap();
        assert!(doc.has_attribute(el, "data-js-no-observe"));
        watcher.set_element_observable_state(el, true).unwrap();
        assert!(doc.has_attribute(el, "data-js-force-observe"));
        assert!(!doc.has_attribute(el, "data-js-no-observe"));
        assert_eq!(watcher.observation_mark(el), ObservationMark::Included);

        let text = doc.create_text("x");
        assert!(matches!(
            watcher.set_element_observable_state(text, true),
            Err(RuntimeError::NotAnElement { .. })
        ));
    }

    #[test]
    fn empty_batch_is_excluded() {
        let (_doc, watcher, _calls) = setup();
        assert!(watcher.is_excluded_batch(&[]));
        assert_eq!(watcher.deliver(&[]).unwrap(), 0);
    }

    #[test]
    fn flush_inside_callback_does_not_reenter() {
        let doc = Document::new();
        let watcher = MutationWatcher::new(doc.clone(), doc.body(), ObserverConfig::default());
        let depth = Rc::new(Cell::new(0));
        let (w, d, document) = (watcher.clone(), Rc::clone(&depth), doc.clone());
        watcher
            .subscribe("[data-a]", move |_| {
                d.set(d.get() + 1);
                let el = document.create_element("div");
                document.append_child(document.body(), el)?;
                assert_eq!(w.flush()?, 0);
                Ok(())
            })
            .unwrap();
        let el = doc.create_element("div");
        doc.append_child(doc.body(), el).unwrap();
        watcher.flush().unwrap();
        assert_eq!(depth.get(), 1);
        assert!(watcher.has_pending(), "mutation made during delivery waits");
        watcher.flush().unwrap();
        assert_eq!(depth.get(), 2);
    }

    #[test]
    fn callback_error_stops_delivery() {
        let doc = Document::new();
        let watcher = MutationWatcher::new(doc.clone(), doc.body(), ObserverConfig::default());
        let later = Rc::new(Cell::new(false));
        watcher
            .subscribe("[data-a]", |_| Err(RuntimeError::listener("broken")))
            .unwrap();
        let l = Rc::clone(&later);
        watcher
            .subscribe("[data-b]", move |_| {
                l.set(true);
                Ok(())
            })
            .unwrap();
        let el = doc.create_element("div");
        doc.append_child(doc.body(), el).unwrap();
        assert!(watcher.flush().is_err());
        assert!(!later.get());
        assert!(!watcher.is_delivering(), "guard resets after an error");
    }

    #[test]
    fn disconnect_clears_everything() {
        let (doc, watcher, calls) = setup();
        watcher.disconnect();
        assert!(!watcher.is_connected());
        assert_eq!(watcher.callback_count(), 0);
        let el = doc.create_element("div");
        doc.append_child(doc.body(), el).unwrap();
        assert_eq!(watcher.flush().unwrap(), 0);
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn edits_outside_root_are_not_seen() {
        let (doc, watcher, calls) = setup();
        let meta = doc.create_element("meta");
        doc.append_child(doc.head(), meta).unwrap();
        assert!(!watcher.has_pending());
        watcher.flush().unwrap();
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn unsubscribe_key_spares_a_reregistered_selector() {
        let (doc, watcher, calls) = setup();
        watcher.disconnect();
        let first = watcher.subscribe("[data-b]", |_| Ok(())).unwrap();
        assert!(watcher.unsubscribe_key(&first));
        let c = Rc::clone(&calls);
        let second = watcher
            .subscribe("[data-b]", move |_| {
                c.set(c.get() + 1);
                Ok(())
            })
            .unwrap();
        assert!(!watcher.unsubscribe_key(&first));
        assert!(watcher.holds_key(&second));
        assert!(!watcher.holds_key(&first));

        let el = doc.create_element("div");
        doc.append_child(doc.body(), el).unwrap();
        watcher.flush().unwrap();
        assert_eq!(calls.get(), 1);
    }
}
