#![forbid(unsafe_code)]

//! Explicit application signals.
//!
//! Two channels exist: [`ContentLoaded`], emitted by code that injects new
//! markup once the nodes are attached, and [`ModuleLoaded`], emitted once per
//! module by [`ModuleLifecycle::mark_as_init`].
//!
//! Listeners are stored as `Weak` callbacks; the strong reference lives in the
//! [`Subscription`] returned from `subscribe`, so dropping the guard is all it
//! takes to stop listening. Dead entries are pruned lazily on the next emit.
//!
//! # Invariants
//!
//! 1. Listeners run in subscription order.
//! 2. A listener subscribed during an emit is not called for that emit.
//! 3. The first listener error stops the emit and is returned unchanged.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use sitekit_dom::NodeId;

use crate::error::Result;

type Listener<E> = dyn Fn(&E) -> Result<()>;

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// RAII guard for a signal listener. Dropping it unsubscribes.
#[must_use = "dropping a Subscription immediately unsubscribes the listener"]
pub struct Subscription {
    _listener: Box<dyn Any>,
}

impl Subscription {
    fn new<T: ?Sized + 'static>(listener: Rc<T>) -> Self {
        Self {
            _listener: Box::new(listener),
        }
    }

    /// Stop listening now.
    pub fn unsubscribe(self) {}
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// SignalChannel<E>
// ---------------------------------------------------------------------------

/// A broadcast channel for one event type.
pub struct SignalChannel<E> {
    inner: Rc<RefCell<ChannelInner<E>>>,
}

struct ChannelInner<E> {
    listeners: Vec<Weak<Listener<E>>>,
    emitted: u64,
}

impl<E> Clone for SignalChannel<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<E: 'static> Default for SignalChannel<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for SignalChannel<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("SignalChannel")
            .field("listeners", &inner.listeners.len())
            .field("emitted", &inner.emitted)
            .finish()
    }
}

impl<E: 'static> SignalChannel<E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(ChannelInner {
                listeners: Vec::new(),
                emitted: 0,
            })),
        }
    }

    /// Register a listener. It stays active while the returned guard lives.
    pub fn subscribe(&self, listener: impl Fn(&E) -> Result<()> + 'static) -> Subscription {
        let listener: Rc<Listener<E>> = Rc::new(listener);
        self.inner
            .borrow_mut()
            .listeners
            .push(Rc::downgrade(&listener));
        Subscription::new(listener)
    }

    /// Deliver `event` to every live listener. Returns how many ran.
    pub fn emit(&self, event: &E) -> Result<usize> {
        let live: Vec<Rc<Listener<E>>> = {
            let mut inner = self.inner.borrow_mut();
            inner.emitted += 1;
            inner.listeners.retain(|l| l.strong_count() > 0);
            inner.listeners.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in &live {
            listener(event)?;
        }
        Ok(live.len())
    }

    /// Number of live listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner
            .borrow()
            .listeners
            .iter()
            .filter(|l| l.strong_count() > 0)
            .count()
    }

    /// Number of `emit` calls so far.
    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.inner.borrow().emitted
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// New content was attached under `content`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentLoaded {
    pub content: NodeId,
}

/// A module finished initializing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleLoaded {
    pub module: String,
    /// `"<module>ModuleLoaded"`.
    pub event: String,
}

/// The signal hub owned by a runtime context.
#[derive(Debug, Clone, Default)]
pub struct Signals {
    content_loaded: SignalChannel<ContentLoaded>,
    module_loaded: SignalChannel<ModuleLoaded>,
}

impl Signals {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content_loaded(&self) -> &SignalChannel<ContentLoaded> {
        &self.content_loaded
    }

    pub fn module_loaded(&self) -> &SignalChannel<ModuleLoaded> {
        &self.module_loaded
    }

    /// Listen for one module's loaded event.
    pub fn on_module_loaded(
        &self,
        module: impl Into<String>,
        listener: impl Fn(&ModuleLoaded) -> Result<()> + 'static,
    ) -> Subscription {
        let module = module.into();
        self.module_loaded.subscribe(move |event| {
            if event.module == module {
                listener(event)
            } else {
                Ok(())
            }
        })
    }
}

// ---------------------------------------------------------------------------
// ModuleLifecycle
// ---------------------------------------------------------------------------

/// Tracks whether a named module has announced itself as initialized.
#[derive(Debug)]
pub struct ModuleLifecycle {
    name: String,
    loaded: Cell<bool>,
}

impl ModuleLifecycle {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            loaded: Cell::new(false),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the event emitted by [`mark_as_init`](Self::mark_as_init).
    #[must_use]
    pub fn event_name(&self) -> String {
        format!("{}ModuleLoaded", self.name)
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.loaded.get()
    }

    /// Mark the module loaded and emit [`ModuleLoaded`].
    ///
    /// Only the first call emits; later calls return `Ok(false)`.
    pub fn mark_as_init(&self, signals: &Signals) -> Result<bool> {
        if self.loaded.replace(true) {
            return Ok(false);
        }
        tracing::debug!(module = %self.name, "module loaded");
        signals.module_loaded().emit(&ModuleLoaded {
            module: self.name.clone(),
            event: self.event_name(),
        })?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuntimeError;

    #[test]
    fn dropping_subscription_stops_delivery() {
        let channel = SignalChannel::<u32>::new();
        let seen = Rc::new(Cell::new(0));
        let s = Rc::clone(&seen);
        let sub = channel.subscribe(move |v| {
            s.set(s.get() + v);
            Ok(())
        });
        assert_eq!(channel.emit(&2).unwrap(), 1);
        drop(sub);
        assert_eq!(channel.emit(&5).unwrap(), 0);
        assert_eq!(seen.get(), 2);
        assert_eq!(channel.listener_count(), 0);
        assert_eq!(channel.emitted(), 2);
    }

    #[test]
    fn listeners_run_in_order_and_stop_on_error() {
        let channel = SignalChannel::<()>::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let l1 = Rc::clone(&log);
        let _a = channel.subscribe(move |_| {
            l1.borrow_mut().push("a");
            Ok(())
        });
        let _b = channel.subscribe(|_| Err(RuntimeError::listener("broken")));
        let l3 = Rc::clone(&log);
        let _c = channel.subscribe(move |_| {
            l3.borrow_mut().push("c");
            Ok(())
        });
        let err = channel.emit(&()).unwrap_err();
        assert!(matches!(err, RuntimeError::Listener { .. }));
        assert_eq!(*log.borrow(), vec!["a"]);
    }

    #[test]
    fn subscribe_during_emit_waits_for_next_emit() {
        let channel = SignalChannel::<()>::new();
        let late_calls = Rc::new(Cell::new(0));
        let held: Rc<RefCell<Vec<Subscription>>> = Rc::default();
        let (ch, calls, store) = (channel.clone(), Rc::clone(&late_calls), Rc::clone(&held));
        let _outer = channel.subscribe(move |_| {
            let calls = Rc::clone(&calls);
            let sub = ch.subscribe(move |_| {
                calls.set(calls.get() + 1);
                Ok(())
            });
            store.borrow_mut().push(sub);
            Ok(())
        });
        channel.emit(&()).unwrap();
        assert_eq!(late_calls.get(), 0);
        channel.emit(&()).unwrap();
        assert_eq!(late_calls.get(), 1);
    }

    #[test]
    fn module_lifecycle_emits_once() {
        let signals = Signals::new();
        let events = Rc::new(RefCell::new(Vec::new()));
        let e = Rc::clone(&events);
        let _sub = signals.module_loaded().subscribe(move |ev| {
            e.borrow_mut().push(ev.event.clone());
            Ok(())
        });
        let module = ModuleLifecycle::new("SvgUse");
        assert!(!module.is_loaded());
        assert!(module.mark_as_init(&signals).unwrap());
        assert!(!module.mark_as_init(&signals).unwrap());
        assert!(module.is_loaded());
        assert_eq!(*events.borrow(), vec!["SvgUseModuleLoaded".to_owned()]);
    }

    #[test]
    fn on_module_loaded_filters_by_name() {
        let signals = Signals::new();
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let _sub = signals.on_module_loaded("Slider", move |_| {
            h.set(h.get() + 1);
            Ok(())
        });
        ModuleLifecycle::new("Accordion").mark_as_init(&signals).unwrap();
        ModuleLifecycle::new("Slider").mark_as_init(&signals).unwrap();
        assert_eq!(hits.get(), 1);
    }
}
