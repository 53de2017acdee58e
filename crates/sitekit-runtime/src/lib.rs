#![forbid(unsafe_code)]

//! Component registry runtime for sitekit.
//!
//! Keeps a registry of widget instances in step with a document that is
//! edited at arbitrary times, without double initialization and without
//! holding on to removed elements.
//!
//! # Role in sitekit
//! `sitekit-runtime` sits between the host document model (`sitekit-dom`)
//! and application widgets. Widgets register a `(selector, factory)` pair
//! with a [`RuntimeContext`]; the runtime instantiates them for matching
//! elements and drops them when their element leaves the tree.
//!
//! # Primary responsibilities
//! - **MutationWatcher**: one lazily connected observation of the watched
//!   root, with noise filtering by tag and marker attribute.
//! - **ChangeDispatcher**: scoped rescans on content-loaded signals and bulk
//!   [`Action`] delivery.
//! - **InstanceRegistry**: the per-selector live set, reconciled after every
//!   accepted mutation batch.
//! - **Signals**: content-loaded and module-loaded channels with RAII
//!   subscriptions.
//!
//! # How it fits in the system
//! Nothing is delivered implicitly. Tree edits queue mutation records in the
//! document; [`RuntimeContext::flush`] delivers one batch and
//! [`RuntimeContext::settle`] delivers until the queue is empty, which is the
//! point where the host would hand over its next notification batch.

pub mod component;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod signals;
pub mod watcher;

pub use component::{Action, ActionOutcome, Component};
pub use config::{
    ConfigError, DEFAULT_EXCLUDED_ATTR, DEFAULT_EXCLUDED_TAGS, DEFAULT_INCLUDED_ATTR,
    DEFAULT_MAX_SETTLE_ROUNDS, ObserverConfig, RuntimeConfig,
};
pub use context::{ClaimSet, ContextBuilder, RuntimeContext};
pub use dispatcher::ChangeDispatcher;
pub use error::{BoxError, Result, RuntimeError};
pub use registry::{AddOutcome, InstanceRegistry, ReconcileReport, RegisterOptions};
pub use signals::{
    ContentLoaded, ModuleLifecycle, ModuleLoaded, SignalChannel, Signals, Subscription,
};
pub use watcher::{MutationWatcher, ObservationMark};
