#![forbid(unsafe_code)]

//! sitekit public facade crate.
//!
//! This crate provides the stable, ergonomic surface area for users.
//!
//! ```
//! use sitekit::prelude::*;
//!
//! struct Accordion;
//! impl Component for Accordion {}
//!
//! let doc = Document::new();
//! let ctx = RuntimeContext::new(doc.clone());
//! let accordions = ctx
//!     .register_infallible("[data-accordion]", |_, _| Accordion)
//!     .unwrap();
//!
//! let panel = doc.element("section").attr("data-accordion", "").finish();
//! doc.append_child(doc.body(), panel).unwrap();
//! ctx.settle().unwrap();
//! assert!(accordions.contains(panel));
//! ```

pub use sitekit_dom as dom;
pub use sitekit_runtime as runtime;

pub mod prelude {
    pub use sitekit_dom as dom;
    pub use sitekit_runtime as runtime;

    pub use sitekit_dom::{Document, NodeId, ObserveOptions};
    pub use sitekit_runtime::{
        Action, ActionOutcome, AddOutcome, Component, InstanceRegistry, ModuleLifecycle,
        RegisterOptions, RuntimeConfig, RuntimeContext, RuntimeError,
    };
}
