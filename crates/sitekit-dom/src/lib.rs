#![forbid(unsafe_code)]

//! Host document model for sitekit.
//!
//! A small, single-threaded element tree that stands in for a browser DOM:
//!
//! - [`Document`]: a cloneable handle to an arena of nodes addressed by
//!   [`NodeId`], with the usual tree edits and attribute access.
//! - [`SelectorList`]: a CSS selector subset used for `matches`, `closest`
//!   and `query_selector_all`.
//! - [`MutationRecord`] queues: [`Document::observe`] registers interest in a
//!   subtree and [`Document::take_records`] hands out the pending batch,
//!   mirroring how a host coalesces change notifications.
//!
//! # Example
//!
//! ```
//! use sitekit_dom::{Document, ObserveOptions};
//!
//! let doc = Document::new();
//! let observer = doc.observe(doc.body(), ObserveOptions::CHILD_TREE).unwrap();
//!
//! let widget = doc.element("div").attr("data-widget", "").finish();
//! doc.append_child(doc.body(), widget).unwrap();
//!
//! let batch = doc.take_records(observer);
//! assert_eq!(batch.len(), 1);
//! assert_eq!(batch[0].added_nodes, vec![widget]);
//! assert!(doc.matches(widget, "[data-widget]").unwrap());
//! ```

pub mod builder;
pub mod document;
pub mod error;
pub mod mutation;
pub mod node;
pub mod selector;

pub use builder::ElementBuilder;
pub use document::Document;
pub use error::{DomError, Result, SelectorError};
pub use mutation::{MutationKind, MutationRecord, ObserveOptions, ObserverId};
pub use node::{NodeId, NodeKind};
pub use selector::{MatchContext, SelectorList};
