#![forbid(unsafe_code)]

//! Runtime error taxonomy.
//!
//! Registration mistakes (empty, unparsable, or duplicate selectors) are
//! logged where they happen and also returned, so callers decide whether to
//! escalate. Factory and listener failures propagate unchanged; nothing in the
//! runtime isolates one component's failure from the rest of a dispatch.

use sitekit_dom::{DomError, NodeId, SelectorError};
use thiserror::Error;

use crate::config::ConfigError;

/// Boxed error produced by component factories and signal listeners.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, RuntimeError>;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("selector is empty")]
    EmptySelector,

    #[error("invalid selector {selector:?}: {source}")]
    InvalidSelector {
        selector: String,
        #[source]
        source: SelectorError,
    },

    #[error("selector {selector:?} is already registered")]
    DuplicateSelector { selector: String },

    #[error("node {node} is not an element")]
    NotAnElement { node: NodeId },

    #[error("factory for {selector:?} failed on element {element}: {source}")]
    Factory {
        selector: String,
        element: NodeId,
        #[source]
        source: BoxError,
    },

    #[error("signal listener failed: {source}")]
    Listener {
        #[source]
        source: BoxError,
    },

    #[error("mutations still pending after {rounds} delivery rounds")]
    Unsettled { rounds: usize },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Dom(#[from] DomError),
}

impl RuntimeError {
    /// Wrap an application error raised inside a signal listener.
    #[must_use]
    pub fn listener(source: impl Into<BoxError>) -> Self {
        Self::Listener {
            source: source.into(),
        }
    }

    #[must_use]
    pub fn duplicate(selector: impl Into<String>) -> Self {
        Self::DuplicateSelector {
            selector: selector.into(),
        }
    }

    /// Whether this error is a registration-time mistake rather than a
    /// failure raised by component code.
    #[must_use]
    pub fn is_misconfiguration(&self) -> bool {
        matches!(
            self,
            Self::EmptySelector
                | Self::InvalidSelector { .. }
                | Self::DuplicateSelector { .. }
                | Self::Config(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_wraps_strings() {
        let err = RuntimeError::listener("boom");
        assert_eq!(err.to_string(), "signal listener failed: boom");
        assert!(!err.is_misconfiguration());
    }

    #[test]
    fn selector_errors_are_misconfiguration() {
        assert!(RuntimeError::EmptySelector.is_misconfiguration());
        assert!(RuntimeError::duplicate("[data-x]").is_misconfiguration());
        let invalid = RuntimeError::InvalidSelector {
            selector: "a:hover".into(),
            source: SelectorError::Unsupported {
                what: ":hover".into(),
                offset: 1,
            },
        };
        assert!(invalid.is_misconfiguration());
        assert!(invalid.to_string().starts_with("invalid selector \"a:hover\""));
    }

    #[test]
    fn dom_errors_convert() {
        let err: RuntimeError = DomError::EmptyObserveOptions.into();
        assert!(matches!(err, RuntimeError::Dom(_)));
    }
}
