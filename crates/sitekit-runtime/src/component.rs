#![forbid(unsafe_code)]

//! The component capability surface.
//!
//! Widgets are plain Rust types constructed by a factory for one element. The
//! runtime owns them behind `Rc`, so any state a widget mutates after
//! construction lives behind interior mutability on the widget itself.
//!
//! Bulk actions reach instances through [`Component::handle_action`]. The
//! default answer is [`ActionOutcome::Unsupported`], so a widget opts into an
//! action by matching on it and returning [`ActionOutcome::Handled`].

use std::borrow::Cow;
use std::fmt;

/// A bulk lifecycle action delivered to every instance under a root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Action {
    /// Tear down listeners and transient state.
    Destroy,
    /// Recompute layout or re-read attributes.
    Refresh,
    /// Application-defined action.
    Custom(Cow<'static, str>),
}

impl Action {
    #[must_use]
    pub fn custom(name: impl Into<Cow<'static, str>>) -> Self {
        Self::Custom(name.into())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Destroy => "destroy",
            Self::Refresh => "refresh",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether an instance acted on an [`Action`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ActionOutcome {
    Handled,
    #[default]
    Unsupported,
}

impl ActionOutcome {
    #[inline]
    #[must_use]
    pub const fn is_handled(self) -> bool {
        matches!(self, Self::Handled)
    }
}

/// A widget instance tracked by an [`InstanceRegistry`](crate::InstanceRegistry).
pub trait Component: 'static {
    /// React to a bulk action.
    fn handle_action(&self, action: &Action) -> ActionOutcome {
        let _ = action;
        ActionOutcome::Unsupported
    }
}
