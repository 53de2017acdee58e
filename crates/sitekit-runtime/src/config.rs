#![forbid(unsafe_code)]

//! Runtime configuration.
//!
//! [`RuntimeConfig`] carries the mutation filtering policy (which tags are
//! noise, which marker attributes force inclusion or exclusion) and the bound
//! on how many delivery rounds [`RuntimeContext::settle`] may run.
//!
//! With the `policy-config` feature the same structure can be loaded from TOML
//! or JSON. Missing keys take their defaults and unknown keys are rejected:
//!
//! ```toml
//! max_settle_rounds = 8
//!
//! [observer]
//! excluded_tags = ["iframe", "svg", "video"]
//! excluded_attr = "data-js-no-observe"
//! included_attr = "data-js-force-observe"
//! ```
//!
//! [`RuntimeContext::settle`]: crate::RuntimeContext::settle

use sitekit_dom::ObserveOptions;
use thiserror::Error;

/// Tags whose internal churn never warrants a rescan.
pub const DEFAULT_EXCLUDED_TAGS: [&str; 6] = ["iframe", "script", "svg", "ymaps", "object", "img"];

/// Marker attribute that removes an element's subtree from observation.
pub const DEFAULT_EXCLUDED_ATTR: &str = "data-js-no-observe";

/// Marker attribute that keeps an element's subtree observed even when its tag
/// is excluded.
pub const DEFAULT_INCLUDED_ATTR: &str = "data-js-force-observe";

pub const DEFAULT_MAX_SETTLE_ROUNDS: usize = 16;

/// Errors raised while validating or loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {message}")]
    Invalid { message: String },

    #[error("cannot read {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported configuration format: {path} (expected .toml or .json)")]
    UnsupportedFormat { path: std::path::PathBuf },

    #[error("{format} parse error: {message}")]
    Parse {
        format: &'static str,
        message: String,
    },
}

impl ConfigError {
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

/// Mutation filtering policy.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "policy-config",
    derive(serde::Serialize, serde::Deserialize),
    serde(default, deny_unknown_fields)
)]
pub struct ObserverConfig {
    /// Lowercased tag names treated as noise.
    pub excluded_tags: Vec<String>,
    pub excluded_attr: String,
    pub included_attr: String,
    /// Observation flags for the watched root. Not loadable from files.
    #[cfg_attr(feature = "policy-config", serde(skip))]
    pub options: ObserveOptions,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            excluded_tags: DEFAULT_EXCLUDED_TAGS.iter().map(|t| (*t).to_owned()).collect(),
            excluded_attr: DEFAULT_EXCLUDED_ATTR.to_owned(),
            included_attr: DEFAULT_INCLUDED_ATTR.to_owned(),
            options: ObserveOptions::CHILD_TREE,
        }
    }
}

impl ObserverConfig {
    /// Whether `tag` (any case) is on the exclusion list.
    #[must_use]
    pub fn is_excluded_tag(&self, tag: &str) -> bool {
        self.excluded_tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "policy-config",
    derive(serde::Serialize, serde::Deserialize),
    serde(default, deny_unknown_fields)
)]
pub struct RuntimeConfig {
    pub observer: ObserverConfig,
    /// Upper bound on flush rounds per `settle()` call.
    pub max_settle_rounds: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            observer: ObserverConfig::default(),
            max_settle_rounds: DEFAULT_MAX_SETTLE_ROUNDS,
        }
    }
}

impl RuntimeConfig {
    #[must_use]
    pub fn with_excluded_tag(mut self, tag: impl Into<String>) -> Self {
        self.observer.excluded_tags.push(tag.into());
        self
    }

    #[must_use]
    pub fn without_excluded_tag(mut self, tag: &str) -> Self {
        self.observer
            .excluded_tags
            .retain(|t| !t.eq_ignore_ascii_case(tag));
        self
    }

    #[must_use]
    pub fn with_excluded_attr(mut self, attr: impl Into<String>) -> Self {
        self.observer.excluded_attr = attr.into();
        self
    }

    #[must_use]
    pub fn with_included_attr(mut self, attr: impl Into<String>) -> Self {
        self.observer.included_attr = attr.into();
        self
    }

    #[must_use]
    pub fn with_observe_options(mut self, options: ObserveOptions) -> Self {
        self.observer.options = options;
        self
    }

    #[must_use]
    pub fn with_max_settle_rounds(mut self, rounds: usize) -> Self {
        self.max_settle_rounds = rounds;
        self
    }

    /// Lowercase and deduplicate tags and attribute names, then validate.
    pub fn normalized(mut self) -> Result<Self, ConfigError> {
        let observer = &mut self.observer;
        let mut tags: Vec<String> = observer
            .excluded_tags
            .iter()
            .map(|t| t.trim().to_ascii_lowercase())
            .collect();
        tags.sort_unstable();
        tags.dedup();
        observer.excluded_tags = tags;
        observer.excluded_attr = observer.excluded_attr.trim().to_ascii_lowercase();
        observer.included_attr = observer.included_attr.trim().to_ascii_lowercase();
        self.validate()?;
        Ok(self)
    }

    /// Check the configuration for values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let observer = &self.observer;
        if observer.excluded_tags.iter().any(|t| t.trim().is_empty()) {
            return Err(ConfigError::invalid("excluded tag names must be non-empty"));
        }
        if observer.excluded_attr.trim().is_empty() || observer.included_attr.trim().is_empty() {
            return Err(ConfigError::invalid("marker attribute names must be non-empty"));
        }
        if observer.excluded_attr.eq_ignore_ascii_case(&observer.included_attr) {
            return Err(ConfigError::invalid(
                "excluded_attr and included_attr must differ",
            ));
        }
        if !observer.options.contains(ObserveOptions::CHILD_LIST) {
            return Err(ConfigError::invalid(
                "observer options must include child-list changes",
            ));
        }
        if self.max_settle_rounds == 0 {
            return Err(ConfigError::invalid("max_settle_rounds must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(feature = "policy-config")]
impl RuntimeConfig {
    /// Parse TOML, then normalize.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input).map_err(|e| ConfigError::Parse {
            format: "TOML",
            message: e.to_string(),
        })?;
        config.normalized()
    }

    /// Parse JSON, then normalize.
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(input).map_err(|e| ConfigError::Parse {
            format: "JSON",
            message: e.to_string(),
        })?;
        config.normalized()
    }

    /// Load from a `.toml` or `.json` file, chosen by extension.
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let read = || {
            std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        };
        match extension.as_deref() {
            Some("toml") => Self::from_toml_str(&read()?),
            Some("json") => Self::from_json_str(&read()?),
            _ => Err(ConfigError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_marker_conventions() {
        let config = RuntimeConfig::default();
        assert_eq!(config.observer.excluded_attr, "data-js-no-observe");
        assert_eq!(config.observer.included_attr, "data-js-force-observe");
        assert_eq!(config.observer.options, ObserveOptions::CHILD_TREE);
        for tag in ["iframe", "script", "svg", "ymaps", "object", "img"] {
            assert!(config.observer.is_excluded_tag(tag), "{tag}");
        }
        assert!(!config.observer.is_excluded_tag("div"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_methods_compose() {
        let config = RuntimeConfig::default()
            .with_excluded_tag("VIDEO")
            .without_excluded_tag("img")
            .with_max_settle_rounds(4)
            .normalized()
            .unwrap();
        assert!(config.observer.is_excluded_tag("video"));
        assert!(config.observer.excluded_tags.contains(&"video".to_owned()));
        assert!(!config.observer.is_excluded_tag("img"));
        assert_eq!(config.max_settle_rounds, 4);
    }

    #[test]
    fn normalization_dedups_tags() {
        let config = RuntimeConfig::default()
            .with_excluded_tag("SVG")
            .with_excluded_tag(" svg ")
            .normalized()
            .unwrap();
        let svg_count = config
            .observer
            .excluded_tags
            .iter()
            .filter(|t| *t == "svg")
            .count();
        assert_eq!(svg_count, 1);
    }

    #[test]
    fn validation_rejects_bad_values() {
        assert!(RuntimeConfig::default().with_excluded_attr("").validate().is_err());
        assert!(RuntimeConfig::default()
            .with_included_attr("data-js-no-observe")
            .validate()
            .is_err());
        assert!(RuntimeConfig::default()
            .with_max_settle_rounds(0)
            .validate()
            .is_err());
        assert!(RuntimeConfig::default()
            .with_observe_options(ObserveOptions::ATTRIBUTES)
            .validate()
            .is_err());
        assert!(RuntimeConfig::default()
            .with_excluded_tag("  ")
            .validate()
            .is_err());
    }
}
