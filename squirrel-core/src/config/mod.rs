//! Flat string-keyed configuration surface.
//!
//! Every configurable component consumes a [`Properties`] bag and validates
//! it against the set of keys it supports. An unsupported key for a given
//! component is a configuration error, never silently ignored.

use std::collections::HashMap;

use thiserror::Error;

use crate::core::SquirrelError;

/// Well-known property keys.
pub mod keys {
    /// Enables or disables the cache engine (`true`/`false`).
    pub const CACHE: &str = "squirrel.engine.cache";
    /// Time-to-live for cache entries, in seconds.
    pub const TIME_TO_LIVE: &str = "squirrel.engine.timeToLive";
    /// Enables best-effort mode on the cache engine.
    pub const BEST_EFFORT: &str = "squirrel.engine.bestEffort";
    /// Enables text aggregation.
    pub const AGGREGATE: &str = "squirrel.engine.aggregate";
    /// Enables minification.
    pub const COMPRESS: &str = "squirrel.engine.compress";
    /// Enables content inspection (reference extraction).
    pub const INSPECT: &str = "squirrel.engine.inspect";
    /// Charset of inspected text assets.
    pub const CHARSET: &str = "squirrel.engine.charset";
    /// Column at which minified output is wrapped (0 disables wrapping).
    pub const LINE_BREAK_POS: &str = "squirrel.engine.lineBreakPos";
    /// Identifier obfuscation toggle, honored by plug-in minifiers.
    pub const OBFUSCATE: &str = "squirrel.engine.obfuscate";
    /// Newline-separated regular expressions removing declared paths.
    pub const REGEX_EXPRESSIONS: &str = "squirrel.filter.regexExpressions";
    /// Enables or disables a path filter.
    pub const FILTER_ENABLE: &str = "squirrel.filter.enable";
    /// Polling interval for a source, in seconds (0 disables polling).
    pub const POLLING_INTERVAL: &str = "squirrel.source.pollingInterval";
    /// Root directory or prefix a source resolves paths against.
    pub const BASE_PATH: &str = "squirrel.source.basePath";
    /// Derive version numbers from content hashes instead of timestamps.
    pub const CONTENT_BASED_VERSION: &str = "squirrel.source.contentBasedVersionNumber";
    /// Proxy URIs exposed in front of saved nuts.
    pub const PROXY_URIS: &str = "squirrel.source.proxyUris";
    /// Login for sources that require authentication.
    pub const LOGIN: &str = "squirrel.source.login";
    /// Password for sources that require authentication.
    pub const PASSWORD: &str = "squirrel.source.password";
}

/// Property-level error raised while validating or parsing a [`Properties`]
/// bag.
#[derive(Debug, Error)]
pub enum PropertyError {
    /// The key is not supported by the component being configured.
    #[error("property '{key}' is not supported by {component}")]
    Unsupported {
        /// The component being configured
        component: String,
        /// The offending key
        key: String,
    },

    /// The value cannot be parsed into the expected type.
    #[error("property '{key}' has invalid value '{value}': {message}")]
    InvalidValue {
        /// The property key
        key: String,
        /// The raw value
        value: String,
        /// Parse failure description
        message: String,
    },
}

impl From<PropertyError> for SquirrelError {
    fn from(err: PropertyError) -> Self {
        SquirrelError::Config {
            message: err.to_string(),
        }
    }
}

/// A flat bag of string properties consumed by component constructors.
#[derive(Debug, Clone, Default)]
pub struct Properties {
    entries: HashMap<String, String>,
}

impl Properties {
    /// Creates an empty property bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a property, builder style.
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.entries.insert(key.to_string(), value.into());
        self
    }

    /// Sets a property in place.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.entries.insert(key.to_string(), value.into());
    }

    /// Gets the raw value for a key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|s| s.as_str())
    }

    /// Whether the bag holds no properties.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Checks that every key in the bag is supported by `component`.
    pub fn validate(
        &self,
        component: &str,
        supported: &[&str],
    ) -> std::result::Result<(), PropertyError> {
        for key in self.entries.keys() {
            if !supported.contains(&key.as_str()) {
                return Err(PropertyError::Unsupported {
                    component: component.to_string(),
                    key: key.clone(),
                });
            }
        }
        Ok(())
    }

    /// Parses a boolean property, falling back to `default` when absent.
    pub fn bool_or(
        &self,
        key: &str,
        default: bool,
    ) -> std::result::Result<bool, PropertyError> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|_| PropertyError::InvalidValue {
                key: key.to_string(),
                value: raw.to_string(),
                message: "expected 'true' or 'false'".to_string(),
            }),
        }
    }

    /// Parses an unsigned integer property, falling back to `default` when
    /// absent.
    pub fn u64_or(&self, key: &str, default: u64) -> std::result::Result<u64, PropertyError> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|_| PropertyError::InvalidValue {
                key: key.to_string(),
                value: raw.to_string(),
                message: "expected an unsigned integer".to_string(),
            }),
        }
    }

    /// Returns a string property, falling back to `default` when absent.
    pub fn str_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Returns a string property or an error when absent.
    pub fn require(&self, key: &str) -> std::result::Result<&str, PropertyError> {
        self.get(key).ok_or_else(|| PropertyError::InvalidValue {
            key: key.to_string(),
            value: String::new(),
            message: "required property is missing".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_unsupported_key() {
        let props = Properties::new().with(keys::CACHE, "true").with("bogus.key", "1");
        let err = props
            .validate("cache engine", &[keys::CACHE])
            .unwrap_err();
        assert!(matches!(err, PropertyError::Unsupported { .. }));
        assert!(err.to_string().contains("bogus.key"));
    }

    #[test]
    fn test_bool_parsing() {
        let props = Properties::new().with(keys::BEST_EFFORT, "true");
        assert!(props.bool_or(keys::BEST_EFFORT, false).unwrap());
        assert!(!props.bool_or(keys::CACHE, false).unwrap());

        let bad = Properties::new().with(keys::CACHE, "yes");
        assert!(bad.bool_or(keys::CACHE, false).is_err());
    }

    #[test]
    fn test_u64_parsing() {
        let props = Properties::new().with(keys::TIME_TO_LIVE, "300");
        assert_eq!(props.u64_or(keys::TIME_TO_LIVE, 0).unwrap(), 300);
        assert!(Properties::new()
            .with(keys::TIME_TO_LIVE, "-3")
            .u64_or(keys::TIME_TO_LIVE, 0)
            .is_err());
    }

    #[test]
    fn test_require() {
        let props = Properties::new().with(keys::BASE_PATH, "/statics");
        assert_eq!(props.require(keys::BASE_PATH).unwrap(), "/statics");
        assert!(props.require(keys::LOGIN).is_err());
    }
}
