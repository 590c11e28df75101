//! Path filters applied to declared heap paths.

use regex::Regex;

use crate::config::{keys, Properties};
use crate::core::Result;

/// Rewrites a declared path list before a heap is built.
///
/// Filters are pure and composable; the context builder applies them in
/// registration order.
pub trait PathFilter: Send + Sync {
    /// Filters the given paths, returning the list the heap will use.
    fn filter_paths(&self, paths: Vec<String>) -> Vec<String>;
}

/// Removes every path matching one of the configured regular expressions.
pub struct RegexRemoveFilter {
    patterns: Vec<Regex>,
    enabled: bool,
}

impl RegexRemoveFilter {
    /// Supported configuration keys.
    pub const SUPPORTED_KEYS: &'static [&'static str] =
        &[keys::REGEX_EXPRESSIONS, keys::FILTER_ENABLE];

    /// Creates a filter from raw expressions.
    pub fn new(expressions: &[&str]) -> Result<Self> {
        let patterns = expressions
            .iter()
            .map(|e| Regex::new(e))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self {
            patterns,
            enabled: true,
        })
    }

    /// Builds a filter from a property bag.
    ///
    /// Expressions are newline-separated in [`keys::REGEX_EXPRESSIONS`].
    pub fn from_properties(props: &Properties) -> Result<Self> {
        props.validate("regex path filter", Self::SUPPORTED_KEYS)?;
        let expressions: Vec<&str> = props
            .str_or(keys::REGEX_EXPRESSIONS, "")
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        let mut filter = Self::new(&expressions)?;
        filter.enabled = props.bool_or(keys::FILTER_ENABLE, true)?;
        Ok(filter)
    }
}

impl PathFilter for RegexRemoveFilter {
    fn filter_paths(&self, paths: Vec<String>) -> Vec<String> {
        if !self.enabled {
            return paths;
        }
        paths
            .into_iter()
            .filter(|p| !self.patterns.iter().any(|regex| regex.is_match(p)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removes_matching_paths() {
        let filter = RegexRemoveFilter::new(&["(.*)?reload.*"]).unwrap();
        let kept = filter.filter_paths(vec![
            "app.js".to_string(),
            "livereload.js".to_string(),
        ]);
        assert_eq!(kept, vec!["app.js"]);
    }

    #[test]
    fn test_disabled_filter_is_identity() {
        let props = Properties::new()
            .with(keys::REGEX_EXPRESSIONS, ".*")
            .with(keys::FILTER_ENABLE, "false");
        let filter = RegexRemoveFilter::from_properties(&props).unwrap();
        let paths = vec!["a.js".to_string()];
        assert_eq!(filter.filter_paths(paths.clone()), paths);
    }

    #[test]
    fn test_from_properties_multiline() {
        let props = Properties::new()
            .with(keys::REGEX_EXPRESSIONS, ".*\\.map\n.*~");
        let filter = RegexRemoveFilter::from_properties(&props).unwrap();
        let kept = filter.filter_paths(vec![
            "a.js".to_string(),
            "a.js.map".to_string(),
            "a.js~".to_string(),
        ]);
        assert_eq!(kept, vec!["a.js"]);
    }

    #[test]
    fn test_unsupported_key_rejected() {
        let props = Properties::new().with(keys::CACHE, "true");
        assert!(RegexRemoveFilter::from_properties(&props).is_err());
    }
}
