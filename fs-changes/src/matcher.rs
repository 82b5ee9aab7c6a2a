//! Ignore matching against absolute paths.

use std::path::Path;

use regex::Regex;

use crate::error::{Result, WatcherError};

/// Compiled ignore pattern.
///
/// The pattern is searched anywhere in the path, so `\.git` ignores
/// `/repo/.git` as well as `/repo/.gitignore`. An empty pattern ignores
/// nothing.
#[derive(Debug, Clone)]
pub struct IgnoreMatcher {
    regex: Option<Regex>,
}

impl IgnoreMatcher {
    /// Compile an ignore pattern.
    pub fn new(pattern: &str) -> Result<Self> {
        if pattern.is_empty() {
            return Ok(Self::none());
        }

        let regex = Regex::new(pattern).map_err(|source| WatcherError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;

        Ok(Self { regex: Some(regex) })
    }

    /// A matcher that ignores nothing.
    pub fn none() -> Self {
        Self { regex: None }
    }

    /// Check if a path should be left out of watching and reporting.
    pub fn is_ignored(&self, path: &Path) -> bool {
        match &self.regex {
            Some(regex) => regex.is_match(&path.to_string_lossy()),
            None => false,
        }
    }

    /// The source pattern, if any.
    pub fn pattern(&self) -> Option<&str> {
        self.regex.as_ref().map(Regex::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_semantics() {
        let matcher = IgnoreMatcher::new(r"\.git").unwrap();

        assert!(matcher.is_ignored(Path::new("/repo/.git")));
        assert!(matcher.is_ignored(Path::new("/repo/.git/objects/x")));
        assert!(matcher.is_ignored(Path::new("/repo/.gitignore")));
        assert!(!matcher.is_ignored(Path::new("/repo/src/git.rs")));
    }

    #[test]
    fn test_anchors_are_honored() {
        let matcher = IgnoreMatcher::new(r"\.swp$").unwrap();

        assert!(matcher.is_ignored(Path::new("/repo/notes.txt.swp")));
        assert!(!matcher.is_ignored(Path::new("/repo/notes.swp.txt")));
    }

    #[test]
    fn test_empty_pattern_ignores_nothing() {
        let matcher = IgnoreMatcher::new("").unwrap();
        assert!(!matcher.is_ignored(Path::new("/anything")));
        assert_eq!(matcher.pattern(), None);
    }

    #[test]
    fn test_invalid_pattern() {
        let err = IgnoreMatcher::new("(unclosed").unwrap_err();
        assert!(matches!(err, WatcherError::InvalidPattern { ref pattern, .. } if pattern == "(unclosed"));
    }
}
