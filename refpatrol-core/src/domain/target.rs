//! Watched repository targets

use serde::{Deserialize, Serialize};

use crate::refs::{self, PatternError};

/// A repository the daemon patrols.
///
/// `alias` is the human-readable key used everywhere else (journal rows,
/// logs); it maps 1:1 to `url`. `ref_filters` restricts which remote refs
/// are observed; an empty list observes everything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoTarget {
    pub alias: String,
    pub url: String,
    #[serde(default)]
    pub ref_filters: Vec<String>,
}

impl RepoTarget {
    pub fn new(alias: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            url: url.into(),
            ref_filters: Vec::new(),
        }
    }

    /// Validates the target definition.
    ///
    /// Malformed filter patterns are a configuration error, never a runtime
    /// error: the daemon rejects the target at startup rather than polling
    /// with a pattern that can silently match nothing.
    pub fn validate(&self) -> Result<(), PatternError> {
        if self.alias.trim().is_empty() {
            return Err(PatternError::EmptyAlias);
        }
        if self.url.trim().is_empty() {
            return Err(PatternError::EmptyUrl {
                alias: self.alias.clone(),
            });
        }
        for pattern in &self.ref_filters {
            refs::validate_ref_filter(pattern)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_target() {
        let mut target = RepoTarget::new("upstream", "https://example.com/repo.git");
        target.ref_filters = vec!["refs/tags/*".to_string(), "refs/heads/main".to_string()];
        assert!(target.validate().is_ok());
    }

    #[test]
    fn test_empty_alias_rejected() {
        let target = RepoTarget::new("  ", "https://example.com/repo.git");
        assert!(target.validate().is_err());
    }

    #[test]
    fn test_empty_url_rejected() {
        let target = RepoTarget::new("upstream", "");
        assert!(target.validate().is_err());
    }

    #[test]
    fn test_bad_filter_rejected() {
        let mut target = RepoTarget::new("upstream", "https://example.com/repo.git");
        target.ref_filters = vec!["refs/tags/..".to_string()];
        assert!(target.validate().is_err());
    }
}
