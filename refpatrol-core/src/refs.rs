//! Ref name and filter pattern handling
//!
//! Validation rules follow what `git ls-remote` itself will accept, plus the
//! parsing constraints the daemon applies to its output: commit hashes are
//! 40 lowercase hex characters and reference names are `refs/...` with a
//! bounded length. Filter patterns are ref names that may additionally
//! contain `*` wildcards.

use thiserror::Error;

/// Longest accepted ref name suffix after `refs/`. Output of the remote
/// listing is assumed well formed, so this is a sanity bound rather than a
/// strict git rule.
const MAX_REF_SUFFIX_LEN: usize = 64;

/// Errors raised while validating target configuration.
#[derive(Debug, Error)]
pub enum PatternError {
    #[error("target alias must not be empty")]
    EmptyAlias,

    #[error("target '{alias}' has an empty url")]
    EmptyUrl { alias: String },

    #[error("ref filter pattern must not be empty")]
    EmptyPattern,

    #[error("ref filter '{pattern}' contains forbidden sequence '{found}'")]
    ForbiddenSequence { pattern: String, found: String },

    #[error("ref filter '{pattern}' contains forbidden character '{found}'")]
    ForbiddenCharacter { pattern: String, found: char },
}

/// Checks that a filter pattern is a syntactically plausible ref pattern.
///
/// Accepts plain ref names (`refs/heads/main`) and glob patterns
/// (`refs/tags/*`). Rejection here is a configuration error surfaced at
/// startup; patterns are never validated mid-poll.
pub fn validate_ref_filter(pattern: &str) -> Result<(), PatternError> {
    if pattern.is_empty() {
        return Err(PatternError::EmptyPattern);
    }

    for needle in ["..", "//", "@{"] {
        if pattern.contains(needle) {
            return Err(PatternError::ForbiddenSequence {
                pattern: pattern.to_string(),
                found: needle.to_string(),
            });
        }
    }

    if pattern.starts_with('/') || pattern.ends_with('/') || pattern.ends_with('.') {
        return Err(PatternError::ForbiddenSequence {
            pattern: pattern.to_string(),
            found: "misplaced '/' or '.'".to_string(),
        });
    }

    for c in pattern.chars() {
        let forbidden = c.is_whitespace()
            || c.is_control()
            || matches!(c, '\\' | '~' | '^' | ':' | '?' | '[' | ']');
        if forbidden {
            return Err(PatternError::ForbiddenCharacter {
                pattern: pattern.to_string(),
                found: c,
            });
        }
    }

    Ok(())
}

/// Glob match of a ref name against a single filter pattern.
///
/// `*` matches any run of characters, including `/`. Everything else
/// matches literally.
pub fn matches_filter(name: &str, pattern: &str) -> bool {
    glob_match(name.as_bytes(), pattern.as_bytes())
}

fn glob_match(name: &[u8], pattern: &[u8]) -> bool {
    // Iterative wildcard matching with single-star backtracking.
    let (mut n, mut p) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while n < name.len() {
        if p < pattern.len() && (pattern[p] == name[n]) {
            n += 1;
            p += 1;
        } else if p < pattern.len() && pattern[p] == b'*' {
            star = Some((p, n));
            p += 1;
        } else if let Some((star_p, star_n)) = star {
            p = star_p + 1;
            n = star_n + 1;
            star = Some((star_p, star_n + 1));
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == b'*' {
        p += 1;
    }
    p == pattern.len()
}

/// Keeps only the refs whose name matches at least one filter.
///
/// An empty filter list keeps everything.
pub fn prune_refs<I>(refs: I, filters: &[String]) -> std::collections::BTreeMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    refs.into_iter()
        .filter(|(name, _)| filters.is_empty() || filters.iter().any(|f| matches_filter(name, f)))
        .collect()
}

/// True for a 40-character lowercase hex commit hash.
pub fn is_commit_hash(s: &str) -> bool {
    s.len() == 40 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// True for a plausible full ref name as printed by the remote listing.
pub fn is_well_formed_ref_name(s: &str) -> bool {
    match s.strip_prefix("refs/") {
        Some(suffix) => {
            !suffix.is_empty()
                && suffix.len() <= MAX_REF_SUFFIX_LEN
                && !suffix.chars().any(|c| c.is_whitespace())
        }
        None => false,
    }
}

/// Final path segment of a ref name: `refs/tags/r0002` -> `r0002`.
///
/// Used when handing a short name to the build backend's substitutions.
pub fn short_ref_name(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_validate_accepts_plain_and_glob() {
        assert!(validate_ref_filter("refs/heads/main").is_ok());
        assert!(validate_ref_filter("refs/tags/*").is_ok());
        assert!(validate_ref_filter("refs/tags/r*.release").is_ok());
    }

    #[test]
    fn test_validate_rejects_malformed() {
        assert!(validate_ref_filter("").is_err());
        assert!(validate_ref_filter("refs/tags/..").is_err());
        assert!(validate_ref_filter("refs//tags").is_err());
        assert!(validate_ref_filter("/refs/tags").is_err());
        assert!(validate_ref_filter("refs/tags/").is_err());
        assert!(validate_ref_filter("refs/tags/a b").is_err());
        assert!(validate_ref_filter("refs/tags/a:b").is_err());
        assert!(validate_ref_filter("refs/tags/v1.").is_err());
    }

    #[test]
    fn test_glob_matching() {
        assert!(matches_filter("refs/tags/r0001", "refs/tags/*"));
        assert!(matches_filter("refs/heads/feature/x", "refs/heads/*"));
        assert!(matches_filter("refs/heads/main", "refs/heads/main"));
        assert!(matches_filter("refs/tags/r1-rc2", "refs/tags/r*rc*"));
        assert!(!matches_filter("refs/heads/main", "refs/tags/*"));
        assert!(!matches_filter("refs/tags/r0001", "refs/tags/r0002"));
    }

    #[test]
    fn test_prune_refs_empty_filter_keeps_all() {
        let refs = BTreeMap::from([
            ("refs/heads/main".to_string(), "a".repeat(40)),
            ("refs/tags/r0001".to_string(), "b".repeat(40)),
        ]);
        let pruned = prune_refs(refs.clone(), &[]);
        assert_eq!(pruned, refs);
    }

    #[test]
    fn test_prune_refs_applies_filters() {
        let refs = BTreeMap::from([
            ("refs/heads/main".to_string(), "a".repeat(40)),
            ("refs/tags/r0001".to_string(), "b".repeat(40)),
            ("refs/tags/r0002".to_string(), "c".repeat(40)),
        ]);
        let filters = vec!["refs/tags/*".to_string()];
        let pruned = prune_refs(refs, &filters);
        assert_eq!(
            pruned.keys().collect::<Vec<_>>(),
            vec!["refs/tags/r0001", "refs/tags/r0002"]
        );
    }

    #[test]
    fn test_is_commit_hash() {
        assert!(is_commit_hash(&"0123456789abcdef0123456789abcdef01234567".to_string()));
        assert!(!is_commit_hash("0123456789abcdef"));
        assert!(!is_commit_hash(&"0123456789ABCDEF0123456789ABCDEF01234567".to_string()));
        assert!(!is_commit_hash(&"g".repeat(40)));
    }

    #[test]
    fn test_is_well_formed_ref_name() {
        assert!(is_well_formed_ref_name("refs/heads/main"));
        assert!(is_well_formed_ref_name("refs/tags/r0001"));
        assert!(!is_well_formed_ref_name("HEAD"));
        assert!(!is_well_formed_ref_name("refs/"));
        assert!(!is_well_formed_ref_name(&format!("refs/{}", "x".repeat(65))));
    }

    #[test]
    fn test_short_ref_name() {
        assert_eq!(short_ref_name("refs/tags/r0002"), "r0002");
        assert_eq!(short_ref_name("refs/heads/feature/x"), "x");
        assert_eq!(short_ref_name("main"), "main");
    }
}
