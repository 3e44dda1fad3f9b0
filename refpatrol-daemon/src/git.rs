//! Remote ref listing
//!
//! `RefSource` is the seam between the engine and the version-control
//! remote; the production implementation shells out to
//! `git ls-remote --refs`. Output parsing assumes git formats its own
//! output correctly and merely bounds what it accepts: a 40-hex hash, a
//! tab, and a `refs/...` name. Malformed lines are skipped.

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

use refpatrol_core::refs;

/// Errors from listing refs on a remote.
#[derive(Debug, Error)]
pub enum RefSourceError {
    #[error("repository {url} unreachable: {detail}")]
    Unreachable { url: String, detail: String },

    #[error("authorization refused for {url}")]
    Authorization { url: String },

    #[error("failed to spawn git: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Lists the current refs visible on a remote repository.
#[async_trait]
pub trait RefSource: Send + Sync {
    /// Returns ref name -> commit hash for every remote ref surviving the
    /// filters. Filters are assumed pre-validated.
    async fn list_refs(
        &self,
        url: &str,
        ref_filters: &[String],
    ) -> Result<BTreeMap<String, String>, RefSourceError>;
}

/// `git ls-remote` backed implementation.
pub struct GitCli;

#[async_trait]
impl RefSource for GitCli {
    async fn list_refs(
        &self,
        url: &str,
        ref_filters: &[String],
    ) -> Result<BTreeMap<String, String>, RefSourceError> {
        let mut command = Command::new("git");
        command.arg("ls-remote").arg("--refs").arg(url);
        // ls-remote narrows server-side; the parse below prunes again so
        // the snapshot only ever contains names matching the filters.
        for filter in ref_filters {
            command.arg(filter);
        }

        debug!("Running git ls-remote --refs {}", url);
        let output = command.output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                "git ls-remote returned {} for {}",
                output.status.code().unwrap_or(-1),
                url
            );
            if is_authorization_failure(&stderr) {
                return Err(RefSourceError::Authorization {
                    url: url.to_string(),
                });
            }
            return Err(RefSourceError::Unreachable {
                url: url.to_string(),
                detail: stderr.trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(refs::prune_refs(parse_ls_remote(&stdout), ref_filters))
    }
}

fn is_authorization_failure(stderr: &str) -> bool {
    ["Authentication failed", "Permission denied", "could not read Username"]
        .iter()
        .any(|needle| stderr.contains(needle))
}

/// Parses `git ls-remote --refs` output into (name, hash) pairs.
fn parse_ls_remote(stdout: &str) -> Vec<(String, String)> {
    stdout
        .lines()
        .filter_map(|line| {
            let (hash, name) = line.split_once('\t')?;
            if refs::is_commit_hash(hash) && refs::is_well_formed_ref_name(name) {
                Some((name.to_string(), hash.to_string()))
            } else {
                debug!("Skipping malformed ls-remote line: {:?}", line);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const H1: &str = "039de508998f3676871ed8cc00e3b33f0f95f7cb";
    const H2: &str = "c589a4d44889afa2e6f811852b4575df7287abcd";

    #[test]
    fn test_parse_well_formed_output() {
        let stdout = format!("{H1}\trefs/heads/master\n{H2}\trefs/tags/r0001\n");
        let parsed = parse_ls_remote(&stdout);
        assert_eq!(
            parsed,
            vec![
                ("refs/heads/master".to_string(), H1.to_string()),
                ("refs/tags/r0001".to_string(), H2.to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_skips_malformed_lines() {
        let stdout = format!(
            "not-a-hash\trefs/heads/master\n\
             {H1}\tHEAD\n\
             {H1}refs/heads/nospace\n\
             {H2}\trefs/tags/r0001\n"
        );
        let parsed = parse_ls_remote(&stdout);
        assert_eq!(parsed, vec![("refs/tags/r0001".to_string(), H2.to_string())]);
    }

    #[test]
    fn test_parse_empty_output() {
        assert!(parse_ls_remote("").is_empty());
    }

    #[test]
    fn test_authorization_detection() {
        assert!(is_authorization_failure(
            "fatal: Authentication failed for 'https://example.com/repo.git'"
        ));
        assert!(!is_authorization_failure(
            "fatal: unable to access 'https://example.com/repo.git': Could not resolve host"
        ));
    }
}
