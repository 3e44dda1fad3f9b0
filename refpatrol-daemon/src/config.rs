//! Daemon configuration
//!
//! Runtime settings come from CLI flags with environment fallbacks; the
//! watched targets come from a JSON targets file. Everything is validated
//! up front so malformed targets are rejected at startup instead of
//! surfacing as runtime errors mid-poll.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use thiserror::Error;

use refpatrol_core::domain::target::RepoTarget;
use refpatrol_core::refs::PatternError;

/// Command line flags for the daemon.
#[derive(Debug, Parser)]
#[command(name = "refpatrol", about = "Polls git repositories and triggers builds on ref changes")]
pub struct Args {
    /// Time between repository poll attempts, in seconds.
    #[arg(long, env = "POLL_INTERVAL", default_value_t = 7200)]
    pub poll_interval: u64,

    /// Postgres connection string for the journal database.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Path to the folder holding the targets file and build sources.
    #[arg(long, env = "CONFIG_PATH")]
    pub config_path: PathBuf,

    /// Name of the targets file within --config-path.
    #[arg(long, env = "CONFIG_FILE", default_value = "targets.json")]
    pub config_file: String,
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read targets file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse targets file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("no targets configured")]
    NoTargets,

    #[error("duplicate alias '{alias}'")]
    DuplicateAlias { alias: String },

    #[error("url '{url}' is configured under more than one alias")]
    DuplicateUrl { url: String },

    #[error("target '{alias}': {source}")]
    InvalidTarget {
        alias: String,
        source: PatternError,
    },

    #[error("poll interval must be greater than zero")]
    ZeroInterval,
}

/// A Cloud Build workflow attached to a target.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowConfig {
    /// Build config file, relative to the config path.
    pub config: String,
    /// Build source archive, relative to the config path.
    pub sources: String,
    /// Extra substitutions passed alongside TAG_NAME.
    #[serde(default)]
    pub substitutions: BTreeMap<String, String>,
}

/// One entry of the targets file.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    pub alias: String,
    pub url: String,
    #[serde(default)]
    pub ref_filters: Vec<String>,
    /// Build workflow submitted when a watched ref is new or changed.
    pub workflow: WorkflowConfig,
}

impl TargetConfig {
    pub fn repo_target(&self) -> RepoTarget {
        RepoTarget {
            alias: self.alias.clone(),
            url: self.url.clone(),
            ref_filters: self.ref_filters.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TargetsFile {
    targets: Vec<TargetConfig>,
}

/// Fully validated daemon configuration.
#[derive(Debug)]
pub struct Config {
    pub poll_interval: Duration,
    pub database_url: String,
    /// Root for resolving workflow config/source paths.
    pub config_path: PathBuf,
    pub targets: Vec<TargetConfig>,
}

impl Config {
    /// Loads the targets file named by `args` and validates the result.
    pub fn load(args: Args) -> Result<Self, ConfigError> {
        let path = args.config_path.join(&args.config_file);
        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let file: TargetsFile =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;

        let config = Self {
            poll_interval: Duration::from_secs(args.poll_interval),
            database_url: args.database_url,
            config_path: args.config_path,
            targets: file.targets,
        };
        config.validate()?;
        Ok(config)
    }

    /// Enforces the 1:1 alias/url mapping and filter pattern validity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }
        if self.targets.is_empty() {
            return Err(ConfigError::NoTargets);
        }

        let mut aliases = HashSet::new();
        let mut urls = HashSet::new();
        for target in &self.targets {
            if !aliases.insert(target.alias.as_str()) {
                return Err(ConfigError::DuplicateAlias {
                    alias: target.alias.clone(),
                });
            }
            if !urls.insert(target.url.as_str()) {
                return Err(ConfigError::DuplicateUrl {
                    url: target.url.clone(),
                });
            }
            target
                .repo_target()
                .validate()
                .map_err(|source| ConfigError::InvalidTarget {
                    alias: target.alias.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Resolves a workflow-relative path against the config path.
    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.config_path.join(relative)
    }
}

/// Convenience for tests and callers that already hold parsed targets.
pub fn config_from_parts(
    poll_interval: Duration,
    database_url: impl Into<String>,
    config_path: impl AsRef<Path>,
    targets: Vec<TargetConfig>,
) -> Config {
    Config {
        poll_interval,
        database_url: database_url.into(),
        config_path: config_path.as_ref().to_path_buf(),
        targets,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(alias: &str, url: &str) -> TargetConfig {
        TargetConfig {
            alias: alias.to_string(),
            url: url.to_string(),
            ref_filters: Vec::new(),
            workflow: WorkflowConfig {
                config: "build.yaml".to_string(),
                sources: "sources.tar.gz".to_string(),
                substitutions: BTreeMap::new(),
            },
        }
    }

    fn config(targets: Vec<TargetConfig>) -> Config {
        config_from_parts(Duration::from_secs(60), "postgres://x", "/tmp", targets)
    }

    #[test]
    fn test_valid_config() {
        let cfg = config(vec![
            target("repo1", "https://example.com/one.git"),
            target("repo2", "https://example.com/two.git"),
        ]);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_duplicate_alias_rejected() {
        let cfg = config(vec![
            target("repo1", "https://example.com/one.git"),
            target("repo1", "https://example.com/two.git"),
        ]);
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::DuplicateAlias { .. })
        ));
    }

    #[test]
    fn test_duplicate_url_rejected() {
        let cfg = config(vec![
            target("repo1", "https://example.com/one.git"),
            target("repo2", "https://example.com/one.git"),
        ]);
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::DuplicateUrl { .. })
        ));
    }

    #[test]
    fn test_bad_filter_rejected() {
        let mut bad = target("repo1", "https://example.com/one.git");
        bad.ref_filters = vec!["refs/tags/..".to_string()];
        let cfg = config(vec![bad]);
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidTarget { .. })
        ));
    }

    #[test]
    fn test_no_targets_rejected() {
        let cfg = config(Vec::new());
        assert!(matches!(cfg.validate(), Err(ConfigError::NoTargets)));
    }

    #[test]
    fn test_targets_file_shape_parses() {
        let raw = r#"{
            "targets": [
                {
                    "alias": "upstream",
                    "url": "https://example.com/repo.git",
                    "ref_filters": ["refs/tags/*"],
                    "workflow": {
                        "config": "first.yaml",
                        "sources": "first.tar.gz",
                        "substitutions": { "_VAR0": "val0" }
                    }
                }
            ]
        }"#;
        let file: TargetsFile = serde_json::from_str(raw).unwrap();
        assert_eq!(file.targets.len(), 1);
        assert_eq!(file.targets[0].workflow.config, "first.yaml");
        assert_eq!(
            file.targets[0].workflow.substitutions.get("_VAR0"),
            Some(&"val0".to_string())
        );
    }
}
