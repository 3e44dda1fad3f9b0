//! Build backend
//!
//! `BuildBackend` is the seam between the engine and the external build
//! service. The production implementation shells out to the Cloud Build
//! CLI: `gcloud builds submit --async` to trigger and `gcloud builds
//! describe --format=json` to re-query status. Status payloads stay opaque
//! to the engine; only the terminality predicate here knows their shape.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use refpatrol_core::domain::build::{BuildStatus, TerminalOutcome};
use refpatrol_core::refs;

use crate::config::{Config, WorkflowConfig};

/// Errors from trigger and describe calls.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("build backend rejected trigger for '{alias}': {detail}")]
    Rejected { alias: String, detail: String },

    #[error("build backend unavailable: {detail}")]
    Unavailable { detail: String },

    #[error("unexpected build backend output: {detail}")]
    MalformedOutput { detail: String },

    #[error("no workflow configured for alias '{alias}'")]
    UnknownAlias { alias: String },

    #[error("failed to spawn gcloud: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Handle and initial status for a freshly triggered build.
#[derive(Debug, Clone)]
pub struct TriggeredBuild {
    pub execution_id: Uuid,
    pub status: BuildStatus,
}

/// External build service the dispatcher and tracker talk to.
#[async_trait]
pub trait BuildBackend: Send + Sync {
    /// Submits one build for a ref change and returns its execution handle
    /// with the backend's initial reported status.
    async fn trigger(
        &self,
        alias: &str,
        ref_name: &str,
        ref_hash: &str,
    ) -> Result<TriggeredBuild, BackendError>;

    /// Re-queries the current status of an execution.
    async fn describe(&self, execution_id: Uuid) -> Result<BuildStatus, BackendError>;

    /// Classifies a status payload as terminal, if it is. `None` means the
    /// execution is still pending or running and must be polled again.
    fn terminal_outcome(&self, status: &BuildStatus) -> Option<TerminalOutcome>;
}

/// Cloud Build workflow resolved against the config path.
#[derive(Debug, Clone)]
struct Workflow {
    config: PathBuf,
    sources: PathBuf,
    substitutions: Vec<(String, String)>,
}

/// `gcloud` CLI backed implementation.
pub struct CloudBuildCli {
    workflows: HashMap<String, Workflow>,
}

impl CloudBuildCli {
    /// Builds the per-alias workflow table from the daemon configuration.
    pub fn from_config(config: &Config) -> Self {
        let workflows = config
            .targets
            .iter()
            .map(|target| {
                (
                    target.alias.clone(),
                    resolve_workflow(config, &target.workflow),
                )
            })
            .collect();
        Self { workflows }
    }
}

fn resolve_workflow(config: &Config, workflow: &WorkflowConfig) -> Workflow {
    Workflow {
        config: config.resolve(&workflow.config),
        sources: config.resolve(&workflow.sources),
        substitutions: workflow
            .substitutions
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    }
}

#[async_trait]
impl BuildBackend for CloudBuildCli {
    async fn trigger(
        &self,
        alias: &str,
        ref_name: &str,
        _ref_hash: &str,
    ) -> Result<TriggeredBuild, BackendError> {
        let workflow = self
            .workflows
            .get(alias)
            .ok_or_else(|| BackendError::UnknownAlias {
                alias: alias.to_string(),
            })?;

        let substitutions = format_substitutions(ref_name, &workflow.substitutions);

        let output = Command::new("gcloud")
            .arg("builds")
            .arg("submit")
            .arg("--async")
            .arg(format!("--config={}", workflow.config.display()))
            .arg(format!("--substitutions={}", substitutions))
            .arg(&workflow.sources)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                "gcloud builds submit returned {} for '{}'",
                output.status.code().unwrap_or(-1),
                alias
            );
            return Err(BackendError::Rejected {
                alias: alias.to_string(),
                detail: stderr.trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let (execution_id, reported) = parse_submit_output(&stdout)?;
        info!("Cloud Build started [ID={}]", execution_id);

        Ok(TriggeredBuild {
            execution_id,
            status: BuildStatus::new(json!({
                "id": execution_id.to_string(),
                "status": reported,
            })),
        })
    }

    async fn describe(&self, execution_id: Uuid) -> Result<BuildStatus, BackendError> {
        let output = Command::new("gcloud")
            .arg("builds")
            .arg("describe")
            .arg("--format=json")
            .arg(execution_id.to_string())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                "gcloud builds describe returned {} for [ID={}]",
                output.status.code().unwrap_or(-1),
                execution_id
            );
            return Err(BackendError::Unavailable {
                detail: stderr.trim().to_string(),
            });
        }

        let payload: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| BackendError::MalformedOutput {
                detail: format!("describe output is not JSON: {}", e),
            })?;
        debug!("Cloud Build [ID={}] described", execution_id);

        Ok(BuildStatus::new(payload))
    }

    fn terminal_outcome(&self, status: &BuildStatus) -> Option<TerminalOutcome> {
        cloud_build_terminal_outcome(status)
    }
}

/// Maps a Cloud Build status payload onto the engine's terminal states.
pub fn cloud_build_terminal_outcome(status: &BuildStatus) -> Option<TerminalOutcome> {
    match status.as_value().get("status")?.as_str()? {
        "SUCCESS" => Some(TerminalOutcome::Success),
        "FAILURE" | "INTERNAL_ERROR" | "TIMEOUT" => Some(TerminalOutcome::Failure),
        "CANCELLED" | "EXPIRED" => Some(TerminalOutcome::Other),
        _ => None,
    }
}

/// `TAG_NAME=<short ref>` first, then the configured pairs.
fn format_substitutions(ref_name: &str, extra: &[(String, String)]) -> String {
    let mut parts = vec![format!("TAG_NAME={}", refs::short_ref_name(ref_name))];
    parts.extend(extra.iter().map(|(k, v)| format!("{}={}", k, v)));
    parts.join(",")
}

/// Extracts the build UUID and reported status from the last line of
/// `gcloud builds submit --async` output.
fn parse_submit_output(stdout: &str) -> Result<(Uuid, String), BackendError> {
    let line = stdout
        .lines()
        .filter(|l| !l.trim().is_empty())
        .last()
        .ok_or_else(|| BackendError::MalformedOutput {
            detail: "gcloud builds submit produced no output".to_string(),
        })?;

    let mut tokens = line.split_whitespace();
    let id_token = tokens.next().ok_or_else(|| BackendError::MalformedOutput {
        detail: "empty build info line".to_string(),
    })?;
    let execution_id =
        Uuid::parse_str(id_token).map_err(|_| BackendError::MalformedOutput {
            detail: format!("build info line does not start with a UUID: {:?}", line),
        })?;

    let reported = tokens.last().unwrap_or("QUEUED").to_string();
    Ok((execution_id, reported))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_submit_output() {
        let stdout = "Creating temporary tarball...\n\
                      7d1bb5a7-545f-4c30-b640-f5461036e2e7 2018-11-01T20:49:31+00:00 1H54M12S - - QUEUED\n";
        let (id, status) = parse_submit_output(stdout).unwrap();
        assert_eq!(
            id,
            Uuid::parse_str("7d1bb5a7-545f-4c30-b640-f5461036e2e7").unwrap()
        );
        assert_eq!(status, "QUEUED");
    }

    #[test]
    fn test_parse_submit_output_rejects_garbage() {
        assert!(parse_submit_output("").is_err());
        assert!(parse_submit_output("build format has changed\n").is_err());
    }

    #[test]
    fn test_terminal_outcome_mapping() {
        let status = |s: &str| BuildStatus::new(json!({ "status": s }));

        assert_eq!(
            cloud_build_terminal_outcome(&status("SUCCESS")),
            Some(TerminalOutcome::Success)
        );
        assert_eq!(
            cloud_build_terminal_outcome(&status("FAILURE")),
            Some(TerminalOutcome::Failure)
        );
        assert_eq!(
            cloud_build_terminal_outcome(&status("TIMEOUT")),
            Some(TerminalOutcome::Failure)
        );
        assert_eq!(
            cloud_build_terminal_outcome(&status("CANCELLED")),
            Some(TerminalOutcome::Other)
        );
        assert_eq!(cloud_build_terminal_outcome(&status("QUEUED")), None);
        assert_eq!(cloud_build_terminal_outcome(&status("WORKING")), None);
        assert_eq!(
            cloud_build_terminal_outcome(&BuildStatus::new(json!("not an object"))),
            None
        );
    }

    #[test]
    fn test_format_substitutions() {
        let extra = vec![
            ("_VAR0".to_string(), "val0".to_string()),
            ("_VAR1".to_string(), "val1".to_string()),
        ];
        assert_eq!(
            format_substitutions("refs/tags/r0002", &extra),
            "TAG_NAME=r0002,_VAR0=val0,_VAR1=val1"
        );
        assert_eq!(format_substitutions("refs/heads/main", &[]), "TAG_NAME=main");
    }
}
