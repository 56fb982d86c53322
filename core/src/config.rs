//! Gate configuration loading and validation.
//!
//! Configuration is read from TOML or YAML and validated before the gate
//! starts so that mistakes surface early.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

/// Comment posted to request a fresh validation run.
pub const DEFAULT_VALIDATION_COMMENT: &str =
    "@k8s-bot test this [submit-queue is verifying that this PR is safe to merge]";

/// Identity recorded on merges performed by the gate.
pub const DEFAULT_MERGE_ACTOR: &str = "submit-queue";

/// Validation result containing all found issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation errors (fatal).
    pub errors: Vec<String>,
    /// List of validation warnings (non-fatal).
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Adds an error to the result.
    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    /// Adds a warning to the result.
    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    /// Converts to a Result, failing if there are errors.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.is_valid() {
            Ok(self.warnings)
        } else {
            Err(Error::Config(self.errors.join("; ")))
        }
    }
}

/// Trait for validatable configuration types.
pub trait Validate {
    /// Validates the configuration and returns any issues found.
    fn validate(&self) -> ValidationResult;
}

/// Configuration for the merge gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Base URL of the Jenkins instance.
    pub jenkins_host: String,
    /// Build jobs that must be stable before anything merges, in check order.
    pub jenkins_jobs: Vec<String>,
    /// Repository slug, `owner/name`.
    #[serde(default)]
    pub repo: String,
    /// Label that lets a PR skip the validation run.
    #[serde(default)]
    pub bypass_label: Option<String>,
    /// Seconds between polling rounds.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Stop the stability wait after this many sweeps. Unbounded if unset.
    #[serde(default)]
    pub max_stability_sweeps: Option<u32>,
    /// Stop validation waits after this many seconds. Unbounded if unset.
    #[serde(default)]
    pub validation_timeout_secs: Option<u64>,
    /// Identity passed to merges.
    #[serde(default = "default_merge_actor")]
    pub merge_actor: String,
    /// Comment body that requests a validation run.
    #[serde(default = "default_validation_comment")]
    pub validation_comment: String,
    /// Address the status endpoint listens on.
    #[serde(default = "default_status_addr")]
    pub status_addr: SocketAddr,
    /// Initial whitelist shown in status.
    #[serde(default)]
    pub whitelist: Vec<String>,
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_merge_actor() -> String {
    DEFAULT_MERGE_ACTOR.to_string()
}

fn default_validation_comment() -> String {
    DEFAULT_VALIDATION_COMMENT.to_string()
}

fn default_status_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

impl GateConfig {
    /// Creates a configuration with defaults for everything but the CI
    /// endpoint and job list.
    pub fn new<I, S>(jenkins_host: impl Into<String>, jobs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            jenkins_host: jenkins_host.into(),
            jenkins_jobs: jobs.into_iter().map(Into::into).collect(),
            repo: String::new(),
            bypass_label: None,
            poll_interval_secs: default_poll_interval_secs(),
            max_stability_sweeps: None,
            validation_timeout_secs: None,
            merge_actor: default_merge_actor(),
            validation_comment: default_validation_comment(),
            status_addr: default_status_addr(),
            whitelist: Vec::new(),
        }
    }

    /// Sets the bypass label.
    pub fn with_bypass_label(mut self, label: impl Into<String>) -> Self {
        self.bypass_label = Some(label.into());
        self
    }

    /// Sets the repository slug.
    pub fn with_repo(mut self, repo: impl Into<String>) -> Self {
        self.repo = repo.into();
        self
    }

    /// Loads configuration from a `.toml`, `.yaml` or `.yml` file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();

        match extension {
            "toml" => toml::from_str(&content)
                .map_err(|e| Error::Config(format!("invalid TOML in {}: {}", path.display(), e))),
            "yaml" | "yml" => serde_yaml::from_str(&content)
                .map_err(|e| Error::Config(format!("invalid YAML in {}: {}", path.display(), e))),
            other => Err(Error::Config(format!(
                "unsupported config extension '{}' for {}",
                other,
                path.display()
            ))),
        }
    }

    /// Interval between polling rounds.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Retry policy for the build stability wait.
    pub fn stability_policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::fixed(self.poll_interval());
        match self.max_stability_sweeps {
            Some(sweeps) => policy.with_max_attempts(sweeps),
            None => policy,
        }
    }

    /// Retry policy for validation start/result waits.
    pub fn validation_policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::fixed(self.poll_interval());
        match self.validation_timeout_secs {
            Some(secs) => policy.with_deadline(Duration::from_secs(secs)),
            None => policy,
        }
    }

    /// The configured bypass label, ignoring blank values.
    pub fn effective_bypass_label(&self) -> Option<&str> {
        self.bypass_label
            .as_deref()
            .filter(|label| !label.trim().is_empty())
    }
}

impl Validate for GateConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.jenkins_host.trim().is_empty() {
            result.add_error("jenkins_host cannot be empty");
        }

        if self.jenkins_jobs.is_empty() {
            result.add_error("jenkins_jobs must list at least one job");
        }

        if self.jenkins_jobs.iter().any(|job| job.trim().is_empty()) {
            result.add_error("jenkins_jobs cannot contain empty names");
        }

        if self.poll_interval_secs == 0 {
            result.add_error("poll_interval_secs must be at least 1");
        } else if self.poll_interval_secs < 5 {
            result.add_warning("poll_interval_secs under 5 seconds may hammer the CI server");
        }

        if self.merge_actor.trim().is_empty() {
            result.add_error("merge_actor cannot be empty");
        }

        if self.repo.trim().is_empty() {
            result.add_warning("repo is empty - gh will fall back to the current directory");
        }

        if matches!(&self.bypass_label, Some(label) if label.trim().is_empty()) {
            result.add_warning("bypass_label is blank and will be ignored");
        }

        if self.max_stability_sweeps == Some(0) {
            result.add_error("max_stability_sweeps must be at least 1 when set");
        }

        result
    }
}
