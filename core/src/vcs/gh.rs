//! GitHub client built on the `gh` CLI.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::VcsClient;
use crate::candidate::Candidate;
use crate::error::{Error, Result};
use crate::retry::{elapsed_since, sleep_or_cancel, Clock, RetryPolicy};

/// One entry of a combined commit status.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommitStatus {
    /// Status context, e.g. `"Jenkins GCE e2e"`.
    pub context: String,
    /// One of `pending`, `success`, `failure`, `error`.
    pub state: String,
}

/// Combined status of a commit as returned by the GitHub API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CombinedStatus {
    /// Aggregate state across all contexts.
    pub state: String,
    /// Individual statuses.
    #[serde(default)]
    pub statuses: Vec<CommitStatus>,
}

/// Evaluates a combined status.
///
/// Returns `None` while any considered context is still pending (or none has
/// reported yet), otherwise whether the outcome is acceptable.
pub fn evaluate_statuses(
    combined: &CombinedStatus,
    exclude_contexts: &[String],
    require_success: bool,
) -> Option<bool> {
    let considered: Vec<&CommitStatus> = combined
        .statuses
        .iter()
        .filter(|status| !exclude_contexts.contains(&status.context))
        .collect();

    if considered.is_empty() || considered.iter().any(|s| s.state == "pending") {
        return None;
    }

    if require_success {
        Some(considered.iter().all(|s| s.state == "success"))
    } else {
        Some(
            !considered
                .iter()
                .any(|s| s.state == "failure" || s.state == "error"),
        )
    }
}

#[derive(Debug, Deserialize)]
struct PrLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PrView {
    number: u64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    labels: Vec<PrLabel>,
}

/// Parses `gh pr view --json number,title,labels` output.
fn parse_pr_view(body: &str) -> Result<Candidate> {
    let view: PrView = serde_json::from_str(body)
        .map_err(|e| Error::Vcs(format!("failed to parse gh pr view output: {}", e)))?;

    Ok(Candidate {
        number: view.number,
        title: view.title,
        labels: view.labels.into_iter().map(|label| label.name).collect(),
    })
}

/// Rewraps a plain `gh` failure as the operation-specific error built by
/// `wrap`. Cancellation and other kinds pass through.
fn rewrap_vcs(err: Error, wrap: impl FnOnce(String) -> Error) -> Error {
    match err {
        Error::Vcs(reason) => wrap(reason),
        other => other,
    }
}

/// [`VcsClient`] that shells out to `gh` for a single repository.
pub struct GhCliClient {
    /// Repository slug, `owner/name`.
    repo: String,
    /// Polling policy for validation waits.
    poll: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl GhCliClient {
    /// Creates a client for `repo` (`owner/name`).
    pub fn new(repo: impl Into<String>, poll: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            repo: repo.into(),
            poll,
            clock,
        }
    }

    /// Returns the repository slug.
    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// Runs `gh` with `args`, returning stdout. The child is killed if the
    /// token fires.
    async fn gh(&self, args: &[&str], cancel: &CancellationToken) -> Result<String> {
        let mut command = Command::new("gh");
        command.args(args).kill_on_drop(true);
        let output = command.output();

        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            output = output => output.map_err(|e| Error::Vcs(format!("failed to run gh: {}", e)))?,
        };

        if !output.status.success() {
            return Err(Error::Vcs(format!(
                "gh {} failed: {}",
                args.first().unwrap_or(&""),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Loads the number, title and labels of a PR.
    pub async fn fetch_candidate(
        &self,
        number: u64,
        cancel: &CancellationToken,
    ) -> Result<Candidate> {
        let number_arg = number.to_string();
        let args: [&str; 7] = [
            "pr",
            "view",
            &number_arg,
            "--repo",
            &self.repo,
            "--json",
            "number,title,labels",
        ];
        let body = self.gh(&args, cancel).await?;
        parse_pr_view(&body)
    }

    async fn combined_status(
        &self,
        number: u64,
        cancel: &CancellationToken,
    ) -> Result<CombinedStatus> {
        let pr_path = format!("repos/{}/pulls/{}", self.repo, number);
        let sha = self.gh(&["api", &pr_path, "--jq", ".head.sha"], cancel).await?;
        if sha.is_empty() {
            return Err(Error::Vcs(format!("PR {} has no head commit", number)));
        }

        let status_path = format!("repos/{}/commits/{}/status", self.repo, sha);
        let body = self.gh(&["api", &status_path], cancel).await?;
        serde_json::from_str(&body)
            .map_err(|e| Error::Vcs(format!("failed to parse status for PR {}: {}", number, e)))
    }

    /// Polls `probe` until it yields a value, honoring the retry policy.
    async fn poll_until<T, F, Fut>(
        &self,
        what: &str,
        cancel: &CancellationToken,
        mut probe: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<Option<T>>>,
    {
        let start = self.clock.now();
        let mut attempts = 0;

        loop {
            if let Some(value) = probe().await? {
                return Ok(value);
            }
            attempts += 1;

            if !self
                .poll
                .should_retry(attempts, elapsed_since(self.clock.as_ref(), start))
            {
                return Err(Error::Vcs(format!(
                    "gave up waiting for {} after {} polls",
                    what, attempts
                )));
            }

            tracing::debug!(what = %what, attempts, "still waiting");
            sleep_or_cancel(self.clock.as_ref(), self.poll.interval, cancel).await?;
        }
    }
}

#[async_trait]
impl VcsClient for GhCliClient {
    async fn write_comment(
        &self,
        number: u64,
        body: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let number_arg = number.to_string();
        self.gh(
            &["pr", "comment", &number_arg, "--repo", &self.repo, "--body", body],
            cancel,
        )
        .await
        .map_err(|e| rewrap_vcs(e, |reason| Error::Comment { number, reason }))?;

        tracing::info!(pr = number, "posted validation request");
        Ok(())
    }

    async fn wait_for_validation_start(
        &self,
        number: u64,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.poll_until("validation start", cancel, move || async move {
            let combined = self.combined_status(number, cancel).await?;
            Ok((combined.state == "pending").then_some(()))
        })
        .await
        .map_err(|e| rewrap_vcs(e, |reason| Error::ValidationStart { number, reason }))
    }

    async fn wait_for_validation_result(
        &self,
        number: u64,
        exclude_contexts: &[String],
        require_success: bool,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        self.poll_until("validation result", cancel, move || async move {
            let combined = self.combined_status(number, cancel).await?;
            Ok(evaluate_statuses(&combined, exclude_contexts, require_success))
        })
        .await
        .map_err(|e| rewrap_vcs(e, |reason| Error::ValidationResult { number, reason }))
    }

    async fn merge(&self, number: u64, actor: &str, cancel: &CancellationToken) -> Result<()> {
        let number_arg = number.to_string();
        let body = format!("Automatic merge from {}", actor);
        self.gh(
            &[
                "pr",
                "merge",
                &number_arg,
                "--repo",
                &self.repo,
                "--merge",
                "--body",
                &body,
            ],
            cancel,
        )
        .await
        .map_err(|e| rewrap_vcs(e, |reason| Error::Merge { number, reason }))?;

        tracing::info!(pr = number, actor = %actor, "merged PR");
        Ok(())
    }
}
