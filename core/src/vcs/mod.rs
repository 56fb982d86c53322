//! Version-control host operations used by the gate.

mod gh;

pub use gh::{evaluate_statuses, CombinedStatus, CommitStatus, GhCliClient};

use std::collections::BTreeSet;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Operations the gate needs from the version-control host.
///
/// Every blocking call takes a cancellation token and returns
/// [`crate::Error::Cancelled`] once it fires.
#[async_trait]
pub trait VcsClient: Send + Sync {
    /// Returns true if `labels` contains `name`.
    fn has_label(&self, labels: &BTreeSet<String>, name: &str) -> bool {
        labels.contains(name)
    }

    /// Posts a comment on the PR.
    async fn write_comment(&self, number: u64, body: &str, cancel: &CancellationToken)
        -> Result<()>;

    /// Blocks until a validation run is observed starting on the PR.
    async fn wait_for_validation_start(&self, number: u64, cancel: &CancellationToken)
        -> Result<()>;

    /// Blocks until the PR's validation reaches a terminal state.
    ///
    /// Statuses whose context is listed in `exclude_contexts` are ignored.
    /// Returns whether the outcome is acceptable: with `require_success`,
    /// every remaining status must be `success`.
    async fn wait_for_validation_result(
        &self,
        number: u64,
        exclude_contexts: &[String],
        require_success: bool,
        cancel: &CancellationToken,
    ) -> Result<bool>;

    /// Merges the PR on behalf of `actor`.
    async fn merge(&self, number: u64, actor: &str, cancel: &CancellationToken) -> Result<()>;
}
