//! Build stability checks against a CI system.

mod jenkins;

pub use jenkins::JenkinsClient;

use async_trait::async_trait;

use crate::error::Result;

/// Reports whether a named build job is currently stable.
#[async_trait]
pub trait BuildStabilityChecker: Send + Sync {
    /// Performs one round-trip to the build-status source for `job`.
    ///
    /// Transport and parse failures are returned as errors, never folded
    /// into a stable or unstable answer.
    async fn is_build_stable(&self, job: &str) -> Result<bool>;
}
