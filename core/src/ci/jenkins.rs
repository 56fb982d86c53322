//! Jenkins JSON API client.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::BuildStabilityChecker;
use crate::error::{Error, Result};

/// Subset of the Jenkins build JSON we care about.
#[derive(Debug, Deserialize)]
struct BuildInfo {
    #[serde(default)]
    result: Option<String>,
}

/// Checks job stability by reading the last completed build from Jenkins.
#[derive(Debug, Clone)]
pub struct JenkinsClient {
    host: String,
    http: reqwest::Client,
}

impl JenkinsClient {
    /// Creates a client for the Jenkins instance at `host`.
    pub fn new(host: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::Ci(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            host: host.into(),
            http,
        })
    }

    /// Returns the Jenkins host this client talks to.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// URL of the job's last completed build. The job name is encoded as a
    /// single path segment.
    fn last_completed_build_url(&self, job: &str) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.host)
            .map_err(|e| Error::Ci(format!("invalid Jenkins host {}: {}", self.host, e)))?;
        url.path_segments_mut()
            .map_err(|_| Error::Ci(format!("Jenkins host {} is not a base URL", self.host)))?
            .pop_if_empty()
            .extend(["job", job, "lastCompletedBuild", "api", "json"]);
        Ok(url)
    }
}

/// Decides stability from a Jenkins build JSON document.
fn parse_build_result(job: &str, body: &str) -> Result<bool> {
    let info: BuildInfo = serde_json::from_str(body)
        .map_err(|e| Error::Ci(format!("invalid build JSON for {}: {}", job, e)))?;

    match info.result.as_deref() {
        Some(result) => Ok(result == "SUCCESS"),
        None => Err(Error::Ci(format!("build for {} has no result", job))),
    }
}

#[async_trait]
impl BuildStabilityChecker for JenkinsClient {
    async fn is_build_stable(&self, job: &str) -> Result<bool> {
        let url = self.last_completed_build_url(job)?;
        tracing::debug!(url = %url, "querying Jenkins");

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Ci(format!("request for {} failed: {}", job, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Ci(format!("Jenkins returned {} for {}", status, job)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::Ci(format!("failed to read response for {}: {}", job, e)))?;

        parse_build_result(job, &body)
    }
}
