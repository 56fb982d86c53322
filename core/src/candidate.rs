//! Candidate changes awaiting a merge decision.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A pull request under consideration by the gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// PR number on the VCS host.
    pub number: u64,
    /// PR title, when known.
    #[serde(default)]
    pub title: Option<String>,
    /// Labels attached to the PR.
    #[serde(default)]
    pub labels: BTreeSet<String>,
}

impl Candidate {
    /// Creates a candidate with no title or labels.
    pub fn new(number: u64) -> Self {
        Self {
            number,
            title: None,
            labels: BTreeSet::new(),
        }
    }

    /// Sets the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Adds a label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.insert(label.into());
        self
    }
}
