//! Shared decision state of the gate.
//!
//! All fields live in one [`GateState`] behind a single mutex owned by
//! [`SharedGateState`]. Every accessor holds the lock only for its own
//! critical section.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};

use crate::candidate::Candidate;
use crate::error::ErrorRecord;

/// Maximum number of messages retained in the log.
pub const MAX_MESSAGES: usize = 50;

/// Result of the last stability check for one build job.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BuildStatus {
    /// Not yet checked.
    #[default]
    Unknown,
    /// Last completed build succeeded.
    Stable,
    /// Last completed build did not succeed.
    NotStable,
    /// The check itself failed.
    Error(String),
}

impl BuildStatus {
    /// Returns true for [`BuildStatus::Stable`].
    pub fn is_stable(&self) -> bool {
        matches!(self, BuildStatus::Stable)
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildStatus::Unknown => f.write_str("Unknown"),
            BuildStatus::Stable => f.write_str("Stable"),
            BuildStatus::NotStable => f.write_str("Not Stable"),
            BuildStatus::Error(detail) => write!(f, "Error checking: {}", detail),
        }
    }
}

impl Serialize for BuildStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Where the gate is in its per-candidate state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GatePhase {
    /// No candidate under evaluation.
    #[default]
    Idle,
    /// Sweeping build jobs until all are stable.
    WaitingStable,
    /// Validation requested, waiting for the run to begin.
    WaitingValidationStart,
    /// Validation running, waiting for its outcome.
    WaitingValidationResult,
    /// Merge in progress.
    Merging,
}

/// Bounded, oldest-first log of timestamped messages.
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    entries: VecDeque<String>,
}

impl MessageLog {
    /// Appends a message stamped with `at`, evicting the oldest past the cap.
    pub fn push(&mut self, at: DateTime<Utc>, text: &str) {
        if self.entries.len() >= MAX_MESSAGES {
            self.entries.pop_front();
        }
        self.entries.push_back(format!(
            "{}: {}",
            at.to_rfc3339_opts(SecondsFormat::Millis, true),
            text
        ));
    }

    /// Number of retained messages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no messages are retained.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates oldest-first.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }
}

/// Decision state of the gate.
#[derive(Debug, Clone, Default)]
pub struct GateState {
    /// Candidate under evaluation, if any.
    pub current_candidate: Option<Candidate>,
    /// Current state-machine phase.
    pub phase: GatePhase,
    /// Recent activity.
    pub messages: MessageLog,
    /// Most recent surfaced error.
    pub last_error: Option<ErrorRecord>,
    /// Per-job stability, keyed by configured job name.
    pub build_status: BTreeMap<String, BuildStatus>,
    /// Externally maintained whitelist.
    pub whitelist: BTreeSet<String>,
}

impl GateState {
    /// Creates state with every configured job present as `Unknown`.
    pub fn with_jobs<I, S>(jobs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            build_status: jobs
                .into_iter()
                .map(|job| (job.into(), BuildStatus::Unknown))
                .collect(),
            ..Default::default()
        }
    }
}

/// Cloneable handle to the lock-guarded gate state.
#[derive(Debug, Clone, Default)]
pub struct SharedGateState {
    inner: Arc<Mutex<GateState>>,
}

impl SharedGateState {
    /// Wraps an initial state.
    pub fn new(state: GateState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    // A panic while holding the lock cannot leave GateState structurally
    // invalid, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Runs `f` with exclusive access to the state.
    pub fn with<R>(&self, f: impl FnOnce(&mut GateState) -> R) -> R {
        f(&mut self.lock())
    }

    /// Appends a timestamped message.
    pub fn push_message(&self, at: DateTime<Utc>, text: &str) {
        self.lock().messages.push(at, text);
    }

    /// Overwrites the last error.
    pub fn set_error(&self, record: ErrorRecord) {
        self.lock().last_error = Some(record);
    }

    /// Overwrites one build status entry.
    pub fn set_build_status(&self, job: &str, status: BuildStatus) {
        self.lock().build_status.insert(job.to_string(), status);
    }

    /// Sets the current candidate.
    pub fn set_candidate(&self, candidate: Option<Candidate>) {
        self.lock().current_candidate = candidate;
    }

    /// Sets the state-machine phase.
    pub fn set_phase(&self, phase: GatePhase) {
        self.lock().phase = phase;
    }

    /// Replaces the whitelist.
    pub fn set_whitelist<I, S>(&self, entries: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock().whitelist = entries.into_iter().map(Into::into).collect();
    }

    /// Returns a copy of the current state.
    pub fn snapshot(&self) -> GateState {
        self.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn epoch() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH
    }

    #[test]
    fn build_status_renders_display_strings() {
        assert_eq!(BuildStatus::Stable.to_string(), "Stable");
        assert_eq!(BuildStatus::NotStable.to_string(), "Not Stable");
        assert_eq!(
            BuildStatus::Error("timeout".to_string()).to_string(),
            "Error checking: timeout"
        );
        assert_eq!(
            serde_json::to_string(&BuildStatus::NotStable).unwrap(),
            "\"Not Stable\""
        );
    }

    #[test]
    fn message_log_is_bounded_and_oldest_first() {
        let mut log = MessageLog::default();
        for i in 0..120 {
            log.push(epoch(), &format!("msg {}", i));
            assert!(log.len() <= MAX_MESSAGES);
        }

        let entries: Vec<&str> = log.iter().collect();
        assert_eq!(entries.len(), MAX_MESSAGES);
        assert!(entries[0].ends_with("msg 70"));
        assert!(entries[MAX_MESSAGES - 1].ends_with("msg 119"));
    }

    #[test]
    fn message_log_prefixes_timestamp() {
        let mut log = MessageLog::default();
        log.push(epoch(), "hello");
        assert_eq!(
            log.iter().next(),
            Some("1970-01-01T00:00:00.000Z: hello")
        );
    }

    #[test]
    fn state_with_jobs_starts_unknown() {
        let state = GateState::with_jobs(["unit", "e2e"]);
        assert_eq!(state.build_status.len(), 2);
        assert!(state
            .build_status
            .values()
            .all(|status| *status == BuildStatus::Unknown));
        assert!(state.current_candidate.is_none());
        assert_eq!(state.phase, GatePhase::Idle);
    }

    #[test]
    fn shared_state_handles_see_same_data() {
        let shared = SharedGateState::new(GateState::with_jobs(["unit"]));
        let other = shared.clone();

        other.set_build_status("unit", BuildStatus::Stable);
        other.set_whitelist(["alice", "bob"]);

        let snapshot = shared.snapshot();
        assert_eq!(snapshot.build_status["unit"], BuildStatus::Stable);
        assert_eq!(snapshot.whitelist.len(), 2);
    }
}
