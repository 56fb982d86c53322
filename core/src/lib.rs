//! Merge Gate - decides when a candidate change is safe to merge
//!
//! This library waits for a fleet of CI build jobs to be stable, requests a
//! fresh validation run for one candidate at a time, and merges it only when
//! that run succeeds. A read-only snapshot of the gate's state is published
//! over HTTP for operators.

pub mod candidate;
pub mod ci;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod retry;
pub mod state;
pub mod status;
pub mod vcs;

pub use candidate::Candidate;
pub use ci::{BuildStabilityChecker, JenkinsClient};
pub use config::{GateConfig, Validate, ValidationResult};
pub use coordinator::{EvaluationOutcome, GateCoordinator};
pub use error::{Error, ErrorKind, ErrorRecord, Result};
pub use retry::{Clock, ManualClock, RetryPolicy, SystemClock};
pub use state::{BuildStatus, GatePhase, GateState, MessageLog, SharedGateState, MAX_MESSAGES};
pub use status::{GateSnapshot, StatusPublisher, StatusResponse};
pub use vcs::{GhCliClient, VcsClient};
