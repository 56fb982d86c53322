//! Gate coordinator: decides whether a candidate is safe to merge.
//!
//! The coordinator waits for every configured build job to be stable, asks
//! CI for a fresh validation run on the candidate, waits for its result and
//! merges only on success. Its state lives in a [`SharedGateState`] that the
//! status endpoint reads concurrently.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::candidate::Candidate;
use crate::ci::BuildStabilityChecker;
use crate::config::GateConfig;
use crate::error::{Error, Result};
use crate::retry::{elapsed_since, sleep_or_cancel, Clock, RetryPolicy, SystemClock};
use crate::state::{BuildStatus, GatePhase, GateState, SharedGateState};
use crate::vcs::VcsClient;

/// Terminal outcome of a successful evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationOutcome {
    /// The candidate was merged.
    Merged {
        /// Whether the validation run was skipped via the bypass label.
        bypassed: bool,
    },
    /// Validation finished without success; the candidate was not merged.
    Rejected,
}

/// Clears the current candidate when an evaluation ends, however it ends.
struct CandidateGuard {
    state: SharedGateState,
}

impl Drop for CandidateGuard {
    fn drop(&mut self) {
        self.state.with(|state| {
            state.current_candidate = None;
            state.phase = GatePhase::Idle;
        });
    }
}

/// Coordinates the stability wait, validation round-trip and merge for one
/// candidate at a time.
pub struct GateCoordinator<C: BuildStabilityChecker, V: VcsClient> {
    checker: Arc<C>,
    vcs: Arc<V>,
    clock: Arc<dyn Clock>,
    state: SharedGateState,
    jobs: Vec<String>,
    bypass_label: Option<String>,
    merge_actor: String,
    validation_comment: String,
    stability_policy: RetryPolicy,
}

impl<C: BuildStabilityChecker, V: VcsClient> GateCoordinator<C, V> {
    /// Creates a coordinator from configuration and its collaborators.
    pub fn new(config: &GateConfig, checker: C, vcs: V) -> Self {
        let mut initial = GateState::with_jobs(config.jenkins_jobs.iter().cloned());
        initial.whitelist = config.whitelist.iter().cloned().collect();

        Self {
            checker: Arc::new(checker),
            vcs: Arc::new(vcs),
            clock: Arc::new(SystemClock),
            state: SharedGateState::new(initial),
            jobs: config.jenkins_jobs.clone(),
            bypass_label: config.effective_bypass_label().map(str::to_string),
            merge_actor: config.merge_actor.clone(),
            validation_comment: config.validation_comment.clone(),
            stability_policy: config.stability_policy(),
        }
    }

    /// Replaces the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the retry policy of the stability wait.
    pub fn with_stability_policy(mut self, policy: RetryPolicy) -> Self {
        self.stability_policy = policy;
        self
    }

    /// Returns a handle to the shared state.
    pub fn state(&self) -> SharedGateState {
        self.state.clone()
    }

    /// Returns the VCS client the gate drives.
    pub fn vcs(&self) -> &V {
        &self.vcs
    }

    /// Returns the configured build jobs, in check order.
    pub fn jobs(&self) -> &[String] {
        &self.jobs
    }

    /// Appends a timestamped message to the state log.
    pub fn record_message(&self, text: &str) {
        self.state.push_message(self.clock.now(), text);
        tracing::debug!(message = %text, "gate message");
    }

    /// Stores `err` as the last error.
    pub fn record_error(&self, err: &Error) {
        self.state.set_error(err.record());
    }

    /// Overwrites the status of one build job.
    pub fn set_build_status(&self, job: &str, status: BuildStatus) {
        self.state.set_build_status(job, status);
    }

    /// Runs one sweep over every configured job.
    ///
    /// A failed check marks the sweep unstable but never stops it; every job
    /// is checked on every sweep. Returns true only if all jobs are stable.
    pub async fn check_builds(&self) -> bool {
        let mut all_stable = true;

        for job in &self.jobs {
            self.record_message(&format!("Checking build stability for {}", job));

            match self.checker.is_build_stable(job).await {
                Ok(true) => self.set_build_status(job, BuildStatus::Stable),
                Ok(false) => {
                    self.set_build_status(job, BuildStatus::NotStable);
                    all_stable = false;
                }
                Err(err) => {
                    tracing::warn!(job = %job, error = %err, "build stability check failed");
                    self.record_message(&format!("Error checking build {}: {}", job, err));
                    self.set_build_status(job, BuildStatus::Error(err.to_string()));
                    all_stable = false;
                }
            }
        }

        all_stable
    }

    /// Sweeps until every job is stable within a single sweep.
    ///
    /// With the default policy this retries forever; an unstable fleet needs
    /// an operator, not a failed evaluation.
    pub async fn wait_for_stable_builds(&self, cancel: &CancellationToken) -> Result<()> {
        let start = self.clock.now();
        let mut sweeps = 0;

        loop {
            let stable = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                stable = self.check_builds() => stable,
            };
            sweeps += 1;

            if stable {
                tracing::info!(sweeps, "all builds stable");
                return Ok(());
            }

            let interval = self.stability_policy.interval;
            if !self
                .stability_policy
                .should_retry(sweeps, elapsed_since(self.clock.as_ref(), start))
            {
                self.record_message(&format!(
                    "Builds still not stable after {} sweeps, giving up",
                    sweeps
                ));
                return Err(Error::StabilityTimeout { attempts: sweeps });
            }

            self.record_message(&format!(
                "Not all builds stable. Checking again in {}s",
                interval.as_secs()
            ));
            sleep_or_cancel(self.clock.as_ref(), interval, cancel).await?;
        }
    }

    /// Decides whether `candidate` merges.
    ///
    /// A rejected candidate is `Ok(EvaluationOutcome::Rejected)`. Comment,
    /// validation and merge failures are recorded and returned. The current
    /// candidate is cleared on every exit path.
    pub async fn evaluate(
        &self,
        candidate: Candidate,
        cancel: &CancellationToken,
    ) -> Result<EvaluationOutcome> {
        let span = tracing::info_span!(
            "evaluate",
            pr = candidate.number,
            evaluation_id = %uuid::Uuid::new_v4()
        );
        self.run_evaluation(candidate, cancel).instrument(span).await
    }

    async fn run_evaluation(
        &self,
        candidate: Candidate,
        cancel: &CancellationToken,
    ) -> Result<EvaluationOutcome> {
        let number = candidate.number;
        let labels = candidate.labels.clone();

        self.state.with(|state| {
            state.current_candidate = Some(candidate);
            state.phase = GatePhase::WaitingStable;
        });
        let _guard = CandidateGuard {
            state: self.state.clone(),
        };
        self.record_message(&format!("Considering PR {}", number));

        if let Err(err) = self.wait_for_stable_builds(cancel).await {
            self.record_error(&err);
            return Err(err);
        }

        if let Some(label) = self.bypass_label.as_deref() {
            if self.vcs.has_label(&labels, label) {
                self.record_message(&format!("Merging {} since {} is set", number, label));
                self.merge(number, cancel).await?;
                return Ok(EvaluationOutcome::Merged { bypassed: true });
            }
        }

        if let Err(err) = self
            .vcs
            .write_comment(number, &self.validation_comment, cancel)
            .await
        {
            self.record_error(&err);
            return Err(err);
        }

        self.state.set_phase(GatePhase::WaitingValidationStart);
        if let Err(err) = self.vcs.wait_for_validation_start(number, cancel).await {
            self.record_error(&err);
            return Err(err);
        }

        self.state.set_phase(GatePhase::WaitingValidationResult);
        // No contexts are excluded here; the parameter stays for callers
        // of the client that need it.
        match self
            .vcs
            .wait_for_validation_result(number, &[], true, cancel)
            .await
        {
            Err(err) => {
                self.record_error(&err);
                Err(err)
            }
            Ok(false) => {
                tracing::warn!(pr = number, "validation did not succeed, skipping");
                self.record_message(&format!(
                    "Status after build is not 'success', skipping PR {}",
                    number
                ));
                Ok(EvaluationOutcome::Rejected)
            }
            Ok(true) => {
                self.merge(number, cancel).await?;
                Ok(EvaluationOutcome::Merged { bypassed: false })
            }
        }
    }

    async fn merge(&self, number: u64, cancel: &CancellationToken) -> Result<()> {
        self.state.set_phase(GatePhase::Merging);
        match self.vcs.merge(number, &self.merge_actor, cancel).await {
            Ok(()) => {
                tracing::info!(pr = number, "candidate merged");
                self.record_message(&format!("Merged PR {}", number));
                Ok(())
            }
            Err(err) => {
                self.record_error(&err);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::retry::ManualClock;

    /// Checker that replays scripted answers per job; stable once exhausted.
    #[derive(Default)]
    struct ScriptedChecker {
        answers: Mutex<Vec<(String, VecDeque<Result<bool>>)>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedChecker {
        fn script(self, job: &str, answers: Vec<Result<bool>>) -> Self {
            self.answers
                .lock()
                .unwrap()
                .push((job.to_string(), answers.into()));
            self
        }
    }

    #[async_trait]
    impl BuildStabilityChecker for ScriptedChecker {
        async fn is_build_stable(&self, job: &str) -> Result<bool> {
            self.calls.lock().unwrap().push(job.to_string());
            let mut answers = self.answers.lock().unwrap();
            answers
                .iter_mut()
                .find(|(name, _)| name == job)
                .and_then(|(_, queue)| queue.pop_front())
                .unwrap_or(Ok(true))
        }
    }

    /// VCS client that always succeeds.
    struct NoopVcs;

    #[async_trait]
    impl VcsClient for NoopVcs {
        async fn write_comment(&self, _: u64, _: &str, _: &CancellationToken) -> Result<()> {
            Ok(())
        }

        async fn wait_for_validation_start(&self, _: u64, _: &CancellationToken) -> Result<()> {
            Ok(())
        }

        async fn wait_for_validation_result(
            &self,
            _: u64,
            _: &[String],
            _: bool,
            _: &CancellationToken,
        ) -> Result<bool> {
            Ok(true)
        }

        async fn merge(&self, _: u64, _: &str, _: &CancellationToken) -> Result<()> {
            Ok(())
        }
    }

    fn coordinator(
        checker: ScriptedChecker,
    ) -> (GateCoordinator<ScriptedChecker, NoopVcs>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let config = GateConfig::new("http://jenkins", ["unit", "e2e"]);
        let gate = GateCoordinator::new(&config, checker, NoopVcs).with_clock(clock.clone());
        (gate, clock)
    }

    #[tokio::test]
    async fn check_builds_reports_all_stable() {
        let (gate, _) = coordinator(ScriptedChecker::default());

        assert!(gate.check_builds().await);

        let state = gate.state().snapshot();
        assert_eq!(state.build_status["unit"], BuildStatus::Stable);
        assert_eq!(state.build_status["e2e"], BuildStatus::Stable);
    }

    #[tokio::test]
    async fn check_builds_does_not_short_circuit_on_error() {
        let checker = ScriptedChecker::default()
            .script("unit", vec![Err(Error::Ci("connection refused".to_string()))]);
        let (gate, _) = coordinator(checker);

        assert!(!gate.check_builds().await);

        assert_eq!(
            *gate.checker.calls.lock().unwrap(),
            vec!["unit".to_string(), "e2e".to_string()]
        );
        let state = gate.state().snapshot();
        assert_eq!(
            state.build_status["unit"].to_string(),
            "Error checking: CI query failed: connection refused"
        );
        assert_eq!(state.build_status["e2e"], BuildStatus::Stable);
        assert!(state
            .messages
            .iter()
            .any(|m| m.ends_with("Error checking build unit: CI query failed: connection refused")));
    }

    #[tokio::test]
    async fn check_builds_marks_not_stable() {
        let checker = ScriptedChecker::default().script("e2e", vec![Ok(false)]);
        let (gate, _) = coordinator(checker);

        assert!(!gate.check_builds().await);
        assert_eq!(
            gate.state().snapshot().build_status["e2e"],
            BuildStatus::NotStable
        );
    }

    #[tokio::test]
    async fn wait_for_stable_builds_retries_at_interval() {
        let checker = ScriptedChecker::default()
            .script("unit", vec![Ok(false), Ok(true), Ok(true)])
            .script("e2e", vec![Ok(true), Ok(false), Ok(true)]);
        let (gate, clock) = coordinator(checker);

        gate.wait_for_stable_builds(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(clock.sleeps(), vec![Duration::from_secs(30); 2]);
        assert_eq!(gate.checker.calls.lock().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn wait_for_stable_builds_honors_max_attempts() {
        let checker = ScriptedChecker::default().script("unit", (0..10).map(|_| Ok(false)).collect());
        let (gate, _) = coordinator(checker);
        let gate = gate.with_stability_policy(RetryPolicy::default().with_max_attempts(3));

        let err = gate
            .wait_for_stable_builds(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StabilityTimeout { attempts: 3 }));
    }

    #[tokio::test]
    async fn wait_for_stable_builds_stops_on_cancel() {
        let checker = ScriptedChecker::default().script("unit", (0..10).map(|_| Ok(false)).collect());
        let (gate, _) = coordinator(checker);
        let token = CancellationToken::new();
        token.cancel();

        let err = gate.wait_for_stable_builds(&token).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn messages_carry_clock_timestamp() {
        let (gate, _) = coordinator(ScriptedChecker::default());
        gate.record_message("hello");

        let state = gate.state().snapshot();
        assert_eq!(
            state.messages.iter().last(),
            Some("1970-01-01T00:00:00.000Z: hello")
        );
    }
}
