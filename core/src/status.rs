//! Read-only status endpoint.
//!
//! Renders the gate state as an indented JSON document. Document keys are
//! mapped explicitly and do not follow internal field names.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::candidate::Candidate;
use crate::error::{ErrorRecord, Result};
use crate::state::{BuildStatus, GatePhase, GateState, SharedGateState};

/// Point-in-time view of the gate state as published.
#[derive(Debug, Clone, Serialize)]
pub struct GateSnapshot {
    /// Candidate under evaluation, if any.
    #[serde(rename = "CurrentPR")]
    pub current_candidate: Option<Candidate>,
    /// Timestamped messages, oldest first.
    #[serde(rename = "Message")]
    pub messages: Vec<String>,
    /// Most recent recorded error.
    #[serde(rename = "Err")]
    pub last_error: Option<ErrorRecord>,
    /// Last known status per configured job.
    #[serde(rename = "BuildStatus")]
    pub build_status: BTreeMap<String, BuildStatus>,
    /// Allowed users.
    #[serde(rename = "Whitelist")]
    pub whitelist: Vec<String>,
    /// Current state-machine phase.
    #[serde(rename = "Phase")]
    pub phase: GatePhase,
}

impl From<GateState> for GateSnapshot {
    fn from(state: GateState) -> Self {
        Self {
            messages: state.messages.iter().map(str::to_string).collect(),
            current_candidate: state.current_candidate,
            last_error: state.last_error,
            build_status: state.build_status,
            whitelist: state.whitelist.into_iter().collect(),
            phase: state.phase,
        }
    }
}

/// Rendered response of a status query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusResponse {
    /// HTTP status of the response.
    pub status: StatusCode,
    /// JSON document, or the serialization error text on failure.
    pub body: String,
}

impl IntoResponse for StatusResponse {
    fn into_response(self) -> Response {
        (
            self.status,
            [(header::CONTENT_TYPE, "application/json")],
            self.body,
        )
            .into_response()
    }
}

/// Serializes `value` as indented JSON; `None` renders as `{}`.
pub fn render<T: Serialize>(value: Option<&T>) -> StatusResponse {
    let Some(value) = value else {
        return StatusResponse {
            status: StatusCode::OK,
            body: "{}".to_string(),
        };
    };

    match serde_json::to_string_pretty(value) {
        Ok(body) => StatusResponse {
            status: StatusCode::OK,
            body,
        },
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize gate snapshot");
            StatusResponse {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: e.to_string(),
            }
        }
    }
}

/// Publishes snapshots of the gate state.
#[derive(Debug, Clone, Default)]
pub struct StatusPublisher {
    state: Option<SharedGateState>,
}

impl StatusPublisher {
    /// Creates a publisher reading `state`.
    pub fn new(state: SharedGateState) -> Self {
        Self { state: Some(state) }
    }

    /// Creates a publisher with no state attached; it serves `{}`.
    pub fn uninitialized() -> Self {
        Self::default()
    }

    /// Renders the current state. Every call reflects the state at that
    /// moment; the lock is held only while copying.
    pub fn snapshot(&self) -> StatusResponse {
        let snapshot = self
            .state
            .as_ref()
            .map(|state| GateSnapshot::from(state.snapshot()));
        render(snapshot.as_ref())
    }

    /// Builds the HTTP router serving the snapshot.
    pub fn router(self) -> Router {
        Router::new()
            .route("/", get(status_handler))
            .route("/status", get(status_handler))
            .with_state(Arc::new(self))
    }

    /// Serves the router on `listener` until `cancel` fires.
    pub async fn serve_on(self, listener: TcpListener, cancel: CancellationToken) -> Result<()> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(addr = %addr, "status server listening");
        }

        axum::serve(listener, self.router())
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await?;

        Ok(())
    }

    /// Binds `addr` and serves until `cancel` fires.
    pub async fn serve(self, addr: SocketAddr, cancel: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve_on(listener, cancel).await
    }
}

async fn status_handler(State(publisher): State<Arc<StatusPublisher>>) -> StatusResponse {
    publisher.snapshot()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use chrono::{DateTime, Utc};
    use serde::Serializer;

    fn populated_state() -> SharedGateState {
        let shared = SharedGateState::new(GateState::with_jobs(["unit", "e2e"]));
        shared.set_candidate(Some(Candidate::new(99).with_label("lgtm")));
        shared.set_build_status("unit", BuildStatus::Stable);
        shared.set_build_status("e2e", BuildStatus::Error("timeout".to_string()));
        shared.push_message(DateTime::<Utc>::UNIX_EPOCH, "Considering PR 99");
        shared.set_error(ErrorRecord {
            kind: ErrorKind::Comment,
            message: "boom".to_string(),
        });
        shared.set_whitelist(["alice"]);
        shared
    }

    #[test]
    fn uninitialized_publisher_serves_empty_document() {
        let response = StatusPublisher::uninitialized().snapshot();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, "{}");
    }

    #[test]
    fn snapshot_uses_explicit_keys() {
        let response = StatusPublisher::new(populated_state()).snapshot();
        assert_eq!(response.status, StatusCode::OK);

        let doc: serde_json::Value = serde_json::from_str(&response.body).unwrap();
        assert_eq!(doc["CurrentPR"]["number"], 99);
        assert_eq!(doc["Message"][0], "1970-01-01T00:00:00.000Z: Considering PR 99");
        assert_eq!(doc["Err"]["kind"], "comment");
        assert_eq!(doc["BuildStatus"]["unit"], "Stable");
        assert_eq!(doc["BuildStatus"]["e2e"], "Error checking: timeout");
        assert_eq!(doc["Whitelist"][0], "alice");
        assert_eq!(doc["Phase"], "idle");
    }

    #[test]
    fn snapshot_is_indented() {
        let response = StatusPublisher::new(populated_state()).snapshot();
        assert!(response.body.contains("\n  \"CurrentPR\""));
    }

    #[test]
    fn idle_state_has_null_candidate_and_error() {
        let shared = SharedGateState::new(GateState::with_jobs(["unit"]));
        let response = StatusPublisher::new(shared).snapshot();

        let doc: serde_json::Value = serde_json::from_str(&response.body).unwrap();
        assert!(doc["CurrentPR"].is_null());
        assert!(doc["Err"].is_null());
        assert_eq!(doc["BuildStatus"]["unit"], "Unknown");
    }

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: Serializer>(&self, _: S) -> std::result::Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("state is corrupt"))
        }
    }

    #[test]
    fn serialization_failure_is_server_error() {
        let response = render(Some(&Unserializable));
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.body, "state is corrupt");
    }

    #[tokio::test]
    async fn serves_snapshot_over_http() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();

        let server = tokio::spawn(
            StatusPublisher::new(populated_state()).serve_on(listener, cancel.clone()),
        );

        let response = reqwest::get(format!("http://{}/status", addr)).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"].to_str().unwrap(),
            "application/json"
        );
        let doc: serde_json::Value = response.json().await.unwrap();
        assert_eq!(doc["CurrentPR"]["number"], 99);

        cancel.cancel();
        tokio_test::assert_ok!(server.await.unwrap());
    }
}
