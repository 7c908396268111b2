//! Health check endpoints for load balancer probes and monitoring.

use std::time::Instant;

use axum::{Json, extract::State, response::IntoResponse};
use http::StatusCode;
use serde::Serialize;
use uuid::Uuid;

use crate::AppState;

/// Detailed health status response.
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    /// Overall status: "healthy" or "unhealthy"
    pub status: String,
    /// Service version
    pub version: String,
    /// "shibboleth" when reading SP headers, "emulated" for the dev IdP
    pub identity_source: String,
    /// Whether a bearer token is appended to post-login redirects
    pub token_handoff: bool,
    /// Individual subsystem statuses
    pub subsystems: SubsystemStatus,
}

/// Status of individual subsystems.
#[derive(Debug, Serialize)]
pub struct SubsystemStatus {
    pub sessions: ComponentStatus,
    pub users: ComponentStatus,
}

/// Status of a single component.
#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub latency_ms: u64,
}

impl ComponentStatus {
    fn from_probe<E: std::fmt::Display>(result: Result<(), E>, started: Instant) -> Self {
        let latency_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(()) => Self {
                healthy: true,
                message: None,
                latency_ms,
            },
            Err(e) => Self {
                healthy: false,
                message: Some(e.to_string()),
                latency_ms,
            },
        }
    }
}

/// Full health check.
///
/// Probes both stores with a lookup of the nil id. A store that answers
/// (with nothing) is healthy; an error marks the service unhealthy.
#[tracing::instrument(name = "health.check", skip(state))]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let started = Instant::now();
    let sessions = ComponentStatus::from_probe(
        state.sessions.get_session(Uuid::nil()).await.map(|_| ()),
        started,
    );

    let started = Instant::now();
    let users = ComponentStatus::from_probe(
        state.users.get(Uuid::nil()).await.map(|_| ()),
        started,
    );

    let healthy = sessions.healthy && users.healthy;
    if !healthy {
        tracing::warn!(
            sessions = sessions.healthy,
            users = users.healthy,
            "Health check failed"
        );
    }

    let identity_source = if state.identity_source.is_emulated() {
        "emulated"
    } else {
        "shibboleth"
    };

    #[cfg(feature = "jwt")]
    let token_handoff = state.tokens.is_some();
    #[cfg(not(feature = "jwt"))]
    let token_handoff = false;

    let status = HealthStatus {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        identity_source: identity_source.to_string(),
        token_handoff,
        subsystems: SubsystemStatus { sessions, users },
    };

    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (code, Json(status))
}

/// Liveness probe. Always 200 while the process is serving.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}
