//! Agent HTTP API.
//!
//! Peer agents forward schedule requests here; the body of an error response
//! carries the failure class so the caller can rebuild the error.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use lhorc_types::{HostInfo, InstanceInfo, ScheduleRequest};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::error::{ErrorKind, OrcError};
use crate::scheduler::ScheduleHandler;

/// Shared state of the API handlers.
#[derive(Clone)]
pub struct AppState {
    pub host: Arc<HostInfo>,
    pub handler: Arc<dyn ScheduleHandler>,
}

/// Error response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorKind,
    pub message: String,
}

/// An engine error rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub OrcError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::AlreadyExists => StatusCode::CONFLICT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::InvalidArgument | ErrorKind::UnknownAction => StatusCode::BAD_REQUEST,
            ErrorKind::ReadinessTimeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::RuntimeFailure
            | ErrorKind::StoreFailure
            | ErrorKind::ConnectivityFailure => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<OrcError> for ApiError {
    fn from(err: OrcError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            code: self.0.kind(),
            message: self.0.to_string(),
        };
        warn!(status = %status, code = %body.code, message = %body.message, "Request failed");
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct HealthResponse {
    pub status: String,
    pub host_id: String,
    pub version: String,
    pub timestamp: String,
}

/// Create the agent router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/schedule", post(process_schedule))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        host_id: state.host.uuid.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

async fn process_schedule(
    State(state): State<AppState>,
    Json(request): Json<ScheduleRequest>,
) -> Result<Json<InstanceInfo>, ApiError> {
    let instance = state.handler.process_schedule(request).await?;
    Ok(Json(instance))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use lhorc_types::{InstanceType, ScheduleAction, ScheduleData, ScheduleInstance};
    use rstest::rstest;
    use tower::ServiceExt;

    use super::*;
    use crate::config::ExecutorConfig;
    use crate::executor::{LocalExecutor, ORCHESTRATOR_KIND};
    use crate::probe::{PollingProbe, ProbeError};
    use crate::runtime::{ContainerRuntime, ContainerSpec, MockRuntime};

    fn host() -> Arc<HostInfo> {
        Arc::new(HostInfo {
            uuid: "h1".to_string(),
            name: "node-1".to_string(),
            address: "10.0.0.1:9500".to_string(),
        })
    }

    fn router(runtime: Arc<MockRuntime>) -> Router {
        let probe = Arc::new(PollingProbe::new(Duration::from_millis(10)).unwrap());
        let executor = LocalExecutor::new(host(), runtime, probe, ExecutorConfig::default());
        create_router(AppState {
            host: host(),
            handler: Arc::new(executor),
        })
    }

    fn schedule(request: &ScheduleRequest) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/v1/schedule")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(request).unwrap()))
            .unwrap()
    }

    fn start_request(id: &str, orchestrator: &str) -> ScheduleRequest {
        ScheduleRequest {
            action: ScheduleAction::StartInstance,
            instance: ScheduleInstance {
                id: id.to_string(),
                instance_type: InstanceType::Replica,
                host_id: "h1".to_string(),
            },
            data: ScheduleData::empty(orchestrator),
        }
    }

    #[tokio::test]
    async fn test_healthz() {
        let response = router(Arc::new(MockRuntime::new()))
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let health: HealthResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(health.status, "ok");
        assert_eq!(health.host_id, "h1");
    }

    #[tokio::test]
    async fn test_schedule_start_instance() {
        let runtime = Arc::new(MockRuntime::with_address("10.0.0.5"));
        let spec = ContainerSpec {
            name: "r1".to_string(),
            image: "img".to_string(),
            ..Default::default()
        };
        let id = runtime.create(&spec).await.unwrap();

        let response = router(runtime)
            .oneshot(schedule(&start_request(&id, ORCHESTRATOR_KIND)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let instance: InstanceInfo = serde_json::from_slice(&body).unwrap();
        assert_eq!(instance.id, id);
        assert_eq!(instance.name, "r1");
        assert_eq!(instance.address, "10.0.0.5");
        assert!(instance.running);
    }

    #[tokio::test]
    async fn test_schedule_error_body() {
        let response = router(Arc::new(MockRuntime::new()))
            .oneshot(schedule(&start_request("c1", "kubernetes")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let error: ErrorBody = serde_json::from_slice(&body).unwrap();
        assert_eq!(error.code, ErrorKind::InvalidArgument);
        assert!(error.message.contains("kubernetes"));
    }

    #[rstest]
    #[case(OrcError::already_exists("volume", "vol1"), StatusCode::CONFLICT)]
    #[case(OrcError::not_found("volume", "vol1"), StatusCode::NOT_FOUND)]
    #[case(OrcError::UnknownAction("snapshot".into()), StatusCode::BAD_REQUEST)]
    #[case(OrcError::Connectivity("down".into()), StatusCode::BAD_GATEWAY)]
    #[case(
        OrcError::Readiness(ProbeError::Timeout {
            target: "/dev/longhorn/vol1".into(),
            timeout: Duration::from_secs(30),
        }),
        StatusCode::GATEWAY_TIMEOUT
    )]
    fn test_status_per_kind(#[case] err: OrcError, #[case] status: StatusCode) {
        assert_eq!(ApiError(err.context("fail to schedule")).status(), status);
    }
}
