//! HTTP surface: job submission, status, CSV export.

use std::sync::Arc;

use axum::async_trait;
use axum::extract::{FromRequest, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::harvest::pipeline::{JobOrchestrator, JobStatus, OrchestratorError};
use crate::model::SearchCriteria;
use crate::report::{ReportExporter, EXPORT_FILENAME};

/// State shared with every handler.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<JobOrchestrator>,
    pub exporter: Arc<ReportExporter>,
}

impl AppState {
    pub fn new(orchestrator: Arc<JobOrchestrator>) -> Self {
        let exporter = Arc::new(ReportExporter::new(orchestrator.store()));
        Self {
            orchestrator,
            exporter,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StartScrapeRequest {
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default, alias = "role")]
    pub role_filter: Option<String>,
}

impl StartScrapeRequest {
    fn into_criteria(self) -> SearchCriteria {
        let criteria = SearchCriteria::new(self.location.unwrap_or_default());
        match self.role_filter {
            Some(role) => criteria.with_role_filter(role),
            None => criteria,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum StartScrapeResponse {
    Started { job_id: u64, location: String },
    Rejected { error: String },
}

/// `POST /start_scrape` body, accepted as `application/json` or
/// `application/x-www-form-urlencoded`.
pub struct StartScrapeBody(pub StartScrapeRequest);

#[async_trait]
impl<S> FromRequest<S> for StartScrapeBody
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<StartScrapeResponse>);

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/json"));

        let parsed = if is_json {
            Json::<StartScrapeRequest>::from_request(req, state)
                .await
                .map(|Json(request)| request)
                .map_err(|e| (e.status(), e.body_text()))
        } else {
            Form::<StartScrapeRequest>::from_request(req, state)
                .await
                .map(|Form(request)| request)
                .map_err(|e| (e.status(), e.body_text()))
        };

        parsed.map(StartScrapeBody).map_err(|(status, error)| {
            (status, Json(StartScrapeResponse::Rejected { error }))
        })
    }
}

/// Build the axum router for the harvester endpoints.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/start_scrape", post(start_scrape))
        .route("/status", get(status))
        .route("/export", get(export))
        .route("/health", get(health))
        .with_state(state)
}

async fn start_scrape(
    State(state): State<AppState>,
    StartScrapeBody(request): StartScrapeBody,
) -> (StatusCode, Json<StartScrapeResponse>) {
    match state.orchestrator.submit(request.into_criteria()) {
        Ok(handle) => {
            info!(job_id = handle.job_id, location = %handle.criteria.location, "Harvest started");
            (
                StatusCode::OK,
                Json(StartScrapeResponse::Started {
                    job_id: handle.job_id,
                    location: handle.criteria.location,
                }),
            )
        }
        Err(OrchestratorError::JobAlreadyRunning) => (
            StatusCode::CONFLICT,
            Json(StartScrapeResponse::Rejected {
                error: OrchestratorError::JobAlreadyRunning.to_string(),
            }),
        ),
        Err(OrchestratorError::InvalidCriteria(reason)) => (
            StatusCode::BAD_REQUEST,
            Json(StartScrapeResponse::Rejected { error: reason }),
        ),
    }
}

async fn status(State(state): State<AppState>) -> Json<JobStatus> {
    Json(state.orchestrator.status())
}

async fn export(State(state): State<AppState>) -> Response {
    let csv = match state.exporter.export().await.and_then(|report| report.to_csv()) {
        Ok(csv) => csv,
        Err(e) => {
            error!(error = %e, "Export failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    };

    (
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={EXPORT_FILENAME}"),
            ),
        ],
        csv,
    )
        .into_response()
}

async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::Body;

    fn scrape_request(content_type: &str, body: &'static str) -> Request {
        axum::http::Request::post("/start_scrape")
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_form_body_parsing() {
        let req = scrape_request(
            "application/x-www-form-urlencoded",
            "location=New+York&role=cto&x=1",
        );
        let StartScrapeBody(request) = StartScrapeBody::from_request(req, &()).await.unwrap();
        assert_eq!(request.location.as_deref(), Some("New York"));
        assert_eq!(request.role_filter.as_deref(), Some("cto"));
    }

    #[tokio::test]
    async fn test_json_body_parsing() {
        let req = scrape_request("application/json", r#"{"location":"berlin","role_filter":"cto"}"#);
        let StartScrapeBody(request) = StartScrapeBody::from_request(req, &()).await.unwrap();
        assert_eq!(request.location.as_deref(), Some("berlin"));
        assert_eq!(request.role_filter.as_deref(), Some("cto"));
    }

    #[tokio::test]
    async fn test_malformed_json_is_rejected() {
        let req = scrape_request("application/json", "{\"location\":");
        let Err((status, Json(response))) = StartScrapeBody::from_request(req, &()).await else {
            panic!("malformed JSON was accepted");
        };
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(matches!(response, StartScrapeResponse::Rejected { .. }));
    }

    #[test]
    fn test_blank_role_is_ignored() {
        let criteria = StartScrapeRequest {
            location: Some("berlin".to_string()),
            role_filter: Some("  ".to_string()),
        }
        .into_criteria();
        assert_eq!(criteria.role(), None);
    }

    #[test]
    fn test_response_shape() {
        let started = serde_json::to_value(StartScrapeResponse::Started {
            job_id: 3,
            location: "berlin".to_string(),
        })
        .unwrap();
        assert_eq!(
            started,
            serde_json::json!({"status": "started", "job_id": 3, "location": "berlin"})
        );

        let rejected = serde_json::to_value(StartScrapeResponse::Rejected {
            error: "Location is required".to_string(),
        })
        .unwrap();
        assert_eq!(rejected["status"], "rejected");
    }
}
