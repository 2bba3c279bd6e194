use std::{future::Future, sync::Arc};

use axum::{
    Router,
    extract::{Path, Request, State, rejection::JsonRejection},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::{
    clients::{Ledger, health::HealthChecker},
    models::{
        event::IngestRequest,
        health::HealthStatus,
        response::{ApiResponse, IngestAccepted},
        status::DeliveryStatus,
        validation::validate_ingest_request,
    },
    producer::Producer,
};

const API_KEY_HEADER: &str = "x-api-key";

pub struct AppState {
    pub producer: Producer,
    pub ledger: Arc<dyn Ledger>,
    pub health_checker: HealthChecker,
    pub api_key: Option<String>,
}

pub fn router(state: Arc<AppState>) -> Router {
    let events = Router::new()
        .route("/events/ingest", post(ingest_event))
        .route("/events/{event_id}", get(event_status))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .merge(events)
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_api_server<S>(
    port: u16,
    state: Arc<AppState>,
    shutdown: S,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    S: Future<Output = ()> + Send + 'static,
{
    let app = router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!(address = %addr, "Ingestion API started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Ingestion API stopped");

    Ok(())
}

async fn require_api_key(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    if let Some(expected) = &state.api_key {
        let supplied = request
            .headers()
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok());

        if supplied != Some(expected.as_str()) {
            warn!(path = %request.uri().path(), "Rejected request with invalid API key");
            return (
                StatusCode::UNAUTHORIZED,
                Json(ApiResponse::<()>::error(
                    "Unauthorized".to_string(),
                    "Invalid or missing API Key".to_string(),
                )),
            )
                .into_response();
        }
    }

    next.run(request).await
}

async fn ingest_event(
    State(state): State<Arc<AppState>>,
    body: Result<Json<IngestRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return bad_request(rejection.body_text());
        }
    };

    if let Err(e) = validate_ingest_request(&request) {
        return bad_request(e.to_string());
    }

    match state.producer.ingest(request).await {
        Ok(event) => (
            StatusCode::ACCEPTED,
            Json(IngestAccepted {
                message: "Event accepted".to_string(),
                event_id: event.id,
                status: DeliveryStatus::Queued.to_string(),
            }),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to enqueue event");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::<()>::error(
                    "Internal Server Error".to_string(),
                    "Event could not be queued".to_string(),
                )),
            )
                .into_response()
        }
    }
}

async fn event_status(State(state): State<Arc<AppState>>, Path(event_id): Path<String>) -> Response {
    match state.ledger.find(&event_id).await {
        Ok(Some(record)) => (
            StatusCode::OK,
            Json(ApiResponse::success(record, "Event found".to_string())),
        )
            .into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::<()>::error(
                "Not Found".to_string(),
                format!("No record for event {}", event_id),
            )),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, event_id = %event_id, "Ledger lookup failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse::<()>::error(
                    "Service Unavailable".to_string(),
                    "Ledger is unavailable".to_string(),
                )),
            )
                .into_response()
        }
    }
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_checker.check_all().await;

    let status_code = match health.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

fn bad_request(reason: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiResponse::<()>::error(
            format!("Invalid Request: {}", reason),
            "Event rejected".to_string(),
        )),
    )
        .into_response()
}
