use std::net::SocketAddr;

use anyhow::Result;
use axum::extract::{Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::models::{RecommendQuery, RecommendResponse, TestResultQuery, TestResultResponse};
use crate::service::RecommendService;

#[derive(Clone)]
struct AppState {
    service: RecommendService,
}

pub async fn run_server(config: AppConfig, service: RecommendService) -> Result<()> {
    let state = AppState { service };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE]);

    let app = Router::new()
        .route("/recommend", get(recommend_handler))
        .route("/test_result", get(test_result_handler))
        .route("/healthz", get(healthz))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = config.bind_addr.parse()?;
    tracing::info!("listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn recommend_handler(
    State(state): State<AppState>,
    Query(query): Query<RecommendQuery>,
) -> Result<Json<RecommendResponse>, ApiError> {
    validate_coordinate(query.lat, query.lng)?;
    let response = state.service.recommend(query.into_params()).await;
    Ok(Json(response))
}

async fn test_result_handler(
    State(state): State<AppState>,
    Query(query): Query<TestResultQuery>,
) -> Result<Json<TestResultResponse>, ApiError> {
    validate_coordinate(query.lat, query.lng)?;
    let response = state.service.test_result(query.into_params()).await;
    Ok(Json(response))
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// The only request shapes that refuse service: a coordinate outside the
/// valid range (NaN fails both range checks too). Everything downstream
/// degrades inside a 200 response instead.
fn validate_coordinate(lat: f64, lng: f64) -> Result<(), ApiError> {
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
        return Err(ApiError::bad_request(format!(
            "coordinate out of range: lat={lat} lng={lng}"
        )));
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install ctrl-c handler: {}", err);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => tracing::error!("failed to install terminate handler: {}", err),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: String) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_range_coordinates_pass_validation() {
        assert!(validate_coordinate(37.5665, 126.9780).is_ok());
        assert!(validate_coordinate(-90.0, 180.0).is_ok());
    }

    #[test]
    fn out_of_range_coordinates_are_rejected() {
        assert!(validate_coordinate(91.0, 127.0).is_err());
        assert!(validate_coordinate(37.5, -181.0).is_err());
        assert!(validate_coordinate(f64::NAN, 127.0).is_err());

        let err = validate_coordinate(91.0, 127.0).err().unwrap();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }
}
