//! HTTP routes.

use axum::{
    Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::post,
};
use culturelens_core::{Comparator, ComparisonRequest};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::error;

/// Body returned for every failed request. Details stay in the logs.
pub const ERROR_MESSAGE: &str = "An error occurred while processing the request.";

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: &'static str,
}

/// Build the router serving `POST /compareContrast`.
pub fn router(comparator: Arc<Comparator>) -> Router {
    Router::new()
        .route("/compareContrast", post(compare_contrast))
        .layer(CorsLayer::permissive())
        .with_state(comparator)
}

async fn compare_contrast(
    State(comparator): State<Arc<Comparator>>,
    payload: Result<Json<ComparisonRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            error!(error = %rejection.body_text(), "Error in /compareContrast: unreadable body");
            return internal_error();
        }
    };

    match comparator.compare(&request).await {
        Ok(comparison) => Json(comparison.result).into_response(),
        Err(e) => {
            error!(error = %e, "Error in /compareContrast");
            internal_error()
        }
    }
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: ERROR_MESSAGE,
        }),
    )
        .into_response()
}
