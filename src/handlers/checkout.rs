use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use crate::{
    errors::ServiceError, handlers::common::success_response,
    services::checkout::CheckoutRequest, AppState,
};

pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_checkout))
        .route("/sessions/:session_id", get(payment_status))
}

/// POST /api/v1/checkout
///
/// Validates the cart, opens a hosted checkout session, and returns the
/// redirect target.
async fn create_checkout(
    State(state): State<AppState>,
    Json(payload): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let response = state.services.checkout.begin_checkout(payload).await?;
    Ok(success_response(response))
}

/// GET /api/v1/checkout/sessions/:session_id
async fn payment_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let response = state.services.checkout.payment_status(&session_id).await?;
    Ok(success_response(response))
}
