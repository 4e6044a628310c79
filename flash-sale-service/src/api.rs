use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use crate::error::SaleError;
use crate::handlers::PurchaseHandler;

#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<PurchaseHandler>,
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub user_id: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct PurchaseRequest {
    pub user_id: Option<i32>,
    pub token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PurchaseResponse {
    pub order_id: i32,
}

#[derive(Debug, Deserialize)]
pub struct OpenWindowRequest {
    pub open_for_secs: u64,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/stock/:id/token", get(issue_token))
        .route("/stock/:id/purchase", post(purchase))
        .route("/stock/:id/window", put(open_window))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

pub async fn issue_token(
    State(state): State<AppState>,
    Path(item_id): Path<i32>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<TokenResponse>, SaleError> {
    let token = state.handler.issue_token(query.user_id, item_id).await?;
    Ok(Json(TokenResponse { token }))
}

pub async fn purchase(
    State(state): State<AppState>,
    Path(item_id): Path<i32>,
    body: Bytes,
) -> Result<Json<PurchaseResponse>, SaleError> {
    // No body at all is the unsigned flow; anything else must parse.
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        PurchaseRequest::default()
    } else {
        serde_json::from_slice::<PurchaseRequest>(&body)
            .map_err(|e| SaleError::MalformedRequest(e.to_string()))?
    };
    let order_id = state
        .handler
        .purchase(item_id, request.user_id, request.token.as_deref())
        .await?;
    Ok(Json(PurchaseResponse { order_id }))
}

pub async fn open_window(
    State(state): State<AppState>,
    Path(item_id): Path<i32>,
    Json(request): Json<OpenWindowRequest>,
) -> Result<StatusCode, SaleError> {
    state
        .handler
        .open_window(item_id, Duration::from_secs(request.open_for_secs))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn health_check() -> &'static str {
    "OK"
}
