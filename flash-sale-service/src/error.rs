use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use crate::store::StoreError;

/// Every way an admission attempt can be turned away.
#[derive(Debug, Error)]
pub enum SaleError {
    #[error("the flash sale for this item is not open")]
    ActivityClosed,

    #[error("the item is sold out")]
    InsufficientStock,

    #[error("the stock changed while the purchase was in flight, please retry")]
    ConcurrentConflict,

    #[error("the request signature is missing, wrong or expired")]
    InvalidSignature,

    #[error("too many attempts from this user, slow down")]
    RateLimited,

    #[error("user {0} does not exist")]
    UnknownUser(i32),

    #[error("item {0} does not exist")]
    UnknownItem(i32),

    #[error("too many buyers right now, try again later")]
    Overloaded,

    #[error("malformed request body: {0}")]
    MalformedRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SaleError {
    pub fn code(&self) -> &'static str {
        match self {
            SaleError::ActivityClosed => "ACTIVITY_CLOSED",
            SaleError::InsufficientStock => "INSUFFICIENT_STOCK",
            SaleError::ConcurrentConflict => "CONCURRENT_CONFLICT",
            SaleError::InvalidSignature => "INVALID_SIGNATURE",
            SaleError::RateLimited => "RATE_LIMITED",
            SaleError::UnknownUser(_) => "UNKNOWN_USER",
            SaleError::UnknownItem(_) => "UNKNOWN_ITEM",
            SaleError::Overloaded => "OVERLOADED",
            SaleError::MalformedRequest(_) => "MALFORMED_REQUEST",
            SaleError::Store(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            SaleError::ActivityClosed
            | SaleError::InsufficientStock
            | SaleError::ConcurrentConflict => StatusCode::CONFLICT,
            SaleError::InvalidSignature => StatusCode::FORBIDDEN,
            SaleError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            SaleError::UnknownUser(_) | SaleError::UnknownItem(_) => StatusCode::NOT_FOUND,
            SaleError::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
            SaleError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            SaleError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for SaleError {
    fn into_response(self) -> Response {
        let message = match &self {
            // Collaborator details stay in the logs.
            SaleError::Store(e) => {
                tracing::error!(error = %e, "store failure while handling sale request");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": self.code(),
            "message": message,
        }));

        (self.status(), body).into_response()
    }
}
