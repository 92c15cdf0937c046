use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{error, warn};

use courier_db::CourierError;

/// Error returned by every handler. Domain failures keep their message;
/// storage and runtime failures are logged and reported generically.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Courier(#[from] CourierError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Courier(CourierError::Validation(_)) => StatusCode::BAD_REQUEST,
            ApiError::Courier(CourierError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Courier(CourierError::Conflict(_)) => StatusCode::CONFLICT,
            ApiError::Courier(CourierError::Storage { .. }) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Internal Server Error: {}", self);
            "Internal Server Error".to_string()
        } else {
            warn!("Request rejected ({}): {}", status, self);
            self.to_string()
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
