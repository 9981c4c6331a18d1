use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use corral_types::error::ChatError;

/// Newtype so the typed failure taxonomy can carry an HTTP mapping.
#[derive(Debug)]
pub struct ApiError(pub ChatError);

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ChatError::NotFound => StatusCode::NOT_FOUND,
            ChatError::Forbidden => StatusCode::FORBIDDEN,
            ChatError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            // Retryable by the caller.
            ChatError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            ChatError::Transport(_) => StatusCode::BAD_GATEWAY,
        };

        if status.is_server_error() {
            error!("request failed: {}", self.0);
        }

        (status, Json(json!({ "message": self.0.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_expected_statuses() {
        let cases = [
            (ChatError::NotFound, StatusCode::NOT_FOUND),
            (ChatError::Forbidden, StatusCode::FORBIDDEN),
            (
                ChatError::InvalidArgument("bad".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                ChatError::Store("down".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];

        for (err, expected) in cases {
            let response = ApiError(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }
}
