use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use tracing::error;

use digest_common::DigestError;

/// A `DigestError` rendered as `{"error": "..."}`. Operator mistakes map to
/// 404/409/422, everything else to 500.
#[derive(Debug)]
pub struct ApiError(pub DigestError);

impl From<DigestError> for ApiError {
    fn from(e: DigestError) -> Self {
        Self(e)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            DigestError::NotFound { .. } => StatusCode::NOT_FOUND,
            DigestError::InvalidState(_) => StatusCode::CONFLICT,
            DigestError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if !self.0.is_operator_error() {
            error!(error = %self.0, "Request failed");
        }
        (
            status,
            Json(serde_json::json!({ "error": self.0.to_string() })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_errors_map_to_client_statuses() {
        let cases = [
            (DigestError::not_found("digest", "x"), StatusCode::NOT_FOUND),
            (DigestError::InvalidState("done".into()), StatusCode::CONFLICT),
            (
                DigestError::Validation("projectId is required".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                DigestError::Delivery("down".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }
}
