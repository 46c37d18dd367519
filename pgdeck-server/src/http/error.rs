//! API error types with IntoResponse
//!
//! Errors are converted to `{success: false, error, code, timestamp}` JSON
//! bodies with a status code per failure kind.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use pgdeck_core::{PoolError, StoreError, ValidationError};
use serde_json::json;

/// API error type with automatic HTTP status mapping
#[derive(Debug)]
pub enum ApiError {
    /// Validation failed (400)
    Validation(ValidationError),

    /// Body could not be parsed (400)
    BadRequest { message: String },

    /// Pool subsystem failure, status depends on the kind
    Pool(PoolError),

    /// Internal error (500, logged)
    Internal { message: String },
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            Self::BadRequest { .. } => (StatusCode::BAD_REQUEST, "bad_request"),
            Self::Pool(e) => match e {
                PoolError::ProfileNotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
                PoolError::AcquireTimeout { .. } => {
                    (StatusCode::SERVICE_UNAVAILABLE, "acquire_timeout")
                }
                PoolError::Connect { .. } => (StatusCode::BAD_GATEWAY, "connect_error"),
                PoolError::Query { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "query_error"),
                PoolError::PoolClosed => (StatusCode::CONFLICT, "pool_closed"),
                PoolError::DrainTimeout(_) | PoolError::Store(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
                }
            },
            Self::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            Self::Validation(e) => e.to_string(),
            Self::BadRequest { message } => message.clone(),
            Self::Pool(e @ (PoolError::DrainTimeout(_) | PoolError::Store(_))) => {
                // Log the actual error, return generic message
                tracing::error!("Pool error: {}", e);
                "an internal error occurred".to_string()
            }
            Self::Pool(e) => e.to_string(),
            Self::Internal { message } => {
                tracing::error!("Internal error: {}", message);
                "an internal error occurred".to_string()
            }
        };

        let mut body = json!({
            "success": false,
            "error": message,
            "code": code,
            "timestamp": Utc::now(),
        });
        if let Self::Pool(PoolError::Query {
            sql_state: Some(state),
            ..
        }) = &self
        {
            body["sqlState"] = json!(state);
        }
        if let Self::Pool(e) = &self {
            if e.is_retryable() {
                body["retryable"] = json!(true);
            }
        }

        (status, Json(body)).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e)
    }
}

impl From<PoolError> for ApiError {
    fn from(e: PoolError) -> Self {
        Self::Pool(e)
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { id } => Self::Pool(PoolError::ProfileNotFound { id }),
            StoreError::Validation(v) => Self::Validation(v),
            StoreError::Backend(message) => Self::Internal { message },
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        Self::BadRequest {
            message: e.body_text(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use serde_json::Value;

    async fn body_of(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn validation_error_is_400() {
        let err = ApiError::Validation(ValidationError::Empty { field: "name" });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_of(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "validation_error");
        assert_eq!(body["error"], "name cannot be empty");
    }

    #[tokio::test]
    async fn not_found_is_404() {
        let err: ApiError = StoreError::NotFound { id: "abc".into() }.into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_of(response).await;
        assert_eq!(body["error"], "Connection with ID abc not found");
    }

    #[tokio::test]
    async fn pool_errors_map_to_statuses() {
        let cases = [
            (PoolError::AcquireTimeout { waited_ms: 5 }, StatusCode::SERVICE_UNAVAILABLE),
            (PoolError::connect("refused"), StatusCode::BAD_GATEWAY),
            (PoolError::query("boom", None), StatusCode::UNPROCESSABLE_ENTITY),
            (PoolError::PoolClosed, StatusCode::CONFLICT),
            (PoolError::Store("disk".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }

    #[tokio::test]
    async fn query_error_exposes_sql_state() {
        let err = ApiError::from(PoolError::query(
            "syntax error at or near \"SELEC\"",
            Some("42601".into()),
        ));
        let body = body_of(err.into_response()).await;
        assert_eq!(body["sqlState"], "42601");
        assert_eq!(body["code"], "query_error");
        assert!(body["error"].as_str().unwrap().contains("syntax error"));
    }

    #[tokio::test]
    async fn connect_error_keeps_driver_message() {
        let err = ApiError::from(PoolError::connect("password authentication failed"));
        let body = body_of(err.into_response()).await;
        assert!(body["error"]
            .as_str()
            .unwrap()
            .contains("password authentication failed"));
    }

    #[tokio::test]
    async fn internal_error_hides_details() {
        let err = ApiError::Internal {
            message: "secret detail".into(),
        };
        let body = body_of(err.into_response()).await;
        assert_eq!(body["error"], "an internal error occurred");
    }
}
