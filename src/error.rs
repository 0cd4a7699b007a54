use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

use crate::i18n;

/// JSON envelope returned by every non-streaming endpoint. `code` is 200 on
/// success; any other value is an error carrying `error_msg`.
#[derive(Debug, Serialize, ToSchema)]
pub struct Envelope {
    pub code: u16,
    #[schema(value_type = Object)]
    pub message: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
}

impl Envelope {
    pub fn ok<T: Serialize>(message: T) -> Json<Envelope> {
        Json(Envelope {
            code: 200,
            message: serde_json::to_value(message).unwrap_or(Value::Null),
            msg: None,
            error_msg: None,
        })
    }

    pub fn ok_msg(msg: &str) -> Json<Envelope> {
        Json(Envelope {
            code: 200,
            message: Value::Null,
            msg: Some(msg.to_string()),
            error_msg: None,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    InvalidRequest(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    UpstreamFailure(String),
    #[error("upstream call timed out")]
    UpstreamTimeout,
    #[error("request canceled")]
    Canceled,
    #[error("{0}")]
    StorageFailure(String),
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn code(&self) -> u16 {
        match self {
            AppError::NotFound(_) => 404,
            AppError::InvalidRequest(_) => 400,
            AppError::Conflict(_) => 409,
            AppError::UpstreamFailure(_) => 502,
            AppError::UpstreamTimeout => 504,
            AppError::Canceled => 499,
            AppError::StorageFailure(_) => 500,
            AppError::Internal(_) => 500,
        }
    }

    fn phrase_key(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "error.not_found",
            AppError::InvalidRequest(_) => "error.invalid_request",
            AppError::Conflict(_) => "error.conflict",
            AppError::UpstreamFailure(_) => "error.upstream_failure",
            AppError::UpstreamTimeout => "error.upstream_timeout",
            AppError::Canceled => "error.canceled",
            AppError::StorageFailure(_) => "error.storage_failure",
            AppError::Internal(_) => "error.internal",
        }
    }

    /// Localized message for the envelope. Internal errors hide the detail
    /// behind a generic phrase; everything else carries it.
    pub fn localized(&self) -> String {
        let phrase = i18n::phrase(self.phrase_key());
        match self {
            AppError::UpstreamTimeout | AppError::Canceled | AppError::Internal(_) => phrase,
            other => format!("{}: {}", phrase, other),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let AppError::Internal(detail) = &self {
            tracing::error!("internal error: {}", detail);
        }
        let status = StatusCode::from_u16(self.code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(Envelope {
            code: self.code(),
            message: Value::Null,
            msg: None,
            error_msg: Some(self.localized()),
        });
        (status, body).into_response()
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidRequest(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(AppError::NotFound("x".into()).code(), 404);
        assert_eq!(AppError::InvalidRequest("x".into()).code(), 400);
        assert_eq!(AppError::Conflict("x".into()).code(), 409);
        assert_eq!(AppError::UpstreamFailure("x".into()).code(), 502);
        assert_eq!(AppError::UpstreamTimeout.code(), 504);
        assert_eq!(AppError::Canceled.code(), 499);
        assert_eq!(AppError::StorageFailure("x".into()).code(), 500);
    }

    #[test]
    fn test_ok_envelope_shape() {
        let Json(env) = Envelope::ok(serde_json::json!({"a": 1}));
        assert_eq!(env.code, 200);
        assert_eq!(env.message["a"], 1);
        assert!(env.error_msg.is_none());
    }

    #[test]
    fn test_internal_hides_detail() {
        let err = AppError::Internal("secret backtrace".into());
        assert!(!err.localized().contains("secret"));
    }
}
