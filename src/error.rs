use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::documents::{embedding::EmbedError, extract::ExtractError};

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    /// A dependency (embedding API, mail relay, object storage) failed; the
    /// caller may retry.
    #[error("{message}")]
    Upstream {
        message: String,
        retry_after_secs: Option<u64>,
    },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
            retry_after_secs: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Extract(e) => match e {
                ExtractError::UnsupportedFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                ExtractError::SizeExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                ExtractError::CorruptFile(_) | ExtractError::NoText => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
            },
            AppError::Upstream { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<EmbedError> for AppError {
    fn from(e: EmbedError) -> Self {
        match e {
            EmbedError::InvalidInput(msg) => AppError::validation("query", msg),
            EmbedError::RateLimited { retry_after_secs } => AppError::Upstream {
                message: "embedding service is rate limited".into(),
                retry_after_secs: Some(retry_after_secs),
            },
            EmbedError::ApiUnavailable(msg) => AppError::Upstream {
                message: format!("embedding service unavailable: {msg}"),
                retry_after_secs: None,
            },
        }
    }
}

impl AppError {
    /// Message safe to show a client. Internal details only go to the log.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Validation { message, .. } => message.clone(),
            AppError::Upstream { message, .. } => message.clone(),
            AppError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.public_message();
        let body = match &self {
            AppError::Validation { field, .. } => {
                json!({ "error": message, "field": field })
            }
            AppError::Upstream {
                retry_after_secs, ..
            } => {
                tracing::warn!(error = %message, "upstream failure");
                json!({ "error": message, "retryable": true, "retry_after_secs": retry_after_secs })
            }
            AppError::Internal(e) => {
                tracing::error!(error = ?e, "internal error");
                json!({ "error": message })
            }
            _ => json!({ "error": message }),
        };

        let mut res = (status, Json(body)).into_response();
        if let AppError::Upstream {
            retry_after_secs: Some(secs),
            ..
        } = self
        {
            if let Ok(v) = HeaderValue::from_str(&secs.to_string()) {
                res.headers_mut().insert(header::RETRY_AFTER, v);
            }
        }
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_errors_map_to_client_statuses() {
        let unsupported = AppError::from(ExtractError::UnsupportedFormat("image/png".into()));
        assert_eq!(unsupported.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let too_big = AppError::from(ExtractError::SizeExceeded { size: 11, limit: 10 });
        assert_eq!(too_big.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let corrupt = AppError::from(ExtractError::CorruptFile("bad xref".into()));
        assert_eq!(corrupt.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn rate_limit_sets_retry_after() {
        let res = AppError::from(EmbedError::RateLimited { retry_after_secs: 7 }).into_response();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(res.headers().get(header::RETRY_AFTER).unwrap(), "7");
    }

    #[tokio::test]
    async fn internal_details_stay_out_of_responses() {
        let err = AppError::Internal(anyhow::anyhow!("relation \"documents\" does not exist"));
        assert_eq!(err.public_message(), "Internal server error");

        let res = err.into_response();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(!text.contains("relation"));
        assert!(text.contains("Internal server error"));
    }

    #[test]
    fn embedding_input_errors_are_validation_errors() {
        let err = AppError::from(EmbedError::InvalidInput("empty".into()));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
