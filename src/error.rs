use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

/// Error taxonomy shared by every handler. Each variant maps to one status
/// code and one stable machine-readable kind; internal store/provider error
/// text is never forwarded to the caller.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("password does not meet requirements")]
    WeakPassword(Vec<String>),
    #[error("authentication required")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("too many requests")]
    RateLimited { reset_at: i64 },
    #[error("upstream service unavailable")]
    Upstream(#[source] anyhow::Error),
    #[error("internal error")]
    Internal(#[source] anyhow::Error),
}

/// A pool or connection timeout on the record store is retryable by the
/// caller, unlike an arbitrary internal failure.
fn is_store_timeout(e: &anyhow::Error) -> bool {
    e.downcast_ref::<sqlx::Error>()
        .is_some_and(|e| matches!(e, sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)))
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        if is_store_timeout(&e) {
            AppError::Upstream(e)
        } else {
            AppError::Internal(e)
        }
    }
}

impl AppError {
    fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::WeakPassword(_) => "weak_password",
            AppError::Unauthorized => "unauthorized",
            AppError::Forbidden => "forbidden",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::RateLimited { .. } => "rate_limited",
            AppError::Upstream(_) => "upstream_unavailable",
            AppError::Internal(_) => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::WeakPassword(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Upstream(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            // Never leak the underlying error text on 5xx paths.
            AppError::Internal(e) => {
                error!(error = %e, "internal error");
                "Something went wrong".to_string()
            }
            AppError::Upstream(e) => {
                error!(error = %e, "upstream unavailable");
                "Service temporarily unavailable".to_string()
            }
            other => other.to_string(),
        };

        let mut body = json!({ "error": self.kind(), "message": message });
        if let AppError::WeakPassword(details) = &self {
            body["details"] = json!(details);
        }

        let mut response = (status, Json(body)).into_response();
        if let AppError::RateLimited { reset_at } = self {
            let now = time::OffsetDateTime::now_utc().unix_timestamp();
            let retry_after = (reset_at - now).max(0).to_string();
            if let Ok(value) = header::HeaderValue::from_str(&retry_after) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_match_taxonomy() {
        assert_eq!(
            AppError::Validation("bad".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::Conflict("dup".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::RateLimited { reset_at: 0 }.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AppError::Internal(anyhow::anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn store_timeout_converts_to_retryable_upstream() {
        let err = AppError::from(anyhow::Error::from(sqlx::Error::PoolTimedOut));
        assert!(matches!(err, AppError::Upstream(_)));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.kind(), "upstream_unavailable");
    }

    #[test]
    fn other_failures_convert_to_internal() {
        let err = AppError::from(anyhow::anyhow!("boom"));
        assert!(matches!(err, AppError::Internal(_)));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn internal_error_body_hides_source() {
        let response =
            AppError::Internal(anyhow::anyhow!("pg: connection refused")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(!body.contains("connection refused"));
        assert!(body.contains("internal_error"));
    }

    #[tokio::test]
    async fn weak_password_body_lists_details() {
        let response = AppError::WeakPassword(vec![
            "Password must be at least 8 characters long".into(),
            "Password must contain at least one number".into(),
        ])
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "weak_password");
        assert_eq!(body["details"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn rate_limited_sets_retry_after() {
        let reset_at = time::OffsetDateTime::now_utc().unix_timestamp() + 30;
        let response = AppError::RateLimited { reset_at }.into_response();
        assert!(response.headers().contains_key(header::RETRY_AFTER));
    }
}
