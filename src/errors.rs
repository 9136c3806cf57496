use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Terminal outcome codes returned to callers in the `error.code` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    BlockedRateLimit,
    TimeBlocked,
    SensitiveDataBlocked,
    FinancialBlocked,
    InternalError,
}

impl ErrorCode {
    fn as_str(self) -> &'static str {
        match self {
            ErrorCode::BlockedRateLimit => "BLOCKED_RATE_LIMIT",
            ErrorCode::TimeBlocked => "TIME_BLOCKED",
            ErrorCode::SensitiveDataBlocked => "SENSITIVE_DATA_BLOCKED",
            ErrorCode::FinancialBlocked => "FINANCIAL_BLOCKED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    fn status(self) -> StatusCode {
        match self {
            ErrorCode::BlockedRateLimit => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::TimeBlocked | ErrorCode::SensitiveDataBlocked | ErrorCode::FinancialBlocked => {
                StatusCode::FORBIDDEN
            }
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("rate limit exceeded")]
    RateLimitExceeded,

    #[error("blocked by time gate")]
    TimeBlocked,

    #[error("sensitive data detected: {0:?}")]
    SensitiveData(Vec<String>),

    #[error("financial content blocked")]
    FinancialBlocked,

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    fn code(&self) -> ErrorCode {
        match self {
            AppError::RateLimitExceeded => ErrorCode::BlockedRateLimit,
            AppError::TimeBlocked => ErrorCode::TimeBlocked,
            AppError::SensitiveData(_) => ErrorCode::SensitiveDataBlocked,
            AppError::FinancialBlocked => ErrorCode::FinancialBlocked,
            AppError::UnknownProvider(_)
            | AppError::Upstream(_)
            | AppError::Database(_)
            | AppError::Internal(_) => ErrorCode::InternalError,
        }
    }
}

impl AppError {
    fn message(&self) -> String {
        match self {
            AppError::RateLimitExceeded => "rate limit exceeded".to_string(),
            AppError::TimeBlocked => "request blocked by time-based policy".to_string(),
            AppError::SensitiveData(types) => {
                format!("request blocked: sensitive data detected ({})", types.join(", "))
            }
            AppError::FinancialBlocked => "request blocked: financial content policy".to_string(),
            AppError::UnknownProvider(p) => format!("unknown provider: {p}"),
            AppError::Upstream(e) => {
                tracing::warn!("upstream transport fault: {}", e);
                "upstream request failed".to_string()
            }
            AppError::Database(e) => {
                tracing::error!("database error: {}", e);
                "internal server error".to_string()
            }
            AppError::Internal(e) => {
                tracing::error!("internal error: {}", e);
                "internal server error".to_string()
            }
        }
    }

    fn details(&self) -> serde_json::Value {
        match self {
            AppError::SensitiveData(types) => json!({ "detected_types": types }),
            _ => json!({}),
        }
    }

    /// Render the error envelope with the request's method and path
    /// attached, per the external error-response shape.
    pub fn render(&self, method: &str, path: &str) -> Response {
        let code = self.code();

        let body = Json(json!({
            "error": {
                "message": self.message(),
                "code": code.as_str(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "path": path,
                "method": method,
                "details": self.details(),
            }
        }));

        let mut response = (code.status(), body).into_response();

        if matches!(self, AppError::RateLimitExceeded) {
            response
                .headers_mut()
                .insert("retry-after", axum::http::HeaderValue::from_static("1"));
        }

        response
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.render("", "")
    }
}
