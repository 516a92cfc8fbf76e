use crate::protocol::error_shapes::anthropic_error_payload;

/// Gateway error type used across all modules.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("{0}")]
    NotSupported(String),
    #[error("{0}")]
    Api(String),
    #[error("Backend request timed out: {0}")]
    Timeout(String),
    #[error("Backend connection failed: {0}")]
    Network(String),
    #[error("{0}")]
    RateLimit(String),
    #[error("{message}")]
    Upstream { status: u16, message: String },
    #[error("Config error: {0}")]
    Config(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad error category for status code and error type selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidRequest,
    NotSupported,
    Authentication,
    NotFound,
    RateLimit,
    Timeout,
    Network,
    Api,
    Internal,
}

/// Map a backend HTTP status code to an error category.
#[must_use]
pub fn category_from_upstream_status(status: u16) -> ErrorCategory {
    match status {
        400 | 413 | 422 => ErrorCategory::InvalidRequest,
        401 | 403 => ErrorCategory::Authentication,
        404 => ErrorCategory::NotFound,
        429 => ErrorCategory::RateLimit,
        408 | 504 => ErrorCategory::Timeout,
        _ => ErrorCategory::Api,
    }
}

impl GatewayError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            GatewayError::InvalidRequest(_) => ErrorCategory::InvalidRequest,
            GatewayError::NotSupported(_) => ErrorCategory::NotSupported,
            GatewayError::Api(_) => ErrorCategory::Api,
            GatewayError::Timeout(_) => ErrorCategory::Timeout,
            GatewayError::Network(_) => ErrorCategory::Network,
            GatewayError::RateLimit(_) => ErrorCategory::RateLimit,
            GatewayError::Upstream { status, .. } => category_from_upstream_status(*status),
            GatewayError::Config(_) | GatewayError::Internal(_) => ErrorCategory::Internal,
        }
    }

    #[must_use]
    pub fn status(&self) -> http::StatusCode {
        if let GatewayError::Upstream { status, .. } = self {
            if (400..=599).contains(status) {
                if let Ok(code) = http::StatusCode::from_u16(*status) {
                    return code;
                }
            }
            return http::StatusCode::BAD_GATEWAY;
        }
        http_status_for_category(self.category())
    }
}

// ---------------------------------------------------------------------------
// Category -> HTTP status code
// ---------------------------------------------------------------------------

fn http_status_for_category(cat: ErrorCategory) -> http::StatusCode {
    match cat {
        ErrorCategory::InvalidRequest | ErrorCategory::NotSupported => {
            http::StatusCode::BAD_REQUEST
        }
        ErrorCategory::Authentication => http::StatusCode::UNAUTHORIZED,
        ErrorCategory::NotFound => http::StatusCode::NOT_FOUND,
        ErrorCategory::RateLimit => http::StatusCode::TOO_MANY_REQUESTS,
        ErrorCategory::Timeout => http::StatusCode::GATEWAY_TIMEOUT,
        ErrorCategory::Network | ErrorCategory::Api => http::StatusCode::BAD_GATEWAY,
        ErrorCategory::Internal => http::StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ---------------------------------------------------------------------------
// Error document
// ---------------------------------------------------------------------------

/// Format an error as (`status_code`, Messages-protocol error document).
#[must_use]
pub fn format_error(err: &GatewayError) -> (http::StatusCode, serde_json::Value) {
    let body = anthropic_error_payload(err.category(), &err.to_string());
    (err.status(), body)
}

// ---------------------------------------------------------------------------
// Axum integration
// ---------------------------------------------------------------------------

#[must_use]
pub fn into_axum_response(err: &GatewayError) -> axum::response::Response {
    use axum::response::IntoResponse;
    let (status, body) = format_error(err);
    (status, axum::Json(body)).into_response()
}

impl axum::response::IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        into_axum_response(&self)
    }
}
