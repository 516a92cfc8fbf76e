use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{self, Body};
use axum::http::{Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::api::{health, messages};
use crate::error::{format_error, GatewayError};
use crate::state::AppState;

#[derive(Debug, PartialEq, Eq)]
enum RouteMatch {
    Health,
    Messages,
    CountTokens,
    MethodNotAllowed,
    NotFound,
}

/// Dispatch a raw HTTP request to the matching ingress handler.
///
/// # Errors
///
/// This function currently never returns `Err` and uses `Infallible`.
pub async fn dispatch_request(
    state: Arc<AppState>,
    base_path: Arc<str>,
    request: Request<Body>,
) -> Result<Response, Infallible> {
    let (parts, body) = request.into_parts();
    let route = match_route(&parts.method, parts.uri.path(), base_path.as_ref());

    let body_limit = state.config.server.max_request_body_bytes;
    let response = match route {
        RouteMatch::Health => health::health_handler(&state).into_response(),
        RouteMatch::Messages => {
            let request_id = state.next_request_id();
            let body_bytes = match read_request_body(body, body_limit, &request_id).await {
                Ok(bytes) => bytes,
                Err(response) => return Ok(response),
            };
            messages::messages_handler(state, body_bytes, request_id).await
        }
        RouteMatch::CountTokens => {
            let request_id = state.next_request_id();
            let body_bytes = match read_request_body(body, body_limit, &request_id).await {
                Ok(bytes) => bytes,
                Err(response) => return Ok(response),
            };
            messages::count_tokens_handler(&body_bytes, &request_id)
        }
        RouteMatch::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED.into_response(),
        RouteMatch::NotFound => StatusCode::NOT_FOUND.into_response(),
    };

    Ok(response)
}

#[must_use]
pub fn normalize_base_path(base_path: &str) -> String {
    let trimmed = base_path.trim();
    if trimmed.is_empty() || trimmed == "/" {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.trim_end_matches('/').to_string()
    } else {
        format!("/{}", trimmed.trim_end_matches('/'))
    }
}

async fn read_request_body(
    body: Body,
    limit: usize,
    request_id: &str,
) -> Result<bytes::Bytes, Response> {
    body::to_bytes(body, limit).await.map_err(|_| {
        tracing::info!(request_id = %request_id, limit, "rejected oversized request body");
        let err = GatewayError::InvalidRequest(format!(
            "Request body too large (max {limit} bytes)"
        ));
        let (_, payload) = format_error(&err);
        messages::with_request_id(
            (StatusCode::PAYLOAD_TOO_LARGE, axum::Json(payload)).into_response(),
            request_id,
        )
    })
}

fn match_route(method: &Method, path: &str, base_path: &str) -> RouteMatch {
    let Some(path) = strip_base_path(path, base_path) else {
        return RouteMatch::NotFound;
    };

    let (route, allowed) = match path {
        "/" => (RouteMatch::Health, Method::GET),
        "/v1/messages" => (RouteMatch::Messages, Method::POST),
        "/v1/messages/count_tokens" => (RouteMatch::CountTokens, Method::POST),
        _ => return RouteMatch::NotFound,
    };
    if *method == allowed {
        route
    } else {
        RouteMatch::MethodNotAllowed
    }
}

fn strip_base_path<'a>(path: &'a str, base_path: &str) -> Option<&'a str> {
    if base_path.is_empty() {
        return Some(path);
    }

    let remainder = path.strip_prefix(base_path)?;
    if remainder.is_empty() {
        Some("/")
    } else if remainder.starts_with('/') {
        Some(remainder)
    } else {
        None
    }
}
