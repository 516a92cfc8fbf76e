use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use http::HeaderValue;
use serde_json::json;
use tracing::Instrument;

use crate::error::{into_axum_response, GatewayError};
use crate::observability::log_request_complete;
use crate::observability::token_counter::estimate_request_tokens;
use crate::protocol::anthropic::decoder::{decode_anthropic_request, DecodedRequest};
use crate::protocol::anthropic::response_encoder::encode_anthropic_response;
use crate::protocol::anthropic::stream::encode_anthropic_sse_frame_into;
use crate::protocol::anthropic::{AnthropicRequest, AnthropicStreamEvent};
use crate::state::AppState;
use crate::stream::{done_frame, is_done_event, sse_frame_stream, SseEvent, StreamTranslator};

const REQUEST_ID_HEADER: &str = "request-id";

/// `POST /v1/messages`.
pub async fn messages_handler(state: Arc<AppState>, body: Bytes, request_id: String) -> Response {
    let span = tracing::info_span!("messages", request_id = %request_id);
    handle_messages(state, body, request_id).instrument(span).await
}

async fn handle_messages(state: Arc<AppState>, body: Bytes, request_id: String) -> Response {
    let start = Instant::now();
    let request = match parse_request(&body) {
        Ok(request) => request,
        Err(err) => return error_response(&err, &request_id),
    };
    let decoded =
        match decode_anthropic_request(&request, &state.model_mapper, state.decode_options()) {
            Ok(decoded) => decoded,
            Err(err) => {
                tracing::info!(error = %err, "rejected request");
                return error_response(&err, &request_id);
            }
        };
    tracing::info!(
        model = %decoded.client_model,
        backend_model = %decoded.backend.model,
        stream = decoded.stream,
        messages = decoded.backend.messages.len(),
        "forwarding request"
    );

    if decoded.stream {
        stream_messages(state, decoded, request_id, start).await
    } else {
        non_stream_messages(&state, &decoded, &request_id, start).await
    }
}

/// `POST /v1/messages/count_tokens`.
pub fn count_tokens_handler(body: &Bytes, request_id: &str) -> Response {
    match parse_request(body) {
        Ok(request) => {
            let input_tokens = estimate_request_tokens(&request);
            tracing::debug!(request_id = %request_id, input_tokens, "estimated input tokens");
            with_request_id(
                axum::Json(json!({ "input_tokens": input_tokens })).into_response(),
                request_id,
            )
        }
        Err(err) => error_response(&err, request_id),
    }
}

fn parse_request(body: &[u8]) -> Result<AnthropicRequest, GatewayError> {
    serde_json::from_slice(body)
        .map_err(|err| GatewayError::InvalidRequest(format!("Invalid request body: {err}")))
}

fn error_response(err: &GatewayError, request_id: &str) -> Response {
    with_request_id(into_axum_response(err), request_id)
}

pub(crate) fn with_request_id(mut response: Response, request_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

// ---------------------------------------------------------------------------
// Non-streaming
// ---------------------------------------------------------------------------

async fn non_stream_messages(
    state: &AppState,
    decoded: &DecodedRequest,
    request_id: &str,
    start: Instant,
) -> Response {
    let result = match state.backend.send(&decoded.backend).await {
        Ok(response) => encode_anthropic_response(&response, &decoded.client_model),
        Err(err) => Err(err),
    };
    match result {
        Ok(response) => {
            log_request_complete(
                &decoded.client_model,
                &decoded.backend.model,
                &response.usage,
                false,
                start,
            );
            with_request_id(axum::Json(response).into_response(), request_id)
        }
        Err(err) => {
            tracing::warn!(request_id, error = %err, "backend request failed");
            error_response(&err, request_id)
        }
    }
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

type EventStream = Pin<Box<dyn Stream<Item = Result<SseEvent, reqwest::Error>> + Send>>;

struct StreamContext {
    events: EventStream,
    translator: StreamTranslator,
    idle_timeout: Duration,
    pending: Vec<AnthropicStreamEvent>,
    finished: bool,
    request_id: String,
    client_model: String,
    backend_model: String,
    start: Instant,
}

async fn stream_messages(
    state: Arc<AppState>,
    decoded: DecodedRequest,
    request_id: String,
    start: Instant,
) -> Response {
    let upstream = match state.backend.send_stream(&decoded.backend).await {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!(request_id = %request_id, error = %err, "backend stream request failed");
            return error_response(&err, &request_id);
        }
    };

    let context = StreamContext {
        events: Box::pin(sse_frame_stream(upstream.bytes_stream())),
        translator: StreamTranslator::new(&decoded.client_model),
        idle_timeout: state.backend.stream_idle_timeout(),
        pending: Vec::with_capacity(8),
        finished: false,
        request_id: request_id.clone(),
        client_model: decoded.client_model,
        backend_model: decoded.backend.model,
        start,
    };

    let body_stream = futures_util::stream::unfold(context, |mut context| async move {
        if context.finished {
            return None;
        }
        loop {
            let next = tokio::time::timeout(context.idle_timeout, context.events.next()).await;
            let terminal = match next {
                Ok(Some(Ok(event))) => {
                    if is_done_event(&event) {
                        true
                    } else {
                        context
                            .translator
                            .translate_chunk_into(&event.data, &mut context.pending);
                        false
                    }
                }
                Ok(Some(Err(err))) => {
                    tracing::warn!(
                        request_id = %context.request_id,
                        error = %err,
                        "backend stream failed mid-response"
                    );
                    true
                }
                Ok(None) => true,
                Err(_) => {
                    tracing::warn!(
                        request_id = %context.request_id,
                        idle_timeout_secs = context.idle_timeout.as_secs(),
                        "backend stream idle timeout"
                    );
                    true
                }
            };

            if terminal {
                context.translator.finalize_into(&mut context.pending);
                context.translator.close_into(&mut context.pending);
            }
            let mut frames = String::new();
            for event in context.pending.drain(..) {
                encode_anthropic_sse_frame_into(&event, &mut frames);
            }
            if terminal {
                frames.push_str(done_frame());
                context.finished = true;
                log_request_complete(
                    &context.client_model,
                    &context.backend_model,
                    &context.translator.usage(),
                    true,
                    context.start,
                );
                return Some((Bytes::from(frames), context));
            }
            if !frames.is_empty() {
                return Some((Bytes::from(frames), context));
            }
        }
    });

    let body = axum::body::Body::from_stream(body_stream.map(Ok::<Bytes, Infallible>));
    with_request_id(sse_ok_response(body), &request_id)
}

fn sse_ok_response(body: axum::body::Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = http::StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        http::header::CONNECTION,
        HeaderValue::from_static("keep-alive"),
    );
    response
}
