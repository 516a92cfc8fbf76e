use std::time::Duration;

use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::HeaderValue;

use crate::config::BackendConfig;
use crate::error::GatewayError;
use crate::protocol::error_shapes::normalize_upstream_error;
use crate::protocol::openai_chat::{OpenAiChatRequest, OpenAiChatResponse};

const COMPLETIONS_PATH: &str = "chat/completions";

fn build_reqwest_client(config: &BackendConfig) -> Result<reqwest::Client, GatewayError> {
    reqwest::Client::builder()
        .tcp_nodelay(true)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|err| GatewayError::Config(format!("Failed to build HTTP client: {err}")))
}

/// `{base_url}/chat/completions`, tolerating a trailing slash on the base.
///
/// # Errors
///
/// Returns [`GatewayError::Config`] when the base URL does not parse.
pub fn completions_url(base_url: &str) -> Result<url::Url, GatewayError> {
    let mut base = base_url.trim().trim_end_matches('/').to_string();
    base.push('/');
    let base = url::Url::parse(&base)
        .map_err(|err| GatewayError::Config(format!("Invalid backend base_url: {err}")))?;
    base.join(COMPLETIONS_PATH)
        .map_err(|err| GatewayError::Config(format!("Invalid backend base_url: {err}")))
}

/// Client for the single OpenAI-shaped chat backend.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    url: url::Url,
    authorization: HeaderValue,
    request_timeout: Duration,
    stream_idle_timeout: Duration,
}

impl HttpBackend {
    /// Build the client from validated backend configuration.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] when the URL, the API key header, or
    /// the underlying HTTP client cannot be built.
    pub fn new(config: &BackendConfig) -> Result<Self, GatewayError> {
        let mut authorization =
            HeaderValue::from_str(&format!("Bearer {}", config.api_key.trim())).map_err(|_| {
                GatewayError::Config("backend api_key contains invalid header characters".into())
            })?;
        authorization.set_sensitive(true);
        Ok(Self {
            client: build_reqwest_client(config)?,
            url: completions_url(&config.base_url)?,
            authorization,
            request_timeout: Duration::from_secs(config.timeout_secs),
            stream_idle_timeout: Duration::from_secs(config.stream_idle_timeout_secs),
        })
    }

    #[must_use]
    pub fn url(&self) -> &url::Url {
        &self.url
    }

    /// Upper bound on the wait for each streamed backend chunk.
    #[must_use]
    pub fn stream_idle_timeout(&self) -> Duration {
        self.stream_idle_timeout
    }

    /// Send a non-streaming completion request and decode the response.
    ///
    /// # Errors
    ///
    /// Returns the transport error, the normalised backend error for non-2xx
    /// statuses, or [`GatewayError::Api`] when the body is not a chat response.
    pub async fn send(&self, request: &OpenAiChatRequest) -> Result<OpenAiChatResponse, GatewayError> {
        let response = self.execute(request, Some(self.request_timeout)).await?;
        let body = response.bytes().await.map_err(map_reqwest_error)?;
        serde_json::from_slice(&body)
            .map_err(|err| GatewayError::Api(format!("Invalid backend response: {err}")))
    }

    /// Send a streaming completion request. The returned response has a 2xx
    /// status; its body is the backend SSE stream.
    ///
    /// Only the wait for response headers is bounded by the request timeout;
    /// the body is bounded per chunk by [`stream_idle_timeout`](Self::stream_idle_timeout).
    ///
    /// # Errors
    ///
    /// Returns the transport error or the normalised backend error for
    /// non-2xx statuses.
    pub async fn send_stream(
        &self,
        request: &OpenAiChatRequest,
    ) -> Result<reqwest::Response, GatewayError> {
        tokio::time::timeout(self.request_timeout, self.execute(request, None))
            .await
            .map_err(|_| {
                GatewayError::Timeout(format!(
                    "no response headers within {}s",
                    self.request_timeout.as_secs()
                ))
            })?
    }

    async fn execute(
        &self,
        request: &OpenAiChatRequest,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response, GatewayError> {
        let body = serde_json::to_vec(request)
            .map_err(|err| GatewayError::Internal(format!("Failed to encode backend request: {err}")))?;
        tracing::debug!(
            url = %self.url,
            model = %request.model,
            stream = request.stream.unwrap_or(false),
            bytes = body.len(),
            "sending backend request"
        );
        let mut builder = self
            .client
            .post(self.url.clone())
            .header(AUTHORIZATION, self.authorization.clone())
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(body);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let response = builder.send().await.map_err(map_reqwest_error)?;
        ensure_success(response).await
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.bytes().await.unwrap_or_default();
    let shape = normalize_upstream_error(status.as_u16(), &body);
    tracing::warn!(
        status = status.as_u16(),
        shape = shape.shape,
        error_type = shape.error_type.as_deref().unwrap_or(""),
        "backend returned error status"
    );
    if status == http::StatusCode::TOO_MANY_REQUESTS {
        return Err(GatewayError::RateLimit(shape.message));
    }
    Err(GatewayError::Upstream {
        status: status.as_u16(),
        message: shape.message,
    })
}

/// Map a reqwest failure onto the gateway taxonomy.
#[must_use]
pub fn map_reqwest_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout(err.to_string())
    } else if err.is_connect() || err.is_request() || err.is_body() {
        GatewayError::Network(err.to_string())
    } else if err.is_decode() {
        GatewayError::Api(format!("Invalid backend response: {err}"))
    } else {
        GatewayError::Network(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::Router;
    use serde_json::json;

    fn backend_config(base_url: String) -> BackendConfig {
        BackendConfig {
            base_url,
            api_key: "sk-test".into(),
            timeout_secs: 5,
            connect_timeout_secs: 1,
            stream_idle_timeout_secs: 5,
            models: Vec::new(),
        }
    }

    fn request() -> OpenAiChatRequest {
        serde_json::from_value(json!({
            "model": "deepseek-chat",
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap()
    }

    async fn serve(router: Router) -> (String, tokio::task::JoinHandle<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (format!("http://{addr}/v1"), handle)
    }

    #[test]
    fn completions_url_handles_trailing_slash() {
        assert_eq!(
            completions_url("https://api.example.com/v1").unwrap().as_str(),
            "https://api.example.com/v1/chat/completions"
        );
        assert_eq!(
            completions_url("https://api.example.com/v1/").unwrap().as_str(),
            "https://api.example.com/v1/chat/completions"
        );
        assert!(matches!(completions_url("not a url"), Err(GatewayError::Config(_))));
    }

    #[tokio::test]
    async fn send_posts_with_bearer_auth() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|headers: http::HeaderMap, body: axum::Json<serde_json::Value>| async move {
                assert_eq!(headers[AUTHORIZATION], "Bearer sk-test");
                assert_eq!(body["model"], "deepseek-chat");
                axum::Json(json!({
                    "choices": [{"message": {"role": "assistant", "content": "pong"}, "finish_reason": "stop"}]
                }))
            }),
        );
        let (base_url, server) = serve(router).await;
        let backend = HttpBackend::new(&backend_config(base_url)).unwrap();
        let response = backend.send(&request()).await.unwrap();
        assert_eq!(response.choices[0].message.content.as_deref(), Some("pong"));
        server.abort();
    }

    #[tokio::test]
    async fn error_statuses_are_normalised() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                (
                    http::StatusCode::UNAUTHORIZED,
                    axum::Json(json!({"error": {"message": "bad key", "type": "invalid_api_key"}})),
                )
            }),
        );
        let (base_url, server) = serve(router).await;
        let backend = HttpBackend::new(&backend_config(base_url)).unwrap();
        let err = backend.send(&request()).await.unwrap_err();
        match err {
            GatewayError::Upstream { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "bad key");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        server.abort();
    }

    #[tokio::test]
    async fn rate_limit_maps_to_rate_limit_error() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async { (http::StatusCode::TOO_MANY_REQUESTS, "slow down") }),
        );
        let (base_url, server) = serve(router).await;
        let backend = HttpBackend::new(&backend_config(base_url)).unwrap();
        let err = backend.send_stream(&request()).await.unwrap_err();
        assert!(matches!(err, GatewayError::RateLimit(ref m) if m == "slow down"));
        server.abort();
    }

    #[tokio::test]
    async fn connection_refused_is_network_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let backend = HttpBackend::new(&backend_config(format!("http://{addr}/v1"))).unwrap();
        let err = backend.send(&request()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Network(_)), "{err:?}");
    }
}
