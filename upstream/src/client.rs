//! The upstream client: envelope construction, endpoint failover, and the
//! batch/stream call pair.

use serde_json::{Value, json};
use slipstream_types::{Family, InternalRequest, InternalResponse, ToolConfig};
use uuid::Uuid;

use crate::{SseLineScanner, error_snippet, http_client};

/// Envelope constants the upstream checks.
const ENVELOPE_USER_AGENT: &str = "antigravity";
const ENVELOPE_REQUEST_TYPE: &str = "agent";

/// Fixed client-identity headers.
const USER_AGENT_HEADER: &str = "antigravity/0.4.1 (external)";
const API_CLIENT_HEADER: &str = "gl-node/22.14.0";
const CLIENT_METADATA_HEADER: &str =
    r#"{"ideType":"IDE_UNSPECIFIED","platform":"PLATFORM_UNSPECIFIED","pluginType":"GEMINI"}"#;

const GENERATE_PATH: &str = "v1internal:generateContent";
const STREAM_PATH: &str = "v1internal:streamGenerateContent";

/// HTTP statuses that advance the endpoint cursor instead of failing the
/// request outright.
const FAILOVER_STATUSES: &[u16] = &[429, 500, 503, 529];

/// One upstream base URL with its configuration alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub alias: String,
    pub base_url: String,
}

/// Resolve a configuration alias to its base URL. Unknown aliases that look
/// like URLs pass through, so deployments can point at a proxy.
#[must_use]
pub fn resolve_endpoint(alias: &str) -> Option<Endpoint> {
    let base_url = match alias {
        "sandbox-daily" => "https://daily-cloudcode-pa.sandbox.googleapis.com",
        "daily" => "https://daily-cloudcode-pa.googleapis.com",
        "prod" => "https://cloudcode-pa.googleapis.com",
        other if other.starts_with("http://") || other.starts_with("https://") => other,
        _ => return None,
    };
    Some(Endpoint {
        alias: alias.to_string(),
        base_url: base_url.trim_end_matches('/').to_string(),
    })
}

/// Default failover order.
#[must_use]
pub fn default_endpoints() -> Vec<Endpoint> {
    ["sandbox-daily", "daily", "prod"]
        .into_iter()
        .filter_map(resolve_endpoint)
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("network error contacting upstream: {0}")]
    Network(#[from] reqwest::Error),
    #[error("upstream stream failed: {0}")]
    Stream(String),
}

impl UpstreamError {
    /// Error body, when one was read.
    #[must_use]
    pub fn body(&self) -> &str {
        match self {
            UpstreamError::Status { body, .. } => body,
            _ => "",
        }
    }

    /// A rate-limit response: HTTP 429 or a RESOURCE_EXHAUSTED body.
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        match self {
            UpstreamError::Status { status, body } => {
                *status == 429
                    || body.contains("429")
                    || body.contains("RESOURCE_EXHAUSTED")
            }
            _ => false,
        }
    }

    /// A rate limit that is actually a quota exhaustion; rotating accounts
    /// will not help, rotating models might.
    #[must_use]
    pub fn is_quota_exhausted(&self) -> bool {
        self.is_rate_limited() && self.body().to_ascii_uppercase().contains("QUOTA")
    }

    /// The upstream rejected the bearer token.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            UpstreamError::Status {
                status: 401 | 403,
                ..
            }
        )
    }
}

/// Client for the `v1internal` generate surface.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    endpoints: Vec<Endpoint>,
}

impl UpstreamClient {
    #[must_use]
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        let endpoints = if endpoints.is_empty() {
            default_endpoints()
        } else {
            endpoints
        };
        Self { endpoints }
    }

    /// Wrap an internal request in the upstream envelope. The request's
    /// `toolConfig` is forced to VALIDATED whenever tools are present, and
    /// `maxOutputTokens` is dropped for non-Claude families (it measurably
    /// increases throttling there).
    #[must_use]
    pub fn build_envelope(
        &self,
        model: &str,
        request: &InternalRequest,
        project_id: &str,
        family: Family,
    ) -> Value {
        let mut request = request.clone();
        if let Some(system) = &mut request.system_instruction {
            system.role = "user".to_string();
        }
        if request.tools.is_some() {
            request.tool_config = Some(ToolConfig::validated());
        }
        if family != Family::Claude
            && let Some(config) = &mut request.generation_config
        {
            config.max_output_tokens = None;
        }

        json!({
            "project": project_id,
            "model": model,
            "request": request,
            "userAgent": ENVELOPE_USER_AGENT,
            "requestId": format!("agent-{}", Uuid::new_v4()),
            "requestType": ENVELOPE_REQUEST_TYPE,
        })
    }

    fn request(&self, base_url: &str, path: &str, token: &str, body: &Value) -> reqwest::RequestBuilder {
        http_client()
            .post(format!("{base_url}/{path}"))
            .bearer_auth(token)
            .header("Content-Type", "application/json")
            .header("User-Agent", USER_AGENT_HEADER)
            .header("X-Goog-Api-Client", API_CLIENT_HEADER)
            .header("Client-Metadata", CLIENT_METADATA_HEADER)
            .json(body)
    }

    /// One batch generation, with endpoint failover.
    pub async fn generate(
        &self,
        model: &str,
        request: &InternalRequest,
        token: &str,
        project_id: &str,
        family: Family,
    ) -> Result<InternalResponse, UpstreamError> {
        let body = self.build_envelope(model, request, project_id, family);
        let response = self.send_with_failover(GENERATE_PATH, token, &body, None).await?;
        let payload: Value = response.json().await?;
        let unwrapped = unwrap_response(payload);
        serde_json::from_value(unwrapped)
            .map_err(|e| UpstreamError::Stream(format!("malformed upstream response: {e}")))
    }

    /// Open a streaming generation; chunks are pulled via
    /// [`UpstreamStream::next_chunk`]. Failover happens here, at connect
    /// time - once chunks flow the endpoint is committed.
    pub async fn stream_generate(
        &self,
        model: &str,
        request: &InternalRequest,
        token: &str,
        project_id: &str,
        family: Family,
    ) -> Result<UpstreamStream, UpstreamError> {
        let body = self.build_envelope(model, request, project_id, family);
        let response = self
            .send_with_failover(STREAM_PATH, token, &body, Some("alt=sse"))
            .await?;
        Ok(UpstreamStream::new(response))
    }

    async fn send_with_failover(
        &self,
        path: &str,
        token: &str,
        body: &Value,
        query: Option<&str>,
    ) -> Result<reqwest::Response, UpstreamError> {
        let last = self.endpoints.len().saturating_sub(1);
        for (i, endpoint) in self.endpoints.iter().enumerate() {
            let path = match query {
                Some(query) => format!("{path}?{query}"),
                None => path.to_string(),
            };
            let result = self
                .request(&endpoint.base_url, &path, token, body)
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status().as_u16();
                    if FAILOVER_STATUSES.contains(&status) && i < last {
                        tracing::warn!(
                            endpoint = %endpoint.alias,
                            status,
                            "endpoint fault, advancing to next endpoint"
                        );
                        continue;
                    }
                    let body = error_snippet(response).await;
                    return Err(UpstreamError::Status { status, body });
                }
                Err(e) => {
                    if i < last {
                        tracing::warn!(
                            endpoint = %endpoint.alias,
                            error = %e,
                            "network error, advancing to next endpoint"
                        );
                        continue;
                    }
                    return Err(UpstreamError::Network(e));
                }
            }
        }
        Err(UpstreamError::Stream("no endpoints configured".to_string()))
    }
}

/// Unwrap the `{response: …}` envelope; bare payloads pass through.
fn unwrap_response(mut payload: Value) -> Value {
    match payload.get_mut("response") {
        Some(inner) => inner.take(),
        None => payload,
    }
}

/// An open SSE stream of generation chunks.
pub struct UpstreamStream {
    response: reqwest::Response,
    scanner: SseLineScanner,
    done: bool,
}

impl UpstreamStream {
    fn new(response: reqwest::Response) -> Self {
        Self {
            response,
            scanner: SseLineScanner::default(),
            done: false,
        }
    }

    /// Next parsed chunk; `Ok(None)` when the stream is over (either the
    /// `[DONE]` marker or a clean connection close).
    pub async fn next_chunk(&mut self) -> Result<Option<InternalResponse>, UpstreamError> {
        if self.done {
            return Ok(None);
        }
        loop {
            while let Some(payload) = self.scanner.next_data_payload() {
                if payload == "[DONE]" {
                    self.done = true;
                    return Ok(None);
                }
                let value: Value = serde_json::from_str(&payload)
                    .map_err(|e| UpstreamError::Stream(format!("malformed SSE chunk: {e}")))?;
                let chunk: InternalResponse = serde_json::from_value(unwrap_response(value))
                    .map_err(|e| UpstreamError::Stream(format!("malformed SSE chunk: {e}")))?;
                return Ok(Some(chunk));
            }

            match self.response.chunk().await {
                Ok(Some(bytes)) => {
                    self.scanner.feed(&bytes);
                    if self.scanner.over_capacity() {
                        return Err(UpstreamError::Stream(
                            "SSE line exceeded the buffer bound".into(),
                        ));
                    }
                }
                Ok(None) => {
                    self.done = true;
                    return Ok(None);
                }
                Err(e) => return Err(UpstreamError::Network(e)),
            }
        }
    }
}


#[cfg(test)]
mod integration_tests {
    use super::*;
    use slipstream_types::{Content, Part};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn endpoint(server: &MockServer) -> Endpoint {
        Endpoint {
            alias: "test".to_string(),
            base_url: server.uri(),
        }
    }

    fn request() -> InternalRequest {
        InternalRequest::new(vec![Content::user(vec![Part::text("hi")])], "-1")
    }

    #[tokio::test]
    async fn generate_unwraps_the_response_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1internal:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "response": {
                    "candidates": [{
                        "content": {"role": "model", "parts": [{"text": "Hello!"}]},
                        "finishReason": "STOP"
                    }]
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = UpstreamClient::new(vec![endpoint(&server)]);
        let response = client
            .generate("gemini-2.5-pro", &request(), "token", "proj", Family::Gemini)
            .await
            .unwrap();
        assert_eq!(response.parts()[0].as_text(), Some("Hello!"));
    }

    #[tokio::test]
    async fn failover_advances_past_a_503() {
        let bad = MockServer::start().await;
        let good = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&bad)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "response": {"candidates": []}
            })))
            .expect(1)
            .mount(&good)
            .await;

        let client = UpstreamClient::new(vec![endpoint(&bad), endpoint(&good)]);
        let response = client
            .generate("gemini-2.5-pro", &request(), "token", "proj", Family::Gemini)
            .await;
        assert!(response.is_ok());
    }

    #[tokio::test]
    async fn non_failover_status_errors_immediately() {
        let server = MockServer::start().await;
        let never = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&never)
            .await;

        let client = UpstreamClient::new(vec![endpoint(&server), endpoint(&never)]);
        let error = client
            .generate("gemini-2.5-pro", &request(), "token", "proj", Family::Gemini)
            .await
            .unwrap_err();
        match error {
            UpstreamError::Status { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body, "bad request");
            }
            other => panic!("expected Status, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn last_endpoint_429_surfaces_as_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("RESOURCE_EXHAUSTED"))
            .expect(1)
            .mount(&server)
            .await;

        let client = UpstreamClient::new(vec![endpoint(&server)]);
        let error = client
            .generate("gemini-2.5-pro", &request(), "token", "proj", Family::Gemini)
            .await
            .unwrap_err();
        assert!(error.is_rate_limited());
    }

    #[tokio::test]
    async fn stream_yields_chunks_until_done() {
        let server = MockServer::start().await;
        let sse_body = concat!(
            "data: {\"response\":{\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"Hel\"}]}}]}}\n\n",
            "data: {\"response\":{\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"lo!\"}]},\"finishReason\":\"STOP\"}]}}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/v1internal:streamGenerateContent"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse_body),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = UpstreamClient::new(vec![endpoint(&server)]);
        let mut stream = client
            .stream_generate("gemini-2.5-pro", &request(), "token", "proj", Family::Gemini)
            .await
            .unwrap();

        let first = stream.next_chunk().await.unwrap().unwrap();
        assert_eq!(first.parts()[0].as_text(), Some("Hel"));
        let second = stream.next_chunk().await.unwrap().unwrap();
        assert_eq!(second.parts()[0].as_text(), Some("lo!"));
        assert!(stream.next_chunk().await.unwrap().is_none());
        // Idempotent after the end.
        assert!(stream.next_chunk().await.unwrap().is_none());
    }
}
