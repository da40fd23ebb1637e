//! Generator adapters
//!
//! A [`Generator`] turns a [`Prompt`] into a [`GenerationOutcome`]. Whatever goes
//! wrong on the way (transport, HTTP status, response body) is translated into a
//! [`GenerationFailure`] here and nowhere else. Adapters do not retry.

use crate::config::{ApiKey, GenerationConfig};
use crate::error::{RagError, Result};
use crate::prompt::Prompt;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Models tried, in order, when the configured one is not offered by the backend.
pub const FALLBACK_MODELS: &[&str] = &[
    "gemini-1.5-flash-latest",
    "gemini-1.5-flash",
    "gemini-flash-latest",
];

/// Longest backend message kept in a failure.
const MAX_MESSAGE_CHARS: usize = 300;

/// Why a generation call produced no answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum GenerationFailure {
    /// Missing, invalid or unauthorized credential
    #[error("authentication failed: {message}")]
    Auth { message: String },

    #[error("quota exhausted: {message}")]
    Quota { message: String },

    #[error("timed out")]
    Timeout,

    /// Backend unreachable or failing on its side
    #[error("backend unavailable: {message}")]
    Unavailable { message: String },

    /// Backend refused the request or blocked the prompt
    #[error("request rejected: {message}")]
    Rejected { message: String },

    #[error("malformed response: {message}")]
    MalformedResponse { message: String },

    #[error("empty response")]
    EmptyResponse,

    #[error("cancelled")]
    Cancelled,
}

impl GenerationFailure {
    pub fn reason(&self) -> &'static str {
        match self {
            GenerationFailure::Auth { .. } => "auth",
            GenerationFailure::Quota { .. } => "quota",
            GenerationFailure::Timeout => "timeout",
            GenerationFailure::Unavailable { .. } => "unavailable",
            GenerationFailure::Rejected { .. } => "rejected",
            GenerationFailure::MalformedResponse { .. } => "malformed_response",
            GenerationFailure::EmptyResponse => "empty_response",
            GenerationFailure::Cancelled => "cancelled",
        }
    }

    fn malformed(message: impl Into<String>) -> Self {
        GenerationFailure::MalformedResponse {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GenerationOutcome {
    /// Model text, verbatim
    Success { text: String },
    Failure { reason: GenerationFailure },
}

impl GenerationOutcome {
    pub fn success(text: impl Into<String>) -> Self {
        GenerationOutcome::Success { text: text.into() }
    }

    pub fn failure(reason: GenerationFailure) -> Self {
        GenerationOutcome::Failure { reason }
    }

    pub fn into_result(self) -> std::result::Result<String, GenerationFailure> {
        match self {
            GenerationOutcome::Success { text } => Ok(text),
            GenerationOutcome::Failure { reason } => Err(reason),
        }
    }
}

/// A generative language model behind a single call.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &Prompt) -> GenerationOutcome;

    fn model_id(&self) -> &str;
}

/// Google Gemini `generateContent` over HTTPS.
pub struct GeminiGenerator {
    client: Client,
    api_base: String,
    api_key: ApiKey,
    model: String,
}

impl std::fmt::Debug for GeminiGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiGenerator")
            .field("api_base", &self.api_base)
            .field("api_key", &self.api_key)
            .field("model", &self.model)
            .finish()
    }
}

impl GeminiGenerator {
    /// Build a client with the configured timeout. The timeout covers the whole
    /// request, from connect to the last byte of the body.
    pub fn new(config: &GenerationConfig, api_key: ApiKey) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RagError::config(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            model: strip_model_prefix(&config.model).to_string(),
        })
    }

    pub fn with_model(self, model: impl AsRef<str>) -> Self {
        Self {
            model: strip_model_prefix(model.as_ref()).to_string(),
            ..self
        }
    }

    /// Models that support `generateContent`, without the `models/` prefix.
    pub async fn list_models(&self) -> std::result::Result<Vec<String>, GenerationFailure> {
        let mut models = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get(format!("{}/v1beta/models", self.api_base))
                .header("x-goog-api-key", self.api_key.expose())
                .query(&[("pageSize", "1000")]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let body = send(request).await?;
            let page: ModelList = serde_json::from_str(&body)
                .map_err(|e| GenerationFailure::malformed(format!("model list: {e}")))?;

            models.extend(
                page.models
                    .into_iter()
                    .filter(|m| {
                        m.supported_generation_methods
                            .iter()
                            .any(|method| method == "generateContent")
                    })
                    .map(|m| strip_model_prefix(&m.name).to_string()),
            );

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        tracing::debug!("Backend offers {} generateContent models", models.len());
        Ok(models)
    }

    /// Switch to the best available model: the configured one if offered, else the
    /// first offered entry of [`FALLBACK_MODELS`], else whatever the backend lists first.
    pub async fn select_available_model(self) -> std::result::Result<Self, GenerationFailure> {
        let available = self.list_models().await?;
        match choose_model(&self.model, &available) {
            Some(chosen) if chosen != self.model => {
                tracing::warn!(
                    "Model '{}' is not available, using '{}'",
                    self.model,
                    chosen
                );
                Ok(self.with_model(chosen))
            }
            Some(_) => Ok(self),
            None => Err(GenerationFailure::Rejected {
                message: "backend offers no generateContent models".to_string(),
            }),
        }
    }
}

#[async_trait]
impl Generator for GeminiGenerator {
    async fn generate(&self, prompt: &Prompt) -> GenerationOutcome {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.api_base, self.model
        );
        let body = GenerateRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(prompt.as_str().to_string()),
                }],
            }],
        };

        let request = self
            .client
            .post(url)
            .header("x-goog-api-key", self.api_key.expose())
            .json(&body);

        tracing::debug!(model = %self.model, chars = prompt.as_str().len(), "Calling generateContent");
        let outcome = match send(request).await {
            Ok(body) => parse_response(&body),
            Err(failure) => Err(failure),
        };

        match outcome {
            Ok(text) => GenerationOutcome::success(text),
            Err(reason) => {
                tracing::warn!(reason = reason.reason(), "Generation failed: {}", reason);
                GenerationOutcome::failure(reason)
            }
        }
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

/// Send a request and return the body of a successful response.
async fn send(request: reqwest::RequestBuilder) -> std::result::Result<String, GenerationFailure> {
    let response = request.send().await.map_err(|e| classify_transport(&e))?;
    let status = response.status();
    let body = response.text().await.map_err(|e| classify_transport(&e))?;
    if status.is_success() {
        Ok(body)
    } else {
        Err(classify_status(status, &body))
    }
}

fn classify_transport(error: &reqwest::Error) -> GenerationFailure {
    if error.is_timeout() {
        GenerationFailure::Timeout
    } else if error.is_decode() || error.is_body() {
        GenerationFailure::malformed(error.to_string())
    } else {
        GenerationFailure::Unavailable {
            message: error.to_string(),
        }
    }
}

/// Map a non-success HTTP status onto a failure reason.
pub fn classify_status(status: StatusCode, body: &str) -> GenerationFailure {
    let message = error_message(status, body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GenerationFailure::Auth { message },
        // An invalid key is reported as a 400 with this marker.
        StatusCode::BAD_REQUEST if body.contains("API_KEY_INVALID") => {
            GenerationFailure::Auth { message }
        }
        StatusCode::TOO_MANY_REQUESTS => GenerationFailure::Quota { message },
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => GenerationFailure::Timeout,
        s if s.is_server_error() => GenerationFailure::Unavailable { message },
        _ => GenerationFailure::Rejected { message },
    }
}

fn error_message(status: StatusCode, body: &str) -> String {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .map(|b| b.error.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.trim().to_string());
    let message: String = message.chars().take(MAX_MESSAGE_CHARS).collect();
    if message.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {message}")
    }
}

/// Extract the answer text from a `generateContent` response body.
pub fn parse_response(body: &str) -> std::result::Result<String, GenerationFailure> {
    let response: GenerateResponse =
        serde_json::from_str(body).map_err(|e| GenerationFailure::malformed(e.to_string()))?;

    let Some(candidate) = response.candidates.into_iter().next() else {
        return Err(match response.prompt_feedback.and_then(|f| f.block_reason) {
            Some(reason) => GenerationFailure::Rejected {
                message: format!("prompt blocked: {reason}"),
            },
            None => GenerationFailure::malformed("no candidates in response"),
        });
    };

    let text: String = candidate
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect()
        })
        .unwrap_or_default();

    if !text.is_empty() {
        return Ok(text);
    }
    match candidate.finish_reason.as_deref() {
        Some(reason @ ("SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT")) => {
            Err(GenerationFailure::Rejected {
                message: format!("response blocked: {reason}"),
            })
        }
        _ => Err(GenerationFailure::EmptyResponse),
    }
}

/// Pick a model from `available` (ids without the `models/` prefix).
pub fn choose_model(preferred: &str, available: &[String]) -> Option<String> {
    let preferred = strip_model_prefix(preferred);
    std::iter::once(preferred)
        .chain(FALLBACK_MODELS.iter().copied())
        .find(|candidate| available.iter().any(|m| m.as_str() == *candidate))
        .map(str::to_string)
        .or_else(|| available.first().cloned())
}

fn strip_model_prefix(model: &str) -> &str {
    model.strip_prefix("models/").unwrap_or(model)
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelList {
    #[serde(default)]
    models: Vec<ModelEntry>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelEntry {
    name: String,
    #[serde(default)]
    supported_generation_methods: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_response_joins_parts() {
        let body = r#"{
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Know the enemy"}, {"text": ", know yourself."}]},
                "finishReason": "STOP"
            }]
        }"#;
        assert_eq!(
            parse_response(body).unwrap(),
            "Know the enemy, know yourself."
        );
    }

    #[test]
    fn test_parse_response_failures() {
        assert!(matches!(
            parse_response("not json"),
            Err(GenerationFailure::MalformedResponse { .. })
        ));
        assert!(matches!(
            parse_response(r#"{"candidates": []}"#),
            Err(GenerationFailure::MalformedResponse { .. })
        ));
        assert!(matches!(
            parse_response(r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#),
            Err(GenerationFailure::Rejected { .. })
        ));
        assert_eq!(
            parse_response(r#"{"candidates": [{"content": {"parts": []}, "finishReason": "STOP"}]}"#),
            Err(GenerationFailure::EmptyResponse)
        );
        assert!(matches!(
            parse_response(r#"{"candidates": [{"finishReason": "SAFETY"}]}"#),
            Err(GenerationFailure::Rejected { .. })
        ));
    }

    #[test]
    fn test_classify_status() {
        let invalid_key = r#"{"error": {"code": 400, "message": "API key not valid.", "status": "INVALID_ARGUMENT", "details": [{"reason": "API_KEY_INVALID"}]}}"#;
        assert_eq!(
            classify_status(StatusCode::BAD_REQUEST, invalid_key).reason(),
            "auth"
        );
        assert_eq!(classify_status(StatusCode::FORBIDDEN, "").reason(), "auth");
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, "{}").reason(),
            "quota"
        );
        assert_eq!(
            classify_status(StatusCode::GATEWAY_TIMEOUT, "").reason(),
            "timeout"
        );
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE, "").reason(),
            "unavailable"
        );
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND, "no such model").reason(),
            "rejected"
        );
    }

    #[test]
    fn test_error_message_prefers_backend_message() {
        let failure = classify_status(
            StatusCode::TOO_MANY_REQUESTS,
            r#"{"error": {"message": "Resource has been exhausted"}}"#,
        );
        assert_eq!(
            failure,
            GenerationFailure::Quota {
                message: "429 Too Many Requests: Resource has been exhausted".to_string()
            }
        );
    }

    #[test]
    fn test_choose_model() {
        let available: Vec<String> = ["gemini-pro", "gemini-1.5-flash", "gemini-flash-latest"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(
            choose_model("models/gemini-pro", &available).as_deref(),
            Some("gemini-pro")
        );
        assert_eq!(
            choose_model("gemini-ultra", &available).as_deref(),
            Some("gemini-1.5-flash")
        );
        assert_eq!(
            choose_model("gemini-ultra", &["other".to_string()]).as_deref(),
            Some("other")
        );
        assert_eq!(choose_model("gemini-ultra", &[]), None);
    }

    #[test]
    fn test_debug_redacts_key() {
        let generator = GeminiGenerator::new(
            &GenerationConfig::default(),
            ApiKey::new("secret-key-123"),
        )
        .unwrap();
        let debug = format!("{generator:?}");
        assert!(!debug.contains("secret-key-123"));
        assert!(debug.contains("gemini-1.5-flash"));
    }

    /// Serve one canned HTTP response and return the raw request that was received.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            request
        });
        (base, handle)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn generator_for(base: &str, timeout_secs: u64) -> GeminiGenerator {
        let config = GenerationConfig {
            api_base: base.to_string(),
            timeout_secs,
            ..GenerationConfig::default()
        };
        GeminiGenerator::new(&config, ApiKey::new("test-key")).unwrap()
    }

    #[tokio::test]
    async fn test_generate_success_over_http() {
        let (base, server) = serve_once(
            "200 OK",
            r#"{"candidates": [{"content": {"parts": [{"text": "Attack where they are unprepared."}]}}]}"#,
        )
        .await;
        let outcome = generator_for(&base, 10)
            .generate(&Prompt::new("How to attack?"))
            .await;
        assert_eq!(
            outcome,
            GenerationOutcome::success("Attack where they are unprepared.")
        );

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /v1beta/models/gemini-1.5-flash:generateContent"));
        assert!(request.to_ascii_lowercase().contains("x-goog-api-key: test-key"));
        assert!(request.contains("How to attack?"));
    }

    #[tokio::test]
    async fn test_generate_auth_failure_over_http() {
        let (base, _server) = serve_once(
            "403 Forbidden",
            r#"{"error": {"code": 403, "message": "Permission denied", "status": "PERMISSION_DENIED"}}"#,
        )
        .await;
        let outcome = generator_for(&base, 10)
            .generate(&Prompt::new("q"))
            .await;
        match outcome {
            GenerationOutcome::Failure { reason } => assert_eq!(reason.reason(), "auth"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_generate_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        // Accept and hold the connection without ever answering.
        let _server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let outcome = generator_for(&base, 1).generate(&Prompt::new("q")).await;
        assert_eq!(
            outcome,
            GenerationOutcome::failure(GenerationFailure::Timeout)
        );
    }

    #[tokio::test]
    async fn test_unreachable_backend() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let outcome = generator_for(&base, 5).generate(&Prompt::new("q")).await;
        match outcome {
            GenerationOutcome::Failure { reason } => assert_eq!(reason.reason(), "unavailable"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_list_models_filters_generate_content() {
        let (base, _server) = serve_once(
            "200 OK",
            r#"{"models": [
                {"name": "models/embedding-001", "supportedGenerationMethods": ["embedContent"]},
                {"name": "models/gemini-1.5-flash", "supportedGenerationMethods": ["generateContent", "countTokens"]}
            ]}"#,
        )
        .await;
        let models = generator_for(&base, 10).list_models().await.unwrap();
        assert_eq!(models, vec!["gemini-1.5-flash".to_string()]);
    }
}
