use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Clone, Debug)]
pub struct OpenAiClientConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub default_timeout: Duration,
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_error_body_bytes: usize,
}

impl OpenAiClientConfig {
    /// Reads the `AZURE_*` variables. Blank values count as unset; numbers
    /// that do not parse are rejected.
    pub fn from_env() -> Result<Self, OpenAiClientError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, OpenAiClientError> {
        let get = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        let base_url = get("AZURE_ENDPOINT")
            .unwrap_or_else(|| "https://models.inference.ai.azure.com".to_string());
        let api_key = get("AZURE_API_KEY");

        let default_timeout = Duration::from_secs(parse_var(&get, "AZURE_TIMEOUT_SECS", 60)?);
        let max_retries = parse_var(&get, "AZURE_MAX_RETRIES", 0)?;
        let initial_backoff = Duration::from_millis(parse_var(&get, "AZURE_RETRY_INITIAL_MS", 200)?);
        let max_backoff = Duration::from_millis(parse_var(&get, "AZURE_RETRY_MAX_MS", 5_000)?);
        let max_error_body_bytes = parse_var(&get, "AZURE_MAX_ERROR_BODY_BYTES", 8 * 1024)?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            default_timeout,
            max_retries,
            initial_backoff,
            max_backoff,
            max_error_body_bytes,
        })
    }
}

fn parse_var<T: std::str::FromStr>(
    get: impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, OpenAiClientError> {
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| {
                OpenAiClientError::InvalidConfig(format!(
                    "{key} must be a non-negative integer, got {raw:?}"
                ))
            }),
        None => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OpenAiClientError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid response JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("upstream returned error: status={status} message={message}")]
    Upstream { status: StatusCode, message: String },

    #[error("upstream returned non-JSON error: status={status} body={body}")]
    UpstreamBody { status: StatusCode, body: String },

    #[error("invalid client configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Clone)]
pub struct OpenAiClient {
    config: OpenAiClientConfig,
    http: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(config: OpenAiClientConfig) -> Result<Self, OpenAiClientError> {
        let http = reqwest::Client::builder()
            .user_agent("care-assistant")
            .build()?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &OpenAiClientConfig {
        &self.config
    }

    pub async fn chat_completions(
        &self,
        request: ChatCompletionRequest,
        timeout_override: Option<Duration>,
    ) -> Result<ChatCompletionResponse, OpenAiClientError> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let timeout = timeout_override.unwrap_or(self.config.default_timeout);
        self.request_with_retry(|| {
            let req = request.clone();
            let url = url.clone();
            async move {
                let mut builder = self.http.post(&url).timeout(timeout).json(&req);
                if let Some(key) = &self.config.api_key {
                    builder = builder.bearer_auth(key);
                }
                let resp = builder.send().await?;
                Self::parse_json_response(resp, self.config.max_error_body_bytes).await
            }
        })
        .await
    }

    async fn parse_json_response<T: for<'de> Deserialize<'de>>(
        resp: reqwest::Response,
        max_error_body_bytes: usize,
    ) -> Result<T, OpenAiClientError> {
        if resp.status().is_success() {
            let bytes = resp.bytes().await?;
            return Ok(serde_json::from_slice::<T>(&bytes)?);
        }
        Err(Self::to_upstream_error(resp, max_error_body_bytes).await)
    }

    async fn to_upstream_error(
        resp: reqwest::Response,
        max_error_body_bytes: usize,
    ) -> OpenAiClientError {
        let status = resp.status();
        let body = read_limited_text(resp, max_error_body_bytes).await;
        upstream_error(status, body)
    }

    async fn request_with_retry<T, Fut, F>(&self, mut f: F) -> Result<T, OpenAiClientError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, OpenAiClientError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match f().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    if attempt > self.config.max_retries || !should_retry(&e) {
                        return Err(e);
                    }
                    let delay = backoff_delay(
                        self.config.initial_backoff,
                        self.config.max_backoff,
                        attempt - 1,
                    );
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "completion request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Prefer the `error.message` of an OpenAI-style envelope over the raw body.
fn upstream_error(status: StatusCode, body: String) -> OpenAiClientError {
    if let Ok(parsed) = serde_json::from_str::<OpenAiErrorEnvelope>(&body) {
        let message = parsed
            .error
            .message
            .unwrap_or_else(|| "unknown upstream error".to_string());
        return OpenAiClientError::Upstream { status, message };
    }
    OpenAiClientError::UpstreamBody { status, body }
}

fn should_retry(err: &OpenAiClientError) -> bool {
    match err {
        OpenAiClientError::Request(e) => e.is_timeout() || e.is_connect(),
        OpenAiClientError::Upstream { status, .. }
        | OpenAiClientError::UpstreamBody { status, .. } => {
            *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
        }
        OpenAiClientError::InvalidJson(_) | OpenAiClientError::InvalidConfig(_) => false,
    }
}

fn backoff_delay(initial: Duration, max: Duration, exponent: u32) -> Duration {
    let mult = 1u128.checked_shl(exponent).unwrap_or(u128::MAX);
    let base_ms = initial.as_millis().saturating_mul(mult);
    let capped_ms = std::cmp::min(base_ms, max.as_millis()) as u64;
    let jitter_cap = std::cmp::max(1, capped_ms / 4);
    let jitter_ms = pseudo_jitter_ms(jitter_cap);
    Duration::from_millis(capped_ms.saturating_add(jitter_ms))
}

fn pseudo_jitter_ms(max_inclusive: u64) -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0));
    let nanos = now.subsec_nanos() as u64;
    nanos % (max_inclusive + 1)
}

async fn read_limited_text(resp: reqwest::Response, max_bytes: usize) -> String {
    match resp.bytes().await {
        Ok(mut b) => {
            if b.len() > max_bytes {
                b.truncate(max_bytes);
            }
            String::from_utf8_lossy(&b).to_string()
        }
        Err(e) => {
            warn!(error = %e, "failed to read upstream error body");
            "<failed to read error body>".to_string()
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorEnvelope {
    error: OpenAiErrorObject,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorObject {
    message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Message body: a plain string, or an array of typed parts for vision input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(content: MessageContent) -> Self {
        Self {
            role: Role::User,
            content,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: Option<String>,
    pub choices: Vec<ChatCompletionChoice>,
    pub usage: Option<ChatCompletionUsage>,
}

impl ChatCompletionResponse {
    /// Content of the first choice, if the upstream returned any.
    pub fn first_content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.content.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionChoice {
    pub index: Option<u32>,
    pub message: ChatCompletionMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionMessage {
    pub role: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionUsage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn vision_message_serializes_as_content_parts() {
        let msg = Message::user(MessageContent::Parts(vec![
            ContentPart::Text {
                text: "What is this?".to_string(),
            },
            ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: "data:image/png;base64,AAAA".to_string(),
                },
            },
        ]));

        let value = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(
            value,
            json!({
                "role": "user",
                "content": [
                    { "type": "text", "text": "What is this?" },
                    { "type": "image_url", "image_url": { "url": "data:image/png;base64,AAAA" } }
                ]
            })
        );
    }

    #[test]
    fn request_omits_unset_decoding_fields() {
        let req = ChatCompletionRequest {
            model: "gpt-4o".to_string(),
            messages: vec![Message::system("be brief")],
            temperature: Some(0.7),
            top_p: None,
            max_tokens: Some(150),
        };
        let value = serde_json::to_value(&req).expect("serialize");
        assert_eq!(value["messages"][0], json!({ "role": "system", "content": "be brief" }));
        assert_eq!(value["max_tokens"], json!(150));
        assert!(value.get("top_p").is_none());
    }

    #[test]
    fn first_content_reads_first_choice() {
        let resp: ChatCompletionResponse = serde_json::from_value(json!({
            "id": "cmpl-1",
            "choices": [
                { "index": 0, "message": { "role": "assistant", "content": "Rest and fluids." }, "finish_reason": "stop" }
            ]
        }))
        .expect("deserialize");
        assert_eq!(resp.first_content(), Some("Rest and fluids."));
    }

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    fn client_with_retries(max_retries: u32) -> OpenAiClient {
        let mut config = OpenAiClientConfig::from_lookup(lookup(&[])).expect("config");
        config.max_retries = max_retries;
        config.initial_backoff = Duration::from_millis(1);
        config.max_backoff = Duration::from_millis(2);
        OpenAiClient::new(config).expect("client")
    }

    fn upstream(status: StatusCode) -> OpenAiClientError {
        OpenAiClientError::Upstream {
            status,
            message: "boom".to_string(),
        }
    }

    #[test]
    fn config_defaults_apply_when_unset() {
        let config =
            OpenAiClientConfig::from_lookup(lookup(&[("AZURE_MAX_RETRIES", "  ")])).expect("config");
        assert_eq!(config.base_url, "https://models.inference.ai.azure.com");
        assert_eq!(config.api_key, None);
        assert_eq!(config.default_timeout, Duration::from_secs(60));
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.initial_backoff, Duration::from_millis(200));
        assert_eq!(config.max_backoff, Duration::from_millis(5_000));
        assert_eq!(config.max_error_body_bytes, 8 * 1024);
    }

    #[test]
    fn config_overrides_are_read() {
        let config = OpenAiClientConfig::from_lookup(lookup(&[
            ("AZURE_ENDPOINT", "https://example.azure.com/"),
            ("AZURE_API_KEY", "secret"),
            ("AZURE_TIMEOUT_SECS", "5"),
            ("AZURE_MAX_RETRIES", "2"),
        ]))
        .expect("config");
        assert_eq!(config.base_url, "https://example.azure.com");
        assert_eq!(config.api_key.as_deref(), Some("secret"));
        assert_eq!(config.default_timeout, Duration::from_secs(5));
        assert_eq!(config.max_retries, 2);
    }

    #[test]
    fn invalid_config_numbers_are_errors() {
        for (key, value) in [
            ("AZURE_TIMEOUT_SECS", "sixty"),
            ("AZURE_MAX_RETRIES", "-1"),
            ("AZURE_RETRY_INITIAL_MS", "1.5"),
            ("AZURE_RETRY_MAX_MS", "soon"),
            ("AZURE_MAX_ERROR_BODY_BYTES", "8k"),
        ] {
            let err = OpenAiClientConfig::from_lookup(lookup(&[(key, value)])).expect_err(key);
            assert!(matches!(&err, OpenAiClientError::InvalidConfig(msg) if msg.contains(key)));
        }
    }

    #[test]
    fn error_envelope_message_is_extracted() {
        let err = upstream_error(
            StatusCode::TOO_MANY_REQUESTS,
            r#"{"error": {"code": "429", "message": "Rate limit exceeded for gpt-4o"}}"#.to_string(),
        );
        assert!(matches!(
            &err,
            OpenAiClientError::Upstream { status, message }
                if *status == StatusCode::TOO_MANY_REQUESTS && message == "Rate limit exceeded for gpt-4o"
        ));
        assert!(err.to_string().contains("Rate limit exceeded"));

        let err = upstream_error(StatusCode::BAD_REQUEST, r#"{"error": {}}"#.to_string());
        assert!(matches!(&err, OpenAiClientError::Upstream { message, .. } if message == "unknown upstream error"));
    }

    #[test]
    fn non_json_error_body_is_kept_verbatim() {
        let err = upstream_error(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>".to_string());
        assert!(matches!(
            &err,
            OpenAiClientError::UpstreamBody { status, body }
                if *status == StatusCode::BAD_GATEWAY && body == "<html>bad gateway</html>"
        ));
    }

    #[test]
    fn retry_rule_covers_throttling_and_server_errors() {
        assert!(should_retry(&upstream(StatusCode::TOO_MANY_REQUESTS)));
        assert!(should_retry(&upstream(StatusCode::INTERNAL_SERVER_ERROR)));
        assert!(should_retry(&OpenAiClientError::UpstreamBody {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: String::new(),
        }));
        assert!(!should_retry(&upstream(StatusCode::BAD_REQUEST)));
        assert!(!should_retry(&upstream(StatusCode::UNAUTHORIZED)));
        let invalid = serde_json::from_str::<serde_json::Value>("{").expect_err("invalid json");
        assert!(!should_retry(&OpenAiClientError::InvalidJson(invalid)));
    }

    #[tokio::test]
    async fn zero_retries_makes_a_single_attempt() {
        let client = client_with_retries(0);
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = client
            .request_with_retry(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(upstream(StatusCode::SERVICE_UNAVAILABLE)) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retryable_failures_are_retried_up_to_the_limit() {
        let client = client_with_retries(2);
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = client
            .request_with_retry(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(upstream(StatusCode::TOO_MANY_REQUESTS)) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let client = client_with_retries(3);
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = client
            .request_with_retry(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(upstream(StatusCode::BAD_REQUEST)) }
            })
            .await;
        assert!(matches!(result, Err(OpenAiClientError::Upstream { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn success_after_a_retry_is_returned() {
        let client = client_with_retries(2);
        let attempts = AtomicU32::new(0);
        let result = client
            .request_with_retry(|| {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(upstream(StatusCode::INTERNAL_SERVER_ERROR))
                    } else {
                        Ok("answer")
                    }
                }
            })
            .await
            .expect("second attempt succeeds");
        assert_eq!(result, "answer");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn backoff_is_capped() {
        let delay = backoff_delay(Duration::from_millis(200), Duration::from_millis(1_000), 10);
        assert!(delay >= Duration::from_millis(1_000));
        assert!(delay <= Duration::from_millis(1_250));
    }
}
