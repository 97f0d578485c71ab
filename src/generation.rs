//! Generation backends: turn assembled context plus a question into an answer.
//!
//! Two remote backends are provided:
//! - **[`GeminiBackend`]**: Google Generative Language API
//!   (`models/{model}:generateContent`, and `:streamGenerateContent?alt=sse`
//!   for streaming).
//! - **[`OpenAiBackend`]**: OpenAI-compatible `chat/completions`. Pointing
//!   `base_url` at an Ollama or vLLM server works too.
//!
//! Both send [`prompt::system_prompt`] as the system turn and
//! [`prompt::user_prompt`] as the user turn. Streaming responses are
//! server-sent events, decoded by [`SseDecoder`] across network chunk
//! boundaries.

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::error::{Error, Result};
use crate::prompt;

/// Lazily produced answer fragments.
pub type AnswerStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Input to a generation call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub context: String,
    pub question: String,
}

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn model_name(&self) -> &str;

    /// Produce the complete answer.
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;

    /// Produce the answer as a stream of text fragments.
    async fn generate_stream(&self, request: &GenerationRequest) -> Result<AnswerStream>;
}

/// Create the configured backend. Fails with [`Error::Config`] when the
/// API key variable is unset, before any request is made.
pub fn create_backend(config: &GenerationConfig) -> Result<Arc<dyn GenerationBackend>> {
    match config.provider.as_str() {
        "gemini" => Ok(Arc::new(GeminiBackend::new(config)?)),
        "openai" => Ok(Arc::new(OpenAiBackend::new(config)?)),
        other => Err(Error::config(format!(
            "unknown generation provider: {}",
            other
        ))),
    }
}

fn read_api_key(config: &GenerationConfig, default_var: &str) -> Result<String> {
    let var = config.api_key_env.as_deref().unwrap_or(default_var);
    match std::env::var(var) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(Error::config(format!(
            "{} environment variable not set (required by the {} generation backend)",
            var, config.provider
        ))),
    }
}

fn build_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Error::generation(format!("failed to build HTTP client: {}", e)))
}

async fn send_checked(request: reqwest::RequestBuilder, label: &str) -> Result<reqwest::Response> {
    let response = request
        .send()
        .await
        .map_err(|e| Error::generation(format!("{} request failed: {}", label, e)))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::generation(format!(
            "{} returned HTTP {}: {}",
            label, status, body
        )));
    }
    Ok(response)
}

// ============ Server-sent events ============

/// Incremental decoder for `text/event-stream` bodies.
///
/// Bytes are buffered until a full line is available, so events split across
/// network chunks (including inside a multi-byte character) decode intact.
/// Each `data:` line is yielded as one payload.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    /// Feed raw bytes, returning any `data:` payloads completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.trim_start().to_string());
            }
        }
        payloads
    }
}

/// Map a byte stream of SSE frames into answer fragments using `extract`,
/// which returns `Ok(None)` for payloads that carry no text.
fn sse_text_stream<S, B, E, F>(bytes: S, extract: F) -> AnswerStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
    F: Fn(&str) -> Result<Option<String>> + Send + 'static,
{
    let mut decoder = SseDecoder::default();
    let stream = bytes.flat_map(move |chunk| {
        let items: Vec<Result<String>> = match chunk {
            Ok(bytes) => decoder
                .push(bytes.as_ref())
                .iter()
                .filter_map(|data| extract(data).transpose())
                .collect(),
            Err(e) => vec![Err(Error::generation(format!("stream interrupted: {}", e)))],
        };
        futures_util::stream::iter(items)
    });
    Box::pin(stream)
}

// ============ Gemini ============

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const GEMINI_DEFAULT_MODEL: &str = "gemini-2.5-flash-lite";

pub struct GeminiBackend {
    model: String,
    base_url: String,
    api_key: String,
    temperature: f32,
    max_output_tokens: Option<u32>,
    client: reqwest::Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    system_instruction: GeminiContent,
    contents: Vec<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Serialize, Deserialize, Default)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    prompt_feedback: Option<serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

impl GeminiResponse {
    /// Concatenated text of the first candidate, if it has any.
    fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content.parts.iter().map(|p| p.text.as_str()).collect();
        (!text.is_empty()).then_some(text)
    }

    fn describe_empty(&self) -> String {
        if let Some(feedback) = &self.prompt_feedback {
            return format!("prompt blocked: {}", feedback);
        }
        match self.candidates.first().and_then(|c| c.finish_reason.as_deref()) {
            Some(reason) => format!("no text in response (finish reason {})", reason),
            None => "no text in response".to_string(),
        }
    }
}

impl GeminiBackend {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = read_api_key(config, "GOOGLE_API_KEY")?;
        Ok(Self {
            model: config
                .model
                .clone()
                .unwrap_or_else(|| GEMINI_DEFAULT_MODEL.to_string()),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| GEMINI_BASE_URL.to_string()),
            api_key,
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            client: build_client(config.timeout_secs)?,
        })
    }

    fn body(&self, request: &GenerationRequest) -> GeminiRequest {
        GeminiRequest {
            system_instruction: GeminiContent {
                role: None,
                parts: vec![GeminiPart {
                    text: prompt::system_prompt(&request.context),
                }],
            },
            contents: vec![GeminiContent {
                role: Some("user".to_string()),
                parts: vec![GeminiPart {
                    text: prompt::user_prompt(&request.question),
                }],
            }],
            generation_config: GeminiGenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
            },
        }
    }

    fn endpoint(&self, method: &str) -> String {
        format!(
            "{}/models/{}:{}",
            self.base_url.trim_end_matches('/'),
            self.model,
            method
        )
    }
}

#[async_trait]
impl GenerationBackend for GeminiBackend {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let http = self
            .client
            .post(self.endpoint("generateContent"))
            .header("x-goog-api-key", &self.api_key)
            .json(&self.body(request));
        let response: GeminiResponse = send_checked(http, "Gemini")
            .await?
            .json()
            .await
            .map_err(|e| Error::generation(format!("failed to parse Gemini response: {}", e)))?;

        response
            .text()
            .ok_or_else(|| Error::generation(format!("Gemini {}", response.describe_empty())))
    }

    async fn generate_stream(&self, request: &GenerationRequest) -> Result<AnswerStream> {
        let http = self
            .client
            .post(format!("{}?alt=sse", self.endpoint("streamGenerateContent")))
            .header("x-goog-api-key", &self.api_key)
            .json(&self.body(request));
        let response = send_checked(http, "Gemini").await?;
        Ok(sse_text_stream(response.bytes_stream(), parse_gemini_event))
    }
}

fn parse_gemini_event(data: &str) -> Result<Option<String>> {
    let event: GeminiResponse = serde_json::from_str(data)
        .map_err(|e| Error::generation(format!("malformed Gemini stream event: {}", e)))?;
    Ok(event.text())
}

// ============ OpenAI-compatible ============

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OPENAI_DEFAULT_MODEL: &str = "gpt-4o-mini";

pub struct OpenAiBackend {
    model: String,
    base_url: String,
    api_key: String,
    temperature: f32,
    max_output_tokens: Option<u32>,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    #[serde(default)]
    message: Option<ChatContent>,
    #[serde(default)]
    delta: Option<ChatContent>,
}

#[derive(Deserialize)]
struct ChatContent {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiBackend {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = read_api_key(config, "OPENAI_API_KEY")?;
        Ok(Self {
            model: config
                .model
                .clone()
                .unwrap_or_else(|| OPENAI_DEFAULT_MODEL.to_string()),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            api_key,
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            client: build_client(config.timeout_secs)?,
        })
    }

    fn body(&self, request: &GenerationRequest, stream: bool) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: prompt::system_prompt(&request.context),
                },
                ChatMessage {
                    role: "user",
                    content: prompt::user_prompt(&request.question),
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_output_tokens,
            stream,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl GenerationBackend for OpenAiBackend {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let http = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&self.body(request, false));
        let response: ChatResponse = send_checked(http, "OpenAI")
            .await?
            .json()
            .await
            .map_err(|e| Error::generation(format!("failed to parse OpenAI response: {}", e)))?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .filter(|text| !text.is_empty())
            .ok_or_else(|| Error::generation("OpenAI returned no answer text"))
    }

    async fn generate_stream(&self, request: &GenerationRequest) -> Result<AnswerStream> {
        let http = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&self.body(request, true));
        let response = send_checked(http, "OpenAI").await?;
        Ok(sse_text_stream(response.bytes_stream(), parse_openai_event))
    }
}

fn parse_openai_event(data: &str) -> Result<Option<String>> {
    if data == "[DONE]" {
        return Ok(None);
    }
    let event: ChatResponse = serde_json::from_str(data)
        .map_err(|e| Error::generation(format!("malformed OpenAI stream event: {}", e)))?;
    Ok(event
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta)
        .and_then(|d| d.content)
        .filter(|text| !text.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_decoder_handles_split_events() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: {\"a\":").is_empty());
        assert_eq!(decoder.push(b"1}\r\n\r\ndata: x\n"), vec!["{\"a\":1}", "x"]);
        assert!(decoder.push(b": comment\nevent: ping\n\n").is_empty());
    }

    #[test]
    fn test_sse_decoder_multibyte_split() {
        let mut decoder = SseDecoder::default();
        let bytes = "data: café\n".as_bytes();
        let (a, b) = bytes.split_at(bytes.len() - 2);
        assert!(decoder.push(a).is_empty());
        assert_eq!(decoder.push(b), vec!["café"]);
    }

    #[tokio::test]
    async fn test_sse_text_stream_collects_fragments() {
        let frames: Vec<std::result::Result<Vec<u8>, String>> = vec![
            Ok(b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hel\"}]}}]}\n\n".to_vec()),
            Ok(b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"te".to_vec()),
            Ok(b"xt\":\"lo\"}]}}]}\n\ndata: {\"candidates\":[{\"finishReason\":\"STOP\"}]}\n\n".to_vec()),
        ];
        let stream = sse_text_stream(futures_util::stream::iter(frames), parse_gemini_event);
        let parts: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(parts, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn test_sse_text_stream_surfaces_transport_error() {
        let frames: Vec<std::result::Result<Vec<u8>, String>> =
            vec![Err("connection reset".to_string())];
        let mut stream = sse_text_stream(futures_util::stream::iter(frames), parse_openai_event);
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Generation(_)));
    }

    #[test]
    fn test_parse_openai_event() {
        assert_eq!(parse_openai_event("[DONE]").unwrap(), None);
        let chunk = r#"{"choices":[{"delta":{"content":"Hi"}}]}"#;
        assert_eq!(parse_openai_event(chunk).unwrap(), Some("Hi".to_string()));
        let role_only = r#"{"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_openai_event(role_only).unwrap(), None);
        assert!(parse_openai_event("{not json").is_err());
    }

    #[test]
    fn test_gemini_response_text_and_blocked() {
        let ok: GeminiResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"A"},{"text":"B"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(ok.text(), Some("AB".to_string()));

        let blocked: GeminiResponse =
            serde_json::from_str(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#).unwrap();
        assert_eq!(blocked.text(), None);
        assert!(blocked.describe_empty().contains("SAFETY"));
    }

    #[test]
    fn test_gemini_request_shape() {
        let config = GenerationConfig {
            api_key_env: Some("KA_TEST_GEMINI_KEY_SHAPE".to_string()),
            ..GenerationConfig::default()
        };
        std::env::set_var("KA_TEST_GEMINI_KEY_SHAPE", "k");
        let backend = GeminiBackend::new(&config).unwrap();
        let body = serde_json::to_value(backend.body(&GenerationRequest {
            context: "CTX".to_string(),
            question: "Q?".to_string(),
        }))
        .unwrap();
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "Question: Q?");
        assert!(body["systemInstruction"]["parts"][0]["text"]
            .as_str()
            .unwrap()
            .contains("CTX"));
        assert!(body["generationConfig"].get("maxOutputTokens").is_none());
        assert_eq!(backend.model_name(), "gemini-2.5-flash-lite");
        assert_eq!(
            backend.endpoint("generateContent"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash-lite:generateContent"
        );
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let config = GenerationConfig {
            api_key_env: Some("KA_TEST_KEY_THAT_IS_NEVER_SET".to_string()),
            ..GenerationConfig::default()
        };
        assert!(matches!(create_backend(&config), Err(Error::Config(_))));
    }
}
