//! Language model backends.
//!
//! [`LanguageModel`] is the seam between the query engine and an inference
//! server. Both adapters request a streamed completion and forward each
//! fragment to the caller's `on_token` callback as it arrives, then return
//! the full text.
//!
//! | `llm.backend` | Adapter | Endpoint |
//! |---------------|---------|----------|
//! | `ollama` | [`OllamaModel`] | `POST {url}/api/generate` (NDJSON) |
//! | `openai-compatible` | [`OpenAiCompatibleModel`] | `POST {url}/v1/completions` (SSE) |
//!
//! Calls block the current thread. The engine runs them on the blocking
//! pool or on a streaming worker thread.

use std::io::{BufRead, BufReader};
use std::sync::Arc;
use std::time::Duration;

use libre_chat_core::{ChatError, Result};
use tracing::debug;

use crate::config::LlmConfig;

/// Sampling parameters for one generation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_new_tokens: u32,
}

impl From<&LlmConfig> for GenerationParams {
    fn from(config: &LlmConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_new_tokens: config.max_new_tokens,
        }
    }
}

pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;

    /// Generate a completion for `prompt`, calling `on_token` with every
    /// fragment in order. Returns the concatenated fragments.
    fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
        on_token: &mut dyn FnMut(&str),
    ) -> Result<String>;
}

/// Create the adapter named by `config.backend`.
pub fn create_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.backend.as_str() {
        "ollama" => Ok(Arc::new(OllamaModel::new(config)?)),
        "openai-compatible" => Ok(Arc::new(OpenAiCompatibleModel::new(config)?)),
        other => Err(ChatError::Configuration(format!(
            "Unknown LLM backend: {}",
            other
        ))),
    }
}

fn http_client(timeout_secs: u64) -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ChatError::Model(format!("cannot build HTTP client: {}", e)))
}

fn send(request: reqwest::blocking::RequestBuilder, url: &str) -> Result<reqwest::blocking::Response> {
    let response = request
        .send()
        .map_err(|e| ChatError::Model(format!("connection error ({}): {}", url, e)))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(ChatError::Model(format!("API error {}: {}", status, body)));
    }
    Ok(response)
}

// ============ Ollama ============

pub struct OllamaModel {
    model: String,
    url: String,
    client: reqwest::blocking::Client,
}

impl OllamaModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            model: config.model.clone(),
            url: config.url.trim_end_matches('/').to_string(),
            client: http_client(config.timeout_secs)?,
        })
    }
}

impl LanguageModel for OllamaModel {
    fn name(&self) -> &str {
        &self.model
    }

    fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
        on_token: &mut dyn FnMut(&str),
    ) -> Result<String> {
        let url = format!("{}/api/generate", self.url);
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": true,
            "options": {
                "temperature": params.temperature,
                "num_predict": params.max_new_tokens,
            },
        });
        let response = send(self.client.post(&url).json(&body), &url)?;
        let text = read_ollama_stream(BufReader::new(response), on_token)?;
        debug!(model = %self.model, chars = text.len(), "Generation finished");
        Ok(text)
    }
}

const STREAM_INCOMPLETE: &str = "stream ended before completion";

fn read_line(line: std::io::Result<String>) -> Result<String> {
    line.map_err(|e| ChatError::Model(format!("stream read failed: {}", e)))
}

/// Forward NDJSON tokens until `"done": true`. End of input before that is
/// a truncated generation.
fn read_ollama_stream(reader: impl BufRead, on_token: &mut dyn FnMut(&str)) -> Result<String> {
    let mut text = String::new();
    for line in reader.lines() {
        let Some(chunk) = parse_ollama_line(&read_line(line)?)? else {
            continue;
        };
        if !chunk.token.is_empty() {
            on_token(&chunk.token);
            text.push_str(&chunk.token);
        }
        if chunk.done {
            return Ok(text);
        }
    }
    Err(ChatError::Model(STREAM_INCOMPLETE.to_string()))
}

#[derive(Debug, PartialEq)]
struct OllamaChunk {
    token: String,
    done: bool,
}

fn parse_ollama_line(line: &str) -> Result<Option<OllamaChunk>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let json: serde_json::Value = serde_json::from_str(line)
        .map_err(|e| ChatError::Model(format!("invalid stream line: {}", e)))?;
    if let Some(err) = json.get("error").and_then(|e| e.as_str()) {
        return Err(ChatError::Model(err.to_string()));
    }
    Ok(Some(OllamaChunk {
        token: json
            .get("response")
            .and_then(|r| r.as_str())
            .unwrap_or_default()
            .to_string(),
        done: json.get("done").and_then(|d| d.as_bool()).unwrap_or(false),
    }))
}

// ============ OpenAI-compatible ============

/// Completion client for servers speaking the OpenAI `/v1/completions`
/// protocol, such as the `llama.cpp` server.
pub struct OpenAiCompatibleModel {
    model: String,
    url: String,
    api_key: Option<String>,
    client: reqwest::blocking::Client,
}

impl OpenAiCompatibleModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            model: config.model.clone(),
            url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            client: http_client(config.timeout_secs)?,
        })
    }
}

impl LanguageModel for OpenAiCompatibleModel {
    fn name(&self) -> &str {
        &self.model
    }

    fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
        on_token: &mut dyn FnMut(&str),
    ) -> Result<String> {
        let url = format!("{}/v1/completions", self.url);
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "max_tokens": params.max_new_tokens,
            "temperature": params.temperature,
            "stream": true,
        });
        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = send(request, &url)?;
        let text = read_sse_stream(BufReader::new(response), on_token)?;
        debug!(model = %self.model, chars = text.len(), "Generation finished");
        Ok(text)
    }
}

/// Forward SSE tokens until `[DONE]` or a `finish_reason`. End of input
/// before either is a truncated generation.
fn read_sse_stream(reader: impl BufRead, on_token: &mut dyn FnMut(&str)) -> Result<String> {
    let mut text = String::new();
    for line in reader.lines() {
        match parse_sse_line(&read_line(line)?)? {
            SseEvent::Token(token) => {
                on_token(&token);
                text.push_str(&token);
            }
            SseEvent::Last(token) => {
                on_token(&token);
                text.push_str(&token);
                return Ok(text);
            }
            SseEvent::Done => return Ok(text),
            SseEvent::Skip => {}
        }
    }
    Err(ChatError::Model(STREAM_INCOMPLETE.to_string()))
}

#[derive(Debug, PartialEq)]
enum SseEvent {
    Token(String),
    /// A token that also carries a `finish_reason`.
    Last(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> Result<SseEvent> {
    let Some(data) = line.trim().strip_prefix("data:") else {
        return Ok(SseEvent::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseEvent::Done);
    }
    let json: serde_json::Value = serde_json::from_str(data)
        .map_err(|e| ChatError::Model(format!("invalid event payload: {}", e)))?;
    if let Some(err) = json.get("error") {
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        return Err(ChatError::Model(message));
    }
    let choice = json.get("choices").and_then(|c| c.get(0));
    let token = choice
        .and_then(|c| c.get("text"))
        .and_then(|t| t.as_str())
        .unwrap_or_default();
    let finished = choice
        .and_then(|c| c.get("finish_reason"))
        .is_some_and(|r| !r.is_null());
    Ok(match (token.is_empty(), finished) {
        (true, true) => SseEvent::Done,
        (true, false) => SseEvent::Skip,
        (false, true) => SseEvent::Last(token.to_string()),
        (false, false) => SseEvent::Token(token.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ollama_lines_carry_tokens_and_done() {
        let chunk = parse_ollama_line(r#"{"response":"Amster","done":false}"#)
            .unwrap()
            .unwrap();
        assert_eq!(chunk.token, "Amster");
        assert!(!chunk.done);

        let last = parse_ollama_line(r#"{"response":"","done":true}"#)
            .unwrap()
            .unwrap();
        assert!(last.done);
        assert!(parse_ollama_line("   ").unwrap().is_none());
    }

    #[test]
    fn ollama_error_line_is_a_model_error() {
        let err = parse_ollama_line(r#"{"error":"model 'x' not found"}"#).unwrap_err();
        assert!(matches!(err, ChatError::Model(m) if m.contains("not found")));
    }

    #[test]
    fn sse_events() {
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"text":"dam","finish_reason":null}]}"#).unwrap(),
            SseEvent::Token("dam".to_string())
        );
        assert_eq!(parse_sse_line("data: [DONE]").unwrap(), SseEvent::Done);
        assert_eq!(parse_sse_line(": keep-alive").unwrap(), SseEvent::Skip);
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"text":"","finish_reason":"stop"}]}"#).unwrap(),
            SseEvent::Done
        );
    }

    #[test]
    fn ollama_stream_collects_tokens_until_done() {
        let body = "{\"response\":\"Amster\",\"done\":false}\n\n{\"response\":\"dam\",\"done\":false}\n{\"response\":\"\",\"done\":true}\n";
        let mut tokens = Vec::new();
        let text = read_ollama_stream(body.as_bytes(), &mut |t| tokens.push(t.to_string())).unwrap();
        assert_eq!(text, "Amsterdam");
        assert_eq!(tokens, vec!["Amster", "dam"]);
    }

    #[test]
    fn ollama_stream_without_done_is_truncated() {
        let body = "{\"response\":\"Amster\",\"done\":false}\n";
        let mut seen = String::new();
        let err = read_ollama_stream(body.as_bytes(), &mut |t| seen.push_str(t)).unwrap_err();
        assert!(matches!(err, ChatError::Model(m) if m == STREAM_INCOMPLETE));
        assert_eq!(seen, "Amster");
    }

    #[test]
    fn sse_stream_collects_tokens_until_done() {
        let body = "data: {\"choices\":[{\"text\":\"Amster\",\"finish_reason\":null}]}\n\n\
                    data: {\"choices\":[{\"text\":\"dam\",\"finish_reason\":null}]}\n\n\
                    data: [DONE]\n\n";
        let text = read_sse_stream(body.as_bytes(), &mut |_| {}).unwrap();
        assert_eq!(text, "Amsterdam");

        let body = "data: {\"choices\":[{\"text\":\"ok\",\"finish_reason\":\"length\"}]}\n";
        assert_eq!(read_sse_stream(body.as_bytes(), &mut |_| {}).unwrap(), "ok");
    }

    #[test]
    fn sse_stream_without_done_is_truncated() {
        let body = "data: {\"choices\":[{\"text\":\"Amster\",\"finish_reason\":null}]}\n\n";
        let err = read_sse_stream(body.as_bytes(), &mut |_| {}).unwrap_err();
        assert!(matches!(err, ChatError::Model(m) if m == STREAM_INCOMPLETE));
        assert!(read_sse_stream("".as_bytes(), &mut |_| {}).is_err());
    }

    #[test]
    fn sse_garbage_is_a_model_error() {
        assert!(matches!(
            parse_sse_line("data: {not json").unwrap_err(),
            ChatError::Model(_)
        ));
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let config = LlmConfig {
            backend: "gpt4all".to_string(),
            ..LlmConfig::default()
        };
        assert!(matches!(
            create_model(&config).err().unwrap(),
            ChatError::Configuration(_)
        ));
    }
}
