//! OpenAI-Compatible Backend Implementation
//!
//! Model backend for OpenAI-compatible chat APIs (OpenAI itself, plus the
//! many local and hosted servers that speak the same protocol).
//!
//! # API
//!
//! - `/chat/completions` - Chat completions (streaming via SSE or batch)
//! - `/models` - List available models
//!
//! Streaming responses arrive as server-sent events: each `data:` line
//! carries one JSON chunk, and the literal `[DONE]` sentinel ends the
//! stream.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;

use super::traits::{ChatPrompt, ChatReply, ModelBackend, StreamingChunk};

/// Default API endpoint when no base URL is configured
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Extract the payload of an SSE `data:` line, if it is one
fn sse_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim)
}

/// OpenAI-compatible backend client
#[derive(Clone)]
pub struct OpenAiBackend {
    /// API base URL, no trailing slash
    base_url: String,
    /// Bearer token, empty for servers without auth
    api_key: String,
    /// HTTP client
    http_client: reqwest::Client,
}

impl OpenAiBackend {
    /// Create a new backend against `base_url`
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .expect("Failed to create HTTP client"),
        }
    }

    /// Create from environment variables
    #[must_use]
    pub fn from_env() -> Self {
        let base_url = std::env::var("OPENAI_BASE_URL")
            .or_else(|_| std::env::var("CONFAB_API_URL"))
            .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let api_key = std::env::var("OPENAI_API_KEY")
            .or_else(|_| std::env::var("CONFAB_API_KEY"))
            .unwrap_or_default();

        Self::new(base_url, api_key)
    }

    /// Get chat completions endpoint URL
    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Get models endpoint URL
    fn models_url(&self) -> String {
        format!("{}/models", self.base_url)
    }

    /// Build the messages array: system prompt, history, then this turn
    fn build_messages(&self, prompt: &ChatPrompt) -> Vec<serde_json::Value> {
        let mut messages = Vec::new();

        if let Some(ref system) = prompt.system {
            messages.push(serde_json::json!({
                "role": "system",
                "content": system,
            }));
        }

        for entry in &prompt.history {
            messages.push(serde_json::json!({
                "role": entry.role.as_str(),
                "content": entry.content,
            }));
        }

        messages.push(serde_json::json!({
            "role": "user",
            "content": prompt.prompt,
        }));

        messages
    }

    /// Build the request body for a chat completion
    fn build_body(&self, prompt: &ChatPrompt, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": prompt.model,
            "messages": self.build_messages(prompt),
            "stream": stream,
        });

        if (prompt.temperature - 0.7).abs() > f32::EPSILON {
            body["temperature"] = serde_json::json!(prompt.temperature);
        }
        if prompt.max_tokens > 0 {
            body["max_tokens"] = serde_json::json!(prompt.max_tokens);
        }

        body
    }

    /// POST a chat completion request, applying auth when configured
    async fn post_chat(&self, body: &serde_json::Value) -> anyhow::Result<reqwest::Response> {
        let mut request = self.http_client.post(self.chat_url()).json(body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI API returned {status}: {body}");
        }
        Ok(response)
    }
}

impl Default for OpenAiBackend {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL, "")
    }
}

#[async_trait]
impl ModelBackend for OpenAiBackend {
    fn name(&self) -> &'static str {
        "OpenAI"
    }

    async fn health_check(&self) -> bool {
        let mut request = self
            .http_client
            .get(self.models_url())
            .timeout(Duration::from_secs(5));
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }
        request.send().await.is_ok()
    }

    async fn send_streaming(
        &self,
        prompt: &ChatPrompt,
    ) -> anyhow::Result<mpsc::Receiver<StreamingChunk>> {
        let (tx, rx) = mpsc::channel(100);

        let body = self.build_body(prompt, true);
        let response = self.post_chat(&body).await?;
        let mut stream = response.bytes_stream();

        // Spawn task to process the SSE stream
        tokio::spawn(async move {
            let mut buffer = String::new();
            let mut full_response = String::new();

            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(bytes) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));

                        while let Some(pos) = buffer.find('\n') {
                            let line = buffer[..pos].trim().to_string();
                            buffer = buffer[pos + 1..].to_string();

                            let Some(payload) = sse_payload(&line) else {
                                continue;
                            };
                            if payload == "[DONE]" {
                                let _ = tx
                                    .send(StreamingChunk::Complete {
                                        message: full_response,
                                    })
                                    .await;
                                return;
                            }

                            let Ok(data) = serde_json::from_str::<serde_json::Value>(payload)
                            else {
                                continue;
                            };
                            let choice = &data["choices"][0];

                            if let Some(token) =
                                choice.get("delta").and_then(|d| d.get("content")).and_then(
                                    serde_json::Value::as_str,
                                )
                            {
                                if !token.is_empty() {
                                    full_response.push_str(token);
                                    if tx
                                        .send(StreamingChunk::Token(token.to_string()))
                                        .await
                                        .is_err()
                                    {
                                        // Receiver dropped, stop streaming
                                        return;
                                    }
                                }
                            }

                            if choice
                                .get("finish_reason")
                                .is_some_and(|r| !r.is_null())
                            {
                                let _ = tx
                                    .send(StreamingChunk::Complete {
                                        message: full_response,
                                    })
                                    .await;
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(StreamingChunk::Error(e.to_string())).await;
                        return;
                    }
                }
            }

            // Stream ended without a done signal
            if !full_response.is_empty() {
                let _ = tx
                    .send(StreamingChunk::Complete {
                        message: full_response,
                    })
                    .await;
            }
        });

        Ok(rx)
    }

    async fn send(&self, prompt: &ChatPrompt) -> anyhow::Result<ChatReply> {
        let start = Instant::now();

        let body = self.build_body(prompt, false);
        let response = self.post_chat(&body).await?;
        let data: serde_json::Value = response.json().await?;

        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();

        let tokens_used = data["usage"]["total_tokens"]
            .as_u64()
            .map(|c| u32::try_from(c).unwrap_or(u32::MAX));

        Ok(ChatReply {
            content,
            model: prompt.model.clone(),
            tokens_used,
            duration_ms: Some(u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)),
        })
    }

    async fn list_models(&self) -> anyhow::Result<Vec<String>> {
        let mut request = self
            .http_client
            .get(self.models_url())
            .timeout(Duration::from_secs(10));
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI API returned {status}: {body}");
        }

        let data: serde_json::Value = response.json().await?;
        let models = data
            .get("data")
            .and_then(|d| d.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| m.get("id").and_then(|i| i.as_str()).map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        Ok(models)
    }
}
