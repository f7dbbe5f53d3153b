//! OpenAI Backend Implementation
//!
//! Completion source for the OpenAI HTTP API (and compatible servers).
//!
//! # OpenAI API
//!
//! - `/completions` - prompt completion for text models
//! - `/chat/completions` - chat completion for chat models
//!
//! Both are called with `stream: true` and answer with server-sent events,
//! one `data: {json}` line per fragment and a final `data: [DONE]`.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::traits::{ApiStyle, CompletionRequest, CompletionSource, FragmentStream, StreamingToken};

/// Default API base URL
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// OpenAI backend client
#[derive(Clone)]
pub struct OpenAiBackend {
    /// Base URL, without trailing slash
    api_base: String,
    /// Bearer token
    api_key: String,
    /// HTTP client
    http_client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiBackend")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl OpenAiBackend {
    /// Create a new OpenAI backend
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            http_client,
        })
    }

    /// Get the base URL
    #[must_use]
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Endpoint URL for a request shape
    fn endpoint_url(&self, api: ApiStyle) -> String {
        match api {
            ApiStyle::Completions => format!("{}/completions", self.api_base),
            ApiStyle::Chat => format!("{}/chat/completions", self.api_base),
        }
    }

    /// Build the JSON body for a streaming request
    fn request_body(request: &CompletionRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "temperature": request.temperature,
            "n": 1,
            "stream": true,
        });

        match request.api {
            ApiStyle::Completions => {
                body["prompt"] = serde_json::json!(request.transcript);
            }
            ApiStyle::Chat => {
                body["messages"] = serde_json::json!([
                    { "role": "user", "content": request.transcript }
                ]);
            }
        }

        if request.max_tokens > 0 {
            body["max_tokens"] = serde_json::json!(request.max_tokens);
        }

        body
    }
}

/// One parsed server-sent-event line
#[derive(Debug, PartialEq, Eq)]
enum SseLine {
    /// A text fragment
    Fragment(String),
    /// End of stream marker
    Done,
    /// Error payload sent in-band
    Failure(String),
    /// Comments, keep-alives, empty deltas
    Ignored,
}

/// Parse one line of the event stream
fn parse_sse_line(line: &str) -> SseLine {
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Ignored;
    };
    let data = data.trim();

    if data == "[DONE]" {
        return SseLine::Done;
    }

    let Ok(value) = serde_json::from_str::<serde_json::Value>(data) else {
        tracing::debug!(line = data, "Skipping unparseable event line");
        return SseLine::Ignored;
    };

    if let Some(message) = value
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(serde_json::Value::as_str)
    {
        return SseLine::Failure(message.to_string());
    }

    let choice = value.get("choices").and_then(|c| c.get(0));
    let text = choice
        .and_then(|c| c.get("text"))
        .or_else(|| choice.and_then(|c| c.get("delta")).and_then(|d| d.get("content")))
        .and_then(serde_json::Value::as_str);

    match text {
        Some(text) if !text.is_empty() => SseLine::Fragment(text.to_string()),
        _ => SseLine::Ignored,
    }
}

#[async_trait]
impl CompletionSource for OpenAiBackend {
    fn name(&self) -> &str {
        "OpenAI"
    }

    async fn open(&self, request: &CompletionRequest) -> anyhow::Result<FragmentStream> {
        let (tx, rx) = mpsc::channel(100);
        let closer = CancellationToken::new();

        let url = self.endpoint_url(request.api);
        let body = Self::request_body(request);

        tracing::debug!(
            url = %url,
            model = %request.model,
            max_tokens = request.max_tokens,
            "Opening completion stream"
        );

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        // Check for HTTP errors
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI returned {status}: {body}");
        }

        let mut stream = response.bytes_stream();
        let producer_closer = closer.clone();

        // Spawn task to process stream
        tokio::spawn(async move {
            let mut buffer: Vec<u8> = Vec::new();

            loop {
                let chunk = tokio::select! {
                    biased;
                    () = producer_closer.cancelled() => {
                        tracing::debug!("Completion stream closed by consumer");
                        return;
                    }
                    chunk = stream.next() => chunk,
                };

                match chunk {
                    Some(Ok(bytes)) => {
                        buffer.extend_from_slice(&bytes);

                        // Parse newline-delimited events
                        while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                            let line: Vec<u8> = buffer.drain(..=pos).collect();
                            let line = String::from_utf8_lossy(&line);

                            match parse_sse_line(line.trim()) {
                                SseLine::Fragment(text) => {
                                    if tx.send(StreamingToken::Token(text)).await.is_err() {
                                        // Receiver dropped, stop streaming
                                        return;
                                    }
                                }
                                SseLine::Done => {
                                    let _ = tx.send(StreamingToken::Complete).await;
                                    return;
                                }
                                SseLine::Failure(message) => {
                                    let _ = tx.send(StreamingToken::Error(message)).await;
                                    return;
                                }
                                SseLine::Ignored => {}
                            }
                        }
                    }
                    Some(Err(e)) => {
                        let _ = tx.send(StreamingToken::Error(e.to_string())).await;
                        return;
                    }
                    None => {
                        tracing::warn!("Completion body ended without [DONE]");
                        let _ = tx
                            .send(StreamingToken::Error(
                                "response ended before the completion finished".to_string(),
                            ))
                            .await;
                        return;
                    }
                }
            }
        });

        Ok(FragmentStream::new(rx, closer))
    }
}
