//! Completion Source Traits
//!
//! Trait definitions for the remote text-completion service. The orchestrator
//! only sees [`CompletionSource`] and [`FragmentStream`], so the HTTP backend
//! can be swapped for a scripted one in tests.
//!
//! # Design Philosophy
//!
//! A source produces a lazy, finite, non-restartable sequence of text
//! fragments. Fragments travel over a channel filled by a producer task; the
//! consumer can close the stream at any point, which stops the producer
//! without surfacing an error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Fragment stream events from completion sources
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamingToken {
    /// A text fragment of the response
    Token(String),
    /// Response completed successfully
    Complete,
    /// Error occurred during streaming
    Error(String),
}

/// Which request shape a model expects
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiStyle {
    /// Prompt-in, text-out completion endpoint
    #[default]
    Completions,
    /// Message-based chat completion endpoint
    Chat,
}

/// Parameters of one completion call
#[derive(Clone, Debug, PartialEq)]
pub struct CompletionRequest {
    /// Full raw transcript sent as the prompt
    pub transcript: String,
    /// Maximum tokens the response may use
    pub max_tokens: u32,
    /// Service model identifier
    pub model: String,
    /// Sampling temperature (0.0-1.0)
    pub temperature: f32,
    /// Request shape for the model
    pub api: ApiStyle,
}

impl CompletionRequest {
    /// Create a request for `model` over `transcript`
    pub fn new(transcript: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
            max_tokens: 0,
            model: model.into(),
            temperature: 0.75,
            api: ApiStyle::default(),
        }
    }

    /// Set max tokens
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 1.0);
        self
    }

    /// Set the request shape
    #[must_use]
    pub fn with_api(mut self, api: ApiStyle) -> Self {
        self.api = api;
        self
    }
}

/// Consumer end of one streaming completion call
///
/// Dropping or closing the stream stops the producer task.
#[derive(Debug)]
pub struct FragmentStream {
    receiver: mpsc::Receiver<StreamingToken>,
    closer: CancellationToken,
}

impl FragmentStream {
    /// Wrap a producer's channel and its stop token
    #[must_use]
    pub fn new(receiver: mpsc::Receiver<StreamingToken>, closer: CancellationToken) -> Self {
        Self { receiver, closer }
    }

    /// Create a stream already holding `tokens`, followed by end of stream
    ///
    /// Handy for replaying canned responses.
    #[must_use]
    pub fn from_tokens(tokens: impl IntoIterator<Item = StreamingToken>) -> Self {
        let tokens: Vec<StreamingToken> = tokens.into_iter().collect();
        let (tx, rx) = mpsc::channel(tokens.len().max(1));
        for token in tokens {
            // Capacity covers every token
            let _ = tx.try_send(token);
        }
        Self::new(rx, CancellationToken::new())
    }

    /// Receive the next event; `None` once the producer is gone
    pub async fn next(&mut self) -> Option<StreamingToken> {
        self.receiver.recv().await
    }

    /// Terminate the call early
    ///
    /// Idempotent and never an error.
    pub fn close(&mut self) {
        self.closer.cancel();
        self.receiver.close();
    }

    /// Whether [`close`](Self::close) has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closer.is_cancelled()
    }

    /// Token that fires once the stream is closed or dropped
    #[must_use]
    pub fn close_signal(&self) -> CancellationToken {
        self.closer.clone()
    }
}

impl Drop for FragmentStream {
    fn drop(&mut self) {
        self.closer.cancel();
    }
}

/// Completion source trait
///
/// Implement this trait to add support for different completion services.
#[async_trait]
pub trait CompletionSource: Send + Sync {
    /// Get the source name (e.g., "OpenAI")
    fn name(&self) -> &str;

    /// Start a streaming completion call
    ///
    /// Fails if the call cannot be started (connection refused, bad status).
    /// Failures after the first fragment arrive as [`StreamingToken::Error`].
    async fn open(&self, request: &CompletionRequest) -> anyhow::Result<FragmentStream>;
}
