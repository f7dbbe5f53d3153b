//! Stream Orchestrator - The Exchange Core
//!
//! The orchestrator runs one prompt/response exchange at a time:
//! - Appends the prompt to the conversation ledger and checks the budget
//! - Opens the completion source over the full transcript
//! - Pumps fragments through a fresh classifier into the sinks
//! - Records every fragment in the ledger as it arrives
//!
//! # Design Philosophy
//!
//! The orchestrator is surface-agnostic. It never touches a terminal or a
//! process; rendering goes to a [`RenderSink`] and speech to a [`SpeechSink`].
//!
//! ```text
//!   submit(prompt)                       drive(submission)
//!   ┌──────────────┐   FragmentStream   ┌──────────────────────────────┐
//!   │ ledger.append│ ─────────────────▶ │ select! { cancel | next() }  │
//!   │ budget check │                    │   ledger.append(fragment)    │
//!   │ source.open  │                    │   classifier.push(fragment)  │
//!   └──────────────┘                    │   ├─▶ RenderSink (inline)    │
//!                                       │   └─▶ SpeechQueue (worker)   │
//!                                       └──────────────────────────────┘
//! ```
//!
//! Cancellation is cooperative: an [`AbortHandle`] fires a token that is
//! checked before every fragment pull.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::backend::{CompletionRequest, CompletionSource, FragmentStream, StreamingToken};
use crate::config::ModelProfile;
use crate::ledger::{ConversationLedger, MessageRole};
use crate::session::SessionSettings;
use crate::sinks::{RenderSink, SpeechSink};
use crate::streaming::{
    ResponseStreamClassifier, Segment, SegmentKind, SpeechBoundary, SpeechQueue, SpeechReport,
};

/// Prompt asking the model to fence every code snippet
pub const CODE_FORMAT_DIRECTIVE: &str =
    "\nAny code snippet in your responses must be inside a code block. respond yes if you will comply";

/// Failure reported when a source stops without a completion marker
pub const STREAM_ENDED_UNEXPECTEDLY: &str = "completion stream ended unexpectedly";

/// Errors raised by the orchestrator
#[derive(Debug, Error)]
pub enum ConductorError {
    /// A previous submission has not been driven to its end
    #[error("an exchange is already in progress")]
    ExchangeInProgress,

    /// The prompt alone exceeds the model ceiling, even on a fresh context
    #[error("prompt is too large for model {model}: {remaining} tokens left of {ceiling}")]
    PromptTooLarge {
        /// Model identifier
        model: String,
        /// Model token ceiling
        ceiling: usize,
        /// Budget after the reset (zero or negative)
        remaining: i64,
    },

    /// The completion source could not be opened
    #[error("completion request failed: {0}")]
    Upstream(String),

    /// Temperature outside 0..=1
    #[error("temperature must be between 0 and 1, got {0}")]
    InvalidTemperature(f32),
}

/// How an exchange ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExchangeStatus {
    /// The source reached end of stream
    Completed,
    /// Cancelled through the abort handle
    Aborted,
    /// The source failed mid-stream
    Failed(String),
}

/// Result of driving one exchange
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExchangeOutcome {
    /// How the exchange ended
    pub status: ExchangeStatus,
    /// Fragments consumed from the source
    pub fragments: usize,
    /// Concatenated response text as received
    pub response: String,
    /// What happened to the speech side channel
    pub speech: SpeechReport,
}

/// An opened exchange waiting to be driven
#[derive(Debug)]
pub struct Submission {
    /// Fragments of the response
    pub stream: FragmentStream,
    /// Budget left after the prompt, passed as `max_tokens`
    pub remaining: i64,
    /// Whether the ledger was reset to fit the prompt
    pub context_reset: bool,
    cancel: CancellationToken,
}

/// Cloneable handle that cancels the exchange in flight
///
/// Each submission arms a fresh token, so a cancel never leaks into the
/// next exchange.
#[derive(Clone, Debug, Default)]
pub struct AbortHandle {
    current: Arc<Mutex<CancellationToken>>,
}

impl AbortHandle {
    /// Request cancellation of the current exchange (idempotent)
    pub fn cancel(&self) {
        self.current.lock().cancel();
    }

    /// Whether the current exchange was cancelled
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.current.lock().is_cancelled()
    }

    fn arm(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.current.lock() = token.clone();
        token
    }
}

/// The exchange pipeline for one session
pub struct StreamOrchestrator<S: CompletionSource> {
    /// Completion source
    source: Arc<S>,
    /// Conversation shared across the session
    ledger: ConversationLedger,
    /// Session context
    settings: SessionSettings,
    /// Cancels the exchange in flight
    abort: AbortHandle,
    /// Close signal of the stream handed out by the last submit
    pending: Option<CancellationToken>,
}

impl<S: CompletionSource> std::fmt::Debug for StreamOrchestrator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamOrchestrator")
            .field("source", &self.source.name())
            .field("ledger", &self.ledger)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl<S: CompletionSource> StreamOrchestrator<S> {
    /// Create an orchestrator with an empty ledger
    pub fn new(source: S, settings: SessionSettings) -> Self {
        Self::with_ledger(source, settings, ConversationLedger::new())
    }

    /// Create an orchestrator around an existing ledger
    pub fn with_ledger(source: S, settings: SessionSettings, ledger: ConversationLedger) -> Self {
        Self {
            source: Arc::new(source),
            ledger,
            settings,
            abort: AbortHandle::default(),
            pending: None,
        }
    }

    /// Handle for cancelling exchanges from another task
    #[must_use]
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// The conversation ledger
    #[must_use]
    pub fn ledger(&self) -> &ConversationLedger {
        &self.ledger
    }

    /// The session context
    #[must_use]
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Budget left for the active model, recomputed from the transcript
    #[must_use]
    pub fn remaining_budget(&self) -> i64 {
        self.ledger.remaining_budget(self.settings.ceiling())
    }

    /// The code-format directive, if code format is on
    #[must_use]
    pub fn code_format_directive(&self) -> Option<&'static str> {
        self.settings.use_code_format.then_some(CODE_FORMAT_DIRECTIVE)
    }

    /// Whether a submitted stream is still waiting to be driven
    #[must_use]
    pub fn exchange_in_progress(&self) -> bool {
        self.pending.as_ref().is_some_and(|t| !t.is_cancelled())
    }

    // =========================================================================
    // Exchange
    // =========================================================================

    /// Append a prompt and open the completion source
    ///
    /// # Errors
    ///
    /// - [`ConductorError::ExchangeInProgress`] if the last submission is still open
    /// - [`ConductorError::PromptTooLarge`] if the prompt alone exceeds the ceiling
    /// - [`ConductorError::Upstream`] if the source cannot be opened
    pub async fn submit(&mut self, prompt: &str) -> Result<Submission, ConductorError> {
        if self.exchange_in_progress() {
            return Err(ConductorError::ExchangeInProgress);
        }

        let prompt_text = format!("\n{prompt}\n");
        self.ledger.append(&prompt_text, MessageRole::User, false);

        let mut remaining = self.remaining_budget();
        let mut context_reset = false;

        if remaining <= 0 {
            tracing::warn!(
                remaining,
                ceiling = self.settings.ceiling(),
                "Reached max tokens, resetting chat context"
            );
            self.ledger.reset();
            if let Some(directive) = self.code_format_directive() {
                self.ledger.append(&format!("{directive}\n"), MessageRole::User, false);
            }
            self.ledger.append(&prompt_text, MessageRole::User, false);
            context_reset = true;
            remaining = self.remaining_budget();

            if remaining <= 0 {
                return Err(ConductorError::PromptTooLarge {
                    model: self.settings.model.id.clone(),
                    ceiling: self.settings.ceiling(),
                    remaining,
                });
            }
        }

        let request = CompletionRequest::new(self.ledger.raw_transcript(), &self.settings.model.id)
            .with_max_tokens(u32::try_from(remaining).unwrap_or(u32::MAX))
            .with_temperature(self.settings.temperature)
            .with_api(self.settings.model.api);

        tracing::debug!(
            source = self.source.name(),
            model = %request.model,
            max_tokens = request.max_tokens,
            context_reset,
            "Submitting prompt"
        );

        let stream = self.source.open(&request).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to open completion stream");
            ConductorError::Upstream(format!("{e:#}"))
        })?;

        self.pending = Some(stream.close_signal());
        let cancel = self.abort.arm();

        Ok(Submission {
            stream,
            remaining,
            context_reset,
            cancel,
        })
    }

    /// Pump a submitted stream through the classifier into the sinks
    ///
    /// Display, delimiter and code-line segments go to `render` inline.
    /// Speech segments go through a queue to `speech` when voice is on.
    /// Returns once the stream ended and queued speech has drained.
    pub async fn drive(
        &mut self,
        submission: Submission,
        render: &mut dyn RenderSink,
        speech: Option<Arc<dyn SpeechSink>>,
    ) -> ExchangeOutcome {
        let Submission {
            mut stream, cancel, ..
        } = submission;

        let mut classifier = ResponseStreamClassifier::new(self.settings.speech_boundary);
        let queue = match speech {
            Some(sink) if self.settings.use_voice => SpeechQueue::spawn(sink, cancel.clone()),
            _ => SpeechQueue::disabled(),
        };
        let suppress_display = self.settings.voice_over && queue.is_enabled();

        let mut fragments = 0;
        let mut response = String::new();

        render.begin_response();

        let status = loop {
            let token = tokio::select! {
                biased;
                () = cancel.cancelled() => break ExchangeStatus::Aborted,
                token = stream.next() => token,
            };

            match token {
                Some(StreamingToken::Token(text)) => {
                    let leading_newline = fragments == 0 && text == "\n";
                    fragments += 1;
                    self.ledger.append(&text, MessageRole::Assistant, false);
                    response.push_str(&text);
                    // Recorded, but not shown
                    if !leading_newline {
                        route(&classifier.push(&text), render, &queue, suppress_display);
                    }
                }
                Some(StreamingToken::Complete) => break ExchangeStatus::Completed,
                Some(StreamingToken::Error(message)) => {
                    tracing::error!(error = %message, fragments, "Completion stream failed");
                    break ExchangeStatus::Failed(message);
                }
                None => {
                    tracing::error!(fragments, "Completion stream ended without completing");
                    break ExchangeStatus::Failed(STREAM_ENDED_UNEXPECTEDLY.to_string());
                }
            }
        };

        let tail = if status == ExchangeStatus::Completed {
            classifier.finish()
        } else {
            stream.close();
            let flushed = classifier.abort();
            self.ledger.append("\n", MessageRole::Assistant, false);
            flushed
        };
        route(&tail, render, &queue, suppress_display);
        render.end_response();

        drop(stream);
        self.pending = None;

        let speech = queue.finish().await;
        if let Some(failure) = &speech.failure {
            tracing::warn!(error = %failure, skipped = speech.skipped, "Speech muted for this response");
        }

        tracing::debug!(
            status = ?status,
            fragments,
            remaining = self.remaining_budget(),
            "Exchange finished"
        );

        ExchangeOutcome {
            status,
            fragments,
            response,
            speech,
        }
    }

    /// Submit a prompt and drive the response to its end
    ///
    /// # Errors
    ///
    /// Returns the errors of [`submit`](Self::submit). Mid-stream failures are
    /// reported in the outcome instead.
    pub async fn exchange(
        &mut self,
        prompt: &str,
        render: &mut dyn RenderSink,
        speech: Option<Arc<dyn SpeechSink>>,
    ) -> Result<ExchangeOutcome, ConductorError> {
        let submission = self.submit(prompt).await?;
        Ok(self.drive(submission, render, speech).await)
    }

    // =========================================================================
    // Session Settings
    // =========================================================================

    /// Clear the conversation
    pub fn reset(&mut self) {
        self.ledger.reset();
    }

    /// Switch model; the ceiling changes immediately
    ///
    /// Returns the new remaining budget.
    pub fn set_model(&mut self, profile: ModelProfile) -> i64 {
        tracing::debug!(alias = %profile.alias, id = %profile.id, "Model changed");
        self.settings.model = profile;
        self.remaining_budget()
    }

    /// Set the sampling temperature
    ///
    /// # Errors
    ///
    /// Returns [`ConductorError::InvalidTemperature`] outside 0..=1.
    pub fn set_temperature(&mut self, temperature: f32) -> Result<(), ConductorError> {
        if !(0.0..=1.0).contains(&temperature) {
            return Err(ConductorError::InvalidTemperature(temperature));
        }
        self.settings.temperature = temperature;
        Ok(())
    }

    /// Set where speech is cut into utterances
    pub fn set_speech_boundary(&mut self, boundary: SpeechBoundary) {
        self.settings.speech_boundary = boundary;
    }

    /// Toggle speech, returning the new value
    pub fn toggle_voice(&mut self) -> bool {
        self.settings.use_voice = !self.settings.use_voice;
        self.settings.use_voice
    }

    /// Toggle voice-over mode, returning the new value
    pub fn toggle_voice_over(&mut self) -> bool {
        self.settings.voice_over = !self.settings.voice_over;
        self.settings.voice_over
    }

    /// Switch code format; always resets the conversation
    pub fn set_code_format(&mut self, on: bool) {
        self.settings.use_code_format = on;
        self.ledger.reset();
    }
}

/// Fan segments out to the sinks
fn route(
    segments: &[Segment],
    render: &mut dyn RenderSink,
    queue: &SpeechQueue,
    suppress_display: bool,
) {
    for segment in segments {
        match segment.kind {
            SegmentKind::Speech => queue.enqueue(segment),
            SegmentKind::Display if suppress_display => {}
            SegmentKind::Display | SegmentKind::Delimiter | SegmentKind::CodeLine => {
                render.display(segment);
            }
        }
    }
}
