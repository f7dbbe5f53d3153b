//! Conversation Ledger
//!
//! Keeps the conversation that is replayed to the completion service on every
//! exchange, together with a display-ready copy of the same appends.
//!
//! # Design Philosophy
//!
//! The completion service has no memory: each request carries the whole raw
//! transcript, so the transcript size *is* the budget consumed. The ledger
//! therefore owns both the text and the arithmetic that turns it into a
//! remaining token budget for the active model.
//!
//! The raw and rendered transcripts always share the same append points and
//! are only ever reset together.

use serde::{Deserialize, Serialize};

use crate::estimator::{CharRatioEstimator, TokenEstimator};

/// Prefix for user turns in the rendered transcript
pub const USER_PREFIX: &str = "[Me]: ";

/// Prefix for assistant turns in the rendered transcript
pub const ASSISTANT_PREFIX: &str = "[GPT]: ";

/// Who produced a piece of transcript text
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageRole {
    /// Prompt text typed (or submitted on the user's behalf)
    User,
    /// Text streamed back by the completion service
    Assistant,
}

/// One display-ready append in the rendered transcript
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    /// Role of the append
    pub role: MessageRole,
    /// Display-formatted text (may be empty for blank user appends)
    pub text: String,
}

/// Append-only conversation transcript with token budget accounting
pub struct ConversationLedger {
    /// Exact concatenation of every append since the last reset
    raw: String,
    /// Role-annotated display copy, one entry per append
    rendered: Vec<TranscriptEntry>,
    /// Pluggable token estimator
    estimator: Box<dyn TokenEstimator>,
    /// Whether an assistant turn has already been prefixed
    assistant_turn_open: bool,
    /// Number of resets performed (lifetime)
    resets: u64,
}

impl Default for ConversationLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConversationLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationLedger")
            .field("raw_len", &self.raw.len())
            .field("entries", &self.rendered.len())
            .field("resets", &self.resets)
            .finish_non_exhaustive()
    }
}

impl ConversationLedger {
    /// Create an empty ledger using the default character-count estimator
    #[must_use]
    pub fn new() -> Self {
        Self::with_estimator(CharRatioEstimator::default())
    }

    /// Create an empty ledger with a specific estimator
    pub fn with_estimator(estimator: impl TokenEstimator + 'static) -> Self {
        Self {
            raw: String::new(),
            rendered: Vec::new(),
            estimator: Box::new(estimator),
            assistant_turn_open: false,
            resets: 0,
        }
    }

    /// Append text to both transcripts, optionally clearing them first
    pub fn append(&mut self, text: &str, role: MessageRole, reset_first: bool) {
        if reset_first {
            self.reset();
        }

        self.raw.push_str(text);

        let display = match role {
            MessageRole::User => {
                self.assistant_turn_open = false;
                if text.trim().is_empty() {
                    String::new()
                } else {
                    format!("\n\n{USER_PREFIX}{}", text.trim_start())
                }
            }
            MessageRole::Assistant => {
                if self.assistant_turn_open {
                    text.to_string()
                } else {
                    self.assistant_turn_open = true;
                    format!("{ASSISTANT_PREFIX}{text}")
                }
            }
        };

        self.rendered.push(TranscriptEntry {
            role,
            text: display,
        });
    }

    /// Remaining budget for a model with the given token ceiling
    ///
    /// Recomputed from the current transcript on every call. Negative when the
    /// transcript alone already exceeds the ceiling.
    #[must_use]
    pub fn remaining_budget(&self, model_ceiling: usize) -> i64 {
        let used = i64::try_from(self.estimated_tokens()).unwrap_or(i64::MAX);
        let ceiling = i64::try_from(model_ceiling).unwrap_or(i64::MAX);
        ceiling.saturating_sub(used)
    }

    /// Clear both transcripts
    pub fn reset(&mut self) {
        tracing::debug!(
            discarded_bytes = self.raw.len(),
            discarded_entries = self.rendered.len(),
            "Resetting conversation ledger"
        );
        self.raw.clear();
        self.rendered.clear();
        self.assistant_turn_open = false;
        self.resets += 1;
    }

    /// Estimated tokens used by the raw transcript
    #[must_use]
    pub fn estimated_tokens(&self) -> usize {
        self.estimator.estimate(&self.raw)
    }

    /// The raw transcript sent to the completion service
    #[must_use]
    pub fn raw_transcript(&self) -> &str {
        &self.raw
    }

    /// The rendered transcript entries
    #[must_use]
    pub fn rendered(&self) -> &[TranscriptEntry] {
        &self.rendered
    }

    /// The rendered transcript as one display string
    #[must_use]
    pub fn rendered_text(&self) -> String {
        self.rendered.iter().map(|e| e.text.as_str()).collect()
    }

    /// Whether nothing has been appended since the last reset
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty() && self.rendered.is_empty()
    }

    /// Number of resets performed over the ledger's lifetime
    #[must_use]
    pub fn reset_count(&self) -> u64 {
        self.resets
    }
}
