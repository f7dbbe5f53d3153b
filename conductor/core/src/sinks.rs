//! Output Sinks
//!
//! The two consumers of classified segments. The core never writes to a
//! terminal or starts a process itself; it hands segments to a [`RenderSink`]
//! and a [`SpeechSink`] and lets the surface decide what that means.
//!
//! Every segment carries `is_code_context`, so sinks never need to know what
//! state the classifier was in.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use crate::streaming::{Segment, SegmentKind};

/// Receives delimiter, display and code-line segments for visual output
///
/// Called inline by the orchestrator, so implementations must return quickly.
pub trait RenderSink: Send {
    /// A new response is about to stream
    fn begin_response(&mut self) {}

    /// Show one segment
    fn display(&mut self, segment: &Segment);

    /// The response finished (naturally, by cancellation, or by error)
    fn end_response(&mut self) {}
}

/// Speech failure
#[derive(Debug, Error)]
pub enum SpeechError {
    /// The speech process could not be started
    #[error("failed to start speech process: {0}")]
    Spawn(#[from] std::io::Error),
    /// The speech process ran but reported failure
    #[error("speech process exited with {status}")]
    Exit {
        /// Exit status description
        status: String,
    },
}

/// Voices speech segments
///
/// Must silently accept blank text. Never receives code-context or delimiter
/// segments.
#[async_trait]
pub trait SpeechSink: Send + Sync {
    /// Speak one segment, returning when the utterance has finished
    async fn speak(&self, segment: &Segment) -> Result<(), SpeechError>;
}

/// A render sink that records every segment
///
/// Useful for tests and headless runs.
#[derive(Debug, Default)]
pub struct CollectingSink {
    /// Segments received, in order
    pub segments: Vec<Segment>,
    /// Number of responses started
    pub responses: usize,
}

impl CollectingSink {
    /// Create an empty collecting sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Concatenated text of all segments of one kind
    #[must_use]
    pub fn text_of(&self, kind: SegmentKind) -> String {
        self.segments
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| s.text.as_str())
            .collect()
    }
}

impl RenderSink for CollectingSink {
    fn begin_response(&mut self) {
        self.responses += 1;
    }

    fn display(&mut self, segment: &Segment) {
        self.segments.push(segment.clone());
    }
}

/// A speech sink that records utterances instead of voicing them
#[derive(Clone, Debug, Default)]
pub struct CollectingSpeech {
    spoken: Arc<Mutex<Vec<String>>>,
}

impl CollectingSpeech {
    /// Create an empty recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Utterances recorded so far
    #[must_use]
    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().clone()
    }
}

#[async_trait]
impl SpeechSink for CollectingSpeech {
    async fn speak(&self, segment: &Segment) -> Result<(), SpeechError> {
        if !segment.text.trim().is_empty() {
            self.spoken.lock().push(segment.text.clone());
        }
        Ok(())
    }
}
