//! Streaming Response Processing
//!
//! Everything that happens to a response between the completion service and
//! the sinks:
//!
//! ```text
//!   FragmentStream ──► ResponseStreamClassifier ──┬──► RenderSink   (inline)
//!                                                 │
//!                                                 └──► SpeechQueue ──► SpeechSink
//!                                                      (worker task, ordered)
//! ```
//!
//! The classifier is pure and synchronous; the speech queue is the only part
//! that spawns work, so a slow speech engine never holds up rendering.

mod classifier;
mod speech_queue;

pub use classifier::{
    ClassifierState, ResponseStreamClassifier, Segment, SegmentKind, SpeechBoundary, CODE_FENCE,
};
pub use speech_queue::{SpeechQueue, SpeechReport};

// Re-export StreamingToken from backend for convenience
pub use crate::backend::StreamingToken;
