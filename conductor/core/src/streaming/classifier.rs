//! Response Stream Classifier
//!
//! Turns the variable-granularity fragment stream of one response into
//! sink-ready segments.
//!
//! # State Machine
//!
//! ```text
//!            "```"                       cancel / upstream error
//!   Prose ◄─────────► CodeBlock   ──────────────────────────────► Aborted
//!     │                                                         (terminal)
//!     └─────────────────────────────────────────────────────────────▲
//! ```
//!
//! Two buffers run side by side: the line buffer feeds code-line rendering and
//! line-based speech, the sentence buffer feeds sentence-based speech. Each
//! consumer gets its own granularity without re-deriving it from the other.

use serde::{Deserialize, Serialize};

/// Fragment (after trimming) that opens or closes a code block
pub const CODE_FENCE: &str = "```";

/// Partial fence that must still be displayed immediately inside code blocks
const PARTIAL_FENCE: &str = "``";

/// Where speech utterances are cut
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeechBoundary {
    /// Speak each sentence (period, newline or end of stream)
    #[default]
    Sentence,
    /// Speak each line (newline or end of stream)
    Line,
}

impl SpeechBoundary {
    /// The other policy
    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            Self::Sentence => Self::Line,
            Self::Line => Self::Sentence,
        }
    }

    /// Short name used in settings listings
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sentence => "period",
            Self::Line => "newline",
        }
    }
}

/// What a segment is for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentKind {
    /// A code fence; always rendered, never voiced
    Delimiter,
    /// A prose fragment to show as soon as it arrives
    Display,
    /// A complete line of code to render with syntax highlighting
    CodeLine,
    /// An utterance for the speech sink
    Speech,
}

/// A classified, sink-ready unit of text
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Segment text
    pub text: String,
    /// Segment kind
    pub kind: SegmentKind,
    /// Whether the text belongs to a code block
    pub is_code_context: bool,
}

impl Segment {
    /// Create a segment
    #[must_use]
    pub fn new(text: impl Into<String>, kind: SegmentKind, is_code_context: bool) -> Self {
        Self {
            text: text.into(),
            kind,
            is_code_context,
        }
    }

    /// Whether a speech sink may voice this segment
    #[must_use]
    pub fn is_speakable(&self) -> bool {
        self.kind == SegmentKind::Speech && !self.is_code_context
    }
}

/// Classifier state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassifierState {
    /// Outside code blocks
    Prose,
    /// Between an opening and closing fence
    CodeBlock,
    /// Cancelled; no further segments are produced
    Aborted,
}

/// Per-response fragment classifier
///
/// Created fresh for every streamed response. Never fails: unbalanced fences
/// just keep toggling state.
#[derive(Clone, Debug)]
pub struct ResponseStreamClassifier {
    state: ClassifierState,
    /// Whether the last non-aborted state was a code block
    in_code_block: bool,
    line_buffer: String,
    sentence_buffer: String,
    first_sentence: bool,
    code_block_ordinal: usize,
    speech_boundary: SpeechBoundary,
}

impl ResponseStreamClassifier {
    /// Create a classifier using the given speech boundary policy
    #[must_use]
    pub fn new(speech_boundary: SpeechBoundary) -> Self {
        Self {
            state: ClassifierState::Prose,
            in_code_block: false,
            line_buffer: String::new(),
            sentence_buffer: String::new(),
            first_sentence: true,
            code_block_ordinal: 0,
            speech_boundary,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> ClassifierState {
        self.state
    }

    /// Whether the classifier is between code fences
    #[must_use]
    pub fn in_code_block(&self) -> bool {
        self.in_code_block
    }

    /// Whether no sentence boundary has been seen yet in this response
    #[must_use]
    pub fn awaiting_first_sentence(&self) -> bool {
        self.first_sentence
    }

    /// Text accumulated since the last line boundary
    #[must_use]
    pub fn pending_line(&self) -> &str {
        &self.line_buffer
    }

    /// Text accumulated since the last sentence boundary
    #[must_use]
    pub fn pending_sentence(&self) -> &str {
        &self.sentence_buffer
    }

    /// Classify the next fragment of the response
    pub fn push(&mut self, fragment: &str) -> Vec<Segment> {
        if self.state == ClassifierState::Aborted {
            return Vec::new();
        }

        let mut segments = Vec::new();

        if fragment.trim() == CODE_FENCE {
            segments.push(Segment::new(
                format!("{CODE_FENCE}\n"),
                SegmentKind::Delimiter,
                true,
            ));
            self.toggle_code_block();
            self.line_buffer.clear();
            return segments;
        }

        self.line_buffer.push_str(fragment);
        self.sentence_buffer.push_str(fragment);

        if !fragment.is_empty() && (!self.in_code_block || fragment == PARTIAL_FENCE) {
            segments.push(Segment::new(
                fragment,
                SegmentKind::Display,
                self.in_code_block,
            ));
        }

        let is_line_end = fragment.contains('\n');
        let is_sentence_end = is_line_end || fragment.contains('.');
        self.close_boundaries(is_line_end, is_sentence_end, &mut segments);

        segments
    }

    /// Signal end of stream, flushing any partial line or sentence
    pub fn finish(&mut self) -> Vec<Segment> {
        if self.state == ClassifierState::Aborted {
            return Vec::new();
        }

        let mut segments = Vec::new();
        if !self.line_buffer.is_empty() || !self.sentence_buffer.is_empty() {
            self.close_boundaries(true, true, &mut segments);
        }
        segments
    }

    /// Cancel the response
    ///
    /// Flushes buffered partial content (at most one segment per buffer) and
    /// moves to [`ClassifierState::Aborted`]. Later calls produce nothing.
    pub fn abort(&mut self) -> Vec<Segment> {
        let segments = self.finish();
        if self.state != ClassifierState::Aborted {
            tracing::debug!(
                in_code_block = self.in_code_block,
                flushed = segments.len(),
                "Response classifier aborted"
            );
        }
        self.state = ClassifierState::Aborted;
        segments
    }

    fn toggle_code_block(&mut self) {
        self.in_code_block = !self.in_code_block;
        self.code_block_ordinal = 0;
        self.state = if self.in_code_block {
            ClassifierState::CodeBlock
        } else {
            ClassifierState::Prose
        };
    }

    fn close_boundaries(
        &mut self,
        is_line_end: bool,
        is_sentence_end: bool,
        segments: &mut Vec<Segment>,
    ) {
        if !is_sentence_end {
            return;
        }
        self.first_sentence = false;

        if is_line_end {
            let line = std::mem::take(&mut self.line_buffer);
            if self.in_code_block {
                self.emit_code_line(&line, segments);
            } else if self.speech_boundary == SpeechBoundary::Line && !line.is_empty() {
                segments.push(Segment::new(line, SegmentKind::Speech, false));
            }
        }

        let sentence = std::mem::take(&mut self.sentence_buffer);
        if self.speech_boundary == SpeechBoundary::Sentence
            && !self.in_code_block
            && !sentence.is_empty()
        {
            segments.push(Segment::new(sentence, SegmentKind::Speech, false));
        }
    }

    fn emit_code_line(&mut self, line: &str, segments: &mut Vec<Segment>) {
        if line.is_empty() || (line == "\n" && self.code_block_ordinal == 0) {
            return;
        }
        self.code_block_ordinal += 1;
        let line = line.strip_suffix('\n').unwrap_or(line);
        segments.push(Segment::new(line, SegmentKind::CodeLine, true));
    }
}
