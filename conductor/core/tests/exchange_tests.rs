//! Integration tests for full prompt/response exchanges
//!
//! These tests drive the orchestrator against a scripted completion source
//! and recording sinks. Tests cover:
//! - Budget exhaustion and the single context reset
//! - Mid-stream cancellation
//! - Upstream failures and open failures
//! - Speech failures and ordering
//! - Code block suppression of speech

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use gpterm_core::{
    AbortHandle, ApiStyle, CollectingSink, CollectingSpeech, CompletionRequest, CompletionSource,
    ConductorError, ExchangeStatus, FragmentStream, ModelProfile, RenderSink, Segment,
    SegmentKind, SessionSettings, SpeechBoundary, SpeechError, SpeechSink, StreamOrchestrator,
    StreamingToken, CODE_FORMAT_DIRECTIVE, STREAM_ENDED_UNEXPECTEDLY,
};

// =============================================================================
// Test Doubles
// =============================================================================

#[derive(Clone, Debug)]
enum Step {
    Fragment(&'static str),
    Fail(&'static str),
}

/// Completion source replaying a script, recording every request
#[derive(Clone, Default)]
struct ScriptedSource {
    script: Vec<Step>,
    delay: Option<Duration>,
    refuse: bool,
    /// Drop the channel instead of sending `Complete`
    hang_up: bool,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
    stopped_early: Arc<AtomicBool>,
}

impl ScriptedSource {
    fn fragments(fragments: &[&'static str]) -> Self {
        Self {
            script: fragments.iter().copied().map(Step::Fragment).collect(),
            ..Self::default()
        }
    }

    fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl CompletionSource for ScriptedSource {
    fn name(&self) -> &str {
        "Scripted"
    }

    async fn open(&self, request: &CompletionRequest) -> anyhow::Result<FragmentStream> {
        self.requests.lock().push(request.clone());
        if self.refuse {
            anyhow::bail!("connection refused");
        }

        let (tx, rx) = mpsc::channel(4);
        let closer = CancellationToken::new();
        let producer_closer = closer.clone();
        let script = self.script.clone();
        let delay = self.delay;
        let stopped = Arc::clone(&self.stopped_early);
        let hang_up = self.hang_up;

        tokio::spawn(async move {
            for step in script {
                if let Some(delay) = delay {
                    tokio::select! {
                        () = producer_closer.cancelled() => {
                            stopped.store(true, Ordering::SeqCst);
                            return;
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }

                let (token, last) = match step {
                    Step::Fragment(text) => (StreamingToken::Token(text.to_string()), false),
                    Step::Fail(message) => (StreamingToken::Error(message.to_string()), true),
                };

                tokio::select! {
                    () = producer_closer.cancelled() => {
                        stopped.store(true, Ordering::SeqCst);
                        return;
                    }
                    sent = tx.send(token) => {
                        if sent.is_err() {
                            stopped.store(true, Ordering::SeqCst);
                            return;
                        }
                    }
                }

                if last {
                    return;
                }
            }
            if !hang_up {
                let _ = tx.send(StreamingToken::Complete).await;
            }
        });

        Ok(FragmentStream::new(rx, closer))
    }
}

/// Render sink that cancels the exchange after `after` segments
struct CancellingSink {
    inner: CollectingSink,
    handle: AbortHandle,
    after: usize,
}

impl RenderSink for CancellingSink {
    fn display(&mut self, segment: &Segment) {
        self.inner.display(segment);
        if self.inner.segments.len() == self.after {
            self.handle.cancel();
        }
    }
}

struct FailingSpeech;

#[async_trait]
impl SpeechSink for FailingSpeech {
    async fn speak(&self, _segment: &Segment) -> Result<(), SpeechError> {
        Err(SpeechError::Exit {
            status: "exit status: 1".to_string(),
        })
    }
}

/// Speech sink that takes a while per utterance
#[derive(Clone, Default)]
struct SlowSpeech {
    inner: CollectingSpeech,
}

#[async_trait]
impl SpeechSink for SlowSpeech {
    async fn speak(&self, segment: &Segment) -> Result<(), SpeechError> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.inner.speak(segment).await
    }
}

fn settings(context_tokens: usize) -> SessionSettings {
    SessionSettings {
        model: ModelProfile {
            alias: "test".to_string(),
            id: "test-model".to_string(),
            context_tokens,
            api: ApiStyle::Completions,
        },
        temperature: 0.5,
        speech_boundary: SpeechBoundary::Sentence,
        use_voice: true,
        voice_over: false,
        use_code_format: false,
    }
}

// =============================================================================
// Budget Tests
// =============================================================================

/// A prompt of 110 estimated tokens against a ceiling of 100 resets exactly
/// once and is rejected without opening the source.
#[tokio::test]
async fn test_oversized_prompt_resets_once() {
    let source = ScriptedSource::fragments(&["unused"]);
    let mut conductor = StreamOrchestrator::new(source.clone(), settings(110));
    assert_eq!(conductor.settings().ceiling(), 100);

    // 108 characters plus the two wrapping newlines
    let prompt = "x".repeat(108);
    let result = conductor.submit(&prompt).await;

    match result {
        Err(ConductorError::PromptTooLarge {
            ceiling, remaining, ..
        }) => {
            assert_eq!(ceiling, 100);
            assert_eq!(remaining, -10);
        }
        other => panic!("expected PromptTooLarge, got {other:?}"),
    }
    assert_eq!(conductor.ledger().reset_count(), 1);
    assert_eq!(conductor.ledger().raw_transcript(), format!("\n{prompt}\n"));
    assert!(source.requests().is_empty());
    assert!(!conductor.exchange_in_progress());
}

#[tokio::test]
async fn test_full_context_resets_and_resubmits() {
    let source = ScriptedSource::fragments(&["0123456789", "0123456789", "0123456789"]);
    let mut conductor = StreamOrchestrator::new(source.clone(), settings(110));

    // "\n" + 30 + "\n" + 30 response chars = 62 tokens
    let first = "a".repeat(30);
    let outcome = conductor
        .exchange(&first, &mut CollectingSink::new(), None)
        .await
        .unwrap();
    assert_eq!(outcome.status, ExchangeStatus::Completed);
    assert_eq!(conductor.remaining_budget(), 38);

    // 40 more tokens overflow the ceiling, but fit on their own
    let second = "b".repeat(38);
    let submission = conductor.submit(&second).await.unwrap();

    assert!(submission.context_reset);
    assert_eq!(submission.remaining, 60);
    assert_eq!(conductor.ledger().reset_count(), 1);

    let requests = source.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].transcript, format!("\n{second}\n"));
    assert_eq!(requests[1].max_tokens, 60);
    assert!((requests[1].temperature - 0.5).abs() < f32::EPSILON);
}

#[tokio::test]
async fn test_reset_keeps_code_format_directive() {
    let source = ScriptedSource::fragments(&["yes"]);
    let mut session = settings(1000);
    session.use_code_format = true;
    let mut conductor = StreamOrchestrator::new(source.clone(), session);

    // Leaves the budget at exactly zero after the reply
    let filler = "f".repeat(985);
    let mut render = CollectingSink::new();
    conductor.exchange(&filler, &mut render, None).await.unwrap();
    assert_eq!(conductor.remaining_budget(), 0);

    let prompt = "Write a loop";
    let submission = conductor.submit(prompt).await.unwrap();
    assert!(submission.context_reset);

    let expected = format!("{CODE_FORMAT_DIRECTIVE}\n\n{prompt}\n");
    assert_eq!(conductor.ledger().raw_transcript(), expected);
    assert_eq!(source.requests()[1].transcript, expected);
}

// =============================================================================
// Cancellation Tests
// =============================================================================

#[tokio::test]
async fn test_cancel_mid_stream() {
    let mut source = ScriptedSource::fragments(&[
        "One", " two", " three", " four", " five", " six", " seven", " eight.",
    ]);
    source.delay = Some(Duration::from_millis(5));
    let mut conductor = StreamOrchestrator::new(source.clone(), settings(4096));
    let speech = CollectingSpeech::new();

    let submission = conductor.submit("Count").await.unwrap();
    let mut render = CancellingSink {
        inner: CollectingSink::new(),
        handle: conductor.abort_handle(),
        after: 2,
    };
    let outcome = conductor
        .drive(submission, &mut render, Some(Arc::new(speech.clone())))
        .await;

    assert_eq!(outcome.status, ExchangeStatus::Aborted);
    assert_eq!(outcome.fragments, 2);
    assert_eq!(outcome.response, "One two");

    // Only the consumed fragments were rendered; the flush is speech only
    let kinds: Vec<SegmentKind> = render.inner.segments.iter().map(|s| s.kind).collect();
    assert_eq!(kinds, vec![SegmentKind::Display, SegmentKind::Display]);

    // Flushed speech is dropped once cancelled
    assert!(speech.spoken().is_empty());
    assert_eq!(outcome.speech.skipped, 1);

    assert_eq!(conductor.ledger().raw_transcript(), "\nCount\nOne two\n");
    assert!(!conductor.exchange_in_progress());

    // The producer notices the close
    tokio::time::timeout(Duration::from_secs(1), async {
        while !source.stopped_early.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("producer kept streaming after cancel");
}

#[tokio::test]
async fn test_cancel_after_opening_fence() {
    let mut source = ScriptedSource::fragments(&["```", "let x", " = 1;", "\n", "```"]);
    source.delay = Some(Duration::from_millis(5));
    let mut conductor = StreamOrchestrator::new(source, settings(4096));

    let submission = conductor.submit("Code").await.unwrap();
    let mut render = CancellingSink {
        inner: CollectingSink::new(),
        handle: conductor.abort_handle(),
        after: 1,
    };
    let outcome = conductor.drive(submission, &mut render, None).await;

    assert_eq!(outcome.status, ExchangeStatus::Aborted);
    assert_eq!(outcome.fragments, 1);
    assert_eq!(render.inner.text_of(SegmentKind::Delimiter), "```\n");
    assert_eq!(render.inner.text_of(SegmentKind::CodeLine), "");
}

// =============================================================================
// Failure Tests
// =============================================================================

#[tokio::test]
async fn test_upstream_error_keeps_partial_ledger() {
    let source = ScriptedSource {
        script: vec![
            Step::Fragment("Partial"),
            Step::Fragment(" answer"),
            Step::Fail("connection reset"),
        ],
        ..ScriptedSource::default()
    };
    let mut conductor = StreamOrchestrator::new(source, settings(4096));
    let mut render = CollectingSink::new();

    let outcome = conductor.exchange("Q", &mut render, None).await.unwrap();

    assert_eq!(
        outcome.status,
        ExchangeStatus::Failed("connection reset".to_string())
    );
    assert_eq!(outcome.response, "Partial answer");
    assert_eq!(render.text_of(SegmentKind::Display), "Partial answer");
    assert_eq!(conductor.ledger().raw_transcript(), "\nQ\nPartial answer\n");

    // The session carries on
    assert!(!conductor.exchange_in_progress());
    assert!(conductor.submit("Again").await.is_ok());
}

#[tokio::test]
async fn test_source_hanging_up_fails_exchange() {
    let source = ScriptedSource {
        script: vec![Step::Fragment("Half a sent")],
        hang_up: true,
        ..ScriptedSource::default()
    };
    let mut conductor = StreamOrchestrator::new(source, settings(4096));
    let mut render = CollectingSink::new();

    let outcome = conductor.exchange("Hi", &mut render, None).await.unwrap();

    assert_eq!(
        outcome.status,
        ExchangeStatus::Failed(STREAM_ENDED_UNEXPECTEDLY.to_string())
    );
    assert_eq!(render.text_of(SegmentKind::Display), "Half a sent");
    assert_eq!(conductor.ledger().raw_transcript(), "\nHi\nHalf a sent\n");
    assert!(!conductor.exchange_in_progress());
}

#[tokio::test]
async fn test_leading_newline_is_recorded_not_shown() {
    let source = ScriptedSource::fragments(&["\n", "Hello", ".\n"]);
    let mut conductor = StreamOrchestrator::new(source, settings(4096));
    let mut render = CollectingSink::new();
    let speech = CollectingSpeech::new();

    let outcome = conductor
        .exchange("Hi", &mut render, Some(Arc::new(speech.clone())))
        .await
        .unwrap();

    assert_eq!(outcome.status, ExchangeStatus::Completed);
    assert_eq!(outcome.fragments, 3);
    assert_eq!(render.text_of(SegmentKind::Display), "Hello.\n");
    assert_eq!(speech.spoken(), vec!["Hello.\n"]);
    assert_eq!(conductor.ledger().raw_transcript(), "\nHi\n\nHello.\n");
}

#[tokio::test]
async fn test_open_failure_is_reported() {
    let source = ScriptedSource {
        refuse: true,
        ..ScriptedSource::default()
    };
    let mut conductor = StreamOrchestrator::new(source, settings(4096));

    let result = conductor
        .exchange("Hello", &mut CollectingSink::new(), None)
        .await;

    match result {
        Err(ConductorError::Upstream(message)) => assert!(message.contains("connection refused")),
        other => panic!("expected Upstream, got {other:?}"),
    }
    assert!(!conductor.exchange_in_progress());
}

#[tokio::test]
async fn test_speech_failure_does_not_stop_rendering() {
    let source = ScriptedSource::fragments(&["One.", " Two.", " Three."]);
    let mut conductor = StreamOrchestrator::new(source, settings(4096));
    let mut render = CollectingSink::new();

    let outcome = conductor
        .exchange("Go", &mut render, Some(Arc::new(FailingSpeech)))
        .await
        .unwrap();

    assert_eq!(outcome.status, ExchangeStatus::Completed);
    assert_eq!(render.text_of(SegmentKind::Display), "One. Two. Three.");
    assert_eq!(outcome.speech.spoken, 0);
    assert_eq!(outcome.speech.skipped, 2);
    assert!(outcome.speech.failure.is_some());
    assert_eq!(conductor.ledger().raw_transcript(), "\nGo\nOne. Two. Three.");
}

// =============================================================================
// Speech Routing Tests
// =============================================================================

#[tokio::test]
async fn test_code_block_is_never_spoken() {
    let source = ScriptedSource::fragments(&["```", "print(1)", "\n", "```"]);
    let mut conductor = StreamOrchestrator::new(source, settings(4096));
    let mut render = CollectingSink::new();
    let speech = CollectingSpeech::new();

    conductor
        .exchange("Code", &mut render, Some(Arc::new(speech.clone())))
        .await
        .unwrap();

    assert!(speech.spoken().is_empty());
    assert_eq!(render.text_of(SegmentKind::CodeLine), "print(1)");
    assert_eq!(render.text_of(SegmentKind::Display), "");
    assert_eq!(conductor.ledger().raw_transcript(), "\nCode\n```print(1)\n```");
}

#[tokio::test]
async fn test_slow_speech_keeps_order() {
    let source = ScriptedSource::fragments(&["First.", " Second.", " Third line\n", "Fourth."]);
    let mut conductor = StreamOrchestrator::new(source, settings(4096));
    let speech = SlowSpeech::default();

    let outcome = conductor
        .exchange("Go", &mut CollectingSink::new(), Some(Arc::new(speech.clone())))
        .await
        .unwrap();

    assert_eq!(outcome.speech.spoken, 4);
    assert_eq!(
        speech.inner.spoken(),
        vec!["First.", " Second.", " Third line\n", "Fourth."]
    );
}

#[tokio::test]
async fn test_line_boundary_policy() {
    let source = ScriptedSource::fragments(&["Dr. Smith", " says hi.\n", "Bye"]);
    let mut conductor = StreamOrchestrator::new(source, settings(4096));
    conductor.set_speech_boundary(SpeechBoundary::Line);
    let speech = CollectingSpeech::new();

    conductor
        .exchange("Hi", &mut CollectingSink::new(), Some(Arc::new(speech.clone())))
        .await
        .unwrap();

    assert_eq!(speech.spoken(), vec!["Dr. Smith says hi.\n", "Bye"]);
}

#[tokio::test]
async fn test_request_uses_active_profile() {
    let source = ScriptedSource::fragments(&["ok"]);
    let mut conductor = StreamOrchestrator::new(source.clone(), settings(4096));
    conductor.set_model(ModelProfile::builtin("chatgpt").unwrap());
    conductor.set_temperature(0.9).unwrap();

    conductor
        .exchange("Hi", &mut CollectingSink::new(), None)
        .await
        .unwrap();

    let request = &source.requests()[0];
    assert_eq!(request.model, "gpt-3.5-turbo");
    assert_eq!(request.api, ApiStyle::Chat);
    assert_eq!(request.transcript, "\nHi\n");
    assert_eq!(request.max_tokens, 4086 - 4);
}
