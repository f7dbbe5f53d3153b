//! Speech Queue
//!
//! Decouples speech from rendering. Speech segments are copied into a queue
//! drained by a single worker task, so utterances stay in order while the
//! renderer keeps pace with the stream.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::classifier::Segment;
use crate::sinks::SpeechSink;

/// What happened to the speech of one exchange
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpeechReport {
    /// Utterances handed to the sink successfully
    pub spoken: usize,
    /// Utterances dropped after a failure or cancellation
    pub skipped: usize,
    /// First sink failure, if any
    pub failure: Option<String>,
}

/// Ordered, non-blocking speech delivery for one exchange
pub struct SpeechQueue {
    tx: Option<mpsc::UnboundedSender<Segment>>,
    worker: Option<JoinHandle<SpeechReport>>,
}

impl SpeechQueue {
    /// Start a worker that voices queued segments through `sink`
    ///
    /// Once `cancel` fires, the utterance in progress completes and everything
    /// still queued is dropped.
    #[must_use]
    pub fn spawn(sink: Arc<dyn SpeechSink>, cancel: CancellationToken) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Segment>();

        let worker = tokio::spawn(async move {
            let mut report = SpeechReport::default();
            let mut muted = false;

            while let Some(segment) = rx.recv().await {
                if muted || cancel.is_cancelled() {
                    report.skipped += 1;
                    continue;
                }
                if segment.text.trim().is_empty() {
                    continue;
                }

                match sink.speak(&segment).await {
                    Ok(()) => report.spoken += 1,
                    Err(e) => {
                        tracing::warn!(error = %e, "Speech failed, muting rest of response");
                        report.failure = Some(e.to_string());
                        muted = true;
                    }
                }
            }

            report
        });

        Self {
            tx: Some(tx),
            worker: Some(worker),
        }
    }

    /// A queue that discards everything (voice turned off)
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            tx: None,
            worker: None,
        }
    }

    /// Whether segments are actually voiced
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Queue a copy of `segment` if it may be spoken
    pub fn enqueue(&self, segment: &Segment) {
        if !segment.is_speakable() {
            return;
        }
        if let Some(tx) = &self.tx {
            // Worker gone means it panicked; nothing left to voice
            let _ = tx.send(segment.clone());
        }
    }

    /// Close the queue and wait for queued speech to drain
    pub async fn finish(mut self) -> SpeechReport {
        drop(self.tx.take());

        match self.worker.take() {
            Some(worker) => match worker.await {
                Ok(report) => report,
                Err(e) => {
                    tracing::error!(error = %e, "Speech worker panicked");
                    SpeechReport {
                        failure: Some(e.to_string()),
                        ..SpeechReport::default()
                    }
                }
            },
            None => SpeechReport::default(),
        }
    }
}
