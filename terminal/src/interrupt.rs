//! Ctrl-C delivery
//!
//! The shell subscribes to SIGINT once, at startup, and keeps the
//! subscription for the whole session. Presses that arrive while nobody is
//! waiting stay queued, so an interrupt during a slow request open or before
//! the stream is driven is still seen.

use std::future::Future;

use gpterm_core::AbortHandle;
use tokio::sync::mpsc;

/// Queue of Ctrl-C presses
pub struct Interrupts {
    rx: mpsc::UnboundedReceiver<()>,
}

impl Interrupts {
    /// Subscribe to SIGINT for the rest of the process
    ///
    /// # Errors
    ///
    /// Fails if the signal handler cannot be installed.
    #[cfg(unix)]
    pub fn listen() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while sigint.recv().await.is_some() {
                if tx.send(()).is_err() {
                    break;
                }
            }
        });
        Ok(Self { rx })
    }

    /// Subscribe to Ctrl-C for the rest of the process
    ///
    /// # Errors
    ///
    /// Never fails on this platform; listener errors end the subscription.
    #[cfg(not(unix))]
    pub fn listen() -> std::io::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if tx.send(()).is_err() {
                    break;
                }
            }
        });
        Ok(Self { rx })
    }

    /// An interrupt queue fed by hand
    #[cfg(test)]
    pub fn manual() -> (mpsc::UnboundedSender<()>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    /// Run `fut` unless an interrupt comes first
    ///
    /// Returns `None` when interrupted; `fut` is dropped.
    pub async fn race<F: Future>(&mut self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            Some(()) = self.rx.recv() => None,
            output = fut => Some(output),
        }
    }

    /// Run `fut` to completion, cancelling `abort` on every interrupt
    pub async fn guard<F: Future>(&mut self, fut: F, abort: &AbortHandle) -> F::Output {
        tokio::pin!(fut);
        loop {
            tokio::select! {
                biased;
                Some(()) = self.rx.recv() => {
                    tracing::debug!("Interrupt, aborting response");
                    abort.cancel();
                }
                output = &mut fut => return output,
            }
        }
    }
}
