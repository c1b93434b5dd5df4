//! Job identity, lifecycle state and per-job cancellation.

use crate::config::ConversionConfig;
use crate::error::ConversionError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Identifier of one conversion request, unique per service instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Lifecycle of a [`ConversionJob`].
///
/// ```text
/// pending ─▶ (text layer) ─▶ done
///    └─▶ rendering ─▶ recognizing ─▶ assembling ─▶ done
///                  any stage ─▶ failed | cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Rendering,
    Recognizing,
    Assembling,
    Done,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed | JobState::Cancelled)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::Rendering => "rendering",
            JobState::Recognizing => "recognizing",
            JobState::Assembling => "assembling",
            JobState::Done => "done",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// PDF bytes shared between the job and the blocking render threads.
pub type PdfBytes = Arc<[u8]>;

/// One conversion request, owned by the orchestrator while it runs.
#[derive(Debug)]
pub struct ConversionJob {
    pub id: JobId,
    pub pdf: PdfBytes,
    pub config: ConversionConfig,
    state: JobState,
}

impl ConversionJob {
    pub fn new(id: JobId, pdf: impl Into<PdfBytes>, config: ConversionConfig) -> Self {
        Self {
            id,
            pdf: pdf.into(),
            config,
            state: JobState::Pending,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Move to `next`. Terminal states are sticky.
    pub(crate) fn transition(&mut self, next: JobState) {
        if self.state.is_terminal() {
            return;
        }
        debug!("{}: {} → {}", self.id, self.state, next);
        self.state = next;
    }
}

/// Create a linked cancel handle / token pair for one job.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

/// Sender side: held by the job registry.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Receiver side: cloned into every suspension point of the job.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// A token that is never cancelled.
    pub fn none() -> Self {
        let (_handle, token) = cancel_pair();
        token
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the job is cancelled. Pends forever if the handle is
    /// dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let outcome = rx.wait_for(|cancelled| *cancelled).await.map(|_| ());
        if outcome.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Fail fast with [`ConversionError::Cancelled`].
    pub fn check(&self) -> Result<(), ConversionError> {
        if self.is_cancelled() {
            Err(ConversionError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Race `fut` against cancellation. The future is dropped on cancel.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, ConversionError> {
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(ConversionError::Cancelled),
            out = fut => Ok(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn terminal_states_are_sticky() {
        let mut job = ConversionJob::new(JobId(1), vec![1u8, 2, 3], ConversionConfig::default());
        assert_eq!(job.state(), JobState::Pending);
        job.transition(JobState::Rendering);
        job.transition(JobState::Failed);
        job.transition(JobState::Done);
        assert_eq!(job.state(), JobState::Failed);
    }

    #[tokio::test]
    async fn run_returns_cancelled_when_token_fires() {
        let (handle, token) = cancel_pair();
        let slow = tokio::time::sleep(Duration::from_secs(30));
        let task = tokio::spawn(async move { token.run(slow).await });
        handle.cancel();
        let out = task.await.unwrap();
        assert!(matches!(out, Err(ConversionError::Cancelled)));
    }

    #[tokio::test]
    async fn none_token_never_cancels() {
        let token = CancelToken::none();
        assert!(!token.is_cancelled());
        let out = token.run(async { 42 }).await.unwrap();
        assert_eq!(out, 42);
    }

    #[test]
    fn check_reflects_handle() {
        let (handle, token) = cancel_pair();
        assert!(token.check().is_ok());
        handle.cancel();
        assert!(token.check().unwrap_err().is_cancellation());
    }

    #[test]
    fn job_id_display() {
        assert_eq!(JobId(12).to_string(), "job-12");
    }
}
