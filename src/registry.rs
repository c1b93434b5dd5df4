//! Job Registry / Progress Channel.
//!
//! Maps in-flight job ids to the one-shot outcome sender, the progress sender
//! and the cancel handle of that job. An entry is inserted on dispatch and
//! removed by the first terminal event (resolve, reject, cancel), so each job
//! receives at most one outcome. Progress for ids that are no longer
//! registered is dropped.

use crate::error::ConversionError;
use crate::job::{CancelHandle, JobId};
use crate::output::ConversionOutput;
use crate::progress::{ProgressEvent, ProgressSink};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Final result delivered to whoever submitted a job.
pub type JobOutcome = Result<ConversionOutput, ConversionError>;

/// Everything the registry keeps for one in-flight job.
#[derive(Debug)]
pub struct PendingJob {
    pub outcome: oneshot::Sender<JobOutcome>,
    pub progress: mpsc::UnboundedSender<ProgressEvent>,
    pub cancel: CancelHandle,
}

/// Job id → pending job. Shared by `Arc` between the request surface and the
/// background worker.
#[derive(Debug, Default)]
pub struct JobRegistry {
    pending: Mutex<HashMap<JobId, PendingJob>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, PendingJob>> {
        // The map stays consistent even if a holder panicked.
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, id: JobId, job: PendingJob) {
        self.lock().insert(id, job);
    }

    pub fn contains(&self, id: JobId) -> bool {
        self.lock().contains_key(&id)
    }

    /// Forward a progress line. Returns `false` if the job is unknown.
    pub fn progress(&self, id: JobId, text: impl Into<String>) -> bool {
        let pending = self.lock();
        match pending.get(&id) {
            Some(job) => {
                let _ = job.progress.send(ProgressEvent {
                    job_id: id,
                    text: text.into(),
                });
                true
            }
            None => false,
        }
    }

    /// Deliver `outcome` and forget the job. Returns `false` if the job had
    /// already reached a terminal event.
    pub fn complete(&self, id: JobId, outcome: JobOutcome) -> bool {
        let Some(job) = self.lock().remove(&id) else {
            debug!("{}: outcome dropped, job no longer registered", id);
            return false;
        };
        // Receiver gone means the submitter stopped waiting.
        let _ = job.outcome.send(outcome);
        true
    }

    pub fn resolve(&self, id: JobId, output: ConversionOutput) -> bool {
        self.complete(id, Ok(output))
    }

    pub fn reject(&self, id: JobId, error: ConversionError) -> bool {
        self.complete(id, Err(error))
    }

    /// Fire the job's cancel token and reject it with
    /// [`ConversionError::Cancelled`]. Nothing else is delivered for the job
    /// afterwards. Returns `false` for unknown ids.
    pub fn cancel(&self, id: JobId) -> bool {
        let Some(job) = self.lock().remove(&id) else {
            return false;
        };
        job.cancel.cancel();
        let _ = job.outcome.send(Err(ConversionError::Cancelled));
        true
    }

    /// Reject every pending job with `error()`. Returns how many were rejected.
    pub fn reject_all(&self, error: impl Fn() -> ConversionError) -> usize {
        let drained: Vec<(JobId, PendingJob)> = self.lock().drain().collect();
        let count = drained.len();
        for (id, job) in drained {
            debug!("{}: rejected", id);
            job.cancel.cancel();
            let _ = job.outcome.send(Err(error()));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// [`ProgressSink`] that routes through the registry, so progress stops the
/// moment a job is cancelled or completed.
pub struct RegistrySink {
    registry: Arc<JobRegistry>,
}

impl RegistrySink {
    pub fn new(registry: Arc<JobRegistry>) -> Self {
        Self { registry }
    }
}

impl ProgressSink for RegistrySink {
    fn on_progress(&self, event: ProgressEvent) {
        self.registry.progress(event.job_id, event.text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::cancel_pair;
    use crate::output::{ConversionStats, ExtractionSource};

    fn pending() -> (
        PendingJob,
        oneshot::Receiver<JobOutcome>,
        mpsc::UnboundedReceiver<ProgressEvent>,
        crate::job::CancelToken,
    ) {
        let (outcome, outcome_rx) = oneshot::channel();
        let (progress, progress_rx) = mpsc::unbounded_channel();
        let (cancel, token) = cancel_pair();
        (
            PendingJob {
                outcome,
                progress,
                cancel,
            },
            outcome_rx,
            progress_rx,
            token,
        )
    }

    fn output() -> ConversionOutput {
        ConversionOutput {
            text: String::new(),
            pages: Vec::new(),
            source: ExtractionSource::TextLayer,
            stats: ConversionStats::default(),
        }
    }

    #[test]
    fn progress_for_unknown_job_is_dropped() {
        let registry = JobRegistry::new();
        assert!(!registry.progress(JobId(99), "Processing page 1 of 1..."));
    }

    #[tokio::test]
    async fn resolve_delivers_once_and_forgets() {
        let registry = JobRegistry::new();
        let (job, outcome_rx, mut progress_rx, _token) = pending();
        registry.insert(JobId(1), job);

        assert!(registry.progress(JobId(1), "Converting PDF to images..."));
        assert!(registry.resolve(JobId(1), output()));
        assert!(!registry.reject(JobId(1), ConversionError::Internal("late".into())));

        assert!(outcome_rx.await.unwrap().is_ok());
        assert_eq!(progress_rx.recv().await.unwrap().text, "Converting PDF to images...");
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn cancel_fires_token_and_blocks_later_events() {
        let registry = JobRegistry::new();
        let (job, outcome_rx, _progress_rx, token) = pending();
        registry.insert(JobId(2), job);

        assert!(registry.cancel(JobId(2)));
        assert!(token.is_cancelled());
        assert!(!registry.progress(JobId(2), "Processing page 1 of 2..."));
        assert!(!registry.resolve(JobId(2), output()));
        assert!(outcome_rx.await.unwrap().unwrap_err().is_cancellation());
        assert!(!registry.cancel(JobId(2)));
    }

    #[tokio::test]
    async fn reject_all_leaves_nothing_pending() {
        let registry = JobRegistry::new();
        let (a, a_rx, _, _) = pending();
        let (b, b_rx, _, _) = pending();
        registry.insert(JobId(1), a);
        registry.insert(JobId(2), b);

        assert_eq!(registry.reject_all(|| ConversionError::WorkerCrashed), 2);
        assert!(registry.is_empty());
        for rx in [a_rx, b_rx] {
            let err = rx.await.unwrap().unwrap_err();
            assert_eq!(err.to_string(), "A fatal worker error occurred.");
        }
    }
}
