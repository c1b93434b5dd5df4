//! Background conversion worker and the request surface in front of it.
//!
//! [`ConversionService::spawn`] starts one long-lived worker task that runs
//! jobs one at a time through the [`Orchestrator`]. Callers submit a PDF
//! buffer and a configuration and get a [`JobHandle`] carrying the job id,
//! the progress stream and the eventual outcome.
//!
//! ```text
//! submit ─▶ JobRegistry.insert ─▶ inbox ─▶ worker ─▶ Orchestrator.run
//!    ▲                                         │
//!    └────── outcome / progress ◀── registry ◀─┘
//! ```
//!
//! A supervisor watches the worker. If it dies, every pending job is
//! rejected with [`ConversionError::WorkerCrashed`] and later submissions
//! fail with [`ConversionError::WorkerUnavailable`].

use crate::config::{ConversionConfig, OutputFormat};
use crate::error::ConversionError;
use crate::export::{default_output_path, write_output};
use crate::job::{cancel_pair, CancelToken, ConversionJob, JobId, PdfBytes};
use crate::orchestrator::Orchestrator;
use crate::output::{ConversionStats, ExtractionSource};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::registry::{JobOutcome, JobRegistry, PendingJob, RegistrySink};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub const MSG_STARTING: &str = "Starting conversion...";
pub const MSG_GENERATING: &str = "Text extracted. Generating output file...";
pub const MSG_DONE: &str = "Done!";

struct Submission {
    job: ConversionJob,
    cancel: CancelToken,
}

/// Handle to a running conversion worker.
pub struct ConversionService {
    inbox: mpsc::UnboundedSender<Submission>,
    registry: Arc<JobRegistry>,
    next_id: AtomicU64,
    crashed: Arc<AtomicBool>,
}

impl ConversionService {
    /// Start the worker and its supervisor on the current runtime.
    pub fn spawn(orchestrator: Arc<Orchestrator>) -> Self {
        let (inbox, rx) = mpsc::unbounded_channel();
        let registry = Arc::new(JobRegistry::new());
        let crashed = Arc::new(AtomicBool::new(false));

        let worker = tokio::spawn(worker_loop(orchestrator, Arc::clone(&registry), rx));
        tokio::spawn(supervise(worker, Arc::clone(&registry), Arc::clone(&crashed)));

        Self {
            inbox,
            registry,
            next_id: AtomicU64::new(1),
            crashed,
        }
    }

    /// Queue a conversion.
    ///
    /// Configuration errors are returned here, before the job is queued.
    pub fn submit(
        &self,
        pdf: impl Into<PdfBytes>,
        config: ConversionConfig,
    ) -> Result<JobHandle, ConversionError> {
        if self.crashed.load(Ordering::SeqCst) {
            return Err(ConversionError::WorkerUnavailable);
        }
        config.validate()?;

        let id = JobId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let (cancel_handle, cancel) = cancel_pair();

        self.registry.insert(
            id,
            PendingJob {
                outcome: outcome_tx,
                progress: progress_tx,
                cancel: cancel_handle,
            },
        );
        let job = ConversionJob::new(id, pdf, config);
        if self.inbox.send(Submission { job, cancel }).is_err() {
            self.registry.reject(id, ConversionError::WorkerUnavailable);
            return Err(ConversionError::WorkerUnavailable);
        }
        debug!("{}: queued", id);

        Ok(JobHandle {
            id,
            progress: progress_rx,
            outcome: outcome_rx,
        })
    }

    /// Cancel an in-flight or queued job. Only that job is affected.
    pub fn cancel(&self, id: JobId) -> bool {
        let cancelled = self.registry.cancel(id);
        if cancelled {
            info!("{}: cancellation requested", id);
        }
        cancelled
    }

    /// Number of submitted jobs without an outcome yet.
    pub fn pending_jobs(&self) -> usize {
        self.registry.len()
    }

    /// `false` once the worker has crashed.
    pub fn is_available(&self) -> bool {
        !self.crashed.load(Ordering::SeqCst)
    }

    /// Convert `pdf` and write the result to `output` (or the default path),
    /// reporting the full status sequence through `on_progress`.
    pub async fn convert_to_file<F>(
        &self,
        pdf: impl Into<PdfBytes>,
        config: ConversionConfig,
        output: Option<PathBuf>,
        mut on_progress: F,
    ) -> Result<SavedOutput, ConversionError>
    where
        F: FnMut(&str),
    {
        on_progress(MSG_STARTING);
        let handle = match self.submit(pdf, config.clone()) {
            Ok(handle) => handle,
            Err(e) => {
                on_progress(&format!("Error: {e}"));
                return Err(e);
            }
        };
        handle
            .save(config.output_format, output, on_progress)
            .await
    }
}

async fn worker_loop(
    orchestrator: Arc<Orchestrator>,
    registry: Arc<JobRegistry>,
    mut inbox: mpsc::UnboundedReceiver<Submission>,
) {
    while let Some(Submission { mut job, cancel }) = inbox.recv().await {
        if cancel.is_cancelled() {
            debug!("{}: cancelled while queued", job.id);
            continue;
        }
        let reporter =
            ProgressReporter::new(job.id, Arc::new(RegistrySink::new(Arc::clone(&registry))));
        let outcome = orchestrator.run(&mut job, &reporter, &cancel).await;
        // A cancelled job has already been rejected and removed.
        registry.complete(job.id, outcome);
    }
    debug!("Conversion worker stopped");
}

async fn supervise(worker: JoinHandle<()>, registry: Arc<JobRegistry>, crashed: Arc<AtomicBool>) {
    match worker.await {
        Ok(()) => {
            registry.reject_all(|| ConversionError::WorkerUnavailable);
        }
        Err(e) => {
            crashed.store(true, Ordering::SeqCst);
            error!("Conversion worker crashed: {}", e);
            let rejected = registry.reject_all(|| ConversionError::WorkerCrashed);
            error!("Rejected {} pending job(s)", rejected);
        }
    }
}

/// Where a finished job was written, with its counters.
#[derive(Debug, Clone)]
pub struct SavedOutput {
    pub path: PathBuf,
    pub source: ExtractionSource,
    pub stats: ConversionStats,
}

/// The caller's side of one submitted job.
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    progress: mpsc::UnboundedReceiver<ProgressEvent>,
    outcome: oneshot::Receiver<JobOutcome>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Progress lines as they arrive.
    pub fn progress(&mut self) -> &mut mpsc::UnboundedReceiver<ProgressEvent> {
        &mut self.progress
    }

    /// Wait for the outcome, ignoring progress.
    pub async fn wait(self) -> JobOutcome {
        self.outcome
            .await
            .unwrap_or(Err(ConversionError::WorkerCrashed))
    }

    /// Wait for the outcome, forwarding progress lines to `on_progress`.
    ///
    /// Every line sent before the outcome is forwarded before this returns.
    pub async fn wait_with_progress<F>(self, mut on_progress: F) -> JobOutcome
    where
        F: FnMut(ProgressEvent),
    {
        let JobHandle {
            mut progress,
            mut outcome,
            ..
        } = self;
        loop {
            tokio::select! {
                biased;
                Some(event) = progress.recv() => on_progress(event),
                result = &mut outcome => {
                    while let Ok(event) = progress.try_recv() {
                        on_progress(event);
                    }
                    return result.unwrap_or(Err(ConversionError::WorkerCrashed));
                }
            }
        }
    }

    /// Wait for the text and write it as `format` to `output` (or the
    /// default path).
    ///
    /// Failures are reported as `Error: <message>`. Cancellation reports
    /// nothing further.
    pub async fn save<F>(
        self,
        format: OutputFormat,
        output: Option<PathBuf>,
        mut on_progress: F,
    ) -> Result<SavedOutput, ConversionError>
    where
        F: FnMut(&str),
    {
        let result: Result<SavedOutput, ConversionError> = async {
            let converted = self.wait_with_progress(|e| on_progress(&e.text)).await?;
            on_progress(MSG_GENERATING);
            let path = output.unwrap_or_else(|| default_output_path(format));
            write_output(&path, format, &converted.text).await?;
            Ok(SavedOutput {
                path,
                source: converted.source,
                stats: converted.stats,
            })
        }
        .await;

        match &result {
            Ok(saved) => {
                on_progress(MSG_DONE);
                info!("Saved {}", saved.path.display());
            }
            Err(e) if e.is_cancellation() => {}
            Err(e) => on_progress(&format!("Error: {e}")),
        }
        result
    }
}
