//! Progress channel from a running job to whoever submitted it.
//!
//! Progress is a stream of short human-readable strings, tagged with the job
//! id and delivered best-effort: a sink that has gone away simply drops them.
//!
//! # Example
//!
//! ```rust
//! use scannio::{JobId, ProgressEvent, ProgressReporter};
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//!
//! let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
//! let reporter = ProgressReporter::new(JobId(7), Arc::new(tx));
//! reporter.report("Converting PDF to images...");
//!
//! let event = rx.try_recv().unwrap();
//! assert_eq!(event.job_id, JobId(7));
//! assert_eq!(event.text, "Converting PDF to images...");
//! ```

use crate::job::JobId;
use std::sync::Arc;
use tokio::sync::mpsc;

/// One status line for one job.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ProgressEvent {
    pub job_id: JobId,
    pub text: String,
}

/// Receives progress events.
///
/// Implementations must be `Send + Sync`: local pool slots report page
/// completion concurrently.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, event: ProgressEvent);
}

/// Discards every event.
pub struct NoopProgressSink;

impl ProgressSink for NoopProgressSink {
    fn on_progress(&self, _event: ProgressEvent) {}
}

impl ProgressSink for mpsc::UnboundedSender<ProgressEvent> {
    fn on_progress(&self, event: ProgressEvent) {
        // Receiver gone means nobody is listening any more.
        let _ = self.send(event);
    }
}

/// A sink bound to one job id. Cheap to clone.
#[derive(Clone)]
pub struct ProgressReporter {
    job_id: JobId,
    sink: Arc<dyn ProgressSink>,
}

impl ProgressReporter {
    pub fn new(job_id: JobId, sink: Arc<dyn ProgressSink>) -> Self {
        Self { job_id, sink }
    }

    /// A reporter that discards everything.
    pub fn silent(job_id: JobId) -> Self {
        Self::new(job_id, Arc::new(NoopProgressSink))
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn report(&self, text: impl Into<String>) {
        self.sink.on_progress(ProgressEvent {
            job_id: self.job_id,
            text: text.into(),
        });
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("job_id", &self.job_id)
            .finish_non_exhaustive()
    }
}
