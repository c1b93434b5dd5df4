//! Bounded pool of stateful local recognition engines.
//!
//! The pool belongs to one job. Its size is
//! `min(available parallelism, max_workers, page count)`. Pages are dealt
//! round-robin to the slots, each slot works through its share one page at a
//! time, and all slots run concurrently. Every engine that was started is
//! terminated before `recognize` returns, whatever the outcome.

use crate::config::OcrEngine;
use crate::error::{ConversionError, PageError};
use crate::ocr::{Granularity, OcrBackend, RecognitionContext, RecognitionInput};
use crate::output::{PageImage, PageResult};
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One running engine instance, owned by a single pool slot.
#[async_trait]
pub trait RecognitionEngine: Send {
    /// Recognise one page. Errors stay with the page.
    async fn recognize(&mut self, page: &PageImage) -> Result<String, PageError>;

    /// Release the engine's resources. Called exactly once per engine.
    async fn terminate(&mut self);
}

/// Starts engines for the pool.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    fn engine(&self) -> OcrEngine;

    /// Start the engine for `slot`, with its language models loaded.
    async fn spawn(&self, slot: usize) -> Result<Box<dyn RecognitionEngine>, ConversionError>;
}

/// Page-granular backend that drives a pool of [`RecognitionEngine`]s.
pub struct LocalOcrBackend {
    factory: Arc<dyn EngineFactory>,
    max_workers: usize,
    parallelism: usize,
}

impl LocalOcrBackend {
    pub fn new(factory: Arc<dyn EngineFactory>, max_workers: usize) -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(max_workers);
        Self {
            factory,
            max_workers: max_workers.max(1),
            parallelism,
        }
    }

    /// Override the detected CPU parallelism.
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Number of slots used for `page_count` pages.
    pub fn pool_size(&self, page_count: usize) -> usize {
        self.parallelism
            .min(self.max_workers)
            .min(page_count)
            .max(1)
    }

    async fn spawn_engines(
        &self,
        size: usize,
        ctx: &RecognitionContext,
    ) -> Result<Vec<Box<dyn RecognitionEngine>>, ConversionError> {
        let mut engines: Vec<Box<dyn RecognitionEngine>> = Vec::with_capacity(size);
        for slot in 0..size {
            let spawned = ctx
                .cancel
                .run(self.factory.spawn(slot))
                .await
                .and_then(|spawned| spawned);
            match spawned {
                Ok(engine) => engines.push(engine),
                Err(e) => {
                    warn!("Failed to start {} engine {}: {}", self.factory.engine(), slot, e);
                    for engine in engines.iter_mut() {
                        engine.terminate().await;
                    }
                    return Err(e);
                }
            }
        }
        Ok(engines)
    }
}

/// Deal pages to `size` slots: page i goes to slot `i % size`.
pub fn assign_round_robin(pages: Vec<PageImage>, size: usize) -> Vec<Vec<PageImage>> {
    let size = size.max(1);
    let mut buckets: Vec<Vec<PageImage>> = (0..size).map(|_| Vec::new()).collect();
    for (i, page) in pages.into_iter().enumerate() {
        buckets[i % size].push(page);
    }
    buckets
}

/// Run one slot's share sequentially. Returns `None` on cancellation.
async fn run_slot(
    slot: usize,
    engine: &mut Box<dyn RecognitionEngine>,
    pages: Vec<PageImage>,
    ctx: &RecognitionContext,
) -> Option<Vec<PageResult>> {
    let mut results = Vec::with_capacity(pages.len());
    for page in &pages {
        match ctx.cancel.run(engine.recognize(page)).await {
            Ok(Ok(text)) => {
                debug!("Slot {}: page {} → {} chars", slot, page.page_num, text.len());
                results.push(PageResult::ok(page.page_num, text));
            }
            Ok(Err(e)) => {
                warn!("Slot {}: {}", slot, e);
                results.push(PageResult::failed(page.page_num, e));
            }
            Err(_) => return None,
        }
        ctx.page_finished();
    }
    Some(results)
}

#[async_trait]
impl OcrBackend for LocalOcrBackend {
    fn engine(&self) -> OcrEngine {
        self.factory.engine()
    }

    fn granularity(&self) -> Granularity {
        Granularity::Page
    }

    async fn recognize(
        &self,
        input: RecognitionInput,
        ctx: &RecognitionContext,
    ) -> Result<Vec<PageResult>, ConversionError> {
        let pages = input.into_pages(self.engine())?;
        if pages.is_empty() {
            return Ok(Vec::new());
        }

        let size = self.pool_size(pages.len());
        info!(
            "Starting {} {} engine(s) for {} pages",
            size,
            self.engine(),
            pages.len()
        );
        let engines = self.spawn_engines(size, ctx).await?;
        let buckets = assign_round_robin(pages, size);

        let slots = engines
            .into_iter()
            .zip(buckets)
            .enumerate()
            .map(|(slot, (mut engine, share))| async move {
                let outcome = run_slot(slot, &mut engine, share, ctx).await;
                engine.terminate().await;
                outcome
            });
        let outcomes = join_all(slots).await;

        let mut results = Vec::new();
        for outcome in outcomes {
            match outcome {
                Some(slot_results) => results.extend(slot_results),
                None => return Err(ConversionError::Cancelled),
            }
        }
        results.sort_by_key(|r| r.page_num);
        Ok(results)
    }
}
