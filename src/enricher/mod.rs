//! Periodic relationship enrichment over existing concepts.
//!
//! Each tick samples random unconnected concept pairs, fans them out across
//! workers, asks the model whether a factual relationship holds, and writes
//! any it reports. A global created-edge cap bounds the run; creation slots
//! are reserved before writing so the cap is exact even under concurrency.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use parking_lot::Mutex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::EnricherSettings;
use crate::llm::LanguageModel;
use crate::models::{Concept, EnricherStats};
use crate::store::{GraphStore, StoreError};

/// Errors surfaced by the enricher pipeline.
#[derive(Debug, Error, Diagnostic)]
pub enum EnrichError {
    #[error("enricher is already running")]
    #[diagnostic(code(conceptloom::enricher::already_running))]
    AlreadyRunning,

    #[error("enricher is not running")]
    #[diagnostic(code(conceptloom::enricher::not_running))]
    NotRunning,

    #[error("invalid input: {message}")]
    #[diagnostic(code(conceptloom::enricher::invalid_input))]
    InvalidInput { message: String },

    #[error(transparent)]
    #[diagnostic(code(conceptloom::enricher::store))]
    Store(#[from] StoreError),
}

#[derive(Default)]
struct Counters {
    batches_completed: AtomicU64,
    pairs_processed: AtomicU64,
    relationships_found: AtomicU64,
    relationships_created: AtomicU64,
}

#[derive(Default)]
struct Timestamps {
    started_at: Option<DateTime<Utc>>,
    last_batch_at: Option<DateTime<Utc>>,
}

/// Batch worker that augments the graph with edges between previously
/// unconnected pairs.
pub struct Enricher {
    store: Arc<dyn GraphStore>,
    llm: Arc<dyn LanguageModel>,
    settings: EnricherSettings,
    counters: Arc<Counters>,
    timestamps: Mutex<Timestamps>,
    running: Arc<AtomicBool>,
    stop_scope: Mutex<Option<CancellationToken>>,
}

impl Enricher {
    pub fn new(
        store: Arc<dyn GraphStore>,
        llm: Arc<dyn LanguageModel>,
        settings: EnricherSettings,
    ) -> Self {
        Self {
            store,
            llm,
            settings,
            counters: Arc::new(Counters::default()),
            timestamps: Mutex::new(Timestamps::default()),
            running: Arc::new(AtomicBool::new(false)),
            stop_scope: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Atomically observed cumulative counters.
    pub fn stats(&self) -> EnricherStats {
        let timestamps = self.timestamps.lock();
        EnricherStats {
            batches_completed: self.counters.batches_completed.load(Ordering::SeqCst),
            pairs_processed: self.counters.pairs_processed.load(Ordering::SeqCst),
            relationships_found: self.counters.relationships_found.load(Ordering::SeqCst),
            relationships_created: self.counters.relationships_created.load(Ordering::SeqCst),
            started_at: timestamps.started_at,
            last_batch_at: timestamps.last_batch_at,
            running: self.is_running(),
        }
    }

    /// Sample `count` unconnected pairs and process them once.
    #[instrument(skip(self), err)]
    pub async fn run_once(&self, count: usize) -> Result<EnricherStats, EnrichError> {
        if count < 1 {
            return Err(EnrichError::InvalidInput {
                message: "count must be at least 1".to_string(),
            });
        }
        let scope = CancellationToken::new();
        self.run_batch(count, &scope).await?;
        Ok(self.stats())
    }

    /// Tick forever: one batch per interval, until the created-edge cap is
    /// reached or `cancel` fires. Returns the final stats.
    pub async fn run_continuously(
        &self,
        cancel: &CancellationToken,
    ) -> Result<EnricherStats, EnrichError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(EnrichError::AlreadyRunning);
        }
        let scope = cancel.child_token();
        *self.stop_scope.lock() = Some(scope.clone());
        self.timestamps.lock().started_at = Some(Utc::now());
        info!(
            batch_size = self.settings.batch_size,
            interval_s = self.settings.interval_seconds,
            max_relationships = self.settings.max_relationships,
            "enricher started"
        );

        let mut ticker = tokio::time::interval(self.settings.interval());
        loop {
            tokio::select! {
                _ = scope.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match self.run_batch(self.settings.batch_size, &scope).await {
                Ok(()) => info!("{}", self.stats().summary()),
                Err(e) => warn!(error = %e, "batch skipped"),
            }
            if self.cap_reached() {
                info!(
                    created = self.counters.relationships_created.load(Ordering::SeqCst),
                    cap = self.settings.max_relationships,
                    "relationship cap reached"
                );
                break;
            }
        }

        *self.stop_scope.lock() = None;
        self.running.store(false, Ordering::SeqCst);
        Ok(self.stats())
    }

    /// Stop a running instance by cancelling its internal scope.
    pub fn stop(&self) -> Result<(), EnrichError> {
        let scope = self.stop_scope.lock();
        match scope.as_ref() {
            Some(token) => {
                token.cancel();
                Ok(())
            }
            None => Err(EnrichError::NotRunning),
        }
    }

    fn cap_reached(&self) -> bool {
        self.settings.max_relationships > 0
            && self.counters.relationships_created.load(Ordering::SeqCst)
                >= self.settings.max_relationships
    }

    /// Reserve a creation slot under the cap. Exact under concurrency:
    /// writers that lose the race never touch the store.
    fn reserve_creation_slot(&self) -> bool {
        let cap = self.settings.max_relationships;
        self.counters
            .relationships_created
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                if cap > 0 && current >= cap {
                    None
                } else {
                    Some(current + 1)
                }
            })
            .is_ok()
    }

    fn release_creation_slot(&self) {
        self.counters
            .relationships_created
            .fetch_sub(1, Ordering::SeqCst);
    }

    async fn run_batch(&self, count: usize, scope: &CancellationToken) -> Result<(), EnrichError> {
        let pairs = self.store.sample_unconnected_pairs(count).await?;
        debug!(sampled = pairs.len(), requested = count, "sampled unconnected pairs");

        let concurrency = self.settings.concurrency.max(1);
        let (jobs_tx, jobs_rx) = flume::bounded::<(Concept, Concept)>(concurrency);
        let mut workers = Vec::with_capacity(concurrency);
        for _ in 0..concurrency {
            let jobs_rx = jobs_rx.clone();
            let scope = scope.clone();
            let worker = self.batch_worker(jobs_rx, scope);
            workers.push(worker);
        }
        drop(jobs_rx);

        let dispatch = async {
            for pair in pairs {
                if scope.is_cancelled() {
                    break;
                }
                if jobs_tx.send_async(pair).await.is_err() {
                    break;
                }
            }
            drop(jobs_tx);
        };

        // Workers and dispatcher run together; the batch ends when both
        // sides are done.
        tokio::join!(dispatch, futures_util::future::join_all(workers));

        self.counters.batches_completed.fetch_add(1, Ordering::SeqCst);
        self.timestamps.lock().last_batch_at = Some(Utc::now());
        Ok(())
    }

    /// Process pairs from the jobs channel until it drains or the scope is
    /// cancelled. Per-pair failures are logged and skipped.
    fn batch_worker(
        &self,
        jobs_rx: flume::Receiver<(Concept, Concept)>,
        scope: CancellationToken,
    ) -> impl std::future::Future<Output = ()> + '_ {
        async move {
            loop {
                let (a, b) = tokio::select! {
                    _ = scope.cancelled() => break,
                    msg = jobs_rx.recv_async() => match msg {
                        Ok(pair) => pair,
                        Err(_) => break,
                    },
                };
                if self.cap_reached() {
                    break;
                }
                match self.llm.relationship(&a.name, &b.name, &scope).await {
                    Ok(Some(rel)) => {
                        self.counters.relationships_found.fetch_add(1, Ordering::SeqCst);
                        if self.reserve_creation_slot() {
                            let written = self
                                .store
                                .upsert_relationship(
                                    &rel.source,
                                    &rel.target,
                                    &rel.rel_type,
                                    rel.description.as_deref(),
                                    rel.strength,
                                )
                                .await;
                            match written {
                                Ok(_) => {
                                    debug!(
                                        source = %rel.source,
                                        target = %rel.target,
                                        rel_type = %rel.rel_type,
                                        "enriched relationship"
                                    );
                                }
                                Err(e) => {
                                    self.release_creation_slot();
                                    warn!(
                                        source = %rel.source,
                                        target = %rel.target,
                                        error = %e,
                                        "enriched edge upsert failed"
                                    );
                                }
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(a = %a.name, b = %b.name, error = %e, "relationship probe failed");
                    }
                }
                self.counters.pairs_processed.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use crate::models::{RelatedConcept, Relationship};
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    struct NoRelationModel;

    #[async_trait]
    impl LanguageModel for NoRelationModel {
        async fn related_concepts(
            &self,
            _concept: &str,
            _cancel: &CancellationToken,
        ) -> Result<Vec<RelatedConcept>, LlmError> {
            Ok(Vec::new())
        }

        async fn relationship(
            &self,
            _a: &str,
            _b: &str,
            _cancel: &CancellationToken,
        ) -> Result<Option<Relationship>, LlmError> {
            Ok(None)
        }
    }

    fn settings() -> EnricherSettings {
        EnricherSettings {
            batch_size: 10,
            interval_seconds: 1,
            max_relationships: 0,
            concurrency: 2,
        }
    }

    #[tokio::test]
    async fn run_once_rejects_zero_count() {
        let enricher = Enricher::new(
            Arc::new(MemoryStore::new()),
            Arc::new(NoRelationModel),
            settings(),
        );
        assert!(matches!(
            enricher.run_once(0).await,
            Err(EnrichError::InvalidInput { .. })
        ));
    }

    #[tokio::test]
    async fn stop_on_idle_instance_is_an_error() {
        let enricher = Enricher::new(
            Arc::new(MemoryStore::new()),
            Arc::new(NoRelationModel),
            settings(),
        );
        assert!(matches!(enricher.stop(), Err(EnrichError::NotRunning)));
    }

    #[tokio::test]
    async fn empty_graph_batch_counts_but_processes_nothing() {
        let enricher = Enricher::new(
            Arc::new(MemoryStore::new()),
            Arc::new(NoRelationModel),
            settings(),
        );
        let stats = enricher.run_once(10).await.unwrap();
        assert_eq!(stats.batches_completed, 1);
        assert_eq!(stats.pairs_processed, 0);
        assert_eq!(stats.relationships_created, 0);
    }

    #[test]
    fn creation_slots_are_exact_under_the_cap() {
        let enricher = Enricher::new(
            Arc::new(MemoryStore::new()),
            Arc::new(NoRelationModel),
            EnricherSettings {
                max_relationships: 2,
                ..settings()
            },
        );
        assert!(enricher.reserve_creation_slot());
        assert!(enricher.reserve_creation_slot());
        assert!(!enricher.reserve_creation_slot());
        enricher.release_creation_slot();
        assert!(enricher.reserve_creation_slot());
        assert!(enricher.cap_reached());
    }
}
