//! Breadth-first concept graph construction.
//!
//! A seed concept is expanded by asking the model for related concepts; each
//! suggestion is written to the store and fed back into a bounded frontier
//! until the node budget, deadline, or cancellation stops growth. A fixed
//! pool of workers shares the frontier; a single critical section
//! (check-and-claim) is the only mechanism enforcing the budget, so the
//! processed count can never exceed `max_nodes` regardless of scheduling.
//!
//! After expansion, [`Builder::mine_random_relationships`] probes random
//! pairs of processed concepts for edges the breadth-first pass missed.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use miette::Diagnostic;
use parking_lot::Mutex;
use rand::Rng;
use rustc_hash::FxHashSet;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::llm::{LanguageModel, LlmError};
use crate::models::{BuildStats, MiningStats};
use crate::store::{GraphStore, StoreError};

/// Errors surfaced by the builder pipeline.
///
/// Per-concept and per-edge failures are logged and absorbed; only
/// validation, startup, deadline, and cancellation reach the caller.
#[derive(Debug, Error, Diagnostic)]
pub enum BuildError {
    #[error("invalid input: {message}")]
    #[diagnostic(code(conceptloom::builder::invalid_input))]
    InvalidInput { message: String },

    #[error("build deadline elapsed after {deadline:?}")]
    #[diagnostic(
        code(conceptloom::builder::timeout),
        help("Raise graph.timeout_minutes or lower graph.max_nodes.")
    )]
    Timeout { deadline: Duration },

    #[error("build cancelled")]
    #[diagnostic(code(conceptloom::builder::cancelled))]
    Cancelled,

    #[error(transparent)]
    #[diagnostic(code(conceptloom::builder::store))]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(code(conceptloom::builder::llm))]
    Llm(#[from] LlmError),
}

/// Worker-pool sizing and bookkeeping cadence.
#[derive(Debug, Clone, Copy)]
pub struct BuilderOptions {
    pub worker_count: usize,
    /// Run orphan cleanup every this many claimed concepts.
    pub cleanup_stride: usize,
}

impl Default for BuilderOptions {
    fn default() -> Self {
        Self {
            worker_count: 5,
            cleanup_stride: 5,
        }
    }
}

#[derive(Default)]
struct Progress {
    processed: FxHashSet<String>,
    node_count: usize,
}

enum Claim {
    /// The concept is ours; `ordinal` is its 1-based position in the run.
    Claimed { ordinal: usize },
    AlreadyProcessed,
    BudgetExhausted,
}

/// Shared state for one expansion run.
struct Expansion {
    store: Arc<dyn GraphStore>,
    llm: Arc<dyn LanguageModel>,
    progress: Arc<Mutex<Progress>>,
    max_nodes: usize,
    cleanup_stride: usize,
    frontier_tx: flume::Sender<String>,
    frontier_rx: flume::Receiver<String>,
    /// Concepts enqueued or currently being expanded. Zero means the
    /// frontier is drained and every worker is idle.
    in_flight: AtomicUsize,
    relationships_created: AtomicU64,
    /// Cancelled by the deadline timer or the caller's scope.
    scope: CancellationToken,
    /// Cancelled when the run is over: drained frontier or budget reached.
    done: CancellationToken,
}

impl Expansion {
    fn claim(&self, name: &str) -> Claim {
        let mut progress = self.progress.lock();
        if progress.node_count >= self.max_nodes {
            return Claim::BudgetExhausted;
        }
        if progress.processed.contains(name) {
            return Claim::AlreadyProcessed;
        }
        progress.processed.insert(name.to_string());
        progress.node_count += 1;
        Claim::Claimed {
            ordinal: progress.node_count,
        }
    }

    /// Queue a discovered concept unless it is already claimed or the budget
    /// is spent. Non-blocking; a full frontier drops silently (capacity
    /// equals the node budget, so anything dropped could never be claimed).
    fn enqueue(&self, name: String) {
        {
            let progress = self.progress.lock();
            if progress.node_count >= self.max_nodes || progress.processed.contains(&name) {
                return;
            }
        }
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.frontier_tx.try_send(name).is_err() {
            self.release_item();
        }
    }

    fn release_item(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.done.cancel();
        }
    }

    async fn worker(self: Arc<Self>, worker_id: usize) {
        loop {
            let name = tokio::select! {
                _ = self.scope.cancelled() => break,
                _ = self.done.cancelled() => break,
                msg = self.frontier_rx.recv_async() => match msg {
                    Ok(name) => name,
                    Err(_) => break,
                },
            };
            match self.claim(&name) {
                Claim::BudgetExhausted => {
                    self.release_item();
                    self.done.cancel();
                    break;
                }
                Claim::AlreadyProcessed => {
                    self.release_item();
                }
                Claim::Claimed { ordinal } => {
                    debug!(worker_id, concept = %name, ordinal, "expanding concept");
                    self.expand(&name).await;
                    if ordinal % self.cleanup_stride == 0 {
                        self.run_cleanup().await;
                    }
                    if ordinal == self.max_nodes {
                        self.done.cancel();
                    }
                    self.release_item();
                }
            }
        }
    }

    /// Expand one claimed concept. Every failure in here is per-item: log
    /// and move on, never fail the build.
    async fn expand(&self, name: &str) {
        if let Err(e) = self.store.upsert_concept(name, None).await {
            warn!(concept = %name, error = %e, "concept upsert failed");
        }
        let related = match self.llm.related_concepts(name, &self.scope).await {
            Ok(related) => related,
            Err(e) => {
                warn!(concept = %name, error = %e, "related-concepts query failed");
                return;
            }
        };
        for suggestion in related {
            if suggestion.name.is_empty() || suggestion.name == name {
                continue;
            }
            if let Err(e) = self.store.upsert_concept(&suggestion.name, None).await {
                warn!(concept = %suggestion.name, error = %e, "concept upsert failed");
                continue;
            }
            match self
                .store
                .upsert_relationship(
                    name,
                    &suggestion.name,
                    &suggestion.relation,
                    Some(suggestion.related_to.as_str()),
                    None,
                )
                .await
            {
                Ok(_) => {
                    self.relationships_created.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => {
                    debug!(
                        source = %name,
                        target = %suggestion.name,
                        error = %e,
                        "edge upsert skipped"
                    );
                }
            }
            self.enqueue(suggestion.name);
        }
    }

    async fn run_cleanup(&self) {
        match self.store.cleanup_orphan_edges().await {
            Ok(removed) if removed > 0 => debug!(removed, "removed orphan edges"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "orphan edge cleanup failed"),
        }
        match self.store.cleanup_orphan_nodes().await {
            Ok(removed) if removed > 0 => debug!(removed, "removed orphan nodes"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "orphan node cleanup failed"),
        }
    }
}

/// Frontier-expansion pipeline over a store and a model.
///
/// The two phases are strictly sequential: `build` first, then optionally
/// `mine_random_relationships` over the processed set the build left behind.
pub struct Builder {
    store: Arc<dyn GraphStore>,
    llm: Arc<dyn LanguageModel>,
    options: BuilderOptions,
    progress: Arc<Mutex<Progress>>,
}

impl Builder {
    pub fn new(store: Arc<dyn GraphStore>, llm: Arc<dyn LanguageModel>) -> Self {
        Self::with_options(store, llm, BuilderOptions::default())
    }

    pub fn with_options(
        store: Arc<dyn GraphStore>,
        llm: Arc<dyn LanguageModel>,
        options: BuilderOptions,
    ) -> Self {
        Self {
            store,
            llm,
            options,
            progress: Arc::new(Mutex::new(Progress::default())),
        }
    }

    /// Concepts claimed by the most recent build.
    pub fn node_count(&self) -> usize {
        self.progress.lock().node_count
    }

    /// Snapshot of the processed set, sorted for stable output.
    pub fn processed_concepts(&self) -> Vec<String> {
        let mut names: Vec<String> = self.progress.lock().processed.iter().cloned().collect();
        names.sort();
        names
    }

    /// Grow the graph from `seed` until `max_nodes` concepts are claimed,
    /// the frontier drains, `deadline` elapses, or `cancel` fires.
    #[instrument(skip(self, cancel), err)]
    pub async fn build(
        &self,
        seed: &str,
        max_nodes: usize,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<BuildStats, BuildError> {
        if seed.trim().is_empty() {
            return Err(BuildError::InvalidInput {
                message: "seed concept must not be empty".to_string(),
            });
        }
        if max_nodes < 1 {
            return Err(BuildError::InvalidInput {
                message: "max_nodes must be at least 1".to_string(),
            });
        }
        if deadline.is_zero() {
            return Err(BuildError::InvalidInput {
                message: "deadline must be positive".to_string(),
            });
        }

        let started = Instant::now();
        self.store.initialize_schema().await?;
        *self.progress.lock() = Progress::default();

        let scope = cancel.child_token();
        let (frontier_tx, frontier_rx) = flume::bounded(max_nodes);
        let expansion = Arc::new(Expansion {
            store: Arc::clone(&self.store),
            llm: Arc::clone(&self.llm),
            progress: Arc::clone(&self.progress),
            max_nodes,
            cleanup_stride: self.options.cleanup_stride.max(1),
            frontier_tx,
            frontier_rx,
            in_flight: AtomicUsize::new(1),
            relationships_created: AtomicU64::new(0),
            scope: scope.clone(),
            done: CancellationToken::new(),
        });
        // Capacity is at least one and the queue is empty, so the seed
        // always fits.
        let _ = expansion.frontier_tx.try_send(seed.to_string());

        let mut workers = Vec::with_capacity(self.options.worker_count.max(1));
        for worker_id in 0..self.options.worker_count.max(1) {
            workers.push(tokio::spawn(Arc::clone(&expansion).worker(worker_id)));
        }

        // Deadline timer: trips the run scope and records that it fired.
        let deadline_hit = Arc::new(AtomicBool::new(false));
        let run_finished = CancellationToken::new();
        let timer = tokio::spawn({
            let scope = scope.clone();
            let run_finished = run_finished.clone();
            let deadline_hit = Arc::clone(&deadline_hit);
            async move {
                tokio::select! {
                    _ = run_finished.cancelled() => {}
                    _ = tokio::time::sleep(deadline) => {
                        deadline_hit.store(true, Ordering::SeqCst);
                        scope.cancel();
                    }
                }
            }
        });

        for worker in workers {
            let _ = worker.await;
        }
        run_finished.cancel();
        let _ = timer.await;

        let stats = BuildStats {
            nodes_created: self.progress.lock().node_count as u64,
            relationships_created: expansion.relationships_created.load(Ordering::SeqCst),
            duration: started.elapsed(),
        };

        if cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }
        if deadline_hit.load(Ordering::SeqCst) {
            return Err(BuildError::Timeout { deadline });
        }
        info!(
            nodes = stats.nodes_created,
            relationships = stats.relationships_created,
            duration_ms = stats.duration.as_millis() as u64,
            "build finished"
        );
        Ok(stats)
    }

    /// Probe `count` random pairs of processed concepts for relationships
    /// the breadth-first pass never asked about.
    #[instrument(skip(self, cancel), err)]
    pub async fn mine_random_relationships(
        &self,
        count: usize,
        concurrency: usize,
        cancel: &CancellationToken,
    ) -> Result<MiningStats, BuildError> {
        if count < 1 {
            return Err(BuildError::InvalidInput {
                message: "count must be at least 1".to_string(),
            });
        }
        if concurrency < 1 {
            return Err(BuildError::InvalidInput {
                message: "concurrency must be at least 1".to_string(),
            });
        }
        let pool: Vec<String> = self.progress.lock().processed.iter().cloned().collect();
        if pool.len() < 2 {
            return Err(BuildError::InvalidInput {
                message: "at least two processed concepts are required for mining".to_string(),
            });
        }

        let scope = cancel.child_token();
        let (jobs_tx, jobs_rx) = flume::bounded::<(String, String)>(concurrency);
        let found = Arc::new(AtomicU64::new(0));
        let created = Arc::new(AtomicU64::new(0));

        let mut workers = Vec::with_capacity(concurrency);
        for _ in 0..concurrency {
            let jobs_rx = jobs_rx.clone();
            let store = Arc::clone(&self.store);
            let llm = Arc::clone(&self.llm);
            let scope = scope.clone();
            let found = Arc::clone(&found);
            let created = Arc::clone(&created);
            workers.push(tokio::spawn(async move {
                loop {
                    let (a, b) = tokio::select! {
                        _ = scope.cancelled() => break,
                        msg = jobs_rx.recv_async() => match msg {
                            Ok(pair) => pair,
                            Err(_) => break,
                        },
                    };
                    match llm.relationship(&a, &b, &scope).await {
                        Ok(Some(rel)) => {
                            found.fetch_add(1, Ordering::SeqCst);
                            match store
                                .upsert_relationship(
                                    &rel.source,
                                    &rel.target,
                                    &rel.rel_type,
                                    rel.description.as_deref(),
                                    rel.strength,
                                )
                                .await
                            {
                                Ok(_) => {
                                    created.fetch_add(1, Ordering::SeqCst);
                                }
                                Err(e) => {
                                    warn!(source = %rel.source, target = %rel.target, error = %e, "mined edge upsert failed");
                                }
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(a = %a, b = %b, error = %e, "relationship probe failed");
                        }
                    }
                }
            }));
        }
        drop(jobs_rx);

        let mut sampled = 0u64;
        for _ in 0..count {
            let pair = {
                let mut rng = rand::thread_rng();
                let first = rng.gen_range(0..pool.len());
                let mut second = rng.gen_range(0..pool.len());
                while second == first {
                    second = rng.gen_range(0..pool.len());
                }
                (pool[first].clone(), pool[second].clone())
            };
            let stop = tokio::select! {
                _ = scope.cancelled() => true,
                sent = jobs_tx.send_async(pair) => sent.is_err(),
            };
            if stop {
                break;
            }
            sampled += 1;
        }
        drop(jobs_tx);

        for worker in workers {
            let _ = worker.await;
        }

        if cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }
        let stats = MiningStats {
            pairs_sampled: sampled,
            relationships_found: found.load(Ordering::SeqCst),
            relationships_created: created.load(Ordering::SeqCst),
        };
        info!(
            pairs = stats.pairs_sampled,
            found = stats.relationships_found,
            created = stats.relationships_created,
            "mining finished"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use crate::models::{RelatedConcept, Relationship};

    struct SilentModel;

    #[async_trait]
    impl LanguageModel for SilentModel {
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

    fn builder() -> Builder {
        Builder::new(Arc::new(MemoryStore::new()), Arc::new(SilentModel))
    }

    #[tokio::test]
    async fn build_rejects_empty_seed() {
        let cancel = CancellationToken::new();
        let err = builder()
            .build("   ", 10, Duration::from_secs(1), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn build_rejects_zero_budget_and_zero_deadline() {
        let cancel = CancellationToken::new();
        let b = builder();
        assert!(matches!(
            b.build("Seed", 0, Duration::from_secs(1), &cancel).await,
            Err(BuildError::InvalidInput { .. })
        ));
        assert!(matches!(
            b.build("Seed", 10, Duration::ZERO, &cancel).await,
            Err(BuildError::InvalidInput { .. })
        ));
    }

    #[tokio::test]
    async fn mining_requires_two_processed_concepts() {
        let cancel = CancellationToken::new();
        let b = builder();
        // A silent model leaves only the seed in the processed set.
        b.build("Seed", 10, Duration::from_secs(5), &cancel)
            .await
            .unwrap();
        let err = b
            .mine_random_relationships(5, 2, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn silent_model_build_claims_only_the_seed() {
        let cancel = CancellationToken::new();
        let b = builder();
        let stats = b
            .build("Seed", 10, Duration::from_secs(5), &cancel)
            .await
            .unwrap();
        assert_eq!(stats.nodes_created, 1);
        assert_eq!(stats.relationships_created, 0);
        assert_eq!(b.processed_concepts(), vec!["Seed".to_string()]);
    }
}
