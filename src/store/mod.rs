//! Graph store abstraction and implementations.
//!
//! The pipelines talk to [`GraphStore`] as an interface-typed collaborator so
//! tests can substitute the in-memory implementation for Neo4j. All
//! operations are idempotent: re-running the same write yields the same final
//! state, which is what lets per-item failures be retried or ignored without
//! corrupting the graph.

mod memory;
mod neo4j;

pub use memory::MemoryStore;
pub use neo4j::Neo4jStore;

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

use crate::models::{Concept, GraphStats};

type Cause = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by graph store operations.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    /// Connection establishment or liveness probing failed on every attempt.
    #[error("failed to connect to graph store at {uri} after {attempts} attempts")]
    #[diagnostic(
        code(conceptloom::store::connect),
        help("Check the URI, credentials, and that the database is accepting bolt connections.")
    )]
    Connect {
        uri: String,
        attempts: u32,
        #[source]
        source: Cause,
    },

    /// A write query failed.
    #[error("graph write failed during {operation}")]
    #[diagnostic(code(conceptloom::store::write))]
    Write {
        operation: &'static str,
        #[source]
        source: Cause,
    },

    /// A read query failed.
    #[error("graph read failed during {operation}")]
    #[diagnostic(code(conceptloom::store::read))]
    Read {
        operation: &'static str,
        #[source]
        source: Cause,
    },

    /// The caller handed in arguments the store cannot act on.
    #[error("invalid input: {message}")]
    #[diagnostic(code(conceptloom::store::invalid_input))]
    InvalidInput { message: String },
}

impl StoreError {
    pub(crate) fn write(operation: &'static str, source: impl Into<Cause>) -> Self {
        Self::Write {
            operation,
            source: source.into(),
        }
    }

    pub(crate) fn read(operation: &'static str, source: impl Into<Cause>) -> Self {
        Self::Read {
            operation,
            source: source.into(),
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }
}

/// Narrow, idempotent API over the property-graph database.
///
/// Every method is safe under concurrent calls from one process and executes
/// as a single transaction; partial writes are never observable.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Create the uniqueness constraint on concept names. An already-present
    /// constraint is success.
    async fn initialize_schema(&self) -> Result<(), StoreError>;

    /// Create the concept if absent; `description` and `created_at` are set
    /// only on creation. Returns the store's internal id.
    async fn upsert_concept(&self, name: &str, description: Option<&str>)
        -> Result<i64, StoreError>;

    /// Create the edge if no edge of the same type exists between the
    /// ordered pair; otherwise leave it unchanged. Both endpoints must exist
    /// and be distinct.
    async fn upsert_relationship(
        &self,
        source: &str,
        target: &str,
        rel_type: &str,
        description: Option<&str>,
        strength: Option<f64>,
    ) -> Result<i64, StoreError>;

    async fn get_concept(&self, name: &str) -> Result<Option<Concept>, StoreError>;

    /// Up to `limit` random concepts, uniform without replacement where
    /// possible.
    async fn sample_concepts(&self, limit: usize) -> Result<Vec<Concept>, StoreError>;

    /// Up to `limit` random ordered pairs `(a, b)` with `a != b` and no edge
    /// in either direction between them at the instant of sampling.
    async fn sample_unconnected_pairs(
        &self,
        limit: usize,
    ) -> Result<Vec<(Concept, Concept)>, StoreError>;

    async fn graph_stats(&self) -> Result<GraphStats, StoreError>;

    /// Remove edges whose endpoints no longer both exist. Returns the count
    /// removed.
    async fn cleanup_orphan_edges(&self) -> Result<u64, StoreError>;

    /// Remove concepts participating in no edges. Returns the count removed.
    async fn cleanup_orphan_nodes(&self) -> Result<u64, StoreError>;

    /// Keep the lowest-internal-id node with `name`, delete the rest.
    /// Returns the count removed.
    async fn coalesce_duplicates(&self, name: &str) -> Result<u64, StoreError>;

    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
