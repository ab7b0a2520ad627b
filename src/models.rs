//! Shared data types for the builder and enricher pipelines.
//!
//! Concepts and relationships are the two persisted entities; everything else
//! here is progress reporting. A concept's identity is its `name`
//! (case-sensitive, unique in the store), so equality and hashing on the
//! wrapper types follow the name alone.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A node in the knowledge graph, identified by its human-readable name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Concept {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Concept {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            created_at: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A directed, typed edge between two distinct concepts.
///
/// At most one edge of a given `rel_type` exists per ordered `(source,
/// target)` pair; the store's upsert enforces this.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Relationship {
    pub source: String,
    pub target: String,
    pub rel_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strength: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Relationship {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        rel_type: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            rel_type: rel_type.into(),
            description: None,
            strength: None,
            created_at: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Attach a strength score, clamped into `[0.0, 1.0]`.
    #[must_use]
    pub fn with_strength(mut self, strength: f64) -> Self {
        self.strength = Some(strength.clamp(0.0, 1.0));
        self
    }
}

/// One suggestion returned by the related-concepts query: `name` is the
/// suggested concept, `relation` the edge label, `related_to` the concept the
/// suggestion hangs off.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelatedConcept {
    pub name: String,
    pub relation: String,
    #[serde(rename = "relatedTo")]
    pub related_to: String,
}

/// Node and relationship counts observed at a point in time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct GraphStats {
    pub node_count: u64,
    pub relationship_count: u64,
    pub observed_at: DateTime<Utc>,
}

/// Outcome of a single `Builder::build` run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildStats {
    /// Concepts claimed and expanded within the node budget.
    pub nodes_created: u64,
    /// Edges successfully upserted during expansion.
    pub relationships_created: u64,
    pub duration: Duration,
}

impl BuildStats {
    /// One-line run summary for terminal output.
    pub fn summary(&self) -> String {
        format!(
            "build complete: nodes={} relationships={} duration={:.2}s",
            self.nodes_created,
            self.relationships_created,
            self.duration.as_secs_f64()
        )
    }
}

/// Outcome of the post-expansion random-pair mining phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MiningStats {
    /// Pairs sampled and probed. This is the configured attempt count, not a
    /// created-edge target.
    pub pairs_sampled: u64,
    /// Probes for which the model reported a relationship.
    pub relationships_found: u64,
    /// Relationships actually written to the store.
    pub relationships_created: u64,
}

impl MiningStats {
    pub fn summary(&self) -> String {
        format!(
            "mining complete: pairs={} found={} created={}",
            self.pairs_sampled, self.relationships_found, self.relationships_created
        )
    }
}

/// Cumulative enricher counters, observed atomically.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnricherStats {
    pub batches_completed: u64,
    pub pairs_processed: u64,
    pub relationships_found: u64,
    pub relationships_created: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_batch_at: Option<DateTime<Utc>>,
    pub running: bool,
}

impl EnricherStats {
    pub fn summary(&self) -> String {
        format!(
            "enricher: batches={} pairs={} found={} created={} running={}",
            self.batches_completed,
            self.pairs_processed,
            self.relationships_found,
            self.relationships_created,
            self.running
        )
    }
}
