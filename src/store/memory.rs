//! In-process implementation of [`GraphStore`] for tests and offline runs.
//!
//! Mirrors the Neo4j semantics closely enough for the pipelines to be
//! exercised without a database: ids are monotonically assigned, the name
//! uniqueness constraint holds structurally, and upserts are idempotent.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::Rng;
use rustc_hash::FxHashMap;

use super::{GraphStore, StoreError};
use crate::models::{Concept, GraphStats, Relationship};

#[derive(Debug, Clone)]
struct StoredConcept {
    id: i64,
    concept: Concept,
}

#[derive(Debug, Clone)]
struct StoredEdge {
    id: i64,
    rel: Relationship,
}

#[derive(Default)]
struct Inner {
    concepts: FxHashMap<String, StoredConcept>,
    edges: Vec<StoredEdge>,
    next_id: i64,
}

impl Inner {
    fn alloc_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn connected(&self, a: &str, b: &str) -> bool {
        self.edges.iter().any(|e| {
            (e.rel.source == a && e.rel.target == b) || (e.rel.source == b && e.rel.target == a)
        })
    }
}

/// Mutex-guarded in-memory graph. No method holds the lock across an await.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All relationships currently stored, for test assertions.
    pub fn relationships(&self) -> Vec<Relationship> {
        self.inner.lock().edges.iter().map(|e| e.rel.clone()).collect()
    }

    /// All concept names currently stored, for test assertions.
    pub fn concept_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.lock().concepts.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl GraphStore for MemoryStore {
    async fn initialize_schema(&self) -> Result<(), StoreError> {
        // Uniqueness is structural here: concepts are keyed by name.
        Ok(())
    }

    async fn upsert_concept(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<i64, StoreError> {
        if name.is_empty() {
            return Err(StoreError::invalid("concept name must not be empty"));
        }
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.concepts.get(name) {
            return Ok(existing.id);
        }
        let id = inner.alloc_id();
        let mut concept = Concept::new(name);
        concept.created_at = Some(Utc::now());
        if let Some(d) = description.filter(|d| !d.is_empty()) {
            concept.description = Some(d.to_string());
        }
        inner
            .concepts
            .insert(name.to_string(), StoredConcept { id, concept });
        Ok(id)
    }

    async fn upsert_relationship(
        &self,
        source: &str,
        target: &str,
        rel_type: &str,
        description: Option<&str>,
        strength: Option<f64>,
    ) -> Result<i64, StoreError> {
        if source.is_empty() || target.is_empty() || rel_type.is_empty() {
            return Err(StoreError::invalid(
                "relationship endpoints and type must not be empty",
            ));
        }
        if source == target {
            return Err(StoreError::invalid("self-loops are forbidden"));
        }
        let mut inner = self.inner.lock();
        if !inner.concepts.contains_key(source) || !inner.concepts.contains_key(target) {
            return Err(StoreError::invalid(format!(
                "both endpoints must exist before linking {source:?} -> {target:?}"
            )));
        }
        if let Some(existing) = inner
            .edges
            .iter()
            .find(|e| e.rel.source == source && e.rel.target == target && e.rel.rel_type == rel_type)
        {
            return Ok(existing.id);
        }
        let id = inner.alloc_id();
        let mut rel = Relationship::new(source, target, rel_type);
        rel.created_at = Some(Utc::now());
        if let Some(d) = description.filter(|d| !d.is_empty()) {
            rel.description = Some(d.to_string());
        }
        if let Some(s) = strength {
            rel = rel.with_strength(s);
        }
        inner.edges.push(StoredEdge { id, rel });
        Ok(id)
    }

    async fn get_concept(&self, name: &str) -> Result<Option<Concept>, StoreError> {
        Ok(self
            .inner
            .lock()
            .concepts
            .get(name)
            .map(|s| s.concept.clone()))
    }

    async fn sample_concepts(&self, limit: usize) -> Result<Vec<Concept>, StoreError> {
        let mut concepts: Vec<Concept> = self
            .inner
            .lock()
            .concepts
            .values()
            .map(|s| s.concept.clone())
            .collect();
        concepts.shuffle(&mut rand::thread_rng());
        concepts.truncate(limit);
        Ok(concepts)
    }

    async fn sample_unconnected_pairs(
        &self,
        limit: usize,
    ) -> Result<Vec<(Concept, Concept)>, StoreError> {
        let inner = self.inner.lock();
        let concepts: Vec<&StoredConcept> = inner.concepts.values().collect();
        let mut pairs = Vec::new();
        for (i, a) in concepts.iter().enumerate() {
            for b in concepts.iter().skip(i + 1) {
                if !inner.connected(&a.concept.name, &b.concept.name) {
                    pairs.push((a.concept.clone(), b.concept.clone()));
                }
            }
        }
        let mut rng = rand::thread_rng();
        pairs.shuffle(&mut rng);
        pairs.truncate(limit);
        // Randomise the orientation too; callers receive ordered pairs.
        for pair in pairs.iter_mut() {
            if rng.gen_bool(0.5) {
                std::mem::swap(&mut pair.0, &mut pair.1);
            }
        }
        Ok(pairs)
    }

    async fn graph_stats(&self) -> Result<GraphStats, StoreError> {
        let inner = self.inner.lock();
        Ok(GraphStats {
            node_count: inner.concepts.len() as u64,
            relationship_count: inner.edges.len() as u64,
            observed_at: Utc::now(),
        })
    }

    async fn cleanup_orphan_edges(&self) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock();
        let before = inner.edges.len();
        let names: Vec<String> = inner.concepts.keys().cloned().collect();
        inner
            .edges
            .retain(|e| names.contains(&e.rel.source) && names.contains(&e.rel.target));
        Ok((before - inner.edges.len()) as u64)
    }

    async fn cleanup_orphan_nodes(&self) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock();
        let before = inner.concepts.len();
        let connected: Vec<String> = inner
            .edges
            .iter()
            .flat_map(|e| [e.rel.source.clone(), e.rel.target.clone()])
            .collect();
        inner.concepts.retain(|name, _| connected.contains(name));
        Ok((before - inner.concepts.len()) as u64)
    }

    async fn coalesce_duplicates(&self, _name: &str) -> Result<u64, StoreError> {
        // Names are map keys here, so duplicates cannot exist.
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn concept_upsert_is_idempotent() {
        let store = MemoryStore::new();
        let first = store
            .upsert_concept("Rust", Some("a language"))
            .await
            .unwrap();
        let second = store
            .upsert_concept("Rust", Some("a different description"))
            .await
            .unwrap();
        assert_eq!(first, second);

        let concept = store.get_concept("Rust").await.unwrap().unwrap();
        // Attributes are set only on creation.
        assert_eq!(concept.description.as_deref(), Some("a language"));
        assert_eq!(store.concept_names(), vec!["Rust".to_string()]);
    }

    #[tokio::test]
    async fn relationship_upsert_is_idempotent_per_type_and_direction() {
        let store = MemoryStore::new();
        store.upsert_concept("Rust", None).await.unwrap();
        store.upsert_concept("Systems", None).await.unwrap();

        let first = store
            .upsert_relationship("Rust", "Systems", "USED_IN", None, Some(0.9))
            .await
            .unwrap();
        let second = store
            .upsert_relationship("Rust", "Systems", "USED_IN", Some("ignored"), None)
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(store.relationships().len(), 1);

        // A different type between the same pair is a distinct edge.
        store
            .upsert_relationship("Rust", "Systems", "PART_OF", None, None)
            .await
            .unwrap();
        assert_eq!(store.relationships().len(), 2);
    }

    #[tokio::test]
    async fn relationship_rejects_self_loops_and_missing_endpoints() {
        let store = MemoryStore::new();
        store.upsert_concept("Rust", None).await.unwrap();

        let err = store
            .upsert_relationship("Rust", "Rust", "IS_A", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput { .. }));

        let err = store
            .upsert_relationship("Rust", "Missing", "IS_A", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn unconnected_pairs_exclude_linked_concepts() {
        let store = MemoryStore::new();
        store.upsert_concept("A", None).await.unwrap();
        store.upsert_concept("B", None).await.unwrap();
        store.upsert_concept("C", None).await.unwrap();
        store
            .upsert_relationship("A", "B", "IS_A", None, None)
            .await
            .unwrap();

        let pairs = store.sample_unconnected_pairs(10).await.unwrap();
        assert_eq!(pairs.len(), 2);
        for (a, b) in &pairs {
            let unordered = if a.name < b.name {
                (a.name.as_str(), b.name.as_str())
            } else {
                (b.name.as_str(), a.name.as_str())
            };
            assert!(unordered == ("A", "C") || unordered == ("B", "C"));
        }
    }

    #[tokio::test]
    async fn cleanup_removes_orphans() {
        let store = MemoryStore::new();
        store.upsert_concept("A", None).await.unwrap();
        store.upsert_concept("B", None).await.unwrap();
        store.upsert_concept("Lonely", None).await.unwrap();
        store
            .upsert_relationship("A", "B", "IS_A", None, None)
            .await
            .unwrap();

        assert_eq!(store.cleanup_orphan_edges().await.unwrap(), 0);
        assert_eq!(store.cleanup_orphan_nodes().await.unwrap(), 1);
        assert_eq!(store.concept_names(), vec!["A".to_string(), "B".to_string()]);
    }

    #[tokio::test]
    async fn sample_concepts_is_without_replacement() {
        let store = MemoryStore::new();
        for name in ["A", "B", "C", "D"] {
            store.upsert_concept(name, None).await.unwrap();
        }
        let sampled = store.sample_concepts(3).await.unwrap();
        assert_eq!(sampled.len(), 3);
        let mut names: Vec<&str> = sampled.iter().map(|c| c.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 3);
    }
}
