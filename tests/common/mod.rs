//! Shared fixtures for the pipeline integration tests: scripted language
//! models with controllable fan-out, latency, and relationship behaviour.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use conceptloom::llm::{LanguageModel, LlmError};
use conceptloom::models::{RelatedConcept, Relationship};
use conceptloom::store::{GraphStore, MemoryStore};

/// What a [`ScriptedModel`] answers to relationship probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationScript {
    /// Every pair is related (type `RELATED_TO`).
    Always,
    /// No pair is related.
    Never,
    /// Every probe fails with a service error.
    Fail,
}

/// Deterministic in-process model.
///
/// Related-concepts queries return `fan_out` children named
/// `<concept>-<i>`, so repeated runs over the same seed explore the same
/// tree. The optional delay is cancellation-aware, mirroring the real
/// client's prompt abort behaviour.
pub struct ScriptedModel {
    pub fan_out: usize,
    pub delay: Duration,
    pub relations: RelationScript,
    related_calls: AtomicUsize,
    relationship_calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new(fan_out: usize, relations: RelationScript) -> Self {
        Self {
            fan_out,
            delay: Duration::ZERO,
            relations,
            related_calls: AtomicUsize::new(0),
            relationship_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn related_calls(&self) -> usize {
        self.related_calls.load(Ordering::SeqCst)
    }

    pub fn relationship_calls(&self) -> usize {
        self.relationship_calls.load(Ordering::SeqCst)
    }

    async fn pause(&self, cancel: &CancellationToken) -> bool {
        if self.delay.is_zero() {
            return true;
        }
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.delay) => true,
        }
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn related_concepts(
        &self,
        concept: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<RelatedConcept>, LlmError> {
        self.related_calls.fetch_add(1, Ordering::SeqCst);
        if !self.pause(cancel).await {
            return Ok(Vec::new());
        }
        Ok((0..self.fan_out)
            .map(|i| RelatedConcept {
                name: format!("{concept}-{i}"),
                relation: "RELATED_TO".to_string(),
                related_to: concept.to_string(),
            })
            .collect())
    }

    async fn relationship(
        &self,
        a: &str,
        b: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Relationship>, LlmError> {
        self.relationship_calls.fetch_add(1, Ordering::SeqCst);
        if !self.pause(cancel).await {
            return Ok(None);
        }
        match self.relations {
            RelationScript::Always => Ok(Some(Relationship::new(a, b, "RELATED_TO"))),
            RelationScript::Never => Ok(None),
            RelationScript::Fail => Err(LlmError::Service {
                message: "probe failed".to_string(),
                status: Some(500),
                source: None,
            }),
        }
    }
}

/// A model whose every call fails, for outage behaviour.
pub struct BrokenModel;

#[async_trait]
impl LanguageModel for BrokenModel {
    async fn related_concepts(
        &self,
        _concept: &str,
        _cancel: &CancellationToken,
    ) -> Result<Vec<RelatedConcept>, LlmError> {
        Err(LlmError::Service {
            message: "endpoint is down".to_string(),
            status: None,
            source: None,
        })
    }

    async fn relationship(
        &self,
        _a: &str,
        _b: &str,
        _cancel: &CancellationToken,
    ) -> Result<Option<Relationship>, LlmError> {
        Err(LlmError::Service {
            message: "endpoint is down".to_string(),
            status: None,
            source: None,
        })
    }
}

/// A fresh in-memory store pre-populated with `names`, no edges.
pub async fn store_with_concepts(names: &[&str]) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    for name in names {
        store.upsert_concept(name, None).await.unwrap();
    }
    store
}
