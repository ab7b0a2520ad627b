//! # Conceptloom: LLM-driven concept knowledge graphs
//!
//! Conceptloom grows and enriches a concept knowledge graph stored in an
//! external property-graph database. Two coordinated pipelines do the work:
//!
//! - **Builder**: bounded, concurrent breadth-first expansion from a seed
//!   concept. The model suggests related concepts; each suggestion becomes a
//!   node and an edge, and unclaimed suggestions re-enter the frontier until
//!   the node budget, deadline, or cancellation stops growth. A post-phase
//!   mines random pairs of processed concepts for additional edges.
//! - **Enricher**: a periodic batch worker that samples random unconnected
//!   concept pairs, asks the model whether a factual relationship holds, and
//!   writes any it reports, under a global created-edge cap.
//!
//! Both pipelines share a [`store::GraphStore`] (the only cross-pipeline
//! state) and a [`llm::LanguageModel`] whose responses are cached on disk by
//! prompt fingerprint.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use conceptloom::builder::Builder;
//! use conceptloom::config::Settings;
//! use conceptloom::llm::OllamaClient;
//! use conceptloom::store::Neo4jStore;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> miette::Result<()> {
//! let settings = Settings::default();
//! let store = Neo4jStore::connect(
//!     &settings.neo4j.uri,
//!     &settings.neo4j.user,
//!     &settings.neo4j.password,
//!     settings.neo4j.max_retries,
//!     settings.neo4j.retry_interval(),
//! )
//! .await?;
//! let llm = OllamaClient::new(&settings.llm)?;
//!
//! let builder = Builder::new(Arc::new(store), Arc::new(llm));
//! let cancel = CancellationToken::new();
//! let stats = builder
//!     .build("Artificial Intelligence", 100, Duration::from_secs(1800), &cancel)
//!     .await?;
//! println!("{}", stats.summary());
//! # Ok(())
//! # }
//! ```
//!
//! ## Module guide
//!
//! - [`models`] - Concepts, relationships, and pipeline statistics
//! - [`store`] - Graph store trait plus Neo4j and in-memory implementations
//! - [`llm`] - Language-model client, prompt templates, response cache
//! - [`builder`] - Frontier expansion and random-relationship mining
//! - [`enricher`] - Periodic unconnected-pair enrichment
//! - [`config`] - YAML + environment settings for the binaries
//! - [`retry`] - Shared retry-with-backoff primitive
//! - [`telemetry`] - Tracing subscriber setup

pub mod builder;
pub mod config;
pub mod enricher;
pub mod llm;
pub mod models;
pub mod retry;
pub mod store;
pub mod telemetry;
