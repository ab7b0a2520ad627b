//! Neo4j-backed implementation of [`GraphStore`].
//!
//! Concepts are `(:Concept {name})` nodes under a uniqueness constraint on
//! `name`; edges are `[:RELATED {type}]` relationships so that "one edge per
//! ordered pair and type" falls out of a single `MERGE` pattern. Each
//! operation is one auto-commit query.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use neo4rs::{query, Graph, Row};
use tracing::{debug, instrument, warn};

use super::{GraphStore, StoreError};
use crate::models::{Concept, GraphStats};

pub struct Neo4jStore {
    graph: Graph,
    uri: String,
}

impl Neo4jStore {
    /// Connect to the store, probing liveness with `RETURN 1`.
    ///
    /// Up to `max_retries` attempts, sleeping `retry_interval` between them;
    /// exhaustion yields [`StoreError::Connect`] carrying the last cause.
    #[instrument(skip(password), err)]
    pub async fn connect(
        uri: &str,
        user: &str,
        password: &str,
        max_retries: u32,
        retry_interval: Duration,
    ) -> Result<Self, StoreError> {
        let attempts = max_retries.max(1);
        let mut last: Option<neo4rs::Error> = None;
        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::time::sleep(retry_interval).await;
            }
            match Graph::new(uri, user, password).await {
                Ok(graph) => match graph.run(query("RETURN 1")).await {
                    Ok(()) => {
                        debug!(uri, attempt, "connected to graph store");
                        return Ok(Self {
                            graph,
                            uri: uri.to_string(),
                        });
                    }
                    Err(e) => {
                        warn!(uri, attempt, error = %e, "liveness probe failed");
                        last = Some(e);
                    }
                },
                Err(e) => {
                    warn!(uri, attempt, error = %e, "connection attempt failed");
                    last = Some(e);
                }
            }
        }
        Err(StoreError::Connect {
            uri: uri.to_string(),
            attempts,
            source: last
                .map(|e| Box::new(e) as _)
                .unwrap_or_else(|| "no attempt was made".into()),
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    async fn single_count(&self, cypher: &str, operation: &'static str) -> Result<u64, StoreError> {
        let mut rows = self
            .graph
            .execute(query(cypher))
            .await
            .map_err(|e| StoreError::write(operation, e))?;
        let row = rows
            .next()
            .await
            .map_err(|e| StoreError::write(operation, e))?;
        match row {
            Some(row) => {
                let removed: i64 = row
                    .get("removed")
                    .map_err(|e| StoreError::read(operation, e))?;
                Ok(removed.max(0) as u64)
            }
            None => Ok(0),
        }
    }
}

fn concept_from_row(row: &Row, operation: &'static str) -> Result<Concept, StoreError> {
    let name: String = row
        .get("name")
        .map_err(|e| StoreError::read(operation, e))?;
    let description: Option<String> = row.get("description").ok().flatten();
    let created_at: Option<DateTime<Utc>> = row
        .get::<Option<String>>("created_at")
        .ok()
        .flatten()
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc));
    Ok(Concept {
        name,
        description: description.filter(|d| !d.is_empty()),
        created_at,
    })
}

const CONCEPT_RETURN: &str =
    "c.name AS name, c.description AS description, toString(c.created_at) AS created_at";

#[async_trait]
impl GraphStore for Neo4jStore {
    async fn initialize_schema(&self) -> Result<(), StoreError> {
        // IF NOT EXISTS makes re-runs a no-op; some server editions still
        // report an equivalent-schema error, which counts as success.
        let result = self
            .graph
            .run(query(
                "CREATE CONSTRAINT concept_name_unique IF NOT EXISTS \
                 FOR (c:Concept) REQUIRE c.name IS UNIQUE",
            ))
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().to_lowercase().contains("already exists") => Ok(()),
            Err(e) => Err(StoreError::write("initialize_schema", e)),
        }
    }

    #[instrument(skip(self, description), err)]
    async fn upsert_concept(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<i64, StoreError> {
        if name.is_empty() {
            return Err(StoreError::invalid("concept name must not be empty"));
        }
        let description = description.filter(|d| !d.is_empty());
        let mut cypher = String::from(
            "MERGE (c:Concept {name: $name}) ON CREATE SET c.created_at = datetime()",
        );
        if description.is_some() {
            cypher.push_str(", c.description = $description");
        }
        cypher.push_str(" RETURN id(c) AS id");

        let mut q = query(&cypher).param("name", name);
        if let Some(d) = description {
            q = q.param("description", d);
        }
        let mut rows = self
            .graph
            .execute(q)
            .await
            .map_err(|e| StoreError::write("upsert_concept", e))?;
        let row = rows
            .next()
            .await
            .map_err(|e| StoreError::write("upsert_concept", e))?
            .ok_or_else(|| StoreError::write("upsert_concept", "merge returned no row"))?;
        row.get("id")
            .map_err(|e| StoreError::read("upsert_concept", e))
    }

    #[instrument(skip(self, description, strength), err)]
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
        let strength = strength.map(|s| s.clamp(0.0, 1.0));

        let mut cypher = String::from(
            "MATCH (a:Concept {name: $source}) \
             MATCH (b:Concept {name: $target}) \
             MERGE (a)-[r:RELATED {type: $type}]->(b) \
             ON CREATE SET r.created_at = datetime()",
        );
        if description.is_some() {
            cypher.push_str(", r.description = $description");
        }
        if strength.is_some() {
            cypher.push_str(", r.strength = $strength");
        }
        cypher.push_str(" RETURN id(r) AS id");

        let mut q = query(&cypher)
            .param("source", source)
            .param("target", target)
            .param("type", rel_type);
        if let Some(d) = description {
            q = q.param("description", d);
        }
        if let Some(s) = strength {
            q = q.param("strength", s);
        }

        let mut rows = self
            .graph
            .execute(q)
            .await
            .map_err(|e| StoreError::write("upsert_relationship", e))?;
        let row = rows
            .next()
            .await
            .map_err(|e| StoreError::write("upsert_relationship", e))?
            .ok_or_else(|| {
                StoreError::invalid(format!(
                    "both endpoints must exist before linking {source:?} -> {target:?}"
                ))
            })?;
        row.get("id")
            .map_err(|e| StoreError::read("upsert_relationship", e))
    }

    async fn get_concept(&self, name: &str) -> Result<Option<Concept>, StoreError> {
        let cypher = format!("MATCH (c:Concept {{name: $name}}) RETURN {CONCEPT_RETURN} LIMIT 1");
        let mut rows = self
            .graph
            .execute(query(&cypher).param("name", name))
            .await
            .map_err(|e| StoreError::read("get_concept", e))?;
        let row = rows
            .next()
            .await
            .map_err(|e| StoreError::read("get_concept", e))?;
        row.map(|r| concept_from_row(&r, "get_concept")).transpose()
    }

    async fn sample_concepts(&self, limit: usize) -> Result<Vec<Concept>, StoreError> {
        let cypher = format!(
            "MATCH (c:Concept) WITH c, rand() AS r ORDER BY r LIMIT $limit RETURN {CONCEPT_RETURN}"
        );
        let mut rows = self
            .graph
            .execute(query(&cypher).param("limit", limit as i64))
            .await
            .map_err(|e| StoreError::read("sample_concepts", e))?;
        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::read("sample_concepts", e))?
        {
            out.push(concept_from_row(&row, "sample_concepts")?);
        }
        Ok(out)
    }

    async fn sample_unconnected_pairs(
        &self,
        limit: usize,
    ) -> Result<Vec<(Concept, Concept)>, StoreError> {
        // id(a) < id(b) dedupes the unordered pair; the missing-edge check
        // covers both directions via the undirected pattern.
        let cypher = "MATCH (a:Concept), (b:Concept) \
                      WHERE id(a) < id(b) AND NOT (a)--(b) \
                      WITH a, b, rand() AS r ORDER BY r LIMIT $limit \
                      RETURN a.name AS a_name, a.description AS a_description, \
                             b.name AS b_name, b.description AS b_description";
        let mut rows = self
            .graph
            .execute(query(cypher).param("limit", limit as i64))
            .await
            .map_err(|e| StoreError::read("sample_unconnected_pairs", e))?;
        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::read("sample_unconnected_pairs", e))?
        {
            let a_name: String = row
                .get("a_name")
                .map_err(|e| StoreError::read("sample_unconnected_pairs", e))?;
            let b_name: String = row
                .get("b_name")
                .map_err(|e| StoreError::read("sample_unconnected_pairs", e))?;
            let a = Concept {
                name: a_name,
                description: row.get("a_description").ok().flatten(),
                created_at: None,
            };
            let b = Concept {
                name: b_name,
                description: row.get("b_description").ok().flatten(),
                created_at: None,
            };
            out.push((a, b));
        }
        Ok(out)
    }

    async fn graph_stats(&self) -> Result<GraphStats, StoreError> {
        let mut rows = self
            .graph
            .execute(query("MATCH (c:Concept) RETURN count(c) AS n"))
            .await
            .map_err(|e| StoreError::read("graph_stats", e))?;
        let node_count: i64 = match rows
            .next()
            .await
            .map_err(|e| StoreError::read("graph_stats", e))?
        {
            Some(row) => row.get("n").map_err(|e| StoreError::read("graph_stats", e))?,
            None => 0,
        };

        let mut rows = self
            .graph
            .execute(query("MATCH (:Concept)-[r]->(:Concept) RETURN count(r) AS n"))
            .await
            .map_err(|e| StoreError::read("graph_stats", e))?;
        let relationship_count: i64 = match rows
            .next()
            .await
            .map_err(|e| StoreError::read("graph_stats", e))?
        {
            Some(row) => row.get("n").map_err(|e| StoreError::read("graph_stats", e))?,
            None => 0,
        };

        Ok(GraphStats {
            node_count: node_count.max(0) as u64,
            relationship_count: relationship_count.max(0) as u64,
            observed_at: Utc::now(),
        })
    }

    async fn cleanup_orphan_edges(&self) -> Result<u64, StoreError> {
        self.single_count(
            "MATCH (a)-[r]->(b) \
             WHERE NOT (a:Concept) OR a.name IS NULL \
                OR NOT (b:Concept) OR b.name IS NULL \
             DELETE r RETURN count(*) AS removed",
            "cleanup_orphan_edges",
        )
        .await
    }

    async fn cleanup_orphan_nodes(&self) -> Result<u64, StoreError> {
        self.single_count(
            "MATCH (c:Concept) WHERE NOT (c)--() DELETE c RETURN count(*) AS removed",
            "cleanup_orphan_nodes",
        )
        .await
    }

    async fn coalesce_duplicates(&self, name: &str) -> Result<u64, StoreError> {
        let cypher = "MATCH (c:Concept {name: $name}) \
                      WITH c ORDER BY id(c) ASC \
                      WITH collect(c) AS nodes \
                      UNWIND nodes[1..] AS dupe \
                      DETACH DELETE dupe \
                      RETURN count(*) AS removed";
        let mut rows = self
            .graph
            .execute(query(cypher).param("name", name))
            .await
            .map_err(|e| StoreError::write("coalesce_duplicates", e))?;
        let row = rows
            .next()
            .await
            .map_err(|e| StoreError::write("coalesce_duplicates", e))?;
        match row {
            Some(row) => {
                let removed: i64 = row
                    .get("removed")
                    .map_err(|e| StoreError::read("coalesce_duplicates", e))?;
                Ok(removed.max(0) as u64)
            }
            None => Ok(0),
        }
    }
}
