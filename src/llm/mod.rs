//! Language-model client with on-disk response caching.
//!
//! Two high-level intents, "list concepts related to X" and "what, if any,
//! relationship holds between X and Y", become cached, validated,
//! structured results. The HTTP shape matches an Ollama-style `/api/generate`
//! endpoint that may stream newline-delimited JSON objects carrying
//! `response` string fragments.

mod cache;
mod extract;
pub mod prompts;

pub use cache::ResponseCache;
pub use extract::first_json_value;

use async_trait::async_trait;
use miette::Diagnostic;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::LlmSettings;
use crate::models::{RelatedConcept, Relationship};
use crate::retry::{retry, Retryability, RetryPolicy};

/// Errors surfaced by language-model operations.
#[derive(Debug, Error, Diagnostic)]
pub enum LlmError {
    /// The endpoint was unreachable or answered with a failure status.
    #[error("language model request failed: {message}")]
    #[diagnostic(
        code(conceptloom::llm::service),
        help("Check that the model endpoint is up and the model name exists.")
    )]
    Service {
        message: String,
        /// HTTP status, when the failure came from a response rather than
        /// the transport.
        status: Option<u16>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The endpoint answered, but no usable JSON value could be recovered.
    #[error("failed to parse language model response: {message}")]
    #[diagnostic(code(conceptloom::llm::parse))]
    Parse { message: String },

    /// The configured endpoint URL is not a valid base URL.
    #[error("invalid language model endpoint: {url}")]
    #[diagnostic(code(conceptloom::llm::endpoint))]
    Endpoint {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

impl LlmError {
    fn service(message: impl Into<String>) -> Self {
        Self::Service {
            message: message.into(),
            status: None,
            source: None,
        }
    }

    fn transport(message: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Service {
            message: message.into(),
            status: None,
            source: Some(Box::new(source)),
        }
    }

    fn status(status: reqwest::StatusCode, body: String) -> Self {
        Self::Service {
            message: format!("endpoint answered {status}: {}", truncate(&body, 200)),
            status: Some(status.as_u16()),
            source: None,
        }
    }

    fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Network failures and 5xx responses burn the full retry budget; 4xx
    /// responses get a single resubmission; parse failures are retried
    /// because regeneration usually fixes them.
    pub fn retryability(&self) -> Retryability {
        match self {
            Self::Service { status: Some(s), .. } if (400..500).contains(s) => {
                Retryability::RetryOnce
            }
            Self::Service { .. } => Retryability::Retryable,
            Self::Parse { .. } => Retryability::Retryable,
            Self::Endpoint { .. } => Retryability::Fatal,
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// The two model intents, as an interface-typed collaborator so the
/// pipelines can be tested against scripted implementations.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Concepts related to `concept`, 0-10 entries; suggestions without a
    /// name are dropped.
    async fn related_concepts(
        &self,
        concept: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<RelatedConcept>, LlmError>;

    /// The relationship between `a` and `b`, or `None` when the model
    /// reports that no meaningful relationship exists.
    async fn relationship(
        &self,
        a: &str,
        b: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Relationship>, LlmError>;
}

/// Expected top-level shape of an extracted response, checked before the
/// bytes are cached so the cache only ever holds usable payloads.
#[derive(Debug, Clone, Copy)]
enum Shape {
    RelatedList,
    Relationship,
}

impl Shape {
    fn accepts(self, value: &Value) -> bool {
        match self {
            Shape::RelatedList => value.is_array(),
            Shape::Relationship => value.is_null() || value.is_object() || value.is_array(),
        }
    }
}

/// Wire entry for the related-concepts array; lenient so a malformed
/// neighbour does not sink the whole batch.
#[derive(Debug, Deserialize)]
struct RelatedWire {
    #[serde(default)]
    name: String,
    #[serde(default)]
    relation: String,
    #[serde(default, rename = "relatedTo")]
    related_to: String,
}

/// Wire shape for relationship answers. Models emit either the
/// `name`/`relation`/`relatedTo` form or the
/// `source`/`target`/`type`/`description`/`strength` form; both are accepted
/// and normalised to [`Relationship`].
#[derive(Debug, Deserialize)]
struct RelationshipWire {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    relation: Option<String>,
    #[serde(default, rename = "relatedTo")]
    related_to: Option<String>,
    #[serde(default, alias = "source_id")]
    source: Option<String>,
    #[serde(default, alias = "target_id")]
    target: Option<String>,
    #[serde(default, rename = "type")]
    rel_type: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    strength: Option<f64>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn decode_related(value: Value, queried: &str) -> Vec<RelatedConcept> {
    let Value::Array(entries) = value else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for entry in entries {
        let Ok(wire) = serde_json::from_value::<RelatedWire>(entry) else {
            continue;
        };
        if wire.name.trim().is_empty() {
            continue;
        }
        out.push(RelatedConcept {
            name: wire.name,
            relation: if wire.relation.trim().is_empty() {
                "RELATED_TO".to_string()
            } else {
                wire.relation
            },
            related_to: if wire.related_to.trim().is_empty() {
                queried.to_string()
            } else {
                wire.related_to
            },
        });
        if out.len() == 10 {
            break;
        }
    }
    out
}

fn decode_relationship(value: Value, a: &str, b: &str) -> Option<Relationship> {
    let object = match value {
        Value::Null => return None,
        Value::Array(items) => items.into_iter().find(|v| v.is_object())?,
        object @ Value::Object(_) => object,
        _ => return None,
    };
    let wire: RelationshipWire = serde_json::from_value(object).ok()?;

    // An empty type/relation is the model's "no relationship" form.
    let rel_type = non_empty(wire.rel_type).or_else(|| non_empty(wire.relation))?;
    let source =
        non_empty(wire.source).or_else(|| non_empty(wire.name)).unwrap_or_else(|| a.to_string());
    let target = non_empty(wire.target)
        .or_else(|| non_empty(wire.related_to))
        .unwrap_or_else(|| b.to_string());
    if source == target {
        return None;
    }

    let mut rel = Relationship::new(source, target, rel_type);
    rel.description = non_empty(wire.description);
    if let Some(s) = wire.strength {
        rel = rel.with_strength(s);
    }
    Some(rel)
}

/// Concatenate the `response` fields of newline-delimited JSON objects; a
/// body with no such lines is used verbatim (the non-streaming degenerate
/// case).
fn assemble_stream(body: &str) -> String {
    let mut out = String::new();
    let mut saw_envelope = false;
    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(line) {
            if let Some(Value::String(chunk)) = map.get("response") {
                out.push_str(chunk);
                saw_envelope = true;
            }
        }
    }
    if saw_envelope {
        out
    } else {
        body.to_string()
    }
}

/// Client for an Ollama-style generate endpoint, with response caching.
pub struct OllamaClient {
    http: reqwest::Client,
    generate_url: Url,
    model: String,
    cache: ResponseCache,
    policy: RetryPolicy,
}

impl OllamaClient {
    pub fn new(settings: &LlmSettings) -> Result<Self, LlmError> {
        let base = Url::parse(&settings.url).map_err(|source| LlmError::Endpoint {
            url: settings.url.clone(),
            source,
        })?;
        let generate_url = base.join("api/generate").map_err(|source| LlmError::Endpoint {
            url: settings.url.clone(),
            source,
        })?;
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .map_err(|e| LlmError::transport("failed to build HTTP client", e))?;
        Ok(Self {
            http,
            generate_url,
            model: settings.model.clone(),
            cache: ResponseCache::new(&settings.cache_dir),
            policy: settings.retry_policy(),
        })
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// One request attempt: POST the prompt, assemble the (possibly
    /// streamed) body into a single text.
    async fn generate(&self, prompt: &str, cancel: &CancellationToken) -> Result<String, LlmError> {
        let payload = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": true,
        });
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(LlmError::service("request cancelled")),
            sent = self.http.post(self.generate_url.clone()).json(&payload).send() => {
                sent.map_err(|e| LlmError::transport("request transport failed", e))?
            }
        };
        let status = response.status();
        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(LlmError::service("request cancelled")),
            text = response.text() => {
                text.map_err(|e| LlmError::transport("failed to read response body", e))?
            }
        };
        if !status.is_success() {
            return Err(LlmError::status(status, body));
        }
        Ok(assemble_stream(&body))
    }

    /// Cache-or-fetch a validated JSON value for `cache_key`.
    async fn query_json(
        &self,
        cache_key: &str,
        prompt: &str,
        shape: Shape,
        cancel: &CancellationToken,
    ) -> Result<Value, LlmError> {
        if let Some(bytes) = self.cache.read(cache_key).await {
            match serde_json::from_slice::<Value>(&bytes) {
                Ok(value) if shape.accepts(&value) => return Ok(value),
                _ => {
                    // Malformed cache entries count as misses.
                    warn!(cache_key, "ignoring unusable cache entry");
                }
            }
        }

        let extracted = retry(
            &self.policy,
            cancel,
            LlmError::retryability,
            || async move {
                let assembled = self.generate(prompt, cancel).await?;
                // A bare `null` is a legal "no relationship" answer but has
                // no brackets for the extractor to find.
                let candidate = if assembled.trim() == "null" {
                    "null"
                } else {
                    first_json_value(&assembled)
                        .ok_or_else(|| LlmError::parse("no JSON value in response"))?
                };
                let value: Value = serde_json::from_str(candidate)
                    .map_err(|e| LlmError::parse(format!("extracted JSON is invalid: {e}")))?;
                if !shape.accepts(&value) {
                    return Err(LlmError::parse("response JSON has the wrong shape"));
                }
                Ok(candidate.to_string())
            },
        )
        .await?;

        self.cache.write(cache_key, extracted.as_bytes()).await;
        debug!(cache_key, "model response cached");
        // The bytes were just validated; a second parse cannot fail.
        serde_json::from_str(&extracted)
            .map_err(|e| LlmError::parse(format!("cached bytes failed to re-parse: {e}")))
    }
}

#[async_trait]
impl LanguageModel for OllamaClient {
    #[instrument(skip(self, cancel), err)]
    async fn related_concepts(
        &self,
        concept: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<RelatedConcept>, LlmError> {
        let cache_key = format!("related_concepts:{concept}");
        let prompt = prompts::related_concepts(concept);
        let value = self
            .query_json(&cache_key, &prompt, Shape::RelatedList, cancel)
            .await?;
        Ok(decode_related(value, concept))
    }

    #[instrument(skip(self, cancel), err)]
    async fn relationship(
        &self,
        a: &str,
        b: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Relationship>, LlmError> {
        let cache_key = format!("relationship:{a}|{b}");
        let prompt = prompts::relationship(a, b);
        let value = self
            .query_json(&cache_key, &prompt, Shape::Relationship, cancel)
            .await?;
        Ok(decode_relationship(value, a, b))
    }
}
