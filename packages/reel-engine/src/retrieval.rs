//! Nearest-template lookup over a remote vector index.
//!
//! A store turns a free-text query into at most `top_k` [`Template`]s ordered by
//! descending similarity. An empty result means "nothing comparable"; errors are
//! reserved for transport or protocol failures.

use crate::error::{ReelError, ReelResult};
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

/// A known-good code sample together with the instruction it answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub filename: String,
    pub instruction: String,
    pub code: String,
    pub similarity_score: f32,
}

#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn retrieve(&self, query: &str, top_k: usize) -> ReelResult<Vec<Template>>;
}

/// Orders by non-increasing score. The sort is stable so equal scores keep index order.
pub fn rank(mut templates: Vec<Template>, top_k: usize) -> Vec<Template> {
    templates.sort_by(|a, b| b.similarity_score.total_cmp(&a.similarity_score));
    templates.truncate(top_k);
    templates
}

/// Pinecone-backed store: hosted inference for the query embedding, then an index query.
#[derive(Clone)]
pub struct PineconeStore {
    pub inference_host: String,
    pub index_host: String,
    pub embed_model: String,
    api_key: String,
    timeout: Duration,
    http: reqwest::Client,
}

const API_VERSION: &str = "2025-01";

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    parameters: EmbedParameters,
    inputs: Vec<EmbedInput<'a>>,
}

#[derive(Serialize)]
struct EmbedParameters {
    input_type: &'static str,
}

#[derive(Serialize)]
struct EmbedInput<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    data: Vec<EmbedData>,
}

#[derive(Deserialize)]
struct EmbedData {
    #[serde(default)]
    values: Vec<f32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Deserialize)]
struct QueryMatch {
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<Value>,
}

impl QueryMatch {
    fn into_template(self) -> Template {
        let meta = self.metadata.unwrap_or(Value::Null);
        let field = |key: &str| meta.get(key).and_then(|v| v.as_str()).map(str::to_string);
        Template {
            filename: field("filename").unwrap_or_else(|| "Unknown".to_string()),
            instruction: field("instruction").unwrap_or_default(),
            code: field("response").unwrap_or_default(),
            similarity_score: self.score,
        }
    }
}

impl PineconeStore {
    pub fn new(inference_host: &str, index_host: &str, api_key: String) -> Self {
        Self {
            inference_host: inference_host.trim_end_matches('/').to_string(),
            index_host: index_host.trim_end_matches('/').to_string(),
            embed_model: "llama-text-embed-v2".to_string(),
            api_key,
            timeout: Duration::from_secs(30),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_embed_model(mut self, model: String) -> Self {
        self.embed_model = model;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_configured(&self) -> bool {
        !self.index_host.is_empty() && !self.api_key.is_empty()
    }

    async fn post_json<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        body: &B,
    ) -> anyhow::Result<R> {
        let response = self
            .http
            .post(url)
            .timeout(self.timeout)
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .json(body)
            .send()
            .await
            .with_context(|| format!("request to {} failed", url))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "{} returned {}: {}",
                url,
                status,
                text.chars().take(300).collect::<String>()
            );
        }
        response
            .json()
            .await
            .with_context(|| format!("malformed response from {}", url))
    }

    /// `Ok(None)` when the service answered but produced no vector.
    async fn embed_query(&self, query: &str) -> ReelResult<Option<Vec<f32>>> {
        let url = format!("{}/embed", self.inference_host);
        let request = EmbedRequest {
            model: &self.embed_model,
            parameters: EmbedParameters {
                input_type: "query",
            },
            inputs: vec![EmbedInput { text: query }],
        };
        let response: EmbedResponse = self
            .post_json(&url, &request)
            .await
            .map_err(|e| ReelError::Retrieval(format!("embedding: {:#}", e)))?;

        Ok(response
            .data
            .into_iter()
            .next()
            .map(|d| d.values)
            .filter(|v| !v.is_empty()))
    }
}

#[async_trait]
impl TemplateStore for PineconeStore {
    async fn retrieve(&self, query: &str, top_k: usize) -> ReelResult<Vec<Template>> {
        if !self.is_configured() {
            return Err(ReelError::Retrieval(
                "template index is not configured (index host or API key missing)".into(),
            ));
        }
        let Some(vector) = self.embed_query(query).await? else {
            info!("embedding service returned no vector; treating as no match");
            return Ok(Vec::new());
        };
        debug!(dimensions = vector.len(), top_k, "querying template index");

        let url = format!("{}/query", self.index_host);
        let request = QueryRequest {
            vector: &vector,
            top_k,
            include_metadata: true,
        };
        let response: QueryResponse = self
            .post_json(&url, &request)
            .await
            .map_err(|e| ReelError::Retrieval(format!("index query: {:#}", e)))?;

        let templates = rank(
            response
                .matches
                .into_iter()
                .map(QueryMatch::into_template)
                .collect(),
            top_k,
        );
        info!(found = templates.len(), "template retrieval finished");
        Ok(templates)
    }
}

// Exposed for e2e and integration testing
pub mod mocks {
    use super::*;

    /// Scores templates by how many query words appear in their instruction.
    #[derive(Clone, Default)]
    pub struct StaticTemplateStore {
        pub templates: Vec<(String, String, String)>,
        pub fail_with: Option<String>,
    }

    impl StaticTemplateStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_template(mut self, filename: &str, instruction: &str, code: &str) -> Self {
            self.templates
                .push((filename.to_string(), instruction.to_string(), code.to_string()));
            self
        }

        pub fn failing(message: &str) -> Self {
            Self {
                templates: Vec::new(),
                fail_with: Some(message.to_string()),
            }
        }
    }

    #[async_trait]
    impl TemplateStore for StaticTemplateStore {
        async fn retrieve(&self, query: &str, top_k: usize) -> ReelResult<Vec<Template>> {
            if let Some(ref message) = self.fail_with {
                return Err(ReelError::Retrieval(message.clone()));
            }
            let words: Vec<String> = query
                .split_whitespace()
                .map(|w| w.to_lowercase())
                .collect();
            let scored = self
                .templates
                .iter()
                .filter_map(|(filename, instruction, code)| {
                    let lower = instruction.to_lowercase();
                    let hits = words.iter().filter(|w| lower.contains(w.as_str())).count();
                    (hits > 0).then(|| Template {
                        filename: filename.clone(),
                        instruction: instruction.clone(),
                        code: code.clone(),
                        similarity_score: hits as f32 / words.len().max(1) as f32,
                    })
                })
                .collect();
            Ok(rank(scored, top_k))
        }
    }
}
