use crate::error::{ReelError, ReelResult};
use crate::render::Quality;
use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct ReelConfig {
    pub store: StoreConfig,
    pub model: ModelConfig,
    pub render: RenderConfig,
}

/// Vector index used for template retrieval.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub inference_host: String,
    /// Data-plane host of the index, e.g. `https://manim-docs-xxxx.svc.pinecone.io`.
    pub index_host: Option<String>,
    pub embed_model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub request_timeout_secs: u64,
    pub top_k: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            inference_host: "https://api.pinecone.io".to_string(),
            index_host: None,
            embed_model: "llama-text-embed-v2".to_string(),
            api_key_env: "PINECONE_API_KEY".to_string(),
            request_timeout_secs: 30,
            top_k: 1,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ModelConfig {
    pub host: String,
    pub mutation_model: String,
    pub explanation_model: String,
    pub request_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:11434".to_string(),
            mutation_model: "gpt-oss:20b".to_string(),
            explanation_model: "deepseek-r1:1.5b".to_string(),
            request_timeout_secs: 180,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct RenderConfig {
    /// Engine executable, e.g. `manim` or `python`.
    pub program: String,
    /// Arguments placed before the render flags, e.g. `["-m", "manim"]`.
    pub args: Vec<String>,
    pub artifact_root: PathBuf,
    pub timeout_secs: u64,
    pub keep_last_n: usize,
    pub default_quality: Quality,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            program: "manim".to_string(),
            args: Vec::new(),
            artifact_root: PathBuf::from("renders"),
            timeout_secs: 300,
            keep_last_n: 20,
            default_quality: Quality::Low,
        }
    }
}

impl RenderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ReelConfig {
    pub fn validate(&self) -> ReelResult<()> {
        let schema_json = include_str!("../schema/reel.schema.json");
        let schema_val: Value = serde_json::from_str(schema_json)
            .map_err(|e| ReelError::Config(format!("embedded schema is not JSON: {}", e)))?;
        let compiled = JSONSchema::compile(&schema_val)
            .map_err(|e| ReelError::Config(format!("failed to compile schema: {}", e)))?;

        let instance =
            serde_json::to_value(self).map_err(|e| ReelError::Config(e.to_string()))?;
        if let Err(errors) = compiled.validate(&instance) {
            let error_msgs: Vec<String> = errors.map(|e| e.to_string()).collect();
            return Err(ReelError::Config(error_msgs.join(", ")));
        }

        if self.render.program.trim().is_empty() {
            return Err(ReelError::Config("render.program must not be blank".into()));
        }
        Ok(())
    }

    /// Applies the recognised environment overrides on top of file values.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("PINECONE_INDEX_HOST") {
            self.store.index_host = Some(host);
        }
        if let Some(host) = lookup("OLLAMA_HOST") {
            self.model.host = host;
        }
        if let Some(root) = lookup("REEL_ARTIFACT_ROOT") {
            self.render.artifact_root = PathBuf::from(root);
        }
    }

    pub fn store_api_key(&self) -> Option<String> {
        std::env::var(&self.store.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
    }
}

/// Loads the configuration file (JSON, or YAML by extension), overlays the environment and validates.
///
/// A missing or absent path yields the defaults.
pub async fn load_config(path: Option<&Path>) -> ReelResult<ReelConfig> {
    let mut config = match path {
        Some(p) if p.exists() => {
            let content = fs::read_to_string(p).await?;
            parse_config(p, &content)?
        }
        _ => ReelConfig::default(),
    };
    config.apply_env();
    config.validate()?;
    Ok(config)
}

fn parse_config(path: &Path, content: &str) -> ReelResult<ReelConfig> {
    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    if is_yaml {
        serde_yaml::from_str(content)
            .map_err(|e| ReelError::Config(format!("{}: {}", path.display(), e)))
    } else {
        serde_json::from_str(content)
            .map_err(|e| ReelError::Config(format!("{}: {}", path.display(), e)))
    }
}
