//! The two caller-facing operations.
//!
//! `process` turns a request into scene code (retrieve, mutate, extract) and `visualize`
//! turns scene code into a video plus a prose explanation. Both always return an outcome
//! record; failures are carried in its `error` field.

use crate::artifacts::{ArtifactStore, RetentionReport};
use crate::config::ReelConfig;
use crate::error::{ReelError, ReelResult};
use crate::explain::{Explainer, fallback_notice};
use crate::extract::extract;
use crate::logging::PipelineLogger;
use crate::model::{ModelClient, OllamaClient};
use crate::mutation::CodeMutator;
use crate::observer::{PipelineObserver, SilentObserver};
use crate::render::{Quality, RenderEngine, Renderer};
use crate::retrieval::{PineconeStore, TemplateStore};
use crate::scene::find_scene_name;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

const DEFAULT_USER_REQUEST: &str = "visualization request";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateInfo {
    pub filename: String,
    pub score: f32,
}

/// Result of `POST /process`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Seconds, rounded to two decimals.
    pub execution_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<TemplateInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProcessOutcome {
    fn failed(error: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            success: false,
            execution_time: round_secs(elapsed),
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Result of `POST /visualize`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisualizeOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scene_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VisualizeOutcome {
    fn failed(error: impl Into<String>, scene_name: Option<String>) -> Self {
        Self {
            success: false,
            scene_name,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

fn round_secs(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 100.0).round() / 100.0
}

pub struct Pipeline<C: ModelClient, S: TemplateStore> {
    templates: S,
    mutator: CodeMutator<C>,
    explainer: Explainer<C>,
    renderer: Renderer,
    artifacts: ArtifactStore,
    logger: Option<PipelineLogger>,
    observer: Arc<dyn PipelineObserver>,
    keep_last_n: usize,
    top_k: usize,
}

impl Pipeline<OllamaClient, PineconeStore> {
    /// Wires the remote clients, the engine and the artifact root from configuration.
    pub async fn from_config(config: &ReelConfig) -> ReelResult<Self> {
        let index_host = config.store.index_host.clone().unwrap_or_default();
        let api_key = config.store_api_key().unwrap_or_default();
        if index_host.is_empty() || api_key.is_empty() {
            warn!(
                api_key_env = %config.store.api_key_env,
                "template index not configured; process requests will fail"
            );
        }
        let templates = PineconeStore::new(&config.store.inference_host, &index_host, api_key)
            .with_embed_model(config.store.embed_model.clone())
            .with_timeout(Duration::from_secs(config.store.request_timeout_secs));

        let client = Arc::new(
            OllamaClient::new(&config.model.host)
                .with_timeout(Duration::from_secs(config.model.request_timeout_secs)),
        );

        let artifacts = ArtifactStore::open(&config.render.artifact_root)?;
        let logger = PipelineLogger::new(&artifacts.logs_dir())
            .await
            .map_err(|e| ReelError::Config(format!("{:#}", e)))?;
        let renderer = Renderer::new(RenderEngine::from_config(&config.render), artifacts)
            .with_logger(logger.clone());

        Ok(Pipeline::new(
            templates,
            client,
            renderer,
            &config.model.mutation_model,
            &config.model.explanation_model,
        )
        .with_logger(logger)
        .with_retention(config.render.keep_last_n)
        .with_top_k(config.store.top_k))
    }
}

impl<C: ModelClient, S: TemplateStore> Pipeline<C, S> {
    pub fn new(
        templates: S,
        client: Arc<C>,
        renderer: Renderer,
        mutation_model: &str,
        explanation_model: &str,
    ) -> Self {
        let artifacts = renderer.store().clone();
        Self {
            templates,
            mutator: CodeMutator::new(client.clone(), mutation_model),
            explainer: Explainer::new(client, explanation_model),
            renderer,
            artifacts,
            logger: None,
            observer: Arc::new(SilentObserver),
            keep_last_n: 20,
            top_k: 1,
        }
    }

    pub fn with_logger(mut self, logger: PipelineLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_retention(mut self, keep_last_n: usize) -> Self {
        self.keep_last_n = keep_last_n.max(1);
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub async fn process(&self, message: &str) -> ProcessOutcome {
        let started = Instant::now();
        let request_id = Uuid::new_v4().to_string();
        info!(request_id = %request_id, "processing request");
        if let Some(logger) = &self.logger {
            logger.log_request(&request_id, "process", message).await;
        }

        if message.trim().is_empty() {
            return ProcessOutcome::failed("no message provided", started.elapsed());
        }

        self.observer.start_step("Retrieving template");
        let retrieved = self.templates.retrieve(message, self.top_k).await;
        self.observer.end_step("Retrieving template");

        let template = match retrieved {
            Ok(found) => match found.into_iter().next() {
                Some(t) => t,
                None => {
                    warn!(request_id = %request_id, "no template found");
                    if let Some(logger) = &self.logger {
                        logger
                            .log_template_missing(&request_id, "empty result")
                            .await;
                    }
                    self.observer.log_error("No template found");
                    return ProcessOutcome::failed("no template found", started.elapsed());
                }
            },
            Err(e) => {
                warn!(request_id = %request_id, error = %e, "retrieval failed");
                if let Some(logger) = &self.logger {
                    logger
                        .log_template_missing(&request_id, &e.to_string())
                        .await;
                }
                self.observer.log_error(&e.to_string());
                return ProcessOutcome::failed(e.user_message(), started.elapsed());
            }
        };

        info!(
            request_id = %request_id,
            filename = %template.filename,
            score = template.similarity_score,
            "template retrieved"
        );
        if let Some(logger) = &self.logger {
            logger
                .log_template(
                    &request_id,
                    &template.filename,
                    template.similarity_score,
                    &template.instruction,
                )
                .await;
        }
        self.observer.render_artifact(
            "template",
            &serde_json::json!({
                "filename": template.filename,
                "score": template.similarity_score,
                "instruction": template.instruction,
            }),
        );

        self.observer.start_step("Modifying template");
        let (raw, applied) = self
            .mutator
            .mutate_or_template(message, &template.code)
            .await;
        self.observer.end_step("Modifying template");
        if !applied {
            self.observer
                .log_error("Modification failed, returning the original template");
        }
        if let Some(logger) = &self.logger {
            logger
                .log_mutation(&request_id, applied, self.mutator.model())
                .await;
        }

        let extracted = extract(&raw);
        let scene = extracted.scene_name();
        if let Err(e) = extracted.validate() {
            warn!(request_id = %request_id, error = %e, "extracted code has no scene class");
        }
        if let Some(logger) = &self.logger {
            let origin = serde_json::to_value(extracted.origin)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            logger
                .log_extracted(
                    &request_id,
                    &origin,
                    scene.as_deref(),
                    extracted.source.len(),
                )
                .await;
        }

        let code = extracted.into_source();
        self.observer
            .render_artifact("code", &serde_json::json!({ "code": code }));

        ProcessOutcome {
            success: true,
            code: Some(code),
            execution_time: round_secs(started.elapsed()),
            template: Some(TemplateInfo {
                filename: template.filename,
                score: template.similarity_score,
            }),
            error: None,
        }
    }

    pub async fn visualize(
        &self,
        code: &str,
        quality: Quality,
        user_request: Option<&str>,
    ) -> VisualizeOutcome {
        if code.trim().is_empty() {
            return VisualizeOutcome::failed("no code provided", None);
        }
        let user_request = user_request
            .filter(|r| !r.trim().is_empty())
            .unwrap_or(DEFAULT_USER_REQUEST);

        self.observer.start_step("Rendering");
        let rendered = self.renderer.try_render(code, quality).await;
        self.observer.end_step("Rendering");

        let artifact = match rendered {
            Ok(out) => out.artifact,
            Err(e) => {
                self.observer.log_error(&e.to_string());
                return VisualizeOutcome::failed(e.user_message(), find_scene_name(code));
            }
        };

        if !artifact.path.is_file() {
            let e = ReelError::ArtifactNotFound {
                unique_id: artifact.unique_id.clone(),
            };
            return VisualizeOutcome::failed(e.to_string(), Some(artifact.scene_name));
        }
        let video_url = match self.artifacts.video_url(&artifact.path) {
            Ok(url) => url,
            Err(e) => {
                return VisualizeOutcome::failed(e.user_message(), Some(artifact.scene_name));
            }
        };
        self.observer.render_artifact(
            "video",
            &serde_json::json!({
                "path": artifact.path,
                "url": video_url,
                "size_bytes": artifact.size_bytes,
            }),
        );

        self.observer.start_step("Explaining");
        let (report, explanation) = tokio::join!(
            self.run_retention(vec![artifact.path.clone()]),
            self.explainer.explain(code, user_request),
        );
        self.observer.end_step("Explaining");

        if let Err(e) = report {
            warn!(error = %e, "retention pass failed");
        }
        let explanation = match explanation {
            Ok(text) => text,
            Err(e) => {
                if let Some(logger) = &self.logger {
                    logger.log_explanation_failed(&e.to_string()).await;
                }
                warn!(error = %e, "explanation unavailable");
                fallback_notice(&e)
            }
        };

        VisualizeOutcome {
            success: true,
            video_path: Some(artifact.path.to_string_lossy().into_owned()),
            video_url: Some(video_url),
            scene_name: Some(artifact.scene_name),
            explanation: Some(explanation),
            error: None,
        }
    }

    /// `process`, then `visualize` on the produced code when processing succeeded.
    pub async fn process_and_visualize(
        &self,
        message: &str,
        quality: Quality,
    ) -> (ProcessOutcome, Option<VisualizeOutcome>) {
        let processed = self.process(message).await;
        let visualized = match processed.code.as_deref() {
            Some(code) if processed.success => {
                Some(self.visualize(code, quality, Some(message)).await)
            }
            _ => None,
        };
        (processed, visualized)
    }

    /// Retention with this pipeline's `keep_last_n`, off the async workers.
    pub async fn cleanup(&self) -> ReelResult<RetentionReport> {
        self.run_retention(Vec::new()).await
    }

    async fn run_retention(&self, protect: Vec<PathBuf>) -> ReelResult<RetentionReport> {
        let store = self.artifacts.clone();
        let keep = self.keep_last_n;
        let report = tokio::task::spawn_blocking(move || store.retain(keep, &protect))
            .await
            .map_err(|e| ReelError::Io(std::io::Error::other(e)))??;

        if let Some(logger) = &self.logger {
            for path in &report.removed_files {
                logger.log_artifact_removed(&path.to_string_lossy()).await;
            }
            for path in &report.purged_partials {
                logger.log_partials_purged(&path.to_string_lossy()).await;
            }
        }
        if !report.is_noop() {
            self.observer.log_info(&format!(
                "Removed {} old render(s) and {} partial director(ies)",
                report.removed_files.len(),
                report.purged_partials.len()
            ));
        }
        Ok(report)
    }
}
