pub mod job;

use crate::artifacts::{ArtifactStore, RenderedArtifact};
use crate::config::RenderConfig;
use crate::error::{ReelError, ReelResult};
use crate::logging::PipelineLogger;
use crate::scene::find_scene_name;
use job::{RenderJob, WaitOutcome};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    #[default]
    Low,
    Medium,
    High,
}

impl Quality {
    /// Engine quality flag, e.g. `-ql`.
    pub fn flag(self) -> &'static str {
        match self {
            Quality::Low => "-ql",
            Quality::Medium => "-qm",
            Quality::High => "-qh",
        }
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Quality::Low => "low",
            Quality::Medium => "medium",
            Quality::High => "high",
        };
        f.write_str(name)
    }
}

impl FromStr for Quality {
    type Err = ReelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "l" | "low" => Ok(Quality::Low),
            "m" | "medium" => Ok(Quality::Medium),
            "h" | "high" => Ok(Quality::High),
            other => Err(ReelError::Config(format!(
                "unknown quality '{}' (expected low, medium or high)",
                other
            ))),
        }
    }
}

/// How to invoke the external engine.
#[derive(Debug, Clone)]
pub struct RenderEngine {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl RenderEngine {
    pub fn from_config(config: &RenderConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            timeout: config.timeout(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub artifact: RenderedArtifact,
    /// Engine stdout.
    pub output: String,
}

/// Caller-facing result of one render attempt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenderResult {
    pub success: bool,
    pub artifact_path: Option<PathBuf>,
    pub error: Option<String>,
    pub scene_name: Option<String>,
    pub unique_id: Option<String>,
    pub size_bytes: Option<u64>,
    pub output: Option<String>,
}

pub struct Renderer {
    engine: RenderEngine,
    store: ArtifactStore,
    logger: Option<PipelineLogger>,
}

impl Renderer {
    pub fn new(engine: RenderEngine, store: ArtifactStore) -> Self {
        Self {
            engine,
            store,
            logger: None,
        }
    }

    pub fn with_logger(mut self, logger: PipelineLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn engine(&self) -> &RenderEngine {
        &self.engine
    }

    pub fn command_args(
        &self,
        quality: Quality,
        source: &Path,
        scene_name: &str,
        unique_id: &str,
    ) -> Vec<OsString> {
        let mut args: Vec<OsString> = self.engine.args.iter().map(OsString::from).collect();
        args.push(quality.flag().into());
        args.push(source.as_os_str().to_owned());
        args.push(scene_name.into());
        args.push("--output_file".into());
        args.push(unique_id.into());
        args.push("--media_dir".into());
        args.push(self.store.root().as_os_str().to_owned());
        args.push("--disable_caching".into());
        args
    }

    /// Renders `code` and returns a structured outcome; never panics or propagates.
    pub async fn render(&self, code: &str, quality: Quality) -> RenderResult {
        match self.try_render(code, quality).await {
            Ok(out) => RenderResult {
                success: true,
                artifact_path: Some(out.artifact.path.clone()),
                error: None,
                scene_name: Some(out.artifact.scene_name.clone()),
                unique_id: Some(out.artifact.unique_id.clone()),
                size_bytes: Some(out.artifact.size_bytes),
                output: Some(out.output),
            },
            Err(e) => RenderResult {
                success: false,
                error: Some(e.user_message()),
                scene_name: find_scene_name(code),
                ..Default::default()
            },
        }
    }

    pub async fn try_render(&self, code: &str, quality: Quality) -> ReelResult<RenderOutput> {
        let scene_name = find_scene_name(code).ok_or(ReelError::NoSceneFound)?;
        let unique_id = self.store.next_unique_id(&scene_name);
        let _in_flight = self.store.begin_job(&unique_id)?;

        let result = self.run_job(code, quality, &scene_name, &unique_id).await;
        if let Err(ref e) = result {
            if let Some(logger) = &self.logger {
                logger
                    .log_render_failed(Some(&unique_id), &e.user_message())
                    .await;
            }
        }
        result
    }

    async fn run_job(
        &self,
        code: &str,
        quality: Quality,
        scene_name: &str,
        unique_id: &str,
    ) -> ReelResult<RenderOutput> {
        tokio::fs::create_dir_all(self.store.scratch_dir()).await?;
        let scratch = tempfile::Builder::new()
            .prefix(unique_id)
            .suffix(".py")
            .tempfile_in(self.store.scratch_dir())?;
        tokio::fs::write(scratch.path(), code).await?;

        info!(scene = scene_name, %quality, unique_id, "rendering scene");
        if let Some(logger) = &self.logger {
            logger.log_render_started(unique_id, &quality.to_string()).await;
        }

        let args = self.command_args(quality, scratch.path(), scene_name, unique_id);
        let waited = match RenderJob::start(&self.engine.program, &args) {
            Ok(job) => job.wait_with_timeout(self.engine.timeout).await,
            Err(e) => Err(e),
        };

        let scratch_path = scratch.path().to_path_buf();
        if let Err(e) = scratch.close() {
            warn!(path = %scratch_path.display(), error = %e, "could not delete scratch file");
        }

        let output = match waited {
            Ok(WaitOutcome::Exited(output)) => output,
            Ok(WaitOutcome::TimedOut) => {
                return Err(ReelError::Timeout {
                    secs: self.engine.timeout.as_secs(),
                });
            }
            Err(e) => {
                return Err(ReelError::RenderFailed {
                    exit_code: None,
                    output: format!("failed to run render engine '{}': {}", self.engine.program, e),
                });
            }
        };

        if !output.status.success() {
            warn!(unique_id, status = %output.status, "render engine failed");
            let message = [&output.stderr, &output.stdout]
                .into_iter()
                .find(|s| !s.trim().is_empty())
                .cloned()
                .unwrap_or_else(|| "Unknown error".to_string());
            return Err(ReelError::RenderFailed {
                exit_code: output.status.code(),
                output: message,
            });
        }

        let path = self
            .store
            .locate(unique_id)
            .ok_or_else(|| ReelError::ArtifactNotFound {
                unique_id: unique_id.to_string(),
            })?;
        if !self.store.contains(&path) {
            return Err(ReelError::PathEscape(path));
        }

        let artifact = RenderedArtifact::from_path(path, scene_name, unique_id)?;
        info!(
            path = %artifact.path.display(),
            size_kb = artifact.size_bytes / 1024,
            elapsed_ms = output.elapsed.as_millis() as u64,
            "video rendered"
        );
        if let Some(logger) = &self.logger {
            logger
                .log_render_succeeded(
                    unique_id,
                    &artifact.path.to_string_lossy(),
                    artifact.size_bytes,
                )
                .await;
        }

        Ok(RenderOutput {
            artifact,
            output: output.stdout,
        })
    }
}
