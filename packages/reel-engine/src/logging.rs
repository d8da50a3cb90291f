use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Pipeline milestones recorded in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum LogEventType {
    RequestReceived,
    TemplateRetrieved,
    TemplateMissing,
    MutationApplied,
    MutationFallback,
    CodeExtracted,
    RenderStarted,
    RenderSucceeded,
    RenderFailed,
    ArtifactRemoved,
    PartialsPurged,
    ExplanationFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// One ledger line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub timestamp: String,
    pub event_type: LogEventType,
    pub level: LogLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl LogEvent {
    pub fn new(
        event_type: LogEventType,
        level: LogLevel,
        message: impl Into<String>,
        details: Option<serde_json::Value>,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            event_type,
            level,
            message: message.into(),
            details,
        }
    }

    pub fn info_with_details(
        event_type: LogEventType,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self::new(event_type, LogLevel::Info, message, Some(details))
    }

    pub fn warn_with_details(
        event_type: LogEventType,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self::new(event_type, LogLevel::Warn, message, Some(details))
    }

    pub fn error_with_details(
        event_type: LogEventType,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self::new(event_type, LogLevel::Error, message, Some(details))
    }
}

/// Appends JSONL events to `<logs dir>/pipeline.jsonl`.
///
/// Request-scoped events carry a `request_id` in their details. Each event is one
/// open/append/flush.
#[derive(Debug, Clone)]
pub struct PipelineLogger {
    log_file_path: PathBuf,
}

impl PipelineLogger {
    pub async fn new(logs_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(logs_dir)
            .await
            .context("Failed to create logs directory")?;
        Ok(Self {
            log_file_path: logs_dir.join("pipeline.jsonl"),
        })
    }

    pub async fn log(&self, event: LogEvent) -> Result<()> {
        let mut line = serde_json::to_string(&event).context("Failed to serialize log event")?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file_path)
            .await
            .context("Failed to open log file")?;

        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Ledger writes must never fail a request; problems go to the process log instead.
    pub async fn record(&self, event: LogEvent) {
        if let Err(e) = self.log(event).await {
            tracing::warn!(error = %e, path = %self.log_file_path.display(), "pipeline ledger write failed");
        }
    }

    pub async fn log_request(&self, request_id: &str, stage: &str, message: &str) {
        self.record(LogEvent::info_with_details(
            LogEventType::RequestReceived,
            format!("{} request received", stage),
            serde_json::json!({
                "request_id": request_id,
                "stage": stage,
                "message": message,
            }),
        ))
        .await
    }

    pub async fn log_template(&self, request_id: &str, filename: &str, score: f32, instruction: &str) {
        self.record(LogEvent::info_with_details(
            LogEventType::TemplateRetrieved,
            format!("Best match {} (score {:.3})", filename, score),
            serde_json::json!({
                "request_id": request_id,
                "filename": filename,
                "score": score,
                "instruction": instruction.chars().take(100).collect::<String>(),
            }),
        ))
        .await
    }

    pub async fn log_template_missing(&self, request_id: &str, reason: &str) {
        self.record(LogEvent::warn_with_details(
            LogEventType::TemplateMissing,
            "No template available",
            serde_json::json!({ "request_id": request_id, "reason": reason }),
        ))
        .await
    }

    pub async fn log_mutation(&self, request_id: &str, applied: bool, model: &str) {
        let event = if applied {
            LogEvent::info_with_details(
                LogEventType::MutationApplied,
                format!("Template modified with {}", model),
                serde_json::json!({ "request_id": request_id, "model": model }),
            )
        } else {
            LogEvent::warn_with_details(
                LogEventType::MutationFallback,
                "Modification failed; returning original template",
                serde_json::json!({ "request_id": request_id, "model": model }),
            )
        };
        self.record(event).await
    }

    pub async fn log_extracted(&self, request_id: &str, origin: &str, scene: Option<&str>, chars: usize) {
        self.record(LogEvent::info_with_details(
            LogEventType::CodeExtracted,
            format!("Extracted {} chars of code ({})", chars, origin),
            serde_json::json!({
                "request_id": request_id,
                "origin": origin,
                "scene": scene,
                "chars": chars,
            }),
        ))
        .await
    }

    pub async fn log_render_started(&self, unique_id: &str, quality: &str) {
        self.record(LogEvent::info_with_details(
            LogEventType::RenderStarted,
            format!("Rendering {}", unique_id),
            serde_json::json!({ "unique_id": unique_id, "quality": quality }),
        ))
        .await
    }

    pub async fn log_render_succeeded(&self, unique_id: &str, path: &str, size_bytes: u64) {
        self.record(LogEvent::info_with_details(
            LogEventType::RenderSucceeded,
            format!("Rendered {} to {}", unique_id, path),
            serde_json::json!({
                "unique_id": unique_id,
                "path": path,
                "size_bytes": size_bytes,
            }),
        ))
        .await
    }

    pub async fn log_render_failed(&self, unique_id: Option<&str>, error: &str) {
        self.record(LogEvent::error_with_details(
            LogEventType::RenderFailed,
            "Render failed",
            serde_json::json!({
                "unique_id": unique_id,
                "error": error.chars().take(2000).collect::<String>(),
            }),
        ))
        .await
    }

    pub async fn log_artifact_removed(&self, path: &str) {
        self.record(LogEvent::info_with_details(
            LogEventType::ArtifactRemoved,
            format!("Deleted old render: {}", path),
            serde_json::json!({ "path": path }),
        ))
        .await
    }

    pub async fn log_partials_purged(&self, path: &str) {
        self.record(LogEvent::info_with_details(
            LogEventType::PartialsPurged,
            format!("Cleaned up partial files: {}", path),
            serde_json::json!({ "path": path }),
        ))
        .await
    }

    pub async fn log_explanation_failed(&self, error: &str) {
        self.record(LogEvent::warn_with_details(
            LogEventType::ExplanationFailed,
            "Explanation unavailable",
            serde_json::json!({ "error": error }),
        ))
        .await
    }

    pub fn log_file_path(&self) -> &Path {
        &self.log_file_path
    }
}
