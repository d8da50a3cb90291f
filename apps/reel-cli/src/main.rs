use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use dialoguer::{Confirm, Input, theme::ColorfulTheme};
use indicatif::ProgressBar;
use reel_engine::{
    artifacts::{ArtifactStore, RetentionReport},
    config::{self, ReelConfig},
    observer::PipelineObserver,
    pipeline::{Pipeline, ProcessOutcome, VisualizeOutcome},
    render::Quality,
};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug, Clone)]
#[command(version, about = "Turn animation requests into rendered scenes", long_about = None)]
struct Args {
    /// Configuration file (JSON, or YAML by extension)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Print outcome records as JSON instead of styled text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Retrieve a template and adapt it to the request
    Process {
        /// Animation request (prompts when omitted)
        message: Option<String>,
        /// Also save the generated scene code to this file
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Render scene code and explain the original request
    Visualize {
        /// File containing the scene code
        file: PathBuf,
        /// low, medium or high
        #[arg(short, long)]
        quality: Option<Quality>,
        /// Request to explain alongside the video
        #[arg(short, long)]
        request: Option<String>,
    },
    /// Process a request, then render the result
    Run {
        message: Option<String>,
        #[arg(short, long)]
        quality: Option<Quality>,
        /// Render without confirming the generated code
        #[arg(short, long)]
        yes: bool,
        /// Also save the generated scene code to this file
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Apply the retention policy to the artifact root
    Cleanup {
        /// Override the configured number of renders to keep
        #[arg(long)]
        keep: Option<usize>,
    },
    /// Map a video path (relative to the videos directory) to a file inside the artifact root
    Resolve { path: String },
}

struct CliObserver {
    spinner: Mutex<Option<ProgressBar>>,
    quiet: bool,
}

impl CliObserver {
    fn new(quiet: bool) -> Self {
        Self {
            spinner: Mutex::new(None),
            quiet,
        }
    }

    fn clear_spinner(&self) {
        if let Some(spinner) = self.spinner.lock().ok().and_then(|mut s| s.take()) {
            spinner.finish_and_clear();
        }
    }
}

impl PipelineObserver for CliObserver {
    fn start_step(&self, name: &str) {
        info!("Step started: {}", name);
        if self.quiet {
            return;
        }
        self.clear_spinner();
        let spinner = ProgressBar::new_spinner();
        spinner.set_message(name.to_string());
        spinner.enable_steady_tick(Duration::from_millis(100));
        if let Ok(mut slot) = self.spinner.lock() {
            *slot = Some(spinner);
        }
    }

    fn end_step(&self, name: &str) {
        info!("Step ended: {}", name);
        self.clear_spinner();
    }

    fn render_artifact(&self, kind: &str, data: &Value) {
        if self.quiet || kind == "code" {
            return;
        }
        println!("\n{}:", style(kind).bold().green());
        if let Some(obj) = data.as_object() {
            for (key, val) in obj {
                match val.as_str() {
                    Some(s) => println!("  {}: {}", style(key).dim(), s),
                    None => println!("  {}: {}", style(key).dim(), val),
                }
            }
        } else {
            println!("  {}", data);
        }
    }

    fn log_info(&self, msg: &str) {
        info!("{}", msg);
        if !self.quiet {
            println!("{}", style(msg).green());
        }
    }

    fn log_error(&self, msg: &str) {
        warn!("{}", msg);
        if !self.quiet {
            println!("{}", style(msg).red());
        }
    }
}

fn setup_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("info,reel_cli=debug,reel_engine=debug")
    } else {
        EnvFilter::new("warn,reel_cli=info,reel_engine=info")
    };

    fmt::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

fn ask_message(message: Option<String>) -> Result<String> {
    if let Some(m) = message.filter(|m| !m.trim().is_empty()) {
        return Ok(m);
    }
    Input::with_theme(&ColorfulTheme::default())
        .with_prompt("What should be animated?")
        .interact_text()
        .context("Failed to read the request")
}

async fn read_code(file: &Path) -> Result<String> {
    tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read scene code from {}", file.display()))
}

async fn save_code(path: &Path, code: &str) -> Result<()> {
    tokio::fs::write(path, code)
        .await
        .with_context(|| format!("Failed to write scene code to {}", path.display()))?;
    info!(path = %path.display(), "scene code saved");
    Ok(())
}

async fn save_processed(out: Option<&Path>, outcome: &ProcessOutcome) -> Result<()> {
    match (out, outcome.code.as_deref()) {
        (Some(path), Some(code)) if outcome.success => save_code(path, code).await,
        _ => Ok(()),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_process(outcome: &ProcessOutcome) {
    if !outcome.success {
        println!(
            "{} {}",
            style("Processing failed:").bold().red(),
            outcome.error.as_deref().unwrap_or("unknown error")
        );
        return;
    }
    if let Some(t) = &outcome.template {
        println!(
            "{} {} {}",
            style("Template:").bold(),
            t.filename,
            style(format!("(score {:.3})", t.score)).dim()
        );
    }
    println!("\n{}", outcome.code.as_deref().unwrap_or_default());
    println!(
        "\n{}",
        style(format!("Done in {:.2}s", outcome.execution_time)).dim()
    );
}

fn print_visualize(outcome: &VisualizeOutcome) {
    if !outcome.success {
        println!(
            "{} {}",
            style("Rendering failed:").bold().red(),
            outcome.error.as_deref().unwrap_or("unknown error")
        );
        return;
    }
    println!(
        "{} {}",
        style("Video:").bold().green(),
        outcome.video_path.as_deref().unwrap_or_default()
    );
    if let Some(url) = &outcome.video_url {
        println!("{} {}", style("URL:").bold(), url);
    }
    if let Some(text) = &outcome.explanation {
        println!("\n{}\n{}", style("Explanation").bold().cyan(), text);
    }
}

fn print_retention(report: &RetentionReport) {
    if report.is_noop() {
        println!("{}", style("Nothing to clean up.").dim());
        return;
    }
    for path in &report.removed_files {
        println!("  {} {}", style("removed").red(), path.display());
    }
    for path in &report.purged_partials {
        println!("  {} {}", style("purged").yellow(), path.display());
    }
    println!(
        "{}",
        style(format!(
            "Kept {} render(s), removed {} file(s), {} empty dir(s), {} partial tree(s).",
            report.kept,
            report.removed_files.len(),
            report.removed_dirs.len(),
            report.purged_partials.len()
        ))
        .green()
    );
}

fn confirm_render(yes: bool) -> Result<bool> {
    if yes {
        return Ok(true);
    }
    Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt("Render this scene?")
        .default(true)
        .interact()
        .context("Failed to read confirmation")
}

async fn build_pipeline(
    config: &ReelConfig,
    observer: Arc<CliObserver>,
) -> Result<Pipeline<reel_engine::model::OllamaClient, reel_engine::retrieval::PineconeStore>> {
    let pipeline = Pipeline::from_config(config)
        .await
        .context("Failed to initialise the pipeline")?;
    Ok(pipeline.with_observer(observer))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(args.debug);

    let config = config::load_config(args.config.as_deref())
        .await
        .context("Failed to load configuration")?;
    info!(root = %config.render.artifact_root.display(), "configuration loaded");
    let observer = Arc::new(CliObserver::new(args.json));

    match args.command {
        Command::Process { message, out } => {
            let message = ask_message(message)?;
            let pipeline = build_pipeline(&config, observer).await?;
            let outcome = pipeline.process(&message).await;
            save_processed(out.as_deref(), &outcome).await?;
            if args.json {
                print_json(&outcome)?;
            } else {
                print_process(&outcome);
            }
        }
        Command::Visualize {
            file,
            quality,
            request,
        } => {
            let code = read_code(&file).await?;
            let quality = quality.unwrap_or(config.render.default_quality);
            let pipeline = build_pipeline(&config, observer).await?;
            let outcome = pipeline.visualize(&code, quality, request.as_deref()).await;
            if args.json {
                print_json(&outcome)?;
            } else {
                print_visualize(&outcome);
            }
        }
        Command::Run {
            message,
            quality,
            yes,
            out,
        } => {
            let message = ask_message(message)?;
            let quality = quality.unwrap_or(config.render.default_quality);
            let pipeline = build_pipeline(&config, observer).await?;
            if args.json {
                let (processed, visualized) =
                    pipeline.process_and_visualize(&message, quality).await;
                save_processed(out.as_deref(), &processed).await?;
                print_json(&serde_json::json!({
                    "process": processed,
                    "visualize": visualized,
                }))?;
            } else {
                let processed = pipeline.process(&message).await;
                save_processed(out.as_deref(), &processed).await?;
                print_process(&processed);
                if let Some(code) = processed.code.as_deref().filter(|_| processed.success) {
                    if confirm_render(yes)? {
                        let outcome = pipeline.visualize(code, quality, Some(&message)).await;
                        print_visualize(&outcome);
                    }
                }
            }
        }
        Command::Cleanup { keep } => {
            let mut pipeline = build_pipeline(&config, observer).await?;
            if let Some(keep) = keep {
                pipeline = pipeline.with_retention(keep);
            }
            let report = pipeline
                .cleanup()
                .await
                .context("Failed to apply the retention policy")?;
            if args.json {
                print_json(&report)?;
            } else {
                print_retention(&report);
            }
        }
        Command::Resolve { path } => {
            let store = ArtifactStore::open(&config.render.artifact_root)
                .context("Failed to open the artifact root")?;
            let resolved = store
                .resolve(&path)
                .with_context(|| format!("Cannot serve '{}'", path))?;
            if args.json {
                print_json(&serde_json::json!({ "path": resolved }))?;
            } else {
                println!("{}", resolved.display());
            }
        }
    }

    Ok(())
}
