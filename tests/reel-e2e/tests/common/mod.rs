#![allow(dead_code)]

use reel_engine::artifacts::ArtifactStore;
use reel_engine::logging::PipelineLogger;
use reel_engine::model::mocks::MockModelClient;
use reel_engine::pipeline::Pipeline;
use reel_engine::render::{RenderEngine, Renderer};
use reel_engine::retrieval::mocks::StaticTemplateStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const CIRCLE_TEMPLATE: &str = "from manim import *

class CircleDemo(Scene):
    def construct(self):
        # a single circle in the middle
        circle = Circle(color=BLUE)

        self.play(Create(circle))
        self.wait(1)
";

/// Writes media the way the real engine lays it out:
/// `<media>/videos/<source stem>/<resolution>/<output_file>.mp4` plus a partial segment.
pub const RENDERING_ENGINE: &str = r#"
quality="$1"; source="$2"; scene="$3"; uid="$5"; media="$7"
stem=$(basename "$source" .py)
case "$quality" in
  -ql) res=480p15 ;;
  -qm) res=720p30 ;;
  *) res=1080p60 ;;
esac
out="$media/videos/$stem/$res"
mkdir -p "$out/partial_movie_files/$scene"
printf 'segment' > "$out/partial_movie_files/$scene/uncached_00000.mp4"
printf 'video of %s' "$scene" > "$out/$uid.mp4"
echo "File ready at $out/$uid.mp4"
"#;

pub const HANGING_ENGINE: &str = "exec sleep 30\n";

pub const FAILING_ENGINE: &str = "echo 'NameError: name Circel is not defined' 1>&2\nexit 1\n";

/// Exits cleanly without producing any video.
pub const SILENT_ENGINE: &str = "exit 0\n";

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub store: ArtifactStore,
    pub mock: MockModelClient,
    pub logger: PipelineLogger,
}

impl Harness {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path().join("renders")).unwrap();
        let logger = PipelineLogger::new(&store.logs_dir()).await.unwrap();
        Self {
            dir,
            store,
            mock: MockModelClient::new(),
            logger,
        }
    }

    /// Saves `body` as a shell script outside the artifact root and returns an engine running it.
    pub fn engine(&self, name: &str, body: &str, timeout: Duration) -> RenderEngine {
        let script = self.dir.path().join(format!("{}.sh", name));
        std::fs::write(&script, body).unwrap();
        RenderEngine {
            program: "sh".into(),
            args: vec![script.to_string_lossy().into_owned()],
            timeout,
        }
    }

    pub fn renderer(&self, engine: RenderEngine) -> Renderer {
        Renderer::new(engine, self.store.clone()).with_logger(self.logger.clone())
    }

    pub fn pipeline(
        &self,
        templates: StaticTemplateStore,
        engine: RenderEngine,
    ) -> Pipeline<MockModelClient, StaticTemplateStore> {
        Pipeline::new(
            templates,
            Arc::new(self.mock.clone()),
            self.renderer(engine),
            "gpt-oss:20b",
            "deepseek-r1:1.5b",
        )
        .with_logger(self.logger.clone())
    }

    pub fn ledger(&self) -> Vec<serde_json::Value> {
        std::fs::read_to_string(self.logger.log_file_path())
            .unwrap_or_default()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }
}

pub fn circle_store() -> StaticTemplateStore {
    StaticTemplateStore::new()
        .with_template("circle.py", "draw a blue circle", CIRCLE_TEMPLATE)
        .with_template("square.py", "draw a square", "class SquareDemo(Scene):\n    pass\n")
}

pub fn files_under(dir: &Path) -> Vec<PathBuf> {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect()
}

pub fn has_partials(dir: &Path) -> bool {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .any(|e| e.file_type().is_dir() && e.file_name() == "partial_movie_files")
}
