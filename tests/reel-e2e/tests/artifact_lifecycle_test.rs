#![cfg(unix)]

mod common;

use anyhow::Result;
use common::*;
use reel_engine::error::ReelError;
use reel_engine::render::Quality;
use reel_engine::retrieval::mocks::StaticTemplateStore;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn scene(name: &str) -> String {
    format!("from manim import *\n\nclass {}(Scene):\n    def construct(self):\n        self.wait(1)\n", name)
}

#[tokio::test]
async fn test_concurrent_renders_do_not_collide() -> Result<()> {
    let h = Harness::new().await;
    let renderer = Arc::new(h.renderer(h.engine("render", RENDERING_ENGINE, Duration::from_secs(30))));

    let mut handles = Vec::new();
    for _ in 0..6 {
        let renderer = renderer.clone();
        // Same scene name every time, so only the job id keeps them apart.
        handles.push(tokio::spawn(async move {
            renderer.try_render(&scene("Pulse"), Quality::Low).await
        }));
    }

    let mut paths = HashSet::new();
    let mut ids = HashSet::new();
    for handle in handles {
        let out = handle.await??;
        assert!(out.artifact.path.is_file());
        let name = out.artifact.path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.contains(&out.artifact.unique_id));
        assert!(h.store.contains(&out.artifact.path));
        ids.insert(out.artifact.unique_id);
        paths.insert(out.artifact.path);
    }
    assert_eq!(ids.len(), 6);
    assert_eq!(paths.len(), 6);
    assert!(h.store.in_flight().is_empty());
    assert!(files_under(&h.store.scratch_dir()).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_retention_keeps_newest_and_is_idempotent() -> Result<()> {
    let h = Harness::new().await;
    for _ in 0..4 {
        h.mock.add_response("explained");
    }
    let engine = h.engine("render", RENDERING_ENGINE, Duration::from_secs(30));
    let pipeline = h
        .pipeline(StaticTemplateStore::new(), engine)
        .with_retention(2);

    let mut last = None;
    for i in 0..4 {
        let outcome = pipeline
            .visualize(&scene(&format!("Step{}", i)), Quality::Low, Some("count"))
            .await;
        assert!(outcome.success, "{:?}", outcome.error);
        last = outcome.video_path;
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let videos = files_under(&h.store.videos_dir());
    assert_eq!(videos.len(), 2, "{:?}", videos);
    let last = last.unwrap();
    assert!(videos.iter().any(|p| p.to_string_lossy() == last));
    assert!(!has_partials(&h.store.videos_dir()));

    let again = pipeline.cleanup().await?;
    assert!(again.is_noop());
    assert_eq!(again.kept, 2);
    assert_eq!(files_under(&h.store.videos_dir()).len(), 2);

    // Emptied per-job directories went with their videos.
    let job_dirs = std::fs::read_dir(h.store.videos_dir())?.count();
    assert_eq!(job_dirs, 2);
    Ok(())
}

#[tokio::test]
async fn test_cleanup_records_removals_in_the_ledger() -> Result<()> {
    let h = Harness::new().await;
    let engine = h.engine("render", RENDERING_ENGINE, Duration::from_secs(30));
    let renderer = h.renderer(engine.clone());
    for i in 0..3 {
        renderer.try_render(&scene(&format!("Old{}", i)), Quality::Low).await?;
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let pipeline = h
        .pipeline(StaticTemplateStore::new(), engine)
        .with_retention(1);
    let report = pipeline.cleanup().await?;
    assert_eq!(report.removed_files.len(), 2);
    assert_eq!(files_under(&h.store.videos_dir()).len(), 1);

    let removed = h
        .ledger()
        .iter()
        .filter(|e| e["event_type"] == "artifact_removed")
        .count();
    assert_eq!(removed, 2);
    Ok(())
}

#[tokio::test]
async fn test_resolve_is_confined_to_videos() -> Result<()> {
    let h = Harness::new().await;
    let renderer = h.renderer(h.engine("render", RENDERING_ENGINE, Duration::from_secs(30)));
    let out = renderer.try_render(&scene("Confined"), Quality::Low).await?;

    let url = h.store.video_url(&out.artifact.path)?;
    let relative = url.trim_start_matches("/video/");
    assert_eq!(h.store.resolve(relative)?, out.artifact.path.canonicalize()?);

    for bad in [
        "../logs/pipeline.jsonl",
        "../../etc/passwd",
        "/etc/passwd",
        "",
    ] {
        assert!(
            matches!(h.store.resolve(bad), Err(ReelError::PathEscape(_))),
            "{bad} should be rejected"
        );
    }
    assert!(matches!(
        h.store.resolve("missing/480p15/none.mp4"),
        Err(ReelError::NotFound(_))
    ));

    // A directory inside the videos tree is not servable.
    let dir = relative.rsplit_once('/').map(|(d, _)| d).unwrap();
    assert!(matches!(h.store.resolve(dir), Err(ReelError::NotFound(_))));
    Ok(())
}
