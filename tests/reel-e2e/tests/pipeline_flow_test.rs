#![cfg(unix)]

mod common;

use anyhow::Result;
use common::*;
use reel_engine::error::ReelError;
use reel_engine::extract::extract;
use reel_engine::mutation::changed_lines;
use reel_engine::render::Quality;
use reel_engine::retrieval::mocks::StaticTemplateStore;
use std::path::Path;
use std::time::Duration;

#[tokio::test]
async fn test_circle_made_red_end_to_end() -> Result<()> {
    let h = Harness::new().await;
    let red = CIRCLE_TEMPLATE.replace("Circle(color=BLUE)", "Circle(color=RED)");
    h.mock.add_response(format!(
        "Sure! Here is the updated scene:\n\n```python\n{}\n```\n\nThe circle is now red.",
        red.trim_end()
    ));
    h.mock
        .add_response("Step 1: draw a circle.\nStep 2: colour it red.");

    let engine = h.engine("render", RENDERING_ENGINE, Duration::from_secs(30));
    let pipeline = h.pipeline(circle_store(), engine);

    // draw a circle -> make it red
    let processed = pipeline.process("make the circle red").await;
    assert!(processed.success, "{:?}", processed.error);
    assert_eq!(processed.template.as_ref().unwrap().filename, "circle.py");
    let code = processed.code.clone().unwrap();
    assert_eq!(changed_lines(CIRCLE_TEMPLATE, &code), vec![6]);
    assert!(!code.contains("now red"));

    let extracted = extract(&code);
    assert_eq!(extracted.validate()?, "CircleDemo");

    let outcome = pipeline
        .visualize(&code, Quality::Low, Some("make the circle red"))
        .await;
    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.scene_name.as_deref(), Some("CircleDemo"));
    assert!(outcome.explanation.unwrap().starts_with("Step 1"));

    let video = Path::new(outcome.video_path.as_deref().unwrap());
    assert!(video.is_file());
    assert!(video.starts_with(h.store.root()));
    assert_eq!(video.extension().unwrap(), "mp4");
    let name = video.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("CircleDemo_"));

    let url = outcome.video_url.unwrap();
    assert!(url.starts_with("/video/"));
    assert!(url.contains("/480p15/"));
    assert!(url.ends_with(&name));
    let served = h.store.resolve(url.trim_start_matches("/video/"))?;
    assert_eq!(served, video.canonicalize()?);

    // The job is over, so its partial segments are gone and so is the scratch source.
    assert!(!has_partials(&h.store.videos_dir()));
    assert!(files_under(&h.store.scratch_dir()).is_empty());
    assert!(h.store.in_flight().is_empty());

    let kinds: Vec<String> = h
        .ledger()
        .iter()
        .map(|e| e["event_type"].as_str().unwrap_or_default().to_string())
        .collect();
    for expected in [
        "request_received",
        "template_retrieved",
        "mutation_applied",
        "code_extracted",
        "render_started",
        "render_succeeded",
        "partials_purged",
    ] {
        assert!(kinds.iter().any(|k| k == expected), "missing {expected} in {kinds:?}");
    }
    Ok(())
}

#[tokio::test]
async fn test_missing_scene_spawns_no_process() -> Result<()> {
    let h = Harness::new().await;
    let marker = h.dir.path().join("engine-ran");
    let engine = h.engine(
        "marker",
        &format!("touch '{}'\n", marker.display()),
        Duration::from_secs(30),
    );
    let pipeline = h.pipeline(StaticTemplateStore::new(), engine);

    let outcome = pipeline
        .visualize("print('hello world')\n", Quality::Low, None)
        .await;
    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("no scene class found"));
    assert!(!marker.exists());
    assert_eq!(h.mock.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn test_render_timeout_kills_engine_and_cleans_scratch() -> Result<()> {
    let h = Harness::new().await;
    let engine = h.engine("hang", HANGING_ENGINE, Duration::from_secs(1));
    let pipeline = h.pipeline(StaticTemplateStore::new(), engine);

    let started = std::time::Instant::now();
    let outcome = pipeline
        .visualize(CIRCLE_TEMPLATE, Quality::Low, None)
        .await;
    assert!(started.elapsed() < Duration::from_secs(20));
    assert!(!outcome.success);
    let error = outcome.error.unwrap();
    assert!(error.contains("timeout"), "{error}");
    assert!(files_under(&h.store.scratch_dir()).is_empty());
    assert!(h.store.in_flight().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_engine_failure_surfaces_stderr() -> Result<()> {
    let h = Harness::new().await;
    let renderer = h.renderer(h.engine("fail", FAILING_ENGINE, Duration::from_secs(30)));

    let result = renderer.render(CIRCLE_TEMPLATE, Quality::Medium).await;
    assert!(!result.success);
    assert!(result.artifact_path.is_none());
    assert!(result.error.unwrap().contains("NameError"));

    match renderer.try_render(CIRCLE_TEMPLATE, Quality::Low).await {
        Err(ReelError::RenderFailed { exit_code, .. }) => assert_eq!(exit_code, Some(1)),
        other => panic!("unexpected {:?}", other.map(|o| o.artifact)),
    }
    assert!(files_under(&h.store.scratch_dir()).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_clean_exit_without_video_is_artifact_not_found() -> Result<()> {
    let h = Harness::new().await;
    let renderer = h.renderer(h.engine("silent", SILENT_ENGINE, Duration::from_secs(30)));

    let err = renderer
        .try_render(CIRCLE_TEMPLATE, Quality::Low)
        .await
        .unwrap_err();
    assert!(matches!(err, ReelError::ArtifactNotFound { .. }));
    Ok(())
}

#[tokio::test]
async fn test_mutation_failure_returns_template() -> Result<()> {
    let h = Harness::new().await;
    h.mock.add_failure("connection refused");
    let engine = h.engine("render", RENDERING_ENGINE, Duration::from_secs(30));
    let pipeline = h.pipeline(circle_store(), engine);

    let outcome = pipeline.process("draw a circle").await;
    assert!(outcome.success);
    assert_eq!(outcome.code.as_deref(), Some(CIRCLE_TEMPLATE));
    assert!(
        h.ledger()
            .iter()
            .any(|e| e["event_type"] == "mutation_fallback")
    );
    Ok(())
}

#[tokio::test]
async fn test_empty_retrieval_is_a_failed_outcome() -> Result<()> {
    let h = Harness::new().await;
    let engine = h.engine("render", RENDERING_ENGINE, Duration::from_secs(30));
    let pipeline = h.pipeline(circle_store(), engine);

    let outcome = pipeline.process("plot sine wave").await;
    assert!(!outcome.success);
    assert_eq!(outcome.error.as_deref(), Some("no template found"));
    assert!(outcome.code.is_none());
    assert_eq!(h.mock.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn test_explanation_failure_keeps_video() -> Result<()> {
    let h = Harness::new().await;
    h.mock.add_failure("model not loaded");
    let engine = h.engine("render", RENDERING_ENGINE, Duration::from_secs(30));
    let pipeline = h.pipeline(StaticTemplateStore::new(), engine);

    let outcome = pipeline
        .visualize(CIRCLE_TEMPLATE, Quality::High, Some("draw a circle"))
        .await;
    assert!(outcome.success);
    assert!(outcome.video_url.unwrap().contains("/1080p60/"));
    let explanation = outcome.explanation.unwrap();
    assert!(explanation.starts_with("Unable to generate explanation."));
    assert!(explanation.contains("model not loaded"));
    Ok(())
}

#[tokio::test]
async fn test_run_combines_both_steps() -> Result<()> {
    let h = Harness::new().await;
    h.mock.add_response(CIRCLE_TEMPLATE);
    h.mock.add_response("An explanation.");
    let engine = h.engine("render", RENDERING_ENGINE, Duration::from_secs(30));
    let pipeline = h.pipeline(circle_store(), engine);

    let (processed, visualized) = pipeline
        .process_and_visualize("draw a circle", Quality::Low)
        .await;
    assert!(processed.success);
    let visualized = visualized.expect("render should follow a successful process");
    assert!(visualized.success, "{:?}", visualized.error);
    assert_eq!(visualized.explanation.as_deref(), Some("An explanation."));
    Ok(())
}
