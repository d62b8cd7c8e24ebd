//! End-to-end pipeline tests: retry, recovery, and concurrency behavior
//! against the in-memory store and a scripted mock backend.

use segscribe::audio::wav::encode_wav;
use segscribe::backend::{MockBackend, MockReply};
use segscribe::manifest::JobStatus;
use segscribe::pipeline::BatchPipeline;
use segscribe::scheduler::{PipelineEvent, SchedulerConfig};
use segscribe::segmenter::{Segmenter, SegmenterConfig};
use segscribe::store::{ManifestStore, MemoryManifestStore};
use segscribe::{Config, FinalizeReport, MemorySource, SegscribeError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

// 2000-byte segments stepping 1500, and near-instant retry backoff so the
// whole retry ladder runs in milliseconds.
fn test_config() -> Config {
    Config {
        segmenting: SegmenterConfig {
            segment_seconds: 4,
            overlap_seconds: 1,
            sample_rate: 250,
        },
        scheduler: SchedulerConfig {
            max_attempts: 3,
            max_concurrency: 2,
            backoff_base_ms: 10,
            backend_timeout_secs: 1,
        },
        ..Config::default()
    }
}

/// Non-repeating PCM so every segment's WAV bytes are distinct, which is
/// what the mock backend keys its scripts on.
fn pcm(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// WAV bytes the backend will receive for segment `index` of this audio.
fn segment_wav(config: &Config, audio: &[u8], index: usize) -> Vec<u8> {
    let segments = Segmenter::plan(config.segmenting, audio).unwrap();
    encode_wav(&segments[index].pcm, config.segmenting.sample_rate).unwrap()
}

async fn drain_to_report(
    events: &mut mpsc::UnboundedReceiver<PipelineEvent>,
) -> FinalizeReport {
    loop {
        match events.recv().await.expect("event stream ended early") {
            PipelineEvent::Finished(report) => return report,
            PipelineEvent::Progress(_) => {}
            PipelineEvent::Fatal(e) => panic!("unexpected fatal: {e}"),
        }
    }
}

#[tokio::test]
async fn transient_failures_are_retried_until_success() {
    let config = test_config();
    let store = Arc::new(MemoryManifestStore::new());
    let audio = pcm(2000); // exactly one segment

    let backend = Arc::new(MockBackend::new("unused default").with_script(
        segment_wav(&config, &audio, 0),
        vec![
            MockReply::Error("connection reset".to_string()),
            MockReply::Error("connection reset".to_string()),
            MockReply::Text("made it on the third attempt".to_string()),
        ],
    ));

    let mut source = MemorySource::new(audio);
    let (_pipeline, mut events) = BatchPipeline::start(
        &config,
        store.clone(),
        backend,
        &mut source,
        "retry-run",
        None,
    )
    .await
    .unwrap();

    let report = drain_to_report(&mut events).await;
    assert_eq!(report.merged_text, "made it on the third attempt");
    assert!(report.failed_segments.is_empty());

    // Clean success removes the manifest and segment audio.
    assert!(matches!(
        store.load("retry-run").await,
        Err(SegscribeError::ManifestNotFound { .. })
    ));
    assert!(store.read_segment_audio("retry-run", 0).await.is_err());
}

#[tokio::test]
async fn exhausted_attempts_finish_with_warnings() {
    let config = test_config();
    let store = Arc::new(MemoryManifestStore::new());
    let audio = pcm(3500); // two segments

    let backend = Arc::new(MockBackend::new("good segment").with_script(
        segment_wav(&config, &audio, 1),
        vec![
            MockReply::Error("boom".to_string()),
            MockReply::Error("boom".to_string()),
            MockReply::Error("boom".to_string()),
        ],
    ));

    let mut source = MemorySource::new(audio);
    let (_pipeline, mut events) = BatchPipeline::start(
        &config,
        store.clone(),
        backend,
        &mut source,
        "failed-run",
        None,
    )
    .await
    .unwrap();

    let report = drain_to_report(&mut events).await;
    assert_eq!(report.total_segments, 2);
    assert_eq!(report.failed_segments, vec![1]);
    // The surviving transcript still comes through.
    assert_eq!(report.merged_text, "good segment");

    // The manifest stays around so the failure can be retried later.
    let manifest = store.load("failed-run").await.unwrap();
    assert_eq!(manifest.jobs[1].status, JobStatus::Failed);
    assert_eq!(manifest.jobs[1].attempts, 3);
    assert!(
        manifest.jobs[1]
            .last_error
            .as_deref()
            .unwrap()
            .contains("boom")
    );
}

#[tokio::test]
async fn concurrency_never_exceeds_the_cap() {
    let config = test_config();
    let store = Arc::new(MemoryManifestStore::new());
    // Six segments, each call slow enough that claims pile up if the cap
    // is not enforced.
    let audio = pcm(9500);

    let backend =
        Arc::new(MockBackend::new("steady").with_call_delay(Duration::from_millis(40)));

    let mut source = MemorySource::new(audio);
    let (_pipeline, mut events) = BatchPipeline::start(
        &config,
        store,
        backend.clone(),
        &mut source,
        "capped-run",
        None,
    )
    .await
    .unwrap();

    let report = drain_to_report(&mut events).await;
    assert_eq!(report.total_segments, 6);
    assert!(report.failed_segments.is_empty());
    assert!(
        backend.max_concurrent_calls() <= 2,
        "observed {} concurrent calls",
        backend.max_concurrent_calls()
    );
}

#[tokio::test]
async fn cancelled_run_resumes_from_its_manifest() {
    let config = test_config();
    let store = Arc::new(MemoryManifestStore::new());
    let audio = pcm(3500); // two segments

    // Every call hangs, so cancellation finds jobs mid-flight.
    let hanging = Arc::new(
        MockBackend::new("never delivered").with_call_delay(Duration::from_secs(3600)),
    );

    let mut source = MemorySource::new(audio);
    let (pipeline, mut events) = BatchPipeline::start(
        &config,
        store.clone(),
        hanging,
        &mut source,
        "interrupted-run",
        None,
    )
    .await
    .unwrap();

    // Let the scheduler claim work, then pull the plug.
    tokio::time::sleep(Duration::from_millis(50)).await;
    pipeline.cancel();
    pipeline.wait().await;

    // Cancel is not terminal: the stream closes without a final report.
    while let Some(event) = events.recv().await {
        assert!(matches!(event, PipelineEvent::Progress(_)));
    }

    // The persisted ledger still shows the claims.
    let manifest = store.load("interrupted-run").await.unwrap();
    assert!(
        manifest
            .jobs
            .iter()
            .any(|j| j.status == JobStatus::Processing)
    );
    assert_eq!(store.list_recoverable().await.unwrap(), vec![
        "interrupted-run"
    ]);

    // Resume against a working backend; stale claims rerun transparently.
    let working = Arc::new(MockBackend::new("recovered text"));
    let (_pipeline, mut events) =
        BatchPipeline::resume(&config, store.clone(), working, "interrupted-run", false)
            .await
            .unwrap();

    let report = drain_to_report(&mut events).await;
    assert!(report.recovering);
    assert_eq!(report.total_segments, 2);
    assert!(report.failed_segments.is_empty());
    assert!(report.merged_text.contains("recovered text"));
    assert!(store.load("interrupted-run").await.is_err());
}

#[tokio::test]
async fn resume_of_a_complete_run_replays_the_finish() {
    let config = test_config();
    let store = Arc::new(MemoryManifestStore::new());

    // A run that crashed after all work was done but before cleanup.
    let mut manifest = segscribe::RecoveryManifest::new("done-run", None, 4, 1);
    manifest.recording_stopped = true;
    let i = manifest.enqueue("segment_00000.wav".to_string());
    manifest.jobs[i].status = JobStatus::Succeeded;
    manifest.jobs[i].attempts = 1;
    manifest.jobs[i].text = Some("all finished earlier".to_string());
    store.save(&manifest).await.unwrap();

    let backend = Arc::new(MockBackend::new("should never be called"));
    let (_pipeline, mut events) =
        BatchPipeline::resume(&config, store.clone(), backend, "done-run", false)
            .await
            .unwrap();

    let report = drain_to_report(&mut events).await;
    assert!(report.recovering);
    assert_eq!(report.merged_text, "all finished earlier");
    assert!(report.failed_segments.is_empty());
    assert!(store.load("done-run").await.is_err());
}

#[tokio::test]
async fn hung_backend_call_times_out_and_retries() {
    let config = test_config();
    let store = Arc::new(MemoryManifestStore::new());
    let audio = pcm(2000);

    let backend = Arc::new(MockBackend::new("unused default").with_script(
        segment_wav(&config, &audio, 0),
        vec![
            MockReply::Hang,
            MockReply::Text("answered after the timeout".to_string()),
        ],
    ));

    let mut source = MemorySource::new(audio);
    let (_pipeline, mut events) = BatchPipeline::start(
        &config,
        store,
        backend,
        &mut source,
        "timeout-run",
        None,
    )
    .await
    .unwrap();

    let report = drain_to_report(&mut events).await;
    assert_eq!(report.merged_text, "answered after the timeout");
    assert!(report.failed_segments.is_empty());
}

#[tokio::test]
async fn missing_segment_audio_aborts_instead_of_retrying() {
    let config = test_config();
    let store = Arc::new(MemoryManifestStore::new());

    // A manifest whose job points at audio that was never stored: reading
    // it is an I/O failure no retry can repair.
    let mut manifest = segscribe::RecoveryManifest::new("orphaned-run", None, 4, 1);
    manifest.recording_stopped = true;
    manifest.enqueue("segment_00000.wav".to_string());
    store.save(&manifest).await.unwrap();

    let backend = Arc::new(MockBackend::new("should never be called"));
    let (_pipeline, mut events) =
        BatchPipeline::resume(&config, store.clone(), backend, "orphaned-run", false)
            .await
            .unwrap();

    loop {
        match events.recv().await.expect("event stream ended early") {
            PipelineEvent::Fatal(SegscribeError::Io(_)) => break,
            PipelineEvent::Progress(_) => {}
            other => panic!("expected an I/O fatal, got {other:?}"),
        }
    }

    // One claim, no retry ladder: the aborted run keeps its ledger.
    let manifest = store.load("orphaned-run").await.unwrap();
    assert_eq!(manifest.jobs[0].attempts, 1);
}

#[tokio::test]
async fn checkpoint_never_shows_later_text_before_earlier_segments_settle() {
    let config = test_config();
    let store = Arc::new(MemoryManifestStore::new());
    let audio = pcm(3500); // two segments

    // Segment 0 fails once and only succeeds on the retry, so segment 1's
    // text reaches the ledger first.
    let backend = Arc::new(
        MockBackend::new("closing half of the talk").with_script(
            segment_wav(&config, &audio, 0),
            vec![
                MockReply::Error("first attempt hiccup".to_string()),
                MockReply::Text("opening half of the talk".to_string()),
            ],
        ),
    );

    let mut source = MemorySource::new(audio);
    let (_pipeline, mut events) = BatchPipeline::start(
        &config,
        store,
        backend,
        &mut source,
        "ordered-run",
        None,
    )
    .await
    .unwrap();

    let report = loop {
        match events.recv().await.expect("event stream ended early") {
            PipelineEvent::Finished(report) => break report,
            PipelineEvent::Progress(snapshot) => {
                // The closing text may only surface once the opening text
                // stands in front of it.
                if snapshot.merged_text_so_far.contains("closing half") {
                    assert!(snapshot.merged_text_so_far.starts_with("opening half"));
                }
            }
            PipelineEvent::Fatal(e) => panic!("unexpected fatal: {e}"),
        }
    };
    assert!(report.merged_text.starts_with("opening half of the talk"));
    assert!(report.merged_text.contains("closing half of the talk"));
}

#[tokio::test]
async fn empty_transcripts_count_as_failed_attempts() {
    let config = test_config();
    let store = Arc::new(MemoryManifestStore::new());
    let audio = pcm(2000);

    // Noise markers clean down to nothing and must be retried, not merged.
    let backend = Arc::new(MockBackend::new("unused default").with_script(
        segment_wav(&config, &audio, 0),
        vec![
            MockReply::Empty,
            MockReply::Text("[BLANK_AUDIO]".to_string()),
            MockReply::Text("actual speech at last".to_string()),
        ],
    ));

    let mut source = MemorySource::new(audio);
    let (_pipeline, mut events) = BatchPipeline::start(
        &config,
        store,
        backend,
        &mut source,
        "empty-run",
        None,
    )
    .await
    .unwrap();

    let report = drain_to_report(&mut events).await;
    assert_eq!(report.merged_text, "actual speech at last");
    assert!(report.failed_segments.is_empty());
}
