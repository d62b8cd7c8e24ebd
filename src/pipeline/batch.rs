//! Batch pipeline: the whole input is known before scheduling starts.

use crate::audio::AudioSource;
use crate::audio::wav::{encode_wav, pcm_duration_secs};
use crate::backend::TranscriptionBackend;
use crate::config::Config;
use crate::error::{Result, SegscribeError};
use crate::manifest::RecoveryManifest;
use crate::merge::OverlapMerger;
use crate::scheduler::{Command, PipelineEvent, Scheduler};
use crate::segmenter::Segmenter;
use crate::store::{ManifestStore, load_for_recovery};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

/// A running batch transcription pipeline.
///
/// All segments are planned, stored, and enqueued before the scheduler is
/// spawned, with the stream already marked as ended; the run finishes by
/// itself once every job reaches a terminal state.
pub struct BatchPipeline {
    pipeline_id: String,
    cmd_tx: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl BatchPipeline {
    /// Starts a run over a finite audio source.
    ///
    /// Fails fast — before any manifest exists — when the source is empty
    /// or unreadable.
    pub async fn start(
        config: &Config,
        store: Arc<dyn ManifestStore>,
        backend: Arc<dyn TranscriptionBackend>,
        source: &mut dyn AudioSource,
        pipeline_id: impl Into<String>,
        parent_session_id: Option<String>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PipelineEvent>)> {
        config.validate()?;
        let pipeline_id = pipeline_id.into();

        let pcm = source.read_all()?;
        if pcm.is_empty() {
            return Err(SegscribeError::EmptyAudio);
        }
        let segments = Segmenter::plan(config.segmenting, &pcm)?;

        let mut manifest = RecoveryManifest::new(
            pipeline_id.clone(),
            parent_session_id,
            config.segmenting.segment_seconds,
            config.segmenting.overlap_seconds,
        );
        // The input cannot grow, so the job list is complete from the start.
        manifest.recording_stopped = true;
        for segment in &segments {
            let wav = encode_wav(&segment.pcm, config.segmenting.sample_rate)?;
            let location = store
                .write_segment_audio(&pipeline_id, segment.index, &wav)
                .await?;
            manifest.enqueue(location);
        }
        store.save(&manifest).await?;
        info!(
            pipeline_id = %pipeline_id,
            segments = segments.len(),
            duration_secs = pcm_duration_secs(pcm.len(), config.segmenting.sample_rate),
            "batch pipeline started"
        );

        let handle = Scheduler::spawn(
            manifest,
            store,
            backend,
            OverlapMerger::new(config.merge),
            config.scheduler,
            config.backend.language.clone(),
            config.backend.model.clone(),
            false,
        );
        Ok((
            Self {
                pipeline_id,
                cmd_tx: handle.cmd_tx,
                task: handle.task,
            },
            handle.events,
        ))
    }

    /// Resumes a previously persisted run from its manifest.
    ///
    /// Stale `processing` jobs are demoted to `pending` before scheduling,
    /// succeeded segments keep their text, and the merge checkpoint is
    /// recomputed from the surviving transcripts. Resuming a run that needs
    /// nothing redone just replays the finish; pass `retry_failed` to also
    /// reset permanently failed segments for a fresh round of attempts.
    pub async fn resume(
        config: &Config,
        store: Arc<dyn ManifestStore>,
        backend: Arc<dyn TranscriptionBackend>,
        pipeline_id: &str,
        retry_failed: bool,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PipelineEvent>)> {
        config.validate()?;
        let mut manifest = load_for_recovery(store.as_ref(), pipeline_id).await?;

        let mut dirty = false;
        if retry_failed {
            for job in &mut manifest.jobs {
                if job.status == crate::manifest::JobStatus::Failed {
                    job.status = crate::manifest::JobStatus::Pending;
                    job.attempts = 0;
                    job.next_retry_at = None;
                    job.last_error = None;
                    dirty = true;
                }
            }
        }

        // Audio capture cannot continue across a restart; whatever was
        // segmented before the crash is the whole input now.
        let merger = OverlapMerger::new(config.merge);
        let checkpoint = merger.merge_all(&manifest.mergeable_texts());
        if dirty || !manifest.recording_stopped || checkpoint != manifest.merged_text_checkpoint {
            manifest.recording_stopped = true;
            manifest.merged_text_checkpoint = checkpoint;
            manifest.touch();
            store.save(&manifest).await?;
        }
        info!(
            pipeline_id,
            unresolved = manifest.jobs.iter().filter(|j| j.is_unresolved()).count(),
            "resuming pipeline"
        );

        let handle = Scheduler::spawn(
            manifest,
            store,
            backend,
            merger,
            config.scheduler,
            config.backend.language.clone(),
            config.backend.model.clone(),
            true,
        );
        Ok((
            Self {
                pipeline_id: pipeline_id.to_string(),
                cmd_tx: handle.cmd_tx,
                task: handle.task,
            },
            handle.events,
        ))
    }

    pub fn pipeline_id(&self) -> &str {
        &self.pipeline_id
    }

    /// Resets a permanently failed segment and schedules it again.
    pub fn retry_segment(&self, index: usize) {
        self.cmd_tx.send(Command::RetrySegment(index)).ok();
    }

    /// Abandons the run, leaving the persisted manifest resumable.
    pub fn cancel(&self) {
        self.cmd_tx.send(Command::Cancel).ok();
    }

    /// Waits for the scheduler task to exit.
    pub async fn wait(self) {
        self.task.await.ok();
    }
}
