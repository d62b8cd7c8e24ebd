//! Live pipeline: segment-and-dispatch while the recording is still going.

use crate::audio::wav::encode_wav;
use crate::backend::TranscriptionBackend;
use crate::config::Config;
use crate::error::Result;
use crate::manifest::RecoveryManifest;
use crate::merge::OverlapMerger;
use crate::scheduler::{Command, PipelineEvent, Scheduler};
use crate::segmenter::{AudioSegment, Segmenter};
use crate::store::ManifestStore;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

/// A running live transcription pipeline.
///
/// The caller feeds PCM bytes as they are captured; completed segments are
/// stored and dispatched immediately, so transcription overlaps recording.
/// Call [`stop`](Self::stop) when the recording ends — without it the run
/// never finishes, because a tail segment could still arrive.
pub struct LivePipeline {
    pipeline_id: String,
    sample_rate: u32,
    segmenter: Segmenter,
    store: Arc<dyn ManifestStore>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
    stopped: bool,
}

impl LivePipeline {
    /// Starts a new run: persists an empty manifest, spawns the scheduler,
    /// and returns the pipeline together with its event stream.
    pub async fn start(
        config: &Config,
        store: Arc<dyn ManifestStore>,
        backend: Arc<dyn TranscriptionBackend>,
        pipeline_id: impl Into<String>,
        parent_session_id: Option<String>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PipelineEvent>)> {
        config.validate()?;
        let pipeline_id = pipeline_id.into();
        let segmenter = Segmenter::new(config.segmenting)?;

        let manifest = RecoveryManifest::new(
            pipeline_id.clone(),
            parent_session_id,
            config.segmenting.segment_seconds,
            config.segmenting.overlap_seconds,
        );
        // Persist before any work so even an immediate crash leaves a trace.
        store.save(&manifest).await?;
        info!(pipeline_id = %pipeline_id, "live pipeline started");

        let handle = Scheduler::spawn(
            manifest,
            store.clone(),
            backend,
            OverlapMerger::new(config.merge),
            config.scheduler,
            config.backend.language.clone(),
            config.backend.model.clone(),
            false,
        );

        let pipeline = Self {
            pipeline_id,
            sample_rate: config.segmenting.sample_rate,
            segmenter,
            store,
            cmd_tx: handle.cmd_tx,
            task: handle.task,
            stopped: false,
        };
        Ok((pipeline, handle.events))
    }

    pub fn pipeline_id(&self) -> &str {
        &self.pipeline_id
    }

    /// Appends captured PCM bytes, dispatching every segment that becomes
    /// complete.
    pub async fn append_audio(&mut self, pcm: &[u8]) -> Result<()> {
        for segment in self.segmenter.push(pcm) {
            self.submit(segment).await?;
        }
        Ok(())
    }

    /// Ends the audio stream: flushes the tail segment and tells the
    /// scheduler the job list is now complete. Idempotent.
    pub async fn stop(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        if let Some(tail) = self.segmenter.finish() {
            self.submit(tail).await?;
        }
        self.cmd_tx.send(Command::RecordingStopped).ok();
        Ok(())
    }

    /// Resets a permanently failed segment and schedules it again.
    pub fn retry_segment(&self, index: usize) {
        self.cmd_tx.send(Command::RetrySegment(index)).ok();
    }

    /// Abandons the run. In-flight backend calls are aborted; the persisted
    /// manifest is left as-is, so the run stays resumable.
    pub fn cancel(&self) {
        self.cmd_tx.send(Command::Cancel).ok();
    }

    /// Waits for the scheduler task to exit. Events keep arriving on the
    /// receiver while this is pending.
    pub async fn wait(self) {
        self.task.await.ok();
    }

    async fn submit(&self, segment: AudioSegment) -> Result<()> {
        // WAV-frame and store the audio first; the job only enters the
        // ledger once its bytes are durable.
        let wav = encode_wav(&segment.pcm, self.sample_rate)?;
        let location = self
            .store
            .write_segment_audio(&self.pipeline_id, segment.index, &wav)
            .await?;
        self.cmd_tx
            .send(Command::Enqueue {
                index: segment.index,
                audio_location: location,
            })
            .ok();
        Ok(())
    }
}
