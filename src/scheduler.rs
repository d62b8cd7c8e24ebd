//! Scheduler: the single-owner event loop for one pipeline run.
//!
//! All ledger mutation and scheduling decisions are serialized through one
//! task fed by a command channel; backend calls run concurrently as spawned
//! workers up to the configured cap, and marshal their results back onto
//! the queue. That keeps the manifest free of locks while still bounding
//! outbound network concurrency.

use crate::backend::TranscriptionBackend;
use crate::defaults;
use crate::error::{Result, SegscribeError};
use crate::manifest::{FinalizeReport, JobStatus, ProgressSnapshot, RecoveryManifest};
use crate::merge::{OverlapMerger, clean_transcript};
use crate::store::ManifestStore;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Retry and concurrency policy for the worker pool.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum transcription attempts per segment (default: 3).
    pub max_attempts: u32,
    /// Maximum simultaneous backend calls (default: 2).
    pub max_concurrency: usize,
    /// Base delay for exponential backoff in milliseconds (default: 1000).
    pub backoff_base_ms: u64,
    /// Safety-net timeout per backend call in seconds (default: 140).
    pub backend_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::MAX_ATTEMPTS,
            max_concurrency: defaults::MAX_CONCURRENCY,
            backoff_base_ms: defaults::BACKOFF_BASE_MS,
            backend_timeout_secs: defaults::BACKEND_TIMEOUT_SECS,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(SegscribeError::ConfigInvalidValue {
                key: "max_attempts".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.max_concurrency == 0 {
            return Err(SegscribeError::ConfigInvalidValue {
                key: "max_concurrency".to_string(),
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Delay before retrying after the given (1-based) failed attempt:
    /// `base * 2^(attempt-1)` — 1s, 2s, 4s with the default base.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        Duration::from_millis(self.backoff_base_ms.saturating_mul(1 << exponent))
    }
}

/// Events a pipeline run emits to its caller.
///
/// Progress fires on every ledger-affecting change; exactly one terminal
/// event (`Finished` or `Fatal`) follows, after which the stream closes.
/// A cancelled run closes the stream without a terminal event.
#[derive(Debug)]
pub enum PipelineEvent {
    Progress(ProgressSnapshot),
    Finished(FinalizeReport),
    Fatal(SegscribeError),
}

/// Commands serialized onto the scheduler's queue.
#[derive(Debug)]
pub(crate) enum Command {
    /// A new segment's audio has been stored; add its job to the ledger.
    Enqueue { index: usize, audio_location: String },
    /// The audio stream has ended; finishing is now possible.
    RecordingStopped,
    /// Externally requested re-run of a permanently failed job.
    RetrySegment(usize),
    /// A retry backoff timer elapsed.
    RetryDue(usize),
    /// A worker finished its backend call.
    JobFinished { index: usize, outcome: Result<String> },
    /// Stop working now. Not terminal: the persisted ledger stays
    /// recoverable.
    Cancel,
}

pub(crate) struct Scheduler {
    manifest: RecoveryManifest,
    store: Arc<dyn ManifestStore>,
    backend: Arc<dyn TranscriptionBackend>,
    merger: OverlapMerger,
    config: SchedulerConfig,
    language: String,
    model: String,
    recovering: bool,
    cmd_tx: mpsc::UnboundedSender<Command>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    event_tx: mpsc::UnboundedSender<PipelineEvent>,
    /// Workers with a backend call in flight, keyed by segment index.
    in_flight: HashMap<usize, JoinHandle<()>>,
}

pub(crate) struct SchedulerHandle {
    pub cmd_tx: mpsc::UnboundedSender<Command>,
    pub events: mpsc::UnboundedReceiver<PipelineEvent>,
    pub task: JoinHandle<()>,
}

impl Scheduler {
    /// Spawns the event loop for a run whose manifest is already persisted.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn spawn(
        manifest: RecoveryManifest,
        store: Arc<dyn ManifestStore>,
        backend: Arc<dyn TranscriptionBackend>,
        merger: OverlapMerger,
        config: SchedulerConfig,
        language: String,
        model: String,
        recovering: bool,
    ) -> SchedulerHandle {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, events) = mpsc::unbounded_channel();
        let scheduler = Self {
            manifest,
            store,
            backend,
            merger,
            config,
            language,
            model,
            recovering,
            cmd_tx: cmd_tx.clone(),
            cmd_rx,
            event_tx,
            in_flight: HashMap::new(),
        };
        let task = tokio::spawn(scheduler.run());
        SchedulerHandle {
            cmd_tx,
            events,
            task,
        }
    }

    async fn run(mut self) {
        if self.recovering {
            self.emit_progress("recovering");
        }
        // Jobs that were waiting out a backoff when a previous process died
        // have a persisted next_retry_at but no live timer; re-arm them.
        self.arm_persisted_timers();

        if let Err(e) = self.pump().await {
            return self.fatal(e);
        }
        match self.try_finish().await {
            Ok(true) => return,
            Ok(false) => {}
            Err(e) => return self.fatal(e),
        }

        while let Some(command) = self.cmd_rx.recv().await {
            match self.handle(command).await {
                Ok(false) => {}
                Ok(true) => return,
                Err(e) => return self.fatal(e),
            }
            match self.try_finish().await {
                Ok(true) => return,
                Ok(false) => {}
                Err(e) => return self.fatal(e),
            }
        }
    }

    /// Applies one command. Returns true when the loop should stop.
    async fn handle(&mut self, command: Command) -> Result<bool> {
        match command {
            Command::Enqueue {
                index,
                audio_location,
            } => {
                let assigned = self.manifest.enqueue(audio_location);
                debug_assert_eq!(assigned, index, "segment index out of step with ledger");
                self.store.save(&self.manifest).await?;
                debug!(index, "segment enqueued");
                self.emit_progress("segmenting");
                self.pump().await?;
            }
            Command::RecordingStopped => {
                self.manifest.recording_stopped = true;
                self.manifest.touch();
                self.store.save(&self.manifest).await?;
                debug!("recording stopped, draining remaining jobs");
                self.emit_progress("transcribing");
            }
            Command::RetrySegment(index) => {
                if let Some(job) = self.manifest.job_mut(index)
                    && job.status == JobStatus::Failed
                {
                    job.status = JobStatus::Pending;
                    job.attempts = 0;
                    job.next_retry_at = None;
                    job.last_error = None;
                    self.manifest.touch();
                    self.store.save(&self.manifest).await?;
                    info!(index, "failed segment reset for retry");
                    self.emit_progress("transcribing");
                    self.pump().await?;
                }
            }
            Command::RetryDue(index) => {
                debug!(index, "retry backoff elapsed");
                self.pump().await?;
            }
            Command::JobFinished { index, outcome } => {
                self.in_flight.remove(&index);
                self.settle(index, outcome).await?;
                self.pump().await?;
            }
            Command::Cancel => {
                info!(
                    in_flight = self.in_flight.len(),
                    "cancel requested, aborting in-flight backend calls"
                );
                for (_, handle) in self.in_flight.drain() {
                    handle.abort();
                }
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Records a worker's outcome in the ledger.
    async fn settle(&mut self, index: usize, outcome: Result<String>) -> Result<()> {
        // An empty (or noise-marker-only) transcript is a failure: real
        // speech was sent, so nothing back means the call went wrong.
        let outcome = outcome.and_then(|text| {
            let cleaned = clean_transcript(&text);
            if cleaned.is_empty() {
                Err(SegscribeError::EmptyTranscript)
            } else {
                Ok(cleaned)
            }
        });

        // Only transient backend failures enter the retry loop. A storage
        // or framing error will not get better on a second attempt, so it
        // aborts the run instead.
        let outcome = match outcome {
            Err(e) if !e.is_transient() => return Err(e),
            other => other,
        };

        let max_attempts = self.config.max_attempts;
        let Some(job) = self.manifest.job_mut(index) else {
            warn!(index, "worker finished for unknown job index");
            return Ok(());
        };

        let stage = match outcome {
            Ok(text) => {
                job.status = JobStatus::Succeeded;
                job.text = Some(text);
                job.last_error = None;
                info!(index, attempts = job.attempts, "segment transcribed");
                "merging"
            }
            Err(e) => {
                job.last_error = Some(e.to_string());
                if job.attempts < max_attempts {
                    let attempt = job.attempts;
                    let delay = self.config.backoff_delay(attempt);
                    job.status = JobStatus::Pending;
                    job.next_retry_at = Utc::now()
                        .checked_add_signed(
                            chrono::Duration::from_std(delay)
                                .unwrap_or_else(|_| chrono::Duration::seconds(1)),
                        );
                    warn!(
                        index,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "segment attempt failed, retrying after backoff"
                    );
                    self.arm_timer(index, delay);
                } else {
                    job.status = JobStatus::Failed;
                    job.next_retry_at = None;
                    warn!(
                        index,
                        attempts = job.attempts,
                        error = %e,
                        "segment failed permanently"
                    );
                }
                "transcribing"
            }
        };

        // Either terminal transition can extend the contiguous settled
        // prefix the checkpoint is built from.
        let merged = self.merger.merge_all(&self.manifest.mergeable_texts());
        self.manifest.merged_text_checkpoint = merged;
        self.manifest.touch();
        self.store.save(&self.manifest).await?;
        self.emit_progress(stage);
        Ok(())
    }

    /// Claims runnable jobs in index order until the concurrency cap is
    /// reached, spawning one worker per claim.
    async fn pump(&mut self) -> Result<()> {
        loop {
            if self.in_flight.len() >= self.config.max_concurrency {
                return Ok(());
            }
            let now = Utc::now();
            let Some(index) = self
                .manifest
                .jobs
                .iter()
                .find(|j| j.is_runnable(now) && !self.in_flight.contains_key(&j.index))
                .map(|j| j.index)
            else {
                return Ok(());
            };

            let Some(job) = self.manifest.job_mut(index) else {
                return Ok(());
            };
            job.status = JobStatus::Processing;
            job.attempts += 1;
            job.next_retry_at = None;
            job.last_error = None;
            let attempt = job.attempts;
            self.manifest.touch();
            // The claim is durable before the backend call starts, so a
            // crash here is recovered by the stale-processing demotion rule.
            self.store.save(&self.manifest).await?;
            debug!(index, attempt, "claimed segment job");
            self.emit_progress("transcribing");

            let store = self.store.clone();
            let backend = self.backend.clone();
            let cmd_tx = self.cmd_tx.clone();
            let pipeline_id = self.manifest.pipeline_id.clone();
            let language = self.language.clone();
            let model = self.model.clone();
            let timeout = Duration::from_secs(self.config.backend_timeout_secs);

            let handle = tokio::spawn(async move {
                let outcome =
                    run_job(store, backend, pipeline_id, index, language, model, timeout).await;
                cmd_tx.send(Command::JobFinished { index, outcome }).ok();
            });
            self.in_flight.insert(index, handle);
        }
    }

    /// Emits the terminal report once the drain condition holds: recording
    /// stopped, no job pending or processing, nothing in flight.
    async fn try_finish(&mut self) -> Result<bool> {
        if !self.manifest.recording_stopped
            || self.manifest.has_unresolved()
            || !self.in_flight.is_empty()
        {
            return Ok(false);
        }
        // A stream that produced no segments is a terminal error, not an
        // empty success.
        if self.manifest.jobs.is_empty() {
            return Err(SegscribeError::EmptyAudio);
        }

        let failed = self.manifest.failed_indices();
        let report = FinalizeReport {
            merged_text: self.manifest.merged_text_checkpoint.clone(),
            total_segments: self.manifest.jobs.len(),
            failed_segments: failed.clone(),
            recovering: self.recovering,
        };

        if failed.is_empty() {
            // Full success: the manifest and segment audio have served
            // their purpose.
            self.store.delete(&self.manifest.pipeline_id).await?;
            info!(
                pipeline_id = %self.manifest.pipeline_id,
                segments = report.total_segments,
                "pipeline finished, cleaned up"
            );
        } else {
            // Keep the manifest so the failed segments stay retryable
            // without redoing the whole run.
            warn!(
                pipeline_id = %self.manifest.pipeline_id,
                failed = ?failed,
                "pipeline finished with failed segments, manifest retained"
            );
        }

        self.event_tx.send(PipelineEvent::Finished(report)).ok();
        Ok(true)
    }

    fn arm_timer(&self, index: usize, delay: Duration) {
        let cmd_tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            cmd_tx.send(Command::RetryDue(index)).ok();
        });
    }

    fn arm_persisted_timers(&self) {
        let now = Utc::now();
        for job in &self.manifest.jobs {
            if job.status == JobStatus::Pending
                && let Some(at) = job.next_retry_at
                && at > now
            {
                let delay = (at - now).to_std().unwrap_or(Duration::ZERO);
                self.arm_timer(job.index, delay);
            }
        }
    }

    fn emit_progress(&self, stage: &str) {
        let snapshot = ProgressSnapshot {
            merged_text_so_far: self.manifest.merged_text_checkpoint.clone(),
            progress_fraction: self.manifest.progress_fraction(),
            failed_indices: self.manifest.failed_indices(),
            stage_label: stage.to_string(),
        };
        self.event_tx.send(PipelineEvent::Progress(snapshot)).ok();
    }

    fn fatal(&mut self, error: SegscribeError) {
        warn!(
            pipeline_id = %self.manifest.pipeline_id,
            error = %error,
            "pipeline aborted"
        );
        for (_, handle) in self.in_flight.drain() {
            handle.abort();
        }
        self.event_tx.send(PipelineEvent::Fatal(error)).ok();
    }
}

/// One worker's unit of work: read the segment audio, call the backend
/// under the safety-net timeout.
async fn run_job(
    store: Arc<dyn ManifestStore>,
    backend: Arc<dyn TranscriptionBackend>,
    pipeline_id: String,
    index: usize,
    language: String,
    model: String,
    timeout: Duration,
) -> Result<String> {
    let wav = store.read_segment_audio(&pipeline_id, index).await?;
    match tokio::time::timeout(timeout, backend.transcribe(&wav, &language, &model)).await {
        Ok(result) => result,
        Err(_) => Err(SegscribeError::BackendTimeout {
            seconds: timeout.as_secs(),
        }),
    }
}
