//! Durable record of a pipeline run: segments, job status, merged text.
//!
//! One manifest per run, keyed by `pipeline_id`. Persisted after every
//! job-status transition so a crash at any point loses at most one
//! in-flight transcription, never completed work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of one segment's transcription job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed (possibly behind a retry delay).
    Pending,
    /// Claimed by a worker; a backend call is in flight.
    Processing,
    /// Transcribed; `text` holds the result.
    Succeeded,
    /// All attempts exhausted. Resettable only by an explicit retry.
    Failed,
}

/// The ledger's unit of work: one segment and its transcription state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentJob {
    pub index: usize,
    /// Where the WAV-framed segment audio lives, relative to the store.
    pub audio_location: String,
    pub status: JobStatus,
    pub attempts: u32,
    /// Earliest time this job may be claimed again after a failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl SegmentJob {
    pub fn new(index: usize, audio_location: String) -> Self {
        Self {
            index,
            audio_location,
            status: JobStatus::Pending,
            attempts: 0,
            next_retry_at: None,
            text: None,
            last_error: None,
        }
    }

    /// True if the job still needs work (pending or in flight).
    pub fn is_unresolved(&self) -> bool {
        matches!(self.status, JobStatus::Pending | JobStatus::Processing)
    }

    /// True if the job is pending and its retry delay (if any) has elapsed.
    pub fn is_runnable(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.next_retry_at.is_none_or(|at| at <= now)
    }
}

/// Durable aggregate for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryManifest {
    pub pipeline_id: String,
    /// Session the run belongs to, for the caller's bookkeeping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub segment_seconds: u32,
    pub overlap_seconds: u32,
    /// Set once the audio stream has ended; a precondition for finishing.
    pub recording_stopped: bool,
    /// Running merge of the succeeded texts up to the first unresolved
    /// job, in index order. See [`mergeable_texts`](Self::mergeable_texts).
    pub merged_text_checkpoint: String,
    pub jobs: Vec<SegmentJob>,
}

impl RecoveryManifest {
    pub fn new(
        pipeline_id: impl Into<String>,
        parent_session_id: Option<String>,
        segment_seconds: u32,
        overlap_seconds: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            pipeline_id: pipeline_id.into(),
            parent_session_id,
            created_at: now,
            updated_at: now,
            segment_seconds,
            overlap_seconds,
            recording_stopped: false,
            merged_text_checkpoint: String::new(),
            jobs: Vec::new(),
        }
    }

    /// Appends a job for a newly stored segment and returns its index.
    pub fn enqueue(&mut self, audio_location: String) -> usize {
        let index = self.jobs.len();
        self.jobs.push(SegmentJob::new(index, audio_location));
        self.touch();
        index
    }

    pub fn job_mut(&mut self, index: usize) -> Option<&mut SegmentJob> {
        self.jobs.get_mut(index)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// True while any job is pending or processing.
    pub fn has_unresolved(&self) -> bool {
        self.jobs.iter().any(SegmentJob::is_unresolved)
    }

    /// Indices of permanently failed jobs, in order.
    pub fn failed_indices(&self) -> Vec<usize> {
        self.jobs
            .iter()
            .filter(|j| j.status == JobStatus::Failed)
            .map(|j| j.index)
            .collect()
    }

    /// Segment texts safe to merge: succeeded jobs in index order, cut off
    /// at the first job that is still pending or processing. An unresolved
    /// job may yet produce text that belongs before a later success, so
    /// nothing past it enters the checkpoint. Permanently failed jobs are
    /// terminal and are skipped without blocking what follows.
    pub fn mergeable_texts(&self) -> Vec<&str> {
        self.jobs
            .iter()
            .take_while(|j| !j.is_unresolved())
            .filter(|j| j.status == JobStatus::Succeeded)
            .filter_map(|j| j.text.as_deref())
            .collect()
    }

    /// Fraction of jobs in a terminal state. Zero while no job exists.
    pub fn progress_fraction(&self) -> f64 {
        if self.jobs.is_empty() {
            return 0.0;
        }
        let done = self.jobs.iter().filter(|j| !j.is_unresolved()).count();
        done as f64 / self.jobs.len() as f64
    }

    /// Recovery rule: a job left `processing` by a dead process is
    /// indistinguishable from one that needs retry, so demote it to
    /// `pending`, immediately runnable. Returns how many were demoted.
    pub fn demote_stale(&mut self) -> usize {
        let mut demoted = 0;
        for job in &mut self.jobs {
            if job.status == JobStatus::Processing {
                job.status = JobStatus::Pending;
                job.next_retry_at = None;
                demoted += 1;
            }
        }
        if demoted > 0 {
            self.touch();
        }
        demoted
    }
}

/// Read-only progress projection handed to collaborators. Copied out of
/// the manifest, never a shared reference.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub merged_text_so_far: String,
    pub progress_fraction: f64,
    pub failed_indices: Vec<usize>,
    pub stage_label: String,
}

/// Terminal projection of a finished run.
///
/// A run with failed segments is still a success with warnings: the merged
/// text covers whatever succeeded, and the failures stay retryable.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizeReport {
    pub merged_text: String,
    pub total_segments: usize,
    pub failed_segments: Vec<usize>,
    /// True when this run resumed a previously persisted manifest.
    pub recovering: bool,
}
