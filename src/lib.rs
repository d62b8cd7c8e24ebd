//! segscribe - segmented, crash-recoverable speech transcription.
//!
//! Long recordings are cut into overlapping bounded segments, each segment
//! is transcribed against a remote backend under a concurrency cap with
//! retry and backoff, and the per-segment transcripts are stitched back
//! into one text by matching the repeated overlap audio. Every job-status
//! transition is persisted to a recovery manifest first, so an interrupted
//! run resumes where it left off instead of starting over.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod backend;
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod manifest;
pub mod merge;
pub mod pipeline;
pub mod scheduler;
pub mod segmenter;
pub mod store;

// Core seams (audio in → backend → durable store)
pub use audio::{AudioSource, MemorySource, WavFileSource};
pub use backend::{HttpBackend, MockBackend, TranscriptionBackend};
pub use store::{FileManifestStore, ManifestStore, MemoryManifestStore, load_for_recovery};

// Pipeline entry points and their event stream
pub use pipeline::{BatchPipeline, LivePipeline};
pub use scheduler::{PipelineEvent, SchedulerConfig};

// Error handling
pub use error::{Result, SegscribeError};

// Config
pub use config::{BackendConfig, Config};

// Building blocks
pub use manifest::{FinalizeReport, JobStatus, ProgressSnapshot, RecoveryManifest, SegmentJob};
pub use merge::{MergeConfig, OverlapMerger, clean_transcript};
pub use segmenter::{AudioSegment, Segmenter, SegmenterConfig};
