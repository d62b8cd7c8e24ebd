//! Default configuration constants for segscribe.
//!
//! This module provides shared constants used across different configuration
//! types to ensure consistency and eliminate duplication.

/// Default audio sample rate in Hz.
///
/// 16kHz is the standard for speech recognition and provides a good balance
/// between quality and computational efficiency for voice applications.
pub const SAMPLE_RATE: u32 = 16_000;

/// Bytes per sample for 16-bit PCM audio.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Default segment duration in seconds.
///
/// Three minutes keeps each backend request well under typical server
/// request limits while amortizing per-request overhead on long recordings.
pub const SEGMENT_SECONDS: u32 = 180;

/// Default overlap between consecutive segments in seconds.
///
/// Ten seconds of shared audio gives the merger enough repeated speech to
/// find the textual overlap even when the backend re-punctuates it.
pub const OVERLAP_SECONDS: u32 = 10;

/// Default maximum transcription attempts per segment.
pub const MAX_ATTEMPTS: u32 = 3;

/// Default maximum number of concurrent backend calls.
pub const MAX_CONCURRENCY: usize = 2;

/// Base delay for exponential retry backoff, in milliseconds.
///
/// Attempt N waits `base * 2^(N-1)`: 1s, 2s, 4s with the default base.
pub const BACKOFF_BASE_MS: u64 = 1_000;

/// Safety-net timeout for one backend call, in seconds.
///
/// Outlives the backend's own timeout so a hung request is still classified
/// as a failure instead of stalling its worker forever.
pub const BACKEND_TIMEOUT_SECS: u64 = 140;

/// Default transcription endpoint (a locally running whisper-server).
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8080/inference";

/// Default transcription model name sent to the backend.
pub const DEFAULT_MODEL: &str = "base";

/// Default language code for transcription.
///
/// "auto" lets the backend detect the spoken language automatically.
/// Set to a specific code (e.g., "en", "de") to force a language.
pub const DEFAULT_LANGUAGE: &str = "auto";

/// Maximum overlap search window for the merger, in characters.
///
/// Bounds every matching tier; overlapping text longer than this is never
/// produced by the default segment/overlap timing.
pub const MERGE_MAX_WINDOW: usize = 260;

/// Minimum plausible overlap length for an exact match, in characters.
///
/// Shorter common substrings are too likely to be coincidence ("the ",
/// "and so") and are left alone.
pub const MERGE_MIN_OVERLAP: usize = 20;

/// Minimum normalized-character core for the normalized and tolerant tiers.
pub const MERGE_MIN_NORMALIZED: usize = 14;

/// Character mismatches tolerated by the lock-step matching tier.
pub const MERGE_MISMATCH_BUDGET: usize = 2;

/// Positional similarity required by the fuzzy fallback tier.
pub const MERGE_FUZZY_SIMILARITY: f64 = 0.92;

/// Maximum window the fuzzy fallback tier will trim, in characters.
///
/// Caps how much text a coincidental similarity can remove.
pub const MERGE_FUZZY_MAX_WINDOW: usize = 80;
