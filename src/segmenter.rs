//! Segmenter: cuts a PCM byte stream into overlapping bounded windows.
//!
//! Emits a segment every time `segment_bytes` of unconsumed audio have
//! accumulated, then advances the cursor by `segment_bytes - overlap_bytes`
//! so consecutive segments physically share `overlap_bytes` of audio. The
//! shared audio is what lets the merger stitch the per-segment transcripts
//! back together without duplication.

use crate::defaults;
use crate::error::{Result, SegscribeError};
use serde::{Deserialize, Serialize};

/// Configuration for the segmenter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SegmenterConfig {
    /// Duration of one full segment in seconds (default: 180).
    pub segment_seconds: u32,
    /// Overlap between consecutive segments in seconds (default: 10).
    pub overlap_seconds: u32,
    /// Sample rate used to convert seconds to byte counts.
    pub sample_rate: u32,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            segment_seconds: defaults::SEGMENT_SECONDS,
            overlap_seconds: defaults::OVERLAP_SECONDS,
            sample_rate: defaults::SAMPLE_RATE,
        }
    }
}

impl SegmenterConfig {
    /// Validates the segmenting parameters.
    pub fn validate(&self) -> Result<()> {
        if self.segment_seconds == 0 {
            return Err(SegscribeError::ConfigInvalidValue {
                key: "segment_seconds".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.overlap_seconds >= self.segment_seconds {
            return Err(SegscribeError::ConfigInvalidValue {
                key: "overlap_seconds".to_string(),
                message: format!(
                    "must be smaller than segment_seconds ({} >= {})",
                    self.overlap_seconds, self.segment_seconds
                ),
            });
        }
        if self.sample_rate == 0 {
            return Err(SegscribeError::ConfigInvalidValue {
                key: "sample_rate".to_string(),
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Full segment size in bytes.
    pub fn segment_bytes(&self) -> usize {
        self.segment_seconds as usize * self.sample_rate as usize * defaults::BYTES_PER_SAMPLE
    }

    /// Overlap size in bytes.
    pub fn overlap_bytes(&self) -> usize {
        self.overlap_seconds as usize * self.sample_rate as usize * defaults::BYTES_PER_SAMPLE
    }

    /// Cursor advance per emitted segment.
    pub fn step_bytes(&self) -> usize {
        self.segment_bytes() - self.overlap_bytes()
    }
}

/// One bounded chunk of audio, overlapping its neighbors.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSegment {
    /// Ordinal position in the stream, starting at 0.
    pub index: usize,
    /// Raw 16-bit mono PCM bytes.
    pub pcm: Vec<u8>,
}

/// Incremental segmenter for a live, growing byte stream.
pub struct Segmenter {
    config: SegmenterConfig,
    /// Unconsumed bytes; consumed prefixes are dropped after each emission.
    buffer: Vec<u8>,
    next_index: usize,
    finished: bool,
}

impl Segmenter {
    /// Creates a segmenter, rejecting invalid parameters up front.
    pub fn new(config: SegmenterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            buffer: Vec::new(),
            next_index: 0,
            finished: false,
        })
    }

    /// Number of segments emitted so far.
    pub fn emitted(&self) -> usize {
        self.next_index
    }

    /// Bytes accumulated but not yet emitted as a new segment.
    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Appends stream bytes and returns every full segment now available.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<AudioSegment> {
        debug_assert!(!self.finished, "push after finish");
        self.buffer.extend_from_slice(bytes);

        let segment_bytes = self.config.segment_bytes();
        let step_bytes = self.config.step_bytes();

        let mut segments = Vec::new();
        while self.buffer.len() >= segment_bytes {
            segments.push(AudioSegment {
                index: self.next_index,
                pcm: self.buffer[..segment_bytes].to_vec(),
            });
            self.next_index += 1;
            // Keep the overlap region; drop only the stepped-over prefix.
            self.buffer.drain(..step_bytes);
        }
        segments
    }

    /// Ends the stream, returning the final tail segment if one is due.
    ///
    /// The tail is emitted when the leftover bytes exceed the overlap
    /// length (shorter leftovers are already fully covered by the previous
    /// segment), or when nothing has been emitted yet — a non-empty stream
    /// always yields at least one segment.
    pub fn finish(&mut self) -> Option<AudioSegment> {
        self.finished = true;
        let leftover = std::mem::take(&mut self.buffer);
        if leftover.is_empty() {
            return None;
        }
        if self.next_index > 0 && leftover.len() <= self.config.overlap_bytes() {
            return None;
        }
        let segment = AudioSegment {
            index: self.next_index,
            pcm: leftover,
        };
        self.next_index += 1;
        Some(segment)
    }

    /// Statically plans the full segment list for a finite buffer.
    ///
    /// Applies the same stepping rule as the live path, so batch and live
    /// runs of identical audio produce identical segments.
    pub fn plan(config: SegmenterConfig, pcm: &[u8]) -> Result<Vec<AudioSegment>> {
        let mut segmenter = Self::new(config)?;
        let mut segments = segmenter.push(pcm);
        if let Some(tail) = segmenter.finish() {
            segments.push(tail);
        }
        Ok(segments)
    }
}
