//! Audio sources for batch transcription.
//!
//! A batch source hands the pipeline one finite PCM buffer up front. The
//! live pipeline does not use this trait — audio is appended to it as it
//! arrives.

use crate::error::{Result, SegscribeError};
use std::io::Read;
use std::path::Path;

/// Supplies a finite buffer of raw 16-bit mono PCM bytes.
pub trait AudioSource: Send {
    /// Reads the entire source. Called once, at pipeline start.
    fn read_all(&mut self) -> Result<Vec<u8>>;
}

/// Audio source backed by an in-memory PCM buffer. Used in tests and by
/// callers that already hold decoded audio.
pub struct MemorySource {
    pcm: Option<Vec<u8>>,
}

impl MemorySource {
    pub fn new(pcm: Vec<u8>) -> Self {
        Self { pcm: Some(pcm) }
    }
}

impl AudioSource for MemorySource {
    fn read_all(&mut self) -> Result<Vec<u8>> {
        self.pcm.take().ok_or_else(|| SegscribeError::AudioRead {
            message: "memory source already consumed".to_string(),
        })
    }
}

/// Audio source that reads a 16-bit mono WAV file at the expected rate.
///
/// Resampling and downmixing are out of scope; a file in any other format
/// is rejected with a format mismatch rather than silently mangled.
pub struct WavFileSource {
    path: std::path::PathBuf,
    expected_sample_rate: u32,
}

impl WavFileSource {
    pub fn new(path: impl AsRef<Path>, expected_sample_rate: u32) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            expected_sample_rate,
        }
    }
}

impl AudioSource for WavFileSource {
    fn read_all(&mut self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        std::fs::File::open(&self.path)
            .and_then(|mut f| f.read_to_end(&mut bytes))
            .map_err(|e| SegscribeError::AudioRead {
                message: format!("Failed to read {}: {}", self.path.display(), e),
            })?;
        crate::audio::wav::decode_wav(&bytes, self.expected_sample_rate)
    }
}
