//! PCM ↔ WAV framing for segment storage.
//!
//! Segments are written to stable storage as standard RIFF/WAVE files
//! (16-bit signed PCM, mono) so they remain playable and inspectable.
//! Decoding returns the `data` chunk byte-identically to the PCM that
//! was encoded.

use crate::error::{Result, SegscribeError};
use std::io::Cursor;

/// Frames raw 16-bit little-endian mono PCM bytes as a WAV file.
///
/// The input length must be a whole number of samples (even).
pub fn encode_wav(pcm: &[u8], sample_rate: u32) -> Result<Vec<u8>> {
    if pcm.len() % 2 != 0 {
        return Err(SegscribeError::WavFraming {
            message: format!("PCM byte length {} is not a whole sample count", pcm.len()),
        });
    }

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| SegscribeError::WavFraming {
                message: format!("Failed to create WAV writer: {}", e),
            })?;
        for pair in pcm.chunks_exact(2) {
            let sample = i16::from_le_bytes([pair[0], pair[1]]);
            writer
                .write_sample(sample)
                .map_err(|e| SegscribeError::WavFraming {
                    message: format!("Failed to write WAV sample: {}", e),
                })?;
        }
        writer.finalize().map_err(|e| SegscribeError::WavFraming {
            message: format!("Failed to finalize WAV: {}", e),
        })?;
    }

    Ok(cursor.into_inner())
}

/// Reads the PCM bytes back out of a WAV file produced by [`encode_wav`].
///
/// Rejects files that are not 16-bit integer mono at the expected rate,
/// so a foreign file cannot silently enter the pipeline mis-framed.
pub fn decode_wav(wav: &[u8], expected_sample_rate: u32) -> Result<Vec<u8>> {
    let mut reader =
        hound::WavReader::new(Cursor::new(wav)).map_err(|e| SegscribeError::WavFraming {
            message: format!("Failed to parse WAV file: {}", e),
        })?;

    let spec = reader.spec();
    if spec.bits_per_sample != 16
        || spec.sample_format != hound::SampleFormat::Int
        || spec.channels != 1
        || spec.sample_rate != expected_sample_rate
    {
        return Err(SegscribeError::AudioFormatMismatch {
            expected: format!("16-bit int mono @ {}Hz", expected_sample_rate),
            actual: format!(
                "{}-bit {:?} {}ch @ {}Hz",
                spec.bits_per_sample, spec.sample_format, spec.channels, spec.sample_rate
            ),
        });
    }

    let mut pcm = Vec::with_capacity(reader.len() as usize * 2);
    for sample in reader.samples::<i16>() {
        let sample = sample.map_err(|e| SegscribeError::WavFraming {
            message: format!("Failed to read WAV sample: {}", e),
        })?;
        pcm.extend_from_slice(&sample.to_le_bytes());
    }

    Ok(pcm)
}

/// Duration of a PCM byte buffer in seconds.
pub fn pcm_duration_secs(byte_len: usize, sample_rate: u32) -> f64 {
    byte_len as f64 / (sample_rate as f64 * crate::defaults::BYTES_PER_SAMPLE as f64)
}
