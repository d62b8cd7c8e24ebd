//! Error types for segscribe.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SegscribeError {
    // Configuration errors — fail fast at construction, no job is created
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Audio input errors
    #[error("Audio source is empty")]
    EmptyAudio,

    #[error("Failed to read audio source: {message}")]
    AudioRead { message: String },

    #[error("Audio format mismatch: expected {expected}, got {actual}")]
    AudioFormatMismatch { expected: String, actual: String },

    #[error("WAV framing failed: {message}")]
    WavFraming { message: String },

    // Per-segment transient errors — retried with backoff by the scheduler
    #[error("Transcription backend error: {message}")]
    Backend { message: String },

    #[error("Transcription backend timed out after {seconds}s")]
    BackendTimeout { seconds: u64 },

    #[error("Transcription backend returned an empty transcript")]
    EmptyTranscript,

    // Manifest / storage errors
    #[error("No manifest found for pipeline {pipeline_id}")]
    ManifestNotFound { pipeline_id: String },

    #[error("Failed to persist manifest: {message}")]
    ManifestPersist { message: String },

    #[error("Manifest is corrupt: {0}")]
    ManifestCorrupt(#[from] serde_json::Error),

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SegscribeError {
    /// True for errors the scheduler treats as transient and retries with
    /// backoff; everything else escalates past the per-segment retry loop.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SegscribeError::Backend { .. }
                | SegscribeError::BackendTimeout { .. }
                | SegscribeError::EmptyTranscript
        )
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, SegscribeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_invalid_value_display() {
        let error = SegscribeError::ConfigInvalidValue {
            key: "overlap_seconds".to_string(),
            message: "must be smaller than segment_seconds".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for overlap_seconds: must be smaller than segment_seconds"
        );
    }

    #[test]
    fn test_empty_audio_display() {
        assert_eq!(
            SegscribeError::EmptyAudio.to_string(),
            "Audio source is empty"
        );
    }

    #[test]
    fn test_backend_timeout_display() {
        let error = SegscribeError::BackendTimeout { seconds: 140 };
        assert_eq!(
            error.to_string(),
            "Transcription backend timed out after 140s"
        );
    }

    #[test]
    fn test_manifest_not_found_display() {
        let error = SegscribeError::ManifestNotFound {
            pipeline_id: "run-42".to_string(),
        };
        assert_eq!(error.to_string(), "No manifest found for pipeline run-42");
    }

    #[test]
    fn test_transient_classification() {
        assert!(
            SegscribeError::Backend {
                message: "connection reset".to_string()
            }
            .is_transient()
        );
        assert!(SegscribeError::BackendTimeout { seconds: 1 }.is_transient());
        assert!(SegscribeError::EmptyTranscript.is_transient());

        assert!(!SegscribeError::EmptyAudio.is_transient());
        assert!(
            !SegscribeError::ManifestPersist {
                message: "disk full".to_string()
            }
            .is_transient()
        );
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: SegscribeError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_str = "invalid = toml = syntax";
        let toml_error = toml::from_str::<toml::Value>(toml_str).unwrap_err();
        let error: SegscribeError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<SegscribeError>();
        assert_sync::<SegscribeError>();
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_result() -> Result<i32> {
            Ok(42)
        }
        assert_eq!(returns_result().unwrap(), 42);
    }
}
