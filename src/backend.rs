//! Transcription backends.
//!
//! The pipeline treats a backend as a single async call per segment: one
//! bounded WAV buffer in, one transcript out. Cancellation is dropping the
//! in-flight future (the scheduler aborts the worker task), which closes
//! the underlying connection for the HTTP backend.

use crate::error::{Result, SegscribeError};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

/// Trait for remote speech-to-text transcription.
///
/// This trait allows swapping implementations (real HTTP service vs mock).
#[async_trait]
pub trait TranscriptionBackend: Send + Sync {
    /// Transcribe one WAV-framed audio buffer to text.
    ///
    /// # Arguments
    /// * `wav` - Complete WAV file bytes (16-bit PCM mono)
    /// * `language` - Language code, or "auto" for detection
    /// * `model` - Model name the service should use
    async fn transcribe(&self, wav: &[u8], language: &str, model: &str) -> Result<String>;
}

#[async_trait]
impl<T: TranscriptionBackend> TranscriptionBackend for Arc<T> {
    async fn transcribe(&self, wav: &[u8], language: &str, model: &str) -> Result<String> {
        (**self).transcribe(wav, language, model).await
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Backend that POSTs WAV audio to a whisper-server-style HTTP endpoint
/// and expects a JSON `{"text": "..."}` response.
pub struct HttpBackend {
    client: reqwest::Client,
    endpoint: reqwest::Url,
}

impl HttpBackend {
    /// Creates a backend for `endpoint`, validating the URL up front.
    ///
    /// `request_timeout` bounds each call at the transport level; the
    /// scheduler layers its own safety-net timeout on top.
    pub fn new(endpoint: &str, request_timeout: Duration) -> Result<Self> {
        let endpoint =
            reqwest::Url::parse(endpoint).map_err(|e| SegscribeError::ConfigInvalidValue {
                key: "backend.endpoint".to_string(),
                message: format!("{}: {}", endpoint, e),
            })?;
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| SegscribeError::Backend {
                message: format!("Failed to build HTTP client: {}", e),
            })?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl TranscriptionBackend for HttpBackend {
    async fn transcribe(&self, wav: &[u8], language: &str, model: &str) -> Result<String> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .query(&[("language", language), ("model", model)])
            .header(reqwest::header::CONTENT_TYPE, "audio/wav")
            .body(wav.to_vec())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SegscribeError::Backend {
                        message: "request timed out".to_string(),
                    }
                } else {
                    SegscribeError::Backend {
                        message: format!("request failed: {}", e),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SegscribeError::Backend {
                message: format!("server returned {}: {}", status, body.trim()),
            });
        }

        let parsed: TranscriptionResponse =
            response.json().await.map_err(|e| SegscribeError::Backend {
                message: format!("invalid response body: {}", e),
            })?;
        Ok(parsed.text)
    }
}

/// One scripted reply from the mock backend.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Return this transcript.
    Text(String),
    /// Fail with a transient backend error.
    Error(String),
    /// Return an empty transcript (treated as a failure by the scheduler).
    Empty,
    /// Never resolve — exercises timeouts and cancellation.
    Hang,
}

/// Mock backend for testing.
///
/// Replies are scripted per audio buffer, consumed one per attempt, so a
/// segment can fail twice and then succeed. Buffers without a script get
/// the default response.
pub struct MockBackend {
    scripts: Mutex<HashMap<Vec<u8>, Vec<MockReply>>>,
    default_reply: MockReply,
    concurrent: Arc<std::sync::atomic::AtomicUsize>,
    max_concurrent: Arc<std::sync::atomic::AtomicUsize>,
    call_delay: Option<Duration>,
}

impl MockBackend {
    /// Creates a mock that answers every call with `default_text`.
    pub fn new(default_text: &str) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            default_reply: MockReply::Text(default_text.to_string()),
            concurrent: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
            max_concurrent: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
            call_delay: None,
        }
    }

    /// Scripts the replies for one audio buffer, consumed in order.
    pub fn with_script(self, wav: Vec<u8>, replies: Vec<MockReply>) -> Self {
        self.scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(wav, replies);
        self
    }

    /// Adds an artificial delay to every call, to let concurrency build up.
    pub fn with_call_delay(mut self, delay: Duration) -> Self {
        self.call_delay = Some(delay);
        self
    }

    /// Highest number of calls observed in flight at once.
    pub fn max_concurrent_calls(&self) -> usize {
        self.max_concurrent.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn next_reply(&self, wav: &[u8]) -> MockReply {
        let mut scripts = self.scripts.lock().unwrap_or_else(|e| e.into_inner());
        match scripts.get_mut(wav) {
            Some(replies) if !replies.is_empty() => replies.remove(0),
            _ => self.default_reply.clone(),
        }
    }
}

#[async_trait]
impl TranscriptionBackend for MockBackend {
    async fn transcribe(&self, wav: &[u8], _language: &str, _model: &str) -> Result<String> {
        use std::sync::atomic::Ordering;

        let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.call_delay {
            tokio::time::sleep(delay).await;
        }
        let reply = self.next_reply(wav);
        self.concurrent.fetch_sub(1, Ordering::SeqCst);

        match reply {
            MockReply::Text(text) => Ok(text),
            MockReply::Error(message) => Err(SegscribeError::Backend { message }),
            MockReply::Empty => Ok(String::new()),
            MockReply::Hang => {
                // Effectively forever; the caller's timeout or abort wins.
                tokio::time::sleep(Duration::from_secs(86_400)).await;
                Ok(String::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_returns_default_response() {
        let backend = MockBackend::new("mock transcription");
        let text = backend.transcribe(b"wav", "auto", "base").await.unwrap();
        assert_eq!(text, "mock transcription");
    }

    #[tokio::test]
    async fn mock_consumes_script_in_order() {
        let backend = MockBackend::new("default").with_script(
            b"audio-a".to_vec(),
            vec![
                MockReply::Error("boom".to_string()),
                MockReply::Text("recovered".to_string()),
            ],
        );

        let first = backend.transcribe(b"audio-a", "auto", "base").await;
        assert!(matches!(first, Err(SegscribeError::Backend { .. })));

        let second = backend.transcribe(b"audio-a", "auto", "base").await;
        assert_eq!(second.unwrap(), "recovered");

        // Script exhausted → default.
        let third = backend.transcribe(b"audio-a", "auto", "base").await;
        assert_eq!(third.unwrap(), "default");
    }

    #[tokio::test]
    async fn mock_empty_reply_is_empty_string() {
        let backend =
            MockBackend::new("default").with_script(b"a".to_vec(), vec![MockReply::Empty]);
        let text = backend.transcribe(b"a", "auto", "base").await.unwrap();
        assert!(text.is_empty());
    }

    #[tokio::test]
    async fn mock_tracks_concurrency() {
        let backend = Arc::new(
            MockBackend::new("ok").with_call_delay(Duration::from_millis(50)),
        );
        let mut handles = Vec::new();
        for _ in 0..3 {
            let backend = backend.clone();
            handles.push(tokio::spawn(async move {
                backend.transcribe(b"x", "auto", "base").await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(backend.max_concurrent_calls(), 3);
    }

    #[test]
    fn http_backend_rejects_invalid_endpoint() {
        let result = HttpBackend::new("not a url", Duration::from_secs(5));
        assert!(matches!(
            result,
            Err(SegscribeError::ConfigInvalidValue { .. })
        ));
    }

    #[test]
    fn backend_trait_is_object_safe() {
        fn assert_backend(_: &dyn TranscriptionBackend) {}
        let backend = MockBackend::new("x");
        assert_backend(&backend);
    }
}
