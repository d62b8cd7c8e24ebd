//! Durable storage for manifests and segment audio.
//!
//! The store is a trait so the scheduler's retry and recovery logic can be
//! tested against an in-memory fake; production uses the filesystem layout
//!
//! ```text
//! <root>/<pipeline_id>/manifest.json
//! <root>/<pipeline_id>/segment_00000.wav
//! ```

use crate::error::{Result, SegscribeError};
use crate::manifest::RecoveryManifest;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Persistence seam for one durable record per pipeline run plus one
/// WAV blob per segment, keyed `(pipeline_id, segment_index)`.
#[async_trait]
pub trait ManifestStore: Send + Sync {
    /// Persists the manifest atomically: once this returns, a crash cannot
    /// leave a half-written manifest observable.
    async fn save(&self, manifest: &RecoveryManifest) -> Result<()>;

    /// Loads the manifest for a pipeline run exactly as it was last
    /// persisted: jobs a dead process left in `processing` come back
    /// unchanged. Resumption goes through [`load_for_recovery`], which
    /// applies the stale-job demotion rule on top of this.
    async fn load(&self, pipeline_id: &str) -> Result<RecoveryManifest>;

    /// Removes the manifest and all segment audio for a run.
    async fn delete(&self, pipeline_id: &str) -> Result<()>;

    /// Lists pipeline IDs whose recording has stopped but which still have
    /// unresolved (pending/processing) jobs — candidates for resumption.
    async fn list_recoverable(&self) -> Result<Vec<String>>;

    /// Stores one segment's WAV-framed audio, returning its location
    /// relative to the store (what goes into the job's `audio_location`).
    async fn write_segment_audio(
        &self,
        pipeline_id: &str,
        index: usize,
        wav: &[u8],
    ) -> Result<String>;

    /// Reads one segment's WAV-framed audio back.
    async fn read_segment_audio(&self, pipeline_id: &str, index: usize) -> Result<Vec<u8>>;
}

/// Loads a manifest for resumption: demotes stale `processing` jobs to
/// `pending` and persists the demotion before any scheduling starts, so a
/// second crash during recovery cannot re-observe the stale state.
pub async fn load_for_recovery(
    store: &dyn ManifestStore,
    pipeline_id: &str,
) -> Result<RecoveryManifest> {
    let mut manifest = store.load(pipeline_id).await?;
    let demoted = manifest.demote_stale();
    if demoted > 0 {
        tracing::info!(
            pipeline_id,
            demoted,
            "demoted stale in-flight jobs to pending"
        );
        store.save(&manifest).await?;
    }
    Ok(manifest)
}

fn segment_file_name(index: usize) -> String {
    format!("segment_{:05}.wav", index)
}

/// Filesystem-backed store.
pub struct FileManifestStore {
    root: PathBuf,
}

impl FileManifestStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Default store location under the user data directory.
    pub fn default_root() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("segscribe").join("pipelines"))
    }

    fn pipeline_dir(&self, pipeline_id: &str) -> PathBuf {
        self.root.join(pipeline_id)
    }

    fn manifest_path(&self, pipeline_id: &str) -> PathBuf {
        self.pipeline_dir(pipeline_id).join("manifest.json")
    }
}

#[async_trait]
impl ManifestStore for FileManifestStore {
    async fn save(&self, manifest: &RecoveryManifest) -> Result<()> {
        let dir = self.pipeline_dir(&manifest.pipeline_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| SegscribeError::ManifestPersist {
                message: format!("Failed to create {}: {}", dir.display(), e),
            })?;

        let json = serde_json::to_vec_pretty(manifest)?;
        let path = self.manifest_path(&manifest.pipeline_id);
        let tmp = path.with_extension("json.tmp");

        // Write-to-temp-then-rename keeps the manifest atomic on the same
        // filesystem; readers see either the old or the new version.
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| SegscribeError::ManifestPersist {
                message: format!("Failed to write {}: {}", tmp.display(), e),
            })?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| SegscribeError::ManifestPersist {
                message: format!("Failed to rename into {}: {}", path.display(), e),
            })?;
        Ok(())
    }

    async fn load(&self, pipeline_id: &str) -> Result<RecoveryManifest> {
        let path = self.manifest_path(pipeline_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SegscribeError::ManifestNotFound {
                    pipeline_id: pipeline_id.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn delete(&self, pipeline_id: &str) -> Result<()> {
        let dir = self.pipeline_dir(pipeline_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_recoverable(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut recoverable = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(pipeline_id) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            match self.load(&pipeline_id).await {
                Ok(manifest) => {
                    if manifest.recording_stopped && manifest.has_unresolved() {
                        recoverable.push(pipeline_id);
                    }
                }
                // A directory without a readable manifest is not recoverable;
                // skip it rather than failing the whole scan.
                Err(e) => {
                    tracing::warn!(pipeline_id, error = %e, "skipping unreadable manifest");
                }
            }
        }
        recoverable.sort();
        Ok(recoverable)
    }

    async fn write_segment_audio(
        &self,
        pipeline_id: &str,
        index: usize,
        wav: &[u8],
    ) -> Result<String> {
        let dir = self.pipeline_dir(pipeline_id);
        tokio::fs::create_dir_all(&dir).await?;
        let name = segment_file_name(index);
        tokio::fs::write(dir.join(&name), wav).await?;
        Ok(name)
    }

    async fn read_segment_audio(&self, pipeline_id: &str, index: usize) -> Result<Vec<u8>> {
        let path = self.pipeline_dir(pipeline_id).join(segment_file_name(index));
        Ok(tokio::fs::read(&path).await?)
    }
}

/// In-memory store for tests: same contract, no filesystem.
#[derive(Default)]
pub struct MemoryManifestStore {
    manifests: Mutex<HashMap<String, RecoveryManifest>>,
    audio: Mutex<HashMap<(String, usize), Vec<u8>>>,
}

impl MemoryManifestStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ManifestStore for MemoryManifestStore {
    async fn save(&self, manifest: &RecoveryManifest) -> Result<()> {
        self.manifests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(manifest.pipeline_id.clone(), manifest.clone());
        Ok(())
    }

    async fn load(&self, pipeline_id: &str) -> Result<RecoveryManifest> {
        self.manifests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(pipeline_id)
            .cloned()
            .ok_or_else(|| SegscribeError::ManifestNotFound {
                pipeline_id: pipeline_id.to_string(),
            })
    }

    async fn delete(&self, pipeline_id: &str) -> Result<()> {
        self.manifests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(pipeline_id);
        self.audio
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(id, _), _| id != pipeline_id);
        Ok(())
    }

    async fn list_recoverable(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .manifests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|m| m.recording_stopped && m.has_unresolved())
            .map(|m| m.pipeline_id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn write_segment_audio(
        &self,
        pipeline_id: &str,
        index: usize,
        wav: &[u8],
    ) -> Result<String> {
        self.audio
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((pipeline_id.to_string(), index), wav.to_vec());
        Ok(segment_file_name(index))
    }

    async fn read_segment_audio(&self, pipeline_id: &str, index: usize) -> Result<Vec<u8>> {
        self.audio
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(pipeline_id.to_string(), index))
            .cloned()
            .ok_or_else(|| {
                SegscribeError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no audio for segment {} of {}", index, pipeline_id),
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::JobStatus;

    fn manifest(id: &str) -> RecoveryManifest {
        RecoveryManifest::new(id, None, 180, 10)
    }

    #[tokio::test]
    async fn file_store_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileManifestStore::new(dir.path());

        let mut m = manifest("run-1");
        m.enqueue("segment_00000.wav".to_string());
        m.merged_text_checkpoint = "hello".to_string();
        store.save(&m).await.unwrap();

        let loaded = store.load("run-1").await.unwrap();
        assert_eq!(loaded.pipeline_id, "run-1");
        assert_eq!(loaded.jobs.len(), 1);
        assert_eq!(loaded.merged_text_checkpoint, "hello");
    }

    #[tokio::test]
    async fn file_store_save_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileManifestStore::new(dir.path());
        store.save(&manifest("run-1")).await.unwrap();
        store.save(&manifest("run-1")).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path().join("run-1"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["manifest.json"]);
    }

    #[tokio::test]
    async fn file_store_missing_manifest_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileManifestStore::new(dir.path());
        assert!(matches!(
            store.load("nope").await,
            Err(SegscribeError::ManifestNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn file_store_segment_audio_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileManifestStore::new(dir.path());

        let location = store
            .write_segment_audio("run-1", 3, b"RIFF-test-bytes")
            .await
            .unwrap();
        assert_eq!(location, "segment_00003.wav");

        let bytes = store.read_segment_audio("run-1", 3).await.unwrap();
        assert_eq!(bytes, b"RIFF-test-bytes");
    }

    #[tokio::test]
    async fn file_store_delete_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileManifestStore::new(dir.path());

        store.save(&manifest("run-1")).await.unwrap();
        store.write_segment_audio("run-1", 0, b"x").await.unwrap();
        store.delete("run-1").await.unwrap();

        assert!(!dir.path().join("run-1").exists());
        // Deleting again is fine.
        store.delete("run-1").await.unwrap();
    }

    #[tokio::test]
    async fn list_recoverable_filters_on_stopped_and_unresolved() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileManifestStore::new(dir.path());

        // Stopped with a pending job → recoverable.
        let mut a = manifest("run-a");
        a.enqueue("s0.wav".to_string());
        a.recording_stopped = true;
        store.save(&a).await.unwrap();

        // Stopped, all jobs terminal → not recoverable.
        let mut b = manifest("run-b");
        let i = b.enqueue("s0.wav".to_string());
        b.jobs[i].status = JobStatus::Failed;
        b.recording_stopped = true;
        store.save(&b).await.unwrap();

        // Still recording → not listed.
        let mut c = manifest("run-c");
        c.enqueue("s0.wav".to_string());
        store.save(&c).await.unwrap();

        assert_eq!(store.list_recoverable().await.unwrap(), vec!["run-a"]);
    }

    #[tokio::test]
    async fn load_for_recovery_demotes_and_persists() {
        let store = MemoryManifestStore::new();
        let mut m = manifest("run-1");
        let i = m.enqueue("s0.wav".to_string());
        m.jobs[i].status = JobStatus::Processing;
        m.jobs[i].attempts = 1;
        store.save(&m).await.unwrap();

        let recovered = load_for_recovery(&store, "run-1").await.unwrap();
        assert_eq!(recovered.jobs[0].status, JobStatus::Pending);

        // Demotion was persisted, not just applied in memory.
        let reloaded = store.load("run-1").await.unwrap();
        assert_eq!(reloaded.jobs[0].status, JobStatus::Pending);
        assert_eq!(reloaded.jobs[0].attempts, 1);
    }

    #[tokio::test]
    async fn memory_store_behaves_like_file_store() {
        let store = MemoryManifestStore::new();

        let mut m = manifest("run-1");
        m.enqueue("s0.wav".to_string());
        m.recording_stopped = true;
        store.save(&m).await.unwrap();
        store.write_segment_audio("run-1", 0, b"wav").await.unwrap();

        assert_eq!(store.load("run-1").await.unwrap().jobs.len(), 1);
        assert_eq!(store.list_recoverable().await.unwrap(), vec!["run-1"]);
        assert_eq!(store.read_segment_audio("run-1", 0).await.unwrap(), b"wav");

        store.delete("run-1").await.unwrap();
        assert!(store.load("run-1").await.is_err());
        assert!(store.read_segment_audio("run-1", 0).await.is_err());
    }
}
