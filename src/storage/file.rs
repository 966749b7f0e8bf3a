//! File-based storage.
//!
//! One JSON document per key under `cooldowns/` and `resume/`. Writes go to
//! a uniquely named temp file and are renamed into place, so concurrent
//! writers to the same key resolve as last-write-wins without torn files.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::AsyncWriteExt;

use crate::config::mentorgate_home;
use crate::core::resume::resume_key;
use crate::core::{CooldownKey, CooldownRecord, ResumeRecord};
use crate::error::{FlowError, Result};
use crate::storage::{CooldownStore, ResumeStore};

/// Durable JSON-file store.
#[derive(Debug)]
pub struct FileStore {
    cooldowns_dir: PathBuf,
    resume_dir: PathBuf,
    temp_seq: AtomicU64,
}

impl FileStore {
    /// Create a store under the mentorgate home directory.
    pub fn new() -> Result<Self> {
        let root = mentorgate_home().ok_or_else(|| {
            FlowError::config("could not determine mentorgate home directory")
        })?;
        Self::with_root(root)
    }

    /// Create a store under a custom root.
    pub fn with_root(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let cooldowns_dir = root.join("cooldowns");
        let resume_dir = root.join("resume");

        for dir in [&cooldowns_dir, &resume_dir] {
            if !dir.exists() {
                std::fs::create_dir_all(dir).map_err(|e| FlowError::storage(dir, e))?;
            }
        }

        Ok(Self {
            cooldowns_dir,
            resume_dir,
            temp_seq: AtomicU64::new(0),
        })
    }

    fn cooldown_path(&self, key: &CooldownKey) -> PathBuf {
        self.cooldowns_dir
            .join(format!("{}.json", encode_key(&key.storage_key())))
    }

    fn resume_path(&self, user_id: &str, question_id: &str) -> PathBuf {
        self.resume_dir
            .join(format!("{}.json", encode_key(&resume_key(user_id, question_id))))
    }

    async fn write_atomic<T: Serialize + Sync>(&self, path: &Path, value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value)?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let seq = self.temp_seq.fetch_add(1, Ordering::Relaxed);
        let temp_path = path.with_file_name(format!(
            ".{}.{}-{}.tmp",
            file_name,
            std::process::id(),
            seq
        ));

        {
            let mut file = tokio::fs::File::create(&temp_path)
                .await
                .map_err(|e| FlowError::storage(&temp_path, e))?;
            file.write_all(json.as_bytes())
                .await
                .map_err(|e| FlowError::storage(&temp_path, e))?;
            file.sync_all()
                .await
                .map_err(|e| FlowError::storage(&temp_path, e))?;
        }

        if let Err(e) = tokio::fs::rename(&temp_path, path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(FlowError::storage(path, e));
        }
        Ok(())
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(FlowError::storage(path, e)),
    }
}

/// Percent-encode anything outside `[A-Za-z0-9_-]` so ids map to distinct,
/// safe file names.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

#[async_trait]
impl CooldownStore for FileStore {
    async fn get(&self, key: &CooldownKey) -> Result<Option<CooldownRecord>> {
        let record: Option<CooldownRecord> = read_json(&self.cooldown_path(key)).await?;
        Ok(record.filter(|record| {
            let matches = record.key() == *key;
            if !matches {
                tracing::warn!(
                    key = %key.storage_key(),
                    "ignoring cooldown record for another key"
                );
            }
            matches
        }))
    }

    async fn upsert(&self, record: &CooldownRecord) -> Result<()> {
        self.write_atomic(&self.cooldown_path(&record.key()), record)
            .await
    }
}

#[async_trait]
impl ResumeStore for FileStore {
    async fn load(&self, user_id: &str, question_id: &str) -> Result<Option<ResumeRecord>> {
        let record: Option<ResumeRecord> =
            read_json(&self.resume_path(user_id, question_id)).await?;
        Ok(record.filter(|record| record.belongs_to(user_id, question_id)))
    }

    async fn save(&self, record: &ResumeRecord) -> Result<()> {
        let path = self.resume_path(&record.user_id, &record.question_id);
        self.write_atomic(&path, record).await
    }

    async fn clear(&self, user_id: &str, question_id: &str) -> Result<()> {
        let path = self.resume_path(user_id, question_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FlowError::storage(&path, e)),
        }
    }

    async fn list(&self, limit: usize) -> Result<Vec<ResumeRecord>> {
        let mut records = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.resume_dir)
            .await
            .map_err(|e| FlowError::storage(&self.resume_dir, e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| FlowError::storage(&self.resume_dir, e))?
        {
            let path = entry.path();
            let is_temp = path
                .file_name()
                .map(|n| n.to_string_lossy().starts_with('.'))
                .unwrap_or(true);
            if is_temp || path.extension().map(|e| e != "json").unwrap_or(true) {
                continue;
            }

            match read_json::<ResumeRecord>(&path).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping unreadable resume record");
                }
            }
        }

        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        records.truncate(limit);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FlowMode, Stage};
    use crate::storage::traits::tests::{check_cooldown_store, check_resume_store, cooldown, resume};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn create_test_store() -> (FileStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = FileStore::with_root(dir.path()).unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_file_cooldown_store() {
        let (store, _dir) = create_test_store();
        check_cooldown_store(&store).await;
    }

    #[tokio::test]
    async fn test_file_resume_store() {
        let (store, _dir) = create_test_store();
        check_resume_store(&store).await;
    }

    #[test]
    fn test_with_root_creates_directories() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("nested");
        FileStore::with_root(&root).unwrap();

        assert!(root.join("cooldowns").is_dir());
        assert!(root.join("resume").is_dir());
    }

    #[test]
    fn test_encode_key() {
        assert_eq!(encode_key("42:1:mentor-guided"), "42%3A1%3Amentor-guided");
        assert_eq!(encode_key("a/b"), "a%2Fb");
        assert_ne!(encode_key("a:b"), encode_key("a_b"));
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let record = cooldown("42", "1", FlowMode::MentorGuided);
        {
            let store = FileStore::with_root(dir.path()).unwrap();
            store.upsert(&record).await.unwrap();
        }

        let reopened = FileStore::with_root(dir.path()).unwrap();
        assert_eq!(reopened.get(&record.key()).await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let (store, dir) = create_test_store();
        store.upsert(&cooldown("42", "1", FlowMode::TimedExam)).await.unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("cooldowns"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_cooldown_is_an_error() {
        let (store, _dir) = create_test_store();
        let key = CooldownKey::new("42", "1", FlowMode::MentorGuided);
        std::fs::write(store.cooldown_path(&key), "not json").unwrap();

        assert!(matches!(store.get(&key).await, Err(FlowError::Serde { .. })));
    }

    #[tokio::test]
    async fn test_record_for_another_identity_is_ignored() {
        let (store, _dir) = create_test_store();
        let key = CooldownKey::new("42", "1", FlowMode::MentorGuided);
        let foreign = cooldown("7", "1", FlowMode::MentorGuided);
        std::fs::write(
            store.cooldown_path(&key),
            serde_json::to_string(&foreign).unwrap(),
        )
        .unwrap();
        assert!(store.get(&key).await.unwrap().is_none());

        let saved = resume("7", "1", Stage::Begin);
        std::fs::write(
            store.resume_path("42", "1"),
            serde_json::to_string(&saved).unwrap(),
        )
        .unwrap();
        assert!(store.load("42", "1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_skips_temp_and_invalid_files() {
        let (store, dir) = create_test_store();
        store.save(&resume("42", "1", Stage::Begin)).await.unwrap();

        std::fs::write(dir.path().join("resume/.x.json.tmp"), "{}").unwrap();
        std::fs::write(dir.path().join("resume/broken.json"), "nope").unwrap();

        let listed = store.list(10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].question_id, "1");
    }

    #[tokio::test]
    async fn test_concurrent_writers_last_write_wins() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileStore::with_root(dir.path()).unwrap());
        let mut handles = Vec::new();

        for i in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let mut record = cooldown("42", "1", FlowMode::MentorGuided);
                record.available_at += chrono::Duration::seconds(i);
                store.upsert(&record).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let key = CooldownKey::new("42", "1", FlowMode::MentorGuided);
        assert!(store.get(&key).await.unwrap().is_some());
        let files = std::fs::read_dir(dir.path().join("cooldowns")).unwrap().count();
        assert_eq!(files, 1);
    }
}
