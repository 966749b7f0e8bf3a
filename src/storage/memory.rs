//! In-memory storage.
//!
//! Thread-safe maps behind `RwLock`. The outage switch lets tests and demos
//! exercise the fail-closed path without a real remote store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::core::resume::resume_key;
use crate::core::{CooldownKey, CooldownRecord, ResumeRecord};
use crate::error::{FlowError, Result};
use crate::storage::{CooldownStore, ResumeStore};

/// In-memory cooldown and resume store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    cooldowns: RwLock<HashMap<String, CooldownRecord>>,
    resumes: RwLock<HashMap<String, ResumeRecord>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of cooldown records held.
    pub fn cooldown_count(&self) -> usize {
        self.cooldowns.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Number of resume records held.
    pub fn resume_count(&self) -> usize {
        self.resumes.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(FlowError::cooldown_unavailable("memory store switched off"));
        }
        Ok(())
    }
}

#[async_trait]
impl CooldownStore for MemoryStore {
    async fn get(&self, key: &CooldownKey) -> Result<Option<CooldownRecord>> {
        self.check_available()?;
        let cooldowns = self.cooldowns.read().unwrap_or_else(|e| e.into_inner());
        Ok(cooldowns
            .get(&key.storage_key())
            .filter(|record| record.key() == *key)
            .cloned())
    }

    async fn upsert(&self, record: &CooldownRecord) -> Result<()> {
        self.check_available()?;
        let mut cooldowns = self.cooldowns.write().unwrap_or_else(|e| e.into_inner());
        cooldowns.insert(record.key().storage_key(), record.clone());
        Ok(())
    }
}

#[async_trait]
impl ResumeStore for MemoryStore {
    async fn load(&self, user_id: &str, question_id: &str) -> Result<Option<ResumeRecord>> {
        self.check_available()?;
        let resumes = self.resumes.read().unwrap_or_else(|e| e.into_inner());
        Ok(resumes
            .get(&resume_key(user_id, question_id))
            .filter(|record| record.belongs_to(user_id, question_id))
            .cloned())
    }

    async fn save(&self, record: &ResumeRecord) -> Result<()> {
        self.check_available()?;
        let mut resumes = self.resumes.write().unwrap_or_else(|e| e.into_inner());
        resumes.insert(record.storage_key(), record.clone());
        Ok(())
    }

    async fn clear(&self, user_id: &str, question_id: &str) -> Result<()> {
        self.check_available()?;
        let mut resumes = self.resumes.write().unwrap_or_else(|e| e.into_inner());
        resumes.remove(&resume_key(user_id, question_id));
        Ok(())
    }

    async fn list(&self, limit: usize) -> Result<Vec<ResumeRecord>> {
        self.check_available()?;
        let resumes = self.resumes.read().unwrap_or_else(|e| e.into_inner());
        let mut result: Vec<ResumeRecord> = resumes.values().cloned().collect();
        result.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        result.truncate(limit);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FlowMode, Stage};
    use crate::storage::traits::tests::{check_cooldown_store, check_resume_store, cooldown, resume};
    use chrono::Duration;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_memory_cooldown_store() {
        check_cooldown_store(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_memory_resume_store() {
        check_resume_store(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_unavailable_fails_every_call() {
        let store = MemoryStore::new();
        store.set_unavailable(true);

        let record = cooldown("1", "2", FlowMode::TimedExam);
        assert!(store.get(&record.key()).await.is_err());
        assert!(store.upsert(&record).await.is_err());
        assert!(store.load("1", "2").await.is_err());
        assert!(store.list(5).await.is_err());

        store.set_unavailable(false);
        assert!(store.upsert(&record).await.is_ok());
        assert_eq!(store.cooldown_count(), 1);
    }

    #[tokio::test]
    async fn test_list_ordering_and_limit() {
        let store = MemoryStore::new();

        let mut old = resume("1", "a", Stage::Begin);
        old.updated_at -= Duration::seconds(100);
        let mut mid = resume("1", "b", Stage::Begin);
        mid.updated_at -= Duration::seconds(50);
        let new = resume("1", "c", Stage::Begin);

        store.save(&mid).await.unwrap();
        store.save(&old).await.unwrap();
        store.save(&new).await.unwrap();

        let listed = store.list(10).await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|r| r.question_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);

        assert_eq!(store.list(2).await.unwrap().len(), 2);
        assert_eq!(store.resume_count(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_upserts_keep_one_record() {
        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();

        for i in 0..10 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let mut record = cooldown("42", "1", FlowMode::MentorGuided);
                record.available_at += Duration::seconds(i);
                store.upsert(&record).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.cooldown_count(), 1);
    }
}
