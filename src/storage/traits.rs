//! Persistence ports.
//!
//! Both stores are keyed documents with atomic per-key writes. Neither is
//! expected to offer cross-key transactions.

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{CooldownKey, CooldownRecord, ResumeRecord};
use crate::error::Result;

/// Storage for cooldown windows.
#[async_trait]
pub trait CooldownStore: Send + Sync {
    /// Read the record for a key.
    ///
    /// Returns `Ok(None)` if no attempt was ever recorded.
    async fn get(&self, key: &CooldownKey) -> Result<Option<CooldownRecord>>;

    /// Insert or replace the record for its key.
    async fn upsert(&self, record: &CooldownRecord) -> Result<()>;
}

/// Storage for resume records.
#[async_trait]
pub trait ResumeStore: Send + Sync {
    /// Read the record for a user and question.
    async fn load(&self, user_id: &str, question_id: &str) -> Result<Option<ResumeRecord>>;

    /// Insert or replace a record.
    async fn save(&self, record: &ResumeRecord) -> Result<()>;

    /// Remove a record. Succeeds if it does not exist.
    async fn clear(&self, user_id: &str, question_id: &str) -> Result<()>;

    /// Up to `limit` records, most recently updated first.
    async fn list(&self, limit: usize) -> Result<Vec<ResumeRecord>>;
}

#[async_trait]
impl<T: CooldownStore + ?Sized> CooldownStore for Arc<T> {
    async fn get(&self, key: &CooldownKey) -> Result<Option<CooldownRecord>> {
        (**self).get(key).await
    }

    async fn upsert(&self, record: &CooldownRecord) -> Result<()> {
        (**self).upsert(record).await
    }
}

#[async_trait]
impl<T: ResumeStore + ?Sized> ResumeStore for Arc<T> {
    async fn load(&self, user_id: &str, question_id: &str) -> Result<Option<ResumeRecord>> {
        (**self).load(user_id, question_id).await
    }

    async fn save(&self, record: &ResumeRecord) -> Result<()> {
        (**self).save(record).await
    }

    async fn clear(&self, user_id: &str, question_id: &str) -> Result<()> {
        (**self).clear(user_id, question_id).await
    }

    async fn list(&self, limit: usize) -> Result<Vec<ResumeRecord>> {
        (**self).list(limit).await
    }
}
