//! Attempt cooldown gating.
//!
//! One [`CooldownRecord`] per `(user, question, mode)`. Every status check
//! re-reads the store; a cached flag would let a second tab through. Store
//! failures deny the attempt.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::CooldownConfig;
use crate::core::clock::Clock;
use crate::core::resume::escape_key_part;
use crate::core::stage::FlowMode;
use crate::error::{FlowError, Result};
use crate::storage::CooldownStore;

/// Identity of a cooldown window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CooldownKey {
    pub user_id: String,
    pub question_id: String,
    pub mode: FlowMode,
}

impl CooldownKey {
    /// Create a key.
    pub fn new(user_id: impl Into<String>, question_id: impl Into<String>, mode: FlowMode) -> Self {
        Self {
            user_id: user_id.into(),
            question_id: question_id.into(),
            mode,
        }
    }

    /// Flat key used by stores: `user:question:mode`.
    pub fn storage_key(&self) -> String {
        format!(
            "{}:{}:{}",
            escape_key_part(&self.user_id),
            escape_key_part(&self.question_id),
            self.mode
        )
    }
}

/// Persisted gate state for one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownRecord {
    pub user_id: String,
    pub question_id: String,
    pub mode: FlowMode,
    pub last_attempt_at: DateTime<Utc>,
    pub available_at: DateTime<Utc>,
}

impl CooldownRecord {
    /// The key this record is stored under.
    pub fn key(&self) -> CooldownKey {
        CooldownKey::new(self.user_id.clone(), self.question_id.clone(), self.mode)
    }
}

/// Result of a status check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownStatus {
    pub can_attempt: bool,
    /// Present whenever a record exists for the key.
    pub available_at: Option<DateTime<Utc>>,
}

impl CooldownStatus {
    /// Time left before a new attempt is allowed; zero when allowed.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        match self.available_at {
            Some(at) if !self.can_attempt && at > now => at - now,
            _ => Duration::zero(),
        }
    }
}

/// Checks and records cooldown windows against a persistence port.
#[derive(Clone)]
pub struct CooldownGuard {
    store: Arc<dyn CooldownStore>,
    config: CooldownConfig,
    clock: Arc<dyn Clock>,
}

impl CooldownGuard {
    /// Create a guard.
    pub fn new(store: Arc<dyn CooldownStore>, config: CooldownConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    /// Current time as seen by the guard.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Configured window for a mode.
    pub fn duration_for(&self, mode: FlowMode) -> Result<Duration> {
        Duration::from_std(self.config.duration_for(mode)).map_err(|_| {
            FlowError::config(format!("cooldown window for {} is out of range", mode))
        })
    }

    /// Whether a new attempt is permitted right now.
    pub async fn check_status(
        &self,
        user_id: &str,
        question_id: &str,
        mode: FlowMode,
    ) -> Result<CooldownStatus> {
        let key = CooldownKey::new(user_id, question_id, mode);
        let record = self.store.get(&key).await.map_err(|err| unavailable(&key, err))?;

        let status = match record {
            None => CooldownStatus {
                can_attempt: true,
                available_at: None,
            },
            Some(record) => CooldownStatus {
                can_attempt: self.clock.now() >= record.available_at,
                available_at: Some(record.available_at),
            },
        };

        tracing::debug!(
            key = %key.storage_key(),
            can_attempt = status.can_attempt,
            "cooldown checked"
        );
        Ok(status)
    }

    /// Start a new window for the key. Last write wins.
    pub async fn record_attempt(
        &self,
        user_id: &str,
        question_id: &str,
        mode: FlowMode,
    ) -> Result<CooldownRecord> {
        let now = self.clock.now();
        let available_at = now
            .checked_add_signed(self.duration_for(mode)?)
            .ok_or_else(|| {
                FlowError::config(format!("cooldown window for {} overflows the clock", mode))
            })?;
        let record = CooldownRecord {
            user_id: user_id.to_string(),
            question_id: question_id.to_string(),
            mode,
            last_attempt_at: now,
            available_at,
        };

        self.store
            .upsert(&record)
            .await
            .map_err(|err| unavailable(&record.key(), err))?;

        tracing::info!(
            key = %record.key().storage_key(),
            available_at = %record.available_at,
            "cooldown recorded"
        );
        Ok(record)
    }
}

fn unavailable(key: &CooldownKey, err: FlowError) -> FlowError {
    tracing::warn!(key = %key.storage_key(), error = %err, "cooldown store failed");
    match err {
        FlowError::CooldownUnavailable { .. } => err,
        other => FlowError::cooldown_unavailable(other.to_string()),
    }
}
