//! XP notification for completed flows.
//!
//! Scoring is owned elsewhere; the core only reports that a flow finished.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::core::Outcome;
use crate::error::{FlowError, Result};

/// Receives one notification per completed flow.
#[async_trait]
pub trait XpService: Send + Sync {
    /// Report a completed flow.
    async fn award_for_completed_flow(
        &self,
        user_id: &str,
        question_id: &str,
        outcome: Outcome,
    ) -> Result<()>;
}

/// One ledger line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct XpEntry {
    pub user_id: String,
    pub question_id: String,
    pub outcome: Outcome,
    pub recorded_at: DateTime<Utc>,
}

/// Appends one JSON line per award to a ledger file.
#[derive(Debug, Clone)]
pub struct JsonlXpLedger {
    path: PathBuf,
}

impl JsonlXpLedger {
    /// Create a ledger at `path`. Parent directories are created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Ledger location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every entry back.
    pub async fn entries(&self) -> Result<Vec<XpEntry>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(FlowError::storage(&self.path, e)),
        };
        raw.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(FlowError::from))
            .collect()
    }
}

#[async_trait]
impl XpService for JsonlXpLedger {
    async fn award_for_completed_flow(
        &self,
        user_id: &str,
        question_id: &str,
        outcome: Outcome,
    ) -> Result<()> {
        let entry = XpEntry {
            user_id: user_id.to_string(),
            question_id: question_id.to_string(),
            outcome,
            recorded_at: Utc::now(),
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| FlowError::xp(format!("{}: {}", parent.display(), e)))?;
            }
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| FlowError::xp(format!("{}: {}", self.path.display(), e)))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| FlowError::xp(format!("{}: {}", self.path.display(), e)))?;

        tracing::info!(user_id, question_id, %outcome, "xp notified");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_ledger_appends_lines() {
        let dir = TempDir::new().unwrap();
        let ledger = JsonlXpLedger::new(dir.path().join("nested/xp.jsonl"));

        assert!(ledger.entries().await.unwrap().is_empty());

        ledger
            .award_for_completed_flow("42", "1", Outcome::Correct)
            .await
            .unwrap();
        ledger
            .award_for_completed_flow("42", "2", Outcome::Unanswered)
            .await
            .unwrap();

        let entries = ledger.entries().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].question_id, "1");
        assert_eq!(entries[0].outcome, Outcome::Correct);
        assert_eq!(entries[1].outcome, Outcome::Unanswered);
    }

    #[tokio::test]
    async fn test_unwritable_ledger_is_xp_error() {
        let dir = TempDir::new().unwrap();
        // A directory where the ledger file should be
        let path = dir.path().join("xp.jsonl");
        std::fs::create_dir(&path).unwrap();

        let result = JsonlXpLedger::new(&path)
            .award_for_completed_flow("1", "1", Outcome::Incorrect)
            .await;
        assert!(matches!(result, Err(FlowError::Xp { .. })));
    }
}
