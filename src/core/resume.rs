//! Lightweight record that lets a reloaded flow pick up where it left off.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::stage::{FlowMode, Stage};

/// Where a learner was in a flow, keyed per user and question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResumeRecord {
    pub user_id: String,
    pub question_id: String,
    pub mode: FlowMode,
    pub current_stage: Stage,
    /// Stages whose narration already played to the end.
    #[serde(default)]
    pub narrated_stages: Vec<Stage>,
    #[serde(default)]
    pub selected_alternative: Option<char>,
    pub updated_at: DateTime<Utc>,
}

impl ResumeRecord {
    /// Flat key used by stores: `user:question`.
    pub fn storage_key(&self) -> String {
        resume_key(&self.user_id, &self.question_id)
    }

    /// Whether the record was saved for this user and question.
    pub fn belongs_to(&self, user_id: &str, question_id: &str) -> bool {
        self.user_id == user_id && self.question_id == question_id
    }
}

/// Flat resume key for a user and question.
pub fn resume_key(user_id: &str, question_id: &str) -> String {
    format!("{}:{}", escape_key_part(user_id), escape_key_part(question_id))
}

/// Escape `%` and `:` so joined keys stay unambiguous.
pub fn escape_key_part(part: &str) -> String {
    part.replace('%', "%25").replace(':', "%3A")
}
