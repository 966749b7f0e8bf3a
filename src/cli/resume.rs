//! Resume command for mentorgate.
//!
//! Lists flows that were left mid-way, most recent first.

use serde::{Deserialize, Serialize};

use crate::core::ResumeRecord;
use crate::storage::ResumeStore;

/// Options for the resume command.
#[derive(Debug, Clone, Default)]
pub struct ResumeOptions {
    /// Output as JSON.
    pub json: bool,
    /// Suppress output.
    pub quiet: bool,
    /// Maximum number of records to show.
    pub limit: usize,
}

/// Summary of one saved flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeSummary {
    pub user_id: String,
    pub question_id: String,
    pub mode: String,
    pub stage: String,
    /// Stages whose narration already played.
    pub narrated_stages: Vec<String>,
    /// Last updated timestamp (RFC 3339).
    pub updated_at: String,
}

impl From<&ResumeRecord> for ResumeSummary {
    fn from(record: &ResumeRecord) -> Self {
        Self {
            user_id: record.user_id.clone(),
            question_id: record.question_id.clone(),
            mode: record.mode.to_string(),
            stage: record.current_stage.to_string(),
            narrated_stages: record
                .narrated_stages
                .iter()
                .map(|s| s.to_string())
                .collect(),
            updated_at: record.updated_at.to_rfc3339(),
        }
    }
}

/// Output format for the resume command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeOutput {
    /// Whether the command was successful.
    pub success: bool,
    pub records: Vec<ResumeSummary>,
    pub count: usize,
    /// Error message if command failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResumeOutput {
    /// Create a successful output.
    pub fn success(records: Vec<ResumeSummary>) -> Self {
        let count = records.len();
        Self {
            success: true,
            records,
            count,
            error: None,
        }
    }

    /// Create a failed output.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            records: vec![],
            count: 0,
            error: Some(error.into()),
        }
    }

    /// Format as human-readable text.
    pub fn format_text(&self) -> String {
        if !self.success {
            return format!(
                "Resume failed: {}",
                self.error.as_deref().unwrap_or("unknown error")
            );
        }

        if self.records.is_empty() {
            return "No flows in progress.".to_string();
        }

        let mut lines = vec![format!("Flows in progress ({} found):", self.count)];
        lines.push(String::new());
        lines.push(format!(
            "{:<12}  {:<12}  {:<14}  {:<18}  {}",
            "USER", "QUESTION", "MODE", "STAGE", "UPDATED"
        ));
        lines.push("-".repeat(80));

        for record in &self.records {
            let updated: String = record.updated_at.chars().take(19).collect();
            lines.push(format!(
                "{:<12}  {:<12}  {:<14}  {:<18}  {}",
                record.user_id, record.question_id, record.mode, record.stage, updated
            ));
        }

        lines.join("\n")
    }
}

/// The resume command implementation.
pub struct ResumeCommand<S: ResumeStore> {
    store: S,
}

impl<S: ResumeStore> ResumeCommand<S> {
    /// Create a new resume command.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Run the resume command.
    pub async fn run(&self, options: &ResumeOptions) -> ResumeOutput {
        match self.store.list(options.limit).await {
            Ok(records) => {
                ResumeOutput::success(records.iter().map(ResumeSummary::from).collect())
            }
            Err(e) => ResumeOutput::failure(format!("Failed to list resume records: {}", e)),
        }
    }

    /// Format the output based on options.
    pub fn format_output(&self, output: &ResumeOutput, options: &ResumeOptions) -> String {
        if options.quiet {
            return String::new();
        }
        if options.json {
            serde_json::to_string_pretty(output).unwrap_or_else(|_| "{}".to_string())
        } else {
            output.format_text()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FlowMode, Stage};
    use crate::storage::MemoryStore;
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    fn record(question: &str, age_secs: i64) -> ResumeRecord {
        ResumeRecord {
            user_id: "42".into(),
            question_id: question.into(),
            mode: FlowMode::TimedExam,
            current_stage: Stage::QuestionPresented,
            narrated_stages: vec![Stage::Begin],
            selected_alternative: None,
            updated_at: Utc::now() - Duration::seconds(age_secs),
        }
    }

    fn options(limit: usize) -> ResumeOptions {
        ResumeOptions {
            limit,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_resume_empty() {
        let cmd = ResumeCommand::new(Arc::new(MemoryStore::new()));
        let output = cmd.run(&options(10)).await;

        assert!(output.success);
        assert_eq!(output.count, 0);
        assert!(output.format_text().contains("No flows in progress"));
    }

    #[tokio::test]
    async fn test_resume_lists_newest_first_with_limit() {
        let store = Arc::new(MemoryStore::new());
        for (i, question) in ["a", "b", "c"].iter().enumerate() {
            store.save(&record(question, i as i64 * 10)).await.unwrap();
        }

        let cmd = ResumeCommand::new(store);
        let output = cmd.run(&options(2)).await;
        assert!(output.success);
        assert_eq!(output.count, 2);
        assert_eq!(output.records[0].question_id, "a");
        assert_eq!(output.records[1].question_id, "b");
    }

    #[tokio::test]
    async fn test_resume_store_failure() {
        let store = Arc::new(MemoryStore::new());
        store.set_unavailable(true);

        let output = ResumeCommand::new(store).run(&options(5)).await;
        assert!(!output.success);
        assert!(output.format_text().contains("Resume failed"));
    }

    #[test]
    fn test_summary_from_record() {
        let summary = ResumeSummary::from(&record("q-1", 0));
        assert_eq!(summary.mode, "timed-exam");
        assert_eq!(summary.stage, "question-presented");
        assert_eq!(summary.narrated_stages, vec!["begin"]);
    }

    #[test]
    fn test_format_text_table() {
        let output = ResumeOutput::success(vec![ResumeSummary::from(&record("q-7", 0))]);
        let text = output.format_text();
        assert!(text.contains("q-7"));
        assert!(text.contains("question-presented"));
    }
}
