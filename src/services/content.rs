//! Per-question flow content.
//!
//! The controller asks for content once per session and keeps the result;
//! providers do not need to cache.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{Alternative, Stage};
use crate::error::{FlowError, Result};

/// Reference to one narration clip.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClipRef {
    pub id: String,
    /// Where the audio lives. Opaque to the core.
    #[serde(default)]
    pub src: String,
    /// Nominal length, used by the simulated player.
    #[serde(default)]
    pub duration_ms: u64,
}

impl ClipRef {
    /// Create a clip reference.
    pub fn new(id: impl Into<String>, src: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            id: id.into(),
            src: src.into(),
            duration_ms,
        }
    }
}

/// Text and narration for one stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageContent {
    pub stage: Stage,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub narration: Vec<ClipRef>,
    /// Overrides `narration.mandatory_by_default` when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narration_mandatory: Option<bool>,
}

impl StageContent {
    /// Whether this stage declares any narration.
    pub fn has_narration(&self) -> bool {
        !self.narration.is_empty()
    }
}

/// Everything the flow needs for one question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlowContent {
    pub question_id: String,
    #[serde(default)]
    pub stages: Vec<StageContent>,
    pub alternatives: Vec<Alternative>,
}

impl FlowContent {
    /// Content for a stage, if authored.
    pub fn stage(&self, stage: Stage) -> Option<&StageContent> {
        self.stages.iter().find(|s| s.stage == stage)
    }
}

/// Source of flow content.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Fetch the content for a question.
    async fn flow_content(&self, question_id: &str) -> Result<FlowContent>;
}

/// Reads `<dir>/<question_id>.json`.
#[derive(Debug, Clone)]
pub struct JsonContentProvider {
    dir: PathBuf,
}

impl JsonContentProvider {
    /// Create a provider over a content directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Content directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, question_id: &str) -> Result<PathBuf> {
        let valid = !question_id.is_empty()
            && question_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(FlowError::content(format!(
                "invalid question id: {:?}",
                question_id
            )));
        }
        Ok(self.dir.join(format!("{}.json", question_id)))
    }
}

#[async_trait]
impl ContentProvider for JsonContentProvider {
    async fn flow_content(&self, question_id: &str) -> Result<FlowContent> {
        let path = self.path_for(question_id)?;
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(FlowError::content(format!(
                    "no content for question {}",
                    question_id
                )));
            }
            Err(e) => return Err(FlowError::storage(&path, e)),
        };

        let content: FlowContent = serde_json::from_str(&raw)?;
        if content.question_id != question_id {
            return Err(FlowError::content(format!(
                "{} holds content for question {}",
                path.display(),
                content.question_id
            )));
        }
        tracing::debug!(question_id, stages = content.stages.len(), "content loaded");
        Ok(content)
    }
}

/// Fixed content held in memory.
#[derive(Debug, Default)]
pub struct MemoryContentProvider {
    items: RwLock<HashMap<String, FlowContent>>,
}

impl MemoryContentProvider {
    /// Create an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace content.
    pub fn insert(&self, content: FlowContent) {
        let mut items = self.items.write().unwrap_or_else(|e| e.into_inner());
        items.insert(content.question_id.clone(), content);
    }
}

#[async_trait]
impl ContentProvider for MemoryContentProvider {
    async fn flow_content(&self, question_id: &str) -> Result<FlowContent> {
        let items = self.items.read().unwrap_or_else(|e| e.into_inner());
        items
            .get(question_id)
            .cloned()
            .ok_or_else(|| FlowError::content(format!("no content for question {}", question_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> FlowContent {
        FlowContent {
            question_id: "1".into(),
            stages: vec![StageContent {
                stage: Stage::Begin,
                title: "Intro".into(),
                body: String::new(),
                narration: vec![ClipRef::new("intro-1", "intro-1.mp3", 10)],
                narration_mandatory: None,
            }],
            alternatives: vec![
                Alternative::new('A', "Aspirin", true),
                Alternative::new('B', "Heparin", false),
            ],
        }
    }

    #[test]
    fn test_stage_lookup() {
        let content = sample();
        assert!(content.stage(Stage::Begin).unwrap().has_narration());
        assert!(content.stage(Stage::Conclusion).is_none());
    }

    #[tokio::test]
    async fn test_json_provider_reads_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("1.json"),
            serde_json::to_string(&sample()).unwrap(),
        )
        .unwrap();

        let provider = JsonContentProvider::new(dir.path());
        let content = provider.flow_content("1").await.unwrap();
        assert_eq!(content, sample());
    }

    #[tokio::test]
    async fn test_json_provider_minimal_document() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("7.json"),
            r#"{"question_id":"7","alternatives":[{"letter":"A","text":"x","is_correct":true}]}"#,
        )
        .unwrap();

        let content = JsonContentProvider::new(dir.path())
            .flow_content("7")
            .await
            .unwrap();
        assert!(content.stages.is_empty());
        assert_eq!(content.alternatives.len(), 1);
    }

    #[tokio::test]
    async fn test_json_provider_missing_and_invalid_ids() {
        let dir = TempDir::new().unwrap();
        let provider = JsonContentProvider::new(dir.path());

        assert!(matches!(
            provider.flow_content("404").await,
            Err(FlowError::Content { .. })
        ));
        assert!(matches!(
            provider.flow_content("../etc/passwd").await,
            Err(FlowError::Content { .. })
        ));
    }

    #[tokio::test]
    async fn test_json_provider_rejects_mismatched_id() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("2.json"),
            serde_json::to_string(&sample()).unwrap(),
        )
        .unwrap();

        let result = JsonContentProvider::new(dir.path()).flow_content("2").await;
        assert!(matches!(result, Err(FlowError::Content { .. })));
    }

    #[tokio::test]
    async fn test_memory_provider() {
        let provider = MemoryContentProvider::new();
        assert!(provider.flow_content("1").await.is_err());

        provider.insert(sample());
        assert_eq!(provider.flow_content("1").await.unwrap().alternatives.len(), 2);
    }
}
