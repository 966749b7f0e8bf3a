//! Outcome analysis over a question's alternatives.
//!
//! Pure and deterministic. A set with zero or several correct alternatives
//! is a data-integrity error and is never analyzed.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};

/// One selectable answer choice as authored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Alternative {
    /// Choice letter, compared case-insensitively.
    pub letter: char,
    /// Choice text.
    pub text: String,
    /// Whether this is the correct answer.
    #[serde(default)]
    pub is_correct: bool,
    /// Why the choice is right or wrong.
    #[serde(default)]
    pub explanation: String,
}

impl Alternative {
    /// Create an alternative.
    pub fn new(letter: char, text: impl Into<String>, is_correct: bool) -> Self {
        Self {
            letter,
            text: text.into(),
            is_correct,
            explanation: String::new(),
        }
    }

    /// Attach an explanation.
    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = explanation.into();
        self
    }
}

/// One row of the outcome analysis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AlternativeVerdict {
    pub letter: char,
    pub text: String,
    pub is_correct: bool,
    pub explanation: String,
    pub was_selected: bool,
}

/// Overall result of the learner's submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Correct,
    Incorrect,
    Unanswered,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Outcome::Correct => "correct",
            Outcome::Incorrect => "incorrect",
            Outcome::Unanswered => "unanswered",
        })
    }
}

/// Verdicts in authored order plus the derived outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutcomeAnalysis {
    pub verdicts: Vec<AlternativeVerdict>,
    pub outcome: Outcome,
}

impl OutcomeAnalysis {
    /// The single correct verdict.
    pub fn correct(&self) -> Option<&AlternativeVerdict> {
        self.verdicts.iter().find(|v| v.is_correct)
    }

    /// The selected verdict, if the learner chose one.
    pub fn selected(&self) -> Option<&AlternativeVerdict> {
        self.verdicts.iter().find(|v| v.was_selected)
    }
}

/// Produces per-alternative verdicts for a submission.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlternativeAnalyzer;

impl AlternativeAnalyzer {
    /// Check the set is analyzable and return the correct letter.
    pub fn validate(alternatives: &[Alternative]) -> Result<char> {
        let mut seen = HashSet::new();
        for alt in alternatives {
            if !seen.insert(normalize(alt.letter)) {
                return Err(FlowError::malformed_alternatives(format!(
                    "duplicate letter {}",
                    normalize(alt.letter)
                )));
            }
        }

        let mut correct = alternatives.iter().filter(|a| a.is_correct);
        match (correct.next(), correct.next()) {
            (Some(only), None) => Ok(normalize(only.letter)),
            (None, _) => Err(FlowError::malformed_alternatives(format!(
                "no correct alternative among {}",
                alternatives.len()
            ))),
            (Some(_), Some(_)) => Err(FlowError::malformed_alternatives(format!(
                "{} alternatives marked correct",
                alternatives.iter().filter(|a| a.is_correct).count()
            ))),
        }
    }

    /// Analyze a submission against the alternative set.
    ///
    /// `selected` of `None` yields an `Unanswered` outcome with no row
    /// marked as selected.
    pub fn analyze(alternatives: &[Alternative], selected: Option<char>) -> Result<OutcomeAnalysis> {
        let correct_letter = Self::validate(alternatives)?;
        let selected = selected.map(normalize);

        if let Some(letter) = selected {
            if !alternatives.iter().any(|a| normalize(a.letter) == letter) {
                return Err(FlowError::UnknownAlternative { letter });
            }
        }

        let verdicts = alternatives
            .iter()
            .map(|alt| {
                let letter = normalize(alt.letter);
                AlternativeVerdict {
                    letter,
                    text: alt.text.clone(),
                    is_correct: alt.is_correct,
                    explanation: alt.explanation.clone(),
                    was_selected: selected == Some(letter),
                }
            })
            .collect();

        let outcome = match selected {
            None => Outcome::Unanswered,
            Some(letter) if letter == correct_letter => Outcome::Correct,
            Some(_) => Outcome::Incorrect,
        };

        Ok(OutcomeAnalysis { verdicts, outcome })
    }
}

/// Canonical letter form.
pub fn normalize(letter: char) -> char {
    letter.to_ascii_uppercase()
}
