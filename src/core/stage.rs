//! Stage graph and flow session types.
//!
//! A flow walks `begin -> question-presented -> outcome-analysis ->
//! conclusion`. The only backward edge is `outcome-analysis ->
//! question-presented`, and it is only open while the selection is still
//! provisional.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};

/// How the learner is attempting the question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlowMode {
    /// Narrated, mentor-style walkthrough.
    MentorGuided,
    /// Exam conditions; selections are final.
    TimedExam,
}

impl FlowMode {
    /// Stable string form, used in storage keys and CLI arguments.
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowMode::MentorGuided => "mentor-guided",
            FlowMode::TimedExam => "timed-exam",
        }
    }
}

impl fmt::Display for FlowMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlowMode {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mentor-guided" | "mentor" => Ok(FlowMode::MentorGuided),
            "timed-exam" | "exam" => Ok(FlowMode::TimedExam),
            other => Err(FlowError::config(format!("unknown flow mode: {}", other))),
        }
    }
}

/// One step of the guided flow.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    /// Introduction.
    #[default]
    Begin,
    /// The question and its alternatives are on screen.
    QuestionPresented,
    /// Per-alternative verdicts and explanations.
    OutcomeAnalysis,
    /// Wrap-up. Terminal.
    Conclusion,
}

impl Stage {
    /// All stages in graph order.
    pub const ALL: [Stage; 4] = [
        Stage::Begin,
        Stage::QuestionPresented,
        Stage::OutcomeAnalysis,
        Stage::Conclusion,
    ];

    /// Position along the forward chain.
    pub fn index(&self) -> usize {
        match self {
            Stage::Begin => 0,
            Stage::QuestionPresented => 1,
            Stage::OutcomeAnalysis => 2,
            Stage::Conclusion => 3,
        }
    }

    /// The next stage on the forward chain, if any.
    pub fn next(&self) -> Option<Stage> {
        Stage::ALL.get(self.index() + 1).copied()
    }

    /// Check if this is the terminal stage.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Conclusion)
    }

    /// Check if `to` is reachable from `self` in a single transition.
    ///
    /// `reconsider_open` controls the outcome-analysis backward edge.
    pub fn can_transition_to(&self, to: Stage, reconsider_open: bool) -> bool {
        if self.next() == Some(to) {
            return true;
        }
        reconsider_open && *self == Stage::OutcomeAnalysis && to == Stage::QuestionPresented
    }

    /// Stable string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Begin => "begin",
            Stage::QuestionPresented => "question-presented",
            Stage::OutcomeAnalysis => "outcome-analysis",
            Stage::Conclusion => "conclusion",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One learner's traversal of one question's guided flow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlowSession {
    /// Question being attempted.
    pub question_id: String,
    /// Learner identity.
    pub user_id: String,
    /// Attempt mode.
    pub mode: FlowMode,
    /// Current position in the stage graph.
    pub current_stage: Stage,
    /// Chosen alternative, once submitted.
    pub selected_alternative: Option<char>,
    /// Whether the question stage was left, with or without a selection.
    pub selection_submitted: bool,
    /// When the session was created.
    pub started_at: DateTime<Utc>,
    /// When the completion post-conditions ran.
    pub completed_at: Option<DateTime<Utc>>,
}

impl FlowSession {
    /// Create a new session at `begin`.
    pub fn new(
        question_id: impl Into<String>,
        user_id: impl Into<String>,
        mode: FlowMode,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            question_id: question_id.into(),
            user_id: user_id.into(),
            mode,
            current_stage: Stage::Begin,
            selected_alternative: None,
            selection_submitted: false,
            started_at,
            completed_at: None,
        }
    }

    /// Check if completion post-conditions have already run.
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Move one step forward along the chain.
    ///
    /// Leaving the question stage is only possible through
    /// [`FlowSession::submit`].
    pub fn advance(&mut self) -> Result<Stage> {
        let from = self.current_stage;
        if from == Stage::QuestionPresented {
            return Err(FlowError::invalid_state(
                "question-presented is left by submitting a selection",
            ));
        }
        let to = from.next().ok_or_else(|| {
            FlowError::invalid_state(format!("no stage follows {}", from))
        })?;
        self.move_to(to, false)?;
        Ok(to)
    }

    /// Record the selection (or its absence) and move to outcome analysis.
    pub fn submit(&mut self, selection: Option<char>) -> Result<()> {
        if self.current_stage != Stage::QuestionPresented {
            return Err(FlowError::invalid_state(format!(
                "cannot submit a selection in {}",
                self.current_stage
            )));
        }
        self.move_to(Stage::OutcomeAnalysis, false)?;
        self.selected_alternative = selection;
        self.selection_submitted = true;
        Ok(())
    }

    /// Take the backward edge, discarding the provisional selection.
    pub fn reconsider(&mut self) -> Result<()> {
        self.move_to(Stage::QuestionPresented, true)?;
        self.selected_alternative = None;
        self.selection_submitted = false;
        Ok(())
    }

    fn move_to(&mut self, to: Stage, reconsider_open: bool) -> Result<()> {
        if self.is_completed() {
            return Err(FlowError::invalid_state("session already completed"));
        }
        if !self.current_stage.can_transition_to(to, reconsider_open) {
            return Err(FlowError::invalid_state(format!(
                "cannot move from {} to {}",
                self.current_stage, to
            )));
        }
        self.current_stage = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> FlowSession {
        FlowSession::new("q-1", "u-42", FlowMode::MentorGuided, Utc::now())
    }

    #[test]
    fn test_mode_string_forms() {
        assert_eq!(FlowMode::MentorGuided.as_str(), "mentor-guided");
        assert_eq!("timed-exam".parse::<FlowMode>().unwrap(), FlowMode::TimedExam);
        assert_eq!("mentor".parse::<FlowMode>().unwrap(), FlowMode::MentorGuided);
        assert!("practice".parse::<FlowMode>().is_err());
    }

    #[test]
    fn test_mode_serializes_kebab_case() {
        let json = serde_json::to_string(&FlowMode::TimedExam).unwrap();
        assert_eq!(json, "\"timed-exam\"");
        let stage = serde_json::to_string(&Stage::OutcomeAnalysis).unwrap();
        assert_eq!(stage, "\"outcome-analysis\"");
    }

    #[test]
    fn test_forward_chain() {
        assert_eq!(Stage::Begin.next(), Some(Stage::QuestionPresented));
        assert_eq!(Stage::QuestionPresented.next(), Some(Stage::OutcomeAnalysis));
        assert_eq!(Stage::OutcomeAnalysis.next(), Some(Stage::Conclusion));
        assert_eq!(Stage::Conclusion.next(), None);
        assert!(Stage::Conclusion.is_terminal());
    }

    #[test]
    fn test_backward_edge_only_when_open() {
        assert!(!Stage::OutcomeAnalysis.can_transition_to(Stage::QuestionPresented, false));
        assert!(Stage::OutcomeAnalysis.can_transition_to(Stage::QuestionPresented, true));
        assert!(!Stage::Conclusion.can_transition_to(Stage::QuestionPresented, true));
        assert!(!Stage::Begin.can_transition_to(Stage::OutcomeAnalysis, true));
    }

    #[test]
    fn test_new_session_starts_at_begin() {
        let s = session();
        assert_eq!(s.current_stage, Stage::Begin);
        assert!(s.selected_alternative.is_none());
        assert!(!s.is_completed());
    }

    #[test]
    fn test_advance_refuses_to_skip_question() {
        let mut s = session();
        s.advance().unwrap();
        assert_eq!(s.current_stage, Stage::QuestionPresented);

        assert!(s.advance().is_err());
        assert_eq!(s.current_stage, Stage::QuestionPresented);
    }

    #[test]
    fn test_submit_outside_question_is_invalid() {
        let mut s = session();
        let err = s.submit(Some('A')).unwrap_err();
        assert!(matches!(err, FlowError::InvalidState { .. }));
        assert_eq!(s.current_stage, Stage::Begin);
        assert!(s.selected_alternative.is_none());
    }

    #[test]
    fn test_reconsider_clears_selection() {
        let mut s = session();
        s.advance().unwrap();
        s.submit(Some('C')).unwrap();
        assert_eq!(s.selected_alternative, Some('C'));

        s.reconsider().unwrap();
        assert_eq!(s.current_stage, Stage::QuestionPresented);
        assert!(s.selected_alternative.is_none());
        assert!(!s.selection_submitted);
    }

    #[test]
    fn test_reconsider_after_conclusion_is_invalid() {
        let mut s = session();
        s.advance().unwrap();
        s.submit(None).unwrap();
        s.advance().unwrap();
        assert!(s.reconsider().is_err());
        assert_eq!(s.current_stage, Stage::Conclusion);
    }

    #[test]
    fn test_completed_session_is_frozen() {
        let mut s = session();
        s.completed_at = Some(Utc::now());
        assert!(s.advance().is_err());
        assert_eq!(s.current_stage, Stage::Begin);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Advance,
            Submit(Option<char>),
            Reconsider,
        }

        fn arb_op() -> impl Strategy<Value = Op> {
            prop_oneof![
                Just(Op::Advance),
                proptest::option::of(prop::char::range('A', 'E')).prop_map(Op::Submit),
                Just(Op::Reconsider),
            ]
        }

        proptest! {
            // Stage index never decreases except through the reconsider edge,
            // and that edge always leaves the session without a selection.
            #[test]
            fn prop_stage_monotonic(ops in prop::collection::vec(arb_op(), 0..40)) {
                let mut s = FlowSession::new("q", "u", FlowMode::MentorGuided, Utc::now());
                for op in ops {
                    let before = s.current_stage;
                    let result = match op {
                        Op::Advance => s.advance().map(|_| ()),
                        Op::Submit(sel) => s.submit(sel),
                        Op::Reconsider => s.reconsider(),
                    };
                    let after = s.current_stage;

                    if result.is_err() {
                        prop_assert_eq!(before, after);
                        continue;
                    }
                    if after.index() < before.index() {
                        prop_assert_eq!(before, Stage::OutcomeAnalysis);
                        prop_assert_eq!(after, Stage::QuestionPresented);
                        prop_assert!(s.selected_alternative.is_none());
                    } else {
                        prop_assert_eq!(after.index(), before.index() + 1);
                    }
                }
            }

            // A successful transition always lands on a stage reachable in one step.
            #[test]
            fn prop_single_step(ops in prop::collection::vec(arb_op(), 0..40)) {
                let mut s = FlowSession::new("q", "u", FlowMode::TimedExam, Utc::now());
                for op in ops {
                    let before = s.current_stage;
                    let ok = match op {
                        Op::Advance => s.advance().is_ok(),
                        Op::Submit(sel) => s.submit(sel).is_ok(),
                        Op::Reconsider => s.reconsider().is_ok(),
                    };
                    if ok {
                        prop_assert!(before.can_transition_to(s.current_stage, true));
                    }
                }
            }
        }
    }
}
