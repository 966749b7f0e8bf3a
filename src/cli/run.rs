//! Run command for mentorgate.
//!
//! Drives one question through the whole flow without a UI: narration is
//! played by the injected clip player, the scripted answer is submitted at
//! the question stage, and the flow is completed at the conclusion.

use serde::{Deserialize, Serialize};

use crate::cli::exit_code_for;
use crate::core::{
    Advance, AlternativeVerdict, Completion, FlowController, FlowMode, NarrationProgress, Outcome,
    Stage,
};
use crate::error::{exit_codes, FlowError, Result};

/// Options for the run command.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Output as JSON.
    pub json: bool,
    /// Suppress output.
    pub quiet: bool,
    pub user_id: String,
    pub question_id: String,
    pub mode: FlowMode,
    /// Alternative to submit; `None` submits without a selection.
    pub answer: Option<char>,
}

/// Output format for the run command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutput {
    /// Whether the flow reached a recorded completion.
    pub success: bool,
    pub user_id: String,
    pub question_id: String,
    pub mode: FlowMode,
    /// Whether the flow picked up a saved record.
    pub resumed: bool,
    /// What happened, in order.
    pub steps: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub verdicts: Vec<AlternativeVerdict>,
    /// When the question can be attempted again (RFC 3339).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_at: Option<String>,
    pub exit_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunOutput {
    fn new(options: &RunOptions) -> Self {
        Self {
            success: false,
            user_id: options.user_id.clone(),
            question_id: options.question_id.clone(),
            mode: options.mode,
            resumed: false,
            steps: Vec::new(),
            outcome: None,
            verdicts: Vec::new(),
            available_at: None,
            exit_code: exit_codes::ERROR,
            error: None,
        }
    }

    fn fail(&mut self, err: &FlowError) {
        self.success = false;
        self.exit_code = exit_code_for(err);
        self.error = Some(err.to_string());
    }

    /// Format as human-readable text.
    pub fn format_text(&self) -> String {
        let mut lines = vec![format!(
            "Flow for user {} / question {} ({}){}",
            self.user_id,
            self.question_id,
            self.mode,
            if self.resumed { ", resumed" } else { "" }
        )];
        for step in &self.steps {
            lines.push(format!("  - {}", step));
        }

        if !self.verdicts.is_empty() {
            lines.push(String::new());
            for verdict in &self.verdicts {
                let mark = match (verdict.is_correct, verdict.was_selected) {
                    (true, true) => "[x] correct",
                    (true, false) => "[ ] correct",
                    (false, true) => "[x] wrong",
                    (false, false) => "[ ]",
                };
                lines.push(format!("  {}) {} {}", verdict.letter, verdict.text, mark));
                if !verdict.explanation.is_empty() {
                    lines.push(format!("     {}", verdict.explanation));
                }
            }
        }

        lines.push(String::new());
        match (&self.error, self.outcome) {
            (Some(error), _) => lines.push(format!("Run failed: {}", error)),
            (None, Some(outcome)) => lines.push(format!(
                "Outcome: {}. Next attempt available at {}",
                outcome,
                self.available_at.as_deref().unwrap_or("unknown")
            )),
            (None, None) => lines.push("Flow already completed.".to_string()),
        }
        lines.join("\n")
    }
}

/// The run command implementation.
pub struct RunCommand {
    controller: FlowController,
}

impl RunCommand {
    /// Create a new run command around a wired controller.
    pub fn new(controller: FlowController) -> Self {
        Self { controller }
    }

    /// The wrapped controller.
    pub fn controller(&self) -> &FlowController {
        &self.controller
    }

    /// Run the command.
    pub async fn run(&self, options: &RunOptions) -> RunOutput {
        let mut output = RunOutput::new(options);
        if let Err(err) = self.drive(options, &mut output).await {
            tracing::warn!(
                user = %options.user_id,
                question = %options.question_id,
                error = %err,
                "run stopped"
            );
            output.fail(&err);
        }
        output
    }

    async fn drive(&self, options: &RunOptions, output: &mut RunOutput) -> Result<()> {
        let started = self
            .controller
            .start(&options.question_id, options.mode, &options.user_id)
            .await?;
        output.resumed = started.resumed;
        output.steps.push(format!(
            "{} at {}",
            if started.resumed { "resumed" } else { "started" },
            started.session.current_stage
        ));

        loop {
            let stage = self
                .controller
                .stage()
                .ok_or_else(|| FlowError::invalid_state("no active session"))?;
            self.narrate(stage, &mut output.steps).await?;

            let advance = match stage {
                Stage::QuestionPresented => match options.answer {
                    Some(letter) => {
                        output.steps.push(format!("selected {}", letter));
                        self.controller.submit_selection(letter).await?
                    }
                    None => {
                        output.steps.push("submitted without a selection".to_string());
                        self.controller.submit_without_selection().await?
                    }
                },
                Stage::Conclusion => return self.finish(output).await,
                _ => self.controller.request_advance().await?,
            };

            match advance {
                Advance::Moved { from, to } => {
                    output.steps.push(format!("{} -> {}", from, to));
                }
                Advance::Blocked { reason } => {
                    return Err(FlowError::invalid_state(format!(
                        "{} is blocked: {:?}",
                        stage, reason
                    )));
                }
            }
        }
    }

    async fn finish(&self, output: &mut RunOutput) -> Result<()> {
        if let Some(analysis) = self.controller.analysis() {
            output.verdicts = analysis.verdicts;
        }

        match self.controller.complete().await? {
            Completion::Recorded {
                outcome,
                available_at,
            } => {
                output.steps.push("completed".to_string());
                output.outcome = Some(outcome);
                output.available_at = Some(available_at.to_rfc3339());
            }
            Completion::AlreadyCompleted => {
                output.steps.push("already completed".to_string());
            }
            Completion::Blocked { reason } => {
                return Err(FlowError::invalid_state(format!(
                    "completion is blocked: {:?}",
                    reason
                )));
            }
        }
        output.success = true;
        output.exit_code = exit_codes::OK;
        Ok(())
    }

    /// Play the stage's narration to the point where the gate opens.
    ///
    /// A blocked autoplay gets one manual play. A failed clip gets one retry,
    /// then a skip when the stage allows it.
    async fn narrate(&self, stage: Stage, steps: &mut Vec<String>) -> Result<()> {
        match self.controller.narration_status() {
            None => return Ok(()),
            Some(status) if status.may_continue() => return Ok(()),
            Some(_) => {}
        }

        let mut progress = self.controller.play_narration().await?;
        let mut played_manually = false;
        let mut retried = false;

        loop {
            progress = match progress {
                NarrationProgress::Completed => {
                    steps.push(format!("{} narration completed", stage));
                    return Ok(());
                }
                NarrationProgress::ManualPlayRequired if !played_manually => {
                    played_manually = true;
                    steps.push(format!("{} narration needs a manual play", stage));
                    self.controller.manual_play().await?
                }
                NarrationProgress::ManualPlayRequired => {
                    return Err(FlowError::invalid_state(format!(
                        "{} narration still needs a manual play",
                        stage
                    )));
                }
                NarrationProgress::Failed { index, reason } if !retried => {
                    retried = true;
                    steps.push(format!("{} clip {} failed ({}), retrying", stage, index, reason));
                    self.controller.retry_narration().await?
                }
                NarrationProgress::Failed { index, reason } => {
                    if self.controller.skip_narration().is_err() {
                        return Err(FlowError::invalid_state(format!(
                            "{} narration clip {} failed: {}",
                            stage, index, reason
                        )));
                    }
                    steps.push(format!("{} narration skipped", stage));
                    return Ok(());
                }
                NarrationProgress::Cancelled => return Err(FlowError::Cancelled),
                NarrationProgress::Busy => {
                    return Err(FlowError::invalid_state(format!(
                        "{} narration is already playing",
                        stage
                    )));
                }
            };
        }
    }

    /// Format the output based on options.
    pub fn format_output(&self, output: &RunOutput, options: &RunOptions) -> String {
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
