//! Status command for mentorgate.
//!
//! Reports whether a learner may attempt a question in a mode right now.

use serde::{Deserialize, Serialize};

use crate::cli::exit_code_for;
use crate::core::{CooldownGuard, FlowMode};
use crate::error::{exit_codes, FlowError};

/// Options for the status command.
#[derive(Debug, Clone)]
pub struct StatusOptions {
    /// Output as JSON.
    pub json: bool,
    /// Suppress output.
    pub quiet: bool,
    /// Learner identity.
    pub user_id: String,
    /// Question identity.
    pub question_id: String,
    /// Attempt mode.
    pub mode: FlowMode,
}

/// Output format for the status command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusOutput {
    /// Whether the check itself succeeded.
    pub success: bool,
    pub user_id: String,
    pub question_id: String,
    pub mode: FlowMode,
    /// Whether a new attempt is allowed.
    pub can_attempt: bool,
    /// End of the current or last window (RFC 3339).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_at: Option<String>,
    /// Seconds left in the window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_seconds: Option<i64>,
    /// Process exit code for this result.
    pub exit_code: i32,
    /// Error message if the check failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusOutput {
    fn failure(options: &StatusOptions, err: &FlowError) -> Self {
        Self {
            success: false,
            user_id: options.user_id.clone(),
            question_id: options.question_id.clone(),
            mode: options.mode,
            can_attempt: false,
            available_at: None,
            remaining_seconds: None,
            exit_code: exit_code_for(err),
            error: Some(err.to_string()),
        }
    }
}

/// The status command implementation.
pub struct StatusCommand {
    guard: CooldownGuard,
}

impl StatusCommand {
    /// Create a new status command.
    pub fn new(guard: CooldownGuard) -> Self {
        Self { guard }
    }

    /// Run the status command.
    pub async fn run(&self, options: &StatusOptions) -> StatusOutput {
        let status = match self
            .guard
            .check_status(&options.user_id, &options.question_id, options.mode)
            .await
        {
            Ok(status) => status,
            Err(err) => return StatusOutput::failure(options, &err),
        };

        let remaining = status.remaining(self.guard.now());
        StatusOutput {
            success: true,
            user_id: options.user_id.clone(),
            question_id: options.question_id.clone(),
            mode: options.mode,
            can_attempt: status.can_attempt,
            available_at: status.available_at.map(|at| at.to_rfc3339()),
            remaining_seconds: (!status.can_attempt).then(|| remaining.num_seconds()),
            exit_code: if status.can_attempt {
                exit_codes::OK
            } else {
                exit_codes::COOLDOWN_ACTIVE
            },
            error: None,
        }
    }

    /// Format the output based on options.
    pub fn format_output(&self, output: &StatusOutput, options: &StatusOptions) -> String {
        if options.quiet {
            return String::new();
        }

        if options.json {
            serde_json::to_string_pretty(output).unwrap_or_else(|_| "{}".to_string())
        } else {
            format_human_readable(output)
        }
    }
}

fn format_human_readable(output: &StatusOutput) -> String {
    if !output.success {
        let hint = if output.exit_code == exit_codes::UNAVAILABLE {
            " (can't check right now, try again)"
        } else {
            ""
        };
        return format!(
            "Status failed: {}{}\n",
            output.error.as_deref().unwrap_or("unknown error"),
            hint
        );
    }

    let subject = format!(
        "user {} / question {} / {}",
        output.user_id, output.question_id, output.mode
    );
    if output.can_attempt {
        return format!("{}: attempt allowed\n", subject);
    }

    format!(
        "{}: cooldown active until {} ({} left)\n",
        subject,
        output.available_at.as_deref().unwrap_or("unknown"),
        format_remaining(output.remaining_seconds.unwrap_or(0))
    )
}

/// Render seconds as `1d 2h 3m` style text.
pub fn format_remaining(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3600;
    let minutes = (seconds % 3600) / 60;

    match (days, hours, minutes) {
        (0, 0, 0) => format!("{}s", seconds),
        (0, 0, m) => format!("{}m", m),
        (0, h, m) => format!("{}h {}m", h, m),
        (d, h, m) => format!("{}d {}h {}m", d, h, m),
    }
}
