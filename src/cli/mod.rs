//! CLI commands for mentorgate.
//!
//! - **status**: cooldown check for one user, question and mode
//! - **run**: headless pass through the whole guided flow
//! - **resume**: flows left mid-way
//! - **config**: effective configuration

pub mod config_cmd;
pub mod resume;
pub mod run;
pub mod status;

pub use config_cmd::{ConfigCommand, ConfigOptions, ConfigOutput};
pub use resume::{ResumeCommand, ResumeOptions, ResumeOutput, ResumeSummary};
pub use run::{RunCommand, RunOptions, RunOutput};
pub use status::{StatusCommand, StatusOptions, StatusOutput};

use crate::error::{exit_codes, FlowError};

/// Process exit code for a failed command.
pub fn exit_code_for(err: &FlowError) -> i32 {
    match err {
        FlowError::CooldownActive { .. } => exit_codes::COOLDOWN_ACTIVE,
        FlowError::CooldownUnavailable { .. } => exit_codes::UNAVAILABLE,
        _ => exit_codes::ERROR,
    }
}
