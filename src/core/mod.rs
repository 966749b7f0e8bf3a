//! Core types and logic for mentorgate.
//!
//! This module contains the stage graph, the narration gate, outcome
//! analysis, cooldown gating and the flow controller that ties them together.

pub mod analysis;
pub mod clock;
pub mod controller;
pub mod cooldown;
pub mod narration;
pub mod resume;
pub mod stage;

pub use analysis::{
    normalize, Alternative, AlternativeAnalyzer, AlternativeVerdict, Outcome, OutcomeAnalysis,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use controller::{Advance, BlockReason, Completion, FlowController, FlowPorts, Started};
pub use cooldown::{CooldownGuard, CooldownKey, CooldownRecord, CooldownStatus};
pub use narration::{
    ClipState, NarrationGate, NarrationProgress, NarrationSequence, NarrationStatus,
};
pub use resume::ResumeRecord;
pub use stage::{FlowMode, FlowSession, Stage};
