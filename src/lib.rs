//! mentorgate - guided question flow and attempt gating
//!
//! Walks a learner through a narrated, multi-stage pass over one question,
//! holds each stage until its narration has played, analyzes the submitted
//! answer, and enforces a per-mode cooldown before the same question can be
//! attempted again.

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod services;
pub mod storage;

pub use config::Config;
pub use core::{
    Advance, AlternativeAnalyzer, BlockReason, Completion, CooldownGuard, FlowController,
    FlowMode, FlowPorts, FlowSession, NarrationGate, Stage,
};
pub use error::{FlowError, Result};
pub use services::{ClipPlayer, ContentProvider, XpService};
pub use storage::{CooldownStore, FileStore, MemoryStore, ResumeStore};

// CLI commands
pub use cli::{ConfigCommand, ResumeCommand, RunCommand, StatusCommand};
