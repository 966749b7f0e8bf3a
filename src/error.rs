//! Unified error types for mentorgate.
//!
//! Attempt gating fails closed: when the cooldown store cannot be reached the
//! attempt is denied, never waved through. Side effects that do not guard
//! correctness (resume records, XP notifications) are best-effort and go
//! through [`BestEffort`] instead of propagating.

use std::io;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// The main error type for mentorgate operations.
#[derive(Error, Debug)]
pub enum FlowError {
    /// I/O errors from file-backed stores and providers.
    #[error("storage error at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// JSON or TOML serialization errors.
    #[error("serialization error: {message}")]
    Serde { message: String },

    /// Configuration loading errors.
    #[error("config error: {message}")]
    Config { message: String },

    /// Operation requested from a stage or state where it is not legal.
    #[error("invalid state: {message}")]
    InvalidState { message: String },

    /// The learner is still inside a cooldown window for this question and mode.
    #[error("cooldown active until {available_at}")]
    CooldownActive { available_at: DateTime<Utc> },

    /// The cooldown store could not be read or written.
    #[error("cooldown store unavailable: {message}")]
    CooldownUnavailable { message: String },

    /// Source data has zero or more than one correct alternative.
    #[error("malformed alternative set: {message}")]
    MalformedAlternativeSet { message: String },

    /// A selection that names no alternative in the set.
    #[error("unknown alternative: {letter}")]
    UnknownAlternative { letter: char },

    /// Another transition on the same controller has not resolved yet.
    #[error("a transition is already in flight")]
    TransitionPending,

    /// The session was discarded while an asynchronous step was pending.
    #[error("flow was abandoned before the operation resolved")]
    Cancelled,

    /// Content provider failures.
    #[error("content error: {message}")]
    Content { message: String },

    /// XP service failures.
    #[error("xp service error: {message}")]
    Xp { message: String },
}

/// A specialized Result type for mentorgate operations.
pub type Result<T> = std::result::Result<T, FlowError>;

impl FlowError {
    /// Create a storage error from an I/O error.
    pub fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    /// Create a serialization error.
    pub fn serde(message: impl Into<String>) -> Self {
        Self::Serde {
            message: message.into(),
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create a cooldown-active error.
    pub fn cooldown_active(available_at: DateTime<Utc>) -> Self {
        Self::CooldownActive { available_at }
    }

    /// Create a cooldown-unavailable error.
    pub fn cooldown_unavailable(message: impl Into<String>) -> Self {
        Self::CooldownUnavailable {
            message: message.into(),
        }
    }

    /// Create a malformed alternative set error.
    pub fn malformed_alternatives(message: impl Into<String>) -> Self {
        Self::MalformedAlternativeSet {
            message: message.into(),
        }
    }

    /// Create a content error.
    pub fn content(message: impl Into<String>) -> Self {
        Self::Content {
            message: message.into(),
        }
    }

    /// Create an XP service error.
    pub fn xp(message: impl Into<String>) -> Self {
        Self::Xp {
            message: message.into(),
        }
    }

    /// Check whether the caller should offer a "try again" action.
    ///
    /// Infrastructure failures are retryable; state, data-integrity and
    /// cooldown denials are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Storage { .. }
                | Self::CooldownUnavailable { .. }
                | Self::Content { .. }
                | Self::Xp { .. }
                | Self::TransitionPending
        )
    }
}

impl From<io::Error> for FlowError {
    fn from(err: io::Error) -> Self {
        Self::Storage {
            path: PathBuf::new(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serde {
            message: err.to_string(),
        }
    }
}

/// Best-effort handling for side effects that must not abort a flow.
///
/// Logs the failure and hands back a fallback. Never use this on the
/// cooldown path.
pub trait BestEffort<T> {
    /// Log a warning and return the default value on error.
    fn best_effort_default(self, context: &str) -> T
    where
        T: Default;

    /// Log a warning and return the provided fallback on error.
    fn best_effort_with(self, context: &str, fallback: T) -> T;
}

impl<T> BestEffort<T> for Result<T> {
    fn best_effort_default(self, context: &str) -> T
    where
        T: Default,
    {
        match self {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(error = %err, "{} failed (continuing)", context);
                T::default()
            }
        }
    }

    fn best_effort_with(self, context: &str, fallback: T) -> T {
        match self {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(error = %err, "{} failed (using fallback)", context);
                fallback
            }
        }
    }
}

/// Exit codes for the mentorgate CLI.
pub mod exit_codes {
    /// Command succeeded.
    pub const OK: i32 = 0;

    /// Command failed for a non-gating reason.
    pub const ERROR: i32 = 1;

    /// Attempt denied because a cooldown window is active.
    pub const COOLDOWN_ACTIVE: i32 = 2;

    /// Attempt denied because the cooldown store could not be reached.
    pub const UNAVAILABLE: i32 = 3;
}
