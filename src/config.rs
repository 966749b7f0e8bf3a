//! Configuration loading for mentorgate.
//!
//! Configuration follows a precedence chain:
//! 1. Environment variables (highest priority)
//! 2. Project config (`.mentorgate/config.toml`)
//! 3. User config (`~/.mentorgate/config.toml`)
//! 4. Defaults (lowest priority)
//!
//! Cooldown durations live here rather than in the gating logic so policy
//! changes never touch [`crate::core::CooldownGuard`].

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::FlowMode;
use crate::error::{FlowError, Result};

/// Main configuration struct for mentorgate.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Per-mode cooldown windows.
    pub cooldown: CooldownConfig,
    /// Stage graph policy.
    pub flow: FlowConfig,
    /// Narration playback policy.
    pub narration: NarrationConfig,
}

/// Mode to cooldown-duration mapping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CooldownConfig {
    /// Window after a mentor-guided attempt, in seconds.
    pub mentor_guided_seconds: u64,
    /// Window after a timed-exam attempt, in seconds.
    pub timed_exam_seconds: u64,
}

/// Minimum valid cooldown window. Keeps `available_at` strictly after
/// `last_attempt_at`.
pub const MIN_COOLDOWN_SECONDS: u64 = 1;

/// Maximum valid cooldown window: 100 years. Keeps `available_at`
/// representable.
pub const MAX_COOLDOWN_SECONDS: u64 = 100 * 365 * 24 * 60 * 60;

impl CooldownConfig {
    /// Check if a cooldown value is within `MIN..=MAX_COOLDOWN_SECONDS`.
    pub fn is_valid_seconds(value: u64) -> bool {
        (MIN_COOLDOWN_SECONDS..=MAX_COOLDOWN_SECONDS).contains(&value)
    }

    /// Cooldown window for the given mode.
    pub fn duration_for(&self, mode: FlowMode) -> Duration {
        let seconds = match mode {
            FlowMode::MentorGuided => self.mentor_guided_seconds,
            FlowMode::TimedExam => self.timed_exam_seconds,
        };
        Duration::from_secs(seconds.max(MIN_COOLDOWN_SECONDS))
    }
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            mentor_guided_seconds: 24 * 60 * 60,
            timed_exam_seconds: 7 * 24 * 60 * 60,
        }
    }
}

/// Stage graph policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FlowConfig {
    /// Whether a mentor-guided learner may step back from the outcome
    /// analysis to the question.
    pub allow_reconsider: bool,
    /// Whether in-progress flows are resumed from the resume store.
    pub resume_enabled: bool,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            allow_reconsider: false,
            resume_enabled: true,
        }
    }
}

/// Narration playback policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NarrationConfig {
    /// Attempt automatic playback on stage entry.
    pub autoplay: bool,
    /// Narration gates advancement unless stage content says otherwise.
    pub mandatory_by_default: bool,
}

impl Default for NarrationConfig {
    fn default() -> Self {
        Self {
            autoplay: true,
            mandatory_by_default: true,
        }
    }
}

impl Config {
    /// Load configuration with full precedence chain.
    pub fn load() -> Self {
        match env::current_dir() {
            Ok(cwd) => Self::load_from_cwd(&cwd),
            Err(_) => {
                let mut config = Config::default();
                if let Some(user_config) = Self::load_user_config() {
                    config = config.merge(user_config);
                }
                config.apply_env_overrides();
                config
            }
        }
    }

    /// Load configuration with a specific working directory.
    pub fn load_from_cwd(cwd: &Path) -> Self {
        let mut config = Config::default();

        if let Some(user_config) = Self::load_user_config() {
            config = config.merge(user_config);
        }

        if let Some(project_config) = Self::load_project_config(cwd) {
            config = config.merge(project_config);
        }

        config.apply_env_overrides();

        config
    }

    /// Load user config from `~/.mentorgate/config.toml`.
    fn load_user_config() -> Option<Config> {
        let home = mentorgate_home()?;
        Self::load_optional(&home.join("config.toml"))
    }

    /// Load project config from `.mentorgate/config.toml` in the given directory.
    fn load_project_config(cwd: &Path) -> Option<Config> {
        Self::load_optional(&cwd.join(".mentorgate").join("config.toml"))
    }

    /// Load a config layer, warning when a present file cannot be parsed.
    fn load_optional(path: &Path) -> Option<Config> {
        if !path.exists() {
            return None;
        }
        match Self::load_from_file(path) {
            Ok(config) => Some(config),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "ignoring unreadable config");
                None
            }
        }
    }

    /// Load config from a specific file path.
    pub fn load_from_file(path: &Path) -> Result<Config> {
        let content = fs::read_to_string(path).map_err(|e| FlowError::storage(path, e))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| FlowError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the gating logic cannot honor.
    pub fn validate(&self) -> Result<()> {
        let windows = [
            ("mentor_guided_seconds", self.cooldown.mentor_guided_seconds),
            ("timed_exam_seconds", self.cooldown.timed_exam_seconds),
        ];
        for (name, value) in windows {
            if !CooldownConfig::is_valid_seconds(value) {
                return Err(FlowError::config(format!(
                    "cooldown.{} must be between {} and {}, got {}",
                    name, MIN_COOLDOWN_SECONDS, MAX_COOLDOWN_SECONDS, value
                )));
            }
        }
        Ok(())
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Some(n) = env_seconds(
            "MENTORGATE_MENTOR_COOLDOWN_SECONDS",
            self.cooldown.mentor_guided_seconds,
        ) {
            self.cooldown.mentor_guided_seconds = n;
        }

        if let Some(n) = env_seconds(
            "MENTORGATE_EXAM_COOLDOWN_SECONDS",
            self.cooldown.timed_exam_seconds,
        ) {
            self.cooldown.timed_exam_seconds = n;
        }

        if let Some(flag) = env_flag("MENTORGATE_ALLOW_RECONSIDER") {
            self.flow.allow_reconsider = flag;
        }

        if let Some(flag) = env_flag("MENTORGATE_RESUME_ENABLED") {
            self.flow.resume_enabled = flag;
        }

        if let Some(flag) = env_flag("MENTORGATE_AUTOPLAY") {
            self.narration.autoplay = flag;
        }
    }

    /// Merge another config into this one.
    ///
    /// Non-default fields from `other` win. A layer cannot reset a value back
    /// to its default once a lower layer changed it.
    fn merge(mut self, other: Config) -> Self {
        let default_cooldown = CooldownConfig::default();
        if other.cooldown.mentor_guided_seconds != default_cooldown.mentor_guided_seconds {
            self.cooldown.mentor_guided_seconds = other.cooldown.mentor_guided_seconds;
        }
        if other.cooldown.timed_exam_seconds != default_cooldown.timed_exam_seconds {
            self.cooldown.timed_exam_seconds = other.cooldown.timed_exam_seconds;
        }

        let default_flow = FlowConfig::default();
        if other.flow.allow_reconsider != default_flow.allow_reconsider {
            self.flow.allow_reconsider = other.flow.allow_reconsider;
        }
        if other.flow.resume_enabled != default_flow.resume_enabled {
            self.flow.resume_enabled = other.flow.resume_enabled;
        }

        let default_narration = NarrationConfig::default();
        if other.narration.autoplay != default_narration.autoplay {
            self.narration.autoplay = other.narration.autoplay;
        }
        if other.narration.mandatory_by_default != default_narration.mandatory_by_default {
            self.narration.mandatory_by_default = other.narration.mandatory_by_default;
        }

        self
    }

    /// Save configuration to `.mentorgate/config.toml` under `cwd`.
    ///
    /// Writes to a temp file and renames it into place.
    pub fn save_project(&self, cwd: &Path) -> Result<()> {
        self.validate()?;

        let dir = cwd.join(".mentorgate");
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| FlowError::storage(&dir, e))?;
        }

        let config_path = dir.join("config.toml");
        let content = toml::to_string_pretty(self).map_err(|e| FlowError::config(e.to_string()))?;

        let temp_path = dir.join(".config.toml.tmp");
        fs::write(&temp_path, &content).map_err(|e| FlowError::storage(&temp_path, e))?;
        fs::rename(&temp_path, &config_path).map_err(|e| FlowError::storage(&config_path, e))?;

        Ok(())
    }
}

/// Parse a cooldown override, keeping the current value on bad input.
fn env_seconds(name: &str, current: u64) -> Option<u64> {
    let val = env::var(name).ok()?;
    match val.parse::<u64>() {
        Ok(n) if CooldownConfig::is_valid_seconds(n) => Some(n),
        Ok(n) => {
            tracing::warn!(
                "invalid {} value '{}': must be between {} and {}, keeping '{}'",
                name,
                n,
                MIN_COOLDOWN_SECONDS,
                MAX_COOLDOWN_SECONDS,
                current
            );
            None
        }
        Err(_) => {
            tracing::warn!(
                "invalid {} value '{}': expected a positive integer, keeping '{}'",
                name,
                val,
                current
            );
            None
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    env::var(name)
        .ok()
        .map(|val| val == "1" || val.eq_ignore_ascii_case("true"))
}

/// Get the mentorgate home directory.
///
/// Checks `MENTORGATE_HOME` first, then falls back to `~/.mentorgate`.
pub fn mentorgate_home() -> Option<PathBuf> {
    if let Ok(home) = env::var("MENTORGATE_HOME") {
        if home.is_empty() {
            tracing::warn!("MENTORGATE_HOME is empty, using default");
        } else {
            let path = PathBuf::from(&home);
            if path.is_absolute() {
                return Some(path);
            }
            if let Ok(canonical) = path.canonicalize() {
                return Some(canonical);
            }
            tracing::warn!("MENTORGATE_HOME is relative and doesn't exist, using as-is");
            return Some(path);
        }
    }

    dirs::home_dir()
        .map(|home| home.join(".mentorgate"))
        .or_else(|| Some(env::temp_dir().join("mentorgate")))
}

/// Directory holding one JSON document per cooldown key.
pub fn cooldowns_dir() -> Option<PathBuf> {
    mentorgate_home().map(|h| h.join("cooldowns"))
}

/// Directory holding one JSON document per resume key.
pub fn resume_dir() -> Option<PathBuf> {
    mentorgate_home().map(|h| h.join("resume"))
}

/// Path of the XP award ledger.
pub fn xp_ledger_path() -> Option<PathBuf> {
    mentorgate_home().map(|h| h.join("xp-ledger.jsonl"))
}
