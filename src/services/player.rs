//! Clip playback port.
//!
//! Each call to [`ClipPlayer::play`] is one awaitable per clip that resolves
//! once the clip ends, fails, or is refused by the host.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::services::content::ClipRef;

/// What started playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayTrigger {
    /// Started automatically on stage entry.
    Autoplay,
    /// Started by an explicit learner action.
    Manual,
}

/// How one clip's playback resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClipOutcome {
    /// Played to its natural end.
    Completed,
    /// The host refused automatic playback. The clip itself is fine.
    AutoplayBlocked,
    /// Load or playback error.
    Failed(String),
}

/// Plays narration clips.
#[async_trait]
pub trait ClipPlayer: Send + Sync {
    /// Play one clip to its end.
    async fn play(&self, clip: &ClipRef, trigger: PlayTrigger) -> ClipOutcome;
}

/// Longest a simulated clip may take, whatever the speed.
pub const MAX_CLIP_WAIT: Duration = Duration::from_secs(60 * 60);

/// Headless player that waits out each clip's nominal duration.
#[derive(Debug, Clone)]
pub struct SimulatedClipPlayer {
    speed: f64,
    autoplay_blocked: bool,
}

impl Default for SimulatedClipPlayer {
    fn default() -> Self {
        Self {
            speed: 1.0,
            autoplay_blocked: false,
        }
    }
}

impl SimulatedClipPlayer {
    /// Create a real-time player.
    pub fn new() -> Self {
        Self::default()
    }

    /// Playback speed multiplier. Non-positive values play instantly, and a
    /// clip never waits longer than [`MAX_CLIP_WAIT`].
    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    /// Refuse every autoplay attempt, like a browser without user activation.
    pub fn with_autoplay_blocked(mut self, blocked: bool) -> Self {
        self.autoplay_blocked = blocked;
        self
    }

    fn wait_for(&self, clip: &ClipRef) -> Duration {
        if self.speed <= 0.0 || !self.speed.is_finite() {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(clip.duration_ms as f64 / 1000.0 / self.speed)
            .map_or(MAX_CLIP_WAIT, |wait| wait.min(MAX_CLIP_WAIT))
    }
}

#[async_trait]
impl ClipPlayer for SimulatedClipPlayer {
    async fn play(&self, clip: &ClipRef, trigger: PlayTrigger) -> ClipOutcome {
        if self.autoplay_blocked && trigger == PlayTrigger::Autoplay {
            return ClipOutcome::AutoplayBlocked;
        }
        if clip.src.is_empty() {
            return ClipOutcome::Failed(format!("clip {} has no source", clip.id));
        }
        tokio::time::sleep(self.wait_for(clip)).await;
        ClipOutcome::Completed
    }
}

/// Test doubles shared with the narration and controller tests.
#[cfg(test)]
pub mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Resolves clips from a script; `Completed` once the script runs out.
    /// A `None` entry never resolves.
    #[derive(Debug, Default)]
    pub struct ScriptedPlayer {
        script: Mutex<VecDeque<Option<ClipOutcome>>>,
        played: Mutex<Vec<(String, PlayTrigger)>>,
    }

    impl ScriptedPlayer {
        pub fn new(script: Vec<Option<ClipOutcome>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                played: Mutex::new(Vec::new()),
            }
        }

        pub fn completing() -> Self {
            Self::default()
        }

        pub fn played(&self) -> Vec<(String, PlayTrigger)> {
            self.played.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ClipPlayer for ScriptedPlayer {
        async fn play(&self, clip: &ClipRef, trigger: PlayTrigger) -> ClipOutcome {
            self.played.lock().unwrap().push((clip.id.clone(), trigger));
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(Some(outcome)) => outcome,
                Some(None) => std::future::pending().await,
                None => ClipOutcome::Completed,
            }
        }
    }

    #[tokio::test]
    async fn test_instant_playback_completes() {
        let player = SimulatedClipPlayer::new().with_speed(0.0);
        let clip = ClipRef::new("c1", "c1.mp3", 60_000);
        assert_eq!(
            player.play(&clip, PlayTrigger::Autoplay).await,
            ClipOutcome::Completed
        );
    }

    #[tokio::test]
    async fn test_blocked_autoplay_allows_manual() {
        let player = SimulatedClipPlayer::new()
            .with_speed(0.0)
            .with_autoplay_blocked(true);
        let clip = ClipRef::new("c1", "c1.mp3", 10);

        assert_eq!(
            player.play(&clip, PlayTrigger::Autoplay).await,
            ClipOutcome::AutoplayBlocked
        );
        assert_eq!(
            player.play(&clip, PlayTrigger::Manual).await,
            ClipOutcome::Completed
        );
    }

    #[tokio::test]
    async fn test_missing_source_fails() {
        let player = SimulatedClipPlayer::new().with_speed(0.0);
        let clip = ClipRef::new("c1", "", 10);
        assert!(matches!(
            player.play(&clip, PlayTrigger::Manual).await,
            ClipOutcome::Failed(_)
        ));
    }

    #[test]
    fn test_speed_scales_wait() {
        let clip = ClipRef::new("c1", "c1.mp3", 2_000);
        let player = SimulatedClipPlayer::new().with_speed(4.0);
        assert_eq!(player.wait_for(&clip), Duration::from_millis(500));
    }

    #[test]
    fn test_tiny_speed_is_capped() {
        let clip = ClipRef::new("c1", "c1.mp3", 2_000);
        let crawling = SimulatedClipPlayer::new().with_speed(1e-300);
        assert_eq!(crawling.wait_for(&clip), MAX_CLIP_WAIT);

        let slow = SimulatedClipPlayer::new().with_speed(1e-6);
        assert_eq!(slow.wait_for(&clip), MAX_CLIP_WAIT);

        let nan = SimulatedClipPlayer::new().with_speed(f64::NAN);
        assert_eq!(nan.wait_for(&clip), Duration::ZERO);
    }
}
