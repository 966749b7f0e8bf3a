//! Narration sequencing and the continue gate.
//!
//! A [`NarrationGate`] is mounted for every stage that declares narration.
//! It plays clips strictly in order and only reports the stage as passable
//! once every clip has completed, or after an explicit skip on a
//! non-mandatory stage whose narration failed.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::core::stage::Stage;
use crate::error::{FlowError, Result};
use crate::services::{ClipOutcome, ClipPlayer, ClipRef, PlayTrigger};

/// Playback state of one clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ClipState {
    #[default]
    NotStarted,
    Playing,
    Completed,
    Failed,
}

/// Ordered clips bound to one stage.
///
/// `completed` is true exactly when every clip is `Completed`, and
/// `current_index` only moves forward past a completed clip.
#[derive(Debug, Clone)]
pub struct NarrationSequence {
    clips: Vec<ClipRef>,
    states: Vec<ClipState>,
    current_index: usize,
    completed: bool,
    error: Option<String>,
}

impl NarrationSequence {
    /// Create a sequence with every clip not started.
    pub fn new(clips: Vec<ClipRef>) -> Self {
        let states = vec![ClipState::NotStarted; clips.len()];
        let completed = clips.is_empty();
        Self {
            clips,
            states,
            current_index: 0,
            completed,
            error: None,
        }
    }

    pub fn clips(&self) -> &[ClipRef] {
        &self.clips
    }

    pub fn states(&self) -> &[ClipState] {
        &self.states
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Sequence-level error from the last failed clip.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Whether a clip is currently playing.
    pub fn is_playing(&self) -> bool {
        self.states.get(self.current_index) == Some(&ClipState::Playing)
    }

    /// Clip at the current index, unless the sequence is done.
    pub fn current_clip(&self) -> Option<&ClipRef> {
        if self.completed {
            return None;
        }
        self.clips.get(self.current_index)
    }

    /// Mark the current clip as playing and hand it out.
    ///
    /// Returns `None` when complete or while the current clip is failed.
    pub fn begin_current(&mut self) -> Option<ClipRef> {
        if self.completed || self.error.is_some() {
            return None;
        }
        let clip = self.clips.get(self.current_index)?.clone();
        self.states[self.current_index] = ClipState::Playing;
        Some(clip)
    }

    /// The current clip reached its natural end.
    pub fn complete_clip(&mut self) {
        if self.completed || !self.is_playing() {
            return;
        }
        self.states[self.current_index] = ClipState::Completed;
        if self.current_index + 1 == self.clips.len() {
            self.completed = true;
        } else {
            self.current_index += 1;
        }
    }

    /// The current clip failed to load or play.
    pub fn fail_clip(&mut self, reason: impl Into<String>) {
        if let Some(state) = self.states.get_mut(self.current_index) {
            *state = ClipState::Failed;
            self.error = Some(reason.into());
        }
    }

    /// Playback stopped before the clip ended; it will start over.
    pub fn interrupt(&mut self) {
        if self.is_playing() {
            self.states[self.current_index] = ClipState::NotStarted;
        }
    }

    /// Clear a failure so the failed clip can be played again.
    ///
    /// Returns false if nothing had failed.
    pub fn reset_failed(&mut self) -> bool {
        if self.error.take().is_none() {
            return false;
        }
        if let Some(state) = self.states.get_mut(self.current_index) {
            *state = ClipState::NotStarted;
        }
        true
    }

    /// Back to the beginning: every clip not started.
    pub fn reset(&mut self) {
        self.states.fill(ClipState::NotStarted);
        self.current_index = 0;
        self.completed = self.clips.is_empty();
        self.error = None;
    }

    /// Mark the whole sequence as already heard.
    pub fn mark_all_completed(&mut self) {
        self.states.fill(ClipState::Completed);
        self.current_index = self.clips.len().saturating_sub(1);
        self.completed = true;
        self.error = None;
    }
}

/// How a call to [`NarrationGate::run`] ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NarrationProgress {
    /// Every clip has played.
    Completed,
    /// Autoplay was refused; an explicit play action is needed.
    ManualPlayRequired,
    /// A clip failed. Retry, or skip if the stage allows it.
    Failed { index: usize, reason: String },
    /// Playback was cancelled by navigation.
    Cancelled,
    /// Another call is already driving playback.
    Busy,
}

/// Point-in-time view of a gate, published after every change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NarrationStatus {
    pub stage: Stage,
    pub clip_states: Vec<ClipState>,
    pub current_index: usize,
    pub completed: bool,
    pub playing: bool,
    pub manual_play_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub mandatory: bool,
    pub skipped: bool,
}

impl NarrationStatus {
    /// Whether the stage's continue affordance is unlocked.
    pub fn may_continue(&self) -> bool {
        self.completed || self.skipped
    }
}

/// Drives one stage's narration and exposes whether the learner may continue.
#[derive(Debug)]
pub struct NarrationGate {
    stage: Stage,
    sequence: NarrationSequence,
    mandatory: bool,
    manual_play_required: bool,
    skipped: bool,
    cancel: CancellationToken,
    status_tx: watch::Sender<NarrationStatus>,
}

impl NarrationGate {
    /// Mount a gate for a stage.
    pub fn new(stage: Stage, clips: Vec<ClipRef>, mandatory: bool) -> Self {
        let sequence = NarrationSequence::new(clips);
        let initial = NarrationStatus {
            stage,
            clip_states: sequence.states().to_vec(),
            current_index: 0,
            completed: sequence.is_completed(),
            playing: false,
            manual_play_required: false,
            error: None,
            mandatory,
            skipped: false,
        };
        let (status_tx, _) = watch::channel(initial);
        Self {
            stage,
            sequence,
            mandatory,
            manual_play_required: false,
            skipped: false,
            cancel: CancellationToken::new(),
            status_tx,
        }
    }

    /// Mount a gate whose narration was already heard in this session.
    pub fn already_narrated(stage: Stage, clips: Vec<ClipRef>, mandatory: bool) -> Self {
        let mut gate = Self::new(stage, clips, mandatory);
        gate.sequence.mark_all_completed();
        gate.publish();
        gate
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn sequence(&self) -> &NarrationSequence {
        &self.sequence
    }

    pub fn is_mandatory(&self) -> bool {
        self.mandatory
    }

    pub fn manual_play_required(&self) -> bool {
        self.manual_play_required
    }

    /// Whether the stage's continue affordance is unlocked.
    pub fn may_continue(&self) -> bool {
        self.sequence.is_completed() || self.skipped
    }

    /// Token that stops playback when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop playback for good.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Subscribe to status snapshots.
    pub fn subscribe(&self) -> watch::Receiver<NarrationStatus> {
        self.status_tx.subscribe()
    }

    /// Current status snapshot.
    pub fn status(&self) -> NarrationStatus {
        NarrationStatus {
            stage: self.stage,
            clip_states: self.sequence.states().to_vec(),
            current_index: self.sequence.current_index(),
            completed: self.sequence.is_completed(),
            playing: self.sequence.is_playing(),
            manual_play_required: self.manual_play_required,
            error: self.sequence.error().map(str::to_string),
            mandatory: self.mandatory,
            skipped: self.skipped,
        }
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.status());
    }

    /// Stop at the manual-play affordance without touching the player.
    pub fn require_manual_play(&mut self) -> NarrationProgress {
        if self.sequence.is_completed() {
            return NarrationProgress::Completed;
        }
        self.manual_play_required = true;
        self.publish();
        NarrationProgress::ManualPlayRequired
    }

    /// Play from the current clip until the sequence completes or stops.
    ///
    /// Once a clip finishes, later clips inherit `trigger`, so a manual play
    /// carries the rest of the sequence.
    pub async fn run(&mut self, player: &dyn ClipPlayer, trigger: PlayTrigger) -> NarrationProgress {
        let cancel = self.cancel.clone();
        if cancel.is_cancelled() {
            return NarrationProgress::Cancelled;
        }
        if let Some(reason) = self.sequence.error() {
            return NarrationProgress::Failed {
                index: self.sequence.current_index(),
                reason: reason.to_string(),
            };
        }

        loop {
            let Some(clip) = self.sequence.begin_current() else {
                self.publish();
                return NarrationProgress::Completed;
            };
            let index = self.sequence.current_index();
            self.publish();
            tracing::debug!(stage = %self.stage, clip = %clip.id, index, ?trigger, "clip started");

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.sequence.interrupt();
                    self.publish();
                    tracing::debug!(stage = %self.stage, clip = %clip.id, "narration cancelled");
                    return NarrationProgress::Cancelled;
                }
                outcome = player.play(&clip, trigger) => outcome,
            };

            match outcome {
                ClipOutcome::Completed => {
                    self.manual_play_required = false;
                    self.sequence.complete_clip();
                    tracing::debug!(stage = %self.stage, clip = %clip.id, "clip completed");
                }
                ClipOutcome::AutoplayBlocked => {
                    self.sequence.interrupt();
                    self.manual_play_required = true;
                    self.publish();
                    tracing::debug!(stage = %self.stage, clip = %clip.id, "autoplay blocked");
                    return NarrationProgress::ManualPlayRequired;
                }
                ClipOutcome::Failed(reason) => {
                    self.sequence.fail_clip(reason.clone());
                    self.publish();
                    tracing::warn!(stage = %self.stage, clip = %clip.id, %reason, "clip failed");
                    return NarrationProgress::Failed { index, reason };
                }
            }
        }
    }

    /// Clear a clip failure so playback can be attempted again.
    pub fn retry(&mut self) -> Result<()> {
        if !self.sequence.reset_failed() {
            return Err(FlowError::invalid_state(format!(
                "no failed clip to retry in {}",
                self.stage
            )));
        }
        self.publish();
        Ok(())
    }

    /// Manual-continue override after a failure on a non-mandatory stage.
    pub fn skip(&mut self) -> Result<()> {
        if self.mandatory {
            return Err(FlowError::invalid_state(format!(
                "narration in {} is mandatory",
                self.stage
            )));
        }
        if self.sequence.error().is_none() {
            return Err(FlowError::invalid_state(format!(
                "narration in {} has not failed",
                self.stage
            )));
        }
        self.skipped = true;
        self.publish();
        Ok(())
    }

    /// Forget all progress, as on an explicit restart.
    pub fn reset(&mut self) {
        self.sequence.reset();
        self.manual_play_required = false;
        self.skipped = false;
        self.publish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::player::tests::ScriptedPlayer;

    fn clips(n: usize) -> Vec<ClipRef> {
        (1..=n)
            .map(|i| ClipRef::new(format!("c{}", i), format!("c{}.mp3", i), 10))
            .collect()
    }

    #[test]
    fn test_three_clip_sequence_advances_in_order() {
        let mut seq = NarrationSequence::new(clips(3));
        assert!(!seq.is_completed());

        seq.begin_current().unwrap();
        seq.complete_clip();
        assert_eq!(seq.current_index(), 1);
        assert!(!seq.is_completed());

        seq.begin_current().unwrap();
        seq.complete_clip();
        assert_eq!(seq.current_index(), 2);

        seq.begin_current().unwrap();
        seq.complete_clip();
        assert!(seq.is_completed());
        assert!(seq.states().iter().all(|s| *s == ClipState::Completed));
        assert!(seq.begin_current().is_none());
    }

    #[test]
    fn test_complete_without_playing_is_ignored() {
        let mut seq = NarrationSequence::new(clips(2));
        seq.complete_clip();
        assert_eq!(seq.current_index(), 0);
        assert_eq!(seq.states()[0], ClipState::NotStarted);
    }

    #[test]
    fn test_empty_sequence_is_complete() {
        let seq = NarrationSequence::new(Vec::new());
        assert!(seq.is_completed());
        assert!(seq.current_clip().is_none());
    }

    #[test]
    fn test_failure_blocks_until_reset() {
        let mut seq = NarrationSequence::new(clips(2));
        seq.begin_current().unwrap();
        seq.fail_clip("404");

        assert_eq!(seq.states()[0], ClipState::Failed);
        assert_eq!(seq.error(), Some("404"));
        assert!(!seq.is_completed());
        assert!(seq.begin_current().is_none());

        assert!(seq.reset_failed());
        assert!(!seq.reset_failed());
        assert_eq!(seq.begin_current().unwrap().id, "c1");
    }

    #[test]
    fn test_reset_and_mark_completed() {
        let mut seq = NarrationSequence::new(clips(2));
        seq.mark_all_completed();
        assert!(seq.is_completed());

        seq.reset();
        assert!(!seq.is_completed());
        assert_eq!(seq.current_index(), 0);
        assert!(seq.states().iter().all(|s| *s == ClipState::NotStarted));
    }

    #[tokio::test]
    async fn test_run_plays_every_clip() {
        let player = ScriptedPlayer::completing();
        let mut gate = NarrationGate::new(Stage::Begin, clips(3), true);
        assert!(!gate.may_continue());

        let progress = gate.run(&player, PlayTrigger::Autoplay).await;
        assert_eq!(progress, NarrationProgress::Completed);
        assert!(gate.may_continue());

        let ids: Vec<String> = player.played().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
    }

    #[tokio::test]
    async fn test_single_clip_behaves_like_bare_clip() {
        let player = ScriptedPlayer::completing();
        let mut gate = NarrationGate::new(Stage::Conclusion, clips(1), true);
        assert_eq!(
            gate.run(&player, PlayTrigger::Autoplay).await,
            NarrationProgress::Completed
        );
        assert_eq!(gate.status().clip_states, vec![ClipState::Completed]);
    }

    #[tokio::test]
    async fn test_autoplay_blocked_then_manual_play() {
        let player = ScriptedPlayer::new(vec![Some(ClipOutcome::AutoplayBlocked)]);
        let mut gate = NarrationGate::new(Stage::Begin, clips(2), true);

        let progress = gate.run(&player, PlayTrigger::Autoplay).await;
        assert_eq!(progress, NarrationProgress::ManualPlayRequired);
        assert!(gate.manual_play_required());
        assert_eq!(gate.sequence().states()[0], ClipState::NotStarted);
        assert!(!gate.may_continue());

        let progress = gate.run(&player, PlayTrigger::Manual).await;
        assert_eq!(progress, NarrationProgress::Completed);
        assert!(!gate.manual_play_required());

        let triggers: Vec<PlayTrigger> = player.played().into_iter().map(|(_, t)| t).collect();
        assert_eq!(
            triggers,
            vec![PlayTrigger::Autoplay, PlayTrigger::Manual, PlayTrigger::Manual]
        );
    }

    #[tokio::test]
    async fn test_failure_never_completes_sequence() {
        let player = ScriptedPlayer::new(vec![
            Some(ClipOutcome::Completed),
            Some(ClipOutcome::Failed("network".into())),
        ]);
        let mut gate = NarrationGate::new(Stage::OutcomeAnalysis, clips(3), true);

        let progress = gate.run(&player, PlayTrigger::Autoplay).await;
        assert_eq!(
            progress,
            NarrationProgress::Failed {
                index: 1,
                reason: "network".into()
            }
        );
        assert!(!gate.may_continue());

        // Running again without retry reports the same failure
        assert!(matches!(
            gate.run(&player, PlayTrigger::Manual).await,
            NarrationProgress::Failed { index: 1, .. }
        ));

        gate.retry().unwrap();
        assert_eq!(
            gate.run(&player, PlayTrigger::Manual).await,
            NarrationProgress::Completed
        );
        assert!(gate.may_continue());
    }

    #[tokio::test]
    async fn test_skip_only_for_failed_optional_narration() {
        let player = ScriptedPlayer::new(vec![Some(ClipOutcome::Failed("decode".into()))]);

        let mut mandatory = NarrationGate::new(Stage::Begin, clips(1), true);
        assert!(mandatory.is_mandatory());
        mandatory.run(&player, PlayTrigger::Autoplay).await;
        assert!(mandatory.skip().is_err());
        assert!(!mandatory.may_continue());

        let mut optional = NarrationGate::new(Stage::Begin, clips(1), false);
        assert!(optional.skip().is_err());

        let player = ScriptedPlayer::new(vec![Some(ClipOutcome::Failed("decode".into()))]);
        optional.run(&player, PlayTrigger::Autoplay).await;
        optional.skip().unwrap();
        assert!(optional.may_continue());
        assert!(!optional.sequence().is_completed());
    }

    #[tokio::test]
    async fn test_cancel_interrupts_playback() {
        let player = ScriptedPlayer::new(vec![None]);
        let mut gate = NarrationGate::new(Stage::Begin, clips(2), true);
        let token = gate.cancel_token();

        let (progress, _) = tokio::join!(gate.run(&player, PlayTrigger::Autoplay), async {
            tokio::task::yield_now().await;
            token.cancel();
        });

        assert_eq!(progress, NarrationProgress::Cancelled);
        assert_eq!(gate.sequence().states()[0], ClipState::NotStarted);
        assert_eq!(
            gate.run(&player, PlayTrigger::Manual).await,
            NarrationProgress::Cancelled
        );
    }

    #[tokio::test]
    async fn test_status_is_published() {
        let player = ScriptedPlayer::completing();
        let mut gate = NarrationGate::new(Stage::Begin, clips(2), true);
        let rx = gate.subscribe();
        assert!(!rx.borrow().may_continue());

        gate.run(&player, PlayTrigger::Autoplay).await;
        assert!(rx.borrow().may_continue());
        assert!(!rx.borrow().playing);
    }

    #[test]
    fn test_already_narrated_does_not_replay() {
        let gate = NarrationGate::already_narrated(Stage::Begin, clips(3), true);
        assert!(gate.may_continue());
        assert!(gate.subscribe().borrow().completed);
    }

    #[test]
    fn test_reset_restores_not_started() {
        let mut gate = NarrationGate::already_narrated(Stage::Begin, clips(2), true);
        gate.reset();
        assert!(!gate.may_continue());
        assert!(gate
            .status()
            .clip_states
            .iter()
            .all(|s| *s == ClipState::NotStarted));
    }
}
