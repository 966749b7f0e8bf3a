//! Flow controller.
//!
//! Owns one learner's pass through one question. Every transition goes
//! through this type; callers get back a plain result (moved, blocked, or an
//! error) and render from the read accessors.
//!
//! Transitions never interleave: a second transition while one is still
//! awaiting its store or content call is rejected with
//! [`FlowError::TransitionPending`]. Every session carries an epoch, and an
//! asynchronous result is only applied if its epoch is still the active one.
//! The exception is a completion whose cooldown write already landed: its
//! XP notification and resume cleanup still run.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::core::analysis::{
    normalize, Alternative, AlternativeAnalyzer, Outcome, OutcomeAnalysis,
};
use crate::core::clock::Clock;
use crate::core::cooldown::CooldownGuard;
use crate::core::narration::{NarrationGate, NarrationProgress, NarrationStatus};
use crate::core::resume::ResumeRecord;
use crate::core::stage::{FlowMode, FlowSession, Stage};
use crate::error::{BestEffort, FlowError, Result};
use crate::services::{
    ClipPlayer, ContentProvider, FlowContent, PlayTrigger, StageContent, XpService,
};
use crate::storage::{CooldownStore, ResumeStore};

/// Why a transition request did not move the flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    /// Narration has not been played to the end.
    NarrationIncomplete,
    /// A clip is playing right now.
    NarrationPlaying,
    /// Autoplay was refused and nobody pressed play yet.
    ManualPlayRequired,
    /// A clip failed; retry, or skip if the stage allows it.
    NarrationFailed,
    /// The question stage is only left by submitting.
    AwaitingSelection,
}

impl BlockReason {
    fn from_status(status: &NarrationStatus) -> Option<Self> {
        if status.may_continue() {
            None
        } else if status.playing {
            Some(BlockReason::NarrationPlaying)
        } else if status.error.is_some() {
            Some(BlockReason::NarrationFailed)
        } else if status.manual_play_required {
            Some(BlockReason::ManualPlayRequired)
        } else {
            Some(BlockReason::NarrationIncomplete)
        }
    }
}

/// Result of a transition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Advance {
    Moved { from: Stage, to: Stage },
    Blocked { reason: BlockReason },
}

/// Result of [`FlowController::complete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Completion {
    /// Cooldown written and XP notified.
    Recorded {
        outcome: Outcome,
        available_at: DateTime<Utc>,
    },
    /// Post-conditions already ran for this session.
    AlreadyCompleted,
    /// Conclusion narration still gates completion.
    Blocked { reason: BlockReason },
}

/// A freshly started or resumed session.
#[derive(Debug, Clone, PartialEq)]
pub struct Started {
    pub session: FlowSession,
    pub resumed: bool,
}

/// Collaborators injected into a controller.
#[derive(Clone)]
pub struct FlowPorts {
    pub cooldowns: Arc<dyn CooldownStore>,
    pub resume: Arc<dyn ResumeStore>,
    pub content: Arc<dyn ContentProvider>,
    pub xp: Arc<dyn XpService>,
    pub player: Arc<dyn ClipPlayer>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Clone)]
struct MountedNarration {
    gate: Arc<AsyncMutex<NarrationGate>>,
    status: watch::Receiver<NarrationStatus>,
    cancel: CancellationToken,
}

impl MountedNarration {
    fn new(gate: NarrationGate) -> Self {
        let status = gate.subscribe();
        let cancel = gate.cancel_token();
        Self {
            gate: Arc::new(AsyncMutex::new(gate)),
            status,
            cancel,
        }
    }

    fn status(&self) -> NarrationStatus {
        self.status.borrow().clone()
    }
}

struct ActiveFlow {
    epoch: u64,
    session: FlowSession,
    content: FlowContent,
    narration: Option<MountedNarration>,
    /// Stages whose narration completed in this session.
    narrated: BTreeSet<Stage>,
    analysis: Option<OutcomeAnalysis>,
}

impl ActiveFlow {
    fn block_reason(&self) -> Option<BlockReason> {
        self.narration
            .as_ref()
            .and_then(|n| BlockReason::from_status(&n.status()))
    }

    fn unmount(&mut self) {
        if let Some(narration) = self.narration.take() {
            narration.cancel.cancel();
        }
    }

    fn resume_record(&self, now: DateTime<Utc>) -> ResumeRecord {
        ResumeRecord {
            user_id: self.session.user_id.clone(),
            question_id: self.session.question_id.clone(),
            mode: self.session.mode,
            current_stage: self.session.current_stage,
            narrated_stages: self.narrated.iter().copied().collect(),
            selected_alternative: self.session.selected_alternative,
            updated_at: now,
        }
    }
}

/// Holds the single transition slot until dropped.
struct TransitionGuard<'a>(&'a AtomicBool);

impl<'a> TransitionGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| FlowError::TransitionPending)?;
        Ok(Self(flag))
    }
}

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

enum PendingCompletion {
    Done(Completion),
    Record {
        epoch: u64,
        session: FlowSession,
        outcome: Outcome,
    },
}

enum Drive {
    Autoplay,
    Manual,
    Retry,
}

/// The guided-flow state machine.
pub struct FlowController {
    content: Arc<dyn ContentProvider>,
    xp: Arc<dyn XpService>,
    player: Arc<dyn ClipPlayer>,
    resume: Arc<dyn ResumeStore>,
    cooldown: CooldownGuard,
    clock: Arc<dyn Clock>,
    config: Config,
    state: Mutex<Option<ActiveFlow>>,
    epoch: AtomicU64,
    in_flight: AtomicBool,
}

impl FlowController {
    /// Create a controller with no active session.
    pub fn new(ports: FlowPorts, config: Config) -> Self {
        let cooldown = CooldownGuard::new(
            ports.cooldowns,
            config.cooldown.clone(),
            Arc::clone(&ports.clock),
        );
        Self {
            content: ports.content,
            xp: ports.xp,
            player: ports.player,
            resume: ports.resume,
            cooldown,
            clock: ports.clock,
            config,
            state: Mutex::new(None),
            epoch: AtomicU64::new(0),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The guard this controller consults.
    pub fn cooldown(&self) -> &CooldownGuard {
        &self.cooldown
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Open a question in a mode, after the cooldown guard approves.
    ///
    /// Resumes from a saved record for the same mode when one exists.
    /// Any session already active on this controller is discarded.
    pub async fn start(&self, question_id: &str, mode: FlowMode, user_id: &str) -> Result<Started> {
        let _guard = TransitionGuard::acquire(&self.in_flight)?;
        self.start_inner(question_id, mode, user_id, true).await
    }

    /// Move forward from a stage whose gate is satisfied.
    ///
    /// A gate that is not satisfied yields `Advance::Blocked`, not an error.
    pub async fn request_advance(&self) -> Result<Advance> {
        let _guard = TransitionGuard::acquire(&self.in_flight)?;
        let now = self.clock.now();

        let (advance, record) = self.with_active(|active| {
            let from = active.session.current_stage;
            if active.session.is_completed() {
                return Err(FlowError::invalid_state("flow already completed"));
            }
            match from {
                Stage::QuestionPresented => {
                    return Ok((
                        Advance::Blocked {
                            reason: BlockReason::AwaitingSelection,
                        },
                        None,
                    ));
                }
                Stage::Conclusion => {
                    return Err(FlowError::invalid_state(
                        "conclusion is terminal; complete the flow instead",
                    ));
                }
                _ => {}
            }
            if let Some(reason) = active.block_reason() {
                tracing::debug!(stage = %from, ?reason, "advance blocked");
                return Ok((Advance::Blocked { reason }, None));
            }

            let to = active.session.advance()?;
            self.enter_stage(active, to);
            Ok((Advance::Moved { from, to }, Some(active.resume_record(now))))
        })?;

        if let Some(record) = record {
            self.save_resume(record).await;
        }
        Ok(advance)
    }

    /// Submit a letter from the question stage and analyze it.
    pub async fn submit_selection(&self, letter: char) -> Result<Advance> {
        self.submit(Some(letter)).await
    }

    /// Leave the question stage without a selection.
    pub async fn submit_without_selection(&self) -> Result<Advance> {
        self.submit(None).await
    }

    async fn submit(&self, selection: Option<char>) -> Result<Advance> {
        let _guard = TransitionGuard::acquire(&self.in_flight)?;
        let now = self.clock.now();

        let (advance, record) = self.with_active(|active| {
            let from = active.session.current_stage;
            if from != Stage::QuestionPresented || active.session.is_completed() {
                return Err(FlowError::invalid_state(format!(
                    "cannot submit a selection in {}",
                    from
                )));
            }
            if let Some(reason) = active.block_reason() {
                return Ok((Advance::Blocked { reason }, None));
            }

            let analysis = AlternativeAnalyzer::analyze(&active.content.alternatives, selection)?;
            active.session.submit(selection.map(normalize))?;
            tracing::debug!(
                question_id = %active.session.question_id,
                outcome = %analysis.outcome,
                "selection analyzed"
            );
            active.analysis = Some(analysis);
            self.enter_stage(active, Stage::OutcomeAnalysis);
            Ok((
                Advance::Moved {
                    from,
                    to: Stage::OutcomeAnalysis,
                },
                Some(active.resume_record(now)),
            ))
        })?;

        if let Some(record) = record {
            self.save_resume(record).await;
        }
        Ok(advance)
    }

    /// Step back from the outcome analysis to the question, dropping the
    /// provisional selection.
    ///
    /// Only mentor-guided flows with `flow.allow_reconsider` have this edge.
    pub async fn reconsider(&self) -> Result<Advance> {
        let _guard = TransitionGuard::acquire(&self.in_flight)?;
        let now = self.clock.now();

        let record = self.with_active(|active| {
            if active.session.mode != FlowMode::MentorGuided || !self.config.flow.allow_reconsider {
                return Err(FlowError::invalid_state(
                    "reconsidering is not allowed for this flow",
                ));
            }
            active.session.reconsider()?;
            active.analysis = None;
            self.enter_stage(active, Stage::QuestionPresented);
            Ok(active.resume_record(now))
        })?;

        self.save_resume(record).await;
        Ok(Advance::Moved {
            from: Stage::OutcomeAnalysis,
            to: Stage::QuestionPresented,
        })
    }

    /// Run the terminal post-conditions: write the cooldown window, then
    /// notify XP. Both happen at most once per session.
    ///
    /// A cooldown store failure leaves the session incomplete so the call
    /// can be retried. Abandoning the flow after the cooldown write does not
    /// undo the completion.
    pub async fn complete(&self) -> Result<Completion> {
        let _guard = TransitionGuard::acquire(&self.in_flight)?;

        let pending = self.with_active(|active| {
            if active.session.is_completed() {
                return Ok(PendingCompletion::Done(Completion::AlreadyCompleted));
            }
            if active.session.current_stage != Stage::Conclusion {
                return Err(FlowError::invalid_state(format!(
                    "cannot complete from {}",
                    active.session.current_stage
                )));
            }
            if let Some(reason) = active.block_reason() {
                return Ok(PendingCompletion::Done(Completion::Blocked { reason }));
            }
            let outcome = active
                .analysis
                .as_ref()
                .map(|a| a.outcome)
                .unwrap_or(Outcome::Unanswered);
            Ok(PendingCompletion::Record {
                epoch: active.epoch,
                session: active.session.clone(),
                outcome,
            })
        })?;

        let (epoch, session, outcome) = match pending {
            PendingCompletion::Done(completion) => return Ok(completion),
            PendingCompletion::Record {
                epoch,
                session,
                outcome,
            } => (epoch, session, outcome),
        };

        let record = self
            .cooldown
            .record_attempt(&session.user_id, &session.question_id, session.mode)
            .await?;

        // The attempt is committed once the cooldown is written. XP and the
        // resume cleanup follow even if the flow was discarded meanwhile.
        {
            let mut state = self.lock_state();
            match state.as_mut() {
                Some(active) if active.epoch == epoch => {
                    active.session.completed_at = Some(record.last_attempt_at);
                    active.unmount();
                }
                _ => {
                    tracing::debug!(
                        question_id = %session.question_id,
                        "completion resolved after the flow was discarded"
                    );
                }
            }
        }

        self.xp
            .award_for_completed_flow(&session.user_id, &session.question_id, outcome)
            .await
            .best_effort_default("xp notification");
        self.clear_resume(&session.user_id, &session.question_id)
            .await;

        tracing::info!(
            question_id = %session.question_id,
            user_id = %session.user_id,
            mode = %session.mode,
            %outcome,
            available_at = %record.available_at,
            "flow completed"
        );
        Ok(Completion::Recorded {
            outcome,
            available_at: record.available_at,
        })
    }

    /// Throw the session away and start over at `begin`.
    ///
    /// Narration history and the resume record are cleared, and the
    /// cooldown guard is consulted again.
    pub async fn restart(&self) -> Result<Started> {
        let _guard = TransitionGuard::acquire(&self.in_flight)?;

        let previous = self.lock_state().take();
        let mut previous =
            previous.ok_or_else(|| FlowError::invalid_state("no active flow to restart"))?;
        previous.unmount();
        self.epoch.fetch_add(1, Ordering::SeqCst);

        let FlowSession {
            question_id,
            user_id,
            mode,
            ..
        } = previous.session;
        self.clear_resume(&user_id, &question_id).await;
        tracing::info!(question_id = %question_id, user_id = %user_id, "flow restarted");

        self.start_inner(&question_id, mode, &user_id, false).await
    }

    /// Navigate away: stop narration and make any pending result stale.
    ///
    /// The resume record is kept.
    pub fn abandon(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let previous = self.lock_state().take();
        if let Some(mut previous) = previous {
            previous.unmount();
            tracing::info!(
                question_id = %previous.session.question_id,
                stage = %previous.session.current_stage,
                "flow abandoned"
            );
        }
    }
}

/// Narration driving. Playback holds the stage's gate lock, never the state
/// lock, so accessors stay responsive while a clip plays.
impl FlowController {
    /// Start the current stage's narration the way stage entry does.
    ///
    /// With autoplay disabled this goes straight to the manual-play
    /// affordance.
    pub async fn play_narration(&self) -> Result<NarrationProgress> {
        self.drive(Drive::Autoplay).await
    }

    /// Explicit learner play action.
    pub async fn manual_play(&self) -> Result<NarrationProgress> {
        self.drive(Drive::Manual).await
    }

    /// Clear a clip failure and play again from the failed clip.
    pub async fn retry_narration(&self) -> Result<NarrationProgress> {
        self.drive(Drive::Retry).await
    }

    /// Manual-continue override for a non-mandatory stage whose narration
    /// failed.
    pub fn skip_narration(&self) -> Result<()> {
        let mounted = self
            .with_active(|active| Ok(active.narration.clone()))?
            .ok_or_else(|| FlowError::invalid_state("stage has no narration"))?;
        let mut gate = mounted
            .gate
            .try_lock()
            .map_err(|_| FlowError::invalid_state("narration is playing"))?;
        gate.skip()?;
        tracing::info!(stage = %gate.stage(), "narration skipped");
        Ok(())
    }

    async fn drive(&self, drive: Drive) -> Result<NarrationProgress> {
        let (epoch, mounted) =
            self.with_active(|active| Ok((active.epoch, active.narration.clone())))?;
        let Some(mounted) = mounted else {
            return Ok(NarrationProgress::Completed);
        };
        let Ok(mut gate) = mounted.gate.try_lock() else {
            return Ok(NarrationProgress::Busy);
        };

        let player = self.player.as_ref();
        let progress = match drive {
            Drive::Autoplay if !self.config.narration.autoplay => gate.require_manual_play(),
            Drive::Autoplay => gate.run(player, PlayTrigger::Autoplay).await,
            Drive::Manual => gate.run(player, PlayTrigger::Manual).await,
            Drive::Retry => {
                gate.retry()?;
                gate.run(player, PlayTrigger::Manual).await
            }
        };
        let stage = gate.stage();
        drop(gate);

        if progress == NarrationProgress::Completed {
            let now = self.clock.now();
            let record = {
                let mut state = self.lock_state();
                match state.as_mut() {
                    Some(active)
                        if active.epoch == epoch && active.session.current_stage == stage =>
                    {
                        active
                            .narrated
                            .insert(stage)
                            .then(|| active.resume_record(now))
                    }
                    _ => None,
                }
            };
            if let Some(record) = record {
                self.save_resume(record).await;
            }
        }
        Ok(progress)
    }
}

impl FlowController {
    // =========================================================================
    // Accessors
    // =========================================================================

    /// Snapshot of the active session.
    pub fn session(&self) -> Option<FlowSession> {
        self.lock_state().as_ref().map(|a| a.session.clone())
    }

    /// Current stage of the active session.
    pub fn stage(&self) -> Option<Stage> {
        self.lock_state().as_ref().map(|a| a.session.current_stage)
    }

    /// Analysis of the submitted selection, once in outcome analysis or later.
    pub fn analysis(&self) -> Option<OutcomeAnalysis> {
        self.lock_state().as_ref().and_then(|a| a.analysis.clone())
    }

    /// Authored content for the current stage.
    pub fn stage_content(&self) -> Option<StageContent> {
        let state = self.lock_state();
        let active = state.as_ref()?;
        active.content.stage(active.session.current_stage).cloned()
    }

    /// The question's alternatives, in authored order.
    pub fn alternatives(&self) -> Option<Vec<Alternative>> {
        self.lock_state()
            .as_ref()
            .map(|a| a.content.alternatives.clone())
    }

    /// Narration state of the current stage, if it declares narration.
    pub fn narration_status(&self) -> Option<NarrationStatus> {
        self.lock_state()
            .as_ref()
            .and_then(|a| a.narration.as_ref().map(MountedNarration::status))
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn start_inner(
        &self,
        question_id: &str,
        mode: FlowMode,
        user_id: &str,
        allow_resume: bool,
    ) -> Result<Started> {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let previous = self.lock_state().take();
        if let Some(mut previous) = previous {
            previous.unmount();
        }

        let status = self.cooldown.check_status(user_id, question_id, mode).await?;
        if !status.can_attempt {
            let available_at = status.available_at.unwrap_or_else(|| self.clock.now());
            tracing::info!(question_id, user_id, %mode, %available_at, "attempt denied by cooldown");
            return Err(FlowError::cooldown_active(available_at));
        }
        self.ensure_current(epoch)?;

        let content = self.content.flow_content(question_id).await?;
        AlternativeAnalyzer::validate(&content.alternatives)?;
        self.ensure_current(epoch)?;

        let saved = if allow_resume && self.config.flow.resume_enabled {
            self.resume
                .load(user_id, question_id)
                .await
                .best_effort_default("loading resume record")
        } else {
            None
        };
        self.ensure_current(epoch)?;

        let now = self.clock.now();
        let mut session = FlowSession::new(question_id, user_id, mode, now);
        let mut narrated = BTreeSet::new();
        let mut analysis = None;
        let mut resumed = false;

        let saved = saved.filter(|r| r.belongs_to(user_id, question_id) && r.mode == mode);
        if let Some(record) = saved {
            match restore(&mut session, &record, &content) {
                Ok(restored) => {
                    analysis = restored;
                    narrated = record.narrated_stages.iter().copied().collect();
                    resumed = true;
                }
                Err(err) => {
                    tracing::warn!(question_id, error = %err, "ignoring unusable resume record");
                }
            }
        }

        let narration = mount_narration(
            &content,
            session.current_stage,
            &narrated,
            self.config.narration.mandatory_by_default,
        );
        let mut active = ActiveFlow {
            epoch,
            session,
            content,
            narration,
            narrated,
            analysis,
        };
        let started = Started {
            session: active.session.clone(),
            resumed,
        };
        let record = active.resume_record(now);

        {
            let mut state = self.lock_state();
            if self.epoch.load(Ordering::SeqCst) != epoch {
                active.unmount();
                return Err(FlowError::Cancelled);
            }
            *state = Some(active);
        }
        self.save_resume(record).await;

        tracing::info!(
            question_id,
            user_id,
            %mode,
            stage = %started.session.current_stage,
            resumed,
            "flow started"
        );
        Ok(started)
    }

    fn enter_stage(&self, active: &mut ActiveFlow, to: Stage) {
        active.unmount();
        active.narration = mount_narration(
            &active.content,
            to,
            &active.narrated,
            self.config.narration.mandatory_by_default,
        );
        tracing::debug!(
            question_id = %active.session.question_id,
            stage = %to,
            narrated = active.narration.is_some(),
            "stage entered"
        );
    }

    fn lock_state(&self) -> MutexGuard<'_, Option<ActiveFlow>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_active<T>(&self, f: impl FnOnce(&mut ActiveFlow) -> Result<T>) -> Result<T> {
        let mut state = self.lock_state();
        let active = state
            .as_mut()
            .ok_or_else(|| FlowError::invalid_state("no active flow"))?;
        f(active)
    }

    fn ensure_current(&self, epoch: u64) -> Result<()> {
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return Err(FlowError::Cancelled);
        }
        Ok(())
    }

    async fn save_resume(&self, record: ResumeRecord) {
        if !self.config.flow.resume_enabled {
            return;
        }
        self.resume
            .save(&record)
            .await
            .best_effort_default("saving resume record");
    }

    async fn clear_resume(&self, user_id: &str, question_id: &str) {
        if !self.config.flow.resume_enabled {
            return;
        }
        self.resume
            .clear(user_id, question_id)
            .await
            .best_effort_default("clearing resume record");
    }
}

fn mount_narration(
    content: &FlowContent,
    stage: Stage,
    narrated: &BTreeSet<Stage>,
    mandatory_by_default: bool,
) -> Option<MountedNarration> {
    let stage_content = content.stage(stage).filter(|s| s.has_narration())?;
    let mandatory = stage_content
        .narration_mandatory
        .unwrap_or(mandatory_by_default);
    let clips = stage_content.narration.clone();

    let gate = if narrated.contains(&stage) {
        NarrationGate::already_narrated(stage, clips, mandatory)
    } else {
        NarrationGate::new(stage, clips, mandatory)
    };
    Some(MountedNarration::new(gate))
}

/// Put a fresh session at the saved stage. The session is untouched on error.
fn restore(
    session: &mut FlowSession,
    record: &ResumeRecord,
    content: &FlowContent,
) -> Result<Option<OutcomeAnalysis>> {
    let stage = record.current_stage;
    let analysis = if stage.index() >= Stage::OutcomeAnalysis.index() {
        Some(AlternativeAnalyzer::analyze(
            &content.alternatives,
            record.selected_alternative,
        )?)
    } else {
        None
    };

    session.current_stage = stage;
    if analysis.is_some() {
        session.selected_alternative = record.selected_alternative.map(normalize);
        session.selection_submitted = true;
    }
    Ok(analysis)
}
