//! Host controller: the single driver of a session's pacing.
//!
//! Exactly one host process owns a session. It is the only writer of the
//! session row (status + current question index), and every status change
//! follows the same discipline: plan the transition, persist it, apply it,
//! and only then broadcast. A failed persistence aborts the plan and nothing
//! is broadcast, so subscribers never observe state the store rejected.

use std::{sync::Arc, time::SystemTime};

use rand::Rng;
use serde::Serialize;
use tokio::{
    sync::{Mutex, RwLock, broadcast},
    task::JoinHandle,
    time::{MissedTickBehavior, interval, sleep, timeout},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    bus::EventBus,
    config::EngineConfig,
    dto::{
        events::{
            EVENT_GAME_ENDED, EVENT_GAME_STARTED, EVENT_NEXT_QUESTION, EVENT_REVEAL_ANSWER,
            EVENT_TIMER_UPDATE, GameEndedEvent, GameStartedEvent, NextQuestionEvent,
            QuestionPayload, RevealAnswerEvent, SessionMessage, TimerUpdateEvent,
        },
        game::SessionSummary,
    },
    error::GameError,
    leaderboard::{LeaderboardEntry, standings},
    quiz::LoadedQuiz,
    session::{SessionCommand, SessionPhase, SessionStateMachine},
    store::{
        QuizStore,
        models::{PlayerChange, PlayerEntity, SessionEntity, SessionStatus},
    },
};

const PIN_GENERATION_ATTEMPTS: usize = 16;

/// Handle driving one game session. Clones share the same session.
#[derive(Clone)]
pub struct HostController {
    inner: Arc<HostInner>,
}

struct HostInner {
    store: Arc<dyn QuizStore>,
    bus: EventBus,
    config: EngineConfig,
    quiz: LoadedQuiz,
    session_id: Uuid,
    pin: String,
    machine: RwLock<SessionStateMachine>,
    // Serializes transitions so a manual advance and a timer expiry can
    // never interleave their plan/persist/apply sequences.
    transition_gate: Mutex<()>,
    timer: Mutex<TimerSlot>,
}

/// The single cancellable countdown owned by the host. The generation
/// counter invalidates any in-flight expiry sequence when a new countdown
/// starts or a manual advance cancels the current one.
struct TimerSlot {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

impl HostController {
    /// Look up the open session for `(quiz_id, host_id)` and resume it, or
    /// create a fresh `waiting` session with a new pin.
    ///
    /// Fails with `NotFound` when the quiz is missing or has no questions.
    pub async fn create_or_resume(
        store: Arc<dyn QuizStore>,
        bus: EventBus,
        config: EngineConfig,
        quiz_id: Uuid,
        host_id: Uuid,
    ) -> Result<Self, GameError> {
        let quiz = LoadedQuiz::load(&store, quiz_id).await?;
        let question_count = quiz.questions.len();

        let session = match store.find_open_session(quiz_id, host_id).await? {
            Some(existing) => {
                info!(session_id = %existing.id, pin = %existing.pin, "resuming open session");
                existing
            }
            None => {
                let session = SessionEntity {
                    id: Uuid::new_v4(),
                    quiz_id,
                    host_id,
                    pin: generate_pin(&store).await?,
                    status: SessionStatus::Waiting,
                    current_question: None,
                    created_at: SystemTime::now(),
                };
                let session = store.insert_session(session).await?;
                info!(session_id = %session.id, pin = %session.pin, "created waiting session");
                session
            }
        };

        let phase = match session.status {
            SessionStatus::Waiting => SessionPhase::Waiting,
            SessionStatus::Active => SessionPhase::Active {
                question: session.current_question.unwrap_or(0),
            },
            // find_open_session never returns completed rows.
            SessionStatus::Completed => SessionPhase::Completed,
        };

        Ok(Self {
            inner: Arc::new(HostInner {
                store,
                bus,
                config,
                quiz,
                session_id: session.id,
                pin: session.pin,
                machine: RwLock::new(SessionStateMachine::resume(question_count, phase)),
                transition_gate: Mutex::new(()),
                timer: Mutex::new(TimerSlot {
                    generation: 0,
                    handle: None,
                }),
            }),
        })
    }

    /// Session row id.
    pub fn session_id(&self) -> Uuid {
        self.inner.session_id
    }

    /// Join pin players type in.
    pub fn pin(&self) -> &str {
        &self.inner.pin
    }

    /// Current lifecycle phase.
    pub async fn phase(&self) -> SessionPhase {
        self.inner.machine.read().await.phase()
    }

    /// The question currently being served, if the session is active.
    pub async fn current_question(&self) -> Option<QuestionPayload> {
        let phase = self.phase().await;
        phase
            .question_index()
            .map(|index| self.inner.question_payload(index))
    }

    /// Read-only projection of the session for the hosting UI.
    pub async fn summary(&self) -> Result<SessionSummary, GameError> {
        let session = self
            .inner
            .store
            .find_session(self.inner.session_id)
            .await?
            .ok_or_else(|| {
                GameError::NotFound(format!("session `{}` not found", self.inner.session_id))
            })?;
        Ok(SessionSummary::new(
            &session,
            &self.inner.quiz.quiz,
            self.inner.quiz.questions.len(),
        ))
    }

    /// Players currently joined, in join order.
    pub async fn players(&self) -> Result<Vec<PlayerEntity>, GameError> {
        Ok(self.inner.store.list_players(self.inner.session_id).await?)
    }

    /// Authoritative standings, re-read from the store.
    pub async fn standings(&self) -> Result<Vec<LeaderboardEntry>, GameError> {
        standings(&self.inner.store, self.inner.session_id).await
    }

    /// Subscribe to the session broadcast channel (live tally of
    /// `player_answered`, own echoes included).
    pub fn events(&self) -> broadcast::Receiver<SessionMessage> {
        self.inner.bus.subscribe(self.inner.session_id)
    }

    /// Subscribe to player row changes from the store — the authoritative
    /// roster path that survives missed broadcasts.
    pub async fn watch_players(&self) -> Result<broadcast::Receiver<PlayerChange>, GameError> {
        Ok(self.inner.store.watch_players(self.inner.session_id).await?)
    }

    /// Start the game: requires `waiting` and at least one joined player.
    /// Broadcasts `game_started` with the first question and, when the quiz
    /// is timed, begins the countdown.
    pub async fn start(&self) -> Result<(), GameError> {
        self.inner.start().await
    }

    /// Manually advance past the current question, cancelling any running
    /// countdown first. Completes the session when the current question was
    /// the last.
    pub async fn advance(&self) -> Result<SessionPhase, GameError> {
        self.inner.cancel_timer().await;
        self.inner.advance_internal().await
    }

    /// End the session early from any active question.
    pub async fn finish(&self) -> Result<(), GameError> {
        self.inner.cancel_timer().await;
        self.inner.finish_internal().await
    }
}

impl HostInner {
    /// Plan `command`, run the persistence `work` under the transition gate
    /// and timeout, then apply. Aborts the plan (and therefore suppresses
    /// any broadcast) when the work fails or times out.
    async fn run_transition<F, Fut, T>(
        &self,
        command: SessionCommand,
        work: F,
    ) -> Result<(T, SessionPhase), GameError>
    where
        F: FnOnce(SessionPhase) -> Fut,
        Fut: std::future::Future<Output = Result<T, GameError>>,
    {
        let gate = self.transition_gate.lock().await;
        let plan = {
            let mut machine = self.machine.write().await;
            machine.plan(command)?
        };
        let plan_id = plan.id;

        let work_future = work(plan.to);
        let outcome = match timeout(self.config.transition_timeout, work_future).await {
            Ok(result) => result,
            Err(_) => {
                if let Err(abort_err) = self.machine.write().await.abort(plan_id) {
                    warn!(
                        command = ?command,
                        plan_id = %plan_id,
                        error = ?abort_err,
                        "failed to abort transition after timeout"
                    );
                }
                drop(gate);
                return Err(GameError::Timeout);
            }
        };

        match outcome {
            Ok(value) => {
                let next = self.machine.write().await.apply(plan_id)?;
                drop(gate);
                Ok((value, next))
            }
            Err(err) => {
                if let Err(abort_err) = self.machine.write().await.abort(plan_id) {
                    warn!(
                        command = ?command,
                        plan_id = %plan_id,
                        error = ?abort_err,
                        "failed to abort transition after work error"
                    );
                }
                drop(gate);
                Err(err)
            }
        }
    }

    async fn start(self: &Arc<Self>) -> Result<(), GameError> {
        let players = self.store.list_players(self.session_id).await?;
        if players.is_empty() {
            return Err(GameError::Conflict(
                "cannot start a session before any player joined".into(),
            ));
        }

        let (_, next) = self
            .run_transition(SessionCommand::Start, |next| async move {
                self.store
                    .update_session(self.session_id, next.status(), next.question_index())
                    .await?;
                Ok(())
            })
            .await?;

        let time_left = self.quiz.time_budget_seconds();
        self.publish(
            EVENT_GAME_STARTED,
            &GameStartedEvent {
                question: self.question_payload(0),
                time_left,
            },
        );
        info!(session_id = %self.session_id, players = players.len(), "game started");

        debug_assert_eq!(next, SessionPhase::Active { question: 0 });
        if let Some(budget) = time_left {
            self.start_countdown(budget).await;
        }

        Ok(())
    }

    async fn advance_internal(self: &Arc<Self>) -> Result<SessionPhase, GameError> {
        let (_, next) = self
            .run_transition(SessionCommand::Advance, |next| self.persist_phase(next))
            .await?;

        match next {
            SessionPhase::Active { question } => {
                let time_left = self.quiz.time_budget_seconds();
                self.publish(
                    EVENT_NEXT_QUESTION,
                    &NextQuestionEvent {
                        question: self.question_payload(question),
                        time_left,
                    },
                );
                if let Some(budget) = time_left {
                    self.start_countdown(budget).await;
                }
            }
            SessionPhase::Completed => self.broadcast_game_ended().await?,
            SessionPhase::Waiting => unreachable!("advance never yields waiting"),
        }

        Ok(next)
    }

    async fn finish_internal(self: &Arc<Self>) -> Result<(), GameError> {
        let (_, _next) = self
            .run_transition(SessionCommand::Finish, |next| self.persist_phase(next))
            .await?;
        self.broadcast_game_ended().await
    }

    /// Persistence work shared by every phase change: the session row first,
    /// and the quiz completion flag when the session just finished.
    async fn persist_phase(&self, next: SessionPhase) -> Result<(), GameError> {
        self.store
            .update_session(self.session_id, next.status(), next.question_index())
            .await?;
        if next == SessionPhase::Completed {
            self.store.mark_quiz_completed(self.quiz.quiz.id).await?;
        }
        Ok(())
    }

    /// Final standings are re-fetched from the store; a stale broadcast
    /// payload is never reused for the end-of-game ranking.
    async fn broadcast_game_ended(&self) -> Result<(), GameError> {
        let leaderboard = standings(&self.store, self.session_id).await?;
        self.publish(EVENT_GAME_ENDED, &GameEndedEvent { leaderboard });
        info!(session_id = %self.session_id, "game ended");
        Ok(())
    }

    fn question_payload(&self, index: usize) -> QuestionPayload {
        QuestionPayload::new(&self.quiz.questions[index], index, self.quiz.questions.len())
    }

    fn publish(&self, event: &str, payload: &impl Serialize) {
        match SessionMessage::json(event, payload) {
            Ok(message) => self.bus.publish(self.session_id, message),
            Err(err) => warn!(event, error = %err, "failed to serialize broadcast payload"),
        }
    }

    /// Invalidate the running countdown: bump the generation (any expiry
    /// sequence past its tick loop gives up at its next check) and abort the
    /// ticking task if one is still alive.
    async fn cancel_timer(&self) {
        let mut slot = self.timer.lock().await;
        slot.generation += 1;
        if let Some(handle) = slot.handle.take() {
            handle.abort();
            debug!(session_id = %self.session_id, "countdown cancelled");
        }
    }

    async fn start_countdown(self: &Arc<Self>, budget: u32) {
        let mut slot = self.timer.lock().await;
        slot.generation += 1;
        let generation = slot.generation;
        if let Some(stale) = slot.handle.take() {
            stale.abort();
        }
        let inner = Arc::clone(self);
        slot.handle = Some(tokio::spawn(inner.run_countdown(generation, budget)));
    }

    // Returns an explicitly-boxed `Send` future rather than an `async fn`
    // opaque: `start_countdown` spawns this future, and with every method in
    // the pacing cycle (run_countdown -> advance_internal -> start_countdown ->
    // spawn) returning opaque `impl Future`s in this same module, the compiler
    // cannot resolve the self-referential `Send` bound. A concrete boxed
    // return type satisfies the `spawn` bound by declaration and breaks it.
    fn run_countdown(
        self: Arc<Self>,
        generation: u64,
        budget: u32,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        Box::pin(async move {
        let mut remaining = budget;
        let mut ticker = interval(std::time::Duration::from_secs(1));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // first tick completes immediately

        while remaining > 0 {
            ticker.tick().await;
            remaining -= 1;
            self.publish(
                EVENT_TIMER_UPDATE,
                &TimerUpdateEvent {
                    time_left: remaining,
                },
            );
        }

        // Claim the slot: from here on a manual advance can no longer abort
        // this task, it can only invalidate the generation.
        {
            let mut slot = self.timer.lock().await;
            if slot.generation != generation {
                return;
            }
            slot.handle = None;
        }

        match standings(&self.store, self.session_id).await {
            Ok(leaderboard) => {
                self.publish(EVENT_REVEAL_ANSWER, &RevealAnswerEvent { leaderboard })
            }
            Err(err) => warn!(error = %err, "failed to compute standings for reveal"),
        }

        // Feedback window: players see the correct answer and the standings
        // for the question they just answered before the next one appears.
        sleep(self.config.reveal_hold).await;

        {
            let slot = self.timer.lock().await;
            if slot.generation != generation {
                // The host advanced manually during the hold.
                return;
            }
        }

        if let Err(err) = self.advance_internal().await {
            warn!(session_id = %self.session_id, error = %err, "auto-advance after expiry failed");
        }
        })
    }
}

/// Generate a 6-digit pin that does not collide with another open session.
async fn generate_pin(store: &Arc<dyn QuizStore>) -> Result<String, GameError> {
    for _ in 0..PIN_GENERATION_ATTEMPTS {
        let candidate = format!("{}", rand::rng().random_range(100_000..=999_999));
        if store.find_session_by_pin(candidate.clone()).await?.is_none() {
            return Ok(candidate);
        }
    }
    Err(GameError::Conflict(
        "could not allocate a unique session pin".into(),
    ))
}
