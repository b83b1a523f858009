//! Player client agent: one instance per participant.
//!
//! The agent renders whatever the host broadcasts and only ever writes its
//! own rows (player, answers). Its countdown is cosmetic interpolation
//! between authoritative `timer_update` broadcasts; whenever delivery gaps
//! are detected it falls back to re-reading the store.

use std::{
    sync::Arc,
    time::{Duration, Instant, SystemTime},
};

use tokio::{
    sync::broadcast::{self, error::RecvError},
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    bus::EventBus,
    dto::{
        events::{
            EVENT_GAME_ENDED, EVENT_GAME_STARTED, EVENT_NEXT_QUESTION, EVENT_PLAYER_ANSWERED,
            EVENT_PLAYER_JOINED, EVENT_REVEAL_ANSWER, EVENT_TIMER_UPDATE, GameEndedEvent,
            GameStartedEvent, NextQuestionEvent, PlayerAnsweredEvent, PlayerJoinedEvent,
            QuestionPayload, RevealAnswerEvent, SessionMessage, TimerUpdateEvent,
        },
        game::JoinRequest,
    },
    error::GameError,
    leaderboard::{LeaderboardEntry, standings},
    scoring::{DEFAULT_TIME_BUDGET_MS, score},
    store::{
        QuizStore,
        models::{PlayerAnswerEntity, PlayerEntity, SessionEntity, SessionStatus},
    },
};

/// The question a player is currently looking at, with its local clock.
#[derive(Debug)]
struct ActiveQuestion {
    question: QuestionPayload,
    started: Instant,
    time_left: Option<u32>,
    budget_ms: u32,
    selected: Option<String>,
    submitted: bool,
}

impl ActiveQuestion {
    fn new(question: QuestionPayload, time_left: Option<u32>) -> Self {
        let budget_ms = time_left
            .map(|seconds| seconds * 1000)
            .unwrap_or(DEFAULT_TIME_BUDGET_MS);
        Self {
            question,
            started: Instant::now(),
            time_left,
            budget_ms,
            selected: None,
            submitted: false,
        }
    }
}

/// Resolve a pin and verify the nickname is free, without creating anything.
///
/// This is the pre-join check a lobby UI runs before navigating into the
/// game; [`PlayerClient::join`] itself treats an existing row as a reconnect.
pub async fn precheck_join(
    store: &Arc<dyn QuizStore>,
    request: &JoinRequest,
) -> Result<SessionEntity, GameError> {
    request.validate()?;

    let Some(session) = store.find_session_by_pin(request.pin.clone()).await? else {
        return Err(GameError::NotFound(format!(
            "no open session with pin `{}`",
            request.pin
        )));
    };

    if store
        .find_player_by_nickname(session.id, request.nickname.clone())
        .await?
        .is_some()
    {
        return Err(GameError::Conflict(format!(
            "nickname `{}` is already taken in this session",
            request.nickname
        )));
    }

    Ok(session)
}

/// One participant's view of a session.
pub struct PlayerClient {
    store: Arc<dyn QuizStore>,
    session: SessionEntity,
    player: PlayerEntity,
    events: broadcast::Receiver<SessionMessage>,
    bus: EventBus,
    current: Option<ActiveQuestion>,
    leaderboard: Vec<LeaderboardEntry>,
    game_over: bool,
}

impl PlayerClient {
    /// Join a session by pin and nickname.
    ///
    /// Fails with `NotFound` when no open session carries the pin. When a
    /// player row with the same nickname already exists it is reused without
    /// erroring, so a reload rejoins the same identity and never creates a
    /// second row.
    pub async fn join(
        store: Arc<dyn QuizStore>,
        bus: EventBus,
        request: JoinRequest,
    ) -> Result<Self, GameError> {
        request.validate()?;

        let Some(session) = store.find_session_by_pin(request.pin.clone()).await? else {
            return Err(GameError::NotFound(format!(
                "no open session with pin `{}`",
                request.pin
            )));
        };

        let existing = store
            .find_player_by_nickname(session.id, request.nickname.clone())
            .await?;

        // Subscribe before announcing so the agent cannot miss messages
        // published in response to its own join.
        let events = bus.subscribe(session.id);

        let (player, fresh) = match existing {
            Some(player) => {
                debug!(player_id = %player.id, "rejoining with an existing player row");
                (player, false)
            }
            None => {
                let player = store
                    .insert_player(PlayerEntity {
                        id: Uuid::new_v4(),
                        session_id: session.id,
                        nickname: request.nickname.clone(),
                        total_score: 0,
                        created_at: SystemTime::now(),
                    })
                    .await?;
                (player, true)
            }
        };

        if fresh {
            match SessionMessage::json(
                EVENT_PLAYER_JOINED,
                &PlayerJoinedEvent {
                    player: player.clone(),
                },
            ) {
                Ok(message) => bus.publish(session.id, message),
                Err(err) => warn!(error = %err, "failed to serialize join announcement"),
            }
            info!(session_id = %session.id, nickname = %player.nickname, "player joined");
        }

        Ok(Self {
            store,
            session,
            player,
            events,
            bus,
            current: None,
            leaderboard: Vec::new(),
            game_over: false,
        })
    }

    /// The player row this agent owns.
    pub fn player(&self) -> &PlayerEntity {
        &self.player
    }

    /// Session the agent joined.
    pub fn session_id(&self) -> Uuid {
        self.session.id
    }

    /// The question currently displayed, if any.
    pub fn current_question(&self) -> Option<&QuestionPayload> {
        self.current.as_ref().map(|active| &active.question)
    }

    /// Seconds remaining on the displayed countdown, if a timer runs.
    pub fn time_left(&self) -> Option<u32> {
        self.current.as_ref().and_then(|active| active.time_left)
    }

    /// Last standings received (or re-fetched at game end).
    pub fn leaderboard(&self) -> &[LeaderboardEntry] {
        &self.leaderboard
    }

    /// Whether the session has ended.
    pub fn is_game_over(&self) -> bool {
        self.game_over
    }

    /// Total score of this player as last read back from the store.
    pub fn total_score(&self) -> u32 {
        self.player.total_score
    }

    /// Remember an option as the player's pick for the current question.
    /// Picks after submission are ignored, mirroring a disabled answer grid.
    pub fn select_answer(&mut self, option: &str) -> Result<(), GameError> {
        let Some(active) = self.current.as_mut() else {
            return Err(GameError::InvalidState("no question is being served".into()));
        };

        if active.submitted {
            debug!("selection ignored: answer already submitted");
            return Ok(());
        }

        if !active.question.options.iter().any(|o| o == option) {
            return Err(GameError::InvalidInput(format!(
                "`{option}` is not an option of this question"
            )));
        }

        active.selected = Some(option.to_string());
        Ok(())
    }

    /// Select and submit in one step.
    ///
    /// Returns `Ok(None)` when there is no current question or an answer was
    /// already submitted; a no-op, not an error, because a manual click and
    /// the timer-expiry auto-submit routinely race.
    pub async fn submit_answer(
        &mut self,
        option: &str,
    ) -> Result<Option<PlayerAnsweredEvent>, GameError> {
        if self.current.is_none() {
            return Ok(None);
        }
        if self.current.as_ref().is_some_and(|active| active.submitted) {
            return Ok(None);
        }

        self.select_answer(option)?;
        self.submit_selected().await
    }

    /// Submit whatever option is currently selected.
    async fn submit_selected(&mut self) -> Result<Option<PlayerAnsweredEvent>, GameError> {
        let Some(active) = self.current.as_mut() else {
            return Ok(None);
        };
        if active.submitted {
            return Ok(None);
        }
        let Some(selected) = active.selected.clone() else {
            return Ok(None);
        };

        let question_id = active.question.id;
        let budget_ms = active.budget_ms;
        let elapsed_ms = active.started.elapsed().as_millis().min(u128::from(u32::MAX)) as u32;
        let response_time_ms = elapsed_ms.min(budget_ms);
        let is_correct = selected == active.question.correct_answer;
        let points = score(is_correct, response_time_ms, budget_ms);

        let answer = PlayerAnswerEntity {
            player_id: self.player.id,
            question_id,
            selected_answer: selected.clone(),
            is_correct,
            response_time_ms,
            score: points,
        };

        // The submitted flag only flips after the store accepted the row, so
        // a failed write leaves the player free to retry.
        let inserted = self.store.insert_answer(answer).await?;
        if let Some(active) = self.current.as_mut() {
            active.submitted = true;
        }

        if !inserted {
            debug!(%question_id, "duplicate submission suppressed by the store");
            return Ok(None);
        }

        let receipt = PlayerAnsweredEvent {
            player_id: self.player.id,
            question_id,
            selected_answer: selected,
            is_correct,
            response_time_ms,
            score: points,
        };
        match SessionMessage::json(EVENT_PLAYER_ANSWERED, &receipt) {
            Ok(message) => self.bus.publish(self.session.id, message),
            Err(err) => warn!(error = %err, "failed to serialize answer announcement"),
        }

        self.player = self.store.add_to_player_score(self.player.id, points).await?;

        Ok(Some(receipt))
    }

    /// Apply one broadcast to the local view. Unknown events are ignored.
    pub async fn handle_message(
        &mut self,
        message: &SessionMessage,
    ) -> Result<Option<PlayerAnsweredEvent>, GameError> {
        match message.event.as_str() {
            EVENT_GAME_STARTED => match message.payload::<GameStartedEvent>() {
                Ok(payload) => {
                    self.current = Some(ActiveQuestion::new(payload.question, payload.time_left));
                }
                Err(err) => warn!(error = %err, "malformed game_started payload"),
            },
            EVENT_NEXT_QUESTION => match message.payload::<NextQuestionEvent>() {
                Ok(payload) => {
                    self.current = Some(ActiveQuestion::new(payload.question, payload.time_left));
                }
                Err(err) => warn!(error = %err, "malformed next_question payload"),
            },
            EVENT_TIMER_UPDATE => match message.payload::<TimerUpdateEvent>() {
                Ok(payload) => {
                    // The host is the clock of record; local ticking only
                    // interpolates between these updates.
                    if let Some(active) = self.current.as_mut() {
                        active.time_left = Some(payload.time_left);
                    }
                    if payload.time_left == 0 {
                        return self.auto_submit().await;
                    }
                }
                Err(err) => warn!(error = %err, "malformed timer_update payload"),
            },
            EVENT_REVEAL_ANSWER => match message.payload::<RevealAnswerEvent>() {
                Ok(payload) => self.leaderboard = payload.leaderboard,
                Err(err) => warn!(error = %err, "malformed reveal_answer payload"),
            },
            EVENT_GAME_ENDED => match message.payload::<GameEndedEvent>() {
                Ok(payload) => {
                    self.game_over = true;
                    self.current = None;
                    // Broadcast delivery is best-effort, so the final ranking
                    // is read back from the store when possible.
                    self.leaderboard = match standings(&self.store, self.session.id).await {
                        Ok(fresh) => fresh,
                        Err(err) => {
                            warn!(error = %err, "falling back to broadcast standings");
                            payload.leaderboard
                        }
                    };
                }
                Err(err) => warn!(error = %err, "malformed game_ended payload"),
            },
            EVENT_PLAYER_JOINED | EVENT_PLAYER_ANSWERED => {
                debug!(event = %message.event, "peer event ignored");
            }
            other => debug!(event = %other, "unknown event ignored"),
        }

        Ok(None)
    }

    /// Advance the cosmetic countdown by one second. When it reaches zero
    /// with an option selected but not submitted, the selection is
    /// auto-submitted; with nothing selected, no answer row is written.
    pub async fn tick(&mut self) -> Result<Option<PlayerAnsweredEvent>, GameError> {
        let Some(active) = self.current.as_mut() else {
            return Ok(None);
        };
        let Some(time_left) = active.time_left else {
            return Ok(None);
        };

        if time_left > 0 {
            active.time_left = Some(time_left - 1);
        }

        if active.time_left == Some(0) {
            return self.auto_submit().await;
        }

        Ok(None)
    }

    async fn auto_submit(&mut self) -> Result<Option<PlayerAnsweredEvent>, GameError> {
        let should_submit = self
            .current
            .as_ref()
            .is_some_and(|active| active.selected.is_some() && !active.submitted);
        if should_submit {
            return self.submit_selected().await;
        }
        Ok(None)
    }

    /// Re-read store truth: session status, current question, own score.
    ///
    /// This is the gap-recovery path for missed broadcasts: a client that
    /// lost `next_question` or `game_ended` converges on the next resync.
    pub async fn resync(&mut self) -> Result<(), GameError> {
        let session = self
            .store
            .find_session(self.session.id)
            .await?
            .ok_or_else(|| {
                GameError::NotFound(format!("session `{}` no longer exists", self.session.id))
            })?;
        self.session = session.clone();

        if let Some(refreshed) = self
            .store
            .find_player_by_nickname(session.id, self.player.nickname.clone())
            .await?
        {
            self.player = refreshed;
        }

        match session.status {
            SessionStatus::Completed => {
                self.game_over = true;
                self.current = None;
                self.leaderboard = standings(&self.store, session.id).await?;
            }
            SessionStatus::Active => {
                let Some(index) = session.current_question else {
                    return Ok(());
                };
                let displayed = self
                    .current
                    .as_ref()
                    .map(|active| active.question.index);
                if displayed != Some(index) {
                    self.reload_question(index).await?;
                }
            }
            SessionStatus::Waiting => {}
        }

        Ok(())
    }

    async fn reload_question(&mut self, index: usize) -> Result<(), GameError> {
        let Some(quiz) = self.store.find_quiz(self.session.quiz_id).await? else {
            return Err(GameError::NotFound(format!(
                "quiz `{}` not found",
                self.session.quiz_id
            )));
        };
        let questions = self.store.find_questions(quiz.id).await?;
        let Some(question) = questions.get(index) else {
            return Err(GameError::InvalidState(format!(
                "session points at question {index} but the quiz has {}",
                questions.len()
            )));
        };

        let payload = QuestionPayload::new(question, index, questions.len());
        // The countdown stays unknown until the next timer_update; the local
        // budget still bounds the response time.
        let mut active = ActiveQuestion::new(payload, None);
        if quiz.has_timer {
            active.budget_ms = quiz.question_timer_seconds * 1000;
        }
        self.current = Some(active);
        Ok(())
    }

    /// Receive and apply the next broadcast, returning it so a UI can react.
    ///
    /// Returns `Ok(None)` when the channel closed or a delivery gap was
    /// bridged by a store resync instead of a message.
    pub async fn next_message(&mut self) -> Result<Option<SessionMessage>, GameError> {
        match self.events.recv().await {
            Ok(message) => {
                self.handle_message(&message).await?;
                Ok(Some(message))
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "broadcast gap detected; resyncing from store");
                self.resync().await?;
                Ok(None)
            }
            Err(RecvError::Closed) => Ok(None),
        }
    }

    /// Single-threaded event loop: applies broadcasts and ticks the local
    /// countdown until the game ends. Lagged receivers resync from the store
    /// instead of erroring.
    pub async fn run(&mut self) -> Result<(), GameError> {
        let mut ticker = interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.game_over {
            tokio::select! {
                outcome = self.events.recv() => match outcome {
                    Ok(message) => {
                        self.handle_message(&message).await?;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "broadcast gap detected; resyncing from store");
                        self.resync().await?;
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = ticker.tick() => {
                    self.tick().await?;
                }
            }
        }

        Ok(())
    }
}
