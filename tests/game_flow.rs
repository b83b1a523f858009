//! End-to-end tests for the session synchronization protocol.
//!
//! Every scenario runs a real host and real player agents against the
//! in-memory store and the session bus; nothing is mocked below the public
//! API.

use std::{sync::Arc, time::Duration};

use quiz_pulse_core::{
    bus::EventBus,
    config::EngineConfig,
    dto::{
        events::{
            EVENT_GAME_ENDED, EVENT_GAME_STARTED, EVENT_NEXT_QUESTION, EVENT_REVEAL_ANSWER,
            EVENT_TIMER_UPDATE, SessionMessage,
        },
        game::JoinRequest,
    },
    error::GameError,
    host::HostController,
    player::{PlayerClient, precheck_join},
    quiz::{QuestionDefinition, QuizDefinition, build_quiz},
    session::SessionPhase,
    store::{
        QuizStore,
        memory::MemoryQuizStore,
        models::{QuizEntity, SessionStatus},
    },
};
use tokio::{sync::broadcast, time::timeout};
use uuid::Uuid;

const CORRECT: &str = "Beta";
const WRONG: &str = "Alpha";

struct Rig {
    memory: MemoryQuizStore,
    store: Arc<dyn QuizStore>,
    bus: EventBus,
    config: EngineConfig,
    quiz_id: Uuid,
    host_id: Uuid,
}

impl Rig {
    fn new(has_timer: bool, timer_seconds: u32, question_count: usize) -> Self {
        let memory = MemoryQuizStore::new();
        let host_id = Uuid::new_v4();
        let (quiz, questions) = build_quiz(
            host_id,
            quiz_definition(has_timer, timer_seconds, question_count),
        )
        .unwrap();
        let quiz_id = quiz.id;
        memory.seed_quiz(quiz, questions);

        let config = EngineConfig {
            reveal_hold: Duration::from_secs(1),
            ..EngineConfig::default()
        };
        let bus = EventBus::new(config.bus_capacity);
        let store: Arc<dyn QuizStore> = Arc::new(memory.clone());

        Self {
            memory,
            store,
            bus,
            config,
            quiz_id,
            host_id,
        }
    }

    async fn host(&self) -> HostController {
        HostController::create_or_resume(
            self.store.clone(),
            self.bus.clone(),
            self.config.clone(),
            self.quiz_id,
            self.host_id,
        )
        .await
        .unwrap()
    }

    async fn join(&self, host: &HostController, nickname: &str) -> PlayerClient {
        PlayerClient::join(
            self.store.clone(),
            self.bus.clone(),
            JoinRequest {
                pin: host.pin().to_string(),
                nickname: nickname.to_string(),
            },
        )
        .await
        .unwrap()
    }
}

fn quiz_definition(has_timer: bool, timer_seconds: u32, question_count: usize) -> QuizDefinition {
    QuizDefinition {
        title: "Protocol check".into(),
        has_timer,
        question_timer_seconds: timer_seconds,
        questions: (0..question_count)
            .map(|index| QuestionDefinition {
                text: format!("Question {}", index + 1),
                options: vec![WRONG.into(), CORRECT.into(), "Gamma".into()],
                correct_answer: CORRECT.into(),
                explanation: "Beta is always right here.".into(),
            })
            .collect(),
    }
}

/// Apply broadcasts until one with the given name arrives.
async fn pump_until(player: &mut PlayerClient, event: &str) -> SessionMessage {
    timeout(Duration::from_secs(30), async {
        loop {
            if let Some(message) = player.next_message().await.unwrap() {
                if message.event == event {
                    return message;
                }
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for `{event}`"))
}

/// Drain everything currently buffered on a subscriber.
fn drain(receiver: &mut broadcast::Receiver<SessionMessage>) -> Vec<SessionMessage> {
    let mut messages = Vec::new();
    while let Ok(message) = receiver.try_recv() {
        messages.push(message);
    }
    messages
}

mod bootstrap_tests {
    use super::*;

    /// A host reload must land back in the same open session.
    #[tokio::test]
    async fn create_or_resume_returns_the_same_open_session() {
        let rig = Rig::new(false, 0, 2);
        let first = rig.host().await;
        let second = rig.host().await;

        assert_eq!(first.session_id(), second.session_id());
        assert_eq!(first.pin(), second.pin());
    }

    #[tokio::test]
    async fn missing_quiz_is_not_found() {
        let rig = Rig::new(false, 0, 2);
        let result = HostController::create_or_resume(
            rig.store.clone(),
            rig.bus.clone(),
            rig.config.clone(),
            Uuid::new_v4(),
            rig.host_id,
        )
        .await;
        assert!(matches!(result, Err(GameError::NotFound(_))));
    }

    #[tokio::test]
    async fn quiz_with_zero_questions_is_not_found() {
        let rig = Rig::new(false, 0, 2);
        let empty_quiz = QuizEntity {
            id: Uuid::new_v4(),
            host_id: rig.host_id,
            title: "Empty".into(),
            has_timer: false,
            question_timer_seconds: 0,
            completed: false,
        };
        let empty_id = empty_quiz.id;
        rig.memory.seed_quiz(empty_quiz, Vec::new());

        let result = HostController::create_or_resume(
            rig.store.clone(),
            rig.bus.clone(),
            rig.config.clone(),
            empty_id,
            rig.host_id,
        )
        .await;
        assert!(matches!(result, Err(GameError::NotFound(_))));
    }
}

mod join_tests {
    use super::*;

    #[tokio::test]
    async fn unknown_pin_is_not_found() {
        let rig = Rig::new(false, 0, 2);
        let _host = rig.host().await;

        let result = PlayerClient::join(
            rig.store.clone(),
            rig.bus.clone(),
            JoinRequest {
                pin: "000000".into(),
                nickname: "ada".into(),
            },
        )
        .await;
        assert!(matches!(result, Err(GameError::NotFound(_))));
    }

    #[tokio::test]
    async fn malformed_pin_is_rejected_before_any_lookup() {
        let rig = Rig::new(false, 0, 2);
        let result = PlayerClient::join(
            rig.store.clone(),
            rig.bus.clone(),
            JoinRequest {
                pin: "12ab".into(),
                nickname: "ada".into(),
            },
        )
        .await;
        assert!(matches!(result, Err(GameError::InvalidInput(_))));
    }

    /// Two identical joins must end up sharing one player row.
    #[tokio::test]
    async fn identical_joins_create_one_row() {
        let rig = Rig::new(false, 0, 2);
        let host = rig.host().await;

        let first = rig.join(&host, "ada").await;
        let second = rig.join(&host, "ada").await;

        assert_eq!(first.player().id, second.player().id);
        assert_eq!(first.session_id(), host.session_id());
        let players = host.players().await.unwrap();
        assert_eq!(players.len(), 1);
    }

    #[tokio::test]
    async fn precheck_reports_taken_nicknames() {
        let rig = Rig::new(false, 0, 2);
        let host = rig.host().await;
        let _ada = rig.join(&host, "ada").await;

        let request = JoinRequest {
            pin: host.pin().to_string(),
            nickname: "ada".into(),
        };
        let result = precheck_join(&rig.store, &request).await;
        assert!(matches!(result, Err(GameError::Conflict(_))));

        let request = JoinRequest {
            pin: host.pin().to_string(),
            nickname: "grace".into(),
        };
        assert!(precheck_join(&rig.store, &request).await.is_ok());
    }
}

mod lifecycle_tests {
    use super::*;

    /// Starting an empty session fails and must not leak any broadcast.
    #[tokio::test]
    async fn start_with_zero_players_is_rejected_and_silent() {
        let rig = Rig::new(false, 0, 2);
        let host = rig.host().await;
        let mut events = host.events();

        let result = host.start().await;
        assert!(matches!(result, Err(GameError::Conflict(_))));
        assert_eq!(host.phase().await, SessionPhase::Waiting);
        assert!(drain(&mut events).is_empty());
    }

    /// A failed persistence aborts the transition: no broadcast goes out and
    /// the machine stays usable for a retry.
    #[tokio::test]
    async fn persistence_failure_suppresses_broadcast_and_allows_retry() {
        let rig = Rig::new(false, 0, 3);
        let host = rig.host().await;
        let _ada = rig.join(&host, "ada").await;
        host.start().await.unwrap();

        let mut events = host.events();
        rig.memory.set_online(false);
        let result = host.advance().await;
        assert!(matches!(result, Err(GameError::Persistence(_))));
        assert_eq!(host.phase().await, SessionPhase::Active { question: 0 });
        assert_eq!(
            host.current_question().await.map(|q| q.index),
            Some(0)
        );
        assert!(drain(&mut events).is_empty());

        rig.memory.set_online(true);
        let next = host.advance().await.unwrap();
        assert_eq!(next, SessionPhase::Active { question: 1 });
        let replay = drain(&mut events);
        assert_eq!(replay.len(), 1);
        assert_eq!(replay[0].event, EVENT_NEXT_QUESTION);
    }

    /// Advancing past the last question twice completes once and emits one
    /// `game_ended`.
    #[tokio::test]
    async fn double_advance_at_the_end_completes_once() {
        let rig = Rig::new(false, 0, 1);
        let host = rig.host().await;
        let _ada = rig.join(&host, "ada").await;
        let mut events = host.events();
        host.start().await.unwrap();

        assert_eq!(host.advance().await.unwrap(), SessionPhase::Completed);
        let second = host.advance().await;
        assert!(matches!(second, Err(GameError::InvalidState(_))));

        let ended = drain(&mut events)
            .into_iter()
            .filter(|message| message.event == EVENT_GAME_ENDED)
            .count();
        assert_eq!(ended, 1);
    }

    #[tokio::test]
    async fn completed_sessions_never_restart() {
        let rig = Rig::new(false, 0, 1);
        let host = rig.host().await;
        let _ada = rig.join(&host, "ada").await;
        host.start().await.unwrap();
        host.advance().await.unwrap();

        assert!(matches!(host.start().await, Err(GameError::InvalidState(_))));
        assert_eq!(host.phase().await, SessionPhase::Completed);

        // The quiz is flagged completed and a new bootstrap opens a fresh
        // session instead of resurrecting the finished one.
        let session = rig.store.find_session(host.session_id()).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Completed);

        let next_host = rig.host().await;
        assert_ne!(next_host.session_id(), host.session_id());
        assert_eq!(next_host.phase().await, SessionPhase::Waiting);
    }

    #[tokio::test]
    async fn finish_ends_a_session_early() {
        let rig = Rig::new(false, 0, 5);
        let host = rig.host().await;
        let _ada = rig.join(&host, "ada").await;
        let mut events = host.events();
        host.start().await.unwrap();

        host.finish().await.unwrap();
        assert_eq!(host.phase().await, SessionPhase::Completed);
        let ended = drain(&mut events)
            .into_iter()
            .filter(|message| message.event == EVENT_GAME_ENDED)
            .count();
        assert_eq!(ended, 1);
    }
}

mod scoring_flow_tests {
    use super::*;

    /// The §-level accounting property: a player's stored total equals the
    /// exact sum of the per-answer scores, across a full scripted session.
    #[tokio::test]
    async fn three_question_session_sums_scores_exactly() {
        let rig = Rig::new(false, 0, 3);
        let host = rig.host().await;
        let mut ada = rig.join(&host, "ada").await;
        let mut edsger = rig.join(&host, "edsger").await;

        host.start().await.unwrap();

        let mut ada_scores = Vec::new();
        for round in 0..3 {
            let question_event = if round == 0 {
                EVENT_GAME_STARTED
            } else {
                EVENT_NEXT_QUESTION
            };
            pump_until(&mut ada, question_event).await;
            pump_until(&mut edsger, question_event).await;

            let receipt = ada.submit_answer(CORRECT).await.unwrap().unwrap();
            assert!(receipt.is_correct);
            assert!((100..=1000).contains(&receipt.score));
            ada_scores.push(receipt.score);

            let wrong = edsger.submit_answer(WRONG).await.unwrap().unwrap();
            assert!(!wrong.is_correct);
            assert_eq!(wrong.score, 0);

            host.advance().await.unwrap();
        }

        pump_until(&mut ada, EVENT_GAME_ENDED).await;
        pump_until(&mut edsger, EVENT_GAME_ENDED).await;

        let expected: u32 = ada_scores.iter().sum();
        assert_eq!(ada.total_score(), expected);

        let players = host.players().await.unwrap();
        let ada_row = players.iter().find(|p| p.nickname == "ada").unwrap();
        assert_eq!(ada_row.total_score, expected);
        let edsger_row = players.iter().find(|p| p.nickname == "edsger").unwrap();
        assert_eq!(edsger_row.total_score, 0);

        let board = ada.leaderboard();
        assert_eq!(board[0].nickname, "ada");
        assert_eq!(board[0].rank, 1);
        assert_eq!(board[1].nickname, "edsger");
    }

    /// A reconnect must not allow scoring the same question twice: the store
    /// rejects the duplicate row and the total stays put.
    #[tokio::test]
    async fn duplicate_submission_after_reconnect_scores_once() {
        let rig = Rig::new(false, 0, 2);
        let host = rig.host().await;
        let mut ada = rig.join(&host, "ada").await;
        host.start().await.unwrap();

        pump_until(&mut ada, EVENT_GAME_STARTED).await;
        let receipt = ada.submit_answer(CORRECT).await.unwrap().unwrap();

        // Second submission on the same client is a local no-op.
        assert!(ada.submit_answer(CORRECT).await.unwrap().is_none());

        // A reloaded client reuses the row but has a fresh submitted flag;
        // the store-level guard must still refuse a second score.
        let mut ada_again = rig.join(&host, "ada").await;
        ada_again.resync().await.unwrap();
        assert_eq!(
            ada_again.current_question().map(|q| q.index),
            Some(0)
        );
        assert!(ada_again.submit_answer(WRONG).await.unwrap().is_none());

        let players = host.players().await.unwrap();
        assert_eq!(players.len(), 1);
        assert_eq!(players[0].total_score, receipt.score);

        let answers = rig.store.list_answers(host.session_id()).await.unwrap();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].selected_answer, CORRECT);
    }

    /// A player that missed `next_question` converges on resync.
    #[tokio::test]
    async fn resync_recovers_a_missed_question() {
        let rig = Rig::new(false, 0, 2);
        let host = rig.host().await;
        let mut ada = rig.join(&host, "ada").await;
        host.start().await.unwrap();
        pump_until(&mut ada, EVENT_GAME_STARTED).await;

        // The broadcast is "lost": ada never processes it.
        host.advance().await.unwrap();
        ada.resync().await.unwrap();
        assert_eq!(ada.current_question().map(|q| q.index), Some(1));

        host.advance().await.unwrap();
        ada.resync().await.unwrap();
        assert!(ada.is_game_over());
    }
}

mod timer_tests {
    use super::*;

    /// With a timer, the host countdown alone drives the session through
    /// ticks, reveals, and completion.
    #[tokio::test(start_paused = true)]
    async fn countdown_drives_the_session_to_completion() {
        let rig = Rig::new(true, 2, 2);
        let host = rig.host().await;
        let _ada = rig.join(&host, "ada").await;
        let mut events = host.events();
        host.start().await.unwrap();

        let mut seen = Vec::new();
        timeout(Duration::from_secs(120), async {
            loop {
                let message = events.recv().await.unwrap();
                let done = message.event == EVENT_GAME_ENDED;
                seen.push(message.event);
                if done {
                    break;
                }
            }
        })
        .await
        .expect("session never completed");

        assert_eq!(host.phase().await, SessionPhase::Completed);
        assert!(seen.iter().any(|event| event == EVENT_TIMER_UPDATE));
        assert!(seen.iter().any(|event| event == EVENT_REVEAL_ANSWER));
        assert_eq!(
            seen.iter().filter(|event| *event == EVENT_NEXT_QUESTION).count(),
            1
        );
        assert_eq!(
            seen.iter().filter(|event| *event == EVENT_GAME_ENDED).count(),
            1
        );
    }

    /// Manually advancing cancels the running countdown: no stale ticks, no
    /// duplicate auto-advance.
    #[tokio::test(start_paused = true)]
    async fn manual_advance_cancels_the_countdown() {
        let rig = Rig::new(true, 60, 2);
        let host = rig.host().await;
        let _ada = rig.join(&host, "ada").await;
        let mut events = host.events();
        host.start().await.unwrap();

        assert_eq!(
            host.advance().await.unwrap(),
            SessionPhase::Active { question: 1 }
        );
        assert_eq!(
            host.advance().await.unwrap(),
            SessionPhase::Completed
        );

        // Give any stale countdown plenty of virtual time to misbehave.
        tokio::time::sleep(Duration::from_secs(300)).await;

        let after = drain(&mut events);
        let ended = after.iter().filter(|m| m.event == EVENT_GAME_ENDED).count();
        assert_eq!(ended, 1);
        // Nothing fires after completion: the first countdown was aborted
        // and the second one was invalidated by the manual advance.
        assert_eq!(after.last().unwrap().event, EVENT_GAME_ENDED);
    }

    /// Timer expiry auto-submits a selected-but-unsubmitted option, exactly
    /// once, even though both the local tick and the authoritative zero
    /// update race to do it.
    #[tokio::test(start_paused = true)]
    async fn timer_expiry_auto_submits_the_selection() {
        let rig = Rig::new(true, 2, 1);
        let host = rig.host().await;
        let mut ada = rig.join(&host, "ada").await;
        host.start().await.unwrap();

        pump_until(&mut ada, EVENT_GAME_STARTED).await;
        assert_eq!(ada.time_left(), Some(2));
        ada.select_answer(CORRECT).unwrap();

        timeout(Duration::from_secs(120), ada.run())
            .await
            .expect("player loop never finished")
            .unwrap();

        assert!(ada.is_game_over());
        assert!(ada.total_score() > 0);

        let answers = rig.store.list_answers(host.session_id()).await.unwrap();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].score, ada.total_score());
    }

    /// Expiry with nothing selected writes no answer row at all.
    #[tokio::test(start_paused = true)]
    async fn timer_expiry_without_selection_writes_nothing() {
        let rig = Rig::new(true, 2, 1);
        let host = rig.host().await;
        let mut ada = rig.join(&host, "ada").await;
        host.start().await.unwrap();

        pump_until(&mut ada, EVENT_GAME_STARTED).await;
        timeout(Duration::from_secs(120), ada.run())
            .await
            .expect("player loop never finished")
            .unwrap();

        assert!(ada.is_game_over());
        assert_eq!(ada.total_score(), 0);
        let answers = rig.store.list_answers(host.session_id()).await.unwrap();
        assert!(answers.is_empty());
    }
}
