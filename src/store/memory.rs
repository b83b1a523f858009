//! In-memory [`QuizStore`] backend.
//!
//! Reference implementation used by the scripted demo and the test suite.
//! It honours the same contract as a networked backend: join-ordered player
//! listings, atomic score increments, duplicate-answer rejection, and
//! per-session row-change notifications.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::BoxFuture;
use indexmap::IndexMap;
use thiserror::Error;
use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

use crate::store::{
    QuizStore,
    models::{
        PlayerAnswerEntity, PlayerChange, PlayerChangeKind, PlayerEntity, QuestionEntity,
        QuizEntity, SessionEntity, SessionStatus,
    },
    storage::{StorageError, StorageResult},
};

const WATCHER_CAPACITY: usize = 64;

#[derive(Debug, Error)]
#[error("memory store switched offline")]
struct Offline;

/// In-memory store; clones share the same tables.
#[derive(Clone)]
pub struct MemoryQuizStore {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    quizzes: DashMap<Uuid, QuizEntity>,
    questions: DashMap<Uuid, Vec<QuestionEntity>>,
    sessions: DashMap<Uuid, SessionEntity>,
    // Join order is semantic: the leaderboard tiebreak reads it back.
    players: RwLock<IndexMap<Uuid, PlayerEntity>>,
    answers: DashMap<(Uuid, Uuid), PlayerAnswerEntity>,
    watchers: DashMap<Uuid, broadcast::Sender<PlayerChange>>,
    online: AtomicBool,
}

impl Default for MemoryQuizStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQuizStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                quizzes: DashMap::new(),
                questions: DashMap::new(),
                sessions: DashMap::new(),
                players: RwLock::new(IndexMap::new()),
                answers: DashMap::new(),
                watchers: DashMap::new(),
                online: AtomicBool::new(true),
            }),
        }
    }

    /// Install a quiz and its questions, replacing any previous rows.
    pub fn seed_quiz(&self, quiz: QuizEntity, mut questions: Vec<QuestionEntity>) {
        questions.sort_by_key(|q| q.order);
        self.inner.questions.insert(quiz.id, questions);
        self.inner.quizzes.insert(quiz.id, quiz);
    }

    /// Toggle a simulated outage; while offline every operation fails with
    /// [`StorageError::Unavailable`].
    pub fn set_online(&self, online: bool) {
        self.inner.online.store(online, Ordering::SeqCst);
    }

    fn notify(inner: &MemoryInner, kind: PlayerChangeKind, player: PlayerEntity) {
        if let Some(sender) = inner.watchers.get(&player.session_id) {
            // Fire-and-forget; a watcher with no live receivers is fine.
            let _ = sender.send(PlayerChange { kind, player });
        }
    }
}

impl MemoryInner {
    fn ensure_online(&self, operation: &str) -> StorageResult<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::unavailable(operation.to_string(), Offline))
        }
    }
}

impl QuizStore for MemoryQuizStore {
    fn find_quiz(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<QuizEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.ensure_online("find_quiz")?;
            Ok(inner.quizzes.get(&id).map(|row| row.clone()))
        })
    }

    fn find_questions(
        &self,
        quiz_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<QuestionEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.ensure_online("find_questions")?;
            Ok(inner
                .questions
                .get(&quiz_id)
                .map(|rows| rows.clone())
                .unwrap_or_default())
        })
    }

    fn mark_quiz_completed(&self, id: Uuid) -> BoxFuture<'static, StorageResult<bool>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.ensure_online("mark_quiz_completed")?;
            match inner.quizzes.get_mut(&id) {
                Some(mut row) => {
                    row.completed = true;
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    fn insert_session(
        &self,
        session: SessionEntity,
    ) -> BoxFuture<'static, StorageResult<SessionEntity>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.ensure_online("insert_session")?;
            inner.sessions.insert(session.id, session.clone());
            Ok(session)
        })
    }

    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.ensure_online("find_session")?;
            Ok(inner.sessions.get(&id).map(|row| row.clone()))
        })
    }

    fn find_session_by_pin(
        &self,
        pin: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.ensure_online("find_session_by_pin")?;
            Ok(inner
                .sessions
                .iter()
                .find(|row| row.pin == pin && row.status != SessionStatus::Completed)
                .map(|row| row.clone()))
        })
    }

    fn find_open_session(
        &self,
        quiz_id: Uuid,
        host_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.ensure_online("find_open_session")?;
            Ok(inner
                .sessions
                .iter()
                .find(|row| {
                    row.quiz_id == quiz_id
                        && row.host_id == host_id
                        && row.status != SessionStatus::Completed
                })
                .map(|row| row.clone()))
        })
    }

    fn update_session(
        &self,
        id: Uuid,
        status: SessionStatus,
        current_question: Option<usize>,
    ) -> BoxFuture<'static, StorageResult<SessionEntity>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.ensure_online("update_session")?;
            let mut row = inner
                .sessions
                .get_mut(&id)
                .ok_or_else(|| StorageError::RowMissing(format!("session `{id}`")))?;
            row.status = status;
            row.current_question = current_question;
            Ok(row.clone())
        })
    }

    fn insert_player(
        &self,
        player: PlayerEntity,
    ) -> BoxFuture<'static, StorageResult<PlayerEntity>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.ensure_online("insert_player")?;
            {
                let mut players = inner.players.write().await;
                players.insert(player.id, player.clone());
            }
            MemoryQuizStore::notify(&inner, PlayerChangeKind::Inserted, player.clone());
            Ok(player)
        })
    }

    fn find_player_by_nickname(
        &self,
        session_id: Uuid,
        nickname: String,
    ) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.ensure_online("find_player_by_nickname")?;
            let players = inner.players.read().await;
            Ok(players
                .values()
                .find(|row| row.session_id == session_id && row.nickname == nickname)
                .cloned())
        })
    }

    fn list_players(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.ensure_online("list_players")?;
            let players = inner.players.read().await;
            Ok(players
                .values()
                .filter(|row| row.session_id == session_id)
                .cloned()
                .collect())
        })
    }

    fn add_to_player_score(
        &self,
        player_id: Uuid,
        delta: u32,
    ) -> BoxFuture<'static, StorageResult<PlayerEntity>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.ensure_online("add_to_player_score")?;
            let updated = {
                let mut players = inner.players.write().await;
                let row = players
                    .get_mut(&player_id)
                    .ok_or_else(|| StorageError::RowMissing(format!("player `{player_id}`")))?;
                row.total_score += delta;
                row.clone()
            };
            MemoryQuizStore::notify(&inner, PlayerChangeKind::Updated, updated.clone());
            Ok(updated)
        })
    }

    fn insert_answer(
        &self,
        answer: PlayerAnswerEntity,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.ensure_online("insert_answer")?;
            match inner.answers.entry((answer.player_id, answer.question_id)) {
                Entry::Occupied(_) => Ok(false),
                Entry::Vacant(slot) => {
                    slot.insert(answer);
                    Ok(true)
                }
            }
        })
    }

    fn list_answers(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<PlayerAnswerEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.ensure_online("list_answers")?;
            let players = inner.players.read().await;
            let session_players: Vec<Uuid> = players
                .values()
                .filter(|row| row.session_id == session_id)
                .map(|row| row.id)
                .collect();
            drop(players);
            Ok(inner
                .answers
                .iter()
                .filter(|entry| session_players.contains(&entry.key().0))
                .map(|entry| entry.value().clone())
                .collect())
        })
    }

    fn watch_players(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<broadcast::Receiver<PlayerChange>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.ensure_online("watch_players")?;
            let sender = inner
                .watchers
                .entry(session_id)
                .or_insert_with(|| broadcast::channel(WATCHER_CAPACITY).0);
            Ok(sender.subscribe())
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move { inner.ensure_online("health_check") })
    }
}
