//! Persistence seam: the store is the single arbiter of durable state.
//!
//! The core only ever talks to [`QuizStore`]; backends (a relational store,
//! a document store, the in-memory reference implementation) live behind it.

pub mod memory;
pub mod models;
pub mod storage;

use futures::future::BoxFuture;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::store::{
    models::{
        PlayerAnswerEntity, PlayerChange, PlayerEntity, QuestionEntity, QuizEntity, SessionEntity,
        SessionStatus,
    },
    storage::StorageResult,
};

/// Abstraction over the persistence layer for quizzes, sessions, players and
/// answers. Every operation suspends; none blocks the caller's event loop.
pub trait QuizStore: Send + Sync {
    /// Fetch a quiz row by id.
    fn find_quiz(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<QuizEntity>>>;

    /// Fetch the questions of a quiz, ordered by their `order` column.
    fn find_questions(&self, quiz_id: Uuid)
    -> BoxFuture<'static, StorageResult<Vec<QuestionEntity>>>;

    /// Flag a quiz as completed. Returns `false` when the quiz does not exist.
    fn mark_quiz_completed(&self, id: Uuid) -> BoxFuture<'static, StorageResult<bool>>;

    /// Insert a session row and read it back.
    fn insert_session(
        &self,
        session: SessionEntity,
    ) -> BoxFuture<'static, StorageResult<SessionEntity>>;

    /// Fetch a session row by id.
    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;

    /// Resolve a join pin to a session. Only open (waiting or active)
    /// sessions are considered so stale pins from finished games do not match.
    fn find_session_by_pin(
        &self,
        pin: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;

    /// Find the open (waiting or active) session for a (quiz, host) pair.
    fn find_open_session(
        &self,
        quiz_id: Uuid,
        host_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;

    /// Persist a status/index change atomically and read the row back.
    fn update_session(
        &self,
        id: Uuid,
        status: SessionStatus,
        current_question: Option<usize>,
    ) -> BoxFuture<'static, StorageResult<SessionEntity>>;

    /// Insert a player row and read it back.
    fn insert_player(
        &self,
        player: PlayerEntity,
    ) -> BoxFuture<'static, StorageResult<PlayerEntity>>;

    /// Look up a player by nickname within a session.
    fn find_player_by_nickname(
        &self,
        session_id: Uuid,
        nickname: String,
    ) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>>;

    /// List the players of a session in join order.
    fn list_players(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>>;

    /// Atomically add `delta` to a player's total score and read the row
    /// back. This is the only write path for scores; callers never
    /// read-modify-write.
    fn add_to_player_score(
        &self,
        player_id: Uuid,
        delta: u32,
    ) -> BoxFuture<'static, StorageResult<PlayerEntity>>;

    /// Insert an answer row unless one already exists for the same
    /// (player, question) pair. Returns `false` on the duplicate, which the
    /// caller treats as "already submitted", not as an error.
    fn insert_answer(
        &self,
        answer: PlayerAnswerEntity,
    ) -> BoxFuture<'static, StorageResult<bool>>;

    /// List every answer row recorded for a session.
    fn list_answers(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<PlayerAnswerEntity>>>;

    /// Subscribe to player row changes for one session (inserts and score
    /// updates). This is the fallback sync path when broadcasts are missed.
    fn watch_players(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<broadcast::Receiver<PlayerChange>>>;

    /// Cheap liveness probe against the backend.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
}
