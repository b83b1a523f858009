use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

/// Lifecycle status persisted on a game session row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Session exists and accepts joins; the game has not started.
    Waiting,
    /// The host started the game and questions are being served.
    Active,
    /// The final question was advanced past; terminal.
    Completed,
}

/// Quiz definition persisted by the storage layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuizEntity {
    /// Primary key of the quiz.
    pub id: Uuid,
    /// Identifier of the host account that owns the quiz.
    pub host_id: Uuid,
    /// Display title.
    pub title: String,
    /// Whether questions run against a countdown.
    pub has_timer: bool,
    /// Per-question time budget in seconds when the timer is enabled.
    pub question_timer_seconds: u32,
    /// Set once a session of this quiz has run to completion.
    pub completed: bool,
}

/// Single question row belonging to a quiz.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionEntity {
    /// Primary key of the question.
    pub id: Uuid,
    /// Owning quiz.
    pub quiz_id: Uuid,
    /// Question text shown to all participants.
    pub text: String,
    /// Ordered answer options (2..=6, unique).
    pub options: Vec<String>,
    /// The correct option; always one of `options`.
    pub correct_answer: String,
    /// Explanation revealed after the question closes.
    pub explanation: String,
    /// 0-based position within the quiz; dense and unique per quiz.
    pub order: u32,
}

/// Game session row: one host running one quiz for many players.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionEntity {
    /// Primary key of the session.
    pub id: Uuid,
    /// Quiz being played.
    pub quiz_id: Uuid,
    /// Host driving the session.
    pub host_id: Uuid,
    /// 6-digit numeric join code. Lookup key for players; not guaranteed
    /// unique over time, only among open sessions.
    pub pin: String,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Index of the question currently being served, once active. Part of
    /// the authoritative row so a reconnecting host resumes from store truth.
    pub current_question: Option<usize>,
    /// Creation timestamp.
    pub created_at: SystemTime,
}

/// Participant row created when a player joins with a pin and nickname.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerEntity {
    /// Primary key of the player.
    pub id: Uuid,
    /// Session the player joined.
    pub session_id: Uuid,
    /// Display name, unique within the session.
    pub nickname: String,
    /// Running score; only ever incremented.
    pub total_score: u32,
    /// Join timestamp.
    pub created_at: SystemTime,
}

/// One scored answer; at most one row per (player, question) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerAnswerEntity {
    /// Answering player.
    pub player_id: Uuid,
    /// Question being answered.
    pub question_id: Uuid,
    /// The option the player picked.
    pub selected_answer: String,
    /// Whether the pick matched the correct option.
    pub is_correct: bool,
    /// Latency between question broadcast and submission, clamped to the
    /// question's time budget.
    pub response_time_ms: u32,
    /// Points awarded by the scoring function.
    pub score: u32,
}

/// Kind of change observed on a watched player row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerChangeKind {
    /// A new player row was inserted (a join).
    Inserted,
    /// An existing row changed (score increment).
    Updated,
}

/// Row-change notification emitted by [`QuizStore::watch_players`].
///
/// [`QuizStore::watch_players`]: crate::store::QuizStore::watch_players
#[derive(Debug, Clone)]
pub struct PlayerChange {
    /// Insert or update.
    pub kind: PlayerChangeKind,
    /// The row after the change.
    pub player: PlayerEntity,
}
