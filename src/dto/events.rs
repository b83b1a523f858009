//! Wire protocol of the session channel.
//!
//! Every payload is carried inside a [`SessionMessage`] envelope whose
//! `event` field names one of the `EVENT_*` constants below. Payload field
//! names are load-bearing: clients on other stacks deserialize them by name.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    leaderboard::LeaderboardEntry,
    store::models::{PlayerEntity, QuestionEntity},
};

/// A game session began; carries the first question.
pub const EVENT_GAME_STARTED: &str = "game_started";
/// The host advanced to another question.
pub const EVENT_NEXT_QUESTION: &str = "next_question";
/// Authoritative countdown tick from the host.
pub const EVENT_TIMER_UPDATE: &str = "timer_update";
/// A player joined the session.
pub const EVENT_PLAYER_JOINED: &str = "player_joined";
/// A player submitted an answer (host-side live tally).
pub const EVENT_PLAYER_ANSWERED: &str = "player_answered";
/// The current question closed; standings attached.
pub const EVENT_REVEAL_ANSWER: &str = "reveal_answer";
/// The session completed; final standings attached.
pub const EVENT_GAME_ENDED: &str = "game_ended";

/// Dispatched payload carried across session channels.
#[derive(Clone, Debug)]
pub struct SessionMessage {
    /// Event name; one of the `EVENT_*` constants.
    pub event: String,
    /// JSON-serialized payload.
    pub data: String,
}

impl SessionMessage {
    /// Convenience wrapper that serialises `payload` into the data field.
    pub fn json<T: Serialize>(event: &str, payload: &T) -> serde_json::Result<Self> {
        Ok(Self {
            event: event.to_string(),
            data: serde_json::to_string(payload)?,
        })
    }

    /// Deserialize the data field into a typed payload.
    pub fn payload<T: for<'de> Deserialize<'de>>(&self) -> serde_json::Result<T> {
        serde_json::from_str(&self.data)
    }
}

/// Projection of a question broadcast to every participant.
///
/// Carries the correct answer because correctness is evaluated locally on
/// each client; the explanation is shown during the reveal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionPayload {
    /// Question row id.
    pub id: Uuid,
    /// Question text.
    pub text: String,
    /// Answer options in display order.
    pub options: Vec<String>,
    /// The correct option.
    pub correct_answer: String,
    /// Explanation revealed after the question closes.
    pub explanation: String,
    /// 0-based position within the session.
    pub index: usize,
    /// Total number of questions in the session.
    pub total: usize,
}

impl QuestionPayload {
    /// Build the broadcast projection of a question row.
    pub fn new(question: &QuestionEntity, index: usize, total: usize) -> Self {
        Self {
            id: question.id,
            text: question.text.clone(),
            options: question.options.clone(),
            correct_answer: question.correct_answer.clone(),
            explanation: question.explanation.clone(),
            index,
            total,
        }
    }
}

/// Payload of [`EVENT_GAME_STARTED`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameStartedEvent {
    /// First question of the session.
    pub question: QuestionPayload,
    /// Countdown budget in seconds; `None` for untimed quizzes.
    #[serde(rename = "timeLeft")]
    pub time_left: Option<u32>,
}

/// Payload of [`EVENT_NEXT_QUESTION`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextQuestionEvent {
    /// The question now being served.
    pub question: QuestionPayload,
    /// Countdown budget in seconds; `None` for untimed quizzes.
    #[serde(rename = "timeLeft")]
    pub time_left: Option<u32>,
}

/// Payload of [`EVENT_TIMER_UPDATE`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimerUpdateEvent {
    /// Seconds remaining on the host's clock.
    #[serde(rename = "timeLeft")]
    pub time_left: u32,
}

/// Payload of [`EVENT_PLAYER_JOINED`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerJoinedEvent {
    /// The freshly created (or reused) player row.
    pub player: PlayerEntity,
}

/// Payload of [`EVENT_PLAYER_ANSWERED`]. Mirrors the answer row so the host
/// can tally without a store round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerAnsweredEvent {
    /// Answering player.
    pub player_id: Uuid,
    /// Question answered.
    pub question_id: Uuid,
    /// Option picked.
    pub selected_answer: String,
    /// Whether the pick was correct.
    pub is_correct: bool,
    /// Response latency in milliseconds.
    pub response_time_ms: u32,
    /// Points awarded.
    pub score: u32,
}

/// Payload of [`EVENT_REVEAL_ANSWER`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevealAnswerEvent {
    /// Standings after the question that just closed.
    pub leaderboard: Vec<LeaderboardEntry>,
}

/// Payload of [`EVENT_GAME_ENDED`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameEndedEvent {
    /// Final standings, re-read from the store at completion.
    pub leaderboard: Vec<LeaderboardEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips_typed_payloads() {
        let message =
            SessionMessage::json(EVENT_TIMER_UPDATE, &TimerUpdateEvent { time_left: 12 }).unwrap();
        assert_eq!(message.event, EVENT_TIMER_UPDATE);
        let payload: TimerUpdateEvent = message.payload().unwrap();
        assert_eq!(payload.time_left, 12);
    }

    #[test]
    fn timer_fields_use_the_camel_case_wire_name() {
        let message =
            SessionMessage::json(EVENT_TIMER_UPDATE, &TimerUpdateEvent { time_left: 9 }).unwrap();
        assert_eq!(message.data, r#"{"timeLeft":9}"#);
    }
}
