//! Standings computation.
//!
//! The leaderboard is always recomputed from store truth; broadcast copies
//! are a latency optimisation and may lag by one round-trip.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::{error::GameError, store::QuizStore};

/// One ranked row of the standings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaderboardEntry {
    /// 1-based rank.
    pub rank: usize,
    /// Player row id.
    pub player_id: Uuid,
    /// Player display name.
    pub nickname: String,
    /// Total score at computation time.
    pub total_score: u32,
}

/// Read all players of a session and rank them by total score, descending.
///
/// Ties break by join order (earliest join ranks first): the store lists
/// players in join order and the sort is stable.
pub async fn standings(
    store: &Arc<dyn QuizStore>,
    session_id: Uuid,
) -> Result<Vec<LeaderboardEntry>, GameError> {
    let mut players = store.list_players(session_id).await?;
    players.sort_by(|a, b| b.total_score.cmp(&a.total_score));

    Ok(players
        .into_iter()
        .enumerate()
        .map(|(position, player)| LeaderboardEntry {
            rank: position + 1,
            player_id: player.id,
            nickname: player.nickname,
            total_score: player.total_score,
        })
        .collect())
}
