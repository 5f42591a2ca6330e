use crate::models::Position;
use crate::voting::percentage;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventStatistics {
    pub event_id: String,
    pub registered_voters: u64,
    pub voted: u64,
    pub not_voted: u64,
    pub turnout_percentage: u32,
    pub positions: Vec<PositionStats>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionStats {
    pub position_id: String,
    pub position_name: String,
    pub seat_count: u32,
    pub votes_cast: u64,
    /// Voters who took part in the event minus votes cast for this position.
    pub abstentions: u64,
    /// Unused vote slots summed over every voter who took part.
    pub undervotes: u64,
    /// Voters who took part but selected nobody for this position.
    pub fully_abstained_voters: u64,
}

pub fn turnout_percentage(voted: u64, registered: u64) -> u32 {
    percentage(voted, registered)
}

/// Derives per-position figures.
///
/// `selections_per_voter` holds, for each voter with at least one selection in
/// this position, how many candidates that voter chose. Voters who took part
/// in the event but are missing from it abstained from the position entirely.
pub fn position_stats(position: &Position, voted: u64, selections_per_voter: &[u64]) -> PositionStats {
    let seats = u64::from(position.seat_count);
    let votes_cast: u64 = position.candidates.iter().map(|c| c.votes_count).sum();
    let fully_abstained_voters = voted.saturating_sub(selections_per_voter.len() as u64);

    let partial: u64 = selections_per_voter
        .iter()
        .map(|&chosen| seats - chosen.min(seats))
        .sum();
    let undervotes = partial + fully_abstained_voters * seats;

    PositionStats {
        position_id: position.id.clone(),
        position_name: position.name.clone(),
        seat_count: position.seat_count,
        votes_cast,
        abstentions: voted.saturating_sub(votes_cast),
        undervotes,
        fully_abstained_voters,
    }
}

pub fn event_statistics(
    event_id: &str,
    registered_voters: u64,
    voted: u64,
    positions: Vec<PositionStats>,
) -> EventStatistics {
    EventStatistics {
        event_id: event_id.to_string(),
        registered_voters,
        voted,
        not_voted: registered_voters.saturating_sub(voted),
        turnout_percentage: turnout_percentage(voted, registered_voters),
        positions,
    }
}
