pub mod ranking;
pub mod statistics;
pub mod ties;

use serde::{Deserialize, Serialize};

pub use ranking::rank_position;
pub use statistics::{EventStatistics, PositionStats};
pub use ties::TieState;

/// Computed standing of one position. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Standing {
    pub position_id: String,
    pub position_name: String,
    pub seat_count: u32,
    pub total_votes: u64,
    pub tie_state: TieState,
    pub entries: Vec<StandingEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandingEntry {
    pub candidate_id: String,
    pub candidate_name: String,
    pub partylist: Option<String>,
    pub votes: u64,
    pub rank: u32,
    pub is_winner: bool,
    pub is_tied: bool,
    pub percentage: u32,
}

impl Standing {
    pub fn winners(&self) -> impl Iterator<Item = &StandingEntry> {
        self.entries.iter().filter(|e| e.is_winner)
    }

    pub fn has_unresolved_tie(&self) -> bool {
        matches!(self.tie_state, TieState::TieDetected { .. })
    }
}

/// Rounded share of `part` in `whole`, in whole percent.
///
/// Rounds half up using integer arithmetic so every surface gets the same
/// figure. Returns 0 when `whole` is 0 and never more than 100.
pub fn percentage(part: u64, whole: u64) -> u32 {
    if whole == 0 {
        return 0;
    }
    let part = part as u128;
    let whole = whole as u128;
    let rounded = (part * 200 + whole) / (2 * whole);
    rounded.min(100) as u32
}
