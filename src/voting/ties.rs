use crate::error::{ElectionError, Result};
use crate::models::{Candidate, Position, TieResolution};
use crate::voting::ranking::sorted_candidates;
use serde::{Deserialize, Serialize};

/// Vote counts straddling the winner cutoff of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Boundary {
    pub last_winner_votes: u64,
    pub first_loser_votes: u64,
    pub is_tie: bool,
}

impl Boundary {
    /// `sorted` must be ordered by votes descending.
    pub fn of(sorted: &[&Candidate], seat_count: u32) -> Self {
        let seats = seat_count as usize;
        let last_winner_votes = seats
            .checked_sub(1)
            .and_then(|i| sorted.get(i))
            .map(|c| c.votes_count)
            .unwrap_or(0);
        let first_loser_votes = sorted.get(seats).map(|c| c.votes_count).unwrap_or(0);
        let is_tie = sorted.len() > seats
            && last_winner_votes > 0
            && last_winner_votes == first_loser_votes;

        Self {
            last_winner_votes,
            first_loser_votes,
            is_tie,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TieState {
    NoTie,
    /// Candidate ids sharing the cutoff vote count, in standing order.
    TieDetected { tied: Vec<String> },
    Resolved { winner: String, losers: Vec<String> },
}

/// Outcome of validating a tie-break request against the current snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionCheck {
    /// No resolution exists yet and the candidate is in the tied band.
    Apply,
    /// The same candidate was already designated; nothing to write.
    AlreadyResolved,
}

pub fn tie_state(position: &Position) -> TieState {
    let sorted = sorted_candidates(position);
    classify(&sorted, position.seat_count)
}

pub(crate) fn classify(sorted: &[&Candidate], seat_count: u32) -> TieState {
    let boundary = Boundary::of(sorted, seat_count);
    if !boundary.is_tie {
        return TieState::NoTie;
    }

    let band: Vec<&Candidate> = sorted
        .iter()
        .copied()
        .filter(|c| c.votes_count == boundary.last_winner_votes)
        .collect();

    match band.iter().find(|c| c.is_tie_breaker_winner) {
        Some(winner) => TieState::Resolved {
            winner: winner.id.clone(),
            losers: band
                .iter()
                .filter(|c| c.id != winner.id)
                .map(|c| c.id.clone())
                .collect(),
        },
        None => TieState::TieDetected {
            tied: band.iter().map(|c| c.id.clone()).collect(),
        },
    }
}

/// Decides whether `candidate_id` may be recorded as the tie-break winner.
///
/// A tie is resolved once: retrying with the recorded winner succeeds without
/// a write, any other candidate is a conflict.
pub fn check_resolution(
    position: &Position,
    candidate_id: &str,
    existing: Option<&TieResolution>,
) -> Result<ResolutionCheck> {
    if let Some(existing) = existing {
        return if existing.candidate_id == candidate_id {
            Ok(ResolutionCheck::AlreadyResolved)
        } else {
            Err(ElectionError::Conflict(format!(
                "tie for position '{}' was already resolved in favour of candidate {}",
                position.name, existing.candidate_id
            )))
        };
    }

    if position.candidate(candidate_id).is_none() {
        return Err(ElectionError::Validation(format!(
            "candidate {} does not run for position '{}'",
            candidate_id, position.name
        )));
    }

    match tie_state(position) {
        TieState::NoTie => Err(ElectionError::Validation(format!(
            "position '{}' has no tie at the winner cutoff",
            position.name
        ))),
        TieState::TieDetected { tied } => {
            if tied.iter().any(|id| id == candidate_id) {
                Ok(ResolutionCheck::Apply)
            } else {
                Err(ElectionError::Validation(format!(
                    "candidate {} is not among the tied candidates of position '{}'",
                    candidate_id, position.name
                )))
            }
        }
        // Flag raised without a stored resolution row.
        TieState::Resolved { winner, .. } if winner == candidate_id => {
            Ok(ResolutionCheck::AlreadyResolved)
        }
        TieState::Resolved { winner, .. } => Err(ElectionError::Conflict(format!(
            "tie for position '{}' was already resolved in favour of candidate {}",
            position.name, winner
        ))),
    }
}
