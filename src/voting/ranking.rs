use crate::models::{Candidate, Position};
use crate::voting::ties::{Boundary, TieState, classify};
use crate::voting::{Standing, StandingEntry, percentage};
use log::debug;

/// Candidates ordered by votes descending. The sort is stable, so equal
/// counts keep insertion order.
pub fn sorted_candidates(position: &Position) -> Vec<&Candidate> {
    let mut sorted: Vec<&Candidate> = position.candidates.iter().collect();
    sorted.sort_by(|a, b| b.votes_count.cmp(&a.votes_count));
    sorted
}

/// Computes the standing of a position from its current vote counts.
///
/// Every surface that shows results (dashboard, live monitor, official
/// report, receipts) must call this and nothing else:
/// * candidates with equal votes share a rank (`1 + index of the first
///   candidate with that count`);
/// * without a tie at the cutoff, the first `seat_count` candidates with at
///   least one vote win;
/// * with an unresolved cutoff tie, every candidate holding the cutoff count
///   is tied and only candidates strictly above it win;
/// * once a tie-break winner is flagged inside the tied band, that candidate
///   wins and the rest of the band lose, none of them tied.
pub fn rank_position(position: &Position) -> Standing {
    let sorted = sorted_candidates(position);
    let seats = position.seat_count as usize;
    let total_votes: u64 = sorted.iter().map(|c| c.votes_count).sum();
    let boundary = Boundary::of(&sorted, position.seat_count);
    let tie_state = classify(&sorted, position.seat_count);

    let designated = match &tie_state {
        TieState::Resolved { winner, .. } => Some(winner.as_str()),
        _ => None,
    };

    let mut entries = Vec::with_capacity(sorted.len());
    let mut rank = 0u32;
    let mut previous_votes = None;

    for (index, candidate) in sorted.iter().enumerate() {
        if previous_votes != Some(candidate.votes_count) {
            rank = index as u32 + 1;
            previous_votes = Some(candidate.votes_count);
        }

        let (is_winner, is_tied) = if !boundary.is_tie {
            (index < seats && candidate.votes_count > 0, false)
        } else if candidate.votes_count == boundary.last_winner_votes {
            match designated {
                Some(winner) => (candidate.id == winner, false),
                None => (false, true),
            }
        } else {
            (
                index < seats && candidate.votes_count > boundary.last_winner_votes,
                false,
            )
        };

        entries.push(StandingEntry {
            candidate_id: candidate.id.clone(),
            candidate_name: candidate.name.clone(),
            partylist: candidate.partylist.clone(),
            votes: candidate.votes_count,
            rank,
            is_winner,
            is_tied,
            percentage: percentage(candidate.votes_count, total_votes),
        });
    }

    debug!(
        "Ranked position {} ({} candidates, {} seats, {} votes): {:?}",
        position.id,
        entries.len(),
        position.seat_count,
        total_votes,
        tie_state
    );

    Standing {
        position_id: position.id.clone(),
        position_name: position.name.clone(),
        seat_count: position.seat_count,
        total_votes,
        tie_state,
        entries,
    }
}
