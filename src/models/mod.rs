use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub event_id: String,
    pub name: String,
    /// Number of winners declared for this position (`max_votes`).
    pub seat_count: u32,
    pub display_order: i64,
    /// Candidates in insertion order. The ranking engine relies on this order
    /// to keep equal vote counts stable.
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub position_id: String,
    pub name: String,
    pub partylist: Option<String>,
    // Owned by ballot intake, read-only for tallying.
    pub votes_count: u64,
    pub is_tie_breaker_winner: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TieResolution {
    pub position_id: String,
    pub candidate_id: String,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Voter {
    pub id: String,
    pub event_id: String,
    pub name: String,
    pub has_voted: bool,
}

/// One choice on a cast ballot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Selection {
    pub position_id: String,
    pub candidate_id: String,
}

impl Event {
    pub fn new(name: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            created_at: Utc::now(),
        }
    }
}

impl Position {
    pub fn new(event_id: String, name: String, seat_count: u32, display_order: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_id,
            name,
            seat_count,
            display_order,
            candidates: Vec::new(),
        }
    }

    pub fn candidate(&self, candidate_id: &str) -> Option<&Candidate> {
        self.candidates.iter().find(|c| c.id == candidate_id)
    }
}

impl Candidate {
    pub fn new(position_id: String, name: String, partylist: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            position_id,
            name,
            partylist,
            votes_count: 0,
            is_tie_breaker_winner: false,
        }
    }
}

impl Voter {
    pub fn new(event_id: String, name: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_id,
            name,
            has_voted: false,
        }
    }
}
