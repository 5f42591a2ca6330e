use crate::config::{Branding, DEFAULT_REFRESH_INTERVAL};
use crate::db::Database;
use crate::error::{ElectionError, Result};
use crate::models::TieResolution;
use crate::voting::statistics::{event_statistics, position_stats};
use crate::voting::{EventStatistics, Standing, StandingEntry, rank_position};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Payload served to live dashboards on every poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiveSnapshot {
    pub event_id: String,
    pub generated_at: DateTime<Utc>,
    /// Delay pollers should wait before asking again.
    pub refresh_interval_secs: u64,
    pub standings: Vec<Standing>,
    pub statistics: EventStatistics,
}

/// Official returns for an event, with the certified winner list.
#[derive(Debug, Clone, Serialize)]
pub struct OfficialReport {
    pub branding: Branding,
    pub event_id: String,
    pub event_name: String,
    pub generated_at: DateTime<Utc>,
    pub statistics: EventStatistics,
    pub standings: Vec<Standing>,
    pub winners: Vec<CertifiedWinner>,
    /// Positions whose cutoff tie still waits for a tie-break decision.
    pub pending_ties: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CertifiedWinner {
    pub position_id: String,
    pub position_name: String,
    pub candidate_id: String,
    pub candidate_name: String,
    pub partylist: Option<String>,
    pub votes: u64,
}

/// Queries and commands every results surface goes through.
///
/// Nothing is cached: each call reads the current counters and ranks them.
#[derive(Clone)]
pub struct ResultsService {
    database: Arc<Database>,
    branding: Branding,
    refresh_interval: Duration,
}

impl ResultsService {
    pub fn new(database: Arc<Database>, branding: Branding) -> Self {
        Self {
            database,
            branding,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
        }
    }

    pub fn with_refresh_interval(mut self, refresh_interval: Duration) -> Self {
        self.refresh_interval = refresh_interval;
        self
    }

    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    pub async fn get_standing(&self, position_id: &str) -> Result<Standing> {
        let position = self.database.get_position(position_id).await?;
        Ok(rank_position(&position))
    }

    pub async fn get_statistics(&self, event_id: &str) -> Result<EventStatistics> {
        self.database.get_event(event_id).await?;
        let (registered, voted) = self.database.event_voter_counts(event_id).await?;

        let mut positions = Vec::new();
        for position in self.database.get_event_positions(event_id).await? {
            let selections = self.database.position_selection_counts(&position.id).await?;
            positions.push(position_stats(&position, voted, &selections));
        }

        Ok(event_statistics(event_id, registered, voted, positions))
    }

    pub async fn resolve_tie(&self, position_id: &str, candidate_id: &str) -> Result<TieResolution> {
        match self.database.resolve_tie(position_id, candidate_id).await {
            Ok(resolution) => Ok(resolution),
            Err(e) => {
                warn!(
                    "Tie resolution for position {} with candidate {} rejected: {}",
                    position_id, candidate_id, e
                );
                Err(e)
            }
        }
    }

    /// Standings for the requested positions of an event (all of them when
    /// `position_ids` is empty) plus event statistics. Positions of another
    /// event are rejected.
    pub async fn live_snapshot(&self, event_id: &str, position_ids: &[String]) -> Result<LiveSnapshot> {
        let statistics = self.get_statistics(event_id).await?;
        let standings = if position_ids.is_empty() {
            self.event_standings(event_id).await?
        } else {
            let mut standings = Vec::with_capacity(position_ids.len());
            for position_id in position_ids {
                let position = self.database.get_position(position_id).await?;
                if position.event_id != event_id {
                    return Err(ElectionError::Validation(format!(
                        "position {} does not belong to event {}",
                        position_id, event_id
                    )));
                }
                standings.push(rank_position(&position));
            }
            standings
        };

        Ok(LiveSnapshot {
            event_id: event_id.to_string(),
            generated_at: Utc::now(),
            refresh_interval_secs: self.refresh_interval.as_secs(),
            standings,
            statistics,
        })
    }

    pub async fn official_report(&self, event_id: &str) -> Result<OfficialReport> {
        let event = self.database.get_event(event_id).await?;
        let statistics = self.get_statistics(event_id).await?;
        let standings = self.event_standings(event_id).await?;

        let winners = standings
            .iter()
            .flat_map(|standing| standing.winners().map(move |entry| certify(standing, entry)))
            .collect();
        let pending_ties: Vec<String> = standings
            .iter()
            .filter(|s| s.has_unresolved_tie())
            .map(|s| s.position_id.clone())
            .collect();

        if !pending_ties.is_empty() {
            info!(
                "Official report for event {} has {} unresolved tie(s)",
                event_id,
                pending_ties.len()
            );
        }

        Ok(OfficialReport {
            branding: self.branding.clone(),
            event_id: event.id,
            event_name: event.name,
            generated_at: Utc::now(),
            statistics,
            standings,
            winners,
            pending_ties,
        })
    }

    async fn event_standings(&self, event_id: &str) -> Result<Vec<Standing>> {
        Ok(self
            .database
            .get_event_positions(event_id)
            .await?
            .iter()
            .map(rank_position)
            .collect())
    }
}

fn certify(standing: &Standing, entry: &StandingEntry) -> CertifiedWinner {
    CertifiedWinner {
        position_id: standing.position_id.clone(),
        position_name: standing.position_name.clone(),
        candidate_id: entry.candidate_id.clone(),
        candidate_name: entry.candidate_name.clone(),
        partylist: entry.partylist.clone(),
        votes: entry.votes,
    }
}
