use crate::error::{ElectionError, Result};
use crate::models::{Candidate, Event, Position, Selection, TieResolution, Voter};
use crate::voting::ties::{ResolutionCheck, check_resolution};
use chrono::{DateTime, Utc};
use log::{info, warn};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::time::Duration;

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        Self::init_schema(&pool).await?;
        info!("Connected to {} ({} connections)", database_url, max_connections);

        Ok(Self { pool })
    }

    /// Single-connection in-memory database; the schema lives as long as the pool.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // Takes the write lock up front. A deferred transaction that reads first
    // cannot upgrade once another writer commits, and SQLite answers BUSY.
    async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin_with("BEGIN IMMEDIATE").await?)
    }

    async fn init_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                id TEXT PRIMARY KEY,
                event_id TEXT NOT NULL,
                name TEXT NOT NULL,
                seat_count INTEGER NOT NULL CHECK (seat_count >= 0),
                display_order INTEGER NOT NULL,
                FOREIGN KEY (event_id) REFERENCES events(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS candidates (
                id TEXT PRIMARY KEY,
                position_id TEXT NOT NULL,
                name TEXT NOT NULL,
                partylist TEXT,
                sort_order INTEGER NOT NULL,
                votes_count INTEGER NOT NULL DEFAULT 0 CHECK (votes_count >= 0),
                is_tie_breaker_winner BOOLEAN NOT NULL DEFAULT FALSE,
                FOREIGN KEY (position_id) REFERENCES positions(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS voters (
                id TEXT PRIMARY KEY,
                event_id TEXT NOT NULL,
                name TEXT NOT NULL,
                has_voted BOOLEAN NOT NULL DEFAULT FALSE,
                FOREIGN KEY (event_id) REFERENCES events(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ballot_selections (
                voter_id TEXT NOT NULL,
                position_id TEXT NOT NULL,
                candidate_id TEXT NOT NULL,
                cast_at TEXT NOT NULL,
                PRIMARY KEY (voter_id, position_id, candidate_id),
                FOREIGN KEY (voter_id) REFERENCES voters(id) ON DELETE CASCADE,
                FOREIGN KEY (candidate_id) REFERENCES candidates(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        // One row per position: the primary key is what serializes competing resolutions.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tie_resolutions (
                position_id TEXT PRIMARY KEY,
                candidate_id TEXT NOT NULL,
                resolved_at TEXT NOT NULL,
                FOREIGN KEY (position_id) REFERENCES positions(id) ON DELETE CASCADE,
                FOREIGN KEY (candidate_id) REFERENCES candidates(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    // ---- Election setup ----

    pub async fn create_event(&self, event: &Event) -> Result<()> {
        sqlx::query("INSERT INTO events (id, name, created_at) VALUES (?, ?, ?)")
            .bind(&event.id)
            .bind(&event.name)
            .bind(event.created_at.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Inserts the position together with any candidates it already carries.
    pub async fn create_position(&self, position: &Position) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO positions (id, event_id, name, seat_count, display_order)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&position.id)
        .bind(&position.event_id)
        .bind(&position.name)
        .bind(i64::from(position.seat_count))
        .bind(position.display_order)
        .execute(&mut *tx)
        .await?;

        for (i, candidate) in position.candidates.iter().enumerate() {
            insert_candidate(&mut tx, candidate, i as i64).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Appends a candidate after the ones already registered for its position.
    pub async fn create_candidate(&self, candidate: &Candidate) -> Result<()> {
        let mut tx = self.begin_write().await?;
        let next_order: i64 = sqlx::query(
            "SELECT COALESCE(MAX(sort_order) + 1, 0) AS next_order FROM candidates WHERE position_id = ?",
        )
        .bind(&candidate.position_id)
        .fetch_one(&mut *tx)
        .await?
        .get("next_order");

        insert_candidate(&mut tx, candidate, next_order).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn register_voter(&self, voter: &Voter) -> Result<()> {
        sqlx::query("INSERT INTO voters (id, event_id, name, has_voted) VALUES (?, ?, ?, ?)")
            .bind(&voter.id)
            .bind(&voter.event_id)
            .bind(&voter.name)
            .bind(voter.has_voted)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ---- Ballot intake ----

    /// Records one ballot: every selection bumps its candidate's counter and is
    /// kept as ballot detail, and the voter is marked as having voted.
    ///
    /// Rejects selections for unknown candidates, the same candidate chosen
    /// twice, and more selections than a position has seats.
    pub async fn cast_ballot(&self, voter_id: &str, selections: &[Selection]) -> Result<()> {
        let mut tx = self.begin_write().await?;

        let voter_exists = sqlx::query("SELECT 1 FROM voters WHERE id = ?")
            .bind(voter_id)
            .fetch_optional(&mut *tx)
            .await?
            .is_some();
        if !voter_exists {
            return Err(ElectionError::NotFound(format!("voter {}", voter_id)));
        }

        let mut chosen_once = HashSet::new();
        let mut per_position: HashMap<&str, u32> = HashMap::new();
        for selection in selections {
            if !chosen_once.insert((selection.position_id.as_str(), selection.candidate_id.as_str())) {
                return Err(ElectionError::Validation(format!(
                    "candidate {} selected more than once for position {}",
                    selection.candidate_id, selection.position_id
                )));
            }
            *per_position.entry(selection.position_id.as_str()).or_insert(0) += 1;
        }
        for (position_id, chosen) in &per_position {
            let seats: i64 = sqlx::query("SELECT seat_count FROM positions WHERE id = ?")
                .bind(*position_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| ElectionError::NotFound(format!("position {}", position_id)))?
                .get("seat_count");
            if i64::from(*chosen) > seats {
                return Err(ElectionError::Validation(format!(
                    "{} selections for position {} which elects {}",
                    chosen, position_id, seats
                )));
            }
        }

        let cast_at = Utc::now().to_rfc3339();
        for selection in selections {
            let updated = sqlx::query(
                r#"
                UPDATE candidates
                SET votes_count = votes_count + 1
                WHERE id = ? AND position_id = ?
                "#,
            )
            .bind(&selection.candidate_id)
            .bind(&selection.position_id)
            .execute(&mut *tx)
            .await?;
            if updated.rows_affected() == 0 {
                return Err(ElectionError::Validation(format!(
                    "candidate {} does not run for position {}",
                    selection.candidate_id, selection.position_id
                )));
            }

            sqlx::query(
                r#"
                INSERT INTO ballot_selections (voter_id, position_id, candidate_id, cast_at)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(voter_id)
            .bind(&selection.position_id)
            .bind(&selection.candidate_id)
            .bind(&cast_at)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE voters SET has_voted = TRUE WHERE id = ?")
            .bind(voter_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    // ---- Reads used by tallying ----

    pub async fn get_event(&self, event_id: &str) -> Result<Event> {
        let row = sqlx::query("SELECT id, name, created_at FROM events WHERE id = ?")
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ElectionError::NotFound(format!("event {}", event_id)))?;

        Ok(Event {
            id: row.get("id"),
            name: row.get("name"),
            created_at: parse_timestamp(&row.get::<String, _>("created_at"), "created_at")?,
        })
    }

    pub async fn get_position(&self, position_id: &str) -> Result<Position> {
        let mut conn = self.pool.acquire().await?;
        fetch_position(&mut conn, position_id).await
    }

    /// Positions of an event in display order. Each position's candidates are
    /// read in one statement; positions are not read as one snapshot.
    pub async fn get_event_positions(&self, event_id: &str) -> Result<Vec<Position>> {
        let mut conn = self.pool.acquire().await?;
        let ids: Vec<String> = sqlx::query(
            "SELECT id FROM positions WHERE event_id = ? ORDER BY display_order, name",
        )
        .bind(event_id)
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .map(|row| row.get("id"))
        .collect();

        let mut positions = Vec::with_capacity(ids.len());
        for id in ids {
            positions.push(fetch_position(&mut conn, &id).await?);
        }
        Ok(positions)
    }

    /// Returns `(registered, voted)` for an event.
    pub async fn event_voter_counts(&self, event_id: &str) -> Result<(u64, u64)> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS registered,
                   COALESCE(SUM(CASE WHEN has_voted THEN 1 ELSE 0 END), 0) AS voted
            FROM voters
            WHERE event_id = ?
            "#,
        )
        .bind(event_id)
        .fetch_one(&self.pool)
        .await?;

        Ok((
            non_negative(row.get("registered"), "registered")?,
            non_negative(row.get("voted"), "voted")?,
        ))
    }

    /// Number of candidates chosen by each voter who selected anybody for the position.
    pub async fn position_selection_counts(&self, position_id: &str) -> Result<Vec<u64>> {
        sqlx::query(
            r#"
            SELECT COUNT(*) AS chosen
            FROM ballot_selections
            WHERE position_id = ?
            GROUP BY voter_id
            "#,
        )
        .bind(position_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|row| non_negative(row.get("chosen"), "chosen"))
        .collect()
    }

    pub async fn get_tie_resolution(&self, position_id: &str) -> Result<Option<TieResolution>> {
        let mut conn = self.pool.acquire().await?;
        fetch_tie_resolution(&mut conn, position_id).await
    }

    // ---- Tie resolution ----

    /// Records `candidate_id` as the tie-break winner of `position_id`.
    ///
    /// Validation runs against the candidates read inside the same transaction.
    /// The insert is guarded by the `tie_resolutions` primary key, so when two
    /// callers race only one row commits and the loser is told about it.
    pub async fn resolve_tie(&self, position_id: &str, candidate_id: &str) -> Result<TieResolution> {
        let mut tx = self.begin_write().await?;

        let position = fetch_position(&mut tx, position_id).await?;
        let existing = fetch_tie_resolution(&mut tx, position_id).await?;

        match check_resolution(&position, candidate_id, existing.as_ref())? {
            ResolutionCheck::AlreadyResolved => {
                tx.rollback().await?;
                info!(
                    "Tie for position {} already resolved for candidate {}",
                    position_id, candidate_id
                );
                return match existing {
                    Some(resolution) => Ok(resolution),
                    None => self.backfill_resolution(position_id, candidate_id).await,
                };
            }
            ResolutionCheck::Apply => {}
        }

        let resolution = TieResolution {
            position_id: position_id.to_string(),
            candidate_id: candidate_id.to_string(),
            resolved_at: Utc::now(),
        };

        let inserted = sqlx::query(
            r#"
            INSERT INTO tie_resolutions (position_id, candidate_id, resolved_at)
            VALUES (?, ?, ?)
            ON CONFLICT(position_id) DO NOTHING
            "#,
        )
        .bind(&resolution.position_id)
        .bind(&resolution.candidate_id)
        .bind(resolution.resolved_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            let winner = fetch_tie_resolution(&mut tx, position_id).await?;
            tx.rollback().await?;
            return match winner {
                Some(winner) if winner.candidate_id == candidate_id => Ok(winner),
                Some(winner) => {
                    warn!(
                        "Rejected tie resolution for position {}: already resolved for {}",
                        position_id, winner.candidate_id
                    );
                    Err(ElectionError::Conflict(format!(
                        "tie for position '{}' was already resolved in favour of candidate {}",
                        position.name, winner.candidate_id
                    )))
                }
                None => Err(ElectionError::Integrity(format!(
                    "tie resolution for position {} vanished during write",
                    position_id
                ))),
            };
        }

        sqlx::query(
            "UPDATE candidates SET is_tie_breaker_winner = TRUE WHERE id = ? AND position_id = ?",
        )
        .bind(candidate_id)
        .bind(position_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(
            "Resolved tie for position {} in favour of candidate {}",
            position_id, candidate_id
        );
        Ok(resolution)
    }

    // The candidate flag exists but the row does not; write the row so later
    // reads agree with the flag.
    async fn backfill_resolution(&self, position_id: &str, candidate_id: &str) -> Result<TieResolution> {
        let resolution = TieResolution {
            position_id: position_id.to_string(),
            candidate_id: candidate_id.to_string(),
            resolved_at: Utc::now(),
        };
        sqlx::query(
            r#"
            INSERT INTO tie_resolutions (position_id, candidate_id, resolved_at)
            VALUES (?, ?, ?)
            ON CONFLICT(position_id) DO NOTHING
            "#,
        )
        .bind(&resolution.position_id)
        .bind(&resolution.candidate_id)
        .bind(resolution.resolved_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.get_tie_resolution(position_id)
            .await?
            .ok_or_else(|| ElectionError::Integrity(format!("tie resolution for position {}", position_id)))
    }
}

async fn insert_candidate(conn: &mut SqliteConnection, candidate: &Candidate, sort_order: i64) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO candidates (id, position_id, name, partylist, sort_order, votes_count, is_tie_breaker_winner)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&candidate.id)
    .bind(&candidate.position_id)
    .bind(&candidate.name)
    .bind(&candidate.partylist)
    .bind(sort_order)
    .bind(i64::try_from(candidate.votes_count).map_err(|_| {
        ElectionError::Validation(format!("vote count {} is out of range", candidate.votes_count))
    })?)
    .bind(candidate.is_tie_breaker_winner)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn fetch_position(conn: &mut SqliteConnection, position_id: &str) -> Result<Position> {
    let row = sqlx::query(
        r#"
        SELECT id, event_id, name, seat_count, display_order
        FROM positions
        WHERE id = ?
        "#,
    )
    .bind(position_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| ElectionError::NotFound(format!("position {}", position_id)))?;

    let seat_count = u32::try_from(row.get::<i64, _>("seat_count"))
        .map_err(|_| ElectionError::Integrity(format!("seat count of position {}", position_id)))?;

    let candidates = sqlx::query(
        r#"
        SELECT id, position_id, name, partylist, votes_count, is_tie_breaker_winner
        FROM candidates
        WHERE position_id = ?
        ORDER BY sort_order
        "#,
    )
    .bind(position_id)
    .fetch_all(&mut *conn)
    .await?
    .iter()
    .map(candidate_from_row)
    .collect::<Result<Vec<_>>>()?;

    Ok(Position {
        id: row.get("id"),
        event_id: row.get("event_id"),
        name: row.get("name"),
        seat_count,
        display_order: row.get("display_order"),
        candidates,
    })
}

async fn fetch_tie_resolution(conn: &mut SqliteConnection, position_id: &str) -> Result<Option<TieResolution>> {
    let row = sqlx::query(
        "SELECT position_id, candidate_id, resolved_at FROM tie_resolutions WHERE position_id = ?",
    )
    .bind(position_id)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(|row| {
        Ok(TieResolution {
            position_id: row.get("position_id"),
            candidate_id: row.get("candidate_id"),
            resolved_at: parse_timestamp(&row.get::<String, _>("resolved_at"), "resolved_at")?,
        })
    })
    .transpose()
}

fn candidate_from_row(row: &SqliteRow) -> Result<Candidate> {
    Ok(Candidate {
        id: row.get("id"),
        position_id: row.get("position_id"),
        name: row.get("name"),
        partylist: row.get("partylist"),
        votes_count: non_negative(row.get("votes_count"), "votes_count")?,
        is_tie_breaker_winner: row.get("is_tie_breaker_winner"),
    })
}

fn non_negative(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| ElectionError::Integrity(format!("negative {}: {}", field, value)))
}

fn parse_timestamp(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ElectionError::Integrity(format!("failed to parse {}: {}", field, e)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;

    pub(crate) struct Seeded {
        pub db: Database,
        pub event: Event,
        pub mayor: Position,
    }

    /// Event with a single-seat "Mayor" race between A, B and C.
    pub(crate) async fn seeded() -> Seeded {
        let db = Database::in_memory().await.unwrap();
        let event = Event::new("Student Council 2026".to_string());
        db.create_event(&event).await.unwrap();

        let mut mayor = Position::new(event.id.clone(), "Mayor".to_string(), 1, 0);
        for name in ["A", "B", "C"] {
            mayor
                .candidates
                .push(Candidate::new(mayor.id.clone(), name.to_string(), None));
        }
        db.create_position(&mayor).await.unwrap();

        Seeded { db, event, mayor }
    }

    /// Registers one voter per entry of `choices` and casts their ballot for
    /// that candidate index into `position.candidates`.
    pub(crate) async fn cast(db: &Database, event: &Event, position: &Position, choices: &[usize]) {
        for index in choices {
            let voter = Voter::new(event.id.clone(), "voter".to_string());
            db.register_voter(&voter).await.unwrap();
            let selection = Selection {
                position_id: position.id.clone(),
                candidate_id: position.candidates[*index].id.clone(),
            };
            db.cast_ballot(&voter.id, &[selection]).await.unwrap();
        }
    }

    #[tokio::test]
    async fn position_round_trip_keeps_candidate_order() {
        let s = seeded().await;
        let position = s.db.get_position(&s.mayor.id).await.unwrap();
        let names: Vec<&str> = position.candidates.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
        assert_eq!(position.seat_count, 1);

        let late = Candidate::new(s.mayor.id.clone(), "D".to_string(), Some("Blue".to_string()));
        s.db.create_candidate(&late).await.unwrap();
        let position = s.db.get_position(&s.mayor.id).await.unwrap();
        assert_eq!(position.candidates[3].name, "D");
        assert_eq!(position.candidates[3].partylist.as_deref(), Some("Blue"));
    }

    #[tokio::test]
    async fn missing_rows_are_not_found() {
        let s = seeded().await;
        assert!(matches!(
            s.db.get_position("nope").await,
            Err(ElectionError::NotFound(_))
        ));
        assert!(matches!(s.db.get_event("nope").await, Err(ElectionError::NotFound(_))));
    }

    #[tokio::test]
    async fn ballots_update_counters_and_roster() {
        let s = seeded().await;
        cast(&s.db, &s.event, &s.mayor, &[0, 0, 1]).await;
        s.db.register_voter(&Voter::new(s.event.id.clone(), "absent".to_string()))
            .await
            .unwrap();

        let position = s.db.get_position(&s.mayor.id).await.unwrap();
        let votes: Vec<u64> = position.candidates.iter().map(|c| c.votes_count).collect();
        assert_eq!(votes, vec![2, 1, 0]);
        assert_eq!(s.db.event_voter_counts(&s.event.id).await.unwrap(), (4, 3));
        assert_eq!(s.db.position_selection_counts(&s.mayor.id).await.unwrap(), vec![1, 1, 1]);
    }

    #[tokio::test]
    async fn ballot_rejects_overvote_and_foreign_candidate() {
        let s = seeded().await;
        let voter = Voter::new(s.event.id.clone(), "v".to_string());
        s.db.register_voter(&voter).await.unwrap();

        let overvote: Vec<Selection> = s.mayor.candidates[..2]
            .iter()
            .map(|c| Selection {
                position_id: s.mayor.id.clone(),
                candidate_id: c.id.clone(),
            })
            .collect();
        assert!(matches!(
            s.db.cast_ballot(&voter.id, &overvote).await,
            Err(ElectionError::Validation(_))
        ));

        let foreign = Selection {
            position_id: s.mayor.id.clone(),
            candidate_id: "someone-else".to_string(),
        };
        assert!(matches!(
            s.db.cast_ballot(&voter.id, &[foreign]).await,
            Err(ElectionError::Validation(_))
        ));

        let position = s.db.get_position(&s.mayor.id).await.unwrap();
        assert!(position.candidates.iter().all(|c| c.votes_count == 0));
        assert_eq!(s.db.event_voter_counts(&s.event.id).await.unwrap(), (1, 0));
    }

    #[tokio::test]
    async fn ballot_rejects_same_candidate_twice() {
        let s = seeded().await;
        let mut council = Position::new(s.event.id.clone(), "Council".to_string(), 2, 1);
        for name in ["X", "Y"] {
            council
                .candidates
                .push(Candidate::new(council.id.clone(), name.to_string(), None));
        }
        s.db.create_position(&council).await.unwrap();

        let voter = Voter::new(s.event.id.clone(), "v".to_string());
        s.db.register_voter(&voter).await.unwrap();

        let pick = |index: usize| Selection {
            position_id: council.id.clone(),
            candidate_id: council.candidates[index].id.clone(),
        };
        assert!(matches!(
            s.db.cast_ballot(&voter.id, &[pick(0), pick(0)]).await,
            Err(ElectionError::Validation(_))
        ));
        let position = s.db.get_position(&council.id).await.unwrap();
        assert!(position.candidates.iter().all(|c| c.votes_count == 0));
        assert_eq!(s.db.event_voter_counts(&s.event.id).await.unwrap(), (1, 0));

        s.db.cast_ballot(&voter.id, &[pick(0), pick(1)]).await.unwrap();
        let position = s.db.get_position(&council.id).await.unwrap();
        assert!(position.candidates.iter().all(|c| c.votes_count == 1));
    }

    #[tokio::test]
    async fn resolve_tie_writes_once() {
        let s = seeded().await;
        cast(&s.db, &s.event, &s.mayor, &[0, 1, 2]).await;

        let a = s.mayor.candidates[0].id.clone();
        let b = s.mayor.candidates[1].id.clone();

        let first = s.db.resolve_tie(&s.mayor.id, &a).await.unwrap();
        assert_eq!(first.candidate_id, a);

        let retry = s.db.resolve_tie(&s.mayor.id, &a).await.unwrap();
        assert_eq!(retry, first);

        assert!(matches!(
            s.db.resolve_tie(&s.mayor.id, &b).await,
            Err(ElectionError::Conflict(_))
        ));

        let position = s.db.get_position(&s.mayor.id).await.unwrap();
        let flagged: Vec<&str> = position
            .candidates
            .iter()
            .filter(|c| c.is_tie_breaker_winner)
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(flagged, vec![a.as_str()]);
    }

    #[tokio::test]
    async fn resolve_tie_requires_a_tie() {
        let s = seeded().await;
        cast(&s.db, &s.event, &s.mayor, &[0, 0, 1]).await;
        let a = s.mayor.candidates[0].id.clone();

        assert!(matches!(
            s.db.resolve_tie(&s.mayor.id, &a).await,
            Err(ElectionError::Validation(_))
        ));
        assert!(s.db.get_tie_resolution(&s.mayor.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_resolutions_commit_one_winner() {
        let s = seeded().await;
        cast(&s.db, &s.event, &s.mayor, &[0, 1]).await;

        let db = Arc::new(s.db);
        let a = s.mayor.candidates[0].id.clone();
        let b = s.mayor.candidates[1].id.clone();

        let first = tokio::spawn({
            let db = Arc::clone(&db);
            let position_id = s.mayor.id.clone();
            async move { db.resolve_tie(&position_id, &a).await }
        });
        let second = tokio::spawn({
            let db = Arc::clone(&db);
            let position_id = s.mayor.id.clone();
            async move { db.resolve_tie(&position_id, &b).await }
        });

        let outcomes = [first.await.unwrap(), second.await.unwrap()];
        let succeeded = outcomes.iter().filter(|r| r.is_ok()).count();
        let conflicts = outcomes
            .iter()
            .filter(|r| matches!(r, Err(ElectionError::Conflict(_))))
            .count();
        assert_eq!((succeeded, conflicts), (1, 1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_resolutions_on_a_file_database_yield_one_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("ballots.db").display());
        let db = Arc::new(Database::connect(&url, 5).await.unwrap());
        let event = Event::new("Run-off".to_string());
        db.create_event(&event).await.unwrap();

        for round in 0..10 {
            let mut seat = Position::new(event.id.clone(), format!("Seat {}", round), 1, round);
            for name in ["A", "B"] {
                seat.candidates
                    .push(Candidate::new(seat.id.clone(), name.to_string(), None));
            }
            db.create_position(&seat).await.unwrap();
            cast(&db, &event, &seat, &[0, 1]).await;

            let racers: Vec<_> = seat
                .candidates
                .iter()
                .map(|candidate| {
                    let db = Arc::clone(&db);
                    let position_id = seat.id.clone();
                    let candidate_id = candidate.id.clone();
                    tokio::spawn(async move { db.resolve_tie(&position_id, &candidate_id).await })
                })
                .collect();

            let mut winners = Vec::new();
            let mut conflicts = 0;
            for racer in racers {
                match racer.await.unwrap() {
                    Ok(resolution) => winners.push(resolution.candidate_id),
                    Err(ElectionError::Conflict(_)) => conflicts += 1,
                    Err(other) => panic!("round {}: unexpected error {:?}", round, other),
                }
            }
            assert_eq!((winners.len(), conflicts), (1, 1), "round {}", round);

            let stored = db.get_tie_resolution(&seat.id).await.unwrap().unwrap();
            assert_eq!(stored.candidate_id, winners[0]);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_retries_for_the_same_candidate_both_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("ballots.db").display());
        let db = Arc::new(Database::connect(&url, 5).await.unwrap());
        let event = Event::new("Run-off".to_string());
        db.create_event(&event).await.unwrap();

        let mut seat = Position::new(event.id.clone(), "Seat".to_string(), 1, 0);
        for name in ["A", "B"] {
            seat.candidates
                .push(Candidate::new(seat.id.clone(), name.to_string(), None));
        }
        db.create_position(&seat).await.unwrap();
        cast(&db, &event, &seat, &[0, 1]).await;

        let a = seat.candidates[0].id.clone();
        let racers: Vec<_> = (0..2)
            .map(|_| {
                let db = Arc::clone(&db);
                let position_id = seat.id.clone();
                let a = a.clone();
                tokio::spawn(async move { db.resolve_tie(&position_id, &a).await })
            })
            .collect();
        for racer in racers {
            assert_eq!(racer.await.unwrap().unwrap().candidate_id, a);
        }
    }
}
