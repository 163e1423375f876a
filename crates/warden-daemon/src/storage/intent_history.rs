//! Trust counts and the reflex cache.
//!
//! One row per (intent, focused window) pair. `success_count` only moves on
//! terminal completion; `cached_plan` holds the serialised plan and becomes a
//! reflex once the count clears the threshold.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use warden_core::TrustReader;

use super::SharedConnection;
use crate::error::DaemonError;

/// A cached plan is served only above this many successes.
pub const REFLEX_TRUST_THRESHOLD: i64 = 5;

/// One row of intent history.
#[derive(Debug, Clone, Serialize)]
pub struct IntentHistoryEntry {
    /// Row id.
    pub id: i64,
    /// The intent text.
    pub intent: String,
    /// Focused window at execution time.
    pub focused_window: String,
    /// Last successful execution.
    pub executed_at: DateTime<Utc>,
    /// Successful completion count.
    pub success_count: i64,
    /// Serialised plan, when cached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_plan: Option<String>,
}

/// Repository over `intent_history`.
#[derive(Clone)]
pub struct IntentHistoryRepository {
    conn: SharedConnection,
}

impl IntentHistoryRepository {
    /// Creates a repository over the shared connection.
    #[must_use]
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    /// Initialises the table and lookup index.
    pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS intent_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                intent TEXT NOT NULL,
                focused_window TEXT NOT NULL,
                executed_at DATETIME NOT NULL,
                success_count INTEGER DEFAULT 1,
                cached_plan TEXT
            )",
            [],
        )?;
        super::apply_additive_migrations(
            conn,
            &["ALTER TABLE intent_history ADD COLUMN cached_plan TEXT"],
        );
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_intent_window
             ON intent_history(intent, focused_window)",
            [],
        )?;
        Ok(())
    }

    /// Records a successful completion: upsert on the pair, increment the
    /// count, touch `executed_at`, and overwrite the cached plan (which may
    /// be empty).
    pub fn record_success(
        &self,
        intent: &str,
        focused_window: &str,
        plan: &str,
    ) -> Result<(), DaemonError> {
        let conn = self.lock()?;
        let existing: Option<(i64, i64)> = conn
            .query_row(
                "SELECT id, success_count FROM intent_history
                 WHERE intent = ?1 AND focused_window = ?2 LIMIT 1",
                params![intent, focused_window],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match existing {
            Some((id, count)) => {
                conn.execute(
                    "UPDATE intent_history
                     SET success_count = ?1, executed_at = ?2, cached_plan = ?3
                     WHERE id = ?4",
                    params![count + 1, Utc::now(), plan, id],
                )?;
            }
            None => {
                conn.execute(
                    "INSERT INTO intent_history
                        (intent, focused_window, executed_at, success_count, cached_plan)
                     VALUES (?1, ?2, ?3, 1, ?4)",
                    params![intent, focused_window, Utc::now(), plan],
                )?;
            }
        }
        Ok(())
    }

    /// Successful completion count for the pair, 0 when unseen.
    pub fn trust_score(&self, intent: &str, focused_window: &str) -> Result<i64, DaemonError> {
        let conn = self.lock()?;
        let count: Option<i64> = conn
            .query_row(
                "SELECT success_count FROM intent_history
                 WHERE intent = ?1 AND focused_window = ?2 LIMIT 1",
                params![intent, focused_window],
                |row| row.get(0),
            )
            .optional()?;
        Ok(count.unwrap_or(0))
    }

    /// The reflex for an intent: the most recently executed row across any
    /// focus whose count clears the threshold and whose plan is non-empty.
    pub fn reflex(&self, intent: &str) -> Result<Option<(String, i64)>, DaemonError> {
        let conn = self.lock()?;
        let row: Option<(Option<String>, i64)> = conn
            .query_row(
                "SELECT cached_plan, success_count FROM intent_history
                 WHERE intent = ?1 AND success_count > ?2
                   AND cached_plan IS NOT NULL AND cached_plan != ''
                 ORDER BY executed_at DESC LIMIT 1",
                params![intent, REFLEX_TRUST_THRESHOLD],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row.and_then(|(plan, count)| plan.map(|p| (p, count))))
    }

    /// Clears the cached plan for every row of an intent. The counts stay;
    /// the reflex re-learns on the next success.
    pub fn invalidate(&self, intent: &str) -> Result<(), DaemonError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE intent_history SET cached_plan = NULL WHERE intent = ?1",
            params![intent],
        )?;
        Ok(())
    }

    /// Most recent history rows, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<IntentHistoryEntry>, DaemonError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, intent, focused_window, executed_at, success_count, cached_plan
             FROM intent_history ORDER BY executed_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(IntentHistoryEntry {
                id: row.get(0)?,
                intent: row.get(1)?,
                focused_window: row.get(2)?,
                executed_at: row.get(3)?,
                success_count: row.get(4)?,
                cached_plan: row.get(5)?,
            })
        })?;
        Ok(rows.filter_map(Result::ok).collect())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, DaemonError> {
        self.conn
            .lock()
            .map_err(|_| DaemonError::Internal("database lock poisoned".to_string()))
    }
}

/// The validator reads trust through this adapter; a storage failure reads
/// as zero trust rather than blocking validation.
impl TrustReader for IntentHistoryRepository {
    fn trust_score(&self, intent: &str, focused_window: &str) -> i64 {
        match Self::trust_score(self, intent, focused_window) {
            Ok(score) => score,
            Err(error) => {
                tracing::error!(%error, "trust lookup failed, treating as zero");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::open_in_memory;

    fn repo() -> IntentHistoryRepository {
        IntentHistoryRepository::new(open_in_memory().unwrap())
    }

    #[test]
    fn trust_starts_at_zero_and_is_monotonic() {
        let repo = repo();
        assert_eq!(repo.trust_score("report", "Notes").unwrap(), 0);
        let mut previous = 0;
        for _ in 0..4 {
            repo.record_success("report", "Notes", "{}").unwrap();
            let current = repo.trust_score("report", "Notes").unwrap();
            assert!(current > previous);
            previous = current;
        }
        assert_eq!(previous, 4);
    }

    #[test]
    fn pairs_are_independent() {
        let repo = repo();
        repo.record_success("report", "Notes", "").unwrap();
        repo.record_success("report", "Mail", "").unwrap();
        repo.record_success("report", "Mail", "").unwrap();
        assert_eq!(repo.trust_score("report", "Notes").unwrap(), 1);
        assert_eq!(repo.trust_score("report", "Mail").unwrap(), 2);
        assert_eq!(repo.trust_score("other", "Notes").unwrap(), 0);
    }

    #[test]
    fn reflex_requires_threshold_and_nonempty_plan() {
        let repo = repo();
        for _ in 0..5 {
            repo.record_success("compose morning report", "Notes", r#"{"plan":1}"#)
                .unwrap();
        }
        // Five successes: not above the threshold yet.
        assert!(repo.reflex("compose morning report").unwrap().is_none());

        repo.record_success("compose morning report", "Notes", r#"{"plan":1}"#)
            .unwrap();
        let (plan, trust) = repo.reflex("compose morning report").unwrap().unwrap();
        assert_eq!(plan, r#"{"plan":1}"#);
        assert_eq!(trust, 6);
    }

    #[test]
    fn empty_plan_never_serves_a_reflex() {
        let repo = repo();
        for _ in 0..10 {
            repo.record_success("walk", "Notes", "").unwrap();
        }
        assert!(repo.reflex("walk").unwrap().is_none());
    }

    #[test]
    fn invalidate_clears_plan_until_next_success() {
        let repo = repo();
        for _ in 0..6 {
            repo.record_success("report", "Notes", r#"{"v":1}"#).unwrap();
        }
        assert!(repo.reflex("report").unwrap().is_some());

        repo.invalidate("report").unwrap();
        assert!(repo.reflex("report").unwrap().is_none());

        // The count survived, so one more success with a plan restores it.
        repo.record_success("report", "Notes", r#"{"v":2}"#).unwrap();
        let (plan, trust) = repo.reflex("report").unwrap().unwrap();
        assert_eq!(plan, r#"{"v":2}"#);
        assert_eq!(trust, 7);
    }

    #[test]
    fn reflex_picks_most_recent_qualifying_focus() {
        let repo = repo();
        for _ in 0..7 {
            repo.record_success("report", "Notes", r#"{"w":"notes"}"#).unwrap();
        }
        for _ in 0..6 {
            repo.record_success("report", "Mail", r#"{"w":"mail"}"#).unwrap();
        }
        // Mail was touched last; it wins the ORDER BY executed_at DESC.
        let (plan, _) = repo.reflex("report").unwrap().unwrap();
        assert_eq!(plan, r#"{"w":"mail"}"#);
    }
}
