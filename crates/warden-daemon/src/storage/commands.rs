//! Legacy command queue.
//!
//! Predates the action stream: simple one-shot commands the Sentinel polls
//! for and marks executed. Kept for clients that have not moved to the
//! streaming plane.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::SharedConnection;
use crate::error::DaemonError;

/// A queued one-shot command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    /// Opaque identifier.
    pub id: String,
    /// Command verb (TYPE, CLICK, FOCUS_WINDOW, OPEN_APP).
    pub action: String,
    /// UI target.
    pub target: String,
    /// Verb-specific payload.
    pub payload: String,
    /// pending | executing | completed | failed
    pub status: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Stamped on terminal status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
}

impl Command {
    /// Builds a pending command.
    #[must_use]
    pub fn new(
        action: impl Into<String>,
        target: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            action: action.into(),
            target: target.into(),
            payload: payload.into(),
            status: "pending".to_string(),
            created_at: Utc::now(),
            executed_at: None,
        }
    }
}

/// Repository over `commands`.
#[derive(Clone)]
pub struct CommandRepository {
    conn: SharedConnection,
}

impl CommandRepository {
    /// Creates a repository over the shared connection.
    #[must_use]
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    /// Initialises the table.
    pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS commands (
                id TEXT PRIMARY KEY,
                action TEXT NOT NULL,
                target TEXT NOT NULL,
                payload TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at DATETIME NOT NULL,
                executed_at DATETIME
            )",
            [],
        )?;
        Ok(())
    }

    /// Persists a command.
    pub fn save(&self, command: &Command) -> Result<(), DaemonError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO commands (id, action, target, payload, status, created_at, executed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                command.id,
                command.action,
                command.target,
                command.payload,
                command.status,
                command.created_at,
                command.executed_at,
            ],
        )?;
        Ok(())
    }

    /// All pending commands, oldest first.
    pub fn pending(&self) -> Result<Vec<Command>, DaemonError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, action, target, payload, status, created_at, executed_at
             FROM commands WHERE status = 'pending' ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map([], row_to_command)?;
        Ok(rows.filter_map(Result::ok).collect())
    }

    /// Moves a command to a new status, stamping `executed_at` on terminal
    /// states.
    pub fn update_status(&self, id: &str, status: &str) -> Result<(), DaemonError> {
        let executed_at: Option<DateTime<Utc>> = if status == "completed" || status == "failed" {
            Some(Utc::now())
        } else {
            None
        };
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE commands SET status = ?1, executed_at = COALESCE(?2, executed_at) WHERE id = ?3",
            params![status, executed_at, id],
        )?;
        if changed == 0 {
            return Err(DaemonError::ProposalNotFound { id: id.to_string() });
        }
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, DaemonError> {
        self.conn
            .lock()
            .map_err(|_| DaemonError::Internal("database lock poisoned".to_string()))
    }
}

fn row_to_command(row: &Row<'_>) -> rusqlite::Result<Command> {
    Ok(Command {
        id: row.get(0)?,
        action: row.get(1)?,
        target: row.get(2)?,
        payload: row.get(3)?,
        status: row.get(4)?,
        created_at: row.get(5)?,
        executed_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::open_in_memory;

    #[test]
    fn queue_round_trip() {
        let repo = CommandRepository::new(open_in_memory().unwrap());
        let command = Command::new("TYPE", "editor", "hello");
        repo.save(&command).unwrap();

        let pending = repo.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].action, "TYPE");

        repo.update_status(&command.id, "completed").unwrap();
        assert!(repo.pending().unwrap().is_empty());
    }
}
