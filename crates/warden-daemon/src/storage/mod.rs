//! SQLite persistence.
//!
//! One database file, WAL mode, shared across repositories through an
//! `Arc<Mutex<Connection>>`. The mutex serialises writers; WAL keeps readers
//! cheap. Every repository owns its schema and applies additive migrations
//! on init so older databases upgrade in place.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

pub mod app_state;
pub mod artifacts;
pub mod commands;
pub mod intent_history;
pub mod proposals;

pub use app_state::StateRepository;
pub use artifacts::{Artifact, ArtifactRepository};
pub use commands::{Command, CommandRepository};
pub use intent_history::{IntentHistoryEntry, IntentHistoryRepository};
pub use proposals::ProposalRepository;

/// Shared handle to the kernel database.
pub type SharedConnection = Arc<Mutex<Connection>>;

/// Opens (or creates) the kernel database in WAL mode and initialises every
/// table.
///
/// # Errors
///
/// Returns the underlying `rusqlite` error when the file cannot be opened or
/// a schema statement fails.
pub fn open_database(path: &Path) -> rusqlite::Result<SharedConnection> {
    let conn = Connection::open(path)?;
    init_connection(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// Opens an in-memory database with the full schema. Test-only convenience.
pub fn open_in_memory() -> rusqlite::Result<SharedConnection> {
    let conn = Connection::open_in_memory()?;
    init_connection(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

fn init_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;

    artifacts::ArtifactRepository::init_schema(conn)?;
    intent_history::IntentHistoryRepository::init_schema(conn)?;
    proposals::ProposalRepository::init_schema(conn)?;
    app_state::StateRepository::init_schema(conn)?;
    commands::CommandRepository::init_schema(conn)?;
    Ok(())
}

/// Runs additive `ALTER TABLE` migrations, ignoring "duplicate column"
/// failures so re-running against a current schema is a no-op.
pub(crate) fn apply_additive_migrations(conn: &Connection, statements: &[&str]) {
    for statement in statements {
        let _ = conn.execute(statement, []);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_initialises_all_tables() {
        let shared = open_in_memory().unwrap();
        let conn = shared.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap();
        let tables: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(Result::ok)
            .collect();
        for expected in [
            "action_proposals",
            "app_state",
            "artifacts",
            "commands",
            "intent_history",
            "user_modes",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing {expected}");
        }
    }

    #[test]
    fn init_is_idempotent() {
        let shared = open_in_memory().unwrap();
        let conn = shared.lock().unwrap();
        init_connection(&conn).unwrap();
        init_connection(&conn).unwrap();
    }
}
