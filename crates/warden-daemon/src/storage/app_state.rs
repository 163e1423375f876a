//! Global system mode, persisted in a single-row table with an in-memory
//! read cache.
//!
//! Reads happen on every validation, so they never touch the database; the
//! cache is refreshed on write and loaded once at boot. The seed value is
//! `SHADOW`, the safe default.

use std::sync::RwLock;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use warden_core::SystemMode;

use super::SharedConnection;
use crate::error::DaemonError;

/// Repository over `app_state`.
pub struct StateRepository {
    conn: SharedConnection,
    cache: RwLock<SystemMode>,
}

impl StateRepository {
    /// Opens the repository, loading the persisted mode into the cache.
    pub fn new(conn: SharedConnection) -> Result<Self, DaemonError> {
        let repo = Self {
            conn,
            cache: RwLock::new(SystemMode::Shadow),
        };
        let persisted = repo.load_persisted()?;
        *repo.write_cache() = persisted;
        Ok(repo)
    }

    /// Initialises the table and seeds the `SHADOW` row.
    pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS app_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                state TEXT NOT NULL,
                updated_at DATETIME NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO app_state (id, state, updated_at) VALUES (1, 'SHADOW', ?1)",
            params![Utc::now()],
        )?;
        Ok(())
    }

    /// Current mode, from the cache.
    #[must_use]
    pub fn get(&self) -> SystemMode {
        match self.cache.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Persists a new mode and refreshes the cache.
    pub fn set(&self, mode: SystemMode) -> Result<(), DaemonError> {
        {
            let conn = self
                .conn
                .lock()
                .map_err(|_| DaemonError::Internal("database lock poisoned".to_string()))?;
            conn.execute(
                "UPDATE app_state SET state = ?1, updated_at = ?2 WHERE id = 1",
                params![mode.as_str(), Utc::now()],
            )?;
        }
        *self.write_cache() = mode;
        tracing::info!(mode = %mode, "system mode changed");
        Ok(())
    }

    fn load_persisted(&self) -> Result<SystemMode, DaemonError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| DaemonError::Internal("database lock poisoned".to_string()))?;
        let raw: Option<String> = conn
            .query_row("SELECT state FROM app_state WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(raw
            .as_deref()
            .and_then(SystemMode::parse)
            .unwrap_or(SystemMode::Shadow))
    }

    fn write_cache(&self) -> std::sync::RwLockWriteGuard<'_, SystemMode> {
        match self.cache.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::open_in_memory;

    #[test]
    fn defaults_to_shadow() {
        let repo = StateRepository::new(open_in_memory().unwrap()).unwrap();
        assert_eq!(repo.get(), SystemMode::Shadow);
    }

    #[test]
    fn set_persists_and_survives_reload() {
        let conn = open_in_memory().unwrap();
        let repo = StateRepository::new(conn.clone()).unwrap();
        repo.set(SystemMode::Active).unwrap();
        assert_eq!(repo.get(), SystemMode::Active);

        let reloaded = StateRepository::new(conn).unwrap();
        assert_eq!(reloaded.get(), SystemMode::Active);
    }
}
