//! Proposal persistence and per-domain automation modes.
//!
//! Backs the approval coordinator: `action_proposals` holds every proposal
//! that needed a human (or was auto-resolved through the propose path), and
//! `user_modes` holds the per-domain AUTO/MANUAL preference with the `'*'`
//! global fallback seeded to AUTO.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use warden_core::{AutomationMode, InteractionType, ProposalRecord, ProposalStatus};

use super::SharedConnection;
use crate::error::DaemonError;

/// Repository over `action_proposals` and `user_modes`.
#[derive(Clone)]
pub struct ProposalRepository {
    conn: SharedConnection,
}

impl ProposalRepository {
    /// Creates a repository over the shared connection.
    #[must_use]
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    /// Initialises tables, applies additive migrations, seeds the global
    /// automation mode.
    pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS action_proposals (
                id TEXT PRIMARY KEY,
                intent TEXT NOT NULL,
                risk_score INTEGER NOT NULL,
                status TEXT NOT NULL,
                payload TEXT NOT NULL,
                domain TEXT NOT NULL,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL,
                approved_at DATETIME,
                interaction_type TEXT NOT NULL DEFAULT 'PERMISSION',
                agent_message TEXT,
                user_response TEXT
            )",
            [],
        )?;
        super::apply_additive_migrations(
            conn,
            &[
                "ALTER TABLE action_proposals ADD COLUMN interaction_type TEXT NOT NULL DEFAULT 'PERMISSION'",
                "ALTER TABLE action_proposals ADD COLUMN agent_message TEXT",
                "ALTER TABLE action_proposals ADD COLUMN user_response TEXT",
            ],
        );
        conn.execute(
            "CREATE TABLE IF NOT EXISTS user_modes (
                domain TEXT PRIMARY KEY,
                mode TEXT NOT NULL,
                updated_at DATETIME NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO user_modes (domain, mode, updated_at) VALUES ('*', 'AUTO', ?1)",
            params![Utc::now()],
        )?;
        Ok(())
    }

    /// Persists a new proposal record.
    pub fn save(&self, record: &ProposalRecord) -> Result<(), DaemonError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO action_proposals
                (id, intent, risk_score, status, payload, domain, created_at, updated_at,
                 approved_at, interaction_type, agent_message, user_response)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                record.id,
                record.intent,
                i64::from(record.risk_score),
                record.status.as_str(),
                record.payload.to_string(),
                record.domain,
                record.created_at,
                record.updated_at,
                record.approved_at,
                record.interaction_type.as_str(),
                record.agent_message,
                record.user_response,
            ],
        )?;
        Ok(())
    }

    /// Moves a proposal to a new status, stamping `approved_at` on approval.
    pub fn update_status(&self, id: &str, status: ProposalStatus) -> Result<(), DaemonError> {
        let now = Utc::now();
        let approved_at: Option<DateTime<Utc>> = if status == ProposalStatus::Approved {
            Some(now)
        } else {
            None
        };
        let conn = self.lock()?;
        let changed = if let Some(stamp) = approved_at {
            conn.execute(
                "UPDATE action_proposals SET status = ?1, updated_at = ?2, approved_at = ?3 WHERE id = ?4",
                params![status.as_str(), now, stamp, id],
            )?
        } else {
            conn.execute(
                "UPDATE action_proposals SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), now, id],
            )?
        };
        if changed == 0 {
            return Err(DaemonError::ProposalNotFound { id: id.to_string() });
        }
        Ok(())
    }

    /// Stores the user's free-text reply on a clarification.
    pub fn update_user_response(&self, id: &str, response: &str) -> Result<(), DaemonError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE action_proposals SET user_response = ?1, updated_at = ?2 WHERE id = ?3",
            params![response, Utc::now(), id],
        )?;
        if changed == 0 {
            return Err(DaemonError::ProposalNotFound { id: id.to_string() });
        }
        Ok(())
    }

    /// Fetches one proposal by id.
    pub fn get(&self, id: &str) -> Result<ProposalRecord, DaemonError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("{SELECT_COLUMNS} WHERE id = ?1"),
            params![id],
            row_to_record,
        )
        .optional()?
        .ok_or_else(|| DaemonError::ProposalNotFound { id: id.to_string() })
    }

    /// Proposals awaiting the user, oldest first.
    pub fn pending(&self) -> Result<Vec<ProposalRecord>, DaemonError> {
        self.query_by_status(
            &[ProposalStatus::WaitingForUser, ProposalStatus::WaitingForContext],
            "created_at ASC",
        )
    }

    /// Proposals cleared for (or already in) execution, in approval order.
    pub fn approved(&self) -> Result<Vec<ProposalRecord>, DaemonError> {
        self.query_by_status(
            &[ProposalStatus::Approved, ProposalStatus::Executing],
            "approved_at ASC, created_at ASC",
        )
    }

    fn query_by_status(
        &self,
        statuses: &[ProposalStatus; 2],
        order: &str,
    ) -> Result<Vec<ProposalRecord>, DaemonError> {
        let conn = self.lock()?;
        let sql = format!("{SELECT_COLUMNS} WHERE status IN (?1, ?2) ORDER BY {order}");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![statuses[0].as_str(), statuses[1].as_str()],
            row_to_record,
        )?;
        Ok(rows.filter_map(Result::ok).collect())
    }

    /// Automation mode for a domain: the exact row wins over the `'*'`
    /// fallback; an empty table reads as AUTO.
    pub fn user_mode(&self, domain: &str) -> Result<AutomationMode, DaemonError> {
        let conn = self.lock()?;
        let mode: Option<String> = conn
            .query_row(
                "SELECT mode FROM user_modes
                 WHERE domain = ?1 OR domain = '*'
                 ORDER BY CASE WHEN domain = ?1 THEN 0 ELSE 1 END
                 LIMIT 1",
                params![domain],
                |row| row.get(0),
            )
            .optional()?;
        Ok(mode
            .as_deref()
            .and_then(AutomationMode::parse)
            .unwrap_or_default())
    }

    /// Upserts the automation mode for a domain.
    pub fn set_user_mode(&self, domain: &str, mode: AutomationMode) -> Result<(), DaemonError> {
        let now = Utc::now();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO user_modes (domain, mode, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(domain) DO UPDATE SET mode = ?2, updated_at = ?3",
            params![domain, mode.as_str(), now],
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, DaemonError> {
        self.conn
            .lock()
            .map_err(|_| DaemonError::Internal("database lock poisoned".to_string()))
    }
}

const SELECT_COLUMNS: &str = "SELECT id, intent, risk_score, status, payload, domain, created_at, \
     updated_at, approved_at, interaction_type, agent_message, user_response FROM action_proposals";

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<ProposalRecord> {
    let status_raw: String = row.get(3)?;
    let payload_raw: String = row.get(4)?;
    let interaction_raw: String = row.get(9)?;
    let risk_score: i64 = row.get(2)?;
    Ok(ProposalRecord {
        id: row.get(0)?,
        intent: row.get(1)?,
        risk_score: u8::try_from(risk_score.clamp(0, 100)).unwrap_or(100),
        status: ProposalStatus::parse(&status_raw).unwrap_or(ProposalStatus::Pending),
        payload: serde_json::from_str(&payload_raw).unwrap_or(serde_json::Value::Null),
        domain: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
        approved_at: row.get(8)?,
        interaction_type: InteractionType::parse(&interaction_raw),
        agent_message: row.get(10)?,
        user_response: row.get(11)?,
    })
}
