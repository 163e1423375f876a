//! The memory store: artifacts captured from the screen or written by the
//! planner, optionally enriched with a classification, summary, and
//! embedding for similarity search.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::SharedConnection;
use crate::error::DaemonError;

/// A stored memory artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// Opaque identifier.
    pub id: String,
    /// When the artifact was captured.
    pub timestamp: DateTime<Utc>,
    /// The artifact's content (text, fact value).
    pub content: String,
    /// Artifact kind ("text", "memory", "window", ...).
    #[serde(rename = "type")]
    pub artifact_type: String,
    /// Geometry of the source UI element, when any.
    pub bounding_box: serde_json::Value,
    /// Enrichment: classification or fact key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<String>,
    /// Enrichment: summary or fact context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl Artifact {
    /// Builds a text artifact with a fresh id and empty geometry.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            content: content.into(),
            artifact_type: "text".to_string(),
            bounding_box: serde_json::json!({"left": 0, "top": 0, "right": 0, "bottom": 0}),
            classification: None,
            summary: None,
        }
    }
}

/// Repository over `artifacts`.
#[derive(Clone)]
pub struct ArtifactRepository {
    conn: SharedConnection,
}

impl ArtifactRepository {
    /// Creates a repository over the shared connection.
    #[must_use]
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    /// Initialises the table and applies enrichment-column migrations.
    pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS artifacts (
                id TEXT PRIMARY KEY,
                timestamp DATETIME NOT NULL,
                content TEXT NOT NULL,
                type TEXT NOT NULL,
                bounding_box TEXT NOT NULL,
                classification TEXT,
                summary TEXT,
                embedding TEXT
            )",
            [],
        )?;
        super::apply_additive_migrations(
            conn,
            &[
                "ALTER TABLE artifacts ADD COLUMN classification TEXT",
                "ALTER TABLE artifacts ADD COLUMN summary TEXT",
                "ALTER TABLE artifacts ADD COLUMN embedding TEXT",
            ],
        );
        Ok(())
    }

    /// Persists an artifact.
    pub fn save(&self, artifact: &Artifact) -> Result<(), DaemonError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO artifacts (id, timestamp, content, type, bounding_box, classification, summary)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                artifact.id,
                artifact.timestamp,
                artifact.content,
                artifact.artifact_type,
                artifact.bounding_box.to_string(),
                artifact.classification,
                artifact.summary,
            ],
        )?;
        Ok(())
    }

    /// Enriches an artifact with classification, summary, and embedding.
    pub fn enrich(
        &self,
        id: &str,
        classification: &str,
        summary: &str,
        embedding_json: &str,
    ) -> Result<(), DaemonError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE artifacts SET classification = ?1, summary = ?2, embedding = ?3 WHERE id = ?4",
            params![classification, summary, embedding_json, id],
        )?;
        if changed == 0 {
            return Err(DaemonError::ProposalNotFound { id: id.to_string() });
        }
        Ok(())
    }

    /// Most recent artifacts, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<Artifact>, DaemonError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, content, type, bounding_box, classification, summary
             FROM artifacts ORDER BY timestamp DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], row_to_artifact)?;
        Ok(rows.filter_map(Result::ok).collect())
    }

    /// Embedding search: cosine similarity of the query vector against every
    /// artifact that has one, best matches first.
    pub fn search_by_embedding(
        &self,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<Artifact>, DaemonError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, content, type, bounding_box, classification, summary, embedding
             FROM artifacts WHERE embedding IS NOT NULL AND embedding != ''
             ORDER BY timestamp DESC",
        )?;
        let mut scored: Vec<(f32, Artifact)> = stmt
            .query_map([], |row| {
                let artifact = row_to_artifact(row)?;
                let embedding_json: Option<String> = row.get(7)?;
                Ok((artifact, embedding_json))
            })?
            .filter_map(Result::ok)
            .filter_map(|(artifact, embedding_json)| {
                let embedding: Vec<f32> =
                    serde_json::from_str(embedding_json.as_deref()?).ok()?;
                Some((cosine_similarity(query, &embedding), artifact))
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, artifact)| artifact)
            .collect())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, DaemonError> {
        self.conn
            .lock()
            .map_err(|_| DaemonError::Internal("database lock poisoned".to_string()))
    }
}

fn row_to_artifact(row: &Row<'_>) -> rusqlite::Result<Artifact> {
    let bounding_box_raw: String = row.get(4)?;
    Ok(Artifact {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        content: row.get(2)?,
        artifact_type: row.get(3)?,
        bounding_box: serde_json::from_str(&bounding_box_raw).unwrap_or(serde_json::Value::Null),
        classification: row.get(5)?,
        summary: row.get(6)?,
    })
}

/// Cosine similarity between two vectors; 0 on mismatched or empty inputs.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
