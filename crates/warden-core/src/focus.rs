//! Focus tracking: the most recent focused-window report from the Sentinel.
//!
//! Reads vastly outnumber writes (every validation reads, only the Sentinel's
//! focus stream writes), so the snapshot sits behind a readers-writer lock
//! and readers get a cheap clone. A read that races a report may observe the
//! previous window; that staleness window is one report deep and acceptable.

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cold-start window title before the Sentinel has reported anything.
pub const UNKNOWN_WINDOW: &str = "Unknown";

/// A point-in-time view of the focused window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusSnapshot {
    /// Title of the focused window.
    pub window_title: String,
    /// Process that owns the window, when the Sentinel can resolve it.
    pub process_name: String,
    /// When this report was received.
    pub updated_at: DateTime<Utc>,
}

impl Default for FocusSnapshot {
    fn default() -> Self {
        Self {
            window_title: UNKNOWN_WINDOW.to_string(),
            process_name: String::new(),
            updated_at: Utc::now(),
        }
    }
}

impl FocusSnapshot {
    /// Case-insensitive substring match against an expected window title.
    ///
    /// Window titles drift (unsaved-document markers and the like), so
    /// containment rather than equality is the contract.
    #[must_use]
    pub fn matches(&self, expected: &str) -> bool {
        self.window_title
            .to_lowercase()
            .contains(&expected.to_lowercase())
    }
}

/// Holder of the most recent focus report.
#[derive(Debug, Default)]
pub struct FocusTracker {
    current: RwLock<FocusSnapshot>,
}

impl FocusTracker {
    /// New tracker with the cold-start snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a focus report. Last writer wins across connections.
    pub fn update(&self, window_title: impl Into<String>, process_name: impl Into<String>) {
        let snapshot = FocusSnapshot {
            window_title: window_title.into(),
            process_name: process_name.into(),
            updated_at: Utc::now(),
        };
        // A poisoned lock means a writer panicked mid-update; the snapshot is
        // plain data, so recover the guard rather than propagate.
        match self.current.write() {
            Ok(mut guard) => *guard = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> FocusSnapshot {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Current window title.
    #[must_use]
    pub fn window_title(&self) -> String {
        self.snapshot().window_title
    }
}
