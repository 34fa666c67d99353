//! Bounded history of errors and session outcomes, shared between the engine,
//! its sessions and the classifier gate.
//!
//! Entries are kept for inspection by the host (status screens, support
//! dumps); every entry is also emitted through `tracing` at the point where it
//! is recorded.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Maximum number of retained entries. Older entries are dropped first.
pub const HISTORY_CAPACITY: usize = 50;

/// Entries included in [`DiagnosticsSummary::recent`].
const RECENT_ENTRIES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticCategory {
    /// The ML classifier could not be loaded.
    ClassifierLoad,
    /// The engine switched to the energy classifier for good.
    Fallback,
    /// A single frame could not be classified.
    ClassifierRuntime,
    /// Device open/read failure or failed hardware probe.
    Device,
    /// A config update was rejected.
    Config,
    /// How a session ended: complete, timed out, too short or cancelled.
    Session,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticEntry {
    pub timestamp: DateTime<Utc>,
    pub category: DiagnosticCategory,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSummary {
    pub total: usize,
    /// Distinct categories present in the history, sorted.
    pub categories: Vec<DiagnosticCategory>,
    /// Up to the last five entries, oldest first.
    pub recent: Vec<DiagnosticEntry>,
}

#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: VecDeque<DiagnosticEntry>,
}

impl Diagnostics {
    pub fn record(&mut self, category: DiagnosticCategory, message: impl Into<String>) {
        if self.entries.len() == HISTORY_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(DiagnosticEntry {
            timestamp: Utc::now(),
            category,
            message: message.into(),
        });
    }

    pub fn history(&self) -> Vec<DiagnosticEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&DiagnosticEntry> {
        self.entries.back()
    }

    pub fn count(&self, category: DiagnosticCategory) -> usize {
        self.entries.iter().filter(|e| e.category == category).count()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn summary(&self) -> DiagnosticsSummary {
        let mut categories: Vec<DiagnosticCategory> =
            self.entries.iter().map(|e| e.category).collect();
        categories.sort();
        categories.dedup();
        let skip = self.entries.len().saturating_sub(RECENT_ENTRIES);
        DiagnosticsSummary {
            total: self.entries.len(),
            categories,
            recent: self.entries.iter().skip(skip).cloned().collect(),
        }
    }
}

/// Thread-safe handle to a [`Diagnostics`] log.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticsHandle(Arc<Mutex<Diagnostics>>);

impl DiagnosticsHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, category: DiagnosticCategory, message: impl Into<String>) {
        self.0.lock().record(category, message);
    }

    pub fn history(&self) -> Vec<DiagnosticEntry> {
        self.0.lock().history()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    pub fn count(&self, category: DiagnosticCategory) -> usize {
        self.0.lock().count(category)
    }

    pub fn last(&self) -> Option<DiagnosticEntry> {
        self.0.lock().last().cloned()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }

    pub fn summary(&self) -> DiagnosticsSummary {
        self.0.lock().summary()
    }
}
