//! Linear version history with undo/redo over whole-document snapshots.

use chrono::{DateTime, Utc};

use crate::domain::CourseMap;

/// One saved snapshot with its provenance label ("Initial generation",
/// "Examined — 3 fixes", "Edited learningGoals in Lesson 2", ...).
#[derive(Debug, Clone, PartialEq)]
pub struct VersionEntry {
    pub course_map: CourseMap,
    pub timestamp: DateTime<Utc>,
    pub label: String,
}

/// Snapshot list plus a cursor. Pushing while the cursor sits before the
/// end discards the abandoned redo tail, so the history always reads as a
/// single line of descent.
#[derive(Debug, Clone, Default)]
pub struct VersionHistory {
    entries: Vec<VersionEntry>,
    active: Option<usize>,
}

impl VersionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[VersionEntry] {
        &self.entries
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a snapshot and make it the active entry.
    pub fn push(&mut self, course_map: CourseMap, label: impl Into<String>) {
        if let Some(active) = self.active {
            self.entries.truncate(active + 1);
        }
        self.entries.push(VersionEntry {
            course_map,
            timestamp: Utc::now(),
            label: label.into(),
        });
        self.active = Some(self.entries.len() - 1);
    }

    /// Make `index` the active entry and return a deep copy of its
    /// document. Out-of-range indices leave the history untouched.
    pub fn jump(&mut self, index: usize) -> Option<CourseMap> {
        let entry = self.entries.get(index)?;
        let map = entry.course_map.clone();
        self.active = Some(index);
        Some(map)
    }

    /// Step back one entry; no-op at the oldest snapshot.
    pub fn undo(&mut self) -> Option<CourseMap> {
        let active = self.active?;
        if active == 0 {
            return None;
        }
        self.jump(active - 1)
    }

    /// Step forward one entry; no-op at the newest snapshot.
    pub fn redo(&mut self) -> Option<CourseMap> {
        let active = self.active?;
        if active + 1 >= self.entries.len() {
            return None;
        }
        self.jump(active + 1)
    }

    pub fn can_undo(&self) -> bool {
        self.active.is_some_and(|a| a > 0)
    }

    pub fn can_redo(&self) -> bool {
        self.active.is_some_and(|a| a + 1 < self.entries.len())
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.active = None;
    }
}
