//! Per-session state: the live course map, column schema, version
//! history, and the manual-edit ledger.

use crate::application::history::VersionHistory;
use crate::domain::{Column, CourseMap, UserEdit, default_columns, humanize_key};

pub struct Session {
    pub course_map: Option<CourseMap>,
    pub columns: Vec<Column>,
    pub history: VersionHistory,
    /// Manual edits made since the last AI generation; fed to revision
    /// prompts and replayed onto resumed generations, cleared once an AI
    /// pass that saw them completes.
    pub user_edits: Vec<UserEdit>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            course_map: None,
            columns: default_columns(),
            history: VersionHistory::new(),
            user_edits: Vec::new(),
        }
    }

    /// Edit one section cell by hand. Records the edit in the ledger and
    /// snapshots the result. Returns false if the target does not exist.
    pub fn record_cell_edit(
        &mut self,
        lesson_idx: usize,
        section_idx: usize,
        key: &str,
        new_value: &str,
    ) -> bool {
        let Some(map) = self.course_map.as_mut() else {
            return false;
        };
        let Some(lesson) = map.lessons.get_mut(lesson_idx) else {
            return false;
        };
        let lesson_title = lesson.title.clone();
        let Some(section) = lesson.sections.get_mut(section_idx) else {
            return false;
        };
        let old_value = section.text(key).to_string();
        section.set_text(key, new_value);
        self.user_edits.push(UserEdit {
            lesson_idx,
            section_idx: Some(section_idx),
            key: key.to_string(),
            old_value,
            new_value: new_value.to_string(),
            lesson_title,
        });
        let snapshot = map.clone();
        self.history.push(
            snapshot,
            format!("Edited {} in Lesson {}", humanize_key(key), lesson_idx + 1),
        );
        true
    }

    /// Rename a lesson by hand.
    pub fn record_title_edit(&mut self, lesson_idx: usize, new_title: &str) -> bool {
        let Some(map) = self.course_map.as_mut() else {
            return false;
        };
        let Some(lesson) = map.lessons.get_mut(lesson_idx) else {
            return false;
        };
        let old_value = std::mem::replace(&mut lesson.title, new_title.to_string());
        self.user_edits.push(UserEdit {
            lesson_idx,
            section_idx: None,
            key: "title".to_string(),
            old_value,
            new_value: new_title.to_string(),
            lesson_title: new_title.to_string(),
        });
        let snapshot = map.clone();
        self.history
            .push(snapshot, format!("Renamed Lesson {}", lesson_idx + 1));
        true
    }

    /// Adopt an imported map as the live document.
    pub fn import(&mut self, map: CourseMap) {
        self.history.push(map.clone(), "Imported course map");
        self.course_map = Some(map);
        self.user_edits.clear();
    }

    pub fn add_column(&mut self, label: &str) -> Option<&Column> {
        let column = Column::from_label(label);
        if column.key.is_empty() || self.columns.iter().any(|c| c.key == column.key) {
            return None;
        }
        self.columns.push(column);
        self.columns.last()
    }

    /// Remove a column from the schema. Existing cell data keeps its key;
    /// it is just no longer asked for or shown.
    pub fn remove_column(&mut self, key: &str) -> bool {
        let before = self.columns.len();
        self.columns.retain(|c| c.key != key);
        self.columns.len() != before
    }

    /// Restore the snapshot at `index` as the live document.
    pub fn jump_to_version(&mut self, index: usize) -> bool {
        match self.history.jump(index) {
            Some(map) => {
                self.course_map = Some(map);
                true
            }
            None => false,
        }
    }

    pub fn undo(&mut self) -> bool {
        match self.history.undo() {
            Some(map) => {
                self.course_map = Some(map);
                true
            }
            None => false,
        }
    }

    pub fn redo(&mut self) -> bool {
        match self.history.redo() {
            Some(map) => {
                self.course_map = Some(map);
                true
            }
            None => false,
        }
    }

    pub fn reset(&mut self) {
        self.course_map = None;
        self.columns = default_columns();
        self.history.reset();
        self.user_edits.clear();
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session_with_map() -> Session {
        let mut session = Session::new();
        session.import(
            serde_json::from_value(json!({
                "courseName": "Bio",
                "semester": "FA26",
                "lessons": [{"title": "Week 1", "sections": [{"learningGoals": "Cells"}]}]
            }))
            .unwrap(),
        );
        session
    }

    #[test]
    fn cell_edit_updates_map_ledger_and_history() {
        let mut session = session_with_map();
        assert!(session.record_cell_edit(0, 0, "learningGoals", "Organelles"));
        let map = session.course_map.as_ref().unwrap();
        assert_eq!(map.lessons[0].sections[0].text("learningGoals"), "Organelles");
        assert_eq!(session.user_edits.len(), 1);
        assert_eq!(session.user_edits[0].old_value, "Cells");
        assert_eq!(
            session.history.entries().last().unwrap().label,
            "Edited Learning Goals in Lesson 1"
        );
    }

    #[test]
    fn title_edit_uses_none_section() {
        let mut session = session_with_map();
        assert!(session.record_title_edit(0, "Week One"));
        assert_eq!(session.user_edits[0].section_idx, None);
        assert_eq!(session.user_edits[0].key, "title");
        assert_eq!(
            session.history.entries().last().unwrap().label,
            "Renamed Lesson 1"
        );
    }

    #[test]
    fn edits_against_missing_targets_are_rejected() {
        let mut session = session_with_map();
        assert!(!session.record_cell_edit(9, 0, "learningGoals", "x"));
        assert!(!session.record_title_edit(9, "x"));
        assert!(session.user_edits.is_empty());

        let mut empty = Session::new();
        assert!(!empty.record_cell_edit(0, 0, "learningGoals", "x"));
    }

    #[test]
    fn undo_redo_swap_the_live_map() {
        let mut session = session_with_map();
        session.record_title_edit(0, "Week One");
        assert!(session.undo());
        assert_eq!(session.course_map.as_ref().unwrap().lessons[0].title, "Week 1");
        assert!(session.redo());
        assert_eq!(session.course_map.as_ref().unwrap().lessons[0].title, "Week One");
        assert!(!session.redo());
    }

    #[test]
    fn columns_deduplicate_on_key() {
        let mut session = Session::new();
        assert!(session.add_column("Guest Speakers").is_some());
        assert!(session.add_column("guest   speakers").is_none());
        assert!(session.remove_column("guest_speakers"));
        assert!(!session.remove_column("guest_speakers"));
    }
}
