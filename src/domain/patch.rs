use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::course_map::{Lesson, Section};

/// A single declarative edit targeting a field, lesson, or section of a
/// course map. This mirrors the wire shape the model emits: every field is
/// optional and the patch engine decides what (if anything) it means.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Patch {
    pub action: Option<String>,
    pub lesson_index: Option<i64>,
    pub section_index: Option<i64>,
    pub field: Option<String>,
    pub value: Option<Value>,
    pub lesson: Option<Lesson>,
    pub section: Option<Section>,
    /// Mandatory in the examine flow, optional in chat revision.
    pub reason: Option<String>,
}

/// Pull a patch list out of a reconciled JSON value. Entries that do not
/// map onto the patch shape become empty patches, which the engine later
/// skips with a reason; one noisy entry never discards the batch.
pub fn patches_from_value(value: &Value) -> Option<Vec<Patch>> {
    let items = value.get("patches")?.as_array()?;
    Some(
        items
            .iter()
            .map(|item| serde_json::from_value(item.clone()).unwrap_or_default())
            .collect(),
    )
}

/// Audit record of a manual edit made since the last AI generation. The
/// list is cleared once an AI revision that was told about the edits
/// completes; until then it feeds "respect these manual changes" prompt
/// context and is replayed onto resumed generations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEdit {
    pub lesson_idx: usize,
    /// `None` for a lesson-title edit.
    pub section_idx: Option<usize>,
    pub key: String,
    pub old_value: String,
    pub new_value: String,
    pub lesson_title: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_mixed_patch_batch() {
        let value = json!({"patches": [
            {"lessonIndex": 0, "sectionIndex": 1, "field": "topicSection", "value": "1.2: Revised"},
            {"action": "removeLesson", "lessonIndex": 3},
            "garbage",
            {"lessonIndex": "not a number"}
        ]});
        let patches = patches_from_value(&value).unwrap();
        assert_eq!(patches.len(), 4);
        assert_eq!(patches[0].field.as_deref(), Some("topicSection"));
        assert_eq!(patches[1].action.as_deref(), Some("removeLesson"));
        // Malformed entries degrade to empty patches rather than failing
        // the whole batch.
        assert_eq!(patches[2], Patch::default());
        assert_eq!(patches[3], Patch::default());
    }

    #[test]
    fn missing_patches_key_is_none() {
        assert!(patches_from_value(&json!({"lessons": []})).is_none());
        assert!(patches_from_value(&json!({"patches": "nope"})).is_none());
    }
}
