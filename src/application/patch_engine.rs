//! Applies model-proposed patches and replayed manual edits to a course
//! map. Total and deterministic: malformed or unresolvable patches are
//! skipped (with an observable reason), never an error.

use serde_json::Value;

use crate::domain::{CourseMap, Patch, UserEdit};

/// Result of applying a patch batch: the new document plus every patch
/// that was skipped and why. Skips are a deliberate permissive policy so
/// one noisy entry from the model does not abort an otherwise-valid batch.
#[derive(Debug, Clone)]
pub struct PatchOutcome {
    pub map: CourseMap,
    pub skipped: Vec<SkippedPatch>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedPatch {
    pub index: usize,
    pub reason: String,
}

/// Apply `patches` in order against a single working copy of `base`, so
/// later patches observe earlier patches' effects (a patch may add a
/// lesson and a later one edit that lesson's sections by index).
pub fn apply_patches(base: &CourseMap, patches: &[Patch]) -> PatchOutcome {
    let mut map = base.clone();
    let mut skipped = Vec::new();

    for (index, patch) in patches.iter().enumerate() {
        if let Err(reason) = apply_one(&mut map, patch) {
            log::debug!("skipping patch {index}: {reason}");
            skipped.push(SkippedPatch { index, reason });
        }
    }

    PatchOutcome { map, skipped }
}

/// Dispatch order is first-match-wins; see each arm. Returns the skip
/// reason when no arm claims the patch.
fn apply_one(map: &mut CourseMap, patch: &Patch) -> Result<(), String> {
    // 1. Lesson title.
    if patch.field.as_deref() == Some("title")
        && let Some(idx) = resolve_index(patch.lesson_index, map.lessons.len())
    {
        let Some(title) = patch.value.as_ref().and_then(Value::as_str) else {
            return Err("title value is not a string".into());
        };
        map.lessons[idx].title = title.to_string();
        return Ok(());
    }

    // 2. Add a lesson (default position: end).
    if patch.action.as_deref() == Some("addLesson") {
        let Some(lesson) = patch.lesson.clone() else {
            return Err("addLesson without a lesson payload".into());
        };
        let idx = insert_index(patch.lesson_index, map.lessons.len())?;
        map.lessons.insert(idx, lesson);
        return Ok(());
    }

    // 3. Remove a lesson.
    if patch.action.as_deref() == Some("removeLesson") {
        let Some(idx) = resolve_index(patch.lesson_index, map.lessons.len()) else {
            return Err("removeLesson index does not resolve".into());
        };
        map.lessons.remove(idx);
        return Ok(());
    }

    // 4. Section field set.
    if let (Some(field), Some(_), Some(_)) =
        (patch.field.as_deref(), patch.lesson_index, patch.section_index)
        && let Some(li) = resolve_index(patch.lesson_index, map.lessons.len())
        && let Some(si) = resolve_index(patch.section_index, map.lessons[li].sections.len())
    {
        let Some(value) = patch.value.clone() else {
            return Err("field set without a value".into());
        };
        map.lessons[li].sections[si].set(field, value);
        return Ok(());
    }

    // 5. Add a section (default position: end of the lesson).
    if patch.action.as_deref() == Some("addSection") {
        let Some(section) = patch.section.clone() else {
            return Err("addSection without a section payload".into());
        };
        let Some(li) = resolve_index(patch.lesson_index, map.lessons.len()) else {
            return Err("addSection lesson index does not resolve".into());
        };
        let si = insert_index(patch.section_index, map.lessons[li].sections.len())?;
        map.lessons[li].sections.insert(si, section);
        return Ok(());
    }

    // 6. Course-level fields.
    if let Some(field) = patch.field.as_deref()
        && matches!(field, "courseName" | "semester")
    {
        let Some(value) = patch.value.as_ref().and_then(Value::as_str) else {
            return Err(format!("{field} value is not a string"));
        };
        match field {
            "courseName" => map.course_name = value.to_string(),
            _ => map.semester = value.to_string(),
        }
        return Ok(());
    }

    Err("unrecognized patch shape".into())
}

/// Resolve an index against an existing range; `None` or out-of-range
/// does not resolve.
fn resolve_index(index: Option<i64>, len: usize) -> Option<usize> {
    let idx = index?;
    if idx < 0 {
        return None;
    }
    let idx = idx as usize;
    (idx < len).then_some(idx)
}

/// Insertion position: absent means append, in-range positions insert,
/// past-the-end clamps to append (the model often over-counts by one).
fn insert_index(index: Option<i64>, len: usize) -> Result<usize, String> {
    match index {
        None => Ok(len),
        Some(idx) if idx < 0 => Err("negative insertion index".into()),
        Some(idx) => Ok((idx as usize).min(len)),
    }
}

/// Replay pending manual edits onto a freshly generated map. Manual edits
/// always win over streamed content at the same field; edits whose target
/// no longer exists are skipped.
pub fn apply_user_edits(base: &CourseMap, edits: &[UserEdit]) -> CourseMap {
    let mut map = base.clone();
    for edit in edits {
        match edit.section_idx {
            None => {
                if let Some(lesson) = map.lessons.get_mut(edit.lesson_idx) {
                    lesson.title = edit.new_value.clone();
                }
            }
            Some(si) => {
                if let Some(section) = map
                    .lessons
                    .get_mut(edit.lesson_idx)
                    .and_then(|l| l.sections.get_mut(si))
                {
                    section.set_text(edit.key.clone(), edit.new_value.clone());
                }
            }
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Section;
    use serde_json::json;

    fn sample_map() -> CourseMap {
        serde_json::from_value(json!({
            "courseName": "A",
            "semester": "FA24",
            "lessons": [
                {"title": "L1", "sections": [{"x": "1"}, {"x": "2"}]},
                {"title": "L2", "sections": [{"x": "3"}]}
            ]
        }))
        .unwrap()
    }

    fn patch(value: serde_json::Value) -> Patch {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn field_set_changes_one_cell_only() {
        let base = sample_map();
        let out = apply_patches(
            &base,
            &[patch(json!({"lessonIndex": 0, "sectionIndex": 0, "field": "x", "value": "2"}))],
        );
        assert!(out.skipped.is_empty());
        assert_eq!(out.map.lessons[0].sections[0].text("x"), "2");

        let mut expected = base.clone();
        expected.lessons[0].sections[0].set_text("x", "2");
        assert_eq!(out.map, expected);
    }

    #[test]
    fn title_patch_wins_over_section_dispatch() {
        let base = sample_map();
        let out = apply_patches(
            &base,
            &[patch(
                json!({"lessonIndex": 1, "sectionIndex": 0, "field": "title", "value": "Renamed"}),
            )],
        );
        assert_eq!(out.map.lessons[1].title, "Renamed");
        assert_eq!(out.map.lessons[1].sections[0].text("x"), "3");
    }

    #[test]
    fn remove_lesson_keeps_the_rest() {
        let base = sample_map();
        let out = apply_patches(&base, &[patch(json!({"action": "removeLesson", "lessonIndex": 0}))]);
        assert_eq!(out.map.lessons.len(), 1);
        assert_eq!(out.map.lessons[0], base.lessons[1]);
    }

    #[test]
    fn add_lesson_defaults_to_end_and_clamps() {
        let base = sample_map();
        let lesson = json!({"title": "L3", "sections": [{"x": "9"}]});
        let out = apply_patches(
            &base,
            &[
                patch(json!({"action": "addLesson", "lesson": lesson})),
                patch(json!({"action": "addLesson", "lessonIndex": 99, "lesson": {"title": "L4"}})),
            ],
        );
        assert_eq!(out.map.lessons[2].title, "L3");
        assert_eq!(out.map.lessons[3].title, "L4");
    }

    #[test]
    fn later_patches_see_earlier_effects() {
        let base = sample_map();
        let out = apply_patches(
            &base,
            &[
                patch(json!({"action": "addLesson", "lessonIndex": 2,
                    "lesson": {"title": "L3", "sections": [{"x": "old"}]}})),
                patch(json!({"lessonIndex": 2, "sectionIndex": 0, "field": "x", "value": "new"})),
            ],
        );
        assert!(out.skipped.is_empty());
        assert_eq!(out.map.lessons[2].sections[0].text("x"), "new");
    }

    #[test]
    fn malformed_patches_are_skipped_with_reasons() {
        let base = sample_map();
        let out = apply_patches(
            &base,
            &[
                Patch::default(),
                patch(json!({"action": "removeLesson", "lessonIndex": 99})),
                patch(json!({"lessonIndex": -1, "sectionIndex": 0, "field": "x", "value": "2"})),
            ],
        );
        assert_eq!(out.map, base);
        assert_eq!(out.skipped.len(), 3);
        assert_eq!(out.skipped[0].index, 0);
    }

    #[test]
    fn empty_batch_is_identity_with_independent_instance() {
        let base = sample_map();
        let out = apply_patches(&base, &[]);
        assert_eq!(out.map, base);
        // A deep copy, not an alias: mutating the result leaves base alone.
        let mut mutated = out.map;
        mutated.lessons[0].title.push('!');
        assert_eq!(base.lessons[0].title, "L1");
    }

    #[test]
    fn field_set_is_idempotent() {
        let base = sample_map();
        let p = patch(json!({"lessonIndex": 0, "sectionIndex": 1, "field": "x", "value": "7"}));
        let once = apply_patches(&base, std::slice::from_ref(&p));
        let twice = apply_patches(&once.map, &[p]);
        assert_eq!(once.map, twice.map);
    }

    #[test]
    fn course_level_fields() {
        let base = sample_map();
        let out = apply_patches(
            &base,
            &[
                patch(json!({"field": "courseName", "value": "Renamed Course"})),
                patch(json!({"field": "semester", "value": "SP27"})),
            ],
        );
        assert_eq!(out.map.course_name, "Renamed Course");
        assert_eq!(out.map.semester, "SP27");
    }

    #[test]
    fn user_edits_replay_with_title_sentinel() {
        let base = sample_map();
        let edits = vec![
            UserEdit {
                lesson_idx: 0,
                section_idx: None,
                key: "title".into(),
                old_value: "L1".into(),
                new_value: "My Week 1".into(),
                lesson_title: "My Week 1".into(),
            },
            UserEdit {
                lesson_idx: 1,
                section_idx: Some(0),
                key: "x".into(),
                old_value: "3".into(),
                new_value: "mine".into(),
                lesson_title: "L2".into(),
            },
            UserEdit {
                lesson_idx: 9,
                section_idx: Some(0),
                key: "x".into(),
                old_value: String::new(),
                new_value: "dropped".into(),
                lesson_title: String::new(),
            },
        ];
        let merged = apply_user_edits(&base, &edits);
        assert_eq!(merged.lessons[0].title, "My Week 1");
        assert_eq!(merged.lessons[1].sections[0].text("x"), "mine");
        assert_eq!(merged.lessons.len(), 2);
    }

    #[test]
    fn add_section_inserts_at_position() {
        let base = sample_map();
        let mut section = Section::new();
        section.set_text("x", "inserted");
        let out = apply_patches(
            &base,
            &[patch(json!({"action": "addSection", "lessonIndex": 0, "sectionIndex": 1,
                "section": {"x": "inserted"}}))],
        );
        assert_eq!(out.map.lessons[0].sections.len(), 3);
        assert_eq!(out.map.lessons[0].sections[1], section);
    }
}
