//! Best-effort recovery of a JSON document from a truncated model stream.
//!
//! The stream is consulted many times per second while tokens arrive, so
//! almost every input ends mid-value. The repair is purely syntactic:
//! close an unterminated string, then close open brackets innermost-first,
//! and accept the result only if it then parses. Totality matters more
//! than cleverness here; any input that cannot be repaired yields `None`
//! and the previous preview simply stays on screen.

use serde_json::Value;

use crate::domain::{CourseMap, Patch, patches_from_value};

/// Try to produce a parsed JSON object from a possibly-incomplete model
/// response. Never panics, never errors; `None` means "nothing usable
/// yet".
pub fn reconcile(text: &str) -> Option<Value> {
    let text = strip_code_fence(text);
    let start = text.find('{')?;
    let candidate = &text[start..];

    if let Ok(value) = serde_json::from_str::<Value>(candidate) {
        return Some(value);
    }

    let mut repaired = candidate.to_string();
    if count_unescaped_quotes(&repaired) % 2 == 1 {
        repaired.push('"');
    }
    for closer in open_brackets(&repaired).into_iter().rev() {
        repaired.push(closer);
    }

    serde_json::from_str(&repaired).ok()
}

/// Reconcile and accept only documents carrying a `lessons` array.
pub fn reconcile_course_map(text: &str) -> Option<CourseMap> {
    CourseMap::from_value(reconcile(text)?)
}

/// Reconcile and pull out a `patches` list.
pub fn reconcile_patches(text: &str) -> Option<Vec<Patch>> {
    patches_from_value(&reconcile(text)?)
}

/// A conversational (non-edit) reply: a `chatReply` string with neither
/// lessons nor patches alongside it.
pub fn reconcile_chat_reply(text: &str) -> Option<String> {
    let value = reconcile(text)?;
    if value.get("lessons").is_some() || value.get("patches").is_some() {
        return None;
    }
    value.get("chatReply")?.as_str().map(str::to_string)
}

/// Drop a Markdown code fence the model sometimes wraps its JSON in. The
/// opening fence may carry a language tag; the closing fence may not have
/// arrived yet.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = match rest.find('\n') {
        Some(nl) => &rest[nl + 1..],
        None => rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
    };
    rest.trim_end_matches('`').trim()
}

fn count_unescaped_quotes(text: &str) -> usize {
    let mut count = 0;
    let mut escaped = false;
    for ch in text.chars() {
        if escaped {
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == '"' {
            count += 1;
        }
    }
    count
}

/// Closing characters for brackets still open at end of input, in opening
/// order. String contents are skipped so a brace inside a cell value does
/// not unbalance the stack.
fn open_brackets(text: &str) -> Vec<char> {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for ch in text.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => stack.push('}'),
            '[' if !in_string => stack.push(']'),
            '}' | ']' if !in_string => {
                stack.pop();
            }
            _ => {}
        }
    }
    stack
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn complete_document_passes_through() {
        let value = reconcile(r#"{"courseName": "Biology", "lessons": []}"#).unwrap();
        assert_eq!(value["courseName"], "Biology");
    }

    #[test]
    fn truncated_mid_string_recovers_partial_cells() {
        let text = r#"{"courseName": "Biology", "lessons": [{"title": "Week 1",
            "sections": [{"learningGoals": "Understand cell"#;
        let map = reconcile_course_map(text).unwrap();
        assert_eq!(map.course_name, "Biology");
        assert_eq!(map.lessons[0].title, "Week 1");
        assert_eq!(map.lessons[0].sections[0].text("learningGoals"), "Understand cell");
    }

    #[test]
    fn truncated_between_values_recovers() {
        let text = r#"{"lessons": [{"title": "Week 1", "sections": [{"a": "1"}, {"a": "2"},"#;
        // A dangling comma is unrepairable by bracket closing alone; one
        // character earlier it is fine.
        assert!(reconcile(text).is_none());
        let map = reconcile_course_map(&text[..text.len() - 1]).unwrap();
        assert_eq!(map.lessons[0].sections.len(), 2);
    }

    #[test]
    fn braces_inside_strings_do_not_unbalance() {
        let text = r#"{"lessons": [{"title": "Week {1}", "sections": [{"a": "see } and ["#;
        let map = reconcile_course_map(text).unwrap();
        assert_eq!(map.lessons[0].title, "Week {1}");
        assert_eq!(map.lessons[0].sections[0].text("a"), "see } and [");
    }

    #[test]
    fn code_fence_is_stripped() {
        let text = "```json\n{\"lessons\": [{\"title\": \"W1\"}]}\n```";
        assert!(reconcile_course_map(text).is_some());
        let open_only = "```json\n{\"lessons\": [{\"title\": \"W1\"";
        assert!(reconcile_course_map(open_only).is_some());
    }

    #[test]
    fn total_over_garbage() {
        assert!(reconcile("").is_none());
        assert!(reconcile("no json here").is_none());
        assert!(reconcile("{{{{").is_none());
        // Leading garbage before the first brace is skipped, leaving an
        // empty but valid object.
        assert_eq!(reconcile("}{"), Some(json!({})));
    }

    #[test]
    fn prose_before_the_object_is_skipped() {
        let value = reconcile("Here is the course map:\n{\"lessons\": []}").unwrap();
        assert!(value["lessons"].as_array().unwrap().is_empty());
    }

    #[test]
    fn course_map_requires_lessons() {
        assert!(reconcile_course_map(r#"{"courseName": "Bio"}"#).is_none());
    }

    #[test]
    fn patches_extraction() {
        let text = r#"{"patches": [{"lessonIndex": 0, "sectionIndex": 0, "field": "a", "value": "b", "reason": "typo"#;
        let patches = reconcile_patches(text).unwrap();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].reason.as_deref(), Some("typo"));
    }

    #[test]
    fn chat_reply_only_when_no_edits_present() {
        assert_eq!(
            reconcile_chat_reply(r#"{"chatReply": "Sure, here is why..."}"#).as_deref(),
            Some("Sure, here is why...")
        );
        assert!(reconcile_chat_reply(r#"{"chatReply": "x", "patches": []}"#).is_none());
        assert!(reconcile_chat_reply(r#"{"chatReply": "x", "lessons": []}"#).is_none());
        assert!(reconcile_chat_reply(&json!({"lessons": []}).to_string()).is_none());
    }

    #[test]
    fn escaped_quotes_are_not_string_ends() {
        let text = r#"{"lessons": [{"title": "He said \"go"#;
        let map = reconcile_course_map(text).unwrap();
        assert_eq!(map.lessons[0].title, "He said \"go");
    }
}
