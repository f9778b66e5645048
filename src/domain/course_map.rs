use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The course map document. Exactly one live instance per session; every
/// accepted change replaces the whole value rather than mutating in place,
/// so version history can hold cheap deep snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct CourseMap {
    pub course_name: String,
    pub semester: String,
    pub lessons: Vec<Lesson>,
}

/// A week/module of the course. Order within `CourseMap::lessons` is the
/// week sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Lesson {
    pub title: String,
    pub sections: Vec<Section>,
}

/// A topic row inside a lesson: a mapping from column key to cell value.
/// Keys are dynamic (driven by the configurable column list), so sections
/// must tolerate missing keys; a missing key reads as the empty string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Section {
    pub fields: Map<String, Value>,
}

impl CourseMap {
    /// Tolerant conversion from an arbitrary JSON value. Returns `None`
    /// unless the value carries a `lessons` array that maps onto the
    /// document shape; missing fields default to empty.
    pub fn from_value(value: Value) -> Option<Self> {
        value.get("lessons")?.as_array()?;
        serde_json::from_value(value).ok()
    }

    pub fn lesson_count(&self) -> usize {
        self.lessons.len()
    }
}

impl Section {
    pub fn new() -> Self {
        Self { fields: Map::new() }
    }

    /// Cell text for a column key; missing keys and non-string values read
    /// as empty.
    pub fn text(&self, key: &str) -> &str {
        match self.fields.get(key) {
            Some(Value::String(s)) => s,
            _ => "",
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.fields.insert(key.into(), value);
    }

    pub fn set_text(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(key.into(), Value::String(value.into()));
    }

    /// Boolean-like cells (`evaluateDesign`) accept `true` or `"true"`.
    pub fn is_checked(&self, key: &str) -> bool {
        match self.fields.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s == "true",
            _ => false,
        }
    }

    /// Whether any cell holds content worth keeping.
    pub fn has_content(&self) -> bool {
        self.fields.values().any(|v| match v {
            Value::String(s) => !s.trim().is_empty(),
            Value::Bool(b) => *b,
            Value::Null => false,
            _ => true,
        })
    }
}
