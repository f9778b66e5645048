use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// A configurable schema column. The key is derived from the label and is
/// what sections use as their field name; the label is what prompts and
/// exports show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub key: String,
    pub label: String,
}

impl Column {
    pub fn new(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
        }
    }

    /// Derive a column from a user-entered label: lowercase, whitespace
    /// collapsed to underscores.
    pub fn from_label(label: impl Into<String>) -> Self {
        let label = label.into();
        let key = WHITESPACE
            .replace_all(label.trim(), "_")
            .to_lowercase();
        Self { key, label }
    }
}

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// The ten pedagogical columns every new session starts with.
pub fn default_columns() -> Vec<Column> {
    vec![
        Column::new("learningGoals", "Learning Goals"),
        Column::new("topicSection", "Topic/Section"),
        Column::new("learningObjectives", "Learning Objectives"),
        Column::new("weeklyAssessments", "Weekly Assessments"),
        Column::new("asyncActivities", "ASYNCHRONOUS Activities"),
        Column::new("syncActivities", "SYNCHRONOUS Activities"),
        Column::new("technologyNeeded", "Technology Needed"),
        Column::new("presentationFormat", "Presentation Format"),
        Column::new("supportingResources", "Supporting Resources"),
        Column::new("evaluateDesign", "Evaluate Design"),
    ]
}

/// Turn a camelCase column key into a readable label, e.g.
/// `learningGoals` -> `Learning Goals`. Used for progress messages and
/// change summaries.
pub fn humanize_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for (i, ch) in key.chars().enumerate() {
        if i == 0 {
            out.extend(ch.to_uppercase());
        } else if ch.is_uppercase() {
            out.push(' ');
            out.push(ch);
        } else {
            out.push(ch);
        }
    }
    out.trim().to_string()
}
