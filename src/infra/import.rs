//! Import an existing course map from a CSV export.
//!
//! Expects a table with a Week/Module first column and one data column per
//! section field. Header names are matched fuzzily against the known
//! column vocabulary; unknown headers become sanitized custom keys.

use std::path::Path;

use serde_json::Value;
use thiserror::Error;

use crate::domain::{CourseMap, Lesson, Section};

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("unsupported import format '{0}'; use .csv")]
    UnsupportedFormat(String),
    #[error("file appears empty or has no data rows")]
    Empty,
    #[error("no data rows found after header")]
    NoDataRows,
    #[error("could not parse any lessons from the file")]
    NoLessons,
    #[error("could not read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Import a course map from a CSV file on disk. The course name is guessed
/// from the file name.
pub fn import_course_map(path: &Path) -> Result<CourseMap, ImportError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    if ext != "csv" {
        return Err(ImportError::UnsupportedFormat(ext));
    }
    let text = std::fs::read_to_string(path).map_err(|source| ImportError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    import_from_csv(&text, stem)
}

/// Parse CSV text into a course map. `file_stem` seeds the course name.
pub fn import_from_csv(text: &str, file_stem: &str) -> Result<CourseMap, ImportError> {
    let rows = parse_csv_rows(text);
    if rows.len() < 2 {
        return Err(ImportError::Empty);
    }

    let headers: Vec<String> = rows[0].iter().map(|h| h.trim().to_string()).collect();
    let data_rows: Vec<&Vec<String>> = rows[1..]
        .iter()
        .filter(|r| r.iter().any(|cell| !cell.trim().is_empty()))
        .collect();
    if data_rows.is_empty() {
        return Err(ImportError::NoDataRows);
    }

    let col_keys: Vec<Option<String>> = headers.iter().map(|h| guess_column_key(h)).collect();

    // Rows group into lessons: a non-empty first column starts a new one.
    let mut lessons: Vec<Lesson> = Vec::new();
    for row in data_rows {
        let week_module = row.first().map(|c| c.trim()).unwrap_or_default();
        if !week_module.is_empty() {
            lessons.push(Lesson { title: week_module.to_string(), sections: Vec::new() });
        } else if lessons.is_empty() {
            lessons.push(Lesson { title: "Lesson 1".to_string(), sections: Vec::new() });
        }

        let mut section = Section::new();
        for (index, key) in col_keys.iter().enumerate() {
            if index == 0 {
                continue;
            }
            let Some(key) = key else { continue };
            let val = row.get(index).map(|c| c.trim()).unwrap_or_default();
            if key == "evaluateDesign" {
                let checked = matches!(val, "✓" | "true" | "yes" | "1");
                section.set(key.clone(), Value::Bool(checked));
            } else {
                section.set_text(key.clone(), val);
            }
        }

        if section.has_content()
            && let Some(lesson) = lessons.last_mut()
        {
            lesson.sections.push(section);
        }
    }

    lessons.retain(|l| !l.sections.is_empty());
    if lessons.is_empty() {
        return Err(ImportError::NoLessons);
    }

    Ok(CourseMap {
        course_name: course_name_from_stem(file_stem),
        semester: "TBD".to_string(),
        lessons,
    })
}

fn course_name_from_stem(stem: &str) -> String {
    let mut name = String::with_capacity(stem.len());
    let mut depth = 0usize;
    // Strip parenthesized qualifiers like "(final)".
    for ch in stem.chars() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => name.push(ch),
            _ => {}
        }
    }
    let lower = name.to_lowercase();
    if let Some(pos) = lower.find("course map") {
        name.replace_range(pos..pos + "course map".len(), "");
    } else if let Some(pos) = lower.find("coursemap") {
        name.replace_range(pos..pos + "coursemap".len(), "");
    }
    let name = name.trim();
    if name.is_empty() { "Imported Course".to_string() } else { name.to_string() }
}

/// Header-to-key vocabulary for the standard columns. Matching is
/// case-insensitive after punctuation stripping, and fuzzy in both
/// directions (header contains pattern or pattern contains header).
const HEADER_MAPPINGS: &[(&str, &str)] = &[
    ("learning goals", "learningGoals"),
    ("learning goal", "learningGoals"),
    ("topic", "topicSection"),
    ("topic/section", "topicSection"),
    ("topic section", "topicSection"),
    ("learning objectives", "learningObjectives"),
    ("learning objective", "learningObjectives"),
    ("objectives", "learningObjectives"),
    ("assessments", "weeklyAssessments"),
    ("weekly assessments", "weeklyAssessments"),
    ("assessment", "weeklyAssessments"),
    ("async activities", "asyncActivities"),
    ("asynchronous activities", "asyncActivities"),
    ("asynchronous", "asyncActivities"),
    ("sync activities", "syncActivities"),
    ("synchronous activities", "syncActivities"),
    ("synchronous", "syncActivities"),
    ("technology", "technologyNeeded"),
    ("technology needed", "technologyNeeded"),
    ("format", "presentationFormat"),
    ("presentation format", "presentationFormat"),
    ("resources", "supportingResources"),
    ("supporting resources", "supportingResources"),
    ("evaluate", "evaluateDesign"),
    ("evaluate design", "evaluateDesign"),
];

fn guess_column_key(header: &str) -> Option<String> {
    if header.is_empty() {
        return None;
    }
    let lower: String = header
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace() || *c == '/')
        .collect();
    let lower = lower.trim().to_string();
    if lower.is_empty() {
        return None;
    }

    // The week/module column is the lesson grouper, not a section field.
    if lower.contains("week") || lower.contains("module") {
        return None;
    }

    if let Some((_, key)) = HEADER_MAPPINGS.iter().find(|(pattern, _)| *pattern == lower) {
        return Some((*key).to_string());
    }
    if let Some((_, key)) = HEADER_MAPPINGS
        .iter()
        .find(|(pattern, _)| lower.contains(pattern) || pattern.contains(lower.as_str()))
    {
        return Some((*key).to_string());
    }

    let sanitized: String = lower
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    (!sanitized.is_empty()).then_some(sanitized)
}

/// Quote-aware CSV row parser. Handles quoted fields, doubled-quote
/// escapes, and both newline conventions.
fn parse_csv_rows(text: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quote = false;

    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if in_quote {
            if ch == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quote = false;
                }
            } else {
                field.push(ch);
            }
        } else {
            match ch {
                '"' => in_quote = true,
                ',' => current.push(std::mem::take(&mut field)),
                '\r' => {
                    if chars.peek() == Some(&'\n') {
                        chars.next();
                    }
                    current.push(std::mem::take(&mut field));
                    rows.push(std::mem::take(&mut current));
                }
                '\n' => {
                    current.push(std::mem::take(&mut field));
                    rows.push(std::mem::take(&mut current));
                }
                _ => field.push(ch),
            }
        }
    }
    if !field.is_empty() || !current.is_empty() {
        current.push(field);
        rows.push(current);
    }
    rows
}
