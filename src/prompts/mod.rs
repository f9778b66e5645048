//! Prompt templates and typed builders.
//!
//! Templates live in `.hbs` files next to this module and are rendered
//! with strict-mode Handlebars; a missing variable is a bug, not an empty
//! string. Escaping is disabled because the output is prompt text, not
//! HTML.

use handlebars::Handlebars;
use once_cell::sync::Lazy;
use serde_json::{Value, json};
use std::collections::HashMap;

use crate::domain::{Column, CourseMap, UserEdit};
use crate::infra::stream::{ChatMessage, ChatRole};

static PROMPT_REGISTRY: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert("generate_system", include_str!("generate_system.hbs"));
    m.insert("generate_user", include_str!("generate_user.hbs"));
    m.insert("examine_system", include_str!("examine_system.hbs"));
    m.insert("examine_user", include_str!("examine_user.hbs"));
    m.insert("revision_system", include_str!("revision_system.hbs"));
    m.insert("revision_user", include_str!("revision_user.hbs"));
    m.insert("continue_generation", include_str!("continue_generation.hbs"));
    m.insert("continue_revision", include_str!("continue_revision.hbs"));
    m
});

/// Render a prompt by name.
pub fn render(name: &str, ctx: &Value) -> anyhow::Result<String> {
    let template = PROMPT_REGISTRY
        .get(name)
        .ok_or_else(|| anyhow::anyhow!("unknown prompt '{name}'"))?;

    let mut hb = Handlebars::new();
    hb.set_strict_mode(true); // fail if a variable is missing
    hb.register_escape_fn(handlebars::no_escape);

    hb.render_template(template, ctx)
        .map_err(|e| anyhow::anyhow!("rendering prompt '{name}' failed: {e}"))
}

/// Guidance text for the standard columns; custom columns get a generic
/// instruction built from their label.
static DEFAULT_COLUMN_DEFS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("learningGoals", "The big ideas and questions to be addressed. Derived from values, knowledge, skills, behaviors, and competencies outlined in the syllabus."),
        ("topicSection", "A numbered subsection title (e.g., \"1.1: Historical Overview of Immigration Policy\")."),
        ("learningObjectives", "\"Students will be able to...\" statements using active verbs from Bloom's taxonomy (analyze, evaluate, create, describe, compare, etc.)."),
        ("weeklyAssessments", "How students demonstrate learning — describe the task or activity (e.g., \"Reflection Paper: Analyze the impact of...\", \"Discussion Post: Compare two theories...\")."),
        ("asyncActivities", "What students do on their own time — readings, watching videos, completing assignments. Start with action verbs like \"Read:\", \"Watch:\", \"Complete:\", \"Review:\"."),
        ("syncActivities", "What students do together in real-time — discussions, group work, presentations, activities. Start with \"Activity:\", \"Discussion:\", \"Group Work:\", \"Presentation:\"."),
        ("technologyNeeded", "Specific platforms or tool types needed for the assessments and activities."),
        ("presentationFormat", "The primary media/delivery format for that section's instructional material (e.g., Text, Video, Podcast, Multimedia, Simulation, Discussion, Presentation)."),
        ("supportingResources", "Specific readings, articles, videos, textbook chapters, and other materials. Extract these directly from the syllabus when available."),
        ("evaluateDesign", "A brief self-check note on whether everything in this row is aligned and coherent."),
    ])
});

#[derive(Debug, Clone)]
pub struct PromptPair {
    pub system: String,
    pub user: String,
}

pub fn build_generate_prompts(syllabus: &str, columns: &[Column]) -> anyhow::Result<PromptPair> {
    let cols: Vec<Value> = columns
        .iter()
        .map(|col| {
            let known = DEFAULT_COLUMN_DEFS.get(col.key.as_str());
            let desc = known.map(|d| (*d).to_string()).unwrap_or_else(|| {
                format!(
                    "Content for \"{}\". Generate thoughtful, pedagogically sound content for this field.",
                    col.label
                )
            });
            let sample = if known.is_some() {
                format!("Example content for {}...", col.label)
            } else {
                format!("Thoughtful content for {}...", col.label)
            };
            json!({"key": col.key, "desc": desc, "sample": sample})
        })
        .collect();
    let col_keys = columns
        .iter()
        .map(|c| c.key.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    Ok(PromptPair {
        system: render("generate_system", &json!({}))?,
        user: render(
            "generate_user",
            &json!({"columns": cols, "col_keys": col_keys, "syllabus": syllabus}),
        )?,
    })
}

// Syllabus context cap for the examine pass; the full text already shaped
// the generation, this is a reference copy.
const EXAMINE_SYLLABUS_CAP: usize = 30_000;

pub fn build_examine_prompts(map: &CourseMap, syllabus: &str) -> anyhow::Result<PromptPair> {
    let mut cap = EXAMINE_SYLLABUS_CAP.min(syllabus.len());
    while cap < syllabus.len() && !syllabus.is_char_boundary(cap) {
        cap += 1;
    }
    Ok(PromptPair {
        system: render("examine_system", &json!({}))?,
        user: render(
            "examine_user",
            &json!({
                "course_map": serde_json::to_string(map)?,
                "syllabus": &syllabus[..cap],
            }),
        )?,
    })
}

pub fn build_revision_prompts(
    map: &CourseMap,
    message: &str,
    edits: &[UserEdit],
    history: &[ChatMessage],
) -> anyhow::Result<PromptPair> {
    let edit_lines: Vec<String> = edits.iter().map(describe_edit).collect();
    let history_lines: Vec<String> = history
        .iter()
        .map(|m| {
            let prefix = match m.role {
                ChatRole::User => "User",
                ChatRole::Assistant => "Assistant",
            };
            format!("{prefix}: {}", m.text)
        })
        .collect();

    Ok(PromptPair {
        system: render("revision_system", &json!({}))?,
        user: render(
            "revision_user",
            &json!({
                "course_map": serde_json::to_string(map)?,
                "edits": edit_lines,
                "history": history_lines,
                "message": message,
            }),
        )?,
    })
}

/// The generation system prompt alone; resume sends it with a
/// continuation user prompt instead of the full instruction set.
pub fn generation_system() -> anyhow::Result<String> {
    render("generate_system", &json!({}))
}

pub fn build_generation_continuation(partial: &str) -> anyhow::Result<String> {
    render("continue_generation", &json!({"partial": partial}))
}

pub fn revision_system() -> anyhow::Result<String> {
    render("revision_system", &json!({}))
}

pub fn build_revision_continuation(message: &str, partial: &str) -> anyhow::Result<String> {
    render("continue_revision", &json!({"message": message, "partial": partial}))
}

fn describe_edit(edit: &UserEdit) -> String {
    match edit.section_idx {
        None => format!(
            "Lesson {} title changed from \"{}\" to \"{}\"",
            edit.lesson_idx + 1,
            edit.old_value,
            edit.new_value
        ),
        Some(si) => format!(
            "Lesson {}, Section {}, {}: changed from \"{}...\" to \"{}...\"",
            edit.lesson_idx + 1,
            si + 1,
            edit.key,
            clip(&edit.old_value, 80),
            clip(&edit.new_value, 80)
        ),
    }
}

fn clip(text: &str, max: usize) -> &str {
    let mut end = max.min(text.len());
    while end < text.len() && !text.is_char_boundary(end) {
        end += 1;
    }
    &text[..end]
}
