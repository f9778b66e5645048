//! Course map generation: source ingestion, the streaming first pass, the
//! examine pass, and stop/resume.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::application::events::{Phase, ProgressEvent, emit, estimate_percent};
use crate::application::patch_engine::{apply_patches, apply_user_edits};
use crate::domain::{CourseMap, Patch, humanize_key};
use crate::infra::notify::Notifier;
use crate::infra::reconcile::{reconcile_course_map, reconcile_patches};
use crate::infra::source::{SourceReader, read_sources};
use crate::infra::stream::{
    ChatMessage, MAX_RETRIES, ProviderRequest, ProviderSettings, SseTransport, StreamError,
    StreamOptions, build_request, stream_completion,
};
use crate::infra::token_budget::{check_token_limit, truncate_to_fit};
use crate::prompts;
use crate::state::Session;

// Preview refresh interval while tokens stream in.
const PREVIEW_THROTTLE: Duration = Duration::from_millis(150);

// Floor for the expected-length heuristic behind the percent estimate.
const GENERATION_FLOOR_CHARS: usize = 8000;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("an operation is already in progress")]
    Busy,
    #[error("failed to read source files: {0}")]
    NoSourceText(String),
    #[error("invalid response structure from AI")]
    InvalidResponse,
    #[error("no stopped generation to resume")]
    NothingToResume,
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error(transparent)]
    Prompt(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationOutcome {
    Completed,
    /// Stopped by the user; the partial text is saved for resume.
    Stopped,
}

pub struct GenerationOrchestrator {
    settings: ProviderSettings,
    transport: Arc<dyn SseTransport>,
    notifier: Arc<dyn Notifier>,
    progress: Option<UnboundedSender<ProgressEvent>>,
    phase: Phase,
    cancel: CancellationToken,
    /// Partial model output saved when the user stops mid-stream.
    saved_text: String,
    /// Aggregated source documents; kept for the examine pass and resume.
    source_text: String,
    /// Last fully generated map, so a failed examine pass can be retried
    /// without regenerating.
    last_generated: Option<CourseMap>,
}

impl GenerationOrchestrator {
    pub fn new(
        settings: ProviderSettings,
        transport: Arc<dyn SseTransport>,
        notifier: Arc<dyn Notifier>,
        progress: Option<UnboundedSender<ProgressEvent>>,
    ) -> Self {
        Self {
            settings,
            transport,
            notifier,
            progress,
            phase: Phase::Idle,
            cancel: CancellationToken::new(),
            saved_text: String::new(),
            source_text: String::new(),
            last_generated: None,
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn can_resume(&self) -> bool {
        !self.saved_text.is_empty()
    }

    /// Token that aborts whatever stream is currently running.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
        emit(&self.progress, ProgressEvent::Phase(self.phase.clone()));
    }

    /// Generate a course map from the given source files.
    pub async fn generate(
        &mut self,
        session: &mut Session,
        reader: &dyn SourceReader,
        files: &[PathBuf],
    ) -> Result<GenerationOutcome, GenerationError> {
        if self.phase.is_busy() {
            return Err(GenerationError::Busy);
        }
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
        self.set_phase(Phase::Parsing);
        session.course_map = None;

        let bundle = read_sources(reader, files).await;
        for warning in &bundle.warnings {
            emit(&self.progress, ProgressEvent::Warning(warning.clone()));
        }
        if bundle.text.trim().is_empty() {
            let detail = if bundle.warnings.is_empty() {
                "No text content could be extracted.".to_string()
            } else {
                bundle.warnings.join("\n")
            };
            self.set_phase(Phase::Failed(detail.clone()));
            return Err(GenerationError::NoSourceText(detail));
        }
        self.source_text = bundle.text;

        // Truncate oversized sources to the model's context budget.
        let mut pair = prompts::build_generate_prompts(&self.source_text, &session.columns)?;
        let check = check_token_limit(
            &format!("{}{}", pair.system, pair.user),
            &self.settings.model_id,
        );
        if !check.fits {
            let (truncated, was_truncated) =
                truncate_to_fit(&self.source_text, &self.settings.model_id);
            if was_truncated {
                pair = prompts::build_generate_prompts(&truncated, &session.columns)?;
                emit(
                    &self.progress,
                    ProgressEvent::Warning(format!(
                        "Content was ~{} tokens (model limit: ~{} available). Auto-truncated to fit.",
                        check.estimated_tokens, check.available_tokens
                    )),
                );
            }
        }

        self.set_phase(Phase::Generating);
        let request = build_request(&self.settings, &pair.system, &[ChatMessage::user(&pair.user)]);

        let streamed = self
            .stream_with_preview(&request, String::new(), preview_generation)
            .await;
        let full_text = match streamed {
            Ok(text) => text,
            Err(StreamError::Aborted) => return Ok(self.enter_stopped(session)),
            Err(err) => {
                self.set_phase(Phase::Failed(err.to_string()));
                return Err(err.into());
            }
        };

        let Some(map) = reconcile_course_map(&full_text) else {
            self.set_phase(Phase::Failed("invalid response structure from AI".into()));
            return Err(GenerationError::InvalidResponse);
        };

        session.course_map = Some(map.clone());
        session.history.push(map.clone(), "Initial generation");
        self.last_generated = Some(map);
        self.saved_text.clear();

        self.run_examine(session).await;

        self.set_phase(Phase::Done);
        emit(&self.progress, ProgressEvent::Percent(100));
        session.user_edits.clear();
        self.notifier.done("Course map is ready!");
        Ok(GenerationOutcome::Completed)
    }

    /// Continue a stopped generation from the saved partial text. Manual
    /// edits made while stopped are replayed on top of the final result.
    pub async fn resume(
        &mut self,
        session: &mut Session,
    ) -> Result<GenerationOutcome, GenerationError> {
        if self.phase.is_busy() {
            return Err(GenerationError::Busy);
        }
        if self.saved_text.is_empty() {
            return Err(GenerationError::NothingToResume);
        }
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
        self.set_phase(Phase::Generating);
        emit(&self.progress, ProgressEvent::Detail("Resuming generation...".into()));

        let system = prompts::generation_system()?;
        let continuation = prompts::build_generation_continuation(&self.saved_text)?;
        let request = build_request(&self.settings, &system, &[ChatMessage::user(&continuation)]);

        let streamed = self
            .stream_with_preview(&request, self.saved_text.clone(), preview_generation)
            .await;
        let full_text = match streamed {
            Ok(text) => text,
            Err(StreamError::Aborted) => return Ok(self.enter_stopped(session)),
            Err(err) => {
                self.saved_text.clear();
                self.set_phase(Phase::Failed(err.to_string()));
                return Err(err.into());
            }
        };

        let Some(map) = reconcile_course_map(&full_text) else {
            self.saved_text.clear();
            self.set_phase(Phase::Failed("invalid response structure from AI".into()));
            return Err(GenerationError::InvalidResponse);
        };

        let merged = apply_user_edits(&map, &session.user_edits);
        session.course_map = Some(merged.clone());
        session.history.push(merged, "Resumed generation");
        self.saved_text.clear();
        self.set_phase(Phase::Done);
        emit(&self.progress, ProgressEvent::Percent(100));
        self.notifier.done("Course map is ready!");
        Ok(GenerationOutcome::Completed)
    }

    /// Re-run the examine pass against the last generated map.
    pub async fn retry_examine(&mut self, session: &mut Session) -> Result<(), GenerationError> {
        if self.phase.is_busy() {
            return Err(GenerationError::Busy);
        }
        if self.last_generated.is_none() {
            return Err(GenerationError::InvalidResponse);
        }
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
        self.run_examine(session).await;
        self.set_phase(Phase::Done);
        emit(&self.progress, ProgressEvent::Percent(100));
        Ok(())
    }

    /// Drop the current map and any stopped state.
    pub fn clear_all(&mut self, session: &mut Session) {
        self.stop();
        self.saved_text.clear();
        self.source_text.clear();
        self.last_generated = None;
        self.phase = Phase::Idle;
        session.course_map = None;
    }

    fn enter_stopped(&mut self, session: &mut Session) -> GenerationOutcome {
        if let Some(partial) = reconcile_course_map(&self.saved_text) {
            session.course_map = Some(partial);
        }
        self.set_phase(Phase::Stopped);
        GenerationOutcome::Stopped
    }

    /// Run one stream, feeding throttled previews out through the progress
    /// channel. On abort the accumulated text lands in `saved_text`.
    async fn stream_with_preview(
        &mut self,
        request: &ProviderRequest,
        existing_text: String,
        preview: fn(&str, &Option<UnboundedSender<ProgressEvent>>),
    ) -> Result<String, StreamError> {
        let progress = self.progress.clone();
        let mut latest_text = existing_text.clone();
        let mut last_update = Instant::now() - PREVIEW_THROTTLE;
        let mut on_chunk = |text: &str, _count: u64| {
            latest_text.clear();
            latest_text.push_str(text);
            if last_update.elapsed() < PREVIEW_THROTTLE {
                return;
            }
            last_update = Instant::now();
            preview(text, &progress);
        };
        let progress_retry = self.progress.clone();
        let mut on_retry = |attempt: u32, max: u32, delay_ms: u64| {
            emit(&progress_retry, ProgressEvent::Retry { attempt, max, delay_ms });
            emit(
                &progress_retry,
                ProgressEvent::Detail(format!("Connection lost — retrying ({attempt}/{max})...")),
            );
        };

        let result = stream_completion(
            self.transport.as_ref(),
            request,
            StreamOptions {
                cancel: self.cancel.clone(),
                max_retries: MAX_RETRIES,
                existing_text,
                on_chunk: Some(&mut on_chunk),
                on_retry: Some(&mut on_retry),
            },
        )
        .await;

        match result {
            Ok(outcome) => Ok(outcome.full_text),
            Err(StreamError::Aborted) => {
                self.saved_text = latest_text;
                Err(StreamError::Aborted)
            }
            Err(err) => Err(err),
        }
    }

    /// The examine pass: ask the model to review its own output against
    /// the sources and stream back targeted fixes. Failures here never
    /// fail the generation; the unexamined map is still a valid result.
    async fn run_examine(&mut self, session: &mut Session) {
        let Some(pre_map) = session.course_map.clone() else {
            return;
        };
        self.set_phase(Phase::Examining);
        emit(
            &self.progress,
            ProgressEvent::Detail("Reviewing for missing or inaccurate content...".into()),
        );

        let pair = match prompts::build_examine_prompts(&pre_map, &self.source_text) {
            Ok(pair) => pair,
            Err(err) => {
                emit(&self.progress, ProgressEvent::ExamineSkipped { reason: err.to_string() });
                return;
            }
        };
        let request = build_request(&self.settings, &pair.system, &[ChatMessage::user(&pair.user)]);

        let streamed = self
            .stream_with_preview(&request, String::new(), preview_examine)
            .await;
        let full_text = match streamed {
            Ok(text) => text,
            Err(err) => {
                // Saved text is for resuming the main pass; examine
                // partials are patch-shaped and must not linger there.
                self.saved_text.clear();
                log::warn!("examine pass failed: {err}");
                emit(&self.progress, ProgressEvent::ExamineSkipped { reason: err.to_string() });
                return;
            }
        };

        if let Some(patches) = reconcile_patches(&full_text) {
            if patches.is_empty() {
                emit(&self.progress, ProgressEvent::Changes(Vec::new()));
                return;
            }
            let outcome = apply_patches(&pre_map, &patches);
            for skip in &outcome.skipped {
                emit(
                    &self.progress,
                    ProgressEvent::Warning(format!(
                        "Ignored examine patch {}: {}",
                        skip.index + 1,
                        skip.reason
                    )),
                );
            }
            let changes: Vec<String> = patches.iter().map(describe_patch).collect();
            session.course_map = Some(outcome.map.clone());
            session
                .history
                .push(outcome.map, format!("Examined — {} fix{}", changes.len(), plural(changes.len())));
            emit(&self.progress, ProgressEvent::Changes(changes));
        } else if let Some(full_map) = reconcile_course_map(&full_text) {
            // Fallback: the model returned a whole map instead of patches.
            let changes = compute_exam_diff(&pre_map, &full_map);
            session.course_map = Some(full_map.clone());
            let label = if changes.is_empty() {
                "Examined — no changes needed".to_string()
            } else {
                format!("Examined — {} fix{}", changes.len(), plural(changes.len()))
            };
            session.history.push(full_map, label);
            emit(&self.progress, ProgressEvent::Changes(changes));
        }
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 { "" } else { "es" }
}

/// Live preview for the main generation stream: reconcile the partial
/// document and report which cell the model is currently filling.
fn preview_generation(text: &str, progress: &Option<UnboundedSender<ProgressEvent>>) {
    let Some(map) = reconcile_course_map(text) else {
        return;
    };
    let lesson_num = map.lessons.len();
    emit(progress, ProgressEvent::Percent(estimate_percent(text.len(), GENERATION_FLOOR_CHARS)));
    let detail = match map.lessons.last() {
        Some(lesson) => match lesson.sections.last() {
            Some(section) => {
                let last_key = section
                    .fields
                    .iter()
                    .filter(|(_, v)| !v.is_null())
                    .map(|(k, _)| k.clone())
                    .next_back();
                match last_key {
                    Some(key) => format!("Mapping Lesson {lesson_num} {}...", humanize_key(&key)),
                    None => format!("Mapping Lesson {lesson_num}..."),
                }
            }
            None => format!("Starting Lesson {lesson_num}..."),
        },
        None => return,
    };
    emit(progress, ProgressEvent::Detail(detail));
    emit(progress, ProgressEvent::Preview(map));
}

/// Preview for the examine stream: just count fixes found so far.
fn preview_examine(text: &str, progress: &Option<UnboundedSender<ProgressEvent>>) {
    if let Some(patches) = reconcile_patches(text) {
        let n = patches.len();
        emit(
            progress,
            ProgressEvent::Detail(format!("Found {n} fix{} so far...", plural(n))),
        );
    }
}

/// Human-readable description of one examine patch, preferring the
/// model's stated reason.
fn describe_patch(patch: &Patch) -> String {
    let lesson = patch.lesson_index.unwrap_or(0) + 1;
    let section = patch.section_index.unwrap_or(0) + 1;
    let label = patch.field.as_deref().map(humanize_key).unwrap_or_default();
    let location = match (patch.action.as_deref(), patch.field.as_deref()) {
        (Some("addLesson"), _) => format!("Added Lesson {lesson}"),
        (Some("addSection"), _) => format!("Added section in Lesson {lesson}"),
        (Some("removeLesson"), _) => format!("Removed Lesson {lesson}"),
        (_, Some("title")) => format!("Lesson {lesson} title"),
        (_, Some("courseName" | "semester")) => label.clone(),
        _ => format!("Lesson {lesson}, Section {section} — {label}"),
    };
    match &patch.reason {
        Some(reason) => format!("{location}: {reason}"),
        None => location,
    }
}

/// Cell-by-cell diff between the pre- and post-examine maps; used when
/// the model ignores the patch format and returns a whole document.
fn compute_exam_diff(pre: &CourseMap, post: &CourseMap) -> Vec<String> {
    let mut changes = Vec::new();
    let max_lessons = pre.lessons.len().max(post.lessons.len());
    for li in 0..max_lessons {
        let (pre_lesson, post_lesson) = (pre.lessons.get(li), post.lessons.get(li));
        let Some(post_lesson) = post_lesson else { continue };
        let Some(pre_lesson) = pre_lesson else {
            let title = if post_lesson.title.is_empty() { "Untitled" } else { &post_lesson.title };
            changes.push(format!("Added Lesson {}: {title}", li + 1));
            continue;
        };
        if pre_lesson.title != post_lesson.title {
            changes.push(format!(
                "Lesson {} title: \"{}\" → \"{}\"",
                li + 1,
                pre_lesson.title,
                post_lesson.title
            ));
        }
        let max_sections = pre_lesson.sections.len().max(post_lesson.sections.len());
        for si in 0..max_sections {
            let empty = crate::domain::Section::new();
            let pre_sec = pre_lesson.sections.get(si).unwrap_or(&empty);
            let post_sec = post_lesson.sections.get(si).unwrap_or(&empty);
            let mut keys: Vec<&String> = pre_sec.fields.keys().chain(post_sec.fields.keys()).collect();
            keys.sort();
            keys.dedup();
            for key in keys {
                let old_val = pre_sec.text(key).trim();
                let new_val = post_sec.text(key).trim();
                if old_val != new_val {
                    let verb = if old_val.is_empty() && !new_val.is_empty() { "filled" } else { "updated" };
                    changes.push(format!(
                        "Lesson {}, Section {} — {verb} {}",
                        li + 1,
                        si + 1,
                        humanize_key(key)
                    ));
                }
            }
        }
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: serde_json::Value) -> CourseMap {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn exam_diff_reports_fills_updates_and_additions() {
        let pre = map(json!({"lessons": [
            {"title": "Week 1", "sections": [{"a": "", "b": "keep"}]}
        ]}));
        let post = map(json!({"lessons": [
            {"title": "Week One", "sections": [{"a": "new", "b": "keep"}]},
            {"title": "Week 2", "sections": []}
        ]}));
        let changes = compute_exam_diff(&pre, &post);
        assert!(changes.contains(&"Lesson 1 title: \"Week 1\" → \"Week One\"".to_string()));
        assert!(changes.contains(&"Lesson 1, Section 1 — filled A".to_string()));
        assert!(changes.contains(&"Added Lesson 2: Week 2".to_string()));
        assert_eq!(changes.len(), 3);
    }

    #[test]
    fn patch_descriptions_prefer_reasons() {
        let with_reason: Patch = serde_json::from_value(json!({
            "lessonIndex": 1, "sectionIndex": 0, "field": "learningGoals",
            "value": "x", "reason": "Syllabus week 2 covers osmosis."
        }))
        .unwrap();
        assert_eq!(
            describe_patch(&with_reason),
            "Lesson 2, Section 1 — Learning Goals: Syllabus week 2 covers osmosis."
        );

        let removal: Patch =
            serde_json::from_value(json!({"action": "removeLesson", "lessonIndex": 3})).unwrap();
        assert_eq!(describe_patch(&removal), "Removed Lesson 4");
    }
}
