//! Chat-driven revision of an existing course map.
//!
//! The model answers either with a conversational reply, a patch batch,
//! or (as a fallback it is told not to use) a whole replacement map.
//! Patches are previewed live against a snapshot taken before the
//! revision started, so a patch retracted mid-stream disappears from the
//! preview instead of sticking.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::application::events::{Phase, ProgressEvent, emit, estimate_percent};
use crate::application::patch_engine::apply_patches;
use crate::domain::{CourseMap, humanize_key};
use crate::infra::reconcile::{reconcile_chat_reply, reconcile_course_map, reconcile_patches};
use crate::infra::stream::{
    ChatMessage, MAX_RETRIES, ProviderRequest, ProviderSettings, SseTransport, StreamError,
    StreamOptions, build_request, stream_completion,
};
use crate::prompts;
use crate::state::Session;

const PREVIEW_THROTTLE: Duration = Duration::from_millis(150);

// Patch responses are much shorter than full maps; the percent heuristic
// gets a lower floor.
const REVISION_FLOOR_CHARS: usize = 2000;

#[derive(Debug, Error)]
pub enum RevisionError {
    #[error("no course map to revise")]
    NoCourseMap,
    #[error("an operation is already in progress")]
    Busy,
    #[error("invalid revision response from AI")]
    InvalidResponse,
    #[error("no stopped revision to resume")]
    NothingToResume,
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error(transparent)]
    Prompt(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevisionOutcome {
    /// Conversational answer; the map is untouched.
    ChatReply(String),
    /// The map changed; `changes` descriptions are also sent as a
    /// progress event.
    Applied { changes: usize },
    Stopped,
}

pub struct RevisionOrchestrator {
    settings: ProviderSettings,
    transport: Arc<dyn SseTransport>,
    progress: Option<UnboundedSender<ProgressEvent>>,
    phase: Phase,
    cancel: CancellationToken,
    saved_text: String,
    saved_message: String,
    saved_old_map: Option<CourseMap>,
}

impl RevisionOrchestrator {
    pub fn new(
        settings: ProviderSettings,
        transport: Arc<dyn SseTransport>,
        progress: Option<UnboundedSender<ProgressEvent>>,
    ) -> Self {
        Self {
            settings,
            transport,
            progress,
            phase: Phase::Idle,
            cancel: CancellationToken::new(),
            saved_text: String::new(),
            saved_message: String::new(),
            saved_old_map: None,
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn can_resume(&self) -> bool {
        !self.saved_text.is_empty() && !self.saved_message.is_empty()
    }

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

    /// Apply one chat turn to the session's map. `history` is prior turns
    /// only; the latest message goes in `message`.
    pub async fn revise(
        &mut self,
        session: &mut Session,
        message: &str,
        history: &[ChatMessage],
    ) -> Result<RevisionOutcome, RevisionError> {
        if self.phase.is_busy() {
            return Err(RevisionError::Busy);
        }
        let Some(old_map) = session.course_map.clone() else {
            return Err(RevisionError::NoCourseMap);
        };
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
        self.set_phase(Phase::Generating);
        emit(&self.progress, ProgressEvent::Detail("Revising course map...".into()));

        let pair = prompts::build_revision_prompts(&old_map, message, &session.user_edits, history)?;
        let request = build_request(&self.settings, &pair.system, &[ChatMessage::user(&pair.user)]);

        let streamed = self.stream_with_preview(&request, String::new(), &old_map).await;
        let full_text = match streamed {
            Ok(text) => text,
            Err(StreamError::Aborted) => {
                self.saved_message = message.to_string();
                self.saved_old_map = Some(old_map);
                return Ok(self.enter_stopped(session));
            }
            Err(err) => {
                self.set_phase(Phase::Failed(err.to_string()));
                return Err(err.into());
            }
        };

        self.finalize(session, &old_map, &full_text)
    }

    /// Continue a stopped revision from the saved partial output. The
    /// continuation prompt restates the original request so the model
    /// knows what it was doing.
    pub async fn resume(&mut self, session: &mut Session) -> Result<RevisionOutcome, RevisionError> {
        if self.phase.is_busy() {
            return Err(RevisionError::Busy);
        }
        if !self.can_resume() {
            return Err(RevisionError::NothingToResume);
        }
        let old_map = self
            .saved_old_map
            .clone()
            .or_else(|| session.course_map.clone())
            .ok_or(RevisionError::NoCourseMap)?;
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
        self.set_phase(Phase::Generating);
        emit(&self.progress, ProgressEvent::Detail("Resuming revision...".into()));

        let system = prompts::revision_system()?;
        let continuation = prompts::build_revision_continuation(&self.saved_message, &self.saved_text)?;
        let request = build_request(&self.settings, &system, &[ChatMessage::user(&continuation)]);

        let streamed = self
            .stream_with_preview(&request, self.saved_text.clone(), &old_map)
            .await;
        let full_text = match streamed {
            Ok(text) => text,
            Err(StreamError::Aborted) => return Ok(self.enter_stopped(session)),
            Err(err) => {
                self.clear_saved();
                self.set_phase(Phase::Failed(err.to_string()));
                return Err(err.into());
            }
        };

        self.finalize(session, &old_map, &full_text)
    }

    pub fn reset(&mut self) {
        self.stop();
        self.clear_saved();
        self.phase = Phase::Idle;
    }

    fn clear_saved(&mut self) {
        self.saved_text.clear();
        self.saved_message.clear();
        self.saved_old_map = None;
    }

    fn enter_stopped(&mut self, session: &mut Session) -> RevisionOutcome {
        if let Some(partial) = reconcile_course_map(&self.saved_text) {
            session.course_map = Some(partial);
        }
        self.set_phase(Phase::Stopped);
        RevisionOutcome::Stopped
    }

    /// Interpret the final response: chat reply, then patches, then a
    /// whole replacement map.
    fn finalize(
        &mut self,
        session: &mut Session,
        old_map: &CourseMap,
        full_text: &str,
    ) -> Result<RevisionOutcome, RevisionError> {
        if let Some(reply) = reconcile_chat_reply(full_text) {
            self.clear_saved();
            self.set_phase(Phase::Done);
            emit(&self.progress, ProgressEvent::Percent(100));
            return Ok(RevisionOutcome::ChatReply(reply));
        }

        if let Some(patches) = reconcile_patches(full_text) {
            let outcome = apply_patches(old_map, &patches);
            for skip in &outcome.skipped {
                emit(
                    &self.progress,
                    ProgressEvent::Warning(format!(
                        "Ignored revision patch {}: {}",
                        skip.index + 1,
                        skip.reason
                    )),
                );
            }
            let applied = patches.len() - outcome.skipped.len();
            session.course_map = Some(outcome.map.clone());
            session.history.push(outcome.map, "Revision");
            session.user_edits.clear();
            self.clear_saved();
            self.set_phase(Phase::Done);
            emit(&self.progress, ProgressEvent::Percent(100));
            return Ok(RevisionOutcome::Applied { changes: applied });
        }

        let Some(map) = reconcile_course_map(full_text) else {
            self.clear_saved();
            self.set_phase(Phase::Failed("invalid revision response from AI".into()));
            return Err(RevisionError::InvalidResponse);
        };
        let changes = map.lessons.len();
        session.course_map = Some(map.clone());
        session.history.push(map, "Revision");
        session.user_edits.clear();
        self.clear_saved();
        self.set_phase(Phase::Done);
        emit(&self.progress, ProgressEvent::Percent(100));
        Ok(RevisionOutcome::Applied { changes })
    }

    async fn stream_with_preview(
        &mut self,
        request: &ProviderRequest,
        existing_text: String,
        old_map: &CourseMap,
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
            preview_revision(text, old_map, &progress);
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
}

/// Live preview during a revision stream. Patch batches are re-applied
/// from scratch against the pre-revision snapshot on every update.
fn preview_revision(
    text: &str,
    old_map: &CourseMap,
    progress: &Option<UnboundedSender<ProgressEvent>>,
) {
    if let Some(patches) = reconcile_patches(text) {
        let n = patches.len();
        let outcome = apply_patches(old_map, &patches);
        emit(progress, ProgressEvent::Preview(outcome.map));
        emit(
            progress,
            ProgressEvent::Detail(format!("Applying {n} change{}...", if n == 1 { "" } else { "s" })),
        );
        emit(progress, ProgressEvent::Percent(estimate_percent(text.len(), REVISION_FLOOR_CHARS)));
        return;
    }
    if let Some(map) = reconcile_course_map(text) {
        let lesson_num = map.lessons.len();
        let detail = match map.lessons.last().and_then(|l| l.sections.last()) {
            Some(section) => {
                let last_key = section
                    .fields
                    .iter()
                    .filter(|(_, v)| !v.is_null())
                    .map(|(k, _)| k.clone())
                    .next_back();
                match last_key {
                    Some(key) => format!("Revising Lesson {lesson_num} {}...", humanize_key(&key)),
                    None => format!("Revising Lesson {lesson_num}..."),
                }
            }
            None => format!("Revising Lesson {lesson_num}..."),
        };
        emit(progress, ProgressEvent::Detail(detail));
        emit(progress, ProgressEvent::Percent(estimate_percent(text.len(), 8000)));
        emit(progress, ProgressEvent::Preview(map));
    }
}
