use crate::domain::CourseMap;
use tokio::sync::mpsc::UnboundedSender;

/// Lifecycle phase of a generation or revision operation. A single tagged
/// value, so "done but still streaming" style contradictions are
/// unrepresentable.
#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    Idle,
    Parsing,
    Generating,
    Examining,
    Stopped,
    Done,
    Failed(String),
}

impl Phase {
    /// A stream is (or may be) in flight; new operations must not start.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Parsing | Self::Generating | Self::Examining)
    }
}

/// Progress reported to the consumer while an operation streams.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Phase(Phase),
    /// Best-effort live document reconciled from the partial stream.
    Preview(CourseMap),
    Detail(String),
    /// Heuristic completion percentage, capped at 90 until finalize.
    Percent(u8),
    Retry { attempt: u32, max: u32, delay_ms: u64 },
    Warning(String),
    /// Human-readable change list from the examine pass or a revision.
    Changes(Vec<String>),
    ExamineSkipped { reason: String },
}

pub(crate) fn emit(tx: &Option<UnboundedSender<ProgressEvent>>, event: ProgressEvent) {
    if let Some(tx) = tx {
        let _ = tx.send(event);
    }
}

/// Progress percentage estimated from cumulative character count against a
/// heuristic expected total; never reports more than 90 mid-stream.
pub(crate) fn estimate_percent(received: usize, floor: usize) -> u8 {
    let est_total = (received as f64 * 1.3).max(floor as f64);
    ((received as f64 / est_total) * 90.0).round().min(90.0) as u8
}
