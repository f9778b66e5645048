use std::time::Duration;

/// Retries after a failed attempt, on top of the initial try.
pub const MAX_RETRIES: u32 = 3;

/// Exponential backoff before retry `attempt` (1-based): 1s, 2s, 4s,
/// capped at 8s.
pub fn backoff_delay(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(10);
    Duration::from_millis((1000u64 << exp).min(8000))
}
