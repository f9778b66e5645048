//! Completion notification seam. Long generations finish while the user
//! is elsewhere; the notifier is how they find out.

/// Fired once when a generation or revision fully completes.
pub trait Notifier: Send + Sync {
    fn done(&self, message: &str);
}

/// Default notifier: an info-level log line.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn done(&self, message: &str) {
        log::info!("✅ {message}");
    }
}

/// Drops notifications; for tests and batch runs.
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn done(&self, _message: &str) {}
}
