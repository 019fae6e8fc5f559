use std::io::Write;
use std::time::Duration;

/// The user-facing channel for conversion problems and progress.
pub trait Reporter {
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
    /// A transient progress message, shown for at most `timeout`.
    fn status(&self, message: &str, timeout: Duration);
}

/// Writes `[mdprint] ...` lines to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleReporter;

impl ConsoleReporter {
    fn line(&self, message: &str) {
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "[mdprint] {message}");
    }
}

impl Reporter for ConsoleReporter {
    fn warn(&self, message: &str) {
        tracing::warn!("{message}");
        self.line(&format!("warning: {message}"));
    }

    fn error(&self, message: &str) {
        tracing::error!("{message}");
        self.line(&format!("error: {message}"));
    }

    fn status(&self, message: &str, timeout: Duration) {
        tracing::info!(timeout_ms = timeout.as_millis() as u64, "{message}");
        self.line(message);
    }
}
