use std::io::Write;

/// Abstraction over user-facing progress output.
///
/// Orchestration components receive a `Reporter` at construction instead of
/// printing directly, so the binary can render to the terminal while tests
/// and embedding callers stay silent. Diagnostic logging goes through
/// `tracing`; this is only for what the operator should read.
pub trait Reporter: Send + Sync {
    /// Informational status message (e.g., "Installing dependencies...")
    fn status(&self, message: &str);

    /// Success message (e.g., "api started")
    fn success(&self, message: &str);

    /// Warning message (e.g., "web: port 3000 already in use")
    fn warning(&self, message: &str);

    /// Error message (e.g., "Install failed for api")
    fn error(&self, message: &str);

    /// Inline progress (no trailing newline). Call `finish_progress` after.
    fn progress(&self, message: &str);

    /// Finish an inline progress line with a result.
    fn finish_progress(&self, result: &str);

    /// A bulleted remediation hint.
    fn suggestion(&self, message: &str) {
        self.status(&format!("  → {}", message));
    }
}

/// Standard CLI output: stdout/stderr with ANSI colors.
pub struct CliReporter;

impl Reporter for CliReporter {
    fn status(&self, message: &str) {
        println!("{}", message);
    }

    fn success(&self, message: &str) {
        println!("\x1b[32m{}\x1b[0m", message);
    }

    fn warning(&self, message: &str) {
        eprintln!("\x1b[33m{}\x1b[0m", message);
    }

    fn error(&self, message: &str) {
        eprintln!("\x1b[31m{}\x1b[0m", message);
    }

    fn progress(&self, message: &str) {
        print!("{}", message);
        std::io::stdout().flush().ok();
    }

    fn finish_progress(&self, result: &str) {
        println!("{}", result);
    }
}

/// Suppresses all output.
pub struct QuietReporter;

impl Reporter for QuietReporter {
    fn status(&self, _message: &str) {}
    fn success(&self, _message: &str) {}
    fn warning(&self, _message: &str) {}
    fn error(&self, _message: &str) {}
    fn progress(&self, _message: &str) {}
    fn finish_progress(&self, _result: &str) {}
}
