//! Logger collaborator contract
//!
//! Three severities, a message and flat string metadata. The engine logs
//! attempt lifecycle, commits, checkpoint traffic and retry backoffs through
//! this seam; hosts plug in their own sink or keep the default
//! [`TracingLogger`], which forwards to the `tracing` macros.

/// Key/value metadata attached to a log line
pub type LogFields<'a> = &'a [(&'a str, String)];

/// Three-severity logging contract
pub trait Logger: Send + Sync {
    fn debug(&self, message: &str, fields: LogFields<'_>);
    fn info(&self, message: &str, fields: LogFields<'_>);
    fn warn(&self, message: &str, fields: LogFields<'_>);
}

/// Default logger forwarding to `tracing`
#[derive(Debug, Clone, Default)]
pub struct TracingLogger;

impl TracingLogger {
    pub fn new() -> Self {
        Self
    }

    fn render(fields: LogFields<'_>) -> String {
        fields
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Logger for TracingLogger {
    fn debug(&self, message: &str, fields: LogFields<'_>) {
        tracing::debug!(fields = %Self::render(fields), "{}", message);
    }

    fn info(&self, message: &str, fields: LogFields<'_>) {
        tracing::info!(fields = %Self::render(fields), "{}", message);
    }

    fn warn(&self, message: &str, fields: LogFields<'_>) {
        tracing::warn!(fields = %Self::render(fields), "{}", message);
    }
}

/// Discards everything; useful in tests
#[derive(Debug, Clone, Default)]
pub struct NullLogger;

impl NullLogger {
    pub fn new() -> Self {
        Self
    }
}

impl Logger for NullLogger {
    fn debug(&self, _message: &str, _fields: LogFields<'_>) {}
    fn info(&self, _message: &str, _fields: LogFields<'_>) {}
    fn warn(&self, _message: &str, _fields: LogFields<'_>) {}
}
