//! Output sinks injected into session adapters.

/// Receives log chunks for presentation. Implementations must append the
/// lines of one call contiguously.
pub trait DisplaySink: Send + Sync {
    fn output_log_lines(&self, header: &str, lines: &[String]);
}

/// Receives human-readable status lines.
pub trait TextSink: Send + Sync {
    fn line(&self, text: &str);
}
