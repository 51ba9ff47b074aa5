//! Stdout sinks. Each call writes under the stdout lock so one chunk or
//! status line is never interleaved with output from another session.

use std::io::Write;
use std::sync::Arc;

use kubetrack_core::{DisplaySink, TextSink};

pub struct StdoutText;

impl TextSink for StdoutText {
    fn line(&self, text: &str) {
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "{}", text);
    }
}

pub struct StdoutDisplay;

impl DisplaySink for StdoutDisplay {
    fn output_log_lines(&self, header: &str, lines: &[String]) {
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "==> {} <==", header);
        for line in lines {
            let _ = writeln!(out, "{}", line);
        }
        let _ = out.flush();
    }
}

/// Output targets handed to every session adapter.
#[derive(Clone)]
pub struct Sinks {
    pub text: Arc<dyn TextSink>,
    pub display: Arc<dyn DisplaySink>,
}

impl Sinks {
    pub fn stdout() -> Self { Self { text: Arc::new(StdoutText), display: Arc::new(StdoutDisplay) } }
}
