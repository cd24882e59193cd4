//! Ingestion progress reporting.
//!
//! The orchestrator reports a monotonically non-decreasing fraction in
//! `[0, 1]` plus a human-readable phase description as a run advances.
//! Progress is emitted on **stderr** so stdout remains parseable for
//! scripts.

use std::io::Write;

/// Receives progress updates from an ingestion run.
pub trait ProgressReporter: Send + Sync {
    /// Called with the overall completion fraction and current phase.
    fn report(&self, fraction: f64, phase: &str);
}

/// Human-friendly progress on stderr: "ingest  42%  embedding chunks".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, fraction: f64, phase: &str) {
        let line = format!("ingest  {:>3.0}%  {}\n", fraction * 100.0, phase);
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, fraction: f64, phase: &str) {
        let obj = serde_json::json!({
            "event": "progress",
            "fraction": fraction,
            "phase": phase,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _fraction: f64, _phase: &str) {}
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Build a reporter for this mode. Caller passes it to the orchestrator.
    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
