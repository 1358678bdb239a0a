//! Case progress reporting.
//!
//! Reports observable pipeline progress so users see which stage a case is
//! in and how far along it is. Progress is emitted on **stderr** so stdout
//! remains parseable for scripts; the same events are persisted as the
//! case's Progress artifact by the orchestrator (single writer).

use std::io::Write;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

/// A single progress event for a case.
#[derive(Clone, Debug)]
pub struct ProgressEvent {
    pub case_id: String,
    pub percent: u8,
    pub stage: String,
}

/// The persisted form of the latest progress event, served by `chs status`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub percent: u8,
    pub stage: String,
}

/// Reports case progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the pipeline orchestrator.
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "case 3f2a…  triage  40%".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = format!(
            "case {}  {}  {}%\n",
            short_id(&event.case_id),
            event.stage,
            event.percent
        );
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = serde_json::json!({
            "event": "progress",
            "case_id": event.case_id,
            "stage": event.stage,
            "percent": event.percent,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Wrapper enforcing that reported percentages never go backwards for a
/// case, whatever the inner stages emit. Regressive events are dropped.
pub struct Monotonic<R> {
    inner: R,
    high_water: AtomicU8,
}

impl<R> Monotonic<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            high_water: AtomicU8::new(0),
        }
    }
}

impl<R: ProgressReporter> ProgressReporter for Monotonic<R> {
    fn report(&self, event: ProgressEvent) {
        let prev = self.high_water.fetch_max(event.percent, Ordering::SeqCst);
        if event.percent >= prev {
            self.inner.report(event);
        }
    }
}

impl ProgressReporter for Box<dyn ProgressReporter> {
    fn report(&self, event: ProgressEvent) {
        self.as_ref().report(event)
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
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

    /// Build a reporter for this mode. Caller passes it to the pipeline.
    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Capture(Mutex<Vec<u8>>);

    impl ProgressReporter for &Capture {
        fn report(&self, event: ProgressEvent) {
            self.0.lock().unwrap().push(event.percent);
        }
    }

    fn event(percent: u8) -> ProgressEvent {
        ProgressEvent {
            case_id: "case-1".into(),
            percent,
            stage: "stage".into(),
        }
    }

    #[test]
    fn monotonic_drops_regressions() {
        let capture = Capture(Mutex::new(Vec::new()));
        let reporter = Monotonic::new(&capture);
        for p in [5, 10, 40, 20, 40, 70, 100] {
            reporter.report(event(p));
        }
        assert_eq!(*capture.0.lock().unwrap(), vec![5, 10, 40, 40, 70, 100]);
    }

    #[test]
    fn short_id_tolerates_short_strings() {
        assert_eq!(short_id("abc"), "abc");
        assert_eq!(short_id("0123456789"), "01234567");
    }
}
