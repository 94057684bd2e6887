//! Structured progress reporting for index builds.
//!
//! The builder emits one event when it enters each phase and further events
//! while fetching, transforming and embedding, so callers can render progress
//! without parsing logs.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Phases of an incremental build, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildPhase {
    LoadCurrent,
    DetermineWatermark,
    FetchDelta,
    Transform,
    Merge,
    Validate,
    WriteVersion,
    Publish,
    Done,
    Failed,
}

impl BuildPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildPhase::LoadCurrent => "load_current",
            BuildPhase::DetermineWatermark => "determine_watermark",
            BuildPhase::FetchDelta => "fetch_delta",
            BuildPhase::Transform => "transform",
            BuildPhase::Merge => "merge",
            BuildPhase::Validate => "validate",
            BuildPhase::WriteVersion => "write_version",
            BuildPhase::Publish => "publish",
            BuildPhase::Done => "done",
            BuildPhase::Failed => "failed",
        }
    }
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress event emitted during a build.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub phase: BuildPhase,

    /// Current progress (documents transformed, fragments embedded, ...)
    pub current: u64,

    /// Total expected work (if known)
    pub total: Option<u64>,

    /// Percentage complete (0.0 - 100.0)
    pub percentage: Option<f64>,

    pub message: String,

    /// Seconds since the reporter was created
    pub elapsed_secs: Option<f64>,
}

impl ProgressEvent {
    pub fn new(phase: BuildPhase, current: u64, total: Option<u64>, message: impl Into<String>) -> Self {
        let percentage = total.map(|t| if t > 0 { (current as f64 / t as f64) * 100.0 } else { 0.0 });

        Self {
            phase,
            current,
            total,
            percentage,
            message: message.into(),
            elapsed_secs: None,
        }
    }

    pub fn with_elapsed(mut self, elapsed_secs: f64) -> Self {
        self.elapsed_secs = Some(elapsed_secs);
        self
    }

    /// Format as a simple user-facing line.
    pub fn format_simple(&self) -> String {
        let progress = if let Some(total) = self.total {
            format!("{}/{}", self.current, total)
        } else {
            format!("{}", self.current)
        };

        let pct = if let Some(p) = self.percentage {
            format!(" ({:.0}%)", p)
        } else {
            String::new()
        };

        format!("[{}] {}{} - {}", self.phase, progress, pct, self.message)
    }
}

/// Callback for progress events.
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Progress reporter that emits events through a callback.
#[derive(Clone)]
pub struct ProgressReporter {
    callback: Option<ProgressCallback>,
    start_time: Arc<Instant>,
}

impl ProgressReporter {
    pub fn new(callback: ProgressCallback) -> Self {
        Self {
            callback: Some(callback),
            start_time: Arc::new(Instant::now()),
        }
    }

    /// Reporter that emits nothing.
    pub fn noop() -> Self {
        Self {
            callback: None,
            start_time: Arc::new(Instant::now()),
        }
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(callback) = &self.callback {
            let elapsed = self.start_time.elapsed().as_secs_f64();
            let event_with_time = event.with_elapsed(elapsed);

            tracing::debug!(
                phase = %event_with_time.phase,
                current = event_with_time.current,
                total = ?event_with_time.total,
                message = %event_with_time.message,
                elapsed_secs = elapsed,
                "Progress event"
            );

            callback(event_with_time);
        }
    }

    /// Entering `phase`.
    pub fn phase(&self, phase: BuildPhase, message: impl Into<String>) {
        self.emit(ProgressEvent::new(phase, 0, None, message));
    }

    pub fn fetch(&self, fetched: u64, limit: Option<u64>) {
        self.emit(ProgressEvent::new(
            BuildPhase::FetchDelta,
            fetched,
            limit,
            format!("{} documents fetched", fetched),
        ));
    }

    pub fn transform(&self, current: u64, total: u64, fragments: u64) {
        self.emit(ProgressEvent::new(
            BuildPhase::Transform,
            current,
            Some(total),
            format!("{} fragments prepared", fragments),
        ));
    }

    pub fn embed(&self, current: u64, total: u64, model: &str) {
        self.emit(ProgressEvent::new(
            BuildPhase::Transform,
            current,
            Some(total),
            format!("embedded with model={}", model),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_progress_event_format() {
        let event = ProgressEvent::new(BuildPhase::Transform, 5, Some(10), "50 fragments prepared");
        let formatted = event.format_simple();
        assert!(formatted.contains("[transform]"));
        assert!(formatted.contains("5/10"));
        assert!(formatted.contains("50%"));
    }

    #[test]
    fn test_progress_reporter_emit() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = events.clone();

        let reporter = ProgressReporter::new(Arc::new(move |event| {
            events_clone.lock().unwrap().push(event);
        }));

        reporter.phase(BuildPhase::LoadCurrent, "loading");
        reporter.fetch(3, Some(10));

        let captured = events.lock().unwrap();
        assert_eq!(captured.len(), 2);
        assert_eq!(captured[0].phase, BuildPhase::LoadCurrent);
        assert_eq!(captured[1].phase, BuildPhase::FetchDelta);
        assert_eq!(captured[1].current, 3);
        assert!(captured[1].elapsed_secs.is_some());
    }

    #[test]
    fn test_noop_reporter() {
        let reporter = ProgressReporter::noop();
        reporter.phase(BuildPhase::Done, "finished");
    }

    #[test]
    fn test_phase_names() {
        assert_eq!(BuildPhase::WriteVersion.to_string(), "write_version");
        assert_eq!(
            serde_json::to_string(&BuildPhase::DetermineWatermark).unwrap(),
            "\"determine_watermark\""
        );
    }
}
