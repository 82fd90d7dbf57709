//! Stage timing for debug logs.

use std::time::{Duration, Instant};

/// Logs the time spent in each stage of a request pipeline.
///
/// Does nothing unless enabled; enabled timers log at `debug` level.
#[derive(Debug)]
pub struct StageTimer {
    label: String,
    enabled: bool,
    started: Instant,
    last: Instant,
}

impl StageTimer {
    pub fn start(label: impl Into<String>, enabled: bool) -> Self {
        let now = Instant::now();
        Self {
            label: label.into(),
            enabled,
            started: now,
            last: now,
        }
    }

    /// Log the time since the previous stage (or since start).
    pub fn stage(&mut self, name: &str) {
        let now = Instant::now();
        if self.enabled {
            tracing::debug!(
                "{} {} in {}s",
                self.label,
                name,
                format_seconds(now - self.last)
            );
        }
        self.last = now;
    }

    /// Log the total time.
    pub fn finish(self) {
        if self.enabled {
            tracing::debug!(
                "{} done in {}s",
                self.label,
                format_seconds(self.started.elapsed())
            );
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Seconds with millisecond precision, e.g. `0.042`.
pub fn format_seconds(duration: Duration) -> String {
    format!("{:.3}", duration.as_secs_f64())
}
