//! Request lifecycle tracking.

use std::fmt;
use std::time::{Duration, Instant};

/// Lifecycle phases of a request through the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecyclePhase {
    /// Request received, processing started.
    Start,
    /// Path decoded and normalized.
    Normalized,
    /// Redirect and before-files rewrite rules evaluated.
    Rules,
    /// Middleware gate finished.
    Middleware,
    /// Route matched against the table.
    Matched,
    /// Layout pre-render pass finished.
    Prerender,
    /// Shell of the response is ready to flush.
    ShellReady,
    /// Request completed successfully.
    Completion,
    /// An error occurred.
    Error(String),
}

impl LifecyclePhase {
    /// Stable name used as a timing key.
    pub fn name(&self) -> &str {
        match self {
            Self::Start => "start",
            Self::Normalized => "normalize",
            Self::Rules => "rules",
            Self::Middleware => "middleware",
            Self::Matched => "match",
            Self::Prerender => "prerender",
            Self::ShellReady => "shell",
            Self::Completion => "complete",
            Self::Error(_) => "error",
        }
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(message) => write!(f, "error: {}", message),
            other => f.write_str(other.name()),
        }
    }
}

/// Timing context for observability.
///
/// Marks are kept in the order they were recorded so phase durations can be
/// derived from consecutive marks.
#[derive(Debug, Clone)]
pub struct TimingContext {
    start: Instant,
    marks: Vec<(String, Instant)>,
}

impl TimingContext {
    /// Create a new timing context.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            marks: Vec::new(),
        }
    }

    /// Record a timing mark.
    pub fn mark(&mut self, name: &str) {
        self.marks.push((name.to_string(), Instant::now()));
    }

    /// Record the end of a lifecycle phase.
    pub fn mark_phase(&mut self, phase: &LifecyclePhase) {
        self.mark(phase.name());
    }

    /// Get elapsed time since start.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Time from start to the first mark with this name.
    pub fn since_start(&self, name: &str) -> Option<Duration> {
        self.marks
            .iter()
            .find(|(mark, _)| mark == name)
            .map(|(_, t)| t.duration_since(self.start))
    }

    /// Get time until the shell was ready.
    pub fn time_to_shell(&self) -> Option<Duration> {
        self.since_start(LifecyclePhase::ShellReady.name())
    }

    /// Duration of each phase, measured from the previous mark.
    pub fn phase_durations(&self) -> Vec<(String, Duration)> {
        let mut previous = self.start;
        self.marks
            .iter()
            .map(|(name, at)| {
                let duration = at.duration_since(previous);
                previous = *at;
                (name.clone(), duration)
            })
            .collect()
    }
}

impl Default for TimingContext {
    fn default() -> Self {
        Self::new()
    }
}
