//! Per-request phase metrics.

use std::time::Duration;

use edge_core::{LifecyclePhase, RequestId, TimingContext};
use serde::{Deserialize, Serialize};

/// Duration of one lifecycle phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseMetrics {
    /// Phase name (`normalize`, `rules`, `middleware`, `match`, ...).
    pub name: String,
    /// Time spent since the previous phase (microseconds).
    pub duration_us: u64,
}

/// Metrics for a single request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMetrics {
    /// Request ID for correlation.
    pub request_id: String,
    /// Matched route pattern.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    /// Phases in the order they finished.
    pub phases: Vec<PhaseMetrics>,
    /// Time until the response head and shell were ready (microseconds).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_to_shell_us: Option<u64>,
    /// Total time spent before the response was handed back (microseconds).
    pub total_duration_us: u64,
    /// Cache directive sent with the response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<String>,
    /// Control signal that decided the response, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
    /// HTTP status code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

/// Collector for request metrics.
#[derive(Debug)]
pub struct MetricsCollector {
    request_id: RequestId,
    route: Option<String>,
    timing: TimingContext,
    cache_control: Option<String>,
    signal: Option<String>,
}

impl MetricsCollector {
    /// Create a new metrics collector.
    pub fn new(request_id: RequestId) -> Self {
        Self {
            request_id,
            route: None,
            timing: TimingContext::new(),
            cache_control: None,
            signal: None,
        }
    }

    /// Set route pattern.
    pub fn set_route(&mut self, route: impl Into<String>) {
        self.route = Some(route.into());
    }

    /// Record the end of a phase.
    pub fn record_phase(&mut self, phase: &LifecyclePhase) {
        self.timing.mark_phase(phase);
    }

    /// Record the cache directive.
    pub fn record_cache(&mut self, cache_control: impl Into<String>) {
        self.cache_control = Some(cache_control.into());
    }

    /// Record the control signal that shaped the response.
    pub fn record_signal(&mut self, signal: impl Into<String>) {
        self.signal = Some(signal.into());
    }

    /// Timing marks recorded so far.
    pub fn timing(&self) -> &TimingContext {
        &self.timing
    }

    /// Get total elapsed time.
    pub fn elapsed(&self) -> Duration {
        self.timing.elapsed()
    }

    /// Finalize and return the metrics.
    pub fn finalize(self, status_code: Option<u16>) -> RequestMetrics {
        let phases = self
            .timing
            .phase_durations()
            .into_iter()
            .map(|(name, duration)| PhaseMetrics {
                name,
                duration_us: duration.as_micros() as u64,
            })
            .collect();

        RequestMetrics {
            request_id: self.request_id.to_string(),
            route: self.route,
            phases,
            time_to_shell_us: self.timing.time_to_shell().map(|d| d.as_micros() as u64),
            total_duration_us: self.timing.elapsed().as_micros() as u64,
            cache_control: self.cache_control,
            signal: self.signal,
            status_code,
        }
    }
}

impl RequestMetrics {
    /// Format as JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Duration of a named phase.
    pub fn phase(&self, name: &str) -> Option<u64> {
        self.phases
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.duration_us)
    }

    /// Format as human-readable summary.
    pub fn to_summary(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!(
            "Request: {} [{}] {}",
            self.request_id,
            self.status_code.map_or("-".to_string(), |s| s.to_string()),
            self.route.as_deref().unwrap_or("<unmatched>")
        ));

        for phase in &self.phases {
            lines.push(format!(
                "  {}: {}us ({:.2}ms)",
                phase.name,
                phase.duration_us,
                phase.duration_us as f64 / 1000.0
            ));
        }

        if let Some(tts) = self.time_to_shell_us {
            lines.push(format!("  Time to shell: {}us ({:.2}ms)", tts, tts as f64 / 1000.0));
        }
        if let Some(cache) = &self.cache_control {
            lines.push(format!("  Cache-Control: {}", cache));
        }
        if let Some(signal) = &self.signal {
            lines.push(format!("  Signal: {}", signal));
        }

        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phases_recorded_in_order() {
        let mut collector = MetricsCollector::new(RequestId::from_string("req-1"));
        collector.set_route("/blog/:slug");
        collector.record_phase(&LifecyclePhase::Normalized);
        collector.record_phase(&LifecyclePhase::Matched);
        collector.record_phase(&LifecyclePhase::ShellReady);
        collector.record_cache("s-maxage=60, stale-while-revalidate");

        let metrics = collector.finalize(Some(200));
        let names: Vec<&str> = metrics.phases.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["normalize", "match", "shell"]);
        assert!(metrics.time_to_shell_us.is_some());
        assert!(metrics.phase("match").is_some());
        assert!(metrics.to_summary().contains("Cache-Control: s-maxage=60"));
    }

    #[test]
    fn test_metrics_json_omits_empty_fields() {
        let metrics = MetricsCollector::new(RequestId::from_string("req-2")).finalize(None);
        let json = metrics.to_json();
        assert!(!json.contains("route"));
        assert!(!json.contains("signal"));
        assert!(json.contains("\"request_id\":\"req-2\""));
    }
}
