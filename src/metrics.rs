//! Metrics collection for conversation sessions
//!
//! Tracks connection latency, audio traffic, playback health and error
//! history per session. Used for diagnostics; the CLI prints the summary on
//! exit.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::playback::PlaybackStats;

/// Maximum number of finished sessions to retain in history
const MAX_SESSION_HISTORY: usize = 50;

/// Maximum number of errors to retain in history
const MAX_ERROR_HISTORY: usize = 20;

/// Metrics for a finished session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub session_id: String,
    /// Unix timestamp when the session started (seconds)
    pub started_at: u64,
    /// Time from start to an open connection, if it opened
    pub connect_latency_ms: Option<u64>,
    pub duration_ms: u64,
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub chunks_scheduled: u64,
    pub underruns: u64,
    pub decode_errors: u64,
    /// Seconds of assistant audio scheduled for playback
    pub audio_played_secs: f64,
    pub pairs: u64,
    pub close_reason: String,
}

/// Outbound/playback counters gathered at teardown
#[derive(Debug, Clone, Default)]
pub struct TeardownCounters {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub playback: PlaybackStats,
}

/// Summary statistics across all recorded sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub total_sessions: u64,
    /// Sessions whose connection opened
    pub connected_sessions: u64,
    pub avg_connect_latency_ms: u64,
    pub total_frames_sent: u64,
    pub total_frames_dropped: u64,
    pub total_underruns: u64,
    pub total_pairs: u64,
    pub last_error: Option<ErrorRecord>,
}

/// Record of an error that occurred during operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Unix timestamp when error occurred (seconds)
    pub timestamp: u64,
    /// Category of error (e.g., "connection", "microphone", "playback")
    pub error_type: String,
    pub message: String,
    pub session_id: Option<String>,
}

struct SessionInProgress {
    session_id: Uuid,
    started_at: Instant,
    started_at_unix: u64,
    connect_latency: Option<Duration>,
    decode_errors: u64,
    pairs: u64,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl SessionInProgress {
    fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            started_at: Instant::now(),
            started_at_unix: unix_now(),
            connect_latency: None,
            decode_errors: 0,
            pairs: 0,
        }
    }

    fn to_metrics(&self, close_reason: &str, counters: &TeardownCounters) -> SessionMetrics {
        SessionMetrics {
            session_id: self.session_id.to_string(),
            started_at: self.started_at_unix,
            connect_latency_ms: self.connect_latency.map(|d| d.as_millis() as u64),
            duration_ms: self.started_at.elapsed().as_millis() as u64,
            frames_sent: counters.frames_sent,
            frames_dropped: counters.frames_dropped,
            chunks_scheduled: counters.playback.chunks_scheduled,
            underruns: counters.playback.underruns,
            decode_errors: self.decode_errors + counters.playback.decode_errors,
            audio_played_secs: counters.playback.scheduled_secs,
            pairs: self.pairs,
            close_reason: close_reason.to_string(),
        }
    }
}

/// Collects and stores metrics for conversation sessions
pub struct MetricsCollector {
    /// History of finished sessions (newest first)
    history: VecDeque<SessionMetrics>,
    /// History of errors (newest first)
    errors: VecDeque<ErrorRecord>,
    current: Option<SessionInProgress>,
    total_sessions: u64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            history: VecDeque::with_capacity(MAX_SESSION_HISTORY),
            errors: VecDeque::with_capacity(MAX_ERROR_HISTORY),
            current: None,
            total_sessions: 0,
        }
    }

    /// Start tracking a new session
    ///
    /// A session still in progress is finished as "replaced".
    pub fn start_session(&mut self, session_id: Uuid) {
        if self.current.is_some() {
            self.finish_session("replaced", &TeardownCounters::default());
        }
        log::debug!("Metrics: starting session {}", session_id);
        self.current = Some(SessionInProgress::new(session_id));
        self.total_sessions += 1;
    }

    /// Mark that the connection opened for the current session
    pub fn connected(&mut self) {
        if let Some(ref mut session) = self.current {
            let latency = session.started_at.elapsed();
            session.connect_latency = Some(latency);
            log::info!(
                "Metrics: session {} connected in {:?}",
                session.session_id,
                latency
            );
        }
    }

    pub fn pair_emitted(&mut self) {
        if let Some(ref mut session) = self.current {
            session.pairs += 1;
        }
    }

    pub fn decode_error(&mut self) {
        if let Some(ref mut session) = self.current {
            session.decode_errors += 1;
        }
    }

    /// Close out the current session. No-op when nothing is in progress.
    pub fn finish_session(&mut self, close_reason: &str, counters: &TeardownCounters) {
        if let Some(session) = self.current.take() {
            let metrics = session.to_metrics(close_reason, counters);
            log::info!(
                "Metrics: session {} ended ({}) after {}ms - {} frames sent, {} dropped, {} chunks played, {} underruns, {} pairs",
                metrics.session_id,
                metrics.close_reason,
                metrics.duration_ms,
                metrics.frames_sent,
                metrics.frames_dropped,
                metrics.chunks_scheduled,
                metrics.underruns,
                metrics.pairs
            );
            self.add_to_history(metrics);
        }
    }

    /// Record an error (not necessarily tied to a session)
    pub fn record_error(&mut self, error_type: &str, message: String) {
        let error = ErrorRecord {
            timestamp: unix_now(),
            error_type: error_type.to_string(),
            message,
            session_id: self.current.as_ref().map(|s| s.session_id.to_string()),
        };

        log::debug!("Metrics: recording error - {:?}", error);

        self.errors.push_front(error);
        while self.errors.len() > MAX_ERROR_HISTORY {
            self.errors.pop_back();
        }
    }

    pub fn get_summary(&self) -> MetricsSummary {
        let latencies: Vec<u64> = self
            .history
            .iter()
            .filter_map(|s| s.connect_latency_ms)
            .collect();
        let avg_connect_latency_ms = if latencies.is_empty() {
            0
        } else {
            latencies.iter().sum::<u64>() / latencies.len() as u64
        };

        MetricsSummary {
            total_sessions: self.total_sessions,
            connected_sessions: latencies.len() as u64,
            avg_connect_latency_ms,
            total_frames_sent: self.history.iter().map(|s| s.frames_sent).sum(),
            total_frames_dropped: self.history.iter().map(|s| s.frames_dropped).sum(),
            total_underruns: self.history.iter().map(|s| s.underruns).sum(),
            total_pairs: self.history.iter().map(|s| s.pairs).sum(),
            last_error: self.errors.front().cloned(),
        }
    }

    /// Finished sessions, newest first
    pub fn get_history(&self) -> Vec<SessionMetrics> {
        self.history.iter().cloned().collect()
    }

    /// Errors, newest first
    pub fn get_errors(&self) -> Vec<ErrorRecord> {
        self.errors.iter().cloned().collect()
    }

    pub fn is_active_session(&self, session_id: Uuid) -> bool {
        self.current
            .as_ref()
            .map(|s| s.session_id == session_id)
            .unwrap_or(false)
    }

    fn add_to_history(&mut self, metrics: SessionMetrics) {
        self.history.push_front(metrics);
        while self.history.len() > MAX_SESSION_HISTORY {
            self.history.pop_back();
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "sessions: {} ({} connected, avg connect {}ms)",
            self.total_sessions, self.connected_sessions, self.avg_connect_latency_ms
        )?;
        writeln!(
            f,
            "audio frames: {} sent, {} dropped; playback underruns: {}",
            self.total_frames_sent, self.total_frames_dropped, self.total_underruns
        )?;
        write!(f, "prompt/response pairs: {}", self.total_pairs)?;
        if let Some(ref err) = self.last_error {
            write!(f, "\nlast error ({}): {}", err.error_type, err.message)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters(sent: u64, dropped: u64, underruns: u64) -> TeardownCounters {
        TeardownCounters {
            frames_sent: sent,
            frames_dropped: dropped,
            playback: PlaybackStats {
                chunks_scheduled: 5,
                underruns,
                decode_errors: 0,
                scheduled_secs: 0.5,
            },
        }
    }

    #[test]
    fn test_new_collector_is_empty() {
        let collector = MetricsCollector::new();
        let summary = collector.get_summary();

        assert_eq!(summary.total_sessions, 0);
        assert_eq!(summary.connected_sessions, 0);
        assert!(collector.get_history().is_empty());
        assert!(collector.get_errors().is_empty());
    }

    #[test]
    fn test_session_tracking() {
        let mut collector = MetricsCollector::new();
        let id = Uuid::new_v4();

        collector.start_session(id);
        assert!(collector.is_active_session(id));
        collector.connected();
        collector.pair_emitted();
        collector.pair_emitted();
        collector.decode_error();
        collector.finish_session("stopped", &counters(100, 3, 1));

        assert!(!collector.is_active_session(id));
        let history = collector.get_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].session_id, id.to_string());
        assert_eq!(history[0].frames_sent, 100);
        assert_eq!(history[0].frames_dropped, 3);
        assert_eq!(history[0].pairs, 2);
        assert_eq!(history[0].decode_errors, 1);
        assert_eq!(history[0].close_reason, "stopped");
        assert!(history[0].connect_latency_ms.is_some());

        let summary = collector.get_summary();
        assert_eq!(summary.total_sessions, 1);
        assert_eq!(summary.connected_sessions, 1);
        assert_eq!(summary.total_frames_sent, 100);
        assert_eq!(summary.total_underruns, 1);
        assert_eq!(summary.total_pairs, 2);
    }

    #[test]
    fn test_finish_without_session_is_noop() {
        let mut collector = MetricsCollector::new();
        collector.finish_session("stopped", &TeardownCounters::default());
        collector.finish_session("stopped", &TeardownCounters::default());
        assert!(collector.get_history().is_empty());
    }

    #[test]
    fn test_restart_finishes_previous_as_replaced() {
        let mut collector = MetricsCollector::new();
        collector.start_session(Uuid::new_v4());
        collector.start_session(Uuid::new_v4());

        let history = collector.get_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].close_reason, "replaced");
        assert_eq!(collector.get_summary().total_sessions, 2);
    }

    #[test]
    fn test_failed_connection_has_no_latency() {
        let mut collector = MetricsCollector::new();
        collector.start_session(Uuid::new_v4());
        collector.finish_session("connection_failed", &TeardownCounters::default());

        let summary = collector.get_summary();
        assert_eq!(summary.connected_sessions, 0);
        assert_eq!(summary.avg_connect_latency_ms, 0);
    }

    #[test]
    fn test_error_history() {
        let mut collector = MetricsCollector::new();
        let id = Uuid::new_v4();
        collector.start_session(id);
        collector.record_error("connection", "refused".to_string());

        let errors = collector.get_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_type, "connection");
        assert_eq!(errors[0].session_id, Some(id.to_string()));
        assert_eq!(
            collector.get_summary().last_error.map(|e| e.message),
            Some("refused".to_string())
        );
    }

    #[test]
    fn test_error_history_limit() {
        let mut collector = MetricsCollector::new();
        for i in 0..30 {
            collector.record_error("test", format!("error {}", i));
        }

        let errors = collector.get_errors();
        assert_eq!(errors.len(), MAX_ERROR_HISTORY);
        assert_eq!(errors[0].message, "error 29");
    }

    #[test]
    fn test_session_history_limit() {
        let mut collector = MetricsCollector::new();
        for _ in 0..60 {
            collector.start_session(Uuid::new_v4());
            collector.finish_session("stopped", &TeardownCounters::default());
        }
        assert_eq!(collector.get_history().len(), MAX_SESSION_HISTORY);
        assert_eq!(collector.get_summary().total_sessions, 60);
    }

    #[test]
    fn test_summary_display() {
        let mut collector = MetricsCollector::new();
        collector.start_session(Uuid::new_v4());
        collector.record_error("microphone", "denied".to_string());
        collector.finish_session("stopped", &counters(10, 0, 0));

        let text = collector.get_summary().to_string();
        assert!(text.contains("sessions: 1"));
        assert!(text.contains("10 sent"));
        assert!(text.contains("denied"));
    }
}
