//! Alerting: typed alert kinds, a broadcast bus, and listener isolation.
//!
//! The bus keeps an explicit observer list. A listener that returns an
//! error is logged and skipped; it never prevents delivery to the
//! remaining listeners or aborts the caller's tick.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::errors::AlertSinkError;

/// Severity level of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "INFO",
            AlertSeverity::Warning => "WARN",
            AlertSeverity::Critical => "CRIT",
        }
    }
}

/// Kind of alert, used for categorization and deduplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertKind {
    /// LTV crossed the configured alert threshold
    LtvWarning,
    /// Gradual auto-deleveraging is active for the position
    GadTriggered,
    /// An automatic corrective repayment is being submitted
    AutoRepay,
    /// An autonomous borrow was rejected by the daily budget
    DailyLimitReached,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::LtvWarning => "ltv_warning",
            AlertKind::GadTriggered => "gad_triggered",
            AlertKind::AutoRepay => "auto_repay",
            AlertKind::DailyLimitReached => "daily_limit_reached",
        }
    }
}

/// An alert instance delivered to every registered sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: u64,
    /// Unix timestamp in seconds
    pub timestamp: i64,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub message: String,
    /// Metric value that triggered the alert, if any
    pub value: Option<u64>,
    /// Threshold that was breached, if any
    pub threshold: Option<u64>,
}

/// Receives alerts from the bus.
///
/// Implementations must be cheap and non-blocking; delivery happens on the
/// emitting task. Returning an error isolates this sink only.
pub trait AlertSink: Send + Sync {
    fn deliver(&self, alert: &Alert) -> Result<(), AlertSinkError>;
}

/// Sink that logs alerts through `tracing` at a level matching severity.
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn deliver(&self, alert: &Alert) -> Result<(), AlertSinkError> {
        match alert.severity {
            AlertSeverity::Info => tracing::info!(
                kind = alert.kind.as_str(),
                value = ?alert.value,
                "{}",
                alert.message
            ),
            AlertSeverity::Warning => tracing::warn!(
                kind = alert.kind.as_str(),
                value = ?alert.value,
                threshold = ?alert.threshold,
                "{}",
                alert.message
            ),
            AlertSeverity::Critical => tracing::error!(
                kind = alert.kind.as_str(),
                value = ?alert.value,
                threshold = ?alert.threshold,
                "{}",
                alert.message
            ),
        }
        Ok(())
    }
}

/// Broadcast bus with per-kind deduplication and a bounded history ring.
pub struct AlertBus {
    sinks: RwLock<Vec<Arc<dyn AlertSink>>>,
    history: RwLock<VecDeque<Alert>>,
    last_emit: RwLock<HashMap<AlertKind, i64>>,
    next_id: AtomicU64,
    max_history: usize,
    /// 0 disables deduplication
    dedup_window_secs: i64,
}

impl AlertBus {
    pub fn new(max_history: usize) -> Self {
        Self {
            sinks: RwLock::new(Vec::new()),
            history: RwLock::new(VecDeque::with_capacity(max_history)),
            last_emit: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            max_history,
            dedup_window_secs: 0,
        }
    }

    /// Suppress repeat alerts of the same kind within `secs`.
    pub fn with_dedup_window(mut self, secs: i64) -> Self {
        self.dedup_window_secs = secs;
        self
    }

    /// Register a listener. Listeners are never removed implicitly.
    pub fn subscribe(&self, sink: Arc<dyn AlertSink>) {
        self.sinks.write().unwrap().push(sink);
    }

    /// Build and deliver an alert to every sink.
    ///
    /// Returns `false` when the alert was suppressed by the dedup window.
    pub fn publish(
        &self,
        now: i64,
        kind: AlertKind,
        severity: AlertSeverity,
        message: impl Into<String>,
        value: Option<u64>,
        threshold: Option<u64>,
    ) -> bool {
        if self.should_dedupe(kind, now) {
            return false;
        }
        let alert = Alert {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            timestamp: now,
            kind,
            severity,
            message: message.into(),
            value,
            threshold,
        };

        {
            let mut last = self.last_emit.write().unwrap();
            last.insert(kind, now);
        }
        {
            let mut history = self.history.write().unwrap();
            history.push_back(alert.clone());
            while history.len() > self.max_history {
                history.pop_front();
            }
        }

        let sinks = self.sinks.read().unwrap();
        for sink in sinks.iter() {
            if let Err(err) = sink.deliver(&alert) {
                // isolated: remaining sinks still receive the alert
                tracing::warn!(kind = alert.kind.as_str(), error = %err, "alert sink failed");
            }
        }
        true
    }

    fn should_dedupe(&self, kind: AlertKind, now: i64) -> bool {
        if self.dedup_window_secs == 0 {
            return false;
        }
        let last = self.last_emit.read().unwrap();
        match last.get(&kind) {
            Some(&ts) => now.saturating_sub(ts) < self.dedup_window_secs,
            None => false,
        }
    }

    /// Most recent `n` alerts, newest first.
    pub fn recent(&self, n: usize) -> Vec<Alert> {
        let history = self.history.read().unwrap();
        history.iter().rev().take(n).cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.history.read().unwrap().len()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{FailingSink, RecordingSink};
    use super::*;

    #[test]
    fn test_publish_reaches_all_sinks() {
        let bus = AlertBus::new(16);
        let first = RecordingSink::new();
        let second = RecordingSink::new();
        bus.subscribe(first.clone());
        bus.subscribe(second.clone());

        assert!(bus.publish(
            100,
            AlertKind::LtvWarning,
            AlertSeverity::Warning,
            "ltv high",
            Some(9_100),
            Some(9_000),
        ));

        assert_eq!(first.kinds(), vec![AlertKind::LtvWarning]);
        assert_eq!(second.kinds(), vec![AlertKind::LtvWarning]);
        assert_eq!(bus.count(), 1);
    }

    #[test]
    fn test_failing_sink_does_not_block_the_rest() {
        let bus = AlertBus::new(16);
        let healthy = RecordingSink::new();
        bus.subscribe(Arc::new(FailingSink));
        bus.subscribe(healthy.clone());

        assert!(bus.publish(
            100,
            AlertKind::GadTriggered,
            AlertSeverity::Critical,
            "gad active",
            None,
            None,
        ));

        assert_eq!(healthy.kinds(), vec![AlertKind::GadTriggered]);
    }

    #[test]
    fn test_dedup_window() {
        let bus = AlertBus::new(16).with_dedup_window(60);
        let sink = RecordingSink::new();
        bus.subscribe(sink.clone());

        assert!(bus.publish(100, AlertKind::LtvWarning, AlertSeverity::Warning, "a", None, None));
        // same kind inside the window is suppressed
        assert!(!bus.publish(130, AlertKind::LtvWarning, AlertSeverity::Warning, "b", None, None));
        // a different kind is not
        assert!(bus.publish(130, AlertKind::AutoRepay, AlertSeverity::Info, "c", None, None));
        // outside the window it fires again
        assert!(bus.publish(161, AlertKind::LtvWarning, AlertSeverity::Warning, "d", None, None));

        assert_eq!(sink.seen.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_history_ring_is_bounded() {
        let bus = AlertBus::new(3);
        for i in 0..5 {
            bus.publish(
                i,
                AlertKind::AutoRepay,
                AlertSeverity::Info,
                format!("repay {i}"),
                None,
                None,
            );
        }
        assert_eq!(bus.count(), 3);
        let recent = bus.recent(10);
        assert_eq!(recent[0].message, "repay 4");
        assert_eq!(recent[2].message, "repay 2");
    }

    #[test]
    fn test_alert_ids_are_unique_and_increasing() {
        let bus = AlertBus::new(8);
        bus.publish(1, AlertKind::AutoRepay, AlertSeverity::Info, "x", None, None);
        bus.publish(2, AlertKind::LtvWarning, AlertSeverity::Warning, "y", None, None);
        let recent = bus.recent(2);
        assert!(recent[0].id > recent[1].id);
    }
}
