//! Periodic per-position monitoring loop.
//!
//! One spawned task per position: an immediate first tick, then one tick
//! per poll interval. Ticks are serialized by construction (the loop
//! awaits each tick before sleeping again) so a slow ledger call can
//! never overlap the next tick. A failed tick is logged and the loop
//! keeps going; `stop()` cancels the next tick and the task never
//! resumes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::agent::{AgentController, RepayAmount};
use crate::alerts::{AlertBus, AlertKind, AlertSeverity};
use crate::errors::Result;
use crate::gad::GadController;
use crate::health::{self, HealthStatus};
use crate::ledger::{read_snapshot, LedgerClient, RetryConfig};
use crate::types::{unix_now, AccountId, Asset};

/// Monitoring loop settings.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Time between ticks (default: 60s)
    pub poll_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
        }
    }
}

/// Drives health checks, alerts and corrective actions for one position.
pub struct PositionMonitor<L> {
    config: MonitorConfig,
    ledger: Arc<L>,
    owner: AccountId,
    agent: Arc<AgentController<L>>,
    gad: Arc<GadController<L>>,
    alerts: Arc<AlertBus>,
    retry: RetryConfig,
}

impl<L: LedgerClient + 'static> PositionMonitor<L> {
    pub fn new(
        config: MonitorConfig,
        ledger: Arc<L>,
        owner: AccountId,
        agent: Arc<AgentController<L>>,
        gad: Arc<GadController<L>>,
        alerts: Arc<AlertBus>,
    ) -> Self {
        Self {
            config,
            ledger,
            owner,
            agent,
            gad,
            alerts,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Run one monitoring pass and return the fresh health status.
    pub async fn tick(&self) -> Result<HealthStatus> {
        self.tick_at(unix_now()).await
    }

    pub(crate) async fn tick_at(&self, now: i64) -> Result<HealthStatus> {
        let snapshot = read_snapshot(self.ledger.as_ref(), &self.owner, &self.retry).await?;

        let gad_threshold = self
            .gad
            .config()
            .await
            .filter(|config| config.settings.enabled)
            .map(|config| config.settings.start_threshold_bps);
        let status = health::evaluate(&snapshot.position, &snapshot.prices, &snapshot.params, gad_threshold);
        debug!(
            owner = %self.owner,
            ltv_bps = status.ltv_bps,
            health_factor = %status.health_factor,
            healthy = status.healthy,
            "monitor tick"
        );

        if status.gad_should_activate {
            self.alerts.publish(
                now,
                AlertKind::GadTriggered,
                AlertSeverity::Critical,
                format!("gradual deleveraging active at LTV {:.1}%", status.ltv_pct()),
                Some(status.ltv_bps),
                gad_threshold.map(|t| t as u64),
            );
        }

        let Some(agent_config) = self.agent.config().await else {
            // no agent config: nothing to warn about, nothing to correct
            return Ok(status);
        };

        let alert_threshold = agent_config.settings.alert_threshold_bps as u64;
        if status.ltv_bps > alert_threshold {
            self.alerts.publish(
                now,
                AlertKind::LtvWarning,
                AlertSeverity::Warning,
                format!("LTV {:.1}% above alert threshold", status.ltv_pct()),
                Some(status.ltv_bps),
                Some(alert_threshold),
            );
        }

        if agent_config.settings.auto_repay_enabled
            && status.ltv_bps > agent_config.settings.auto_repay_threshold_bps as u64
        {
            let asset = largest_debt_asset(&snapshot.position).unwrap_or(Asset::Usdc);
            let repaid = self
                .agent
                .autonomous_repay_at(RepayAmount::Auto, asset, now)
                .await?;
            if repaid > 0 {
                info!(owner = %self.owner, repaid, "corrective repayment triggered");
            }
        }

        Ok(status)
    }

    /// Start the loop: one tick immediately, then one per interval.
    pub fn start(self: Arc<Self>) -> MonitorHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let monitor = self;
        let poll_interval = monitor.config.poll_interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(owner = %monitor.owner, interval_s = poll_interval.as_secs_f64(), "monitor started");

            loop {
                tokio::select! {
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(err) = monitor.tick().await {
                            // never fatal: the next tick still runs
                            warn!(owner = %monitor.owner, error = %err, "monitor tick failed");
                        }
                    }
                }
            }
            info!(owner = %monitor.owner, "monitor stopped");
        });

        MonitorHandle {
            stop: stop_tx,
            task,
        }
    }
}

/// The debt entry with the largest outstanding value.
fn largest_debt_asset(position: &crate::types::Position) -> Option<Asset> {
    position
        .debts
        .iter()
        .filter(|entry| entry.total() > 0)
        .max_by_key(|entry| entry.total())
        .map(|entry| entry.asset)
}

/// Handle for a running monitor task.
pub struct MonitorHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Cancel the next scheduled tick. The loop does not resume after
    /// stop; a tick already in flight finishes first.
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }

    /// Wait for the loop task to exit.
    pub async fn join(self) {
        let _ = self.task.await;
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
