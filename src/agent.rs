//! Rate-limited autonomous agent controller.
//!
//! Gates every autonomous borrow, repay and x402-style payment behind a
//! calendar-day budget window and the health calculator's verdict. The
//! daily counters reset lazily on access when the day index changes;
//! there is no background timer.
//!
//! All state for a position sits behind one async mutex that stays held
//! across the check → ledger submit → debit sequence, so two concurrent
//! borrows can never both pass the budget check against the same stale
//! counter.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::alerts::{AlertBus, AlertKind, AlertSeverity};
use crate::consts::{
    AUTO_REPAY_BUFFER_BPS, AUTO_REPAY_DUST_USD, BPS_DENOMINATOR, MAX_X402_PAYMENT_USD,
};
use crate::errors::{ControlError, Result};
use crate::health;
use crate::ledger::{call_with_retry, read_snapshot, LedgerAction, LedgerClient, RetryConfig};
use crate::types::{bps_of, day_index, unix_now, AccountId, Asset};

/// Owner-configurable agent settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Maximum autonomous borrow value per calendar day (6-dec USD).
    /// Zero disables autonomous borrowing without erasing history.
    pub daily_borrow_limit: u64,
    pub auto_repay_enabled: bool,
    /// LTV that triggers automatic repayment (bps)
    pub auto_repay_threshold_bps: u16,
    /// x402 programmatic payments enabled
    pub x402_enabled: bool,
    /// Maximum x402 spend per calendar day (6-dec USD)
    pub x402_daily_limit: u64,
    /// LTV above which the monitor emits a warning (bps)
    pub alert_threshold_bps: u16,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            daily_borrow_limit: 0,
            auto_repay_enabled: false,
            auto_repay_threshold_bps: 8_000,
            x402_enabled: false,
            x402_daily_limit: 0,
            alert_threshold_bps: 9_000,
        }
    }
}

impl AgentSettings {
    /// Bounds-check thresholds. Rejected settings never reach the ledger.
    pub fn validate(&self) -> Result<()> {
        let min_trigger = AUTO_REPAY_BUFFER_BPS as i64 + 500;
        if (self.auto_repay_threshold_bps as i64) < min_trigger
            || self.auto_repay_threshold_bps as u64 > BPS_DENOMINATOR
        {
            return Err(ControlError::out_of_range(
                "auto_repay_threshold_bps",
                self.auto_repay_threshold_bps as i64,
                min_trigger,
                BPS_DENOMINATOR as i64,
            ));
        }
        if self.alert_threshold_bps as u64 > BPS_DENOMINATOR {
            return Err(ControlError::out_of_range(
                "alert_threshold_bps",
                self.alert_threshold_bps as i64,
                0,
                BPS_DENOMINATOR as i64,
            ));
        }
        Ok(())
    }
}

/// Lifetime x402 payment statistics for an agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct X402Stats {
    pub total_payments: u64,
    pub total_amount_paid: u64,
    pub total_borrowed_for_x402: u64,
    pub last_payment_at: i64,
}

/// Agent settings plus the daily budget window state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub settings: AgentSettings,
    /// Borrow value consumed in the current window (6-dec USD)
    pub daily_borrowed: u64,
    /// x402 spend consumed in the current window (6-dec USD)
    pub x402_daily_spent: u64,
    /// Day index the counters belong to
    pub period_day: i64,
    pub x402_stats: X402Stats,
}

impl AgentConfig {
    fn new(settings: AgentSettings, now: i64) -> Self {
        Self {
            settings,
            daily_borrowed: 0,
            x402_daily_spent: 0,
            period_day: day_index(now),
            x402_stats: X402Stats::default(),
        }
    }

    /// Zero the used-today counters iff the day index changed.
    ///
    /// The only place daily counters change outside of a debit. Calling
    /// it twice within the same day is a no-op the second time.
    pub fn reset_if_new_day(&mut self, now: i64) -> bool {
        let today = day_index(now);
        if today != self.period_day {
            self.daily_borrowed = 0;
            self.x402_daily_spent = 0;
            self.period_day = today;
            true
        } else {
            false
        }
    }

    fn can_borrow(&self, amount: u64) -> bool {
        self.daily_borrowed.saturating_add(amount) <= self.settings.daily_borrow_limit
    }

    fn can_spend(&self, amount: u64) -> bool {
        self.settings.x402_enabled
            && self.x402_daily_spent.saturating_add(amount) <= self.settings.x402_daily_limit
    }
}

/// An x402 "402 Payment Required" request parsed by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct X402PaymentRequest {
    pub recipient: AccountId,
    /// Amount in the asset's declared decimals
    pub amount: u64,
    pub asset: Asset,
    /// Unique id preventing replay
    pub payment_id: [u8; 32],
    pub expires_at: i64,
}

impl X402PaymentRequest {
    pub fn is_valid(&self, now: i64) -> bool {
        now < self.expires_at && self.amount > 0 && self.amount < MAX_X402_PAYMENT_USD
    }
}

/// Repayment sizing for [`AgentController::autonomous_repay`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepayAmount {
    /// Repay the minimum that brings LTV a safety buffer below the trigger
    Auto,
    /// Repay exactly this value (6-dec USD)
    Exact(u64),
}

/// Minimal repayment that brings LTV down to the trigger minus the safety
/// buffer: `max(0, debt − collateral × target_ltv)`.
pub fn auto_repay_amount(collateral_value: u64, debt_value: u64, trigger_threshold_bps: u16) -> u64 {
    let target_bps = trigger_threshold_bps.saturating_sub(AUTO_REPAY_BUFFER_BPS) as u64;
    debt_value.saturating_sub(bps_of(collateral_value, target_bps))
}

/// Gates autonomous actions for one position.
pub struct AgentController<L> {
    ledger: Arc<L>,
    owner: AccountId,
    retry: RetryConfig,
    alerts: Arc<AlertBus>,
    state: Mutex<Option<AgentConfig>>,
}

impl<L: LedgerClient> AgentController<L> {
    pub fn new(ledger: Arc<L>, owner: AccountId, alerts: Arc<AlertBus>) -> Self {
        Self {
            ledger,
            owner,
            retry: RetryConfig::default(),
            alerts,
            state: Mutex::new(None),
        }
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Validate and store settings, then record them on the ledger.
    ///
    /// The first configuration opens a fresh budget window;
    /// reconfiguration preserves counters and payment statistics.
    pub async fn configure(&self, settings: AgentSettings) -> Result<()> {
        self.configure_at(settings, unix_now()).await
    }

    pub(crate) async fn configure_at(&self, settings: AgentSettings, now: i64) -> Result<()> {
        settings.validate()?;

        call_with_retry(&self.retry, "configure_agent", || {
            self.ledger.submit(LedgerAction::ConfigureAgent {
                owner: self.owner,
                settings,
            })
        })
        .await?;

        let mut guard = self.state.lock().await;
        match guard.as_mut() {
            Some(config) => config.settings = settings,
            None => *guard = Some(AgentConfig::new(settings, now)),
        }
        info!(owner = %self.owner, limit = settings.daily_borrow_limit, "agent configured");
        Ok(())
    }

    /// Snapshot of the current configuration.
    pub async fn config(&self) -> Option<AgentConfig> {
        *self.state.lock().await
    }

    /// Borrow autonomously within the daily budget and health limits.
    ///
    /// The budget counter is debited only after the ledger confirms the
    /// borrow.
    pub async fn autonomous_borrow(&self, amount_usd: u64, asset: Asset) -> Result<()> {
        self.autonomous_borrow_at(amount_usd, asset, unix_now()).await
    }

    pub(crate) async fn autonomous_borrow_at(
        &self,
        amount_usd: u64,
        asset: Asset,
        now: i64,
    ) -> Result<()> {
        let mut guard = self.state.lock().await;
        let config = guard.as_mut().ok_or(ControlError::NotConfigured)?;
        config.reset_if_new_day(now);

        let used = config.daily_borrowed;
        let limit = config.settings.daily_borrow_limit;
        if !config.can_borrow(amount_usd) {
            self.alerts.publish(
                now,
                AlertKind::DailyLimitReached,
                AlertSeverity::Warning,
                format!(
                    "autonomous borrow of {amount_usd} rejected: {used} of {limit} already used today"
                ),
                Some(used.saturating_add(amount_usd)),
                Some(limit),
            );
            return Err(ControlError::DailyLimitExceeded {
                used,
                limit,
                requested: amount_usd,
            });
        }

        let snapshot = read_snapshot(self.ledger.as_ref(), &self.owner, &self.retry).await?;
        let status = health::evaluate(&snapshot.position, &snapshot.prices, &snapshot.params, None);
        if !status.health_factor.is_healthy() {
            return Err(ControlError::Unhealthy {
                health_factor: status.health_factor,
            });
        }
        if amount_usd > status.available_to_borrow {
            return Err(ControlError::InsufficientHeadroom {
                requested: amount_usd,
                available: status.available_to_borrow,
            });
        }

        call_with_retry(&self.retry, "borrow", || {
            self.ledger.submit(LedgerAction::Borrow {
                owner: self.owner,
                asset,
                amount: amount_usd,
            })
        })
        .await?;

        // the increment happens only after confirmed success, under the
        // same lock as the budget check
        config.daily_borrowed = config.daily_borrowed.saturating_add(amount_usd);
        info!(
            owner = %self.owner,
            asset = asset.as_str(),
            amount = amount_usd,
            used = config.daily_borrowed,
            "autonomous borrow executed"
        );
        Ok(())
    }

    /// Repay debt, either an exact value or the computed corrective
    /// amount. Returns the value repaid; `Ok(0)` means the computed
    /// amount was below the dust floor and nothing was submitted.
    pub async fn autonomous_repay(&self, amount: RepayAmount, asset: Asset) -> Result<u64> {
        self.autonomous_repay_at(amount, asset, unix_now()).await
    }

    pub(crate) async fn autonomous_repay_at(
        &self,
        amount: RepayAmount,
        asset: Asset,
        now: i64,
    ) -> Result<u64> {
        let mut guard = self.state.lock().await;
        let config = guard.as_mut().ok_or(ControlError::NotConfigured)?;
        config.reset_if_new_day(now);

        let snapshot = read_snapshot(self.ledger.as_ref(), &self.owner, &self.retry).await?;
        let collateral = health::collateral_value(&snapshot.position, &snapshot.prices);
        let debt = health::debt_value(&snapshot.position);
        let ltv = health::ltv_bps(collateral, debt);
        let trigger = config.settings.auto_repay_threshold_bps;

        let repay = match amount {
            RepayAmount::Exact(value) => std::cmp::min(value, debt),
            RepayAmount::Auto => {
                let computed = auto_repay_amount(collateral, debt, trigger);
                if computed < AUTO_REPAY_DUST_USD {
                    debug!(owner = %self.owner, computed, "auto-repay below dust floor, skipping");
                    return Ok(0);
                }
                std::cmp::min(computed, debt)
            }
        };
        if repay == 0 {
            return Ok(0);
        }

        // alert goes out before submission, recording the triggering LTV
        self.alerts.publish(
            now,
            AlertKind::AutoRepay,
            AlertSeverity::Info,
            format!("repaying {repay} to bring LTV {:.1}% back to target", ltv as f64 / 100.0),
            Some(repay),
            Some(trigger as u64),
        );

        call_with_retry(&self.retry, "repay", || {
            self.ledger.submit(LedgerAction::Repay {
                owner: self.owner,
                asset,
                amount: repay,
            })
        })
        .await?;

        info!(owner = %self.owner, asset = asset.as_str(), amount = repay, "repayment executed");
        Ok(repay)
    }

    /// Advisory x402 gate: may the agent spend `amount_usd` right now?
    ///
    /// Committing the spend is the caller's responsibility, via
    /// [`AgentController::record_payment`].
    pub async fn can_make_payment(&self, amount_usd: u64) -> bool {
        self.can_make_payment_at(amount_usd, unix_now()).await
    }

    pub(crate) async fn can_make_payment_at(&self, amount_usd: u64, now: i64) -> bool {
        let mut guard = self.state.lock().await;
        match guard.as_mut() {
            Some(config) => {
                config.reset_if_new_day(now);
                config.can_spend(amount_usd)
            }
            None => false,
        }
    }

    /// Commit an executed x402 spend against the daily payment budget.
    ///
    /// `borrowed_usd` is the part of the payment that was covered by a
    /// fresh borrow, tracked in the lifetime statistics.
    pub async fn record_payment(&self, request: &X402PaymentRequest, borrowed_usd: u64) -> Result<()> {
        self.record_payment_at(request, borrowed_usd, unix_now()).await
    }

    pub(crate) async fn record_payment_at(
        &self,
        request: &X402PaymentRequest,
        borrowed_usd: u64,
        now: i64,
    ) -> Result<()> {
        if now >= request.expires_at {
            return Err(ControlError::out_of_range(
                "expires_at",
                request.expires_at,
                now,
                i64::MAX,
            ));
        }
        if request.amount == 0 || request.amount >= MAX_X402_PAYMENT_USD {
            return Err(ControlError::out_of_range(
                "amount",
                request.amount as i64,
                1,
                MAX_X402_PAYMENT_USD as i64,
            ));
        }

        let mut guard = self.state.lock().await;
        let config = guard.as_mut().ok_or(ControlError::NotConfigured)?;
        config.reset_if_new_day(now);

        if !config.can_spend(request.amount) {
            return Err(ControlError::DailyLimitExceeded {
                used: config.x402_daily_spent,
                limit: config.settings.x402_daily_limit,
                requested: request.amount,
            });
        }

        config.x402_daily_spent = config.x402_daily_spent.saturating_add(request.amount);
        config.x402_stats.total_payments = config.x402_stats.total_payments.saturating_add(1);
        config.x402_stats.total_amount_paid =
            config.x402_stats.total_amount_paid.saturating_add(request.amount);
        config.x402_stats.total_borrowed_for_x402 = config
            .x402_stats
            .total_borrowed_for_x402
            .saturating_add(borrowed_usd);
        config.x402_stats.last_payment_at = now;
        Ok(())
    }
}
