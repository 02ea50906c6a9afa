//! Gradual Auto-Deleveraging (GAD) controller.
//!
//! Instead of one catastrophic liquidation, an over-leveraged position is
//! unwound in many small, time-dispersed steps, each bounded by the
//! configured step size. The small-step schedule denies an adversary a
//! single large, predictable profit opportunity around the liquidation.
//!
//! There is no stored state machine: `Disabled`/`Armed`/`Active` is
//! recomputed on every call from the config and live LTV. The crank is
//! keeper-callable and idempotent under the interval gate.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::consts::{
    GAD_MAX_INTERVAL_SECS, GAD_MAX_START_THRESHOLD_BPS, GAD_MAX_STEP_BPS, GAD_MIN_INTERVAL_SECS,
    GAD_MIN_START_THRESHOLD_BPS, GAD_MIN_STEP_BPS,
};
use crate::errors::{ControlError, Result};
use crate::health;
use crate::ledger::{call_with_retry, read_snapshot, LedgerAction, LedgerClient, RetryConfig};
use crate::types::{bps_of, mul_div, unix_now, AccountId, Asset};

/// Owner-configurable GAD settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GadSettings {
    pub enabled: bool,
    /// LTV at which deleveraging starts (bps)
    pub start_threshold_bps: u16,
    /// Share of collateral value sold per step (bps)
    pub step_size_bps: u16,
    /// Minimum seconds between steps
    pub min_interval_secs: i64,
}

impl Default for GadSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            start_threshold_bps: 8_500,
            step_size_bps: 500,
            min_interval_secs: 3_600,
        }
    }
}

impl GadSettings {
    /// Bounds-check every field. Rejected settings never reach the ledger.
    pub fn validate(&self) -> Result<()> {
        if self.start_threshold_bps < GAD_MIN_START_THRESHOLD_BPS
            || self.start_threshold_bps > GAD_MAX_START_THRESHOLD_BPS
        {
            return Err(ControlError::out_of_range(
                "start_threshold_bps",
                self.start_threshold_bps as i64,
                GAD_MIN_START_THRESHOLD_BPS as i64,
                GAD_MAX_START_THRESHOLD_BPS as i64,
            ));
        }
        if self.step_size_bps < GAD_MIN_STEP_BPS || self.step_size_bps > GAD_MAX_STEP_BPS {
            return Err(ControlError::out_of_range(
                "step_size_bps",
                self.step_size_bps as i64,
                GAD_MIN_STEP_BPS as i64,
                GAD_MAX_STEP_BPS as i64,
            ));
        }
        if self.min_interval_secs < GAD_MIN_INTERVAL_SECS
            || self.min_interval_secs > GAD_MAX_INTERVAL_SECS
        {
            return Err(ControlError::out_of_range(
                "min_interval_secs",
                self.min_interval_secs,
                GAD_MIN_INTERVAL_SECS,
                GAD_MAX_INTERVAL_SECS,
            ));
        }
        Ok(())
    }
}

/// GAD settings plus execution history for one position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GadConfig {
    pub settings: GadSettings,
    pub last_execution_ts: i64,
    pub steps_executed: u32,
    pub total_deleveraged_usd: u64,
}

impl GadConfig {
    fn new(settings: GadSettings) -> Self {
        Self {
            settings,
            last_execution_ts: 0,
            steps_executed: 0,
            total_deleveraged_usd: 0,
        }
    }
}

/// Deleveraging state, a pure function of config + live LTV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GadState {
    Disabled,
    /// Enabled, LTV below the start threshold
    Armed,
    /// Enabled, LTV at or above the start threshold
    Active,
}

impl GadState {
    pub fn derive(config: &GadConfig, ltv_bps: u64) -> GadState {
        if !config.settings.enabled {
            GadState::Disabled
        } else if ltv_bps >= config.settings.start_threshold_bps as u64 {
            GadState::Active
        } else {
            GadState::Armed
        }
    }
}

/// Why a crank did not execute a step. All of these are successes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoActionReason {
    NotConfigured,
    Disabled,
    NoDebt,
    NoCollateral,
    BelowThreshold,
    IntervalNotElapsed,
    /// Step value rounds to zero collateral units
    NothingToSell,
}

/// Result of one crank invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrankOutcome {
    NoAction(NoActionReason),
    Stepped {
        collateral_asset: Asset,
        /// Collateral sold, in the asset's declared decimals
        collateral_sold: u64,
        /// USD value of the sold collateral (6-dec)
        value_usd: u64,
        /// Debt reduction applied from the proceeds (6-dec USD)
        debt_reduced_usd: u64,
        ltv_before_bps: u64,
        ltv_after_bps: u64,
    },
}

/// Owns the per-position GAD configuration and executes crank steps.
///
/// All mutation of the execution history goes through the internal mutex,
/// so concurrent keeper cranks cannot double-execute a step.
pub struct GadController<L> {
    ledger: Arc<L>,
    owner: AccountId,
    retry: RetryConfig,
    state: Mutex<Option<GadConfig>>,
}

impl<L: LedgerClient> GadController<L> {
    pub fn new(ledger: Arc<L>, owner: AccountId) -> Self {
        Self {
            ledger,
            owner,
            retry: RetryConfig::default(),
            state: Mutex::new(None),
        }
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Validate and store settings, then record them on the ledger.
    ///
    /// The first configuration starts with a clean execution history;
    /// reconfiguration preserves it.
    pub async fn configure(&self, settings: GadSettings) -> Result<()> {
        settings.validate()?;

        call_with_retry(&self.retry, "configure_gad", || {
            self.ledger.submit(LedgerAction::ConfigureGad {
                owner: self.owner,
                settings,
            })
        })
        .await?;

        let mut guard = self.state.lock().await;
        match guard.as_mut() {
            Some(config) => config.settings = settings,
            None => *guard = Some(GadConfig::new(settings)),
        }
        info!(owner = %self.owner, enabled = settings.enabled, "GAD configured");
        Ok(())
    }

    /// Snapshot of the current configuration.
    pub async fn config(&self) -> Option<GadConfig> {
        *self.state.lock().await
    }

    /// Recompute the state machine position for a live LTV reading.
    pub async fn state_for(&self, ltv_bps: u64) -> GadState {
        match self.state.lock().await.as_ref() {
            Some(config) => GadState::derive(config, ltv_bps),
            None => GadState::Disabled,
        }
    }

    /// Advance the deleveraging machine by at most one step.
    ///
    /// Callable by any keeper; a no-op outside the Active state or inside
    /// the minimum interval.
    pub async fn crank(&self) -> Result<CrankOutcome> {
        self.crank_at(unix_now()).await
    }

    pub(crate) async fn crank_at(&self, now: i64) -> Result<CrankOutcome> {
        let mut guard = self.state.lock().await;
        let Some(config) = guard.as_mut() else {
            return Ok(CrankOutcome::NoAction(NoActionReason::NotConfigured));
        };
        if !config.settings.enabled {
            return Ok(CrankOutcome::NoAction(NoActionReason::Disabled));
        }

        let snapshot = read_snapshot(self.ledger.as_ref(), &self.owner, &self.retry).await?;
        let debt = health::debt_value(&snapshot.position);
        if debt == 0 {
            return Ok(CrankOutcome::NoAction(NoActionReason::NoDebt));
        }
        let collateral = health::collateral_value(&snapshot.position, &snapshot.prices);
        if collateral == 0 {
            return Ok(CrankOutcome::NoAction(NoActionReason::NoCollateral));
        }

        let ltv_before = health::ltv_bps(collateral, debt);
        if GadState::derive(config, ltv_before) != GadState::Active {
            return Ok(CrankOutcome::NoAction(NoActionReason::BelowThreshold));
        }
        if now.saturating_sub(config.last_execution_ts) < config.settings.min_interval_secs {
            debug!(owner = %self.owner, "GAD crank inside minimum interval");
            return Ok(CrankOutcome::NoAction(NoActionReason::IntervalNotElapsed));
        }

        // sell from the largest-value collateral entry, bounded by what it holds
        let Some((asset, held_amount)) =
            health::primary_collateral(&snapshot.position, &snapshot.prices)
        else {
            return Ok(CrankOutcome::NoAction(NoActionReason::NoCollateral));
        };
        let held_value = snapshot.prices.value_of(asset, held_amount);
        let step_value = std::cmp::min(
            bps_of(collateral, config.settings.step_size_bps as u64),
            held_value,
        );
        let debt_reduction = std::cmp::min(step_value, debt);

        let price = snapshot.prices.get(asset).unwrap_or(0);
        let units = mul_div(step_value, asset.scale(), price);
        if units == 0 || debt_reduction == 0 {
            return Ok(CrankOutcome::NoAction(NoActionReason::NothingToSell));
        }

        call_with_retry(&self.retry, "execute_gad_step", || {
            self.ledger.submit(LedgerAction::ExecuteGadStep {
                owner: self.owner,
                collateral_asset: asset,
                collateral_amount: units,
                debt_reduction_usd: debt_reduction,
            })
        })
        .await?;

        config.last_execution_ts = now;
        config.steps_executed = config.steps_executed.saturating_add(1);
        config.total_deleveraged_usd = config.total_deleveraged_usd.saturating_add(debt_reduction);

        let ltv_after = health::ltv_bps(
            collateral.saturating_sub(step_value),
            debt.saturating_sub(debt_reduction),
        );
        info!(
            owner = %self.owner,
            asset = asset.as_str(),
            value_usd = step_value,
            debt_reduced_usd = debt_reduction,
            ltv_before_bps = ltv_before,
            ltv_after_bps = ltv_after,
            "GAD step executed"
        );

        Ok(CrankOutcome::Stepped {
            collateral_asset: asset,
            collateral_sold: units,
            value_usd: step_value,
            debt_reduced_usd: debt_reduction,
            ltv_before_bps: ltv_before,
            ltv_after_bps: ltv_after,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::USD_MULTIPLIER;
    use crate::ledger::InMemoryLedger;
    use crate::types::Position;

    const USD: u64 = USD_MULTIPLIER;

    fn owner() -> AccountId {
        AccountId::new([3u8; 32])
    }

    async fn ledger_with_position(collateral_sol: u64, debt_usd: u64) -> Arc<InMemoryLedger> {
        let ledger = Arc::new(InMemoryLedger::new());
        let mut position = Position::new(owner());
        if collateral_sol > 0 {
            position.credit_collateral(Asset::Sol, collateral_sol);
        }
        if debt_usd > 0 {
            position.credit_debt(Asset::Usdc, debt_usd);
        }
        ledger.set_position(position).await;
        ledger.set_price(Asset::Sol, 100 * USD).await;
        ledger
    }

    fn controller(ledger: Arc<InMemoryLedger>) -> GadController<InMemoryLedger> {
        GadController::new(ledger, owner()).with_retry_config(RetryConfig::fast())
    }

    fn active_settings() -> GadSettings {
        GadSettings {
            enabled: true,
            start_threshold_bps: 8_000,
            step_size_bps: 500,
            min_interval_secs: 3_600,
        }
    }

    #[test]
    fn test_settings_bounds() {
        assert!(active_settings().validate().is_ok());

        let mut settings = active_settings();
        settings.start_threshold_bps = 4_999;
        assert!(matches!(
            settings.validate(),
            Err(ControlError::Validation { field: "start_threshold_bps", .. })
        ));

        let mut settings = active_settings();
        settings.step_size_bps = 2_001;
        assert!(matches!(
            settings.validate(),
            Err(ControlError::Validation { field: "step_size_bps", .. })
        ));

        let mut settings = active_settings();
        settings.min_interval_secs = 299;
        assert!(matches!(
            settings.validate(),
            Err(ControlError::Validation { field: "min_interval_secs", .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_settings_never_reach_the_ledger() {
        let ledger = ledger_with_position(10_000_000_000, 900 * USD).await;
        let gad = controller(ledger.clone());

        let mut settings = active_settings();
        settings.step_size_bps = 0;
        assert!(gad.configure(settings).await.is_err());
        assert!(ledger.journal().await.is_empty());
    }

    #[tokio::test]
    async fn test_crank_unconfigured_and_disabled_are_no_ops() {
        // $1000 collateral against $950 debt: LTV 95%, well over threshold
        let ledger = ledger_with_position(10_000_000_000, 950 * USD).await;
        let gad = controller(ledger.clone());

        let outcome = gad.crank_at(10_000).await.unwrap();
        assert_eq!(outcome, CrankOutcome::NoAction(NoActionReason::NotConfigured));

        let mut settings = active_settings();
        settings.enabled = false;
        gad.configure(settings).await.unwrap();

        let outcome = gad.crank_at(10_000).await.unwrap();
        assert_eq!(outcome, CrankOutcome::NoAction(NoActionReason::Disabled));

        // zero state change: only the configure write reached the ledger
        let journal = ledger.journal().await;
        assert_eq!(journal.len(), 1);
        assert_eq!(journal[0].kind(), "configure_gad");
        assert_eq!(gad.config().await.unwrap().steps_executed, 0);
    }

    #[tokio::test]
    async fn test_crank_no_debt_and_no_collateral() {
        let ledger = ledger_with_position(10_000_000_000, 0).await;
        let gad = controller(ledger);
        gad.configure(active_settings()).await.unwrap();
        assert_eq!(
            gad.crank_at(10_000).await.unwrap(),
            CrankOutcome::NoAction(NoActionReason::NoDebt)
        );

        let ledger = ledger_with_position(0, 900 * USD).await;
        let gad = controller(ledger);
        gad.configure(active_settings()).await.unwrap();
        assert_eq!(
            gad.crank_at(10_000).await.unwrap(),
            CrankOutcome::NoAction(NoActionReason::NoCollateral)
        );
    }

    #[tokio::test]
    async fn test_crank_below_threshold_is_armed_no_op() {
        // LTV 50%, threshold 80%
        let ledger = ledger_with_position(10_000_000_000, 500 * USD).await;
        let gad = controller(ledger);
        gad.configure(active_settings()).await.unwrap();

        assert_eq!(gad.state_for(5_000).await, GadState::Armed);
        assert_eq!(
            gad.crank_at(10_000).await.unwrap(),
            CrankOutcome::NoAction(NoActionReason::BelowThreshold)
        );
    }

    #[tokio::test]
    async fn test_crank_executes_one_bounded_step() {
        // LTV 90%: $1000 collateral, $900 debt
        let ledger = ledger_with_position(10_000_000_000, 900 * USD).await;
        let gad = controller(ledger.clone());
        gad.configure(active_settings()).await.unwrap();

        let outcome = gad.crank_at(10_000).await.unwrap();
        match outcome {
            CrankOutcome::Stepped {
                collateral_asset,
                collateral_sold,
                value_usd,
                debt_reduced_usd,
                ltv_before_bps,
                ..
            } => {
                assert_eq!(collateral_asset, Asset::Sol);
                // 5% of $1000 = $50 = 0.5 SOL at $100
                assert_eq!(value_usd, 50 * USD);
                assert_eq!(collateral_sold, 500_000_000);
                assert_eq!(debt_reduced_usd, 50 * USD);
                assert_eq!(ltv_before_bps, 9_000);
            }
            other => panic!("expected a step, got {other:?}"),
        }

        let config = gad.config().await.unwrap();
        assert_eq!(config.steps_executed, 1);
        assert_eq!(config.total_deleveraged_usd, 50 * USD);
        assert_eq!(config.last_execution_ts, 10_000);

        let position = ledger.position_state(&owner()).await.unwrap();
        assert_eq!(position.collateral_amount(Asset::Sol), 9_500_000_000);
        assert_eq!(position.debt_total(Asset::Usdc), 850 * USD);
        assert_eq!(position.reputation.gad_events, 1);
    }

    #[tokio::test]
    async fn test_crank_respects_minimum_interval() {
        let ledger = ledger_with_position(10_000_000_000, 900 * USD).await;
        let gad = controller(ledger.clone());
        gad.configure(active_settings()).await.unwrap();

        assert!(matches!(
            gad.crank_at(10_000).await.unwrap(),
            CrankOutcome::Stepped { .. }
        ));
        // one second later: inside the 3600s window
        assert_eq!(
            gad.crank_at(10_001).await.unwrap(),
            CrankOutcome::NoAction(NoActionReason::IntervalNotElapsed)
        );
        // exactly two state changes total would violate the gate; we have one
        assert_eq!(gad.config().await.unwrap().steps_executed, 1);

        // after the interval elapses a second step may run
        assert!(matches!(
            gad.crank_at(10_000 + 3_600).await.unwrap(),
            CrankOutcome::Stepped { .. }
        ));
        assert_eq!(gad.config().await.unwrap().steps_executed, 2);
    }

    #[tokio::test]
    async fn test_reconfiguration_preserves_history() {
        let ledger = ledger_with_position(10_000_000_000, 900 * USD).await;
        let gad = controller(ledger);
        gad.configure(active_settings()).await.unwrap();
        gad.crank_at(10_000).await.unwrap();

        let mut settings = active_settings();
        settings.step_size_bps = 1_000;
        gad.configure(settings).await.unwrap();

        let config = gad.config().await.unwrap();
        assert_eq!(config.steps_executed, 1);
        assert_eq!(config.settings.step_size_bps, 1_000);
        assert_eq!(config.last_execution_ts, 10_000);
    }

    #[tokio::test]
    async fn test_failed_ledger_step_leaves_history_untouched() {
        let ledger = ledger_with_position(10_000_000_000, 900 * USD).await;
        let gad = controller(ledger.clone());
        gad.configure(active_settings()).await.unwrap();

        ledger.fail_next_submits(10).await;
        assert!(gad.crank_at(10_000).await.is_err());

        let config = gad.config().await.unwrap();
        assert_eq!(config.steps_executed, 0);
        assert_eq!(config.last_execution_ts, 0);
    }
}
