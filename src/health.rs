//! Health Calculator: pure, deterministic functions over fixed-point values.
//!
//! Everything here takes immutable snapshots and may run concurrently
//! without restriction. Inputs are assumed already validated by callers;
//! there are no error conditions and no side effects.

use serde::{Deserialize, Serialize};

use crate::consts::{BPS_DENOMINATOR, HEALTH_FACTOR_SCALE};
use crate::types::{bps_of, mul_div, HealthFactor, Position, Prices, RiskParams};

/// Loan-to-value in basis points.
///
/// Zero when there is no debt. A debt-only position (zero collateral)
/// returns the full-risk sentinel of 10_000 bps rather than faulting, so
/// every threshold comparison treats it as maximally risky.
pub fn ltv_bps(collateral_value: u64, debt_value: u64) -> u64 {
    if debt_value == 0 {
        return 0;
    }
    if collateral_value == 0 {
        return BPS_DENOMINATOR;
    }
    mul_div(debt_value, BPS_DENOMINATOR, collateral_value)
}

/// Health factor: risk-adjusted collateral over debt.
///
/// Returns [`HealthFactor::INFINITE`] when there is no debt.
pub fn health_factor(
    collateral_value: u64,
    debt_value: u64,
    liquidation_threshold_bps: u16,
) -> HealthFactor {
    if debt_value == 0 {
        return HealthFactor::INFINITE;
    }
    let adjusted = bps_of(collateral_value, liquidation_threshold_bps as u64);
    HealthFactor::from_scaled(mul_div(adjusted, HEALTH_FACTOR_SCALE, debt_value))
}

/// Collateral price (USD, 6-dec) at which the position becomes liquidatable.
///
/// `None` when there is no collateral or no debt.
pub fn liquidation_price(
    collateral_amount: u64,
    collateral_decimals: u8,
    debt_value: u64,
    liquidation_threshold_bps: u16,
) -> Option<u64> {
    if collateral_amount == 0 || debt_value == 0 {
        return None;
    }
    let scale = 10u128.pow(collateral_decimals as u32);
    let numerator = debt_value as u128 * scale * BPS_DENOMINATOR as u128;
    let denominator = collateral_amount as u128 * liquidation_threshold_bps as u128;
    if denominator == 0 {
        return None;
    }
    Some(std::cmp::min(numerator / denominator, u64::MAX as u128) as u64)
}

/// Remaining borrow headroom under `max_ltv_bps`, saturating at zero.
pub fn max_additional_borrow(collateral_value: u64, current_debt: u64, max_ltv_bps: u16) -> u64 {
    bps_of(collateral_value, max_ltv_bps as u64).saturating_sub(current_debt)
}

/// LTV bonus granted for a reputation score.
pub fn reputation_bonus_bps(score: u32) -> u16 {
    match score {
        s if s >= 400 => 500,
        s if s >= 200 => 300,
        _ => 0,
    }
}

/// Base max LTV plus reputation bonus, capped at the liquidation threshold.
pub fn effective_max_ltv_bps(base_bps: u16, bonus_bps: u16, liquidation_threshold_bps: u16) -> u16 {
    std::cmp::min(base_bps.saturating_add(bonus_bps), liquidation_threshold_bps)
}

/// Total USD value (6-dec) of a position's collateral at current prices.
pub fn collateral_value(position: &Position, prices: &Prices) -> u64 {
    position
        .collaterals
        .iter()
        .fold(0u64, |acc, entry| {
            acc.saturating_add(prices.value_of(entry.asset, entry.amount))
        })
}

/// Total USD value (6-dec) of a position's debt.
///
/// Stable debt is valued at par: principal plus accrued interest.
pub fn debt_value(position: &Position) -> u64 {
    position
        .debts
        .iter()
        .fold(0u64, |acc, entry| acc.saturating_add(entry.total()))
}

/// Derived snapshot of position health. Never persisted; recomputed fresh
/// from `Position` + current prices on every query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub ltv_bps: u64,
    pub health_factor: HealthFactor,
    /// Liquidation price of the largest-value collateral entry, if any
    pub liquidation_price: Option<u64>,
    pub collateral_value: u64,
    pub debt_value: u64,
    pub available_to_borrow: u64,
    pub healthy: bool,
    pub gad_should_activate: bool,
}

impl HealthStatus {
    /// LTV as a display percentage. Formatting only; gates compare bps.
    pub fn ltv_pct(&self) -> f64 {
        self.ltv_bps as f64 / 100.0
    }
}

/// Compute a full [`HealthStatus`] for a position.
///
/// `gad_start_threshold_bps` is the configured GAD activation threshold,
/// `None` when GAD is unconfigured or disabled. The liquidation price is
/// reported for the collateral entry with the largest current USD value.
pub fn evaluate(
    position: &Position,
    prices: &Prices,
    params: &RiskParams,
    gad_start_threshold_bps: Option<u16>,
) -> HealthStatus {
    let collateral = collateral_value(position, prices);
    let debt = debt_value(position);
    let ltv = ltv_bps(collateral, debt);
    let factor = health_factor(collateral, debt, params.liquidation_threshold_bps);

    let liquidation = primary_collateral(position, prices).and_then(|entry| {
        liquidation_price(
            entry.1,
            entry.0.decimals(),
            debt,
            params.liquidation_threshold_bps,
        )
    });

    let bonus = reputation_bonus_bps(position.reputation.score());
    let max_ltv = effective_max_ltv_bps(params.max_ltv_bps, bonus, params.liquidation_threshold_bps);

    HealthStatus {
        ltv_bps: ltv,
        health_factor: factor,
        liquidation_price: liquidation,
        collateral_value: collateral,
        debt_value: debt,
        available_to_borrow: max_additional_borrow(collateral, debt, max_ltv),
        healthy: factor.is_healthy(),
        gad_should_activate: gad_start_threshold_bps
            .map(|threshold| debt > 0 && ltv >= threshold as u64)
            .unwrap_or(false),
    }
}

/// The collateral entry with the largest current USD value.
pub(crate) fn primary_collateral(
    position: &Position,
    prices: &Prices,
) -> Option<(crate::types::Asset, u64)> {
    position
        .collaterals
        .iter()
        .filter(|entry| entry.amount > 0)
        .map(|entry| (entry.asset, entry.amount, prices.value_of(entry.asset, entry.amount)))
        .max_by_key(|(_, _, value)| *value)
        .map(|(asset, amount, _)| (asset, amount))
}
