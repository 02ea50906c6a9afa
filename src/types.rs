//! Core value types shared across the control core.
//!
//! All persisted and compared amounts are fixed-point unsigned integers
//! scaled by each asset's declared decimal count. Arithmetic goes through
//! `u128` intermediates; floating point appears only in `Display` impls.

use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::consts::{
    BPS_DENOMINATOR, CBBTC_DECIMALS, DEFAULT_LIQUIDATION_BONUS_BPS,
    DEFAULT_LIQUIDATION_THRESHOLD_BPS, DEFAULT_MAX_LTV_BPS, HEALTH_FACTOR_SCALE, SECONDS_PER_DAY,
    SOL_DECIMALS, USD_DECIMALS,
};

/// Assets recognized by the ledger.
///
/// Collaterals: SOL, cbBTC. Borrowables: USDC, EURC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Asset {
    Sol,
    CbBtc,
    Usdc,
    Eurc,
}

impl Asset {
    /// Declared decimal count used to scale fixed-point amounts.
    pub fn decimals(&self) -> u8 {
        match self {
            Asset::Sol => SOL_DECIMALS,
            Asset::CbBtc => CBBTC_DECIMALS,
            Asset::Usdc | Asset::Eurc => USD_DECIMALS,
        }
    }

    /// `10^decimals`, the unit scale of this asset.
    pub fn scale(&self) -> u64 {
        10u64.pow(self.decimals() as u32)
    }

    pub fn is_collateral(&self) -> bool {
        matches!(self, Asset::Sol | Asset::CbBtc)
    }

    pub fn is_borrowable(&self) -> bool {
        matches!(self, Asset::Usdc | Asset::Eurc)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Asset::Sol => "SOL",
            Asset::CbBtc => "cbBTC",
            Asset::Usdc => "USDC",
            Asset::Eurc => "EURC",
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque 32-byte ledger account identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId([u8; 32]);

impl AccountId {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..")
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountId({self})")
    }
}

/// Per-collateral risk parameters published by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskParams {
    /// Maximum LTV for new borrows (bps)
    pub max_ltv_bps: u16,
    /// LTV at which the position becomes liquidatable (bps)
    pub liquidation_threshold_bps: u16,
    /// Discount granted to liquidators (bps)
    pub liquidation_bonus_bps: u16,
}

impl Default for RiskParams {
    fn default() -> Self {
        Self {
            max_ltv_bps: DEFAULT_MAX_LTV_BPS,
            liquidation_threshold_bps: DEFAULT_LIQUIDATION_THRESHOLD_BPS,
            liquidation_bonus_bps: DEFAULT_LIQUIDATION_BONUS_BPS,
        }
    }
}

/// Single collateral entry of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralEntry {
    pub asset: Asset,
    /// Amount in the asset's declared decimals
    pub amount: u64,
}

/// Single debt entry of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebtEntry {
    pub asset: Asset,
    /// Outstanding principal in the asset's declared decimals
    pub principal: u64,
    /// Interest accrued on top of the principal
    pub accrued_interest: u64,
}

impl DebtEntry {
    /// Principal plus accrued interest.
    pub fn total(&self) -> u64 {
        self.principal.saturating_add(self.accrued_interest)
    }
}

/// Repayment-history summary the ledger keeps per position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reputation {
    pub successful_repayments: u32,
    pub total_repaid_usd: u64,
    pub gad_events: u32,
    pub account_age_days: u32,
}

impl Reputation {
    /// Derived trust score. Repayments build it, deleveraging events burn it.
    pub fn score(&self) -> u32 {
        let base = std::cmp::min(self.successful_repayments.saturating_mul(50), 500);
        let age_bonus = std::cmp::min(self.account_age_days / 30 * 10, 100);
        base.saturating_add(age_bonus)
            .saturating_sub(self.gad_events.saturating_mul(100))
    }
}

/// One lending position: collateral entries, debt entries, reputation.
///
/// Entries never contain duplicate asset keys; updates merge into the
/// existing entry. Vec order is insertion order, which the deterministic
/// oldest-first debt reduction relies on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub owner: AccountId,
    pub collaterals: Vec<CollateralEntry>,
    pub debts: Vec<DebtEntry>,
    pub reputation: Reputation,
    pub last_update: i64,
}

impl Position {
    pub fn new(owner: AccountId) -> Self {
        Self {
            owner,
            collaterals: Vec::new(),
            debts: Vec::new(),
            reputation: Reputation::default(),
            last_update: 0,
        }
    }

    pub fn has_collateral(&self) -> bool {
        self.collaterals.iter().any(|c| c.amount > 0)
    }

    pub fn has_debt(&self) -> bool {
        self.debts.iter().any(|d| d.total() > 0)
    }

    pub fn collateral_amount(&self, asset: Asset) -> u64 {
        self.collaterals
            .iter()
            .find(|c| c.asset == asset)
            .map(|c| c.amount)
            .unwrap_or(0)
    }

    pub fn debt_total(&self, asset: Asset) -> u64 {
        self.debts
            .iter()
            .find(|d| d.asset == asset)
            .map(|d| d.total())
            .unwrap_or(0)
    }

    /// Add collateral, merging into an existing entry for the asset.
    pub fn credit_collateral(&mut self, asset: Asset, amount: u64) {
        match self.collaterals.iter_mut().find(|c| c.asset == asset) {
            Some(entry) => entry.amount = entry.amount.saturating_add(amount),
            None => self.collaterals.push(CollateralEntry { asset, amount }),
        }
    }

    /// Remove collateral. Returns the amount actually removed.
    pub fn debit_collateral(&mut self, asset: Asset, amount: u64) -> u64 {
        match self.collaterals.iter_mut().find(|c| c.asset == asset) {
            Some(entry) => {
                let taken = std::cmp::min(entry.amount, amount);
                entry.amount -= taken;
                taken
            }
            None => 0,
        }
    }

    /// Add borrowed principal, merging into an existing entry for the asset.
    pub fn credit_debt(&mut self, asset: Asset, amount: u64) {
        match self.debts.iter_mut().find(|d| d.asset == asset) {
            Some(entry) => entry.principal = entry.principal.saturating_add(amount),
            None => self.debts.push(DebtEntry {
                asset,
                principal: amount,
                accrued_interest: 0,
            }),
        }
    }

    /// Reduce total debt by `value`, oldest entry first, accrued interest
    /// before principal within each entry. Returns the amount applied.
    pub fn reduce_debt(&mut self, value: u64) -> u64 {
        let mut remaining = value;
        for entry in self.debts.iter_mut() {
            if remaining == 0 {
                break;
            }
            remaining -= reduce_entry(entry, remaining);
        }
        value - remaining
    }

    /// Reduce the debt entry for one asset, interest before principal.
    /// Returns the amount applied.
    pub fn reduce_debt_for(&mut self, asset: Asset, value: u64) -> u64 {
        match self.debts.iter_mut().find(|d| d.asset == asset) {
            Some(entry) => reduce_entry(entry, value),
            None => 0,
        }
    }

    /// Drop entries that have been fully repaid or withdrawn.
    pub fn sweep_empty(&mut self) {
        self.collaterals.retain(|c| c.amount > 0);
        self.debts.retain(|d| d.total() > 0);
    }
}

fn reduce_entry(entry: &mut DebtEntry, value: u64) -> u64 {
    let applied = std::cmp::min(value, entry.total());
    let interest_cut = std::cmp::min(applied, entry.accrued_interest);
    entry.accrued_interest -= interest_cut;
    entry.principal -= applied - interest_cut;
    applied
}

/// Price quotes keyed by asset, USD with 6 decimals per whole unit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Prices {
    quotes: HashMap<Asset, u64>,
}

impl Prices {
    pub fn insert(&mut self, asset: Asset, price_usd_6dec: u64) {
        self.quotes.insert(asset, price_usd_6dec);
    }

    pub fn get(&self, asset: Asset) -> Option<u64> {
        self.quotes.get(&asset).copied()
    }

    /// USD value (6-dec) of `amount` units of `asset`.
    ///
    /// An asset with no quote values at zero, the conservative direction
    /// for every gate that compares against collateral value.
    pub fn value_of(&self, asset: Asset, amount: u64) -> u64 {
        match self.get(asset) {
            Some(price) => mul_div(amount, price, asset.scale()),
            None => 0,
        }
    }
}

/// Fixed-point health factor scaled by [`HEALTH_FACTOR_SCALE`].
///
/// A position is healthy iff the factor is strictly greater than 1.0.
/// `INFINITE` is the no-debt sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HealthFactor(u64);

impl HealthFactor {
    pub const INFINITE: HealthFactor = HealthFactor(u64::MAX);
    pub const ONE: HealthFactor = HealthFactor(HEALTH_FACTOR_SCALE);

    pub fn from_scaled(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw value scaled by [`HEALTH_FACTOR_SCALE`].
    pub fn scaled(&self) -> u64 {
        self.0
    }

    pub fn is_infinite(&self) -> bool {
        self.0 == u64::MAX
    }

    /// Strictly greater than 1.0.
    pub fn is_healthy(&self) -> bool {
        self.0 > HEALTH_FACTOR_SCALE
    }
}

impl fmt::Display for HealthFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_infinite() {
            f.write_str("inf")
        } else {
            write!(f, "{:.4}", self.0 as f64 / HEALTH_FACTOR_SCALE as f64)
        }
    }
}

/// Calendar-day index of a unix timestamp.
///
/// Daily budget windows align on these; counters reset lazily when the
/// index changes, never by a background timer.
pub fn day_index(unix_ts: i64) -> i64 {
    unix_ts.div_euclid(SECONDS_PER_DAY)
}

/// Current unix timestamp in seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// `value * numerator / denominator` through u128, saturating on overflow.
/// A zero denominator yields zero.
pub(crate) fn mul_div(value: u64, numerator: u64, denominator: u64) -> u64 {
    if denominator == 0 {
        return 0;
    }
    let wide = value as u128 * numerator as u128 / denominator as u128;
    std::cmp::min(wide, u64::MAX as u128) as u64
}

/// Convenience: bps fraction of a value.
pub(crate) fn bps_of(value: u64, bps: u64) -> u64 {
    mul_div(value, bps, BPS_DENOMINATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> AccountId {
        AccountId::new([7u8; 32])
    }

    #[test]
    fn test_asset_scales() {
        assert_eq!(Asset::Sol.scale(), 1_000_000_000);
        assert_eq!(Asset::CbBtc.scale(), 100_000_000);
        assert_eq!(Asset::Usdc.scale(), 1_000_000);
        assert!(Asset::Sol.is_collateral());
        assert!(!Asset::Sol.is_borrowable());
        assert!(Asset::Eurc.is_borrowable());
    }

    #[test]
    fn test_credit_collateral_merges_duplicate_asset() {
        let mut position = Position::new(owner());
        position.credit_collateral(Asset::Sol, 100);
        position.credit_collateral(Asset::Sol, 50);
        assert_eq!(position.collaterals.len(), 1);
        assert_eq!(position.collateral_amount(Asset::Sol), 150);
    }

    #[test]
    fn test_credit_debt_merges_duplicate_asset() {
        let mut position = Position::new(owner());
        position.credit_debt(Asset::Usdc, 100);
        position.credit_debt(Asset::Usdc, 25);
        assert_eq!(position.debts.len(), 1);
        assert_eq!(position.debt_total(Asset::Usdc), 125);
    }

    #[test]
    fn test_reduce_debt_oldest_first_interest_before_principal() {
        let mut position = Position::new(owner());
        position.debts.push(DebtEntry {
            asset: Asset::Usdc,
            principal: 100,
            accrued_interest: 20,
        });
        position.debts.push(DebtEntry {
            asset: Asset::Eurc,
            principal: 50,
            accrued_interest: 0,
        });

        // 30 lands fully on the oldest entry: 20 interest, then 10 principal
        let applied = position.reduce_debt(30);
        assert_eq!(applied, 30);
        assert_eq!(position.debts[0].accrued_interest, 0);
        assert_eq!(position.debts[0].principal, 90);
        assert_eq!(position.debts[1].total(), 50);

        // 120 clears the first entry and spills into the second
        let applied = position.reduce_debt(120);
        assert_eq!(applied, 120);
        assert_eq!(position.debts[0].total(), 0);
        assert_eq!(position.debts[1].total(), 20);
    }

    #[test]
    fn test_reduce_debt_caps_at_outstanding() {
        let mut position = Position::new(owner());
        position.credit_debt(Asset::Usdc, 40);
        assert_eq!(position.reduce_debt(100), 40);
        assert!(!position.has_debt());
    }

    #[test]
    fn test_sweep_empty_drops_zeroed_entries() {
        let mut position = Position::new(owner());
        position.credit_collateral(Asset::Sol, 10);
        position.credit_debt(Asset::Usdc, 10);
        position.debit_collateral(Asset::Sol, 10);
        position.reduce_debt(10);
        position.sweep_empty();
        assert!(position.collaterals.is_empty());
        assert!(position.debts.is_empty());
    }

    #[test]
    fn test_reputation_score() {
        let rep = Reputation::default();
        assert_eq!(rep.score(), 0);

        let rep = Reputation {
            successful_repayments: 4,
            account_age_days: 90,
            ..Default::default()
        };
        // 4*50 + 90/30*10 = 230
        assert_eq!(rep.score(), 230);

        let rep = Reputation {
            successful_repayments: 20,
            account_age_days: 365,
            gad_events: 1,
            ..Default::default()
        };
        // capped 500 + capped 100 - 100
        assert_eq!(rep.score(), 500);
    }

    #[test]
    fn test_prices_value_of() {
        let mut prices = Prices::default();
        prices.insert(Asset::Sol, 150_000_000); // $150
        // 2 SOL = $300
        assert_eq!(prices.value_of(Asset::Sol, 2_000_000_000), 300_000_000);
        // no quote -> zero value
        assert_eq!(prices.value_of(Asset::CbBtc, 100_000_000), 0);
    }

    #[test]
    fn test_health_factor_ordering() {
        assert!(HealthFactor::INFINITE.is_healthy());
        assert!(HealthFactor::from_scaled(10_001).is_healthy());
        assert!(!HealthFactor::ONE.is_healthy());
        assert!(!HealthFactor::from_scaled(9_000).is_healthy());
        assert_eq!(format!("{}", HealthFactor::INFINITE), "inf");
        assert_eq!(format!("{}", HealthFactor::from_scaled(15_000)), "1.5000");
    }

    #[test]
    fn test_day_index() {
        assert_eq!(day_index(0), 0);
        assert_eq!(day_index(86_399), 0);
        assert_eq!(day_index(86_400), 1);
        assert_eq!(day_index(2 * 86_400 + 1), 2);
    }

    #[test]
    fn test_mul_div() {
        assert_eq!(mul_div(1_000, 7_500, 10_000), 750);
        assert_eq!(mul_div(u64::MAX, 2, 1), u64::MAX); // saturates
        assert_eq!(mul_div(10, 10, 0), 0);
        assert_eq!(bps_of(1_000_000, 500), 50_000);
    }
}
