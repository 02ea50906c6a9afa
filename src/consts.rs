//! Protocol-wide constants and configuration bounds.

/// Basis points denominator (100% = 10_000).
pub const BPS_DENOMINATOR: u64 = 10_000;

/// USD values carry 6 decimals.
pub const USD_DECIMALS: u8 = 6;
pub const USD_MULTIPLIER: u64 = 1_000_000;

/// Native SOL carries 9 decimals.
pub const SOL_DECIMALS: u8 = 9;
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// cbBTC carries 8 decimals.
pub const CBBTC_DECIMALS: u8 = 8;

pub const SECONDS_PER_DAY: i64 = 86_400;

/// Default collateral risk parameters (bps).
pub const DEFAULT_MAX_LTV_BPS: u16 = 7_500;
pub const DEFAULT_LIQUIDATION_THRESHOLD_BPS: u16 = 8_000;
pub const DEFAULT_LIQUIDATION_BONUS_BPS: u16 = 500;

/// Bounds accepted by GAD configuration.
pub const GAD_MIN_START_THRESHOLD_BPS: u16 = 5_000;
pub const GAD_MAX_START_THRESHOLD_BPS: u16 = 9_500;
pub const GAD_MIN_STEP_BPS: u16 = 100;
pub const GAD_MAX_STEP_BPS: u16 = 2_000;
pub const GAD_MIN_INTERVAL_SECS: i64 = 300;
pub const GAD_MAX_INTERVAL_SECS: i64 = 86_400;

/// Safety buffer subtracted from the auto-repay trigger when sizing an
/// automatic repayment (bps). Repaying down to trigger − buffer keeps the
/// position from oscillating around the trigger.
pub const AUTO_REPAY_BUFFER_BPS: u16 = 500;

/// Repayments below this are not worth a ledger round trip (6-dec USD).
pub const AUTO_REPAY_DUST_USD: u64 = 1_000_000;

/// Upper bound on a single x402 payment (6-dec USD = 1M USD).
pub const MAX_X402_PAYMENT_USD: u64 = 1_000_000_000_000;

/// Fixed-point scale of [`crate::types::HealthFactor`] (1.0 == 10_000).
pub const HEALTH_FACTOR_SCALE: u64 = 10_000;
