#![deny(unreachable_pub)]

//! Autonomous risk-management control core for collateralized credit
//! positions.
//!
//! Four components, leaves first: the pure [`health`] calculator, the
//! time-gated [`gad`] deleveraging controller, the rate-limited [`agent`]
//! controller, and the periodic [`monitor`] loop that drives them. State
//! flows one way: ledger snapshots in, action requests out.

// Core modules
pub mod consts;
pub mod errors;
pub mod types;

// Components
pub mod agent;
pub mod alerts;
pub mod gad;
pub mod health;
pub mod ledger;
pub mod monitor;

// Re-exports
pub use agent::{
    auto_repay_amount, AgentConfig, AgentController, AgentSettings, RepayAmount,
    X402PaymentRequest, X402Stats,
};
pub use alerts::{Alert, AlertBus, AlertKind, AlertSeverity, AlertSink, TracingAlertSink};
pub use errors::{AlertSinkError, ControlError, LedgerError, Result};
pub use gad::{CrankOutcome, GadConfig, GadController, GadSettings, GadState, NoActionReason};
pub use health::{
    effective_max_ltv_bps, evaluate, health_factor, liquidation_price, ltv_bps,
    max_additional_borrow, reputation_bonus_bps, HealthStatus,
};
pub use ledger::{
    calculate_backoff_delay, call_with_retry, InMemoryLedger, LedgerAction, LedgerClient,
    PositionSnapshot, RetryConfig,
};
pub use monitor::{MonitorConfig, MonitorHandle, PositionMonitor};
pub use types::{
    day_index, unix_now, AccountId, Asset, CollateralEntry, DebtEntry, HealthFactor, Position,
    Prices, Reputation, RiskParams,
};
