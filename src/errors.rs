use thiserror::Error;

use crate::types::{Asset, HealthFactor};

/// Errors surfaced by the ledger boundary.
///
/// `Rejected`, `PositionNotFound` and `PriceUnavailable` mean the ledger
/// answered and refused; they are never retried. `Transport` and `Timeout`
/// are transient and eligible for the bounded retry policy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// An attempt exceeded its per-call timeout
    #[error("ledger call timed out (attempt {attempt})")]
    Timeout { attempt: u32 },

    /// All retry attempts exhausted
    #[error("ledger call failed after {attempts} attempt(s): {last}")]
    RetriesExhausted { attempts: u32, last: String },

    /// The ledger processed the action and refused it
    #[error("ledger rejected the action: {0}")]
    Rejected(String),

    /// No position exists for the requested owner
    #[error("position not found")]
    PositionNotFound,

    /// No price quote available for the asset
    #[error("no price available for {0}")]
    PriceUnavailable(Asset),

    /// The call itself failed (network, serialization, ...)
    #[error("transport error: {0}")]
    Transport(String),
}

impl LedgerError {
    /// Whether the bounded retry policy may try this call again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Transport(_) | LedgerError::Timeout { .. })
    }
}

/// Business-rule and validation failures of the control core.
///
/// Every variant except `Ledger` is raised before any ledger call is made
/// and leaves local state untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    /// Out-of-bounds configuration, rejected locally
    #[error("{field} out of range: {value} not in [{min}, {max}]")]
    Validation {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    /// No configuration record exists for the position yet
    #[error("no agent configuration for this position")]
    NotConfigured,

    /// The daily budget would be exceeded
    #[error("daily limit exceeded: used {used} + requested {requested} > limit {limit}")]
    DailyLimitExceeded { used: u64, limit: u64, requested: u64 },

    /// Health factor at or below 1.0
    #[error("position unhealthy: health factor {health_factor}")]
    Unhealthy { health_factor: HealthFactor },

    /// The requested borrow exceeds remaining headroom
    #[error("insufficient headroom: requested {requested} > available {available}")]
    InsufficientHeadroom { requested: u64, available: u64 },

    /// The ledger read/write failed or timed out after retries
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl ControlError {
    /// Create a validation error for an out-of-range field.
    pub fn out_of_range(field: &'static str, value: i64, min: i64, max: i64) -> Self {
        ControlError::Validation {
            field,
            value,
            min,
            max,
        }
    }
}

/// A listener raised an error while consuming an alert.
///
/// Logged and isolated by the alert bus, never propagated to the scheduler.
#[derive(Error, Debug, Clone)]
#[error("alert sink failed: {0}")]
pub struct AlertSinkError(pub String);

pub type Result<T> = std::result::Result<T, ControlError>;
