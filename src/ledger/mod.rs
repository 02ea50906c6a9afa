//! Ledger boundary: the only external dependency of the control core.
//!
//! The ledger holds authoritative balances and prices and executes
//! state-changing actions atomically (fully applied or fully failed).
//! Reads return already-finalized snapshots; staleness is the ledger's
//! contract. Every call may suspend on network I/O and is wrapped in the
//! bounded retry policy from [`retry`].

mod memory;
mod retry;

pub use memory::InMemoryLedger;
pub use retry::{calculate_backoff_delay, call_with_retry, RetryConfig};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agent::AgentSettings;
use crate::errors::LedgerError;
use crate::gad::GadSettings;
use crate::types::{AccountId, Asset, Position, Prices, RiskParams};

/// A state-changing action submitted to the ledger.
///
/// Amounts are fixed-point integers in the asset's declared decimals,
/// never floating point, so the core's accounting cannot drift from the
/// ledger's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LedgerAction {
    Deposit {
        owner: AccountId,
        asset: Asset,
        amount: u64,
    },
    Withdraw {
        owner: AccountId,
        asset: Asset,
        amount: u64,
    },
    Borrow {
        owner: AccountId,
        asset: Asset,
        amount: u64,
    },
    Repay {
        owner: AccountId,
        asset: Asset,
        amount: u64,
    },
    ConfigureAgent {
        owner: AccountId,
        settings: AgentSettings,
    },
    ConfigureGad {
        owner: AccountId,
        settings: GadSettings,
    },
    ExecuteGadStep {
        owner: AccountId,
        collateral_asset: Asset,
        /// Collateral sold, in the asset's declared decimals
        collateral_amount: u64,
        /// Debt reduction applied from the proceeds (6-dec USD)
        debt_reduction_usd: u64,
    },
}

impl LedgerAction {
    /// Short action name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerAction::Deposit { .. } => "deposit",
            LedgerAction::Withdraw { .. } => "withdraw",
            LedgerAction::Borrow { .. } => "borrow",
            LedgerAction::Repay { .. } => "repay",
            LedgerAction::ConfigureAgent { .. } => "configure_agent",
            LedgerAction::ConfigureGad { .. } => "configure_gad",
            LedgerAction::ExecuteGadStep { .. } => "execute_gad_step",
        }
    }
}

/// Client for the ledger/runtime that owns balances and prices.
///
/// Writes either fully succeed or fully fail; the core never assumes
/// success before the ledger confirms it.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Fetch the finalized position for an owner.
    async fn position(&self, owner: &AccountId) -> Result<Position, LedgerError>;

    /// Current price of one whole unit of `asset`, USD with 6 decimals.
    async fn price(&self, asset: Asset) -> Result<u64, LedgerError>;

    /// Risk parameters for a collateral asset.
    async fn risk_params(&self, asset: Asset) -> Result<RiskParams, LedgerError>;

    /// Submit a state-changing action.
    async fn submit(&self, action: LedgerAction) -> Result<(), LedgerError>;

    /// Ledger address holding the position for `owner`.
    ///
    /// Address derivation is the ledger's scheme; the core treats the
    /// result as an opaque key.
    fn position_key(&self, owner: &AccountId) -> AccountId;
}

/// One consistent read of everything the controllers need.
#[derive(Debug, Clone)]
pub struct PositionSnapshot {
    pub position: Position,
    pub prices: Prices,
    /// Risk parameters of the largest-value collateral entry, or defaults
    /// for an unencumbered position
    pub params: RiskParams,
}

/// Read position, prices for its collateral assets, and risk params,
/// each call wrapped in the bounded retry policy.
pub async fn read_snapshot<L: LedgerClient + ?Sized>(
    ledger: &L,
    owner: &AccountId,
    retry: &RetryConfig,
) -> Result<PositionSnapshot, LedgerError> {
    let position = call_with_retry(retry, "position", || ledger.position(owner)).await?;

    let mut prices = Prices::default();
    for entry in &position.collaterals {
        let asset = entry.asset;
        let price = call_with_retry(retry, "price", || ledger.price(asset)).await?;
        prices.insert(asset, price);
    }

    let params = match crate::health::primary_collateral(&position, &prices) {
        Some((asset, _)) => call_with_retry(retry, "risk_params", || ledger.risk_params(asset)).await?,
        None => RiskParams::default(),
    };

    Ok(PositionSnapshot {
        position,
        prices,
        params,
    })
}
