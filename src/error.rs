//! Error types for the bridge orchestrator
//!
//! Every failure that crosses a component boundary is classified as
//! recoverable or not, and can be rendered as a structured [`ErrorDetails`]
//! object carrying a machine code, a recovery hint and a plain-language
//! message for the user.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the orchestrator
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Quote expired")]
    QuoteExpired,

    #[error("Quote unavailable: {0}")]
    QuoteUnavailable(String),

    #[error("No signer available")]
    SignerUnavailable,

    #[error("Wrong network: expected chain {expected}, signer is on {actual}")]
    WrongNetwork { expected: u64, actual: u64 },

    #[error("Transaction rejected by user")]
    UserRejected,

    #[error("Insufficient funds on chain {chain_id}")]
    InsufficientFunds { chain_id: u64 },

    #[error("Gas estimation failed: {0}")]
    GasEstimation(String),

    #[error("Stale nonce on chain {chain_id}")]
    StaleNonce { chain_id: u64 },

    #[error("Slippage exceeded")]
    SlippageExceeded,

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Transaction {tx_hash} reverted")]
    Reverted { tx_hash: String },

    #[error("Transaction {id} not found")]
    TransactionNotFound { id: String },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Concrete next action a caller can offer the user after a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    Retry,
    IncreaseSlippage,
    AddFunds,
    FetchNewQuote,
    SwitchNetwork,
    RetryDeposit,
    CheckAgain,
}

/// Structured error shape emitted at component boundaries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub message: String,
    pub code: String,
    pub recoverable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_action: Option<RecoveryAction>,
    pub user_message: String,
}

impl OrchestratorError {
    /// Whether a retry or corrective user action is likely to succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            OrchestratorError::QuoteUnavailable(_)
                | OrchestratorError::WrongNetwork { .. }
                | OrchestratorError::GasEstimation(_)
                | OrchestratorError::StaleNonce { .. }
                | OrchestratorError::SlippageExceeded
                | OrchestratorError::Rpc(_)
                | OrchestratorError::Http(_)
                | OrchestratorError::Timeout { .. }
                | OrchestratorError::InsufficientFunds { .. }
        )
    }

    /// Recovery hint consumed by the caller to decide what affordance to offer
    pub fn recovery_action(&self) -> Option<RecoveryAction> {
        match self {
            OrchestratorError::QuoteExpired => Some(RecoveryAction::FetchNewQuote),
            OrchestratorError::QuoteUnavailable(_) => Some(RecoveryAction::Retry),
            OrchestratorError::WrongNetwork { .. } => Some(RecoveryAction::SwitchNetwork),
            OrchestratorError::InsufficientFunds { .. } => Some(RecoveryAction::AddFunds),
            OrchestratorError::SlippageExceeded => Some(RecoveryAction::IncreaseSlippage),
            OrchestratorError::GasEstimation(_)
            | OrchestratorError::StaleNonce { .. }
            | OrchestratorError::Rpc(_)
            | OrchestratorError::Http(_)
            | OrchestratorError::Timeout { .. } => Some(RecoveryAction::Retry),
            _ => None,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            OrchestratorError::Config(_) => "config",
            OrchestratorError::Storage(_) => "storage",
            OrchestratorError::QuoteExpired => "quote_expired",
            OrchestratorError::QuoteUnavailable(_) => "quote_unavailable",
            OrchestratorError::SignerUnavailable => "signer_unavailable",
            OrchestratorError::WrongNetwork { .. } => "wrong_network",
            OrchestratorError::UserRejected => "user_rejected",
            OrchestratorError::InsufficientFunds { .. } => "insufficient_funds",
            OrchestratorError::GasEstimation(_) => "gas_estimation",
            OrchestratorError::StaleNonce { .. } => "stale_nonce",
            OrchestratorError::SlippageExceeded => "slippage_exceeded",
            OrchestratorError::Rpc(_) => "rpc",
            OrchestratorError::Http(_) => "http",
            OrchestratorError::Timeout { .. } => "timeout",
            OrchestratorError::Reverted { .. } => "reverted",
            OrchestratorError::TransactionNotFound { .. } => "transaction_not_found",
            OrchestratorError::InvalidTransition { .. } => "invalid_transition",
            OrchestratorError::Cancelled => "cancelled",
            OrchestratorError::Internal(_) => "internal",
        }
    }

    /// Plain-language message suitable for direct display
    pub fn user_message(&self) -> String {
        match self {
            OrchestratorError::QuoteExpired => {
                "This quote has expired. Fetch a new quote and try again.".to_string()
            }
            OrchestratorError::QuoteUnavailable(_) => {
                "We could not fetch a price right now. Please try again in a moment.".to_string()
            }
            OrchestratorError::SignerUnavailable => {
                "No wallet is connected. Connect a wallet to continue.".to_string()
            }
            OrchestratorError::WrongNetwork { expected, .. } => format!(
                "Your wallet is on the wrong network. Switch to chain {} and retry.",
                expected
            ),
            OrchestratorError::UserRejected => {
                "The transaction was rejected in your wallet. No funds were moved.".to_string()
            }
            OrchestratorError::InsufficientFunds { .. } => {
                "Your balance is too low to cover this transaction and its fees.".to_string()
            }
            OrchestratorError::SlippageExceeded => {
                "The price moved too much. Increase your slippage tolerance or try again."
                    .to_string()
            }
            OrchestratorError::Timeout { .. } => {
                "The operation is taking longer than expected. It may still complete; check again shortly."
                    .to_string()
            }
            OrchestratorError::Reverted { .. } => {
                "The transaction was rejected by the network. No funds were moved.".to_string()
            }
            OrchestratorError::Rpc(_) | OrchestratorError::Http(_) => {
                "A temporary network error occurred. Please retry.".to_string()
            }
            _ => "Something went wrong. Please try again.".to_string(),
        }
    }

    /// Render as the structured boundary object
    pub fn details(&self) -> ErrorDetails {
        ErrorDetails {
            message: self.to_string(),
            code: self.code().to_string(),
            recoverable: self.is_recoverable(),
            recovery_action: self.recovery_action(),
            user_message: self.user_message(),
        }
    }
}

impl ErrorDetails {
    /// Deposit-stage failure after the bridge leg already completed.
    ///
    /// This is a partial success: funds are safely on the destination chain
    /// and only the deposit needs to be retried. The message must never imply
    /// fund loss.
    pub fn deposit_failure(source: &OrchestratorError) -> Self {
        ErrorDetails {
            message: format!("Deposit failed after bridge completed: {}", source),
            code: "deposit_failed".to_string(),
            recoverable: true,
            recovery_action: Some(RecoveryAction::RetryDeposit),
            user_message: "Your funds arrived safely on the destination chain, but the deposit \
                           into your trading account did not complete. You can retry the deposit \
                           or perform it manually; no funds are at risk."
                .to_string(),
        }
    }

    /// Arrival detection exhausted its window without seeing the funds land.
    ///
    /// The bridge leg itself succeeded, so this is "still in transit", not a
    /// failure of the bridge.
    pub fn arrival_timeout() -> Self {
        ErrorDetails {
            message: "Funds not yet detected on the destination chain".to_string(),
            code: "arrival_timeout".to_string(),
            recoverable: true,
            recovery_action: Some(RecoveryAction::CheckAgain),
            user_message: "The bridge transfer completed but the funds have not appeared on the \
                           destination chain yet. They may still be in transit; check again in a \
                           few minutes."
                .to_string(),
        }
    }

    /// The venue ledger did not reflect the deposit within the bound.
    pub fn l1_timeout() -> Self {
        ErrorDetails {
            message: "Deposit not yet reflected in the trading balance".to_string(),
            code: "l1_timeout".to_string(),
            recoverable: true,
            recovery_action: Some(RecoveryAction::CheckAgain),
            user_message: "Your deposit transaction was mined but the trading balance has not \
                           updated yet. This usually resolves on its own; check again shortly."
                .to_string(),
        }
    }
}

/// Result type for orchestrator operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
