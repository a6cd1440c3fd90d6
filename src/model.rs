//! Core data model: quotes, execution state, step status, durable records
//!
//! A `Quote` is immutable once fetched. `ExecutionState` is the in-memory
//! aggregate for one attempt; `StoredTransaction` is its durable 1:1
//! counterpart, linked by `execution_id`. `DepositState` is a transient
//! sub-machine folded into the aggregate while auto-deposit runs.

use crate::error::ErrorDetails;
use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

/// Chain identifier (EVM numbering)
pub type ChainId = u64;

/// A token on a specific chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRef {
    pub chain_id: ChainId,
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
}

/// Kind of a planned execution step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Approval,
    Swap,
    Bridge,
    Deposit,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Approval => "approval",
            StepKind::Swap => "swap",
            StepKind::Bridge => "bridge",
            StepKind::Deposit => "deposit",
        }
    }
}

/// One planned step inside a quote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteStep {
    pub step_id: String,
    pub kind: StepKind,
    pub chain_id: ChainId,
}

/// Fee breakdown for a quote, in USD
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    pub gas_usd: f64,
    pub protocol_usd: f64,
    pub total_usd: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceImpact {
    Low,
    Medium,
    High,
}

/// A priced, time-limited execution plan. Immutable once fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub quote_id: String,
    pub source: TokenRef,
    pub destination: TokenRef,
    /// Input amount in the source token's smallest unit
    pub amount: U256,
    /// Expected output in the destination token's smallest unit
    pub expected_output: U256,
    pub steps: Vec<QuoteStep>,
    pub fees: FeeBreakdown,
    pub estimated_duration_secs: u64,
    pub price_impact: PriceImpact,
    pub expires_at: DateTime<Utc>,
}

impl Quote {
    /// A quote must never be executed past this point; the driver re-checks
    /// at execution start.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Per-step execution state. Transitions are monotonic:
/// `Pending -> Active -> {Completed | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Active,
    Completed,
    Failed,
}

impl StepState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepState::Completed | StepState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepState::Pending => "pending",
            StepState::Active => "active",
            StepState::Completed => "completed",
            StepState::Failed => "failed",
        }
    }
}

/// Status of one planned step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepStatus {
    pub step_id: String,
    pub kind: StepKind,
    pub state: StepState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<H256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
    pub updated_at: DateTime<Utc>,
}

impl StepStatus {
    pub fn pending(step: &QuoteStep) -> Self {
        StepStatus {
            step_id: step.step_id.clone(),
            kind: step.kind,
            state: StepState::Pending,
            tx_hash: None,
            error: None,
            updated_at: Utc::now(),
        }
    }
}

/// Aggregate status of one execution attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecStatus {
    Idle,
    Pending,
    Executing,
    Completed,
    Failed,
}

impl ExecStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecStatus::Completed | ExecStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecStatus::Idle => "idle",
            ExecStatus::Pending => "pending",
            ExecStatus::Executing => "executing",
            ExecStatus::Completed => "completed",
            ExecStatus::Failed => "failed",
        }
    }
}

/// Phase of the auto-deposit sub-machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositPhase {
    Idle,
    WaitingArrival,
    CheckingBalance,
    Approving,
    Depositing,
    L1Monitoring,
    L1Confirmed,
    Failed,
}

/// State of one deposit attempt. Not persisted on its own; folded into the
/// owning execution record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositState {
    pub phase: DepositPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_tx_hash: Option<H256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deposit_tx_hash: Option<H256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmed_balance: Option<U256>,
}

impl Default for DepositState {
    fn default() -> Self {
        DepositState {
            phase: DepositPhase::Idle,
            approval_tx_hash: None,
            deposit_tx_hash: None,
            confirmed_balance: None,
        }
    }
}

/// In-memory, observable state for one in-flight or recently-finished attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionState {
    pub execution_id: String,
    pub status: ExecStatus,
    pub steps: Vec<StepStatus>,
    /// Index of the first non-completed step
    pub current_step_index: usize,
    /// Derived: completed steps / total steps, 0..=100
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<H256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receiving_tx_hash: Option<H256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received_amount: Option<U256>,
    pub deposit: DepositState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
}

impl ExecutionState {
    pub fn idle() -> Self {
        ExecutionState {
            execution_id: String::new(),
            status: ExecStatus::Idle,
            steps: Vec::new(),
            current_step_index: 0,
            progress: 0,
            tx_hash: None,
            receiving_tx_hash: None,
            received_amount: None,
            deposit: DepositState::default(),
            error: None,
        }
    }
}

/// Durable status of a stored transaction record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

impl TxStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxStatus::Completed | TxStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Executing => "executing",
            TxStatus::Completed => "completed",
            TxStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "executing" => TxStatus::Executing,
            "completed" => TxStatus::Completed,
            "failed" => TxStatus::Failed,
            _ => TxStatus::Pending,
        }
    }
}

/// The durable record of one execution attempt, keyed by a generated id
/// (never an on-chain hash; hashes are unknown at creation time).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredTransaction {
    pub id: String,
    pub source: TokenRef,
    pub destination: TokenRef,
    pub amount: U256,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received_amount: Option<U256>,
    pub steps: Vec<StepStatus>,
    pub status: TxStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<H256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receiving_tx_hash: Option<H256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deposit_tx_hash: Option<H256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredTransaction {
    /// New record, created when the user commits to an execution and before
    /// any signature is requested.
    pub fn new(execution_id: &str, quote: &Quote, steps: &[QuoteStep]) -> Self {
        let now = Utc::now();
        StoredTransaction {
            id: execution_id.to_string(),
            source: quote.source.clone(),
            destination: quote.destination.clone(),
            amount: quote.amount,
            received_amount: None,
            steps: steps.iter().map(StepStatus::pending).collect(),
            status: TxStatus::Pending,
            tx_hash: None,
            receiving_tx_hash: None,
            deposit_tx_hash: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(chain_id: u64) -> TokenRef {
        TokenRef {
            chain_id,
            address: Address::repeat_byte(0x11),
            symbol: "USDC".to_string(),
            decimals: 6,
        }
    }

    fn quote(expires_in_secs: i64) -> Quote {
        Quote {
            quote_id: "q-1".to_string(),
            source: token(1),
            destination: token(42161),
            amount: U256::from(1_000_000u64),
            expected_output: U256::from(995_000u64),
            steps: vec![
                QuoteStep {
                    step_id: "s-approval".to_string(),
                    kind: StepKind::Approval,
                    chain_id: 1,
                },
                QuoteStep {
                    step_id: "s-bridge".to_string(),
                    kind: StepKind::Bridge,
                    chain_id: 1,
                },
            ],
            fees: FeeBreakdown {
                gas_usd: 1.2,
                protocol_usd: 0.3,
                total_usd: 1.5,
            },
            estimated_duration_secs: 120,
            price_impact: PriceImpact::Low,
            expires_at: Utc::now() + chrono::Duration::seconds(expires_in_secs),
        }
    }

    #[test]
    fn quote_expiry() {
        assert!(!quote(60).is_expired());
        assert!(quote(-1).is_expired());
    }

    #[test]
    fn stored_transaction_snapshot_starts_pending() {
        let q = quote(60);
        let record = StoredTransaction::new("exec-1", &q, &q.steps);
        assert_eq!(record.status, TxStatus::Pending);
        assert_eq!(record.steps.len(), 2);
        assert!(record.steps.iter().all(|s| s.state == StepState::Pending));
        assert!(record.tx_hash.is_none());
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            TxStatus::Pending,
            TxStatus::Executing,
            TxStatus::Completed,
            TxStatus::Failed,
        ] {
            assert_eq!(TxStatus::parse(status.as_str()), status);
        }
    }
}
