//! Remote capability boundaries: bridge aggregator and trading venue
//!
//! Both are opaque remote systems; the orchestrator only depends on the
//! operations below. Production implementations live in [`http`]; tests
//! substitute scripted implementations.

pub mod http;

pub use http::{HttpBridgeClient, HttpVenueClient};

use crate::error::OrchestratorResult;
use crate::model::{ChainId, Quote, QuoteStep};
use crate::quote::QuoteRequest;
use crate::signer::TxRequest;
use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

/// Outcome of a mined transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Success,
    Reverted,
}

/// Status of a bridge transfer as reported by the bridge status API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransferStatus {
    /// Source-side tx seen, destination side not yet settled
    Pending,
    /// Transfer settled on the destination chain
    Done {
        #[serde(skip_serializing_if = "Option::is_none")]
        receiving_tx_hash: Option<H256>,
        #[serde(skip_serializing_if = "Option::is_none")]
        received_amount: Option<U256>,
    },
    /// Transfer failed on the bridge side
    Failed { reason: String },
}

/// Quote/execution backend (bridge aggregator)
#[async_trait]
pub trait BridgeApi: Send + Sync {
    /// Price a transfer; returns a time-limited execution plan
    async fn fetch_quote(&self, request: &QuoteRequest) -> OrchestratorResult<Quote>;

    /// Build the signable transaction for one step of a quote
    async fn step_transaction(
        &self,
        quote: &Quote,
        step: &QuoteStep,
    ) -> OrchestratorResult<TxRequest>;

    /// Receipt lookup; `None` means not mined yet
    async fn receipt_status(
        &self,
        chain_id: ChainId,
        tx_hash: H256,
    ) -> OrchestratorResult<Option<ReceiptStatus>>;

    /// Bridge-side status of a transfer, keyed by the source tx hash
    async fn transfer_status(&self, tx_hash: H256) -> OrchestratorResult<TransferStatus>;

    /// ERC-20 balance of `account` on `chain_id`
    async fn token_balance(
        &self,
        chain_id: ChainId,
        token: Address,
        account: Address,
    ) -> OrchestratorResult<U256>;

    /// ERC-20 allowance granted by `owner` to `spender`
    async fn allowance(
        &self,
        chain_id: ChainId,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> OrchestratorResult<U256>;
}

/// Trading-venue deposit surface
#[async_trait]
pub trait VenueApi: Send + Sync {
    /// Chain the venue accepts deposits on
    fn deposit_chain_id(&self) -> ChainId;

    /// Token the venue accepts
    fn deposit_token(&self) -> Address;

    /// The venue's deposit contract (approval spender)
    fn deposit_contract(&self) -> Address;

    /// Build the deposit transaction moving `amount` from `account` into the
    /// trading account
    async fn deposit_transaction(
        &self,
        account: Address,
        amount: U256,
    ) -> OrchestratorResult<TxRequest>;

    /// Build an ERC-20 approval of `amount` for the deposit contract
    async fn approval_transaction(
        &self,
        owner: Address,
        amount: U256,
    ) -> OrchestratorResult<TxRequest>;

    /// Tradable balance in the venue's internal ledger (distinct from any
    /// on-chain balance)
    async fn ledger_balance(&self, account: Address) -> OrchestratorResult<U256>;
}
