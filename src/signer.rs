//! Transaction-signing capability consumed by the orchestrator
//!
//! The orchestrator never holds keys itself; it drives whatever signer the
//! embedding application provides. Implementations must attempt a chain
//! switch when asked and raise a distinguishable error if the switch fails.

use crate::error::OrchestratorResult;
use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};

/// A transaction to be signed and submitted
#[derive(Debug, Clone, PartialEq)]
pub struct TxRequest {
    pub to: Address,
    pub data: Bytes,
    pub value: Option<U256>,
    pub gas_limit: Option<U256>,
    pub chain_id: Option<u64>,
}

impl TxRequest {
    pub fn new(to: Address, data: Bytes) -> Self {
        TxRequest {
            to,
            data,
            value: None,
            gas_limit: None,
            chain_id: None,
        }
    }

    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = Some(chain_id);
        self
    }
}

/// Signing capability: address, active chain, submission
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    /// The account that will sign
    fn address(&self) -> Address;

    /// Chain the signer is currently connected to
    async fn chain_id(&self) -> OrchestratorResult<u64>;

    /// Request a switch to another chain. Errors here surface to the caller
    /// as a wrong-network condition.
    async fn switch_chain(&self, chain_id: u64) -> OrchestratorResult<()>;

    /// Sign and submit; resolves with the transaction hash at submission
    /// time, before confirmation.
    async fn send_transaction(&self, tx: TxRequest) -> OrchestratorResult<H256>;
}
