//! Deposit orchestration: move arrived funds into the trading account
//!
//! Runs after arrival detection. Approval (when the deposit contract lacks
//! allowance) and the deposit itself each surface their transaction hash
//! through the update callback the instant it is known, so the caller is
//! never silent during a multi-minute operation.

use super::{wait_for_receipt, CancelToken};
use crate::backend::{BridgeApi, VenueApi};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::model::DepositPhase;
use crate::signer::TransactionSigner;

use ethers::types::{Address, H256, U256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Progress report emitted on every phase change and hash attachment
#[derive(Debug, Clone, Copy)]
pub struct DepositUpdate {
    pub phase: DepositPhase,
    pub tx_hash: Option<H256>,
}

#[derive(Debug, Clone, Copy)]
pub struct DepositResult {
    pub approval_tx_hash: Option<H256>,
    pub deposit_tx_hash: H256,
}

pub struct DepositOrchestrator {
    api: Arc<dyn BridgeApi>,
    venue: Arc<dyn VenueApi>,
    receipt_poll: Duration,
    receipt_timeout: Duration,
}

impl DepositOrchestrator {
    pub fn new(
        api: Arc<dyn BridgeApi>,
        venue: Arc<dyn VenueApi>,
        receipt_poll: Duration,
        receipt_timeout: Duration,
    ) -> Self {
        DepositOrchestrator {
            api,
            venue,
            receipt_poll,
            receipt_timeout,
        }
    }

    /// Deposit `amount` from `account` into the trading venue.
    ///
    /// Approvals are requested as infinite so subsequent deposits skip the
    /// approval step entirely.
    pub async fn execute_deposit(
        &self,
        signer: &dyn TransactionSigner,
        amount: U256,
        account: Address,
        cancel: &CancelToken,
        mut on_update: impl FnMut(DepositUpdate) + Send,
    ) -> OrchestratorResult<DepositResult> {
        let chain_id = self.venue.deposit_chain_id();
        let token = self.venue.deposit_token();
        let spender = self.venue.deposit_contract();

        on_update(DepositUpdate {
            phase: DepositPhase::CheckingBalance,
            tx_hash: None,
        });

        ensure_chain(signer, chain_id).await?;
        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }

        let allowance = self.api.allowance(chain_id, token, account, spender).await?;
        let approval_tx_hash = if allowance < amount {
            debug!(%allowance, %amount, "Allowance insufficient, requesting approval");
            on_update(DepositUpdate {
                phase: DepositPhase::Approving,
                tx_hash: None,
            });

            let tx = self.venue.approval_transaction(account, U256::MAX).await?;
            let hash = signer.send_transaction(tx).await?;
            on_update(DepositUpdate {
                phase: DepositPhase::Approving,
                tx_hash: Some(hash),
            });

            wait_for_receipt(
                self.api.as_ref(),
                chain_id,
                hash,
                self.receipt_poll,
                self.receipt_timeout,
            )
            .await?;
            Some(hash)
        } else {
            None
        };

        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }

        on_update(DepositUpdate {
            phase: DepositPhase::Depositing,
            tx_hash: None,
        });

        let tx = self.venue.deposit_transaction(account, amount).await?;
        let deposit_tx_hash = signer.send_transaction(tx).await?;
        on_update(DepositUpdate {
            phase: DepositPhase::Depositing,
            tx_hash: Some(deposit_tx_hash),
        });

        wait_for_receipt(
            self.api.as_ref(),
            chain_id,
            deposit_tx_hash,
            self.receipt_poll,
            self.receipt_timeout,
        )
        .await?;

        info!(deposit_tx = %format!("{:#x}", deposit_tx_hash), "Deposit confirmed on-chain");
        Ok(DepositResult {
            approval_tx_hash,
            deposit_tx_hash,
        })
    }
}

/// Ask the signer to move to `chain_id` when it is elsewhere. A failed or
/// rejected switch surfaces as a distinct wrong-network error.
pub(crate) async fn ensure_chain(
    signer: &dyn TransactionSigner,
    chain_id: u64,
) -> OrchestratorResult<()> {
    let actual = signer.chain_id().await?;
    if actual == chain_id {
        return Ok(());
    }
    signer
        .switch_chain(chain_id)
        .await
        .map_err(|_| OrchestratorError::WrongNetwork {
            expected: chain_id,
            actual,
        })
}
