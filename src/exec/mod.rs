//! Execution layer: step driver, arrival detection, deposit, L1 monitoring

pub mod arrival;
pub mod cancel;
pub mod deposit;
pub mod driver;
pub mod l1;

pub use arrival::{detect_arrival, ArrivalOutcome, ArrivalParams, ArrivalProgress};
pub use cancel::CancelToken;
pub use deposit::{DepositOrchestrator, DepositResult, DepositUpdate};
pub use driver::{DriverConfig, ExecutionDriver, ExecutionOptions, ExecutionOutcome};
pub use l1::{L1Event, L1Monitor, L1Outcome, MonitorHandle};

use crate::backend::{BridgeApi, ReceiptStatus};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::model::ChainId;
use ethers::types::H256;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Poll a receipt until the transaction is mined or the bound elapses.
///
/// Timeouts here are hard bounds, not retries; the caller decides whether to
/// re-attempt.
pub(crate) async fn wait_for_receipt(
    api: &dyn BridgeApi,
    chain_id: ChainId,
    tx_hash: H256,
    poll_interval: Duration,
    timeout: Duration,
) -> OrchestratorResult<()> {
    let deadline = Instant::now() + timeout;
    loop {
        match api.receipt_status(chain_id, tx_hash).await? {
            Some(ReceiptStatus::Success) => return Ok(()),
            Some(ReceiptStatus::Reverted) => {
                return Err(OrchestratorError::Reverted {
                    tx_hash: format!("{:#x}", tx_hash),
                })
            }
            None => {}
        }
        if Instant::now() >= deadline {
            return Err(OrchestratorError::Timeout {
                operation: format!("confirmation of {:#x}", tx_hash),
            });
        }
        sleep(poll_interval).await;
    }
}
