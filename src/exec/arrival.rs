//! Destination-chain arrival detection
//!
//! After the bridge leg completes on the source chain, the funds take an
//! unpredictable amount of time to land in the destination account. This
//! poller watches the destination balance for the expected increase. A
//! timeout here is "still in transit", never a hard failure: the bridge leg
//! itself already succeeded.

use super::CancelToken;
use crate::backend::BridgeApi;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::model::ChainId;

use ethers::types::{Address, U256};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Bridges deliver slightly less than quoted once fees settle; an increase
/// of at least this fraction of the expected amount counts as arrival.
const ARRIVAL_TOLERANCE_BPS: u64 = 9_500;

#[derive(Debug, Clone)]
pub struct ArrivalParams {
    pub chain_id: ChainId,
    pub token: Address,
    pub account: Address,
    /// When set, arrival requires an increase near this amount; when absent,
    /// any positive increase over the baseline counts.
    pub expected_amount: Option<U256>,
    pub poll_interval: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct ArrivalProgress {
    pub attempt: u32,
    pub observed_balance: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrivalOutcome {
    pub detected: bool,
    /// Observed balance increase over the pre-call baseline
    pub amount: U256,
}

/// Poll the destination balance until the expected funds appear or the
/// window closes. Reports each observation through `on_progress`.
pub async fn detect_arrival(
    api: &dyn BridgeApi,
    params: &ArrivalParams,
    cancel: &CancelToken,
    mut on_progress: impl FnMut(ArrivalProgress) + Send,
) -> OrchestratorResult<ArrivalOutcome> {
    let baseline = api
        .token_balance(params.chain_id, params.token, params.account)
        .await?;

    let threshold = params
        .expected_amount
        .map(|expected| expected * U256::from(ARRIVAL_TOLERANCE_BPS) / U256::from(10_000u64));

    debug!(
        chain_id = params.chain_id,
        %baseline,
        "Watching destination balance for arrival"
    );

    let deadline = Instant::now() + params.timeout;
    let mut attempt = 0u32;
    let mut last_increase = U256::zero();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
            _ = sleep(params.poll_interval) => {}
        }
        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }

        // The window is hard: once it closes, no further poll happens
        if Instant::now() >= deadline {
            crate::metrics::record_arrival_timeout();
            info!(attempt, "Arrival window elapsed without detection");
            return Ok(ArrivalOutcome {
                detected: false,
                amount: last_increase,
            });
        }

        attempt += 1;
        let balance = match api
            .token_balance(params.chain_id, params.token, params.account)
            .await
        {
            Ok(balance) => balance,
            Err(e) if e.is_recoverable() => {
                warn!(attempt, "Balance poll failed, will retry: {}", e);
                continue;
            }
            Err(e) => return Err(e),
        };
        on_progress(ArrivalProgress {
            attempt,
            observed_balance: balance,
        });

        last_increase = balance.saturating_sub(baseline);
        let arrived = match threshold {
            Some(threshold) => last_increase >= threshold,
            None => last_increase > U256::zero(),
        };
        if arrived {
            info!(attempt, increase = %last_increase, "Funds arrived on destination chain");
            return Ok(ArrivalOutcome {
                detected: true,
                amount: last_increase,
            });
        }
    }
}
