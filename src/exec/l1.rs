//! L1 confirmation monitoring
//!
//! On-chain confirmation of the deposit transaction is not the end: the
//! venue's internal ledger credits the tradable balance some time later.
//! This monitor polls the ledger until the deposit is reflected, with a
//! cancellable handle for callers that go away before it finishes.
//!
//! The cancellation guarantee is strict: once `MonitorHandle::cancel` is
//! called, no further event is emitted and no state is written, even if a
//! ledger poll was in flight at that moment.

use super::CancelToken;
use crate::backend::VenueApi;
use crate::error::{OrchestratorError, OrchestratorResult};

use ethers::types::{Address, H256, U256};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Fraction of the timeout after which the approaching-timeout warning fires
const WARN_AT_PERCENT: u32 = 80;

/// Events emitted while monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L1Event {
    Progress { attempt: u32, elapsed: Duration },
    /// Emitted once, before expiry, so the caller can pre-emptively
    /// communicate delay
    ApproachingTimeout { elapsed: Duration, timeout: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct L1Outcome {
    pub confirmed: bool,
    /// Latest observed tradable balance
    pub balance: U256,
}

/// Cancellable control over a running monitor
#[derive(Clone)]
pub struct MonitorHandle {
    cancel: CancelToken,
}

impl MonitorHandle {
    /// Idempotent; safe to call after the monitor already finished.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

pub struct L1Monitor {
    venue: Arc<dyn VenueApi>,
    poll_interval: Duration,
    timeout: Duration,
}

impl L1Monitor {
    pub fn new(venue: Arc<dyn VenueApi>, poll_interval: Duration, timeout: Duration) -> Self {
        L1Monitor {
            venue,
            poll_interval,
            timeout,
        }
    }

    /// Start monitoring; resolves once the ledger balance reflects the
    /// deposited amount over its starting point, or the bound elapses
    /// (`confirmed: false`, a recoverable still-pending outcome).
    pub fn monitor(
        &self,
        account: Address,
        expected_increase: U256,
        deposit_tx_hash: H256,
        on_event: impl Fn(L1Event) + Send + Sync + 'static,
    ) -> (MonitorHandle, JoinHandle<OrchestratorResult<L1Outcome>>) {
        let cancel = CancelToken::new();
        let handle = MonitorHandle {
            cancel: cancel.clone(),
        };

        let venue = self.venue.clone();
        let poll_interval = self.poll_interval;
        let timeout = self.timeout;

        let task = tokio::spawn(async move {
            run_monitor(
                venue,
                account,
                expected_increase,
                deposit_tx_hash,
                poll_interval,
                timeout,
                cancel,
                on_event,
            )
            .await
        });

        (handle, task)
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_monitor(
    venue: Arc<dyn VenueApi>,
    account: Address,
    expected_increase: U256,
    deposit_tx_hash: H256,
    poll_interval: Duration,
    timeout: Duration,
    cancel: CancelToken,
    on_event: impl Fn(L1Event) + Send + Sync,
) -> OrchestratorResult<L1Outcome> {
    debug!(
        deposit_tx = %format!("{:#x}", deposit_tx_hash),
        "Monitoring venue ledger for deposit credit"
    );

    let started = Instant::now();

    // A single flaky read must not kill a monitor that the venue could
    // still confirm, so recoverable faults are retried until the bound.
    let baseline = loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
            result = venue.ledger_balance(account) => result,
        };
        match read {
            Ok(balance) => break balance,
            Err(e) if e.is_recoverable() && started.elapsed() < timeout => {
                warn!("Ledger baseline read failed, retrying: {}", e);
                tokio::select! {
                    _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
                    _ = sleep(poll_interval) => {}
                }
            }
            Err(e) => return Err(e),
        }
    };

    let warn_after = timeout * WARN_AT_PERCENT / 100;
    let mut warned = false;
    let mut attempt = 0u32;
    let mut last_balance = baseline;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
            _ = sleep(poll_interval) => {}
        }

        attempt += 1;
        let read = tokio::select! {
            _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
            result = venue.ledger_balance(account) => result,
        };
        // No emissions past this point if a cancel raced the poll
        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }

        let elapsed = started.elapsed();
        match read {
            Ok(balance) => {
                last_balance = balance;
                on_event(L1Event::Progress { attempt, elapsed });

                if balance.saturating_sub(baseline) >= expected_increase {
                    info!(attempt, %balance, "Deposit reflected in tradable balance");
                    return Ok(L1Outcome {
                        confirmed: true,
                        balance,
                    });
                }
            }
            Err(e) if e.is_recoverable() => {
                warn!(attempt, "Ledger poll failed, will retry: {}", e);
            }
            Err(e) => return Err(e),
        }

        if !warned && elapsed >= warn_after {
            warned = true;
            warn!(
                elapsed_secs = elapsed.as_secs(),
                "Ledger confirmation approaching its timeout"
            );
            on_event(L1Event::ApproachingTimeout { elapsed, timeout });
        }

        if elapsed >= timeout {
            crate::metrics::record_l1_timeout();
            return Ok(L1Outcome {
                confirmed: false,
                balance: last_balance,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::TxRequest;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    /// Ledger that credits the deposit after a given number of polls.
    /// One call index can be scripted to fail with a transient error.
    struct SlowLedger {
        calls: AtomicU64,
        credit_after: u64,
        poll_delay: Duration,
        fail_call: Option<u64>,
    }

    #[async_trait]
    impl VenueApi for SlowLedger {
        fn deposit_chain_id(&self) -> u64 {
            42161
        }

        fn deposit_token(&self) -> Address {
            Address::repeat_byte(0x01)
        }

        fn deposit_contract(&self) -> Address {
            Address::repeat_byte(0x02)
        }

        async fn deposit_transaction(
            &self,
            _account: Address,
            _amount: U256,
        ) -> OrchestratorResult<TxRequest> {
            unreachable!()
        }

        async fn approval_transaction(
            &self,
            _owner: Address,
            _amount: U256,
        ) -> OrchestratorResult<TxRequest> {
            unreachable!()
        }

        async fn ledger_balance(&self, _account: Address) -> OrchestratorResult<U256> {
            sleep(self.poll_delay).await;
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_call == Some(n) {
                return Err(OrchestratorError::Rpc("connection reset".to_string()));
            }
            if n >= self.credit_after {
                Ok(U256::from(1_000_000u64))
            } else {
                Ok(U256::zero())
            }
        }
    }

    fn monitor_over(ledger: SlowLedger, timeout: Duration) -> L1Monitor {
        L1Monitor::new(Arc::new(ledger), Duration::from_millis(10), timeout)
    }

    #[tokio::test(start_paused = true)]
    async fn resolves_once_ledger_reflects_deposit() {
        let monitor = monitor_over(
            SlowLedger {
                calls: AtomicU64::new(0),
                credit_after: 3,
                poll_delay: Duration::ZERO,
                fail_call: None,
            },
            Duration::from_secs(10),
        );

        let events: Arc<Mutex<Vec<L1Event>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let (_handle, task) = monitor.monitor(
            Address::repeat_byte(0xaa),
            U256::from(1_000_000u64),
            H256::repeat_byte(0x01),
            move |e| sink.lock().unwrap().push(e),
        );

        let outcome = task.await.unwrap().unwrap();
        assert!(outcome.confirmed);
        assert_eq!(outcome.balance, U256::from(1_000_000u64));
        assert!(!events.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_ledger_faults_do_not_abort_the_monitor() {
        // Call 0 is the baseline; call 2 drops the connection; the credit
        // still lands on a later poll.
        let monitor = monitor_over(
            SlowLedger {
                calls: AtomicU64::new(0),
                credit_after: 4,
                poll_delay: Duration::ZERO,
                fail_call: Some(2),
            },
            Duration::from_secs(10),
        );

        let (_handle, task) = monitor.monitor(
            Address::repeat_byte(0xaa),
            U256::from(1_000_000u64),
            H256::repeat_byte(0x01),
            |_| {},
        );

        let outcome = task.await.unwrap().unwrap();
        assert!(outcome.confirmed);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_with_recoverable_outcome_and_prior_warning() {
        let monitor = monitor_over(
            SlowLedger {
                calls: AtomicU64::new(0),
                credit_after: u64::MAX,
                poll_delay: Duration::ZERO,
                fail_call: None,
            },
            Duration::from_millis(100),
        );

        let events: Arc<Mutex<Vec<L1Event>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let (_handle, task) = monitor.monitor(
            Address::repeat_byte(0xaa),
            U256::from(1_000_000u64),
            H256::repeat_byte(0x01),
            move |e| sink.lock().unwrap().push(e),
        );

        let outcome = task.await.unwrap().unwrap();
        assert!(!outcome.confirmed);

        let events = events.lock().unwrap();
        let warn_pos = events
            .iter()
            .position(|e| matches!(e, L1Event::ApproachingTimeout { .. }))
            .expect("warning should fire before expiry");
        // At least one progress event after the warning, so the warning is
        // genuinely pre-emptive
        assert!(events.len() > warn_pos);
    }

    #[tokio::test]
    async fn cancellation_suppresses_all_subsequent_writes() {
        // Real time: the in-flight poll takes 50ms, cancel lands mid-poll
        let monitor = monitor_over(
            SlowLedger {
                calls: AtomicU64::new(0),
                credit_after: u64::MAX,
                poll_delay: Duration::from_millis(50),
                fail_call: None,
            },
            Duration::from_secs(60),
        );

        let events: Arc<Mutex<Vec<L1Event>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let (handle, task) = monitor.monitor(
            Address::repeat_byte(0xaa),
            U256::from(1_000_000u64),
            H256::repeat_byte(0x01),
            move |e| sink.lock().unwrap().push(e),
        );

        tokio::time::sleep(Duration::from_millis(15)).await;
        handle.cancel();
        handle.cancel(); // idempotent

        let result = task.await.unwrap();
        assert!(matches!(result, Err(OrchestratorError::Cancelled)));

        let observed = events.lock().unwrap().len();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(events.lock().unwrap().len(), observed);
    }
}
