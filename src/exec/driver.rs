//! Execution driver: takes a committed quote through every step
//!
//! The driver is the single writer of the aggregate and the history record
//! for the duration of an attempt. Sequencing is strict: a failed step
//! aborts everything after it, and precondition failures (an expired quote)
//! return before any state is created at all.
//!
//! A step failure is not an `Err`: the attempt ran and produced a durable
//! failed outcome. `Err` is reserved for preconditions and infrastructure
//! faults where no attempt exists to report on.

use super::arrival::{detect_arrival, ArrivalParams};
use super::cancel::CancelToken;
use super::deposit::{ensure_chain, DepositOrchestrator};
use super::l1::{L1Event, L1Monitor};
use super::wait_for_receipt;
use crate::backend::{BridgeApi, VenueApi};
use crate::error::{ErrorDetails, OrchestratorError, OrchestratorResult};
use crate::model::{
    DepositPhase, ExecStatus, Quote, QuoteStep, StepKind, StepState, StoredTransaction, TxStatus,
};
use crate::signer::TransactionSigner;
use crate::state::{ExecutionAggregate, HistoryStore};

use chrono::Utc;
use ethers::types::Address;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Timing bounds for one execution attempt
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub receipt_poll: Duration,
    pub receipt_timeout: Duration,
    pub arrival_poll: Duration,
    pub arrival_timeout: Duration,
    pub l1_poll: Duration,
    pub l1_timeout: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            receipt_poll: Duration::from_secs(2),
            receipt_timeout: Duration::from_secs(120),
            arrival_poll: Duration::from_secs(10),
            arrival_timeout: Duration::from_secs(900),
            l1_poll: Duration::from_secs(15),
            l1_timeout: Duration::from_secs(600),
        }
    }
}

/// Per-attempt options chosen by the caller
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    /// Continue past the bridge leg into arrival detection, deposit and
    /// ledger confirmation
    pub auto_deposit: bool,
    /// Account funds land in on the destination chain; the signer's own
    /// address when absent
    pub destination_account: Option<Address>,
}

/// Final report of one attempt. Present on both completed and failed runs;
/// `tx_hash` is set whenever the bridge leg got far enough to submit.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub execution_id: String,
    pub status: ExecStatus,
    pub tx_hash: Option<ethers::types::H256>,
    pub error: Option<ErrorDetails>,
}

pub struct ExecutionDriver {
    api: Arc<dyn BridgeApi>,
    venue: Arc<dyn VenueApi>,
    history: Arc<HistoryStore>,
    aggregate: Arc<ExecutionAggregate>,
    config: DriverConfig,
}

impl ExecutionDriver {
    pub fn new(
        api: Arc<dyn BridgeApi>,
        venue: Arc<dyn VenueApi>,
        history: Arc<HistoryStore>,
        aggregate: Arc<ExecutionAggregate>,
        config: DriverConfig,
    ) -> Self {
        ExecutionDriver {
            api,
            venue,
            history,
            aggregate,
            config,
        }
    }

    pub fn aggregate(&self) -> &Arc<ExecutionAggregate> {
        &self.aggregate
    }

    /// Execute a quote from the first step.
    ///
    /// An expired quote returns `Err` before any record or aggregate state
    /// is created.
    pub async fn execute(
        &self,
        quote: &Quote,
        signer: &dyn TransactionSigner,
        options: &ExecutionOptions,
        cancel: &CancelToken,
    ) -> OrchestratorResult<ExecutionOutcome> {
        if quote.is_expired() {
            return Err(OrchestratorError::QuoteExpired);
        }

        let execution_id = Uuid::new_v4().to_string();
        let plan = self.build_plan(quote, options);

        self.aggregate.start_execution(&execution_id, &plan);
        let record = StoredTransaction::new(&execution_id, quote, &plan);
        self.history.upsert(&record).await?;
        crate::metrics::record_execution_started();
        info!(execution_id, steps = plan.len(), "Execution started");

        self.run(quote, &plan, signer, options, cancel, record, &[])
            .await
    }

    /// Re-run a prior failed attempt under the same execution id.
    ///
    /// Steps the prior attempt completed are kept completed and never
    /// re-executed; the quote expiry precondition applies exactly as on a
    /// fresh execution.
    pub async fn retry(
        &self,
        execution_id: &str,
        quote: &Quote,
        signer: &dyn TransactionSigner,
        options: &ExecutionOptions,
        cancel: &CancelToken,
    ) -> OrchestratorResult<ExecutionOutcome> {
        if quote.is_expired() {
            return Err(OrchestratorError::QuoteExpired);
        }

        let record = self.history.get(execution_id).await?.ok_or_else(|| {
            OrchestratorError::TransactionNotFound {
                id: execution_id.to_string(),
            }
        })?;

        let plan = self.build_plan(quote, options);
        self.aggregate.resume_execution(execution_id, &record.steps);
        if let Some(hash) = record.tx_hash {
            self.aggregate
                .set_bridge_result(hash, record.receiving_tx_hash, record.received_amount);
        }

        let completed: Vec<String> = record
            .steps
            .iter()
            .filter(|s| s.state == StepState::Completed)
            .map(|s| s.step_id.clone())
            .collect();

        crate::metrics::record_execution_started();
        info!(
            execution_id,
            skipping = completed.len(),
            "Retrying failed execution"
        );

        self.run(quote, &plan, signer, options, cancel, record, &completed)
            .await
    }

    fn build_plan(&self, quote: &Quote, options: &ExecutionOptions) -> Vec<QuoteStep> {
        let mut plan = quote.steps.clone();
        if options.auto_deposit && !plan.iter().any(|s| s.kind == StepKind::Deposit) {
            plan.push(QuoteStep {
                step_id: "auto-deposit".to_string(),
                kind: StepKind::Deposit,
                chain_id: self.venue.deposit_chain_id(),
            });
        }
        plan
    }

    async fn run(
        &self,
        quote: &Quote,
        plan: &[QuoteStep],
        signer: &dyn TransactionSigner,
        options: &ExecutionOptions,
        cancel: &CancelToken,
        mut record: StoredTransaction,
        skip: &[String],
    ) -> OrchestratorResult<ExecutionOutcome> {
        let started = Instant::now();

        self.aggregate.set_status(ExecStatus::Executing)?;
        self.sync_and_persist(&mut record).await?;

        for step in plan {
            if skip.contains(&step.step_id) {
                debug!(step_id = %step.step_id, "Skipping previously completed step");
                continue;
            }

            let result = if cancel.is_cancelled() {
                Err(OrchestratorError::Cancelled.details())
            } else {
                match step.kind {
                    StepKind::Deposit => {
                        self.run_deposit_stage(quote, step, signer, options, cancel)
                            .await
                    }
                    _ => {
                        self.run_chain_step(quote, step, signer, &mut record, cancel)
                            .await
                    }
                }
            };

            if let Err(details) = result {
                return self.finish_failed(record, step, details).await;
            }
        }

        self.aggregate.complete()?;
        self.sync_and_persist(&mut record).await?;
        crate::metrics::record_execution_completed();
        crate::metrics::record_execution_duration(started.elapsed().as_secs_f64());
        info!(execution_id = %record.id, "Execution completed");

        Ok(ExecutionOutcome {
            execution_id: record.id.clone(),
            status: ExecStatus::Completed,
            tx_hash: record.tx_hash,
            error: None,
        })
    }

    /// One on-chain step: build, sign, submit, confirm
    async fn run_chain_step(
        &self,
        quote: &Quote,
        step: &QuoteStep,
        signer: &dyn TransactionSigner,
        record: &mut StoredTransaction,
        cancel: &CancelToken,
    ) -> Result<(), ErrorDetails> {
        let attempt = async {
            self.aggregate.step_active(&step.step_id)?;
            ensure_chain(signer, step.chain_id).await?;
            if cancel.is_cancelled() {
                return Err(OrchestratorError::Cancelled);
            }

            let tx = self.api.step_transaction(quote, step).await?;
            let hash = signer.send_transaction(tx).await?;
            self.aggregate.step_tx_hash(&step.step_id, hash)?;

            if step.kind == StepKind::Bridge {
                // Persist the hash before confirmation so a crash here can
                // still resume bridge status polling on restart
                self.aggregate.set_bridge_result(hash, None, None);
                record.tx_hash = Some(hash);
                self.sync_and_persist(record).await?;
            }

            wait_for_receipt(
                self.api.as_ref(),
                step.chain_id,
                hash,
                self.config.receipt_poll,
                self.config.receipt_timeout,
            )
            .await?;

            self.aggregate.step_completed(&step.step_id)?;
            Ok(())
        };

        attempt.await.map_err(|e: OrchestratorError| e.details())
    }

    /// The post-bridge stage: arrival detection, venue deposit, ledger
    /// confirmation. Every failure in here happens after the bridge leg
    /// succeeded, so the error shapes all state fund safety explicitly.
    async fn run_deposit_stage(
        &self,
        quote: &Quote,
        step: &QuoteStep,
        signer: &dyn TransactionSigner,
        options: &ExecutionOptions,
        cancel: &CancelToken,
    ) -> Result<(), ErrorDetails> {
        self.aggregate
            .step_active(&step.step_id)
            .map_err(|e| e.details())?;

        let account = options.destination_account.unwrap_or_else(|| signer.address());

        self.aggregate
            .set_deposit_phase(DepositPhase::WaitingArrival, None);
        let arrival_params = ArrivalParams {
            chain_id: quote.destination.chain_id,
            token: quote.destination.address,
            account,
            expected_amount: Some(quote.expected_output),
            poll_interval: self.config.arrival_poll,
            timeout: self.config.arrival_timeout,
        };
        let arrival = detect_arrival(self.api.as_ref(), &arrival_params, cancel, |p| {
            debug!(
                attempt = p.attempt,
                balance = %p.observed_balance,
                "Arrival poll"
            );
        })
        .await
        .map_err(|e| e.details())?;

        if !arrival.detected {
            self.aggregate.set_deposit_phase(DepositPhase::Failed, None);
            return Err(ErrorDetails::arrival_timeout());
        }

        // Deposit what actually arrived, not what was quoted
        let amount = arrival.amount;

        let orchestrator = DepositOrchestrator::new(
            self.api.clone(),
            self.venue.clone(),
            self.config.receipt_poll,
            self.config.receipt_timeout,
        );
        let aggregate = self.aggregate.clone();
        let deposit = orchestrator
            .execute_deposit(signer, amount, account, cancel, |update| {
                aggregate.set_deposit_phase(update.phase, update.tx_hash);
            })
            .await;

        let deposit = match deposit {
            Ok(result) => result,
            Err(OrchestratorError::Cancelled) => {
                return Err(OrchestratorError::Cancelled.details());
            }
            Err(e) => {
                self.aggregate.set_deposit_phase(DepositPhase::Failed, None);
                return Err(ErrorDetails::deposit_failure(&e));
            }
        };

        self.aggregate
            .set_deposit_phase(DepositPhase::L1Monitoring, None);
        let monitor = L1Monitor::new(self.venue.clone(), self.config.l1_poll, self.config.l1_timeout);
        let aggregate = self.aggregate.clone();
        let (handle, task) = monitor.monitor(
            account,
            amount,
            deposit.deposit_tx_hash,
            move |event| {
                if let L1Event::ApproachingTimeout { .. } = event {
                    aggregate
                        .warning("Deposit confirmation is taking longer than expected");
                }
            },
        );

        let mut task = task;
        let joined = tokio::select! {
            _ = cancel.cancelled() => {
                handle.cancel();
                let _ = (&mut task).await;
                return Err(OrchestratorError::Cancelled.details());
            }
            joined = &mut task => joined,
        };

        // The bridge leg and the deposit itself already went through, so any
        // error escaping the monitor stays deposit-scoped
        let outcome = match joined {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(OrchestratorError::Cancelled)) => {
                return Err(OrchestratorError::Cancelled.details());
            }
            Ok(Err(e)) => {
                self.aggregate.set_deposit_phase(DepositPhase::Failed, None);
                return Err(ErrorDetails::deposit_failure(&e));
            }
            Err(e) => {
                self.aggregate.set_deposit_phase(DepositPhase::Failed, None);
                return Err(ErrorDetails::deposit_failure(&OrchestratorError::Internal(
                    e.to_string(),
                )));
            }
        };

        if !outcome.confirmed {
            return Err(ErrorDetails::l1_timeout());
        }

        self.aggregate.set_deposit_confirmed(outcome.balance);
        self.aggregate
            .step_completed(&step.step_id)
            .map_err(|e| e.details())?;
        Ok(())
    }

    async fn finish_failed(
        &self,
        mut record: StoredTransaction,
        step: &QuoteStep,
        details: ErrorDetails,
    ) -> OrchestratorResult<ExecutionOutcome> {
        warn!(
            execution_id = %record.id,
            step_id = %step.step_id,
            code = %details.code,
            "Execution failed"
        );

        // The step may already be terminal if the failure was raised after
        // its own transition; ignore that here
        let _ = self.aggregate.step_failed(&step.step_id, details.clone());
        let _ = self.aggregate.fail(details.clone());
        crate::metrics::record_step_failed(step.kind);
        crate::metrics::record_execution_failed(&details.code);

        self.sync_and_persist(&mut record).await?;

        Ok(ExecutionOutcome {
            execution_id: record.id.clone(),
            status: ExecStatus::Failed,
            tx_hash: record.tx_hash,
            error: Some(details),
        })
    }

    /// Fold the aggregate snapshot into the durable record and write it
    async fn sync_and_persist(&self, record: &mut StoredTransaction) -> OrchestratorResult<()> {
        let snapshot = self.aggregate.snapshot();

        record.steps = snapshot.steps;
        record.tx_hash = snapshot.tx_hash.or(record.tx_hash);
        record.receiving_tx_hash = snapshot.receiving_tx_hash.or(record.receiving_tx_hash);
        record.received_amount = snapshot.received_amount.or(record.received_amount);
        record.deposit_tx_hash = snapshot
            .deposit
            .deposit_tx_hash
            .or(record.deposit_tx_hash);
        record.status = match snapshot.status {
            ExecStatus::Completed => TxStatus::Completed,
            ExecStatus::Failed => TxStatus::Failed,
            ExecStatus::Executing => TxStatus::Executing,
            _ => record.status,
        };
        record.error = snapshot.error;
        record.updated_at = Utc::now();

        self.history.upsert(record).await
    }
}
