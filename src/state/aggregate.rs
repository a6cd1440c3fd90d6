//! Observable execution-state aggregate
//!
//! The single source of truth any consumer reads for one in-flight attempt.
//! Exactly one logical writer mutates it at a time (the active driver or
//! monitor); consumers subscribe to the ordered event stream or take
//! snapshots. Per-step transitions are monotonic and the derived progress
//! value never decreases within one execution.

use crate::error::{ErrorDetails, OrchestratorError, OrchestratorResult};
use crate::model::{
    DepositPhase, ExecStatus, ExecutionState, QuoteStep, StepState, StepStatus,
};

use chrono::Utc;
use ethers::types::{H256, U256};
use std::sync::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

/// Events emitted on every logical transition, at most once each
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    StepUpdate {
        execution_id: String,
        step: StepStatus,
    },
    StatusUpdate {
        execution_id: String,
        status: ExecStatus,
        progress: u8,
    },
    DepositUpdate {
        execution_id: String,
        phase: DepositPhase,
    },
    Warning {
        execution_id: String,
        message: String,
    },
}

pub struct ExecutionAggregate {
    state: RwLock<ExecutionState>,
    events: broadcast::Sender<ExecutionEvent>,
}

impl ExecutionAggregate {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        ExecutionAggregate {
            state: RwLock::new(ExecutionState::idle()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> ExecutionState {
        self.state.read().unwrap().clone()
    }

    /// Install a fresh plan for a new execution attempt
    pub fn start_execution(&self, execution_id: &str, plan: &[QuoteStep]) {
        let mut state = self.state.write().unwrap();
        *state = ExecutionState::idle();
        state.execution_id = execution_id.to_string();
        state.status = ExecStatus::Pending;
        state.steps = plan.iter().map(StepStatus::pending).collect();
        drop(state);

        self.emit_status();
    }

    /// Install a prior snapshot for a retry: completed steps stay completed
    /// and emit no events; failed and pending steps are reset to pending.
    pub fn resume_execution(&self, execution_id: &str, prior_steps: &[StepStatus]) {
        let mut state = self.state.write().unwrap();
        *state = ExecutionState::idle();
        state.execution_id = execution_id.to_string();
        state.status = ExecStatus::Pending;
        state.steps = prior_steps
            .iter()
            .map(|s| {
                let mut step = s.clone();
                if step.state != StepState::Completed {
                    step.state = StepState::Pending;
                    step.error = None;
                }
                step
            })
            .collect();
        Self::recompute(&mut state);
        drop(state);

        self.emit_status();
    }

    pub fn set_status(&self, status: ExecStatus) -> OrchestratorResult<()> {
        {
            let mut state = self.state.write().unwrap();
            if state.status.is_terminal() {
                return Err(OrchestratorError::InvalidTransition {
                    from: state.status.as_str().to_string(),
                    to: status.as_str().to_string(),
                });
            }
            state.status = status;
        }
        self.emit_status();
        Ok(())
    }

    pub fn step_active(&self, step_id: &str) -> OrchestratorResult<()> {
        self.transition_step(step_id, StepState::Active, None, None)
    }

    /// Attach a submission hash to the active step; the caller gets the hash
    /// before confirmation so it can be surfaced immediately.
    pub fn step_tx_hash(&self, step_id: &str, tx_hash: H256) -> OrchestratorResult<()> {
        self.transition_step(step_id, StepState::Active, Some(tx_hash), None)
    }

    pub fn step_completed(&self, step_id: &str) -> OrchestratorResult<()> {
        self.transition_step(step_id, StepState::Completed, None, None)
    }

    pub fn step_failed(&self, step_id: &str, error: ErrorDetails) -> OrchestratorResult<()> {
        self.transition_step(step_id, StepState::Failed, None, Some(error))
    }

    fn transition_step(
        &self,
        step_id: &str,
        to: StepState,
        tx_hash: Option<H256>,
        error: Option<ErrorDetails>,
    ) -> OrchestratorResult<()> {
        let (event, status_changed) = {
            let mut state = self.state.write().unwrap();
            let execution_id = state.execution_id.clone();
            let step = state
                .steps
                .iter_mut()
                .find(|s| s.step_id == step_id)
                .ok_or_else(|| OrchestratorError::TransactionNotFound {
                    id: step_id.to_string(),
                })?;

            // Terminal step states never regress
            if step.state.is_terminal() {
                return Err(OrchestratorError::InvalidTransition {
                    from: step.state.as_str().to_string(),
                    to: to.as_str().to_string(),
                });
            }

            step.state = to;
            if let Some(hash) = tx_hash {
                step.tx_hash = Some(hash);
            }
            if let Some(error) = error {
                step.error = Some(error);
            }
            step.updated_at = Utc::now();
            let step = step.clone();

            let old_progress = state.progress;
            Self::recompute(&mut state);
            let status_changed = state.progress != old_progress;

            (
                ExecutionEvent::StepUpdate { execution_id, step },
                status_changed,
            )
        };

        let _ = self.events.send(event);
        if status_changed {
            self.emit_status();
        }
        Ok(())
    }

    /// Record the bridge-leg result without finishing the execution (the
    /// deposit stage may still be running)
    pub fn set_bridge_result(
        &self,
        tx_hash: H256,
        receiving_tx_hash: Option<H256>,
        received_amount: Option<U256>,
    ) {
        let mut state = self.state.write().unwrap();
        state.tx_hash = Some(tx_hash);
        if receiving_tx_hash.is_some() {
            state.receiving_tx_hash = receiving_tx_hash;
        }
        if received_amount.is_some() {
            state.received_amount = received_amount;
        }
    }

    pub fn set_deposit_phase(&self, phase: DepositPhase, tx_hash: Option<H256>) {
        let execution_id = {
            let mut state = self.state.write().unwrap();
            state.deposit.phase = phase;
            match phase {
                DepositPhase::Approving => {
                    if tx_hash.is_some() {
                        state.deposit.approval_tx_hash = tx_hash;
                    }
                }
                DepositPhase::Depositing => {
                    if tx_hash.is_some() {
                        state.deposit.deposit_tx_hash = tx_hash;
                    }
                }
                _ => {}
            }
            state.execution_id.clone()
        };
        debug!(?phase, "Deposit phase change");
        let _ = self.events.send(ExecutionEvent::DepositUpdate {
            execution_id,
            phase,
        });
    }

    pub fn set_deposit_confirmed(&self, balance: U256) {
        {
            let mut state = self.state.write().unwrap();
            state.deposit.phase = DepositPhase::L1Confirmed;
            state.deposit.confirmed_balance = Some(balance);
        }
        let execution_id = self.state.read().unwrap().execution_id.clone();
        let _ = self.events.send(ExecutionEvent::DepositUpdate {
            execution_id,
            phase: DepositPhase::L1Confirmed,
        });
    }

    pub fn warning(&self, message: &str) {
        let execution_id = self.state.read().unwrap().execution_id.clone();
        let _ = self.events.send(ExecutionEvent::Warning {
            execution_id,
            message: message.to_string(),
        });
    }

    /// Freeze the aggregate as completed
    pub fn complete(&self) -> OrchestratorResult<()> {
        {
            let mut state = self.state.write().unwrap();
            if state.status.is_terminal() {
                return Err(OrchestratorError::InvalidTransition {
                    from: state.status.as_str().to_string(),
                    to: ExecStatus::Completed.as_str().to_string(),
                });
            }
            state.status = ExecStatus::Completed;
            state.progress = 100;
        }
        self.emit_status();
        Ok(())
    }

    /// Freeze the aggregate as failed
    pub fn fail(&self, error: ErrorDetails) -> OrchestratorResult<()> {
        {
            let mut state = self.state.write().unwrap();
            if state.status.is_terminal() {
                return Err(OrchestratorError::InvalidTransition {
                    from: state.status.as_str().to_string(),
                    to: ExecStatus::Failed.as_str().to_string(),
                });
            }
            state.status = ExecStatus::Failed;
            state.error = Some(error);
        }
        self.emit_status();
        Ok(())
    }

    fn emit_status(&self) {
        let (execution_id, status, progress) = {
            let state = self.state.read().unwrap();
            (state.execution_id.clone(), state.status, state.progress)
        };
        let _ = self.events.send(ExecutionEvent::StatusUpdate {
            execution_id,
            status,
            progress,
        });
    }

    /// Derived fields: progress (monotone) and the first non-completed step
    fn recompute(state: &mut ExecutionState) {
        let total = state.steps.len();
        if total == 0 {
            return;
        }
        let completed = state
            .steps
            .iter()
            .filter(|s| s.state == StepState::Completed)
            .count();
        let progress = (completed * 100 / total) as u8;
        state.progress = state.progress.max(progress);
        state.current_step_index = state
            .steps
            .iter()
            .position(|s| s.state != StepState::Completed)
            .unwrap_or(total);
    }
}

impl Default for ExecutionAggregate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StepKind;

    fn plan() -> Vec<QuoteStep> {
        vec![
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
        ]
    }

    #[test]
    fn progress_advances_with_completed_steps() {
        let agg = ExecutionAggregate::new();
        agg.start_execution("exec-1", &plan());

        agg.step_active("s-approval").unwrap();
        agg.step_completed("s-approval").unwrap();
        assert_eq!(agg.snapshot().progress, 50);
        assert_eq!(agg.snapshot().current_step_index, 1);

        agg.step_active("s-bridge").unwrap();
        agg.step_completed("s-bridge").unwrap();
        assert_eq!(agg.snapshot().progress, 100);
    }

    #[test]
    fn terminal_steps_never_regress() {
        let agg = ExecutionAggregate::new();
        agg.start_execution("exec-1", &plan());

        agg.step_active("s-approval").unwrap();
        agg.step_completed("s-approval").unwrap();

        assert!(agg.step_active("s-approval").is_err());
        assert!(agg
            .step_failed(
                "s-approval",
                OrchestratorError::UserRejected.details()
            )
            .is_err());
        assert_eq!(agg.snapshot().steps[0].state, StepState::Completed);
    }

    #[test]
    fn terminal_aggregate_is_frozen() {
        let agg = ExecutionAggregate::new();
        agg.start_execution("exec-1", &plan());
        agg.complete().unwrap();

        assert!(agg.fail(OrchestratorError::UserRejected.details()).is_err());
        assert!(agg.set_status(ExecStatus::Executing).is_err());
        assert_eq!(agg.snapshot().status, ExecStatus::Completed);
    }

    #[test]
    fn resume_keeps_completed_steps_and_resets_failed_ones() {
        let agg = ExecutionAggregate::new();
        agg.start_execution("exec-1", &plan());
        agg.step_active("s-approval").unwrap();
        agg.step_completed("s-approval").unwrap();
        agg.step_active("s-bridge").unwrap();
        agg.step_failed("s-bridge", OrchestratorError::Rpc("boom".to_string()).details())
            .unwrap();
        agg.fail(OrchestratorError::Rpc("boom".to_string()).details())
            .unwrap();

        let prior = agg.snapshot().steps;
        let agg2 = ExecutionAggregate::new();
        agg2.resume_execution("exec-1", &prior);

        let resumed = agg2.snapshot();
        assert_eq!(resumed.steps[0].state, StepState::Completed);
        assert_eq!(resumed.steps[1].state, StepState::Pending);
        assert!(resumed.steps[1].error.is_none());
        assert_eq!(resumed.progress, 50);
        assert_eq!(resumed.current_step_index, 1);
    }

    #[tokio::test]
    async fn events_arrive_in_transition_order() {
        let agg = ExecutionAggregate::new();
        let mut rx = agg.subscribe();
        agg.start_execution("exec-1", &plan());

        agg.step_active("s-approval").unwrap();
        agg.step_completed("s-approval").unwrap();

        // start_execution status, step active, step completed, progress status
        let mut kinds = Vec::new();
        for _ in 0..4 {
            match rx.try_recv().unwrap() {
                ExecutionEvent::StepUpdate { step, .. } => {
                    kinds.push(format!("step:{}", step.state.as_str()))
                }
                ExecutionEvent::StatusUpdate { progress, .. } => {
                    kinds.push(format!("status:{}", progress))
                }
                _ => kinds.push("other".to_string()),
            }
        }
        assert_eq!(
            kinds,
            vec!["status:0", "step:active", "step:completed", "status:50"]
        );
    }
}
