//! Execution state and durable transaction history
//!
//! Split in two layers:
//! - `aggregate`: the live, observable state of the execution in flight
//! - `history`: sqlite-backed records that survive restarts, with
//!   resumable background polling of in-flight bridge transfers

mod aggregate;
mod history;

pub use aggregate::{ExecutionAggregate, ExecutionEvent};
pub use history::{HistoryStats, HistoryStore};
