//! Cross-chain bridge transaction orchestrator
//!
//! Takes a user intent (move token X on chain A into a trading balance on
//! venue V) through quoting, step-by-step on-chain execution, destination
//! arrival detection, venue deposit and ledger confirmation, with durable
//! history that survives restarts.
//!
//! The library is the embeddable core; the binary wraps it in a daemon with
//! an HTTP API and Prometheus metrics.

pub mod api;
pub mod backend;
pub mod config;
pub mod error;
pub mod exec;
pub mod metrics;
pub mod model;
pub mod quote;
pub mod signer;
pub mod state;

pub use error::{ErrorDetails, OrchestratorError, OrchestratorResult, RecoveryAction};
pub use exec::{
    CancelToken, DriverConfig, ExecutionDriver, ExecutionOptions, ExecutionOutcome,
};
pub use model::{ExecStatus, Quote, StoredTransaction, TxStatus};
pub use quote::{QuoteConfig, QuoteFeed, QuoteParams, QuotePipeline};
pub use state::{ExecutionAggregate, ExecutionEvent, HistoryStore};
