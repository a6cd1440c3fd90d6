//! Durable transaction history with resumable background polling
//!
//! The store is the sole writer of StoredTransaction records. Writes are
//! upserts (merge, never delete-then-recreate) so concurrent readers never
//! observe a momentarily-missing record. Background polling of the bridge
//! status API is keyed by the durable record id, never by an in-memory
//! handle, so a process restart can resume it without duplicating pollers.

use crate::backend::{BridgeApi, TransferStatus};
use crate::error::{ErrorDetails, OrchestratorError, OrchestratorResult};
use crate::exec::CancelToken;
use crate::model::{StepKind, StepState, StoredTransaction, TxStatus};

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ethers::types::{H256, U256};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

struct PollerEntry {
    cancel: CancelToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Counts by durable status, served by the HTTP API
#[derive(Debug, Clone)]
pub struct HistoryStats {
    pub pending: u64,
    pub executing: u64,
    pub completed: u64,
    pub failed: u64,
}

pub struct HistoryStore {
    pool: SqlitePool,
    pollers: DashMap<String, PollerEntry>,
}

impl HistoryStore {
    /// Open (or create) the store at `path`
    pub async fn open(path: &Path) -> OrchestratorResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = HistoryStore {
            pool,
            pollers: DashMap::new(),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    /// In-memory store for tests
    pub async fn in_memory() -> OrchestratorResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(OrchestratorError::Storage)?;
        // A single connection: every pooled connection to :memory: would
        // otherwise see its own empty database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = HistoryStore {
            pool,
            pollers: DashMap::new(),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> OrchestratorResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                destination TEXT NOT NULL,
                amount TEXT NOT NULL,
                received_amount TEXT,
                steps TEXT NOT NULL,
                status TEXT NOT NULL,
                tx_hash TEXT,
                receiving_tx_hash TEXT,
                deposit_tx_hash TEXT,
                error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_transactions_status
            ON transactions (status)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Liveness probe for the readiness endpoint
    pub async fn health_check(&self) -> OrchestratorResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Create or merge a record. `created_at` is preserved on merge.
    pub async fn upsert(&self, record: &StoredTransaction) -> OrchestratorResult<()> {
        let source = to_json(&record.source)?;
        let destination = to_json(&record.destination)?;
        let steps = to_json(&record.steps)?;
        let error = record.error.as_ref().map(to_json).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO transactions
                (id, source, destination, amount, received_amount, steps, status,
                 tx_hash, receiving_tx_hash, deposit_tx_hash, error, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id)
            DO UPDATE SET
                received_amount = $5,
                steps = $6,
                status = $7,
                tx_hash = $8,
                receiving_tx_hash = $9,
                deposit_tx_hash = $10,
                error = $11,
                updated_at = $13
            "#,
        )
        .bind(&record.id)
        .bind(source)
        .bind(destination)
        .bind(record.amount.to_string())
        .bind(record.received_amount.map(|a| a.to_string()))
        .bind(steps)
        .bind(record.status.as_str())
        .bind(record.tx_hash.map(fmt_hash))
        .bind(record.receiving_tx_hash.map(fmt_hash))
        .bind(record.deposit_tx_hash.map(fmt_hash))
        .bind(error)
        .bind(record.created_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, id: &str) -> OrchestratorResult<Option<StoredTransaction>> {
        let row = sqlx::query("SELECT * FROM transactions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_record).transpose()
    }

    /// Recent records, newest first
    pub async fn list(&self, limit: i64) -> OrchestratorResult<Vec<StoredTransaction>> {
        let rows = sqlx::query(
            "SELECT * FROM transactions ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_record).collect()
    }

    /// All records not yet in a terminal status
    pub async fn pending(&self) -> OrchestratorResult<Vec<StoredTransaction>> {
        let rows = sqlx::query(
            "SELECT * FROM transactions WHERE status NOT IN ('completed', 'failed')",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_record).collect()
    }

    /// Drop records older than the retention window, regardless of status
    pub async fn prune(&self, retention: chrono::Duration) -> OrchestratorResult<u64> {
        let cutoff = Utc::now() - retention;
        let result = sqlx::query("DELETE FROM transactions WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        let pruned = result.rows_affected();
        if pruned > 0 {
            info!(pruned, "Pruned aged transaction records");
        }
        Ok(pruned)
    }

    pub async fn stats(&self) -> OrchestratorResult<HistoryStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending') as pending,
                COUNT(*) FILTER (WHERE status = 'executing') as executing,
                COUNT(*) FILTER (WHERE status = 'completed') as completed,
                COUNT(*) FILTER (WHERE status = 'failed') as failed
            FROM transactions
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(HistoryStats {
            pending: row.get::<i64, _>("pending") as u64,
            executing: row.get::<i64, _>("executing") as u64,
            completed: row.get::<i64, _>("completed") as u64,
            failed: row.get::<i64, _>("failed") as u64,
        })
    }

    /// Reattach background polling for every non-terminal record with a
    /// known bridge transaction hash. Safe to call repeatedly: a record
    /// already being polled is skipped. Returns how many pollers were
    /// attached by this call.
    pub async fn resume_pending(
        self: &Arc<Self>,
        api: Arc<dyn BridgeApi>,
        poll_interval: Duration,
    ) -> OrchestratorResult<usize> {
        let pending = self.pending().await?;
        let mut attached = 0;
        for record in pending {
            if let Some(tx_hash) = record.tx_hash {
                if self.attach_poller(record.id.clone(), tx_hash, api.clone(), poll_interval) {
                    attached += 1;
                }
            }
        }
        if attached > 0 {
            info!(attached, "Resumed polling for pending transactions");
        }
        crate::metrics::set_active_pollers(self.pollers.len());
        Ok(attached)
    }

    /// Start one poller keyed by the record id. Returns false when a poller
    /// for that id already exists.
    pub fn attach_poller(
        self: &Arc<Self>,
        record_id: String,
        tx_hash: H256,
        api: Arc<dyn BridgeApi>,
        poll_interval: Duration,
    ) -> bool {
        match self.pollers.entry(record_id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                let cancel = CancelToken::new();
                let store = Arc::clone(self);
                let token = cancel.clone();
                let task = tokio::spawn(async move {
                    store
                        .poll_transfer(record_id, tx_hash, api, poll_interval, token)
                        .await;
                });
                // The handle lands in the map in the same entry operation as
                // the token, so stop_pollers can never observe one without
                // the other
                vacant.insert(PollerEntry {
                    cancel,
                    task: Mutex::new(Some(task)),
                });
                true
            }
        }
    }

    /// Number of records currently being polled
    pub fn active_pollers(&self) -> usize {
        self.pollers.len()
    }

    /// Cancel all pollers and wait for them to wind down
    pub async fn stop_pollers(&self) {
        let ids: Vec<String> = self.pollers.iter().map(|e| e.key().clone()).collect();
        let mut tasks = Vec::new();
        for id in ids {
            if let Some((_, entry)) = self.pollers.remove(&id) {
                entry.cancel.cancel();
                if let Some(task) = entry.task.lock().await.take() {
                    tasks.push(task);
                }
            }
        }
        let _ = futures::future::join_all(tasks).await;
        crate::metrics::set_active_pollers(0);
    }

    async fn poll_transfer(
        self: Arc<Self>,
        record_id: String,
        tx_hash: H256,
        api: Arc<dyn BridgeApi>,
        poll_interval: Duration,
        cancel: CancelToken,
    ) {
        debug!(record_id, tx_hash = %fmt_hash(tx_hash), "Polling bridge status");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(poll_interval) => {}
            }
            if cancel.is_cancelled() {
                break;
            }

            crate::metrics::record_history_poll();
            match api.transfer_status(tx_hash).await {
                Ok(TransferStatus::Pending) => {}
                Ok(TransferStatus::Done {
                    receiving_tx_hash,
                    received_amount,
                }) => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    if let Err(e) = self
                        .mark_transfer_done(&record_id, receiving_tx_hash, received_amount)
                        .await
                    {
                        warn!(record_id, "Failed to record completed transfer: {}", e);
                    }
                    break;
                }
                Ok(TransferStatus::Failed { reason }) => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    if let Err(e) = self.mark_transfer_failed(&record_id, &reason).await {
                        warn!(record_id, "Failed to record failed transfer: {}", e);
                    }
                    break;
                }
                Err(e) => {
                    // Transient; the next tick retries
                    warn!(record_id, "Bridge status poll failed: {}", e);
                }
            }
        }

        self.pollers.remove(&record_id);
        crate::metrics::set_active_pollers(self.pollers.len());
    }

    async fn mark_transfer_done(
        &self,
        record_id: &str,
        receiving_tx_hash: Option<H256>,
        received_amount: Option<U256>,
    ) -> OrchestratorResult<()> {
        let Some(mut record) = self.get(record_id).await? else {
            return Err(OrchestratorError::TransactionNotFound {
                id: record_id.to_string(),
            });
        };
        if record.status.is_terminal() {
            return Ok(());
        }

        for step in &mut record.steps {
            if step.kind == StepKind::Bridge && !step.state.is_terminal() {
                step.state = StepState::Completed;
                step.updated_at = Utc::now();
            }
        }
        record.status = TxStatus::Completed;
        record.receiving_tx_hash = receiving_tx_hash;
        record.received_amount = received_amount;
        info!(record_id, "Bridge transfer settled");
        self.upsert(&record).await
    }

    async fn mark_transfer_failed(&self, record_id: &str, reason: &str) -> OrchestratorResult<()> {
        let Some(mut record) = self.get(record_id).await? else {
            return Err(OrchestratorError::TransactionNotFound {
                id: record_id.to_string(),
            });
        };
        if record.status.is_terminal() {
            return Ok(());
        }

        record.status = TxStatus::Failed;
        record.error = Some(ErrorDetails {
            message: format!("Bridge transfer failed: {}", reason),
            code: "bridge_failed".to_string(),
            recoverable: false,
            recovery_action: None,
            user_message: "The bridge reported this transfer as failed. Contact support if funds \
                           have not been refunded."
                .to_string(),
        });
        warn!(record_id, reason, "Bridge transfer failed");
        self.upsert(&record).await
    }
}

fn fmt_hash(hash: H256) -> String {
    format!("{:#x}", hash)
}

fn parse_hash(s: &str) -> OrchestratorResult<H256> {
    let bytes = hex::decode(s.trim_start_matches("0x"))
        .map_err(|e| OrchestratorError::Internal(format!("Bad stored hash: {}", e)))?;
    if bytes.len() != 32 {
        return Err(OrchestratorError::Internal(format!(
            "Bad stored hash length: {}",
            bytes.len()
        )));
    }
    Ok(H256::from_slice(&bytes))
}

fn to_json<T: serde::Serialize>(value: &T) -> OrchestratorResult<String> {
    serde_json::to_string(value).map_err(|e| OrchestratorError::Internal(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(s: &str) -> OrchestratorResult<T> {
    serde_json::from_str(s).map_err(|e| OrchestratorError::Internal(e.to_string()))
}

fn row_to_record(row: SqliteRow) -> OrchestratorResult<StoredTransaction> {
    let amount: String = row.get("amount");
    let received_amount: Option<String> = row.get("received_amount");
    let status: String = row.get("status");
    let tx_hash: Option<String> = row.get("tx_hash");
    let receiving_tx_hash: Option<String> = row.get("receiving_tx_hash");
    let deposit_tx_hash: Option<String> = row.get("deposit_tx_hash");
    let error: Option<String> = row.get("error");

    Ok(StoredTransaction {
        id: row.get("id"),
        source: from_json(row.get::<&str, _>("source"))?,
        destination: from_json(row.get::<&str, _>("destination"))?,
        amount: U256::from_dec_str(&amount)
            .map_err(|e| OrchestratorError::Internal(format!("Bad stored amount: {}", e)))?,
        received_amount: received_amount
            .map(|a| {
                U256::from_dec_str(&a).map_err(|e| {
                    OrchestratorError::Internal(format!("Bad stored amount: {}", e))
                })
            })
            .transpose()?,
        steps: from_json(row.get::<&str, _>("steps"))?,
        status: TxStatus::parse(&status),
        tx_hash: tx_hash.as_deref().map(parse_hash).transpose()?,
        receiving_tx_hash: receiving_tx_hash.as_deref().map(parse_hash).transpose()?,
        deposit_tx_hash: deposit_tx_hash.as_deref().map(parse_hash).transpose()?,
        error: error.as_deref().map(from_json).transpose()?,
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FeeBreakdown, PriceImpact, Quote, QuoteStep, TokenRef};
    use ethers::types::Address;

    fn sample_record(id: &str) -> StoredTransaction {
        let token = |chain_id| TokenRef {
            chain_id,
            address: Address::repeat_byte(0x11),
            symbol: "USDC".to_string(),
            decimals: 6,
        };
        let quote = Quote {
            quote_id: "q-1".to_string(),
            source: token(1),
            destination: token(42161),
            amount: U256::from(1_000_000u64),
            expected_output: U256::from(995_000u64),
            steps: vec![QuoteStep {
                step_id: "s-bridge".to_string(),
                kind: StepKind::Bridge,
                chain_id: 1,
            }],
            fees: FeeBreakdown {
                gas_usd: 1.0,
                protocol_usd: 0.2,
                total_usd: 1.2,
            },
            estimated_duration_secs: 60,
            price_impact: PriceImpact::Low,
            expires_at: Utc::now() + chrono::Duration::minutes(10),
        };
        StoredTransaction::new(id, &quote, &quote.steps)
    }

    #[tokio::test]
    async fn upsert_and_get_round_trip() {
        let store = HistoryStore::in_memory().await.unwrap();
        let mut record = sample_record("exec-1");
        record.tx_hash = Some(H256::repeat_byte(0xab));
        store.upsert(&record).await.unwrap();

        let loaded = store.get("exec-1").await.unwrap().unwrap();
        assert_eq!(loaded.id, "exec-1");
        assert_eq!(loaded.amount, U256::from(1_000_000u64));
        assert_eq!(loaded.tx_hash, Some(H256::repeat_byte(0xab)));
        assert_eq!(loaded.status, TxStatus::Pending);
        assert_eq!(loaded.steps.len(), 1);
    }

    #[tokio::test]
    async fn merge_preserves_created_at() {
        let store = HistoryStore::in_memory().await.unwrap();
        let mut record = sample_record("exec-1");
        store.upsert(&record).await.unwrap();
        let created = store.get("exec-1").await.unwrap().unwrap().created_at;

        record.status = TxStatus::Executing;
        store.upsert(&record).await.unwrap();

        let loaded = store.get("exec-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, TxStatus::Executing);
        assert_eq!(loaded.created_at, created);
    }

    #[tokio::test]
    async fn pending_excludes_terminal_records() {
        let store = HistoryStore::in_memory().await.unwrap();
        let mut a = sample_record("exec-a");
        let mut b = sample_record("exec-b");
        a.status = TxStatus::Executing;
        b.status = TxStatus::Completed;
        store.upsert(&a).await.unwrap();
        store.upsert(&b).await.unwrap();

        let pending = store.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "exec-a");
    }

    #[tokio::test]
    async fn prune_drops_aged_records_regardless_of_status() {
        let store = HistoryStore::in_memory().await.unwrap();
        let mut old = sample_record("exec-old");
        old.created_at = Utc::now() - chrono::Duration::days(60);
        old.status = TxStatus::Executing;
        store.upsert(&old).await.unwrap();
        store.upsert(&sample_record("exec-new")).await.unwrap();

        let pruned = store.prune(chrono::Duration::days(30)).await.unwrap();
        assert_eq!(pruned, 1);
        assert!(store.get("exec-old").await.unwrap().is_none());
        assert!(store.get("exec-new").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn stats_count_by_status() {
        let store = HistoryStore::in_memory().await.unwrap();
        let mut a = sample_record("exec-a");
        let mut b = sample_record("exec-b");
        a.status = TxStatus::Completed;
        b.status = TxStatus::Failed;
        store.upsert(&a).await.unwrap();
        store.upsert(&b).await.unwrap();
        store.upsert(&sample_record("exec-c")).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.executing, 0);
    }
}
