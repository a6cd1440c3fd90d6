//! Debounced, cached, retried quote fetching
//!
//! `QuotePipeline` is the fetch/cache/retry core; `QuoteFeed` wraps it in a
//! task that coalesces rapid amount edits and keeps the displayed quote
//! fresh with a background refresh tick.

use super::{QuoteParams, QuoteRequest};
use crate::backend::BridgeApi;
use crate::error::{ErrorDetails, OrchestratorResult};
use crate::exec::CancelToken;
use crate::model::Quote;

use dashmap::DashMap;
use ethers::types::Address;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, sleep, Instant};
use tracing::{debug, warn};

/// Tuning for the quote pipeline
#[derive(Debug, Clone)]
pub struct QuoteConfig {
    /// Window for coalescing rapid amount edits
    pub debounce: Duration,
    /// Cached quotes older than this are refetched on access
    pub stale_after: Duration,
    /// Background refresh cadence while a quote is displayed
    pub refresh_interval: Duration,
    /// Transient-failure retry cap
    pub max_retries: u32,
    /// Base backoff delay, doubled per attempt
    pub retry_delay: Duration,
    /// Account substituted in preview mode
    pub placeholder_account: Address,
}

impl Default for QuoteConfig {
    fn default() -> Self {
        QuoteConfig {
            debounce: Duration::from_millis(500),
            stale_after: Duration::from_secs(30),
            refresh_interval: Duration::from_secs(15),
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
            placeholder_account: Address::zero(),
        }
    }
}

struct CachedQuote {
    quote: Quote,
    fetched_at: Instant,
}

/// Fetches quotes with caching by parameter fingerprint and bounded retry
pub struct QuotePipeline {
    api: Arc<dyn BridgeApi>,
    cache: DashMap<String, CachedQuote>,
    config: QuoteConfig,
}

impl QuotePipeline {
    pub fn new(api: Arc<dyn BridgeApi>, config: QuoteConfig) -> Self {
        QuotePipeline {
            api,
            cache: DashMap::new(),
            config,
        }
    }

    /// Get a quote, served from cache while fresh
    pub async fn get_quote(&self, params: &QuoteParams) -> OrchestratorResult<Quote> {
        let fingerprint = params.fingerprint();

        if let Some(cached) = self.cache.get(&fingerprint) {
            if cached.fetched_at.elapsed() < self.config.stale_after && !cached.quote.is_expired()
            {
                crate::metrics::record_quote_cache_hit();
                return Ok(cached.quote.clone());
            }
        }

        self.fetch_fresh(params).await
    }

    /// Fetch from the backend unconditionally, updating the cache
    pub async fn fetch_fresh(&self, params: &QuoteParams) -> OrchestratorResult<Quote> {
        let request = QuoteRequest::resolve(params, self.config.placeholder_account)?;
        let quote = self.fetch_with_retry(&request).await?;

        self.cache.insert(
            params.fingerprint(),
            CachedQuote {
                quote: quote.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(quote)
    }

    async fn fetch_with_retry(&self, request: &QuoteRequest) -> OrchestratorResult<Quote> {
        let mut attempt = 0u32;
        loop {
            match self.api.fetch_quote(request).await {
                Ok(quote) => {
                    crate::metrics::record_quote_fetch(true);
                    return Ok(quote);
                }
                Err(e) => {
                    attempt += 1;
                    if !e.is_recoverable() || attempt >= self.config.max_retries {
                        crate::metrics::record_quote_fetch(false);
                        return Err(e);
                    }
                    let delay = self.config.retry_delay * 2u32.saturating_pow(attempt - 1);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Quote fetch failed, retrying: {}",
                        e
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    /// Drop all cached quotes (e.g. after a settings change)
    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

/// Latest quote (or boundary error) published by a feed
pub type QuoteResult = Result<Quote, ErrorDetails>;

/// Background task coalescing parameter updates into quote fetches
pub struct QuoteFeed {
    params_tx: mpsc::UnboundedSender<QuoteParams>,
    quote_rx: watch::Receiver<Option<QuoteResult>>,
    cancel: CancelToken,
}

impl QuoteFeed {
    /// Spawn the feed task. Amount-only parameter changes are debounced;
    /// any other change fetches immediately. While parameters are set, the
    /// current quote is refreshed on a fixed cadence.
    pub fn spawn(pipeline: Arc<QuotePipeline>) -> Self {
        let (params_tx, params_rx) = mpsc::unbounded_channel();
        let (quote_tx, quote_rx) = watch::channel(None);
        let cancel = CancelToken::new();

        tokio::spawn(Self::run(pipeline, params_rx, quote_tx, cancel.clone()));

        QuoteFeed {
            params_tx,
            quote_rx,
            cancel,
        }
    }

    /// Push new parameters; returns false once the feed is stopped
    pub fn update(&self, params: QuoteParams) -> bool {
        self.params_tx.send(params).is_ok()
    }

    /// Observe the latest published quote
    pub fn subscribe(&self) -> watch::Receiver<Option<QuoteResult>> {
        self.quote_rx.clone()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    async fn run(
        pipeline: Arc<QuotePipeline>,
        mut params_rx: mpsc::UnboundedReceiver<QuoteParams>,
        quote_tx: watch::Sender<Option<QuoteResult>>,
        cancel: CancelToken,
    ) {
        let debounce = pipeline.config.debounce;
        let mut refresh = interval(pipeline.config.refresh_interval);
        let mut current: Option<QuoteParams> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                maybe = params_rx.recv() => {
                    let Some(mut params) = maybe else { break };

                    // Coalesce rapid amount edits; anything else goes out now
                    if current
                        .as_ref()
                        .map_or(false, |c| c.is_amount_only_change(&params))
                    {
                        loop {
                            tokio::select! {
                                _ = cancel.cancelled() => return,
                                _ = sleep(debounce) => break,
                                newer = params_rx.recv() => {
                                    match newer {
                                        Some(p) => {
                                            let restart = params.is_amount_only_change(&p)
                                                || params == p;
                                            params = p;
                                            if !restart {
                                                break;
                                            }
                                        }
                                        None => break,
                                    }
                                }
                            }
                        }
                    }

                    current = Some(params.clone());
                    let result = pipeline.get_quote(&params).await;
                    if cancel.is_cancelled() {
                        return;
                    }
                    let _ = quote_tx.send(Some(result.map_err(|e| e.details())));
                }

                _ = refresh.tick() => {
                    if let Some(params) = current.clone() {
                        debug!("Refreshing displayed quote");
                        let result = pipeline.fetch_fresh(&params).await;
                        if cancel.is_cancelled() {
                            return;
                        }
                        let _ = quote_tx.send(Some(result.map_err(|e| e.details())));
                    }
                }
            }
        }
    }
}
