//! wlk-runtime
//!
//! Refresh orchestration around the pure reconciliation core:
//!
//! - outbound and inbound transfer pages are fetched concurrently
//! - receipt lookups run with bounded concurrency and are collected into
//!   a map *before* the reconciliation pass, so the pass itself has no
//!   suspension points
//! - a re-entrancy flag makes a refresh-while-refreshing a no-op
//! - a failed transfer fetch surfaces to the caller and leaves the
//!   previous snapshot in place; a failed receipt lookup only degrades
//!   the affected Sale group

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use wlk_config::ReconcileConfig;
use wlk_ingest::fee::{is_fee_candidate, sale_anchor_hashes, synthesize_fee};
use wlk_ingest::normalizer::normalize_all;
use wlk_ingest::provider::{
    RawTransfer, Receipt, ReceiptSource, TransferQuery, TransferSource,
};
use wlk_reconcile::{reconcile, summarize};
use wlk_schemas::{LogicalTransaction, ReconcileSummary, TransferEvent};

/// Receipt lookups in flight at once.
pub const DEFAULT_RECEIPT_CONCURRENCY: usize = 6;

/// Hard cap on pages per side, so a provider echoing its own page key
/// cannot loop a refresh forever.
const MAX_PAGES_PER_SIDE: usize = 64;

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

/// One completed reconciliation run over a fresh snapshot of transfers.
/// Nothing is persisted; the next refresh rebuilds everything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileSnapshot {
    pub run_id: Uuid,
    pub address: String,
    pub groups: Vec<LogicalTransaction>,
    pub summary: ReconcileSummary,
    /// Raw records dropped at the normalizer boundary.
    pub rejected_records: usize,
    /// Sale anchors whose receipt lookup failed or came back empty.
    pub degraded_receipts: usize,
    /// Hash of the registry configuration that produced this result.
    pub config_hash: String,
    pub finished_at: DateTime<Utc>,
}

/// Result of asking for a refresh.
#[derive(Debug)]
pub enum RefreshOutcome {
    Completed(ReconcileSnapshot),
    /// Another refresh was already in flight; this request was a no-op.
    AlreadyRunning,
}

/// A transfer-page fetch failed. Retryable; the engine keeps serving the
/// previous snapshot. The only error condition that reaches the caller.
#[derive(Debug)]
pub struct FetchFailure(pub anyhow::Error);

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transfer fetch failed: {:#}", self.0)
    }
}

impl std::error::Error for FetchFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.0.as_ref())
    }
}

// ---------------------------------------------------------------------------
// RefreshEngine
// ---------------------------------------------------------------------------

/// Owns the providers and the last good snapshot; everything else is
/// rebuilt per refresh.
pub struct RefreshEngine<S, R> {
    transfers: S,
    receipts: R,
    config: ReconcileConfig,
    receipt_concurrency: usize,
    in_flight: AtomicBool,
    last: tokio::sync::Mutex<Option<ReconcileSnapshot>>,
}

/// Releases the re-entrancy flag when dropped.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<S: TransferSource, R: ReceiptSource> RefreshEngine<S, R> {
    pub fn new(transfers: S, receipts: R, config: ReconcileConfig) -> Self {
        Self {
            transfers,
            receipts,
            config,
            receipt_concurrency: DEFAULT_RECEIPT_CONCURRENCY,
            in_flight: AtomicBool::new(false),
            last: tokio::sync::Mutex::new(None),
        }
    }

    pub fn with_receipt_concurrency(mut self, n: usize) -> Self {
        self.receipt_concurrency = n.max(1);
        self
    }

    /// The most recent successful snapshot, surviving failed refreshes.
    pub async fn last_snapshot(&self) -> Option<ReconcileSnapshot> {
        self.last.lock().await.clone()
    }

    /// Run one refresh for `address`. A refresh already in flight makes
    /// this a no-op ([`RefreshOutcome::AlreadyRunning`]).
    pub async fn refresh(&self, address: &str) -> Result<RefreshOutcome, FetchFailure> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!(address, "refresh already in flight; ignoring");
            return Ok(RefreshOutcome::AlreadyRunning);
        }
        // Clears the flag on every exit path, including the caller
        // dropping this future mid-run.
        let _gate = InFlightGuard(&self.in_flight);
        let result = self.run_refresh(address).await;

        match result {
            Ok(snapshot) => {
                info!(
                    address,
                    run_id = %snapshot.run_id,
                    groups = snapshot.groups.len(),
                    events = snapshot.summary.event_count,
                    rejected = snapshot.rejected_records,
                    "refresh finished"
                );
                *self.last.lock().await = Some(snapshot.clone());
                Ok(RefreshOutcome::Completed(snapshot))
            }
            Err(err) => {
                warn!(address, error = %format!("{err:#}"), "refresh failed; previous snapshot retained");
                Err(FetchFailure(err))
            }
        }
    }

    async fn run_refresh(&self, address: &str) -> anyhow::Result<ReconcileSnapshot> {
        info!(address, source = self.transfers.source_name(), "refresh started");

        let (outbound, inbound) = tokio::join!(
            self.drain_pages(address, TransferQuery::FromAddress),
            self.drain_pages(address, TransferQuery::ToAddress),
        );
        let mut raws = outbound?;
        raws.extend(inbound?);

        let batch = normalize_all(&raws, address, &self.config);
        if batch.rejected > 0 {
            debug!(rejected = batch.rejected, "records rejected at normalization");
        }

        let hashes = sale_anchor_hashes(&batch.events, &self.config);
        let (receipts, degraded_receipts) = self.prefetch_receipts(&hashes).await;
        let fees = build_fee_legs(&batch.events, &receipts, &self.config);

        let groups = reconcile(batch.events, &fees, &self.config);
        let summary = summarize(&groups);

        Ok(ReconcileSnapshot {
            run_id: Uuid::new_v4(),
            address: address.to_lowercase(),
            groups,
            summary,
            rejected_records: batch.rejected,
            degraded_receipts,
            config_hash: self.config.config_hash(),
            finished_at: Utc::now(),
        })
    }

    /// Drain one side's pagination sequentially.
    async fn drain_pages(
        &self,
        address: &str,
        query: TransferQuery,
    ) -> anyhow::Result<Vec<RawTransfer>> {
        let mut out = Vec::new();
        let mut page_key: Option<String> = None;
        for _ in 0..MAX_PAGES_PER_SIDE {
            let page = self
                .transfers
                .fetch_transfers(address, query, page_key.as_deref())
                .await?;
            debug!(side = ?query, count = page.transfers.len(), "transfer page fetched");
            out.extend(page.transfers);
            match page.page_key {
                Some(k) => page_key = Some(k),
                None => return Ok(out),
            }
        }
        anyhow::bail!("pagination exceeded {MAX_PAGES_PER_SIDE} pages for {query:?}")
    }

    /// Fetch receipts for the given hashes with bounded concurrency.
    /// Individual failures degrade (no fee leg) and are counted, never
    /// propagated.
    async fn prefetch_receipts(
        &self,
        hashes: &BTreeSet<String>,
    ) -> (BTreeMap<String, Receipt>, usize) {
        let results: Vec<(String, anyhow::Result<Option<Receipt>>)> =
            stream::iter(hashes.iter().cloned())
                .map(|hash| async move {
                    let result = self.receipts.fetch_receipt(&hash).await;
                    (hash, result)
                })
                .buffer_unordered(self.receipt_concurrency)
                .collect()
                .await;

        let mut receipts = BTreeMap::new();
        let mut degraded = 0;
        for (hash, result) in results {
            match result {
                Ok(Some(receipt)) => {
                    receipts.insert(hash, receipt);
                }
                Ok(None) => {
                    debug!(hash = %hash, "no receipt on network; fee leg skipped");
                    degraded += 1;
                }
                Err(err) => {
                    warn!(hash = %hash, error = %format!("{err:#}"), "receipt lookup failed; fee leg skipped");
                    degraded += 1;
                }
            }
        }
        (receipts, degraded)
    }
}

/// Synthesize fee legs for every Sale anchor with a fetched receipt,
/// keyed by transaction hash.
fn build_fee_legs(
    events: &[TransferEvent],
    receipts: &BTreeMap<String, Receipt>,
    config: &ReconcileConfig,
) -> BTreeMap<String, TransferEvent> {
    let mut fees = BTreeMap::new();
    for ev in events.iter().filter(|e| is_fee_candidate(e, config)) {
        let Some(hash) = ev.hash.as_deref() else {
            continue;
        };
        if fees.contains_key(hash) {
            continue;
        }
        if let Some(leg) = synthesize_fee(hash, receipts.get(hash), ev.timestamp_ms, config) {
            fees.insert(hash.to_string(), leg);
        }
    }
    fees
}
