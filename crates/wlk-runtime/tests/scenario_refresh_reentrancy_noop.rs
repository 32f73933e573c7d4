//! A refresh requested while one is already in flight must be a no-op,
//! not a second concurrent run.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use wlk_config::ReconcileConfig;
use wlk_ingest::provider::{
    Receipt, ReceiptSource, TransferPage, TransferQuery, TransferSource,
};
use wlk_runtime::{RefreshEngine, RefreshOutcome};

const TRACKED: &str = "0x1111111111111111111111111111111111111111";

/// Empty pages, served slowly, with a call counter.
struct SlowTransfers {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl TransferSource for SlowTransfers {
    fn source_name(&self) -> &'static str {
        "slow-mock"
    }

    async fn fetch_transfers(
        &self,
        _address: &str,
        _query: TransferQuery,
        _page_key: Option<&str>,
    ) -> Result<TransferPage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(150)).await;
        Ok(TransferPage::default())
    }
}

struct NoReceipts;

#[async_trait]
impl ReceiptSource for NoReceipts {
    async fn fetch_receipt(&self, _hash: &str) -> Result<Option<Receipt>> {
        Ok(None)
    }
}

#[tokio::test]
async fn scenario_second_refresh_while_running_is_noop() {
    let calls = Arc::new(AtomicUsize::new(0));
    let engine = Arc::new(RefreshEngine::new(
        SlowTransfers { calls: calls.clone() },
        NoReceipts,
        ReconcileConfig::empty("POL", "WPOL"),
    ));

    let first = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.refresh(TRACKED).await })
    };
    // Let the first refresh reach its (slow) fetch before asking again.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = engine.refresh(TRACKED).await.unwrap();
    assert!(matches!(second, RefreshOutcome::AlreadyRunning));

    let first = first.await.unwrap().unwrap();
    assert!(matches!(first, RefreshOutcome::Completed(_)));

    // Only the first refresh hit the provider: one call per side.
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // With the first refresh done, a new one may start again.
    let third = engine.refresh(TRACKED).await.unwrap();
    assert!(matches!(third, RefreshOutcome::Completed(_)));
}

#[tokio::test]
async fn scenario_cancelled_refresh_releases_the_gate() {
    let calls = Arc::new(AtomicUsize::new(0));
    let engine = Arc::new(RefreshEngine::new(
        SlowTransfers { calls: calls.clone() },
        NoReceipts,
        ReconcileConfig::empty("POL", "WPOL"),
    ));

    // Abort a refresh mid-fetch; the dropped future must not leave the
    // in-flight gate latched.
    let doomed = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.refresh(TRACKED).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    doomed.abort();
    let _ = doomed.await;

    let next = engine.refresh(TRACKED).await.unwrap();
    assert!(matches!(next, RefreshOutcome::Completed(_)));
}
