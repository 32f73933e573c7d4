//! Fee leg synthesis.
//!
//! Sales are the one place fee accounting changes what the user sees (net
//! realized proceeds), so receipts are looked up only for Sale-anchor
//! hashes. Given a prefetched receipt, a synthetic outbound native-asset
//! leg is built so the fee participates in grouping like any other leg.
//! A missing receipt simply yields no leg — never an error.

use std::collections::BTreeSet;

use crate::provider::Receipt;
use wlk_config::ReconcileConfig;
use wlk_schemas::{
    Amount, Direction, Role, TransferEvent, NETWORK_FEE_COUNTERPARTY,
};

/// A provisional Sale anchor: outbound non-native token leg whose
/// counterparty is the liquidity pool. Only these get a fee leg.
pub fn is_fee_candidate(e: &TransferEvent, config: &ReconcileConfig) -> bool {
    !e.synthetic
        && e.direction == Direction::Outbound
        && e.role == Role::LiquidityPool
        && !config.is_native_like(&e.token)
}

/// Hashes whose receipts are worth fetching, deduplicated and ordered
/// for deterministic fetch scheduling.
pub fn sale_anchor_hashes(events: &[TransferEvent], config: &ReconcileConfig) -> BTreeSet<String> {
    events
        .iter()
        .filter(|e| is_fee_candidate(e, config))
        .filter_map(|e| e.hash.clone())
        .collect()
}

/// Build the synthetic fee leg for `hash` from a prefetched receipt.
///
/// Returns `None` when the receipt is absent or the fee is zero — the
/// Sale group is still valid without it. The leg's timestamp is the
/// anchor's, so the group's representative timestamp is unaffected.
pub fn synthesize_fee(
    hash: &str,
    receipt: Option<&Receipt>,
    anchor_timestamp_ms: i64,
    config: &ReconcileConfig,
) -> Option<TransferEvent> {
    let fee_raw = receipt?.fee_raw()?;
    if fee_raw == 0 {
        return None;
    }
    let hash = hash.to_lowercase();
    Some(TransferEvent {
        // Prefixed so the fee leg never collides with the on-chain leg
        // sharing the same transaction hash.
        id: format!("fee:{hash}"),
        hash: Some(hash),
        token: config.native_symbol().to_string(),
        direction: Direction::Outbound,
        amount: Amount::new(fee_raw, 18),
        counterparty: NETWORK_FEE_COUNTERPARTY.to_string(),
        role: Role::Unknown,
        timestamp_ms: anchor_timestamp_ms,
        block_number: None,
        synthetic: true,
    })
}
