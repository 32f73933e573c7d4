//! The multi-stage grouping algorithm.
//!
//! Stage order is fixed and each stage only scans events not yet placed:
//!
//! - Stage A: claim pairing (reward token leg + bonus native leg)
//! - Stage B: purchase pairing (token in, native payment out)
//! - Stage C: sale pairing (token out, native proceeds in, optional fee)
//! - Stage D: shop payments (single leg by construction)
//! - Stage E: residue (everything else surfaces as `Unmatched`)
//!
//! Determinism: the working copy is sorted by timestamp descending (ties
//! by id ascending) before scanning, which fixes which anchor is visited
//! first; every candidate choice below carries an explicit tie-break.

use std::collections::{BTreeMap, BTreeSet};

use wlk_config::ReconcileConfig;
use wlk_schemas::{
    Direction, LogicalTransaction, ReconcileSummary, Role, TransferEvent, TxKind,
};

/// Group the full event set for an address into logical transactions.
///
/// `fees` holds synthesized fee legs keyed by (lowercased) anchor hash;
/// they join Sale groups as optional enrichment and are never required.
/// Every event in `events` appears in exactly one output group.
pub fn reconcile(
    events: Vec<TransferEvent>,
    fees: &BTreeMap<String, TransferEvent>,
    config: &ReconcileConfig,
) -> Vec<LogicalTransaction> {
    let mut work = events;
    work.sort_by(|a, b| {
        b.timestamp_ms
            .cmp(&a.timestamp_ms)
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut processed: BTreeSet<String> = BTreeSet::new();
    let mut groups: Vec<LogicalTransaction> = Vec::new();

    // Stage A — claim pairing.
    for i in 0..work.len() {
        let anchor = &work[i];
        if processed.contains(&anchor.id) || !is_claim_anchor(anchor, config) {
            continue;
        }
        let anchor = anchor.clone();
        processed.insert(anchor.id.clone());

        let mut legs = vec![anchor.clone()];
        if let Some(partner) = claim_partner(&work, &processed, &anchor, config) {
            processed.insert(partner.id.clone());
            legs.push(partner);
        }
        groups.push(LogicalTransaction::new(TxKind::Claim, legs));
    }

    // Stage B — purchase pairing.
    for i in 0..work.len() {
        let anchor = &work[i];
        if processed.contains(&anchor.id) || !is_purchase_anchor(anchor, config) {
            continue;
        }
        let anchor = anchor.clone();
        processed.insert(anchor.id.clone());

        let mut legs = vec![anchor.clone()];
        if let Some(partner) = purchase_partner(&work, &processed, &anchor, config) {
            processed.insert(partner.id.clone());
            legs.push(partner);
        }
        groups.push(LogicalTransaction::new(TxKind::Purchase, legs));
    }

    // Stage C — sale pairing. The fee leg (prefetched, optional) joins
    // first so a proceeds miss still yields an enriched group.
    for i in 0..work.len() {
        let anchor = &work[i];
        if processed.contains(&anchor.id) || !is_sale_anchor(anchor, config) {
            continue;
        }
        let anchor = anchor.clone();
        processed.insert(anchor.id.clone());

        let fee = anchor
            .hash
            .as_deref()
            .and_then(|h| fees.get(h))
            .filter(|f| !processed.contains(&f.id))
            .cloned();

        let mut legs = vec![anchor.clone()];
        if let Some(partner) = sale_proceeds(&work, &processed, &anchor, config) {
            processed.insert(partner.id.clone());
            legs.push(partner);
        }
        if let Some(fee) = fee {
            processed.insert(fee.id.clone());
            legs.push(fee);
        }
        groups.push(LogicalTransaction::new(TxKind::Sale, legs));
    }

    // Stage D — shop payments, single-leg by construction.
    for i in 0..work.len() {
        let anchor = &work[i];
        if processed.contains(&anchor.id) || !is_shop_anchor(anchor, config) {
            continue;
        }
        processed.insert(anchor.id.clone());
        groups.push(LogicalTransaction::new(
            TxKind::ShopPayment,
            vec![anchor.clone()],
        ));
    }

    // Stage E — residue. Every remaining event surfaces as Unmatched.
    for i in 0..work.len() {
        let ev = &work[i];
        if processed.contains(&ev.id) {
            continue;
        }
        processed.insert(ev.id.clone());
        groups.push(LogicalTransaction::new(TxKind::Unmatched, vec![ev.clone()]));
    }

    groups
}

/// Aggregate display counts over a reconciled group list.
pub fn summarize(groups: &[LogicalTransaction]) -> ReconcileSummary {
    let mut s = ReconcileSummary::default();
    for g in groups {
        s.event_count += g.legs.len();
        match g.kind {
            TxKind::Claim => s.claim_count += 1,
            TxKind::Purchase => s.purchase_count += 1,
            TxKind::Sale => s.sale_count += 1,
            TxKind::ShopPayment => s.shop_count += 1,
            TxKind::Unmatched => s.unmatched_count += 1,
        }
    }
    s
}

// ---------------------------------------------------------------------------
// Anchor predicates
// ---------------------------------------------------------------------------

fn is_claim_anchor(e: &TransferEvent, config: &ReconcileConfig) -> bool {
    e.direction == Direction::Inbound
        && e.role == Role::RewardsDistributor
        && !config.is_native_like(&e.token)
}

fn is_purchase_anchor(e: &TransferEvent, config: &ReconcileConfig) -> bool {
    e.direction == Direction::Inbound
        && e.role == Role::LiquidityPool
        && !config.is_native_like(&e.token)
}

fn is_sale_anchor(e: &TransferEvent, config: &ReconcileConfig) -> bool {
    e.direction == Direction::Outbound
        && e.role == Role::LiquidityPool
        && !config.is_native_like(&e.token)
}

fn is_shop_anchor(e: &TransferEvent, config: &ReconcileConfig) -> bool {
    e.direction == Direction::Outbound
        && e.role == Role::ShopTreasury
        && !config.is_native_like(&e.token)
}

// ---------------------------------------------------------------------------
// Partner search
// ---------------------------------------------------------------------------

fn within_window(a: &TransferEvent, b: &TransferEvent, window_ms: i64) -> bool {
    (a.timestamp_ms - b.timestamp_ms).abs() <= window_ms
}

fn nearness_key(anchor: &TransferEvent, e: &TransferEvent) -> (i64, String) {
    ((e.timestamp_ms - anchor.timestamp_ms).abs(), e.id.clone())
}

/// Claim-bonus tolerance band check, integer micros only. Compared in
/// 100x-scaled space so the bounds never round through division: at
/// bonus 1 ± 20% the band is [80, 120] scaled, which excludes dust.
fn within_claim_bonus(micros: u128, config: &ReconcileConfig) -> bool {
    let bonus = config.claim_bonus_micros;
    let pct = u128::from(config.claim_bonus_tolerance_pct);
    let scaled = micros.saturating_mul(100);
    scaled >= bonus.saturating_mul(100u128.saturating_sub(pct))
        && scaled <= bonus.saturating_mul(100 + pct)
}

/// Stage A partner: inbound native-like leg from the distributor within
/// the window. The known-bonus band is preferred when configured; within
/// a band the nearest-in-time candidate wins (ties by smaller id).
fn claim_partner(
    work: &[TransferEvent],
    processed: &BTreeSet<String>,
    anchor: &TransferEvent,
    config: &ReconcileConfig,
) -> Option<TransferEvent> {
    let candidates: Vec<&TransferEvent> = work
        .iter()
        .filter(|e| {
            !processed.contains(&e.id)
                && e.direction == Direction::Inbound
                && e.role == Role::RewardsDistributor
                && config.is_native_like(&e.token)
                && within_window(e, anchor, config.pair_window_ms)
        })
        .collect();

    if config.claim_bonus_micros > 0 {
        let bonus_hit = candidates
            .iter()
            .filter(|e| within_claim_bonus(e.amount.micros(), config))
            .min_by_key(|e| nearness_key(anchor, e));
        if let Some(c) = bonus_hit {
            return Some((*c).clone());
        }
    }

    candidates
        .into_iter()
        .min_by_key(|e| nearness_key(anchor, e))
        .cloned()
}

/// Stage B partner, in priority order: same hash, then pool-tagged within
/// the window (nearest in time), then any native-like outbound leg within
/// the window with the largest magnitude (payment legs routed through
/// aggregators are not always tagged with the pool's own address).
fn purchase_partner(
    work: &[TransferEvent],
    processed: &BTreeSet<String>,
    anchor: &TransferEvent,
    config: &ReconcileConfig,
) -> Option<TransferEvent> {
    let eligible = |e: &TransferEvent| {
        !processed.contains(&e.id)
            && e.direction == Direction::Outbound
            && config.is_native_like(&e.token)
    };

    if let Some(h) = anchor.hash.as_deref() {
        let same_hash = work
            .iter()
            .filter(|e| eligible(e) && e.hash.as_deref() == Some(h))
            .min_by_key(|e| e.id.clone());
        if let Some(c) = same_hash {
            return Some(c.clone());
        }
    }

    let pool_tagged = work
        .iter()
        .filter(|e| {
            eligible(e)
                && e.role == Role::LiquidityPool
                && within_window(e, anchor, config.pair_window_ms)
        })
        .min_by_key(|e| nearness_key(anchor, e));
    if let Some(c) = pool_tagged {
        return Some(c.clone());
    }

    work.iter()
        .filter(|e| eligible(e) && within_window(e, anchor, config.pair_window_ms))
        .max_by(|x, y| {
            x.amount
                .micros()
                .cmp(&y.amount.micros())
                // Equal magnitudes: the smaller id wins.
                .then_with(|| y.id.cmp(&x.id))
        })
        .cloned()
}

/// Stage C proceeds leg: inbound native-like with the anchor's hash, else
/// pool-tagged within the window (nearest in time).
fn sale_proceeds(
    work: &[TransferEvent],
    processed: &BTreeSet<String>,
    anchor: &TransferEvent,
    config: &ReconcileConfig,
) -> Option<TransferEvent> {
    let eligible = |e: &TransferEvent| {
        !processed.contains(&e.id)
            && e.direction == Direction::Inbound
            && config.is_native_like(&e.token)
    };

    if let Some(h) = anchor.hash.as_deref() {
        let same_hash = work
            .iter()
            .filter(|e| eligible(e) && e.hash.as_deref() == Some(h))
            .min_by_key(|e| e.id.clone());
        if let Some(c) = same_hash {
            return Some(c.clone());
        }
    }

    work.iter()
        .filter(|e| {
            eligible(e)
                && e.role == Role::LiquidityPool
                && within_window(e, anchor, config.pair_window_ms)
        })
        .min_by_key(|e| nearness_key(anchor, e))
        .cloned()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use wlk_schemas::Amount;

    const POOL: &str = "0xpool";
    const SHOP: &str = "0xshop";
    const DIST: &str = "0xdist";

    fn cfg() -> ReconcileConfig {
        ReconcileConfig::empty("POL", "WPOL")
            .with_role(POOL, Role::LiquidityPool)
            .with_role(SHOP, Role::ShopTreasury)
            .with_role(DIST, Role::RewardsDistributor)
    }

    fn ev(
        id: &str,
        hash: Option<&str>,
        token: &str,
        direction: Direction,
        counterparty: &str,
        amount: Amount,
        ts: i64,
    ) -> TransferEvent {
        let role = cfg().role_of(counterparty);
        TransferEvent {
            id: id.to_string(),
            hash: hash.map(str::to_string),
            token: token.to_string(),
            direction,
            amount,
            counterparty: counterparty.to_string(),
            role,
            timestamp_ms: ts,
            block_number: None,
            synthetic: false,
        }
    }

    fn faith(units_x100: u128) -> Amount {
        Amount::new(units_x100, 2)
    }

    fn native(raw: u128) -> Amount {
        Amount::new(raw, 18)
    }

    fn no_fees() -> BTreeMap<String, TransferEvent> {
        BTreeMap::new()
    }

    // --- Stage A ---

    #[test]
    fn claim_pairs_token_and_bonus_legs() {
        // The worked example: reward token leg + tiny native bonus leg,
        // same hash, two milliseconds apart.
        let events = vec![
            ev("0xa", Some("0xa"), "D.FAITH", Direction::Inbound, DIST, faith(5000), 1000),
            ev("0xa:native", Some("0xa"), "POL", Direction::Inbound, DIST, native(1_000_000_000_000), 1002),
        ];
        let groups = reconcile(events, &no_fees(), &cfg());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].kind, TxKind::Claim);
        assert_eq!(groups[0].legs.len(), 2);
        assert_eq!(groups[0].representative_timestamp_ms, 1000);
        assert_eq!(groups[0].anchor().token, "D.FAITH");
    }

    #[test]
    fn claim_without_partner_is_single_leg() {
        let events = vec![ev(
            "0xa", Some("0xa"), "D.FAITH", Direction::Inbound, DIST, faith(5000), 1000,
        )];
        let groups = reconcile(events, &no_fees(), &cfg());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].kind, TxKind::Claim);
        assert_eq!(groups[0].legs.len(), 1);
    }

    #[test]
    fn claim_prefers_bonus_band_over_nearer_candidate() {
        // Candidate at the bonus magnitude sits further away in time than
        // a larger native payout; the bonus band still wins.
        let config = cfg().with_claim_bonus(1, 20);
        let events = vec![
            ev("anchor", Some("0xa"), "D.FAITH", Direction::Inbound, DIST, faith(5000), 10_000),
            ev("near-big", Some("0xb"), "POL", Direction::Inbound, DIST, native(2_000_000_000_000_000_000), 11_000),
            ev("far-bonus", Some("0xc"), "POL", Direction::Inbound, DIST, native(1_000_000_000_000), 60_000),
        ];
        let groups = reconcile(events, &no_fees(), &config);
        let claim = groups.iter().find(|g| g.kind == TxKind::Claim).unwrap();
        assert_eq!(claim.legs.len(), 2);
        assert_eq!(claim.legs[1].id, "far-bonus");
        // The big native leg is left for later stages / residue.
        assert!(groups.iter().any(|g| g.kind == TxKind::Unmatched));
    }

    #[test]
    fn claim_bonus_band_excludes_dust_below_tolerance() {
        // A 1-wei dust leg rounds to 0 micros and sits nearer in time;
        // the band [0.8, 1.2] micros must still pick the real bonus leg.
        let config = cfg().with_claim_bonus(1, 20);
        let events = vec![
            ev("anchor", Some("0xa"), "D.FAITH", Direction::Inbound, DIST, faith(5000), 10_000),
            ev("dust", Some("0xb"), "POL", Direction::Inbound, DIST, native(1), 11_000),
            ev("true-bonus", Some("0xc"), "POL", Direction::Inbound, DIST, native(1_000_000_000_000), 510_000),
        ];
        let groups = reconcile(events, &no_fees(), &config);
        let claim = groups.iter().find(|g| g.kind == TxKind::Claim).unwrap();
        assert_eq!(claim.legs.len(), 2);
        assert_eq!(claim.legs[1].id, "true-bonus");
        let unmatched = groups.iter().find(|g| g.kind == TxKind::Unmatched).unwrap();
        assert_eq!(unmatched.anchor().id, "dust");
    }

    #[test]
    fn claim_takes_nearest_when_no_bonus_band_hit() {
        let config = cfg().with_claim_bonus(0, 20);
        let events = vec![
            ev("anchor", Some("0xa"), "D.FAITH", Direction::Inbound, DIST, faith(5000), 10_000),
            ev("near", Some("0xb"), "POL", Direction::Inbound, DIST, native(5), 11_000),
            ev("far", Some("0xc"), "POL", Direction::Inbound, DIST, native(5), 400_000),
        ];
        let groups = reconcile(events, &no_fees(), &config);
        let claim = groups.iter().find(|g| g.kind == TxKind::Claim).unwrap();
        assert_eq!(claim.legs[1].id, "near");
    }

    // --- Stage B ---

    #[test]
    fn purchase_prefers_same_hash_payment() {
        let events = vec![
            ev("buy", Some("0xb"), "D.FAITH", Direction::Inbound, POOL, faith(10_000), 5000),
            ev("pay-same-hash", Some("0xb"), "WPOL", Direction::Outbound, "0xaggregator", native(7), 5000),
            ev("pay-pool-tagged", Some("0xc"), "POL", Direction::Outbound, POOL, native(9), 5100),
        ];
        let groups = reconcile(events, &no_fees(), &cfg());
        let buy = groups.iter().find(|g| g.kind == TxKind::Purchase).unwrap();
        assert_eq!(buy.legs.len(), 2);
        assert_eq!(buy.legs[1].id, "pay-same-hash");
        assert_eq!(buy.group_key, "0xb");
    }

    #[test]
    fn purchase_falls_back_to_pool_tagged_in_window() {
        let events = vec![
            ev("buy", Some("0xb"), "D.FAITH", Direction::Inbound, POOL, faith(10_000), 5000),
            ev("pay", Some("0xc"), "POL", Direction::Outbound, POOL, native(9), 300_000),
        ];
        let groups = reconcile(events, &no_fees(), &cfg());
        let buy = groups.iter().find(|g| g.kind == TxKind::Purchase).unwrap();
        assert_eq!(buy.legs[1].id, "pay");
        // Different hashes: the group key is synthetic.
        assert_eq!(buy.group_key, "grp:buy");
    }

    #[test]
    fn purchase_untagged_fallback_takes_largest_amount() {
        let events = vec![
            ev("buy", Some("0xb"), "D.FAITH", Direction::Inbound, POOL, faith(10_000), 5000),
            ev("small", Some("0xc"), "POL", Direction::Outbound, "0xagg1", native(1_000_000_000_000), 5100),
            ev("large", Some("0xd"), "POL", Direction::Outbound, "0xagg2", native(5_000_000_000_000), 6000),
        ];
        let groups = reconcile(events, &no_fees(), &cfg());
        let buy = groups.iter().find(|g| g.kind == TxKind::Purchase).unwrap();
        assert_eq!(buy.legs[1].id, "large");
    }

    #[test]
    fn purchase_without_payment_leg_is_single_leg() {
        let events = vec![ev(
            "buy", Some("0xb"), "D.FAITH", Direction::Inbound, POOL, faith(10_000), 5000,
        )];
        let groups = reconcile(events, &no_fees(), &cfg());
        assert_eq!(groups[0].kind, TxKind::Purchase);
        assert_eq!(groups[0].legs.len(), 1);
    }

    // --- Stage C ---

    #[test]
    fn sale_groups_proceeds_and_fee() {
        let anchor = ev("sell", Some("0xs"), "D.FAITH", Direction::Outbound, POOL, faith(10_000), 5000);
        let proceeds = ev("sell:in", Some("0xs"), "POL", Direction::Inbound, POOL, native(8), 5000);
        let mut fees = BTreeMap::new();
        let fee_leg = TransferEvent {
            id: "fee:0xs".to_string(),
            hash: Some("0xs".to_string()),
            token: "POL".to_string(),
            direction: Direction::Outbound,
            amount: native(630_000_000_000_000),
            counterparty: wlk_schemas::NETWORK_FEE_COUNTERPARTY.to_string(),
            role: Role::Unknown,
            timestamp_ms: 5000,
            block_number: None,
            synthetic: true,
        };
        fees.insert("0xs".to_string(), fee_leg);

        let groups = reconcile(vec![anchor, proceeds], &fees, &cfg());
        assert_eq!(groups.len(), 1);
        let sale = &groups[0];
        assert_eq!(sale.kind, TxKind::Sale);
        assert_eq!(sale.legs.len(), 3);
        assert_eq!(sale.legs[1].id, "sell:in");
        assert!(sale.legs[2].synthetic);
        assert_eq!(sale.group_key, "0xs");
    }

    #[test]
    fn sale_without_receipt_is_two_legs() {
        let events = vec![
            ev("sell", Some("0xs"), "D.FAITH", Direction::Outbound, POOL, faith(10_000), 5000),
            ev("sell:in", Some("0xs"), "POL", Direction::Inbound, POOL, native(8), 5000),
        ];
        let groups = reconcile(events, &no_fees(), &cfg());
        assert_eq!(groups[0].kind, TxKind::Sale);
        assert_eq!(groups[0].legs.len(), 2);
    }

    #[test]
    fn sale_with_no_proceeds_anywhere_still_counts() {
        let events = vec![ev(
            "sell", Some("0xs"), "D.FAITH", Direction::Outbound, POOL, faith(10_000), 5000,
        )];
        let groups = reconcile(events, &no_fees(), &cfg());
        assert_eq!(groups[0].kind, TxKind::Sale);
        assert_eq!(groups[0].legs.len(), 1);
        assert_eq!(summarize(&groups).sale_count, 1);
    }

    #[test]
    fn sale_proceeds_falls_back_to_pool_tagged_window() {
        let events = vec![
            ev("sell", Some("0xs"), "D.FAITH", Direction::Outbound, POOL, faith(10_000), 5000),
            ev("in", Some("0xt"), "WPOL", Direction::Inbound, POOL, native(8), 100_000),
        ];
        let groups = reconcile(events, &no_fees(), &cfg());
        assert_eq!(groups[0].legs.len(), 2);
        assert_eq!(groups[0].legs[1].id, "in");
    }

    // --- Stage D ---

    #[test]
    fn shop_payment_is_single_leg_even_with_nearby_native_legs() {
        let events = vec![
            ev("shop", Some("0xp"), "D.FAITH", Direction::Outbound, SHOP, faith(2500), 5000),
            ev("noise", Some("0xq"), "POL", Direction::Outbound, "0xsomeone", native(5), 5001),
        ];
        let groups = reconcile(events, &no_fees(), &cfg());
        let shop = groups.iter().find(|g| g.kind == TxKind::ShopPayment).unwrap();
        assert_eq!(shop.legs.len(), 1);
        assert!(groups.iter().any(|g| g.kind == TxKind::Unmatched));
    }

    // --- Stage E / summary ---

    #[test]
    fn residue_surfaces_every_leftover_event() {
        let events = vec![
            ev("x1", Some("0x1"), "USDC", Direction::Inbound, "0xnobody", Amount::new(7, 6), 100),
            ev("x2", None, "POL", Direction::Outbound, "0xnobody", native(5), 200),
        ];
        let groups = reconcile(events, &no_fees(), &cfg());
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().all(|g| g.kind == TxKind::Unmatched));
        let s = summarize(&groups);
        assert_eq!(s.event_count, 2);
        assert_eq!(s.unmatched_count, 2);
    }

    #[test]
    fn summary_counts_each_kind() {
        let events = vec![
            ev("claim", Some("0xa"), "D.FAITH", Direction::Inbound, DIST, faith(5000), 1000),
            ev("buy", Some("0xb"), "D.FAITH", Direction::Inbound, POOL, faith(100), 900_000_000),
            ev("sell", Some("0xc"), "D.FAITH", Direction::Outbound, POOL, faith(100), 1_800_000_000),
            ev("shop", Some("0xd"), "D.FAITH", Direction::Outbound, SHOP, faith(100), 2_700_000_000),
            ev("stray", Some("0xe"), "USDC", Direction::Inbound, "0xnobody", Amount::new(1, 6), 3_600_000_000),
        ];
        let s = summarize(&reconcile(events, &no_fees(), &cfg()));
        assert_eq!(s.claim_count, 1);
        assert_eq!(s.purchase_count, 1);
        assert_eq!(s.sale_count, 1);
        assert_eq!(s.shop_count, 1);
        assert_eq!(s.unmatched_count, 1);
        assert_eq!(s.event_count, 5);
    }

    #[test]
    fn native_shop_transfer_is_not_a_shop_payment() {
        // Shop payments are token legs; a native transfer to the treasury
        // address falls through to residue.
        let events = vec![ev(
            "pay", Some("0xp"), "POL", Direction::Outbound, SHOP, native(5), 5000,
        )];
        let groups = reconcile(events, &no_fees(), &cfg());
        assert_eq!(groups[0].kind, TxKind::Unmatched);
    }
}
