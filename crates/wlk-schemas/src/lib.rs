//! wlk-schemas
//!
//! Shared data model for the wallet ledger reconciliation pipeline.
//!
//! Everything here is immutable value data: a [`TransferEvent`] is never
//! mutated after the normalizer creates it, and a [`LogicalTransaction`] is
//! rebuilt from scratch on every reconciliation run. No IO, no clocks.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Amount
// ---------------------------------------------------------------------------

/// Micros scale (1e-6 of one human token unit). All cross-token magnitude
/// comparisons in the engine happen at this scale.
pub const MICROS_SCALE: u32 = 6;

/// A non-negative token magnitude in deterministic fixed-point form.
///
/// Holds the raw smallest-unit integer plus the token's decimal places, so
/// no floating point is involved at any stage. Human-unit comparisons go
/// through [`Amount::micros`] (integer micros, truncating), mirroring the
/// micros convention used for prices elsewhere in the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Amount {
    /// Magnitude in the token's smallest unit.
    pub raw: u128,
    /// Decimal places of the token (e.g. 18 for the native asset).
    pub decimals: u8,
}

impl Amount {
    pub fn new(raw: u128, decimals: u8) -> Self {
        Self { raw, decimals }
    }

    pub fn zero(decimals: u8) -> Self {
        Self { raw: 0, decimals }
    }

    pub fn is_zero(&self) -> bool {
        self.raw == 0
    }

    /// Human-unit value in integer micros (1e-6), truncating toward zero.
    ///
    /// `decimals >= 6` divides, `decimals < 6` multiplies; both are exact
    /// integer operations. Saturates on the (absurd) multiply overflow path
    /// rather than panicking.
    pub fn micros(&self) -> u128 {
        let d = u32::from(self.decimals);
        if d >= MICROS_SCALE {
            self.raw / 10u128.pow(d - MICROS_SCALE)
        } else {
            self.raw.saturating_mul(10u128.pow(MICROS_SCALE - d))
        }
    }

    /// Magnitude ordering in human units, valid across tokens with
    /// different decimal places.
    pub fn cmp_magnitude(&self, other: &Amount) -> Ordering {
        self.micros().cmp(&other.micros())
    }
}

impl fmt::Display for Amount {
    /// Exact decimal rendering, trailing fractional zeros trimmed
    /// (`1.50` renders as `"1.5"`, zero as `"0"`).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scale = 10u128.pow(u32::from(self.decimals));
        let int_part = self.raw / scale;
        let frac_part = self.raw % scale;
        if frac_part == 0 {
            return write!(f, "{int_part}");
        }
        let frac = format!("{:0width$}", frac_part, width = self.decimals as usize);
        write!(f, "{int_part}.{}", frac.trim_end_matches('0'))
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Which way a transfer moved relative to the tracked address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Semantic classification of a counterparty address, independent of the
/// token being moved. Resolved via the role registry in wlk-config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    LiquidityPool,
    ShopTreasury,
    RewardsDistributor,
    Unknown,
}

/// Logical operation kind produced by the reconciliation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    Claim,
    Purchase,
    Sale,
    ShopPayment,
    Unmatched,
}

// ---------------------------------------------------------------------------
// TransferEvent
// ---------------------------------------------------------------------------

/// One atomic on-chain transfer observed for the tracked address, in
/// canonical form. Created once by the normalizer (or the fee synthesizer,
/// with `synthetic = true`) and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEvent {
    /// Stable identity: the transaction hash when available, else the
    /// provider-issued unique id. Fee legs use a `fee:`-prefixed hash so
    /// they never collide with the on-chain leg of the same transaction.
    pub id: String,
    /// Transaction hash, lowercased. Absent only for records the provider
    /// could not attribute to a transaction.
    pub hash: Option<String>,
    /// Catalog symbol, or the provider's raw asset label on catalog miss.
    pub token: String,
    pub direction: Direction,
    pub amount: Amount,
    /// The non-tracked side of the transfer, lowercased. The reserved
    /// pseudo-address `"network-fee"` marks synthesized fee legs.
    pub counterparty: String,
    pub role: Role,
    /// Event time, milliseconds since epoch (indexer block metadata).
    pub timestamp_ms: i64,
    pub block_number: Option<u64>,
    /// True only for fee-synthesizer output.
    pub synthetic: bool,
}

/// Reserved counterparty pseudo-address for synthesized fee legs. Never
/// present in any role registry.
pub const NETWORK_FEE_COUNTERPARTY: &str = "network-fee";

// ---------------------------------------------------------------------------
// LogicalTransaction
// ---------------------------------------------------------------------------

/// The reconciled output unit: 1–3 legs that together constitute one
/// logical operation the user performed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalTransaction {
    pub kind: TxKind,
    /// Anchor leg first; proceeds/payment leg next; fee leg last.
    pub legs: Vec<TransferEvent>,
    /// Timestamp of the earliest leg in the group.
    pub representative_timestamp_ms: i64,
    /// Derived identity for stable list keys only — never consulted by the
    /// grouping logic itself.
    pub group_key: String,
}

impl LogicalTransaction {
    /// Build a group from non-empty `legs`, computing the derived fields:
    /// the representative timestamp is the earliest leg's, and the group
    /// key is the shared hash when every leg carries the same one, else a
    /// synthetic key from the anchor's id.
    pub fn new(kind: TxKind, legs: Vec<TransferEvent>) -> Self {
        debug_assert!(!legs.is_empty(), "a logical transaction has at least one leg");
        let representative_timestamp_ms = legs
            .iter()
            .map(|l| l.timestamp_ms)
            .min()
            .unwrap_or_default();
        let group_key = match shared_hash(&legs) {
            Some(h) => h.to_string(),
            None => format!("grp:{}", legs[0].id),
        };
        Self {
            kind,
            legs,
            representative_timestamp_ms,
            group_key,
        }
    }

    /// The anchor leg (always present by construction).
    pub fn anchor(&self) -> &TransferEvent {
        &self.legs[0]
    }
}

fn shared_hash(legs: &[TransferEvent]) -> Option<&str> {
    let first = legs.first()?.hash.as_deref()?;
    legs.iter()
        .all(|l| l.hash.as_deref() == Some(first))
        .then_some(first)
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

/// Aggregate counts over one reconciliation result, for display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileSummary {
    /// Total legs across all groups (input events plus synthesized fees).
    pub event_count: usize,
    pub claim_count: usize,
    pub purchase_count: usize,
    pub sale_count: usize,
    pub shop_count: usize,
    pub unmatched_count: usize,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
