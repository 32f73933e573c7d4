//! Canonical transfer normalization.
//!
//! Converts raw provider records (`provider::RawTransfer`) into immutable
//! [`TransferEvent`]s: token identity via the catalog, direction relative
//! to the tracked address, deterministic smallest-unit amounts, and a
//! provisional role tag from the registry.
//!
//! It does **not**:
//! - fetch data (no providers)
//! - synthesize fee legs (that is `fee.rs`)
//! - group anything (that is wlk-reconcile)
//!
//! A record the normalizer cannot use is *rejected* — returned as `None`
//! and counted, never surfaced as an error. Rejection is a boundary
//! filter, not a failure of the run.

use chrono::{DateTime, NaiveDateTime};

use crate::provider::RawTransfer;
use wlk_config::{ReconcileConfig, DEFAULT_DECIMALS};
use wlk_schemas::{Amount, Direction, TransferEvent};

// ---------------------------------------------------------------------------
// Batch output
// ---------------------------------------------------------------------------

/// Result of normalizing a provider batch: the usable events plus the
/// count of records rejected at the boundary.
#[derive(Debug, Clone, Default)]
pub struct NormalizedBatch {
    pub events: Vec<TransferEvent>,
    pub rejected: usize,
}

// ---------------------------------------------------------------------------
// Amount parsing
// ---------------------------------------------------------------------------

/// Parse a provider value string into smallest units, deterministically.
///
/// Accepted forms:
/// - `0x`-prefixed hex quantity (already smallest units)
/// - pure decimal digits (already smallest units)
/// - a human decimal with a `.` separator, scaled by `decimals`
///
/// Rejects signs, empty strings, non-digits, more fractional digits than
/// the token has decimal places (would require rounding), and overflow.
/// No floating point at any stage.
pub fn parse_raw_units(s: &str, decimals: u8) -> Option<u128> {
    let s = s.trim();
    if s.is_empty() || s.starts_with('-') || s.starts_with('+') {
        return None;
    }

    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return u128::from_str_radix(hex, 16).ok();
    }

    let all_digits = |p: &str| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit());

    match s.split_once('.') {
        None => {
            if all_digits(s) {
                s.parse::<u128>().ok()
            } else {
                None
            }
        }
        Some((int_part, frac_part)) => {
            // Human-unit decimal: scale by the token's decimal places.
            if !all_digits(frac_part) || (!int_part.is_empty() && !all_digits(int_part)) {
                return None;
            }
            if frac_part.len() > decimals as usize {
                return None;
            }
            let scale = 10u128.checked_pow(u32::from(decimals))?;
            let int_val: u128 = if int_part.is_empty() {
                0
            } else {
                int_part.parse().ok()?
            };
            let mut frac_padded = frac_part.to_string();
            while frac_padded.len() < decimals as usize {
                frac_padded.push('0');
            }
            let frac_val: u128 = if frac_padded.is_empty() {
                0
            } else {
                frac_padded.parse().ok()?
            };
            int_val.checked_mul(scale)?.checked_add(frac_val)
        }
    }
}

// ---------------------------------------------------------------------------
// Timestamp parsing
// ---------------------------------------------------------------------------

/// Parse an indexer block timestamp into epoch milliseconds.
///
/// Tries RFC 3339 first (`2024-05-01T12:00:00.000Z`), then the naive
/// `YYYY-MM-DD HH:MM:SS` form some providers emit, treated as UTC.
/// Unparseable input yields `None`; the caller substitutes 0 so the event
/// still participates (it simply sorts last and pairs with nothing).
pub fn parse_timestamp_ms(s: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|ndt| ndt.and_utc().timestamp_millis())
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Normalize one raw record for `tracked`. Pure; `None` rejects the record.
///
/// Rejection rules:
/// - neither `to` nor `from` equals the tracked address (not our record)
/// - hash **and** counterparty both missing (cannot participate in matching)
/// - hash missing **and** no provider unique id (no usable identity)
/// - missing or unparseable value
pub fn normalize(
    raw: &RawTransfer,
    tracked: &str,
    config: &ReconcileConfig,
) -> Option<TransferEvent> {
    let tracked = tracked.to_lowercase();
    let from = raw.from.as_deref().map(str::to_lowercase);
    let to = raw.to.as_deref().map(str::to_lowercase);

    let (direction, counterparty) = if to.as_deref() == Some(tracked.as_str()) {
        (Direction::Inbound, from)
    } else if from.as_deref() == Some(tracked.as_str()) {
        (Direction::Outbound, to)
    } else {
        return None;
    };

    let hash = raw
        .hash
        .as_deref()
        .filter(|h| !h.is_empty())
        .map(str::to_lowercase);
    let counterparty = counterparty.filter(|c| !c.is_empty());
    if hash.is_none() && counterparty.is_none() {
        return None;
    }

    let id = match (&hash, &raw.unique_id) {
        (Some(h), _) => h.clone(),
        (None, Some(uid)) if !uid.is_empty() => uid.clone(),
        // No hash and no provider id: nothing stable to dedupe on.
        (None, _) => return None,
    };

    // Token resolution: exact catalog match on the contract address wins;
    // otherwise fall back to the provider label with the provider's decimal
    // hint, defaulting to the native 18.
    let (token, decimals) = match raw
        .contract_address
        .as_deref()
        .and_then(|c| config.token_of(c))
    {
        Some(spec) => (spec.symbol.clone(), spec.decimals),
        None => {
            let label = raw
                .asset
                .clone()
                .or_else(|| raw.contract_address.clone())
                .unwrap_or_else(|| config.native_symbol().to_string());
            (label, raw.decimals.unwrap_or(DEFAULT_DECIMALS))
        }
    };

    let value = raw.value.as_deref()?;
    let amount = Amount::new(parse_raw_units(value, decimals)?, decimals);

    let counterparty = counterparty.unwrap_or_default();
    let role = config.role_of(&counterparty);
    let timestamp_ms = raw
        .block_timestamp
        .as_deref()
        .and_then(parse_timestamp_ms)
        .unwrap_or(0);

    Some(TransferEvent {
        id,
        hash,
        token,
        direction,
        amount,
        counterparty,
        role,
        timestamp_ms,
        block_number: raw.block_number,
        synthetic: false,
    })
}

/// Normalize a merged provider batch, counting rejected records.
pub fn normalize_all(
    raws: &[RawTransfer],
    tracked: &str,
    config: &ReconcileConfig,
) -> NormalizedBatch {
    let mut out = NormalizedBatch::default();
    for raw in raws {
        match normalize(raw, tracked, config) {
            Some(ev) => out.events.push(ev),
            None => out.rejected += 1,
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
