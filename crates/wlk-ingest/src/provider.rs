//! Provider boundary for transfer and receipt ingestion.
//!
//! This module defines **only** the raw record types and the source traits.
//! No concrete HTTP clients, no normalization, no fee synthesis — those
//! live in `lib.rs`, `normalizer.rs` and `fee.rs` respectively.

use anyhow::Result;

// ---------------------------------------------------------------------------
// Raw transfer
// ---------------------------------------------------------------------------

/// A single transfer record as returned verbatim by the indexing provider.
///
/// Everything is optional or stringly-typed on purpose: providers are
/// inconsistent, and the normalizer decides what is usable. The `value`
/// string stays untouched so downstream conversion to smallest units is
/// deterministic (no floats introduced at the boundary).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTransfer {
    /// Transaction hash (`0x…`), when the provider attributes one.
    pub hash: Option<String>,
    /// Provider-issued unique record id, used as identity fallback.
    pub unique_id: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    /// Transfer magnitude in the token's smallest unit, as a decimal or
    /// `0x`-hex string.
    pub value: Option<String>,
    /// Provider asset label (e.g. `"POL"`, `"D.FAITH"`).
    pub asset: Option<String>,
    /// ERC-20 contract address; absent for native transfers.
    pub contract_address: Option<String>,
    /// Decimal places reported by the provider, when present.
    pub decimals: Option<u8>,
    /// Block timestamp as an ISO-8601 string from indexer metadata.
    pub block_timestamp: Option<String>,
    pub block_number: Option<u64>,
}

/// One page of transfers plus the continuation key, if any.
#[derive(Debug, Clone, Default)]
pub struct TransferPage {
    pub transfers: Vec<RawTransfer>,
    pub page_key: Option<String>,
}

/// Which side of the transfers to query for an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferQuery {
    /// Transfers sent by the address (outbound pages).
    FromAddress,
    /// Transfers received by the address (inbound pages).
    ToAddress,
}

/// Pluggable transfer-page source.
#[async_trait::async_trait]
pub trait TransferSource: Send + Sync {
    fn source_name(&self) -> &'static str;

    /// Fetch one page of transfers for `address`, continuing from
    /// `page_key` when given.
    async fn fetch_transfers(
        &self,
        address: &str,
        query: TransferQuery,
        page_key: Option<&str>,
    ) -> Result<TransferPage>;
}

// ---------------------------------------------------------------------------
// Receipt
// ---------------------------------------------------------------------------

/// Execution receipt fields needed for fee synthesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    pub gas_used: u128,
    pub effective_gas_price: u128,
}

impl Receipt {
    /// Network fee paid, in the native asset's smallest unit. `None` on
    /// the (absurd) multiply overflow.
    pub fn fee_raw(&self) -> Option<u128> {
        self.gas_used.checked_mul(self.effective_gas_price)
    }
}

/// Pluggable receipt source.
///
/// `Ok(None)` means the network has no receipt for the hash — distinct
/// from a transport failure, which is `Err`. Callers treat both as a
/// recoverable missing-fee condition.
#[async_trait::async_trait]
pub trait ReceiptSource: Send + Sync {
    async fn fetch_receipt(&self, hash: &str) -> Result<Option<Receipt>>;
}
