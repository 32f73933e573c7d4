//! wlk-ingest
//!
//! Ingestion layer for the reconciliation pipeline: the provider boundary
//! (`provider`), the canonical transfer normalizer (`normalizer`), the fee
//! leg synthesizer (`fee`), and the concrete HTTP JSON-RPC client below.
//!
//! This crate does **not** group anything; callers hand normalized events
//! to wlk-reconcile.

pub mod fee;
pub mod normalizer;
pub mod provider;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::json;

use provider::{RawTransfer, Receipt, ReceiptSource, TransferPage, TransferQuery, TransferSource};

// ---------------------------------------------------------------------------
// Hex quantities
// ---------------------------------------------------------------------------

/// Parse an EVM hex quantity (`"0x5208"`) into a `u128`. Also accepts a
/// plain decimal string, which some indexers emit for block numbers.
pub fn parse_hex_u128(s: &str) -> Result<u128> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return u128::from_str_radix(hex, 16)
            .with_context(|| format!("invalid hex quantity '{s}'"));
    }
    s.parse::<u128>()
        .with_context(|| format!("invalid quantity '{s}'"))
}

// ---------------------------------------------------------------------------
// JSON-RPC indexer client
// ---------------------------------------------------------------------------

/// Page size requested per transfer query (hex, Alchemy convention).
const MAX_COUNT: &str = "0x3e8";

/// HTTP client for an Alchemy-style endpoint: `alchemy_getAssetTransfers`
/// for transfer pages and `eth_getTransactionReceipt` for receipts.
///
/// The endpoint URL usually embeds the API key; it is never logged here.
#[derive(Debug, Clone)]
pub struct JsonRpcIndexer {
    http: reqwest::Client,
    rpc_url: String,
}

impl JsonRpcIndexer {
    pub fn new(rpc_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            rpc_url,
        }
    }

    async fn call<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<Option<T>> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let resp = self
            .http
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("{method} request failed"))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow!("{method} http error status={}", status.as_u16()));
        }

        let envelope: RpcEnvelope<T> = resp
            .json()
            .await
            .with_context(|| format!("{method} response json decode failed"))?;

        if let Some(err) = envelope.error {
            return Err(anyhow!(
                "{method} rpc error code={} message={}",
                err.code,
                err.message
            ));
        }
        Ok(envelope.result)
    }
}

#[async_trait::async_trait]
impl TransferSource for JsonRpcIndexer {
    fn source_name(&self) -> &'static str {
        "json-rpc-indexer"
    }

    async fn fetch_transfers(
        &self,
        address: &str,
        query: TransferQuery,
        page_key: Option<&str>,
    ) -> Result<TransferPage> {
        let mut filter = json!({
            "category": ["external", "erc20"],
            "withMetadata": true,
            "maxCount": MAX_COUNT,
        });
        let side = match query {
            TransferQuery::FromAddress => "fromAddress",
            TransferQuery::ToAddress => "toAddress",
        };
        filter[side] = json!(address);
        if let Some(key) = page_key {
            filter["pageKey"] = json!(key);
        }

        let result: WireTransfersResult = self
            .call("alchemy_getAssetTransfers", json!([filter]))
            .await?
            .ok_or_else(|| anyhow!("alchemy_getAssetTransfers returned no result"))?;

        Ok(TransferPage {
            transfers: result.transfers.into_iter().map(Into::into).collect(),
            page_key: result.page_key,
        })
    }
}

#[async_trait::async_trait]
impl ReceiptSource for JsonRpcIndexer {
    async fn fetch_receipt(&self, hash: &str) -> Result<Option<Receipt>> {
        let result: Option<WireReceipt> = self
            .call("eth_getTransactionReceipt", json!([hash]))
            .await?;

        // A null result is "no receipt", not a transport failure.
        let Some(wire) = result else {
            return Ok(None);
        };

        let gas_used = parse_hex_u128(&wire.gas_used).context("receipt gasUsed")?;
        let price_field = wire
            .effective_gas_price
            .or(wire.gas_price)
            .ok_or_else(|| anyhow!("receipt has neither effectiveGasPrice nor gasPrice"))?;
        let effective_gas_price = parse_hex_u128(&price_field).context("receipt gas price")?;

        Ok(Some(Receipt {
            gas_used,
            effective_gas_price,
        }))
    }
}

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RpcEnvelope<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTransfersResult {
    #[serde(default)]
    transfers: Vec<WireTransfer>,
    page_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTransfer {
    hash: Option<String>,
    unique_id: Option<String>,
    from: Option<String>,
    to: Option<String>,
    asset: Option<String>,
    block_num: Option<String>,
    raw_contract: Option<WireRawContract>,
    metadata: Option<WireMetadata>,
}

#[derive(Debug, Deserialize)]
struct WireRawContract {
    /// Raw smallest-unit value as a hex quantity.
    value: Option<String>,
    address: Option<String>,
    /// Decimal places as a hex quantity.
    decimal: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireReceipt {
    gas_used: String,
    effective_gas_price: Option<String>,
    gas_price: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMetadata {
    block_timestamp: Option<String>,
}

impl From<WireTransfer> for RawTransfer {
    fn from(w: WireTransfer) -> Self {
        let (value, contract_address, decimals) = match w.raw_contract {
            Some(rc) => (
                rc.value,
                rc.address,
                rc.decimal
                    .as_deref()
                    .and_then(|d| parse_hex_u128(d).ok())
                    .and_then(|d| u8::try_from(d).ok()),
            ),
            None => (None, None, None),
        };
        RawTransfer {
            hash: w.hash,
            unique_id: w.unique_id,
            from: w.from,
            to: w.to,
            value,
            asset: w.asset,
            contract_address,
            decimals,
            block_timestamp: w.metadata.and_then(|m| m.block_timestamp),
            block_number: w
                .block_num
                .as_deref()
                .and_then(|b| parse_hex_u128(b).ok())
                .and_then(|b| u64::try_from(b).ok()),
        }
    }
}

// -----------------
// Tests (no network)
// -----------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_quantity_parses_both_forms() {
        assert_eq!(parse_hex_u128("0x5208").unwrap(), 21_000);
        assert_eq!(parse_hex_u128("0x0").unwrap(), 0);
        assert_eq!(parse_hex_u128("1234").unwrap(), 1234);
        assert!(parse_hex_u128("0xZZ").is_err());
        assert!(parse_hex_u128("").is_err());
    }

    #[test]
    fn wire_transfer_converts_raw_contract_fields() {
        let wire: WireTransfer = serde_json::from_value(serde_json::json!({
            "hash": "0xAA",
            "uniqueId": "0xAA:log:3",
            "from": "0xf1",
            "to": "0xf2",
            "asset": "D.FAITH",
            "blockNum": "0x10",
            "rawContract": { "value": "0x1388", "address": "0xC0", "decimal": "0x2" },
            "metadata": { "blockTimestamp": "2024-05-01T12:00:00Z" }
        }))
        .unwrap();
        let raw: RawTransfer = wire.into();
        assert_eq!(raw.value.as_deref(), Some("0x1388"));
        assert_eq!(raw.contract_address.as_deref(), Some("0xC0"));
        assert_eq!(raw.decimals, Some(2));
        assert_eq!(raw.block_number, Some(16));
        assert_eq!(raw.block_timestamp.as_deref(), Some("2024-05-01T12:00:00Z"));
    }
}
