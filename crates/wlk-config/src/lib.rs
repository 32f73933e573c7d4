//! wlk-config
//!
//! Injected configuration for the reconciliation pipeline: the role
//! registry (counterparty address -> semantic role), the token catalog
//! (contract address -> symbol + decimals), and the matching policy
//! constants (pair window, claim bonus, tolerance).
//!
//! The engine itself carries zero hard-coded addresses; everything it
//! needs to classify a transfer comes through [`ReconcileConfig`]. Tests
//! build synthetic registries with the `with_*` builders.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use wlk_schemas::Role;

// ---------------------------------------------------------------------------
// Defaults (matching policy)
// ---------------------------------------------------------------------------

/// Pairing window for partner search, milliseconds (±10 minutes). A policy
/// constant carried over from observed behavior, not a protocol guarantee —
/// hence configurable.
pub const DEFAULT_PAIR_WINDOW_MS: i64 = 600_000;

/// Known claim-bonus payout in native micros (0.000001 native units).
pub const DEFAULT_CLAIM_BONUS_MICROS: u128 = 1;

/// Claim-bonus matching tolerance, percent.
pub const DEFAULT_CLAIM_BONUS_TOLERANCE_PCT: u32 = 20;

/// Native-asset default decimal places, used when a contract address misses
/// the catalog and the provider label carries no better hint.
pub const DEFAULT_DECIMALS: u8 = 18;

// ---------------------------------------------------------------------------
// Token catalog entry
// ---------------------------------------------------------------------------

/// One token catalog entry: contract address -> display symbol + decimals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSpec {
    pub symbol: String,
    pub decimals: u8,
}

// ---------------------------------------------------------------------------
// ReconcileConfig
// ---------------------------------------------------------------------------

/// The one injected configuration object for the whole pipeline.
///
/// Address keys are stored lowercased; all lookups are case-insensitive.
/// `BTreeMap` keeps serialization canonical for [`ReconcileConfig::config_hash`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileConfig {
    roles: BTreeMap<String, Role>,
    tokens: BTreeMap<String, TokenSpec>,
    native_symbol: String,
    wrapped_native_symbol: String,
    pub pair_window_ms: i64,
    /// Claim-bonus payout in native micros; `0` disables the bonus
    /// preference in claim pairing.
    pub claim_bonus_micros: u128,
    pub claim_bonus_tolerance_pct: u32,
}

impl Default for ReconcileConfig {
    /// The production registry for the target network: the known liquidity
    /// pool, shop treasury and rewards distributor, plus the project token
    /// catalog. Native POL and wrapped WPOL are interchangeable for
    /// matching.
    fn default() -> Self {
        Self::empty("POL", "WPOL")
            .with_role(
                "0x6b473b6fc51d2d9ee8ff9bd742fe6b2f000a9e21",
                Role::LiquidityPool,
            )
            .with_role(
                "0x8a2d93c3f8ab3e2f4d71c0ffee91b00457f1ce05",
                Role::ShopTreasury,
            )
            .with_role(
                "0xd3f41c7be3077f0a22bead5ff0ac06e2b2cad0f7",
                Role::RewardsDistributor,
            )
            .with_token(
                "0x24f2f36d3f3c8708bbbf56c53bbec97a87a5f6c2",
                "D.FAITH",
                2,
            )
            .with_token(
                "0x5d88ee04aa9c138c02a28e8c7e8f54b6a2f4f0e9",
                "D.INVEST",
                0,
            )
            .with_token(
                // Wrapped native on the target network.
                "0x0d500b1d8e8ef31e21c99d1db9a6444d3adf1270",
                "WPOL",
                18,
            )
    }
}

impl ReconcileConfig {
    /// An empty registry with default matching policy — the starting point
    /// for synthetic test configurations.
    pub fn empty(native_symbol: &str, wrapped_native_symbol: &str) -> Self {
        Self {
            roles: BTreeMap::new(),
            tokens: BTreeMap::new(),
            native_symbol: native_symbol.to_string(),
            wrapped_native_symbol: wrapped_native_symbol.to_string(),
            pair_window_ms: DEFAULT_PAIR_WINDOW_MS,
            claim_bonus_micros: DEFAULT_CLAIM_BONUS_MICROS,
            claim_bonus_tolerance_pct: DEFAULT_CLAIM_BONUS_TOLERANCE_PCT,
        }
    }

    pub fn with_role(mut self, address: &str, role: Role) -> Self {
        self.roles.insert(address.to_lowercase(), role);
        self
    }

    pub fn with_token(mut self, contract: &str, symbol: &str, decimals: u8) -> Self {
        self.tokens.insert(
            contract.to_lowercase(),
            TokenSpec {
                symbol: symbol.to_string(),
                decimals,
            },
        );
        self
    }

    pub fn with_pair_window_ms(mut self, ms: i64) -> Self {
        self.pair_window_ms = ms;
        self
    }

    pub fn with_claim_bonus(mut self, micros: u128, tolerance_pct: u32) -> Self {
        self.claim_bonus_micros = micros;
        self.claim_bonus_tolerance_pct = tolerance_pct;
        self
    }

    // --- lookups (never fail) ---

    /// Role of a counterparty address, case-insensitive; `Unknown` on miss.
    /// The reserved `"network-fee"` pseudo-address is never registered.
    pub fn role_of(&self, address: &str) -> Role {
        self.roles
            .get(&address.to_lowercase())
            .copied()
            .unwrap_or(Role::Unknown)
    }

    /// Catalog lookup by contract address, case-insensitive.
    pub fn token_of(&self, contract: &str) -> Option<&TokenSpec> {
        self.tokens.get(&contract.to_lowercase())
    }

    pub fn native_symbol(&self) -> &str {
        &self.native_symbol
    }

    /// Native and wrapped-native are interchangeable for matching purposes.
    pub fn is_native_like(&self, symbol: &str) -> bool {
        symbol.eq_ignore_ascii_case(&self.native_symbol)
            || symbol.eq_ignore_ascii_case(&self.wrapped_native_symbol)
    }

    // --- loading ---

    /// Build a config from its JSON representation. Address keys are
    /// lowercased on the way in; an unrecognized role string fails loading.
    pub fn from_json(json: &Value) -> Result<Self> {
        let raw: RawConfig =
            serde_json::from_value(json.clone()).context("reconcile config shape invalid")?;

        let mut cfg = Self::empty(&raw.native.symbol, &raw.native.wrapped);
        if let Some(m) = raw.matching {
            cfg.pair_window_ms = m.pair_window_ms.unwrap_or(DEFAULT_PAIR_WINDOW_MS);
            cfg.claim_bonus_micros = m.claim_bonus_micros.unwrap_or(DEFAULT_CLAIM_BONUS_MICROS);
            cfg.claim_bonus_tolerance_pct = m
                .claim_bonus_tolerance_pct
                .unwrap_or(DEFAULT_CLAIM_BONUS_TOLERANCE_PCT);
        }
        if cfg.pair_window_ms < 0 {
            bail!("pair_window_ms must be >= 0, got {}", cfg.pair_window_ms);
        }

        for (addr, role) in raw.roles {
            let role = parse_role(&role)?;
            cfg.roles.insert(addr.to_lowercase(), role);
        }
        for (addr, spec) in raw.tokens {
            cfg.tokens.insert(addr.to_lowercase(), spec);
        }
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let json: Value = serde_json::from_str(&text)
            .with_context(|| format!("parse config file {}", path.display()))?;
        Self::from_json(&json)
    }

    // --- hashing ---

    /// SHA-256 over the canonical serialization (BTreeMap fields keep key
    /// order stable), so a run can record exactly which registry produced
    /// its result.
    pub fn config_hash(&self) -> String {
        // Serialization of this struct cannot fail: string keys, no
        // non-string map keys, no non-finite floats.
        let canonical =
            serde_json::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }
}

fn parse_role(s: &str) -> Result<Role> {
    match s.to_ascii_lowercase().as_str() {
        "liquidity_pool" | "liquiditypool" => Ok(Role::LiquidityPool),
        "shop_treasury" | "shoptreasury" => Ok(Role::ShopTreasury),
        "rewards_distributor" | "rewardsdistributor" => Ok(Role::RewardsDistributor),
        other => bail!(
            "unknown role '{}'. expected one of: liquidity_pool | shop_treasury | rewards_distributor",
            other
        ),
    }
}

// ---------------------------------------------------------------------------
// Raw JSON shape
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    roles: BTreeMap<String, String>,
    #[serde(default)]
    tokens: BTreeMap<String, TokenSpec>,
    native: RawNative,
    matching: Option<RawMatching>,
}

#[derive(Debug, Deserialize)]
struct RawNative {
    symbol: String,
    wrapped: String,
}

#[derive(Debug, Deserialize)]
struct RawMatching {
    pair_window_ms: Option<i64>,
    claim_bonus_micros: Option<u128>,
    claim_bonus_tolerance_pct: Option<u32>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
