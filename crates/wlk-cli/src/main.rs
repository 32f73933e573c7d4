//! wlk CLI entry point.
//!
//! Thin shell over the library crates: parses args, builds a
//! `RefreshEngine` against the JSON-RPC indexer, runs one refresh, and
//! prints the presented groups. All reconciliation logic lives in
//! `wlk-reconcile`; all fetch orchestration lives in `wlk-runtime`.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use wlk_config::ReconcileConfig;
use wlk_ingest::JsonRpcIndexer;
use wlk_reconcile::{present, KindFilter, SortOrder};
use wlk_runtime::{RefreshEngine, RefreshOutcome};
use wlk_schemas::{Direction, LogicalTransaction, TxKind};

#[derive(Parser)]
#[command(name = "wlk")]
#[command(about = "WalletLedgerKit CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch transfers for an address, reconcile, and print the groups
    Reconcile {
        /// Tracked wallet address (0x-prefixed)
        #[arg(long)]
        address: String,

        /// Path to a registry config JSON (defaults to the built-in registry)
        #[arg(long)]
        config: Option<String>,

        /// JSON-RPC endpoint (falls back to WLK_RPC_URL)
        #[arg(long = "rpc-url")]
        rpc_url: Option<String>,

        /// Show only one logical kind
        #[arg(long, value_enum, default_value_t = FilterArg::All)]
        filter: FilterArg,

        /// Display order
        #[arg(long, value_enum, default_value_t = SortArg::Newest)]
        sort: SortArg,

        /// Emit the snapshot as JSON instead of text
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Compute the registry config hash + print canonical JSON
    ConfigHash {
        /// Config path (defaults to the built-in registry)
        path: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FilterArg {
    All,
    Claim,
    Purchase,
    Sale,
    ShopPayment,
    Unmatched,
}

impl From<FilterArg> for KindFilter {
    fn from(f: FilterArg) -> Self {
        match f {
            FilterArg::All => KindFilter::All,
            FilterArg::Claim => KindFilter::Only(TxKind::Claim),
            FilterArg::Purchase => KindFilter::Only(TxKind::Purchase),
            FilterArg::Sale => KindFilter::Only(TxKind::Sale),
            FilterArg::ShopPayment => KindFilter::Only(TxKind::ShopPayment),
            FilterArg::Unmatched => KindFilter::Only(TxKind::Unmatched),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SortArg {
    Newest,
    Oldest,
    Amount,
}

impl From<SortArg> for SortOrder {
    fn from(s: SortArg) -> Self {
        match s {
            SortArg::Newest => SortOrder::Newest,
            SortArg::Oldest => SortOrder::Oldest,
            SortArg::Amount => SortOrder::Amount,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env.local if present (dev convenience). Silent if the file
    // does not exist.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Reconcile {
            address,
            config,
            rpc_url,
            filter,
            sort,
            json,
        } => {
            let config = load_config(config.as_deref())?;
            let rpc_url = rpc_url
                .or_else(|| std::env::var("WLK_RPC_URL").ok())
                .context("no RPC endpoint: pass --rpc-url or set WLK_RPC_URL")?;

            let indexer = JsonRpcIndexer::new(rpc_url);
            let engine = RefreshEngine::new(indexer.clone(), indexer, config);

            info!(address = %address, "starting reconcile");
            let snap = match engine.refresh(&address).await? {
                RefreshOutcome::Completed(snap) => snap,
                // Single-shot CLI: nothing else can hold the guard.
                RefreshOutcome::AlreadyRunning => {
                    anyhow::bail!("refresh already in flight")
                }
            };

            let groups = present(&snap.groups, filter.into(), sort.into());

            if json {
                let out = serde_json::json!({
                    "run_id": snap.run_id,
                    "address": snap.address,
                    "config_hash": snap.config_hash,
                    "finished_at": snap.finished_at,
                    "summary": snap.summary,
                    "rejected_records": snap.rejected_records,
                    "degraded_receipts": snap.degraded_receipts,
                    "groups": groups,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("run_id={}", snap.run_id);
                println!("address={}", snap.address);
                println!("config_hash={}", snap.config_hash);
                println!(
                    "events={} claims={} purchases={} sales={} shop={} unmatched={}",
                    snap.summary.event_count,
                    snap.summary.claim_count,
                    snap.summary.purchase_count,
                    snap.summary.sale_count,
                    snap.summary.shop_count,
                    snap.summary.unmatched_count,
                );
                println!(
                    "rejected_records={} degraded_receipts={}",
                    snap.rejected_records, snap.degraded_receipts,
                );
                for group in &groups {
                    print_group(group);
                }
            }
        }

        Commands::ConfigHash { path } => {
            let config = load_config(path.as_deref())?;
            println!("config_hash={}", config.config_hash());
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn load_config(path: Option<&str>) -> Result<ReconcileConfig> {
    match path {
        Some(p) => ReconcileConfig::from_file(Path::new(p)),
        None => Ok(ReconcileConfig::default()),
    }
}

fn print_group(group: &LogicalTransaction) {
    println!(
        "{}  {:<12}  {} leg(s)  {}",
        format_ts(group.representative_timestamp_ms),
        kind_label(group.kind),
        group.legs.len(),
        group.group_key,
    );
    for leg in &group.legs {
        let (arrow, sep) = match leg.direction {
            Direction::Inbound => ("in ", "<-"),
            Direction::Outbound => ("out", "->"),
        };
        let fee_tag = if leg.synthetic { " [fee]" } else { "" };
        println!(
            "    {}  {} {}  {} {}{}",
            arrow, leg.amount, leg.token, sep, leg.counterparty, fee_tag,
        );
    }
}

fn kind_label(kind: TxKind) -> &'static str {
    match kind {
        TxKind::Claim => "claim",
        TxKind::Purchase => "purchase",
        TxKind::Sale => "sale",
        TxKind::ShopPayment => "shop-payment",
        TxKind::Unmatched => "unmatched",
    }
}

fn format_ts(ts_ms: i64) -> String {
    match Utc.timestamp_millis_opt(ts_ms).single() {
        Some(dt) => dt.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        None => format!("@{}", ts_ms),
    }
}
