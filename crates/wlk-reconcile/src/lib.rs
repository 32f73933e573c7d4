//! wlk-reconcile
//!
//! The transaction reconciliation engine: turns a flat set of normalized
//! transfer events (plus synthesized fee legs) into the logical operations
//! the user actually performed.
//!
//! Architectural decisions:
//! - Pure, deterministic, idempotent: same input set, same output set
//! - Fixed stage order (claims, purchases, sales, shop payments, residue)
//! - Every input event lands in exactly one group; dropping is forbidden
//! - A missing partner degrades the group size, never fails the run
//!
//! No IO. No clocks. No registry constants — everything classification
//! needs is injected via `wlk_config::ReconcileConfig`.

mod engine;
mod present;

pub use engine::{reconcile, summarize};
pub use present::{present, KindFilter, SortOrder};
