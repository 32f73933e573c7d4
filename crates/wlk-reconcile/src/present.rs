//! Filter/sort presenter — the consumer contract for display layers.
//!
//! Pure projection over an already-reconciled group list: never re-runs
//! grouping, never mutates the input. All orders carry an explicit
//! tie-break (representative timestamp descending, then group key) so the
//! displayed order is stable across refreshes.

use wlk_schemas::{LogicalTransaction, TxKind};

/// Which logical kinds to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindFilter {
    All,
    Only(TxKind),
}

impl KindFilter {
    fn accepts(&self, kind: TxKind) -> bool {
        match self {
            KindFilter::All => true,
            KindFilter::Only(k) => *k == kind,
        }
    }
}

/// Display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Newest,
    Oldest,
    /// Anchor-leg magnitude, largest first.
    Amount,
}

/// Project a reconciled group list for display.
pub fn present(
    groups: &[LogicalTransaction],
    filter: KindFilter,
    sort: SortOrder,
) -> Vec<LogicalTransaction> {
    let mut out: Vec<LogicalTransaction> = groups
        .iter()
        .filter(|g| filter.accepts(g.kind))
        .cloned()
        .collect();

    match sort {
        SortOrder::Newest => out.sort_by(|a, b| {
            b.representative_timestamp_ms
                .cmp(&a.representative_timestamp_ms)
                .then_with(|| a.group_key.cmp(&b.group_key))
        }),
        SortOrder::Oldest => out.sort_by(|a, b| {
            a.representative_timestamp_ms
                .cmp(&b.representative_timestamp_ms)
                .then_with(|| a.group_key.cmp(&b.group_key))
        }),
        SortOrder::Amount => out.sort_by(|a, b| {
            b.anchor()
                .amount
                .micros()
                .cmp(&a.anchor().amount.micros())
                .then_with(|| {
                    b.representative_timestamp_ms
                        .cmp(&a.representative_timestamp_ms)
                })
                .then_with(|| a.group_key.cmp(&b.group_key))
        }),
    }
    out
}
