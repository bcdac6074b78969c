//! Daily reconciliation of per-family outcomes
//!
//! Outer-joins every family table on date and re-indexes the result onto the
//! continuous calendar of the collection range.

use shared::DateRange;

use crate::models::{DailyTable, Field};
use crate::services::collector::SourceOutcome;

/// Reconciled table for one town
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciled {
    /// No family produced rows
    NoFeeds,
    /// One row per calendar day of the range
    Table(DailyTable),
}

impl Reconciled {
    pub fn into_table(self) -> DailyTable {
        match self {
            Reconciled::NoFeeds => DailyTable::new(),
            Reconciled::Table(table) => table,
        }
    }
}

/// Merge family outcomes and re-index onto `range`
pub fn reconcile<'a, I>(outcomes: I, range: &DateRange) -> Reconciled
where
    I: IntoIterator<Item = &'a SourceOutcome>,
{
    let merged = outcomes
        .into_iter()
        .filter_map(SourceOutcome::table)
        .fold(None::<DailyTable>, |acc, table| match acc {
            None => Some(table.dedup_dates()),
            Some(acc) => Some(acc.outer_merge(table)),
        });

    let Some(merged) = merged else {
        return Reconciled::NoFeeds;
    };

    let carried = latest_before(&merged, Field::Ndvi, range);
    let mut table = merged.reindex(range);

    if let Some(value) = carried {
        if table.has_column(Field::Ndvi) && table.value(Field::Ndvi, 0).is_none() {
            let mut ndvi = table.column(Field::Ndvi).map(<[_]>::to_vec).unwrap_or_default();
            ndvi[0] = Some(value);
            table.set_column(Field::Ndvi, ndvi);
        }
    }

    Reconciled::Table(table)
}

/// Most recent present value of `field` strictly before the range start
fn latest_before(table: &DailyTable, field: Field, range: &DateRange) -> Option<f64> {
    let column = table.column(field)?;
    table
        .dates()
        .iter()
        .zip(column)
        .filter(|(date, value)| **date < range.start && value.is_some())
        .max_by_key(|(date, _)| **date)
        .and_then(|(_, value)| *value)
}
