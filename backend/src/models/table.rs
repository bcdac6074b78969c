//! Column-oriented daily table for one town

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::NaiveDate;
use shared::{DateRange, Field};

/// Rows keyed by date, one optional value per column.
///
/// Missing cells are `None`; non-finite inputs are stored as missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DailyTable {
    dates: Vec<NaiveDate>,
    columns: BTreeMap<Field, Vec<Option<f64>>>,
}

impl DailyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table over `dates` with no columns yet
    pub fn with_dates(dates: Vec<NaiveDate>) -> Self {
        Self {
            dates,
            columns: BTreeMap::new(),
        }
    }

    /// Append one row; columns not mentioned are missing on that row
    pub fn push_row<I>(&mut self, date: NaiveDate, values: I)
    where
        I: IntoIterator<Item = (Field, Option<f64>)>,
    {
        let row = self.dates.len();
        self.dates.push(date);
        for column in self.columns.values_mut() {
            column.push(None);
        }
        for (field, value) in values {
            let column = self
                .columns
                .entry(field)
                .or_insert_with(|| vec![None; row + 1]);
            column[row] = value.filter(|v| v.is_finite());
        }
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn fields(&self) -> impl Iterator<Item = Field> + '_ {
        self.columns.keys().copied()
    }

    pub fn has_column(&self, field: Field) -> bool {
        self.columns.contains_key(&field)
    }

    pub fn column(&self, field: Field) -> Option<&[Option<f64>]> {
        self.columns.get(&field).map(Vec::as_slice)
    }

    pub fn value(&self, field: Field, row: usize) -> Option<f64> {
        self.columns
            .get(&field)
            .and_then(|c| c.get(row).copied().flatten())
    }

    /// Replace or add a column, padding or truncating to the row count
    pub fn set_column(&mut self, field: Field, mut values: Vec<Option<f64>>) {
        values.resize(self.dates.len(), None);
        for v in values.iter_mut() {
            *v = v.filter(|x| x.is_finite());
        }
        self.columns.insert(field, values);
    }

    pub fn remove_column(&mut self, field: Field) -> Option<Vec<Option<f64>>> {
        self.columns.remove(&field)
    }

    /// Number of present cells in a column (zero when absent)
    pub fn present_count(&self, field: Field) -> usize {
        self.column(field)
            .map(|c| c.iter().filter(|v| v.is_some()).count())
            .unwrap_or(0)
    }

    /// Whether any thermal or atmospheric cell is present.
    ///
    /// Location columns and vegetation carried in from earlier composites
    /// do not count.
    pub fn has_daily_observations(&self) -> bool {
        self.fields()
            .filter(|f| !f.is_location() && *f != Field::Ndvi)
            .any(|f| self.present_count(f) > 0)
    }

    /// Rows with a duplicated date removed, keeping the first occurrence
    pub fn dedup_dates(&self) -> Self {
        let mut seen = BTreeSet::new();
        let keep: Vec<usize> = (0..self.len())
            .filter(|&i| seen.insert(self.dates[i]))
            .collect();
        self.select_rows(&keep)
    }

    /// Outer join on date.
    ///
    /// The result has one row per date present in either table, ascending.
    /// Where both tables carry the same column, `self` wins unless its cell is
    /// missing.
    pub fn outer_merge(&self, other: &DailyTable) -> Self {
        let left = self.dedup_dates();
        let right = other.dedup_dates();
        let left_index = left.date_index();
        let right_index = right.date_index();

        let dates: Vec<NaiveDate> = left
            .dates
            .iter()
            .chain(right.dates.iter())
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let fields: BTreeSet<Field> = left.fields().chain(right.fields()).collect();
        let mut merged = DailyTable::with_dates(dates);
        for field in fields {
            let values = merged
                .dates
                .iter()
                .map(|d| {
                    let l = left_index.get(d).and_then(|&i| left.value(field, i));
                    l.or_else(|| right_index.get(d).and_then(|&i| right.value(field, i)))
                })
                .collect();
            merged.columns.insert(field, values);
        }
        merged
    }

    /// Re-index onto every date of `range`.
    ///
    /// Dates outside the range are dropped, calendar days without a row
    /// become all-missing rows, and duplicated dates keep their first row.
    pub fn reindex(&self, range: &DateRange) -> Self {
        let index = self.date_index();
        let dates: Vec<NaiveDate> = range.days().collect();
        let columns = self
            .columns
            .iter()
            .map(|(field, values)| {
                let reindexed = dates
                    .iter()
                    .map(|d| index.get(d).and_then(|&i| values[i]))
                    .collect();
                (*field, reindexed)
            })
            .collect();
        Self { dates, columns }
    }

    /// The last `n` rows (all rows when shorter)
    pub fn tail(&self, n: usize) -> Self {
        let start = self.len().saturating_sub(n);
        let keep: Vec<usize> = (start..self.len()).collect();
        self.select_rows(&keep)
    }

    fn select_rows(&self, rows: &[usize]) -> Self {
        Self {
            dates: rows.iter().map(|&i| self.dates[i]).collect(),
            columns: self
                .columns
                .iter()
                .map(|(field, values)| (*field, rows.iter().map(|&i| values[i]).collect()))
                .collect(),
        }
    }

    /// First row index per date
    fn date_index(&self) -> HashMap<NaiveDate, usize> {
        let mut index = HashMap::with_capacity(self.dates.len());
        for (i, date) in self.dates.iter().enumerate() {
            index.entry(*date).or_insert(i);
        }
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn day(n: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 1).unwrap() + Duration::days(n)
    }

    #[test]
    fn test_push_row_backfills_new_columns() {
        let mut table = DailyTable::new();
        table.push_row(day(0), [(Field::LstDay, Some(30.0))]);
        table.push_row(day(1), [(Field::Ndvi, Some(0.4))]);

        assert_eq!(table.column(Field::LstDay).unwrap(), &[Some(30.0), None]);
        assert_eq!(table.column(Field::Ndvi).unwrap(), &[None, Some(0.4)]);
    }

    #[test]
    fn test_non_finite_values_are_missing() {
        let mut table = DailyTable::new();
        table.push_row(day(0), [(Field::Precipitation, Some(f64::NAN))]);
        assert_eq!(table.value(Field::Precipitation, 0), None);
    }

    #[test]
    fn test_outer_merge_unions_dates_and_columns() {
        let mut thermal = DailyTable::new();
        thermal.push_row(day(0), [(Field::LstDay, Some(31.0))]);
        thermal.push_row(day(2), [(Field::LstDay, Some(33.0))]);

        let mut atmos = DailyTable::new();
        atmos.push_row(day(1), [(Field::AirTemp2m, Some(28.0))]);
        atmos.push_row(day(2), [(Field::AirTemp2m, Some(29.0))]);

        let merged = thermal.outer_merge(&atmos);
        assert_eq!(merged.dates(), &[day(0), day(1), day(2)]);
        assert_eq!(
            merged.column(Field::LstDay).unwrap(),
            &[Some(31.0), None, Some(33.0)]
        );
        assert_eq!(
            merged.column(Field::AirTemp2m).unwrap(),
            &[None, Some(28.0), Some(29.0)]
        );
    }

    #[test]
    fn test_reindex_keeps_first_duplicate_and_fills_gaps() {
        let mut table = DailyTable::new();
        table.push_row(day(2), [(Field::LstNight, Some(20.0))]);
        table.push_row(day(0), [(Field::LstNight, Some(18.0))]);
        table.push_row(day(0), [(Field::LstNight, Some(99.0))]);

        let range = DateRange::new(day(0), day(3)).unwrap();
        let reindexed = table.reindex(&range);
        assert_eq!(reindexed.len(), 4);
        assert_eq!(
            reindexed.column(Field::LstNight).unwrap(),
            &[Some(18.0), None, Some(20.0), None]
        );
    }

    #[test]
    fn test_tail_takes_latest_rows() {
        let mut table = DailyTable::new();
        for i in 0..5 {
            table.push_row(day(i), [(Field::WindSpeed, Some(i as f64))]);
        }
        let tail = table.tail(2);
        assert_eq!(tail.dates(), &[day(3), day(4)]);
        assert_eq!(table.tail(10).len(), 5);
    }

    #[test]
    fn test_vegetation_and_location_are_not_daily_observations() {
        let mut table = DailyTable::new();
        table.push_row(
            day(1),
            [
                (Field::Ndvi, Some(0.4)),
                (Field::Latitude, Some(4.85)),
                (Field::Precipitation, None),
            ],
        );
        assert!(!table.has_daily_observations());

        table.push_row(day(2), [(Field::Precipitation, Some(1.2))]);
        assert!(table.has_daily_observations());
        assert!(!DailyTable::new().has_daily_observations());
    }
}
