//! Quality gate and fallback chain
//!
//! A town's own table is used when it carries enough variation. Otherwise the
//! day-wise mean of its neighbors' tables replaces it, and when that is also
//! unavailable or flat the assembled window receives a small truncated
//! Gaussian nudge.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::config::PipelineConfig;
use crate::models::{DailyTable, FeatureRow, Field, Provenance, FEATURE_COLS, LOOKBACK_DAYS};

/// Noise samples beyond this many standard deviations are redrawn
pub const NUDGE_TRUNCATION_SIGMAS: f64 = 3.0;

const MAX_REDRAWS: usize = 32;

/// Sample standard deviation of the present values; zero when fewer than two
pub fn sample_std(values: &[Option<f64>]) -> f64 {
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    if present.len() < 2 {
        return 0.0;
    }
    let n = present.len() as f64;
    let mean = present.iter().sum::<f64>() / n;
    let var = present.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    var.sqrt()
}

/// Table chosen by the gate, with how it was obtained
#[derive(Debug, Clone, PartialEq)]
pub struct GatedTable {
    pub table: DailyTable,
    pub provenance: Provenance,
}

/// Degeneracy thresholds and nudge size
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityGate {
    /// Column standard deviation below which a column is flat
    pub tolerance: f64,
    /// Share of flat feature columns that makes a table degenerate
    pub ratio: f64,
    /// Standard deviation of the variation nudge
    pub nudge_std: f64,
}

impl Default for QualityGate {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl QualityGate {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            tolerance: config.degeneracy_tolerance,
            ratio: config.degeneracy_ratio,
            nudge_std: config.nudge_std,
        }
    }

    /// Whether the last [`LOOKBACK_DAYS`] days lack usable variation
    pub fn is_degenerate(&self, table: &DailyTable) -> bool {
        if table.is_empty() {
            return true;
        }
        let window = table.tail(LOOKBACK_DAYS);
        let flat = FEATURE_COLS
            .iter()
            .filter(|field| {
                let std = window.column(**field).map(sample_std).unwrap_or(0.0);
                std < self.tolerance
            })
            .count();
        flat as f64 / FEATURE_COLS.len() as f64 >= self.ratio
    }

    /// Pick the town's own table, a neighbor blend, or mark for nudging.
    ///
    /// `neighbors` are the pass-1 tables of the town's neighbors; empty ones
    /// are ignored.
    pub fn select(&self, own: &DailyTable, neighbors: &[&DailyTable]) -> GatedTable {
        if !self.is_degenerate(own) {
            return GatedTable {
                table: own.clone(),
                provenance: Provenance::Direct,
            };
        }

        let blend = spatial_blend(neighbors);
        match blend {
            Some(table) if !self.is_degenerate(&table) => GatedTable {
                table,
                provenance: Provenance::Blended,
            },
            Some(table) => GatedTable {
                table,
                provenance: Provenance::Nudged,
            },
            None => GatedTable {
                table: own.clone(),
                provenance: Provenance::Nudged,
            },
        }
    }
}

/// Day-wise mean over the non-empty tables, last [`LOOKBACK_DAYS`] days.
///
/// `None` when no table has rows.
pub fn spatial_blend(tables: &[&DailyTable]) -> Option<DailyTable> {
    let usable: Vec<&DailyTable> = tables.iter().copied().filter(|t| !t.is_empty()).collect();
    if usable.is_empty() {
        return None;
    }

    let mut sums: BTreeMap<NaiveDate, BTreeMap<Field, (f64, usize)>> = BTreeMap::new();
    for table in &usable {
        for (row, date) in table.dates().iter().enumerate() {
            let day = sums.entry(*date).or_default();
            for field in table.fields() {
                let acc = day.entry(field).or_insert((0.0, 0));
                if let Some(v) = table.value(field, row) {
                    acc.0 += v;
                    acc.1 += 1;
                }
            }
        }
    }

    let mut blend = DailyTable::new();
    for (date, fields) in sums {
        blend.push_row(
            date,
            fields.into_iter().map(|(field, (sum, count))| {
                (field, (count > 0).then(|| sum / count as f64))
            }),
        );
    }
    Some(blend.tail(LOOKBACK_DAYS))
}

/// Draw one sample of zero-mean noise truncated to
/// [`NUDGE_TRUNCATION_SIGMAS`] standard deviations
fn truncated_sample<R: Rng + ?Sized>(normal: &Normal<f64>, bound: f64, rng: &mut R) -> f64 {
    for _ in 0..MAX_REDRAWS {
        let sample = normal.sample(rng);
        if sample.abs() <= bound {
            return sample;
        }
    }
    0.0
}

/// Add truncated Gaussian noise with standard deviation `std` to every cell
pub fn variation_nudge<R: Rng + ?Sized>(rows: &mut [FeatureRow], std: f64, rng: &mut R) {
    let std = if std.is_finite() { std.abs() } else { 0.0 };
    let Ok(normal) = Normal::new(0.0, std) else {
        return;
    };
    let bound = NUDGE_TRUNCATION_SIGMAS * std;
    for row in rows.iter_mut() {
        for cell in row.iter_mut() {
            *cell += truncated_sample(&normal, bound, rng);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::N_FEATURES;
    use chrono::Duration;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
    }

    /// Table with `varying` feature columns that change day to day and the
    /// rest constant
    fn table(days: usize, varying: usize) -> DailyTable {
        let mut table = DailyTable::new();
        for d in 0..days {
            let values = FEATURE_COLS.iter().enumerate().map(|(i, field)| {
                let v = if i < varying { d as f64 * (i + 1) as f64 } else { 1.0 };
                (*field, Some(v))
            });
            table.push_row(start() + Duration::days(d as i64), values);
        }
        table
    }

    #[test]
    fn test_sample_std() {
        assert_eq!(sample_std(&[Some(1.0)]), 0.0);
        assert_eq!(sample_std(&[None, None]), 0.0);
        assert!((sample_std(&[Some(1.0), Some(3.0)]) - 2f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_degenerate_when_most_columns_flat() {
        let gate = QualityGate::default();
        // 2 of 11 varying: 9/11 flat (82%)
        assert!(gate.is_degenerate(&table(21, 2)));
        // 6 of 11 varying: 5/11 flat (45%)
        assert!(!gate.is_degenerate(&table(21, 6)));
        assert!(gate.is_degenerate(&DailyTable::new()));
    }

    #[test]
    fn test_select_prefers_own_table() {
        let own = table(21, 11);
        let gated = QualityGate::default().select(&own, &[]);
        assert_eq!(gated.provenance, Provenance::Direct);
        assert_eq!(gated.table, own);
    }

    #[test]
    fn test_select_blends_neighbors() {
        let neighbor = table(22, 11);
        let empty = DailyTable::new();
        let gated = QualityGate::default().select(&empty, &[&neighbor, &empty]);
        assert_eq!(gated.provenance, Provenance::Blended);
        assert_eq!(gated.table, neighbor.tail(LOOKBACK_DAYS));
    }

    #[test]
    fn test_select_nudges_without_neighbors() {
        let own = table(21, 0);
        let gated = QualityGate::default().select(&own, &[&DailyTable::new()]);
        assert_eq!(gated.provenance, Provenance::Nudged);
        assert_eq!(gated.table, own);
    }

    #[test]
    fn test_blend_averages_day_wise() {
        let mut a = DailyTable::new();
        a.push_row(start(), [(Field::LstDay, Some(30.0)), (Field::Ndvi, None)]);
        let mut b = DailyTable::new();
        b.push_row(start(), [(Field::LstDay, Some(34.0)), (Field::Ndvi, Some(0.4))]);

        let blend = spatial_blend(&[&a, &b]).unwrap();
        assert_eq!(blend.value(Field::LstDay, 0), Some(32.0));
        assert_eq!(blend.value(Field::Ndvi, 0), Some(0.4));
    }

    #[test]
    fn test_nudge_stays_within_bound() {
        let mut rows = vec![[0.5; N_FEATURES]; LOOKBACK_DAYS];
        let mut rng = StdRng::seed_from_u64(7);
        variation_nudge(&mut rows, 0.02, &mut rng);

        let bound = NUDGE_TRUNCATION_SIGMAS * 0.02 + 1e-12;
        assert!(rows.iter().flatten().all(|v| (v - 0.5).abs() <= bound));
        assert!(rows.iter().flatten().any(|v| *v != 0.5));
    }
}
