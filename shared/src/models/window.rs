//! Classifier input windows

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use super::features::{LOOKBACK_DAYS, N_FEATURES};
use super::region::Town;
use crate::validation::ValidationError;

/// One day of model features in [`FEATURE_COLS`](super::FEATURE_COLS) order
pub type FeatureRow = [f64; N_FEATURES];

/// Which fallback tier produced a window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Built from the town's own observations
    Direct,
    /// Day-wise mean of neighbor towns
    Blended,
    /// Synthetic noise added to a flat window; low confidence
    Nudged,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Direct => "direct",
            Provenance::Blended => "blended",
            Provenance::Nudged => "nudged",
        }
    }
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Exactly [`LOOKBACK_DAYS`] contiguous days of complete features for one town
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureWindow {
    town: Town,
    dates: Vec<NaiveDate>,
    rows: Vec<FeatureRow>,
    provenance: Provenance,
}

impl FeatureWindow {
    pub fn new(
        town: Town,
        dates: Vec<NaiveDate>,
        rows: Vec<FeatureRow>,
        provenance: Provenance,
    ) -> Result<Self, ValidationError> {
        if rows.len() != LOOKBACK_DAYS || dates.len() != LOOKBACK_DAYS {
            return Err(ValidationError::WindowShape {
                rows: rows.len(),
                dates: dates.len(),
                expected: LOOKBACK_DAYS,
            });
        }
        if dates.windows(2).any(|w| w[1] != w[0] + Duration::days(1)) {
            return Err(ValidationError::NonContiguousDates);
        }
        if let Some(day) = rows.iter().position(|r| r.iter().any(|v| !v.is_finite())) {
            return Err(ValidationError::MissingValue { day });
        }

        Ok(Self {
            town,
            dates,
            rows,
            provenance,
        })
    }

    pub fn town(&self) -> Town {
        self.town
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    pub fn first_date(&self) -> NaiveDate {
        self.dates[0]
    }

    pub fn last_date(&self) -> NaiveDate {
        self.dates[LOOKBACK_DAYS - 1]
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    fn dates_from(start: NaiveDate, n: usize) -> Vec<NaiveDate> {
        (0..n as i64).map(|i| start + Duration::days(i)).collect()
    }

    fn start_strategy() -> impl Strategy<Value = NaiveDate> {
        (0i64..3650).prop_map(|offset| {
            NaiveDate::from_ymd_opt(2015, 1, 1).unwrap() + Duration::days(offset)
        })
    }

    fn row_strategy() -> impl Strategy<Value = FeatureRow> {
        prop::array::uniform11(-1.0e6f64..1.0e6)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Any finite rows over contiguous dates form a window
        #[test]
        fn prop_finite_contiguous_window_is_accepted(
            start in start_strategy(),
            rows in prop::collection::vec(row_strategy(), LOOKBACK_DAYS),
        ) {
            let window = FeatureWindow::new(
                Town::Wau,
                dates_from(start, LOOKBACK_DAYS),
                rows.clone(),
                Provenance::Direct,
            )
            .unwrap();
            prop_assert_eq!(window.rows(), rows.as_slice());
            prop_assert_eq!(window.first_date(), start);
            prop_assert_eq!(window.last_date(), start + Duration::days(LOOKBACK_DAYS as i64 - 1));
        }

        /// Any length other than the lookback is a shape error
        #[test]
        fn prop_wrong_length_is_rejected(
            start in start_strategy(),
            len in (0usize..40).prop_filter("not the lookback", |n| *n != LOOKBACK_DAYS),
        ) {
            let result = FeatureWindow::new(
                Town::Wau,
                dates_from(start, len),
                vec![[0.0; N_FEATURES]; len],
                Provenance::Direct,
            );
            let is_shape_error = matches!(result, Err(ValidationError::WindowShape { .. }));
            prop_assert!(is_shape_error);
        }

        /// A single non-finite cell is reported at its day
        #[test]
        fn prop_non_finite_cell_is_rejected(
            start in start_strategy(),
            day in 0usize..LOOKBACK_DAYS,
            column in 0usize..N_FEATURES,
            bad in prop_oneof![Just(f64::NAN), Just(f64::INFINITY), Just(f64::NEG_INFINITY)],
        ) {
            let mut rows = vec![[1.0; N_FEATURES]; LOOKBACK_DAYS];
            rows[day][column] = bad;
            let result = FeatureWindow::new(
                Town::Wau,
                dates_from(start, LOOKBACK_DAYS),
                rows,
                Provenance::Nudged,
            );
            prop_assert_eq!(result, Err(ValidationError::MissingValue { day }));
        }

        /// Any skipped or repeated day breaks contiguity
        #[test]
        fn prop_broken_date_sequence_is_rejected(
            start in start_strategy(),
            at in 1usize..LOOKBACK_DAYS,
            shift in prop_oneof![Just(-1i64), Just(1i64), Just(5i64)],
        ) {
            let mut dates = dates_from(start, LOOKBACK_DAYS);
            for date in dates.iter_mut().skip(at) {
                *date = *date + Duration::days(shift);
            }
            let result = FeatureWindow::new(
                Town::Wau,
                dates,
                vec![[0.0; N_FEATURES]; LOOKBACK_DAYS],
                Provenance::Blended,
            );
            prop_assert_eq!(result, Err(ValidationError::NonContiguousDates));
        }
    }
}
