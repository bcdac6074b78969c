//! Imputation of reconciled daily tables
//!
//! Steps run in a fixed order: bounded thermal interpolation, derived
//! humidity and wind speed, bounded vegetation forward fill, then a
//! per-column median fill. The output always carries every feature column.

use crate::models::{DailyTable, Field, FEATURE_COLS, MAX_FILL_GAP, NDVI_CLIMATOLOGY};

/// Run the full imputation sequence
pub fn impute(table: &DailyTable) -> DailyTable {
    let mut table = table.clone();
    if table.is_empty() {
        return table;
    }

    for field in [Field::LstDay, Field::LstNight] {
        if let Some(column) = table.column(field) {
            let filled = interpolate_bounded(column, MAX_FILL_GAP);
            table.set_column(field, filled);
        }
    }

    derive_relative_humidity(&mut table);
    derive_wind_speed(&mut table);
    for raw in [Field::Dewpoint2m, Field::WindU, Field::WindV] {
        table.remove_column(raw);
    }

    let ndvi = match table.column(Field::Ndvi) {
        Some(column) if column.iter().any(Option::is_some) => {
            forward_fill_bounded(column, MAX_FILL_GAP)
        }
        _ => vec![Some(NDVI_CLIMATOLOGY); table.len()],
    };
    table.set_column(Field::Ndvi, ndvi);

    for field in FEATURE_COLS {
        let column = table.column(field).map(<[_]>::to_vec).unwrap_or_default();
        table.set_column(field, median_fill(&column));
    }

    table
}

/// Linear interpolation across interior gaps of at most `limit` days; edge
/// gaps of at most `limit` days take the nearest observed value. Longer gaps
/// stay missing.
pub fn interpolate_bounded(values: &[Option<f64>], limit: usize) -> Vec<Option<f64>> {
    let mut out = values.to_vec();
    let observed: Vec<usize> = (0..values.len()).filter(|&i| values[i].is_some()).collect();
    let (Some(&first), Some(&last)) = (observed.first(), observed.last()) else {
        return out;
    };

    if first > 0 && first <= limit {
        for cell in out.iter_mut().take(first) {
            *cell = values[first];
        }
    }

    let trailing = values.len() - 1 - last;
    if trailing > 0 && trailing <= limit {
        for cell in out.iter_mut().skip(last + 1) {
            *cell = values[last];
        }
    }

    for pair in observed.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let gap = b - a - 1;
        if gap == 0 || gap > limit {
            continue;
        }
        if let (Some(va), Some(vb)) = (values[a], values[b]) {
            let span = (b - a) as f64;
            for (i, cell) in out.iter_mut().enumerate().take(b).skip(a + 1) {
                let t = (i - a) as f64 / span;
                *cell = Some(va + (vb - va) * t);
            }
        }
    }

    out
}

/// Each observed value fills at most `limit` following missing days
pub fn forward_fill_bounded(values: &[Option<f64>], limit: usize) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(values.len());
    let mut last: Option<f64> = None;
    let mut run = 0usize;

    for value in values {
        match value {
            Some(v) => {
                last = Some(*v);
                run = 0;
                out.push(Some(*v));
            }
            None => {
                run += 1;
                out.push(if run <= limit { last } else { None });
            }
        }
    }
    out
}

/// Missing cells take the median of the present ones; all-missing stays so
pub fn median_fill(values: &[Option<f64>]) -> Vec<Option<f64>> {
    match median(values) {
        Some(m) => values.iter().map(|v| Some(v.unwrap_or(m))).collect(),
        None => values.to_vec(),
    }
}

/// Median of the present values
pub fn median(values: &[Option<f64>]) -> Option<f64> {
    let mut present: Vec<f64> = values.iter().flatten().copied().collect();
    if present.is_empty() {
        return None;
    }
    present.sort_by(|a, b| a.total_cmp(b));
    let mid = present.len() / 2;
    if present.len() % 2 == 0 {
        Some((present[mid - 1] + present[mid]) / 2.0)
    } else {
        Some(present[mid])
    }
}

fn magnus_vapor_pressure(t: f64) -> f64 {
    6.112 * ((17.625 * t) / (t + 243.04)).exp()
}

/// Relative humidity from air temperature and dew point, both in degC
pub fn relative_humidity(air_temp: f64, dewpoint: f64) -> f64 {
    (100.0 * magnus_vapor_pressure(dewpoint) / magnus_vapor_pressure(air_temp)).clamp(0.0, 100.0)
}

fn derive_relative_humidity(table: &mut DailyTable) {
    let (Some(temp), Some(dew)) = (table.column(Field::AirTemp2m), table.column(Field::Dewpoint2m))
    else {
        return;
    };
    let rh = temp
        .iter()
        .zip(dew)
        .map(|(t, d)| match (t, d) {
            (Some(t), Some(d)) => Some(relative_humidity(*t, *d)),
            _ => None,
        })
        .collect();
    table.set_column(Field::RelativeHumidity, rh);
}

fn derive_wind_speed(table: &mut DailyTable) {
    let (Some(u), Some(v)) = (table.column(Field::WindU), table.column(Field::WindV)) else {
        return;
    };
    let speed = u
        .iter()
        .zip(v)
        .map(|(u, v)| match (u, v) {
            (Some(u), Some(v)) => Some(u.hypot(*v)),
            _ => None,
        })
        .collect();
    table.set_column(Field::WindSpeed, speed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn table_with(columns: &[(Field, Vec<Option<f64>>)]) -> DailyTable {
        let len = columns.first().map(|(_, c)| c.len()).unwrap_or(0);
        let start = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let mut table =
            DailyTable::with_dates((0..len as i64).map(|i| start + Duration::days(i)).collect());
        for (field, values) in columns {
            table.set_column(*field, values.clone());
        }
        table
    }

    #[test]
    fn test_interpolation_fills_short_interior_gap() {
        let values = [Some(10.0), None, None, Some(16.0)];
        let filled = interpolate_bounded(&values, 5);
        assert_eq!(filled, vec![Some(10.0), Some(12.0), Some(14.0), Some(16.0)]);
    }

    #[test]
    fn test_interpolation_leaves_long_gap() {
        let mut values = vec![Some(1.0)];
        values.extend(std::iter::repeat(None).take(6));
        values.push(Some(8.0));
        let filled = interpolate_bounded(&values, 5);
        assert_eq!(filled[1..7], vec![None; 6][..]);
    }

    #[test]
    fn test_interpolation_extends_short_edges() {
        let values = [None, None, Some(5.0), Some(7.0), None];
        let filled = interpolate_bounded(&values, 5);
        assert_eq!(filled, vec![Some(5.0), Some(5.0), Some(5.0), Some(7.0), Some(7.0)]);
    }

    #[test]
    fn test_forward_fill_is_bounded() {
        let mut values = vec![Some(0.3)];
        values.extend(std::iter::repeat(None).take(7));
        let filled = forward_fill_bounded(&values, 5);
        assert_eq!(filled[5], Some(0.3));
        assert_eq!(filled[6], None);
        assert_eq!(filled[7], None);
    }

    #[test]
    fn test_median_fill() {
        let filled = median_fill(&[Some(1.0), None, Some(3.0), Some(10.0)]);
        assert_eq!(filled, vec![Some(1.0), Some(3.0), Some(3.0), Some(10.0)]);
        assert_eq!(median_fill(&[None, None]), vec![None, None]);
    }

    #[test]
    fn test_relative_humidity_bounds() {
        assert!((relative_humidity(25.0, 25.0) - 100.0).abs() < 1e-9);
        let rh = relative_humidity(35.0, 10.0);
        assert!(rh > 0.0 && rh < 30.0);
        assert_eq!(relative_humidity(10.0, 20.0), 100.0);
    }

    #[test]
    fn test_impute_derives_and_drops_raw_columns() {
        let table = table_with(&[
            (Field::AirTemp2m, vec![Some(30.0), Some(31.0), None]),
            (Field::Dewpoint2m, vec![Some(20.0), None, Some(18.0)]),
            (Field::WindU, vec![Some(3.0), Some(0.0), Some(1.0)]),
            (Field::WindV, vec![Some(4.0), Some(2.0), None]),
        ]);
        let imputed = impute(&table);

        assert!(!imputed.has_column(Field::Dewpoint2m));
        assert!(!imputed.has_column(Field::WindU));
        assert_eq!(imputed.value(Field::WindSpeed, 0), Some(5.0));
        assert_eq!(imputed.value(Field::WindSpeed, 1), Some(2.0));
        // day 2 has no v component; median of 5 and 2
        assert_eq!(imputed.value(Field::WindSpeed, 2), Some(3.5));
        let rh = imputed.column(Field::RelativeHumidity).unwrap();
        assert!(rh.iter().all(|v| v.is_some()));
    }

    #[test]
    fn test_impute_defaults_vegetation_and_keeps_every_feature() {
        let table = table_with(&[(Field::LstDay, vec![Some(30.0), None, Some(32.0)])]);
        let imputed = impute(&table);

        for field in FEATURE_COLS {
            assert!(imputed.has_column(field), "missing {}", field);
        }
        assert_eq!(
            imputed.column(Field::Ndvi).unwrap(),
            &[Some(NDVI_CLIMATOLOGY); 3]
        );
        assert_eq!(imputed.value(Field::LstDay, 1), Some(31.0));
        assert_eq!(imputed.column(Field::Precipitation).unwrap(), &[None, None, None]);
    }
}
