//! Common types used across the pipeline

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::validation::ValidationError;

/// GPS coordinates in decimal degrees (WGS84)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GpsCoordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsCoordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// GeoJSON position order: `[longitude, latitude]`
    pub fn to_position(&self) -> [f64; 2] {
        [self.longitude, self.latitude]
    }
}

/// Inclusive calendar date range
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, ValidationError> {
        if end < start {
            return Err(ValidationError::InvalidDateRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Range of `days` days ending at `end`, inclusive on both sides
    pub fn ending_at(end: NaiveDate, days: usize) -> Self {
        let span = days.saturating_sub(1) as i64;
        Self {
            start: end - Duration::days(span),
            end,
        }
    }

    /// Number of calendar days covered
    pub fn len_days(&self) -> usize {
        ((self.end - self.start).num_days() + 1) as usize
    }

    /// Every date in the range, ascending
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let start = self.start;
        (0..self.len_days() as i64).map(move |offset| start + Duration::days(offset))
    }

    /// The same range with its start moved `days` earlier
    pub fn extended_back(&self, days: i64) -> Self {
        Self {
            start: self.start - Duration::days(days),
            end: self.end,
        }
    }
}
