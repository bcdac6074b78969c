//! Prediction records and risk banding

use chrono::{DateTime, Duration, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::features::HORIZON_DAYS;
use super::region::Town;
use super::window::Provenance;

/// Display severity derived from probability
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    None,
    Moderate,
    High,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::None => write!(f, "None"),
            Severity::Moderate => write!(f, "Moderate"),
            Severity::High => write!(f, "High"),
        }
    }
}

/// Probability cut-offs for severity bands (inclusive lower bounds)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeverityBands {
    pub moderate: f64,
    pub high: f64,
}

impl Default for SeverityBands {
    fn default() -> Self {
        Self {
            moderate: 0.70,
            high: 0.75,
        }
    }
}

impl SeverityBands {
    pub fn classify(&self, probability: f64) -> Severity {
        if probability >= self.high {
            Severity::High
        } else if probability >= self.moderate {
            Severity::Moderate
        } else {
            Severity::None
        }
    }
}

/// Alert decision: inclusive at the threshold
pub fn is_alert(probability: f64, threshold: f64) -> bool {
    probability >= threshold
}

/// Human-readable message attached to published predictions
pub fn alert_message(town: Town, alert: bool) -> String {
    if alert {
        format!(
            "HARARA ALERT: High heatwave risk expected in {}. Stay hydrated and seek shade during peak hours.",
            town
        )
    } else {
        format!(
            "HARARA UPDATE: No heatwave expected - conditions normal in {}.",
            town
        )
    }
}

/// Key of the per-day prediction document, e.g. `2025-03-04_Juba`
pub fn document_key(date: NaiveDate, town: Town) -> String {
    format!("{}_{}", date.format("%Y-%m-%d"), town)
}

/// One town's outcome for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub run_id: Uuid,
    pub town: Town,
    pub run_ts: DateTime<FixedOffset>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub probability: f64,
    pub alert: bool,
    pub severity: Severity,
    pub provenance: Provenance,
}

impl PredictionRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        run_id: Uuid,
        town: Town,
        run_ts: DateTime<FixedOffset>,
        start_date: NaiveDate,
        probability: f64,
        threshold: f64,
        bands: &SeverityBands,
        provenance: Provenance,
    ) -> Self {
        Self {
            run_id,
            town,
            run_ts,
            start_date,
            end_date: start_date + Duration::days(HORIZON_DAYS),
            probability,
            alert: is_alert(probability, threshold),
            severity: bands.classify(probability),
            provenance,
        }
    }

    pub fn message(&self) -> String {
        alert_message(self.town, self.alert)
    }

    /// Extra attributes stored alongside the relational row
    pub fn details_json(&self) -> serde_json::Value {
        serde_json::json!({
            "severity": self.severity,
            "provenance": self.provenance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_severity_bands() {
        let bands = SeverityBands::default();
        assert_eq!(bands.classify(0.10), Severity::None);
        assert_eq!(bands.classify(0.70), Severity::Moderate);
        assert_eq!(bands.classify(0.7499), Severity::Moderate);
        assert_eq!(bands.classify(0.75), Severity::High);
        assert_eq!(bands.classify(1.0), Severity::High);
    }

    #[test]
    fn test_alert_is_inclusive() {
        assert!(is_alert(0.5, 0.5));
        assert!(!is_alert(0.49, 0.5));
    }

    #[test]
    fn test_record_end_date_is_horizon_after_start() {
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let run_ts = tz.with_ymd_and_hms(2025, 3, 4, 7, 0, 0).unwrap();
        let start = NaiveDate::from_ymd_opt(2025, 3, 4).unwrap();
        let record = PredictionRecord::new(
            Uuid::new_v4(),
            Town::Bor,
            run_ts,
            start,
            0.8,
            0.6,
            &SeverityBands::default(),
            Provenance::Direct,
        );
        assert_eq!(record.end_date, NaiveDate::from_ymd_opt(2025, 3, 11).unwrap());
        assert!(record.alert);
        assert_eq!(record.severity, Severity::High);
        assert!(record.message().starts_with("HARARA ALERT"));
    }

    #[test]
    fn test_document_key_format() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 4).unwrap();
        assert_eq!(document_key(date, Town::Malakal), "2025-03-04_Malakal");
    }
}
