//! Source collection
//!
//! Queries the geospatial provider for each signal family over a town polygon
//! and turns the daily spatial means into a [`DailyTable`] with corrected
//! units. Provider failures, timeouts and empty coverage are returned as a
//! [`SourceOutcome`] and never propagate as errors.

use std::sync::Arc;
use std::time::Duration;

use shared::DateRange;

use crate::external::earth_engine::{GeoProvider, ReduceRequest, ReducedDay};
use crate::models::{DailyTable, Field, Region};

const KELVIN_OFFSET: f64 = 273.15;

/// Unit correction applied to a raw band value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Correction {
    None,
    KelvinToCelsius,
    Multiply(f64),
}

impl Correction {
    pub fn apply(&self, value: f64) -> f64 {
        match self {
            Correction::None => value,
            Correction::KelvinToCelsius => value - KELVIN_OFFSET,
            Correction::Multiply(factor) => value * factor,
        }
    }
}

/// A provider band and the table column it lands in
#[derive(Debug, Clone, Copy)]
pub struct BandSpec {
    pub band: &'static str,
    pub field: Field,
    pub correction: Correction,
}

const ATMOSPHERIC_BANDS: [BandSpec; 7] = [
    BandSpec {
        band: "temperature_2m_max",
        field: Field::AirTemp2m,
        correction: Correction::KelvinToCelsius,
    },
    BandSpec {
        band: "dewpoint_temperature_2m_max",
        field: Field::Dewpoint2m,
        correction: Correction::KelvinToCelsius,
    },
    BandSpec {
        band: "total_precipitation_sum",
        field: Field::Precipitation,
        correction: Correction::None,
    },
    BandSpec {
        band: "surface_net_solar_radiation_sum",
        field: Field::NetSolarRadiation,
        correction: Correction::None,
    },
    BandSpec {
        band: "u_component_of_wind_10m",
        field: Field::WindU,
        correction: Correction::None,
    },
    BandSpec {
        band: "v_component_of_wind_10m",
        field: Field::WindV,
        correction: Correction::None,
    },
    BandSpec {
        band: "volumetric_soil_water_layer_1",
        field: Field::SoilMoisture,
        correction: Correction::None,
    },
];

const THERMAL_BANDS: [BandSpec; 2] = [
    BandSpec {
        band: "LST_Day_1km",
        field: Field::LstDay,
        correction: Correction::Multiply(0.02),
    },
    BandSpec {
        band: "LST_Night_1km",
        field: Field::LstNight,
        correction: Correction::Multiply(0.02),
    },
];

const VEGETATIVE_BANDS: [BandSpec; 1] = [BandSpec {
    band: "NDVI",
    field: Field::Ndvi,
    correction: Correction::Multiply(0.0001),
}];

/// Group of bands fetched from one daily collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SignalFamily {
    Atmospheric,
    Thermal,
    Vegetative,
}

impl SignalFamily {
    pub const ALL: [SignalFamily; 3] = [
        SignalFamily::Atmospheric,
        SignalFamily::Thermal,
        SignalFamily::Vegetative,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SignalFamily::Atmospheric => "atmospheric",
            SignalFamily::Thermal => "thermal",
            SignalFamily::Vegetative => "vegetative",
        }
    }

    pub fn collection(&self) -> &'static str {
        match self {
            SignalFamily::Atmospheric => "ECMWF/ERA5_LAND/DAILY_AGGR",
            SignalFamily::Thermal => "MODIS/061/MOD11A1",
            SignalFamily::Vegetative => "MODIS/061/MOD13Q1",
        }
    }

    pub fn bands(&self) -> &'static [BandSpec] {
        match self {
            SignalFamily::Atmospheric => &ATMOSPHERIC_BANDS,
            SignalFamily::Thermal => &THERMAL_BANDS,
            SignalFamily::Vegetative => &VEGETATIVE_BANDS,
        }
    }

    /// Reduction resolution in meters
    pub fn scale_meters(&self) -> f64 {
        match self {
            SignalFamily::Vegetative => 250.0,
            _ => 1000.0,
        }
    }

    /// Extra days fetched before the range start (16-day composites)
    pub fn extra_lookback_days(&self) -> i64 {
        match self {
            SignalFamily::Vegetative => 90,
            _ => 0,
        }
    }

    pub fn request(&self, region: &Region, range: &DateRange) -> ReduceRequest {
        let range = range.extended_back(self.extra_lookback_days());
        ReduceRequest {
            collection: self.collection().to_string(),
            bands: self.bands().iter().map(|b| b.band.to_string()).collect(),
            start_date: range.start,
            end_date: range.end,
            geometry: region.to_geojson(),
            scale_meters: self.scale_meters(),
            reducer: "mean",
        }
    }

    /// Build a table from provider days, dropping days with no coverage
    pub fn to_table(&self, region: &Region, days: &[ReducedDay]) -> DailyTable {
        let mut table = DailyTable::new();
        for day in days {
            let values: Vec<(Field, Option<f64>)> = self
                .bands()
                .iter()
                .map(|spec| {
                    let raw = day.values.get(spec.band).copied().flatten();
                    (spec.field, raw.map(|v| spec.correction.apply(v)))
                })
                .collect();

            if values.iter().all(|(_, v)| v.is_none()) {
                continue;
            }

            table.push_row(
                day.date,
                values.into_iter().chain([
                    (Field::Longitude, Some(region.centroid.longitude)),
                    (Field::Latitude, Some(region.centroid.latitude)),
                ]),
            );
        }
        table
    }
}

impl std::fmt::Display for SignalFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Result of one provider query
#[derive(Debug, Clone, PartialEq)]
pub enum SourceOutcome {
    /// At least one covered day
    Rows(DailyTable),
    /// Reachable, but no coverage in the range
    Empty,
    /// Call error or timeout
    Failed(String),
}

impl SourceOutcome {
    pub fn row_count(&self) -> usize {
        match self {
            SourceOutcome::Rows(table) => table.len(),
            _ => 0,
        }
    }

    pub fn table(&self) -> Option<&DailyTable> {
        match self {
            SourceOutcome::Rows(table) => Some(table),
            _ => None,
        }
    }
}

/// Outcomes of every family for one town
pub type FamilyOutcomes = Vec<(SignalFamily, SourceOutcome)>;

/// Collects signal families from a provider with a per-call timeout
#[derive(Clone)]
pub struct SourceCollector {
    provider: Arc<dyn GeoProvider>,
    timeout: Duration,
}

impl SourceCollector {
    pub fn new(provider: Arc<dyn GeoProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// Query one family for one region
    pub async fn collect(
        &self,
        region: &Region,
        range: &DateRange,
        family: SignalFamily,
    ) -> SourceOutcome {
        let request = family.request(region, range);

        let outcome =
            match tokio::time::timeout(self.timeout, self.provider.reduce_daily(&request)).await {
                Err(_) => SourceOutcome::Failed(format!(
                    "timed out after {}s",
                    self.timeout.as_secs_f64()
                )),
                Ok(Err(e)) => SourceOutcome::Failed(e.to_string()),
                Ok(Ok(days)) => {
                    let table = family.to_table(region, &days);
                    if table.is_empty() {
                        SourceOutcome::Empty
                    } else {
                        SourceOutcome::Rows(table)
                    }
                }
            };

        match &outcome {
            SourceOutcome::Failed(reason) => {
                tracing::warn!(town = %region.town, family = %family, reason = %reason, "Source unavailable");
            }
            _ => {
                tracing::debug!(town = %region.town, family = %family, rows = outcome.row_count(), "Source collected");
            }
        }
        outcome
    }

    /// Query every family for one region concurrently
    pub async fn collect_all(&self, region: &Region, range: &DateRange) -> FamilyOutcomes {
        let (atmospheric, thermal, vegetative) = tokio::join!(
            self.collect(region, range, SignalFamily::Atmospheric),
            self.collect(region, range, SignalFamily::Thermal),
            self.collect(region, range, SignalFamily::Vegetative),
        );
        vec![
            (SignalFamily::Atmospheric, atmospheric),
            (SignalFamily::Thermal, thermal),
            (SignalFamily::Vegetative, vegetative),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, AppResult};
    use crate::models::Town;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    fn range() -> DateRange {
        DateRange::new(date(1), date(22)).unwrap()
    }

    fn day(d: u32, values: &[(&str, Option<f64>)]) -> ReducedDay {
        ReducedDay {
            date: date(d),
            values: values
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    enum Behaviour {
        Days(Vec<ReducedDay>),
        Fail,
        Hang,
    }

    struct ScriptedProvider(Behaviour);

    #[async_trait]
    impl GeoProvider for ScriptedProvider {
        async fn reduce_daily(&self, _: &ReduceRequest) -> AppResult<Vec<ReducedDay>> {
            match &self.0 {
                Behaviour::Days(days) => Ok(days.clone()),
                Behaviour::Fail => Err(AppError::Provider("quota exceeded".into())),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(Vec::new())
                }
            }
        }
    }

    fn collector(behaviour: Behaviour) -> SourceCollector {
        SourceCollector::new(
            Arc::new(ScriptedProvider(behaviour)),
            Duration::from_millis(50),
        )
    }

    #[test]
    fn test_corrections() {
        assert!((Correction::KelvinToCelsius.apply(300.0) - 26.85).abs() < 1e-9);
        assert!((Correction::Multiply(0.02).apply(15_000.0) - 300.0).abs() < 1e-9);
        assert_eq!(Correction::None.apply(3.5), 3.5);
    }

    #[test]
    fn test_vegetative_request_extends_lookback() {
        let region = Region::for_town(Town::Wau);
        let request = SignalFamily::Vegetative.request(&region, &range());
        assert_eq!(request.start_date, NaiveDate::from_ymd_opt(2024, 11, 30).unwrap());
        assert_eq!(request.end_date, date(22));
        assert_eq!(request.scale_meters, 250.0);
        assert_eq!(request.bands, vec!["NDVI".to_string()]);
    }

    #[test]
    fn test_to_table_corrects_units_and_adds_location() {
        let region = Region::for_town(Town::Juba);
        let days = vec![day(
            1,
            &[("LST_Day_1km", Some(15_500.0)), ("LST_Night_1km", Some(14_800.0))],
        )];
        let table = SignalFamily::Thermal.to_table(&region, &days);
        assert_eq!(table.len(), 1);
        assert!((table.value(Field::LstDay, 0).unwrap() - 310.0).abs() < 1e-9);
        assert_eq!(table.value(Field::Longitude, 0), Some(31.5804));
        assert_eq!(table.value(Field::Latitude, 0), Some(4.8594));
    }

    #[test]
    fn test_uncovered_days_are_dropped() {
        let region = Region::for_town(Town::Bor);
        let days = vec![day(1, &[("NDVI", None)]), day(2, &[("NDVI", Some(4000.0))])];
        let table = SignalFamily::Vegetative.to_table(&region, &days);
        assert_eq!(table.dates(), &[date(2)]);
        assert!((table.value(Field::Ndvi, 0).unwrap() - 0.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_provider_error_is_failed_outcome() {
        let outcome = collector(Behaviour::Fail)
            .collect(&Region::for_town(Town::Bor), &range(), SignalFamily::Thermal)
            .await;
        assert!(matches!(outcome, SourceOutcome::Failed(reason) if reason.contains("quota")));
    }

    #[tokio::test]
    async fn test_timeout_is_failed_outcome() {
        let outcome = collector(Behaviour::Hang)
            .collect(&Region::for_town(Town::Bor), &range(), SignalFamily::Thermal)
            .await;
        assert!(matches!(outcome, SourceOutcome::Failed(reason) if reason.contains("timed out")));
    }

    #[tokio::test]
    async fn test_no_coverage_is_empty_outcome() {
        let outcomes = collector(Behaviour::Days(Vec::new()))
            .collect_all(&Region::for_town(Town::Malakal), &range())
            .await;
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|(_, o)| *o == SourceOutcome::Empty));
    }
}
