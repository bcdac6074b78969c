//! Feature columns and pipeline constants

use serde::{Deserialize, Serialize};

/// Days of history fed to the classifier
pub const LOOKBACK_DAYS: usize = 21;

/// Days ahead the predicted probability describes
pub const HORIZON_DAYS: i64 = 7;

/// Longest run of missing days that interpolation or forward fill may bridge
pub const MAX_FILL_GAP: usize = 5;

/// Climatological vegetation index used when no observation is available
pub const NDVI_CLIMATOLOGY: f64 = 0.5;

/// A column of the daily table.
///
/// The first eleven variants are the model features, declared in model
/// column order so that ordered maps iterate them first. The last three are
/// raw provider bands consumed by derivation and dropped afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Field {
    #[serde(rename = "LST_Day_1km")]
    LstDay,
    #[serde(rename = "LST_Night_1km")]
    LstNight,
    #[serde(rename = "air_temp_2m")]
    AirTemp2m,
    #[serde(rename = "ndvi")]
    Ndvi,
    #[serde(rename = "net_solar_radiation")]
    NetSolarRadiation,
    #[serde(rename = "precipitation")]
    Precipitation,
    #[serde(rename = "relative_humidity")]
    RelativeHumidity,
    #[serde(rename = "soil_moisture")]
    SoilMoisture,
    #[serde(rename = "wind_speed")]
    WindSpeed,
    #[serde(rename = "longitude")]
    Longitude,
    #[serde(rename = "latitude")]
    Latitude,
    #[serde(rename = "dewpoint_temperature_2m_max")]
    Dewpoint2m,
    #[serde(rename = "u_component_of_wind_10m")]
    WindU,
    #[serde(rename = "v_component_of_wind_10m")]
    WindV,
}

/// Model input columns, in the order the scaler and classifier were fit on
pub const FEATURE_COLS: [Field; 11] = [
    Field::LstDay,
    Field::LstNight,
    Field::AirTemp2m,
    Field::Ndvi,
    Field::NetSolarRadiation,
    Field::Precipitation,
    Field::RelativeHumidity,
    Field::SoilMoisture,
    Field::WindSpeed,
    Field::Longitude,
    Field::Latitude,
];

pub const N_FEATURES: usize = FEATURE_COLS.len();

impl Field {
    pub fn column_name(&self) -> &'static str {
        match self {
            Field::LstDay => "LST_Day_1km",
            Field::LstNight => "LST_Night_1km",
            Field::AirTemp2m => "air_temp_2m",
            Field::Ndvi => "ndvi",
            Field::NetSolarRadiation => "net_solar_radiation",
            Field::Precipitation => "precipitation",
            Field::RelativeHumidity => "relative_humidity",
            Field::SoilMoisture => "soil_moisture",
            Field::WindSpeed => "wind_speed",
            Field::Longitude => "longitude",
            Field::Latitude => "latitude",
            Field::Dewpoint2m => "dewpoint_temperature_2m_max",
            Field::WindU => "u_component_of_wind_10m",
            Field::WindV => "v_component_of_wind_10m",
        }
    }

    /// Position in [`FEATURE_COLS`], `None` for raw derivation inputs
    pub fn feature_index(&self) -> Option<usize> {
        FEATURE_COLS.iter().position(|f| f == self)
    }

    pub fn is_feature(&self) -> bool {
        self.feature_index().is_some()
    }

    /// Constant per-town columns attached to every provider row
    pub fn is_location(&self) -> bool {
        matches!(self, Field::Longitude | Field::Latitude)
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.column_name())
    }
}
