//! Towns, regions and the neighbor map used by spatial fallback

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::GpsCoordinates;
use crate::validation::ValidationError;

/// Buffer radius around each town centroid used for spatial reduction
pub const TOWN_BUFFER_METERS: f64 = 3000.0;

/// Vertices used to approximate the circular buffer
const BUFFER_VERTICES: usize = 32;

const METERS_PER_DEGREE_LAT: f64 = 111_320.0;

/// Towns covered by the forecast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Town {
    Juba,
    Wau,
    Yambio,
    Bor,
    Malakal,
    Bentiu,
}

impl Town {
    pub const ALL: [Town; 6] = [
        Town::Juba,
        Town::Wau,
        Town::Yambio,
        Town::Bor,
        Town::Malakal,
        Town::Bentiu,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Town::Juba => "Juba",
            Town::Wau => "Wau",
            Town::Yambio => "Yambio",
            Town::Bor => "Bor",
            Town::Malakal => "Malakal",
            Town::Bentiu => "Bentiu",
        }
    }

    pub fn centroid(&self) -> GpsCoordinates {
        match self {
            Town::Juba => GpsCoordinates::new(4.8594, 31.5804),
            Town::Wau => GpsCoordinates::new(7.7011, 28.0070),
            Town::Yambio => GpsCoordinates::new(4.5700, 28.4167),
            Town::Bor => GpsCoordinates::new(6.2065, 31.5594),
            Town::Malakal => GpsCoordinates::new(9.5330, 32.4730),
            Town::Bentiu => GpsCoordinates::new(9.2330, 29.7820),
        }
    }

    /// Geographically adjacent towns
    pub fn neighbors(&self) -> [Town; 2] {
        match self {
            Town::Juba => [Town::Bor, Town::Yambio],
            Town::Bor => [Town::Juba, Town::Malakal],
            Town::Malakal => [Town::Bor, Town::Bentiu],
            Town::Bentiu => [Town::Wau, Town::Malakal],
            Town::Wau => [Town::Bentiu, Town::Yambio],
            Town::Yambio => [Town::Juba, Town::Wau],
        }
    }
}

impl std::fmt::Display for Town {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Town {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Town::ALL
            .iter()
            .copied()
            .find(|t| t.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ValidationError::UnknownTown(s.to_string()))
    }
}

/// A town with the polygon used for spatial-mean reduction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Region {
    pub town: Town,
    pub centroid: GpsCoordinates,
    pub buffer_meters: f64,
    /// Closed ring (first vertex repeated last)
    pub polygon: Vec<GpsCoordinates>,
}

impl Region {
    pub fn new(town: Town, centroid: GpsCoordinates, buffer_meters: f64) -> Self {
        Self {
            town,
            centroid,
            buffer_meters,
            polygon: buffer_ring(centroid, buffer_meters),
        }
    }

    pub fn for_town(town: Town) -> Self {
        Self::new(town, town.centroid(), TOWN_BUFFER_METERS)
    }

    /// GeoJSON polygon geometry for provider requests
    pub fn to_geojson(&self) -> serde_json::Value {
        let ring: Vec<[f64; 2]> = self.polygon.iter().map(|p| p.to_position()).collect();
        serde_json::json!({
            "type": "Polygon",
            "coordinates": [ring],
        })
    }
}

fn buffer_ring(centroid: GpsCoordinates, radius_m: f64) -> Vec<GpsCoordinates> {
    let dlat = radius_m / METERS_PER_DEGREE_LAT;
    let dlon = radius_m / (METERS_PER_DEGREE_LAT * centroid.latitude.to_radians().cos());

    let mut ring: Vec<GpsCoordinates> = (0..BUFFER_VERTICES)
        .map(|i| {
            let theta = 2.0 * std::f64::consts::PI * i as f64 / BUFFER_VERTICES as f64;
            GpsCoordinates::new(
                centroid.latitude + dlat * theta.sin(),
                centroid.longitude + dlon * theta.cos(),
            )
        })
        .collect();
    if let Some(first) = ring.first().copied() {
        ring.push(first);
    }
    ring
}

/// Fixed set of regions and their adjacency
#[derive(Debug, Clone)]
pub struct RegionRegistry {
    regions: BTreeMap<Town, Region>,
    neighbors: BTreeMap<Town, Vec<Town>>,
}

impl RegionRegistry {
    pub fn new(regions: Vec<Region>, neighbors: BTreeMap<Town, Vec<Town>>) -> Self {
        Self {
            regions: regions.into_iter().map(|r| (r.town, r)).collect(),
            neighbors,
        }
    }

    /// The six-town registry with its predefined neighbor map
    pub fn south_sudan() -> Self {
        let regions = Town::ALL.iter().map(|t| Region::for_town(*t)).collect();
        let neighbors = Town::ALL
            .iter()
            .map(|t| (*t, t.neighbors().to_vec()))
            .collect();
        Self::new(regions, neighbors)
    }

    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.regions.values()
    }

    pub fn towns(&self) -> impl Iterator<Item = Town> + '_ {
        self.regions.keys().copied()
    }

    pub fn neighbors(&self, town: Town) -> &[Town] {
        self.neighbors.get(&town).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

impl Default for RegionRegistry {
    fn default() -> Self {
        Self::south_sudan()
    }
}
