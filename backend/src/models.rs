use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use shared::{NearbyAsset, Position, RouteFeature, RouteProperties, SafetyGrade, SafetySummary};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid coordinates: {0}")]
pub struct InvalidCoordinates(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    /// Build a coordinate, rejecting non-finite or out-of-range values.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, InvalidCoordinates> {
        let coord = Self {
            latitude,
            longitude,
        };
        if coord.is_valid() {
            Ok(coord)
        } else {
            Err(InvalidCoordinates(format!("{latitude},{longitude}")))
        }
    }

    /// Parse the `"lat,lng"` form used by query strings.
    pub fn parse_pair(raw: &str) -> Result<Self, InvalidCoordinates> {
        let mut parts = raw.split(',').map(str::trim);
        let (Some(lat), Some(lng), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(InvalidCoordinates(raw.to_string()));
        };
        let latitude = lat
            .parse::<f64>()
            .map_err(|_| InvalidCoordinates(raw.to_string()))?;
        let longitude = lng
            .parse::<f64>()
            .map_err(|_| InvalidCoordinates(raw.to_string()))?;
        Self::new(latitude, longitude)
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// GeoJSON positions are `[lng, lat]`.
    pub fn from_position(position: Position) -> Self {
        Self {
            latitude: position[1],
            longitude: position[0],
        }
    }

    pub fn to_position(self) -> Position {
        [self.longitude, self.latitude]
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6},{:.6}", self.latitude, self.longitude)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteType {
    Normal,
    Safe,
}

impl RouteType {
    pub fn as_str(self) -> &'static str {
        match self {
            RouteType::Normal => "normal",
            RouteType::Safe => "safe",
        }
    }
}

impl fmt::Display for RouteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RouteType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" | "normal-direction" => Ok(RouteType::Normal),
            "safe" | "safe-direction" => Ok(RouteType::Safe),
            other => Err(format!("unknown route type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RouteRequest {
    pub start: Coordinate,
    pub goal: Coordinate,
    pub route_type: RouteType,
}

/// Merged pedestrian route: ordered vertices plus provider-reported totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePath {
    pub coordinates: Vec<Coordinate>,
    /// Meters.
    pub total_distance: f64,
    /// Seconds.
    pub total_time: f64,
}

impl RoutePath {
    pub fn to_feature(&self) -> RouteFeature {
        RouteFeature::new(
            self.coordinates.iter().map(|c| c.to_position()).collect(),
            RouteProperties {
                total_distance: self.total_distance,
                total_time: self.total_time,
            },
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetCategory {
    Cctv,
    Store,
}

impl AssetCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            AssetCategory::Cctv => "cctv",
            AssetCategory::Store => "store",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyAsset {
    pub id: String,
    pub name: Option<String>,
    pub category: AssetCategory,
    pub location: Coordinate,
    pub address: Option<String>,
    /// Meters from the lookup center.
    pub distance: Option<f64>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl SafetyAsset {
    pub fn to_nearby(&self) -> NearbyAsset {
        NearbyAsset {
            id: self.id.clone(),
            name: self.name.clone(),
            category: self.category.as_str().to_string(),
            latitude: self.location.latitude,
            longitude: self.location.longitude,
            address: self.address.clone(),
            distance: self.distance,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyResult {
    pub grade: SafetyGrade,
    /// Unrounded percentage in `[0, 100]`.
    pub coverage_ratio: f64,
    pub cctv_count: usize,
    pub store_count: usize,
    pub flagged_points: usize,
    pub final_score: f64,
    pub nearby_cctvs: Vec<SafetyAsset>,
    pub nearby_stores: Vec<SafetyAsset>,
}

impl SafetyResult {
    pub fn summary(&self) -> SafetySummary {
        SafetySummary {
            grade: self.grade,
            cctv_count: self.cctv_count,
            store_count: self.store_count,
            coverage_ratio: self.coverage_ratio.round() as u32,
            final_score: self.final_score,
        }
    }
}
