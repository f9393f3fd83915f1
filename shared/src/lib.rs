use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Position in GeoJSON order: `[lng, lat]`.
pub type Position = [f64; 2];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineString {
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: Vec<Position>,
}

impl LineString {
    pub fn new(coordinates: Vec<Position>) -> Self {
        Self {
            kind: "LineString".to_string(),
            coordinates,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteProperties {
    /// Meters, as reported by the routing provider.
    pub total_distance: f64,
    /// Seconds, as reported by the routing provider.
    pub total_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteFeature {
    #[serde(rename = "type")]
    pub kind: String,
    pub geometry: LineString,
    pub properties: RouteProperties,
}

impl RouteFeature {
    pub fn new(coordinates: Vec<Position>, properties: RouteProperties) -> Self {
        Self {
            kind: "Feature".to_string(),
            geometry: LineString::new(coordinates),
            properties,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SafetyGrade {
    A,
    B,
    C,
    D,
}

impl SafetyGrade {
    pub fn as_str(self) -> &'static str {
        match self {
            SafetyGrade::A => "A",
            SafetyGrade::B => "B",
            SafetyGrade::C => "C",
            SafetyGrade::D => "D",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafetySummary {
    pub grade: SafetyGrade,
    pub cctv_count: usize,
    pub store_count: usize,
    pub coverage_ratio: u32,
    pub final_score: f64,
}

/// A safety asset as shown next to a route (CCTV camera or convenience store).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyAsset {
    pub id: String,
    pub name: Option<String>,
    pub category: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectionData {
    #[serde(rename = "type")]
    pub kind: String,
    pub features: Vec<RouteFeature>,
    pub safety: SafetySummary,
    #[serde(rename = "nearbyCCTVs")]
    pub nearby_cctvs: Vec<NearbyAsset>,
    pub nearby_stores: Vec<NearbyAsset>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectionResponse {
    pub success: bool,
    pub data: DirectionData,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

/// Uniform place record returned by `/api/places`, whatever the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub id: String,
    pub name: String,
    pub category: String,
    pub location: LatLng,
    /// Meters from the search center, rounded.
    pub distance: f64,
    pub rank: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacesRequestParams {
    pub category: String,
    pub location: LatLng,
    pub radius: f64,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacesMeta {
    pub total: usize,
    pub source: String,
    pub request_params: PlacesRequestParams,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacesResponse {
    pub success: bool,
    pub message: String,
    pub data: Vec<Place>,
    pub meta: PlacesMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryInfo {
    pub id: String,
    pub keyword: Option<String>,
    pub description: String,
    pub source: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DangerLevel {
    Low,
    Medium,
    High,
}

impl DangerLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            DangerLevel::Low => "low",
            DangerLevel::Medium => "medium",
            DangerLevel::High => "high",
        }
    }
}

/// Body of `POST /api/risk-report-submit`. Coordinates are optional here so
/// that missing fields can be reported as a 400 instead of a decode failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskReportSubmission {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub start_lat: Option<f64>,
    #[serde(default)]
    pub start_lng: Option<f64>,
    #[serde(default)]
    pub end_lat: Option<f64>,
    #[serde(default)]
    pub end_lng: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskReportReceipt {
    pub success: bool,
    pub id: i64,
    pub score: i32,
    pub level: DangerLevel,
}

/// Stored report as listed by `GET /api/complaintsmap`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskReportEntry {
    pub id: i64,
    pub reason: String,
    pub category: Option<String>,
    pub danger_score: i32,
    pub danger_level: DangerLevel,
    /// `[start, end]` as `[lng, lat]` positions.
    pub route_coords: Vec<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<i32>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskReportList {
    pub success: bool,
    pub data: Vec<RiskReportEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodeData {
    pub lat: f64,
    pub lng: f64,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodeResponse {
    pub success: bool,
    pub data: GeocodeData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub success: bool,
    pub error: ErrorDetail,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: ErrorDetail {
                message: message.into(),
                code: code.into(),
            },
        }
    }
}
