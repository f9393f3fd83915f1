//! Point-of-interest aggregation.
//!
//! Every supported category is served by exactly one backend: a remote keyword
//! search, a local static dataset, or an external feed. The category → backend
//! table is built once at start-up; requests only look it up.

pub mod cctv;
pub mod kakao;
pub mod local;

use std::{collections::HashMap, fmt, str::FromStr, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::{Map, Value};
use shared::{CategoryInfo, LatLng, Place};

use crate::{
    geo::distance_meters,
    models::{AssetCategory, Coordinate, SafetyAsset},
};

pub use cctv::CctvFeed;
pub use kakao::KakaoKeywordSearch;
pub use local::LocalDatasets;

/// Hard cap on returned places, whatever the caller asks for.
pub const MAX_LIMIT: usize = 15;
pub const DEFAULT_RADIUS_M: f64 = 5000.0;

#[derive(Debug, thiserror::Error)]
pub enum PlaceError {
    #[error("unsupported category: {0}")]
    UnsupportedCategory(String),
    #[error("external source {service} failed: {message}")]
    ExternalSource {
        service: &'static str,
        message: String,
    },
    #[error("local data source failed: {0}")]
    DataSource(String),
}

impl PlaceError {
    pub(crate) fn external(service: &'static str, err: impl fmt::Display) -> Self {
        PlaceError::ExternalSource {
            service,
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaceCategory {
    Police,
    FireStation,
    Pharmacy,
    ConvenienceStore,
    Hospital,
    ElderlyFriendly,
    WheelchairAccessible,
    WomenSafe,
    Cctv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    Cctv,
}

/// Which backend serves a category, with its static configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    RemoteSearch { keyword: &'static str },
    LocalDataset { file: &'static str },
    ExternalFeed(FeedKind),
}

impl SourceKind {
    pub fn label(self) -> &'static str {
        match self {
            SourceKind::RemoteSearch { .. } => "direct_search",
            SourceKind::LocalDataset { .. } => "local_storage",
            SourceKind::ExternalFeed(_) => "external_api",
        }
    }
}

impl PlaceCategory {
    pub const ALL: [PlaceCategory; 9] = [
        PlaceCategory::Police,
        PlaceCategory::FireStation,
        PlaceCategory::Pharmacy,
        PlaceCategory::ConvenienceStore,
        PlaceCategory::Hospital,
        PlaceCategory::ElderlyFriendly,
        PlaceCategory::WheelchairAccessible,
        PlaceCategory::WomenSafe,
        PlaceCategory::Cctv,
    ];

    pub fn id(self) -> &'static str {
        match self {
            PlaceCategory::Police => "police",
            PlaceCategory::FireStation => "fire-station",
            PlaceCategory::Pharmacy => "pharmacy",
            PlaceCategory::ConvenienceStore => "convenience-store",
            PlaceCategory::Hospital => "hospital",
            PlaceCategory::ElderlyFriendly => "elderly-friendly",
            PlaceCategory::WheelchairAccessible => "wheelchair-accessible",
            PlaceCategory::WomenSafe => "women-safe",
            PlaceCategory::Cctv => "cctv",
        }
    }

    pub fn source_kind(self) -> SourceKind {
        match self {
            PlaceCategory::Police => SourceKind::RemoteSearch { keyword: "경찰서" },
            PlaceCategory::FireStation => SourceKind::RemoteSearch { keyword: "소방서" },
            PlaceCategory::Pharmacy => SourceKind::RemoteSearch { keyword: "약국" },
            PlaceCategory::ConvenienceStore => SourceKind::RemoteSearch { keyword: "편의점" },
            PlaceCategory::Hospital => SourceKind::RemoteSearch { keyword: "병원" },
            PlaceCategory::ElderlyFriendly => SourceKind::RemoteSearch {
                keyword: "노인복지시설",
            },
            PlaceCategory::WheelchairAccessible => SourceKind::LocalDataset {
                file: "wheelChair.json",
            },
            PlaceCategory::WomenSafe => SourceKind::LocalDataset {
                file: "sirenBell.json",
            },
            PlaceCategory::Cctv => SourceKind::ExternalFeed(FeedKind::Cctv),
        }
    }

    pub fn keyword(self) -> Option<&'static str> {
        match self.source_kind() {
            SourceKind::RemoteSearch { keyword } => Some(keyword),
            _ => None,
        }
    }

    /// Label used when a record carries no name of its own.
    pub fn display_name(self) -> &'static str {
        match self {
            PlaceCategory::Police => "경찰서",
            PlaceCategory::FireStation => "소방서",
            PlaceCategory::Pharmacy => "약국",
            PlaceCategory::ConvenienceStore => "편의점",
            PlaceCategory::Hospital => "병원",
            PlaceCategory::ElderlyFriendly => "노인복지시설",
            PlaceCategory::WheelchairAccessible => "휠체어 충전소",
            PlaceCategory::WomenSafe => "안전비상벨",
            PlaceCategory::Cctv => "CCTV",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            PlaceCategory::Police => "경찰서 및 지구대",
            PlaceCategory::FireStation => "소방서 및 119안전센터",
            PlaceCategory::Pharmacy => "약국 및 24시간 약국",
            PlaceCategory::ConvenienceStore => "편의점 (24시간 포함)",
            PlaceCategory::Hospital => "병원 및 응급실",
            PlaceCategory::ElderlyFriendly => "노인 친화 시설",
            PlaceCategory::WheelchairAccessible => "휠체어 접근 가능한 시설",
            PlaceCategory::WomenSafe => "여성 안전 시설",
            PlaceCategory::Cctv => "CCTV 및 보안시설",
        }
    }

    fn id_prefix(self) -> Option<&'static str> {
        match self.source_kind() {
            SourceKind::RemoteSearch { .. } => None,
            SourceKind::LocalDataset { .. } => Some("local"),
            SourceKind::ExternalFeed(_) => Some("external"),
        }
    }
}

impl fmt::Display for PlaceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for PlaceCategory {
    type Err = PlaceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PlaceCategory::ALL
            .into_iter()
            .find(|category| category.id() == s)
            .ok_or_else(|| PlaceError::UnsupportedCategory(s.to_string()))
    }
}

impl From<AssetCategory> for PlaceCategory {
    fn from(category: AssetCategory) -> Self {
        match category {
            AssetCategory::Cctv => PlaceCategory::Cctv,
            AssetCategory::Store => PlaceCategory::ConvenienceStore,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaceQuery {
    pub category: PlaceCategory,
    pub center: Coordinate,
    pub radius_m: f64,
    pub limit: usize,
}

impl PlaceQuery {
    /// Apply defaults and the hard limit cap.
    pub fn new(
        category: PlaceCategory,
        center: Coordinate,
        radius_m: Option<f64>,
        limit: Option<usize>,
    ) -> Self {
        let radius_m = radius_m
            .filter(|r| r.is_finite() && *r > 0.0)
            .unwrap_or(DEFAULT_RADIUS_M);
        let limit = limit.unwrap_or(MAX_LIMIT).clamp(1, MAX_LIMIT);
        Self {
            category,
            center,
            radius_m,
            limit,
        }
    }
}

/// A record as a backend returns it, before normalisation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPlace {
    pub id: Option<String>,
    pub name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub address: Option<String>,
    pub attributes: Map<String, Value>,
}

#[async_trait]
pub trait PlaceSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Records near `query.center`. Radius filtering and ordering are left to
    /// the aggregator, so a backend may return more than asked for.
    async fn nearby(&self, query: &PlaceQuery) -> Result<Vec<RawPlace>, PlaceError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaceSearch {
    pub places: Vec<Place>,
    /// Matches inside the radius before truncation.
    pub total: usize,
    pub source: &'static str,
}

/// Connection settings for the default backends.
#[derive(Debug, Clone)]
pub struct PlaceSourcesConfig {
    pub kakao_base_url: String,
    pub kakao_api_key: Option<String>,
    pub cctv_api_url: Option<String>,
    pub cctv_api_key: Option<String>,
    pub data_dir: std::path::PathBuf,
    pub timeout: Duration,
}

#[derive(Default)]
pub struct PlaceAggregator {
    sources: HashMap<PlaceCategory, Arc<dyn PlaceSource>>,
}

impl PlaceAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, category: PlaceCategory, source: Arc<dyn PlaceSource>) -> Self {
        self.sources.insert(category, source);
        self
    }

    /// Resolve every category to its backend once.
    pub fn from_config(config: &PlaceSourcesConfig, client: reqwest::Client) -> Self {
        let kakao: Arc<dyn PlaceSource> = Arc::new(KakaoKeywordSearch::new(
            client.clone(),
            config.kakao_base_url.clone(),
            config.kakao_api_key.clone(),
            config.timeout,
        ));
        let local: Arc<dyn PlaceSource> = Arc::new(LocalDatasets::new(&config.data_dir));
        let cctv: Arc<dyn PlaceSource> = Arc::new(CctvFeed::new(
            client,
            config.cctv_api_url.clone(),
            config.cctv_api_key.clone(),
            config.timeout,
        ));

        PlaceCategory::ALL
            .into_iter()
            .fold(Self::new(), |aggregator, category| {
                let source = match category.source_kind() {
                    SourceKind::RemoteSearch { .. } => Arc::clone(&kakao),
                    SourceKind::LocalDataset { .. } => Arc::clone(&local),
                    SourceKind::ExternalFeed(FeedKind::Cctv) => Arc::clone(&cctv),
                };
                aggregator.with_source(category, source)
            })
    }

    pub fn categories(&self) -> Vec<CategoryInfo> {
        PlaceCategory::ALL
            .into_iter()
            .map(|category| CategoryInfo {
                id: category.id().to_string(),
                keyword: category.keyword().map(str::to_string),
                description: category.description().to_string(),
                source: category.source_kind().label().to_string(),
            })
            .collect()
    }

    pub async fn search(&self, query: PlaceQuery) -> Result<PlaceSearch, PlaceError> {
        let source = self
            .sources
            .get(&query.category)
            .ok_or_else(|| PlaceError::UnsupportedCategory(query.category.id().to_string()))?;

        tracing::debug!(
            "searching {} within {}m of {} via {}",
            query.category,
            query.radius_m,
            query.center,
            source.name()
        );
        let raw = source.nearby(&query).await?;
        let fetched = raw.len();
        let search = normalize(raw, &query);
        tracing::info!(
            "{} search: {} fetched, {} in radius, {} returned",
            query.category,
            fetched,
            search.total,
            search.places.len()
        );
        Ok(search)
    }

    /// Assets for route scoring. Backend failures are logged and turn into an
    /// empty list so the route can still be graded.
    pub async fn assets_near(
        &self,
        kind: AssetCategory,
        center: Coordinate,
        radius_m: f64,
    ) -> Vec<SafetyAsset> {
        let query = PlaceQuery::new(kind.into(), center, Some(radius_m), None);
        match self.search(query).await {
            Ok(search) => search
                .places
                .into_iter()
                .map(|place| to_asset(place, kind))
                .collect(),
            Err(err) => {
                tracing::warn!("{} lookup near {} degraded to zero assets: {}", kind.as_str(), center, err);
                Vec::new()
            }
        }
    }
}

fn normalize(raw: Vec<RawPlace>, query: &PlaceQuery) -> PlaceSearch {
    let mut located: Vec<(f64, Coordinate, RawPlace)> = raw
        .into_iter()
        .filter_map(|place| {
            let location = Coordinate::new(place.latitude?, place.longitude?).ok()?;
            let distance = distance_meters(query.center, location);
            (distance <= query.radius_m).then_some((distance, location, place))
        })
        .collect();
    located.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let total = located.len();
    let category = query.category;
    let places = located
        .into_iter()
        .take(query.limit)
        .enumerate()
        .map(|(index, (distance, location, raw))| {
            let rank = index + 1;
            let id = match (category.id_prefix(), raw.id) {
                (None, Some(id)) => id,
                (Some(prefix), _) => format!("{prefix}-{category}-{index}"),
                (None, None) => format!("{category}-{index}"),
            };
            Place {
                id,
                name: raw
                    .name
                    .unwrap_or_else(|| format!("{} {rank}", category.display_name())),
                category: category.id().to_string(),
                location: LatLng {
                    lat: location.latitude,
                    lng: location.longitude,
                },
                distance: distance.round(),
                rank,
                address: raw.address,
                attributes: raw.attributes,
            }
        })
        .collect();

    PlaceSearch {
        places,
        total,
        source: category.source_kind().label(),
    }
}

fn to_asset(place: Place, category: AssetCategory) -> SafetyAsset {
    SafetyAsset {
        id: place.id,
        name: Some(place.name),
        category,
        location: Coordinate {
            latitude: place.location.lat,
            longitude: place.location.lng,
        },
        address: place.address,
        distance: Some(place.distance),
        attributes: place.attributes,
    }
}

/// Numeric field that may arrive as a JSON number or a numeric string.
pub(crate) fn number_field(record: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| match record.get(*key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}

/// First non-empty string among `keys`.
pub(crate) fn text_field(record: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match record.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSource(Vec<RawPlace>);

    #[async_trait]
    impl PlaceSource for FixedSource {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn nearby(&self, _query: &PlaceQuery) -> Result<Vec<RawPlace>, PlaceError> {
            Ok(self.0.clone())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl PlaceSource for FailingSource {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn nearby(&self, _query: &PlaceQuery) -> Result<Vec<RawPlace>, PlaceError> {
            Err(PlaceError::external("failing", "connection reset"))
        }
    }

    fn raw(lat: f64, lng: f64) -> RawPlace {
        RawPlace {
            latitude: Some(lat),
            longitude: Some(lng),
            ..Default::default()
        }
    }

    fn center() -> Coordinate {
        Coordinate {
            latitude: 37.5665,
            longitude: 126.978,
        }
    }

    #[test]
    fn parses_supported_categories() {
        for category in PlaceCategory::ALL {
            assert_eq!(category.id().parse::<PlaceCategory>().unwrap(), category);
        }
        assert!(matches!(
            "casino".parse::<PlaceCategory>(),
            Err(PlaceError::UnsupportedCategory(c)) if c == "casino"
        ));
    }

    #[test]
    fn source_table_covers_three_backends() {
        assert_eq!(
            PlaceCategory::Pharmacy.source_kind(),
            SourceKind::RemoteSearch { keyword: "약국" }
        );
        assert_eq!(
            PlaceCategory::WomenSafe.source_kind(),
            SourceKind::LocalDataset {
                file: "sirenBell.json"
            }
        );
        assert_eq!(
            PlaceCategory::Cctv.source_kind(),
            SourceKind::ExternalFeed(FeedKind::Cctv)
        );
    }

    #[test]
    fn query_defaults_and_caps_limit() {
        let query = PlaceQuery::new(PlaceCategory::Police, center(), None, None);
        assert_eq!(query.radius_m, DEFAULT_RADIUS_M);
        assert_eq!(query.limit, MAX_LIMIT);

        let query = PlaceQuery::new(PlaceCategory::Police, center(), Some(300.0), Some(100));
        assert_eq!(query.radius_m, 300.0);
        assert_eq!(query.limit, MAX_LIMIT);
    }

    #[tokio::test]
    async fn sorts_filters_and_truncates() {
        let mut records = vec![
            raw(37.5700, 126.978), // ~390 m
            raw(37.5666, 126.978), // ~11 m
            raw(37.6500, 126.978), // ~9.3 km, outside radius
            RawPlace::default(),   // no coordinates
        ];
        for i in 0..20 {
            records.push(raw(37.5670 + i as f64 * 0.0001, 126.978));
        }
        let aggregator = PlaceAggregator::new()
            .with_source(PlaceCategory::WomenSafe, Arc::new(FixedSource(records)));

        let query = PlaceQuery::new(PlaceCategory::WomenSafe, center(), Some(1000.0), Some(5));
        let search = aggregator.search(query).await.unwrap();

        assert_eq!(search.total, 22);
        assert_eq!(search.places.len(), 5);
        assert_eq!(search.source, "local_storage");
        assert!(search.places.windows(2).all(|w| w[0].distance <= w[1].distance));
        assert_eq!(search.places[0].rank, 1);
        assert_eq!(search.places[0].id, "local-women-safe-0");
        assert_eq!(search.places[0].name, "안전비상벨 1");
        assert_eq!(search.places[0].distance, 11.0);
    }

    #[tokio::test]
    async fn remote_ids_are_kept() {
        let record = RawPlace {
            id: Some("26338954".to_string()),
            name: Some("종로경찰서".to_string()),
            ..raw(37.5670, 126.978)
        };
        let aggregator = PlaceAggregator::new()
            .with_source(PlaceCategory::Police, Arc::new(FixedSource(vec![record])));
        let search = aggregator
            .search(PlaceQuery::new(PlaceCategory::Police, center(), None, None))
            .await
            .unwrap();
        assert_eq!(search.places[0].id, "26338954");
        assert_eq!(search.places[0].name, "종로경찰서");
    }

    #[tokio::test]
    async fn unconfigured_category_is_unsupported() {
        let aggregator = PlaceAggregator::new();
        let err = aggregator
            .search(PlaceQuery::new(PlaceCategory::Hospital, center(), None, None))
            .await
            .unwrap_err();
        assert!(matches!(err, PlaceError::UnsupportedCategory(_)));
    }

    #[tokio::test]
    async fn assets_degrade_to_empty_on_failure() {
        let aggregator = PlaceAggregator::new()
            .with_source(PlaceCategory::Cctv, Arc::new(FailingSource));
        let assets = aggregator
            .assets_near(AssetCategory::Cctv, center(), 1000.0)
            .await;
        assert!(assets.is_empty());
    }

    #[tokio::test]
    async fn assets_carry_their_category() {
        let aggregator = PlaceAggregator::new().with_source(
            PlaceCategory::ConvenienceStore,
            Arc::new(FixedSource(vec![raw(37.5666, 126.978)])),
        );
        let assets = aggregator
            .assets_near(AssetCategory::Store, center(), 1000.0)
            .await;
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].category, AssetCategory::Store);
        assert_eq!(assets[0].location.latitude, 37.5666);
    }

    #[test]
    fn reads_numbers_from_strings() {
        let record: Map<String, Value> =
            serde_json::from_str(r#"{"위도": "37.5", "longitude": 127.1, "bad": "x"}"#).unwrap();
        assert_eq!(number_field(&record, &["위도", "latitude"]), Some(37.5));
        assert_eq!(number_field(&record, &["경도", "longitude"]), Some(127.1));
        assert_eq!(number_field(&record, &["bad"]), None);
        assert_eq!(number_field(&record, &["missing"]), None);
    }
}
