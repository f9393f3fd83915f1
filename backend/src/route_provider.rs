use std::{collections::HashSet, time::Duration};

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{json, Value};

use crate::models::{Coordinate, RoutePath};

/// TMap pedestrian `searchOption` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SearchOption {
    Recommended,
    MajorRoadFirst,
    Shortest,
}

impl SearchOption {
    pub const ALL: [SearchOption; 3] = [
        SearchOption::Recommended,
        SearchOption::MajorRoadFirst,
        SearchOption::Shortest,
    ];

    pub fn code(self) -> u8 {
        match self {
            SearchOption::Recommended => 0,
            SearchOption::MajorRoadFirst => 4,
            SearchOption::Shortest => 10,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RouteProviderError {
    #[error("invalid route data: {0}")]
    InvalidRouteData(String),
    #[error("routing provider request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("routing provider timed out after {0:?}")]
    Timeout(Duration),
    #[error("routing provider is not configured: {0}")]
    NotConfigured(&'static str),
}

/// Source of pedestrian routes between two points.
#[async_trait]
pub trait RouteProvider: Send + Sync {
    async fn fetch_route(
        &self,
        start: Coordinate,
        goal: Coordinate,
        option: SearchOption,
    ) -> Result<RoutePath, RouteProviderError>;
}

/// Fetch one route per [`SearchOption`] concurrently. Results come back in
/// [`SearchOption::ALL`] order whether or not they succeeded.
pub async fn fetch_multiple_routes(
    provider: &dyn RouteProvider,
    start: Coordinate,
    goal: Coordinate,
) -> Vec<(SearchOption, Result<RoutePath, RouteProviderError>)> {
    let fetches = SearchOption::ALL
        .into_iter()
        .map(|option| async move { (option, provider.fetch_route(start, goal, option).await) });
    join_all(fetches).await
}

/// Concatenate every `LineString` feature into one path, dropping repeated
/// vertices (first occurrence wins) and summing per-feature distance and time.
pub fn merge_features(payload: &Value) -> Result<RoutePath, RouteProviderError> {
    let features = payload
        .get("features")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            RouteProviderError::InvalidRouteData("`features` is missing or not an array".into())
        })?;

    let mut seen = HashSet::new();
    let mut coordinates = Vec::new();
    let mut total_distance = 0.0;
    let mut total_time = 0.0;

    for feature in features {
        if let Some(properties) = feature.get("properties") {
            total_distance += properties
                .get("distance")
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            total_time += properties.get("time").and_then(Value::as_f64).unwrap_or(0.0);
        }

        let Some(geometry) = feature.get("geometry") else {
            continue;
        };
        if geometry.get("type").and_then(Value::as_str) != Some("LineString") {
            continue;
        }
        let points = geometry
            .get("coordinates")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                RouteProviderError::InvalidRouteData("LineString without coordinates".into())
            })?;

        for point in points {
            let position = parse_position(point)?;
            if seen.insert((position[0].to_bits(), position[1].to_bits())) {
                coordinates.push(Coordinate::from_position(position));
            }
        }
    }

    if coordinates.is_empty() {
        return Err(RouteProviderError::InvalidRouteData(
            "route contains no LineString coordinates".into(),
        ));
    }

    Ok(RoutePath {
        coordinates,
        total_distance,
        total_time,
    })
}

fn parse_position(point: &Value) -> Result<[f64; 2], RouteProviderError> {
    match point.as_array().map(Vec::as_slice) {
        Some([lng, lat, ..]) => match (lng.as_f64(), lat.as_f64()) {
            (Some(lng), Some(lat)) => Ok([lng, lat]),
            _ => Err(RouteProviderError::InvalidRouteData(format!(
                "non-numeric coordinate {point}"
            ))),
        },
        _ => Err(RouteProviderError::InvalidRouteData(format!(
            "malformed coordinate {point}"
        ))),
    }
}

/// SK TMap pedestrian routing client.
pub struct TmapClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl TmapClient {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            timeout,
        }
    }
}

#[async_trait]
impl RouteProvider for TmapClient {
    async fn fetch_route(
        &self,
        start: Coordinate,
        goal: Coordinate,
        option: SearchOption,
    ) -> Result<RoutePath, RouteProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(RouteProviderError::NotConfigured("TMAP_API_KEY"))?;

        tracing::debug!("tmap request {} -> {} ({:?})", start, goal, option);

        let body = json!({
            "startX": start.longitude.to_string(),
            "startY": start.latitude.to_string(),
            "endX": goal.longitude.to_string(),
            "endY": goal.latitude.to_string(),
            "reqCoordType": "WGS84GEO",
            "resCoordType": "WGS84GEO",
            "startName": "출발지",
            "endName": "도착지",
            "searchOption": option.code().to_string(),
        });

        let response = self
            .client
            .post(format!("{}/tmap/routes/pedestrian?version=1", self.base_url))
            .header("appKey", api_key)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(RouteProviderError::InvalidRouteData(format!(
                "upstream status {status}: {}",
                detail.chars().take(200).collect::<String>()
            )));
        }

        let payload: Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                RouteProviderError::Timeout(self.timeout)
            } else {
                RouteProviderError::InvalidRouteData(format!("undecodable body: {e}"))
            }
        })?;

        let path = merge_features(&payload)?;
        tracing::debug!(
            "tmap {:?} route: {} vertices, {}m, {}s",
            option,
            path.coordinates.len(),
            path.total_distance,
            path.total_time
        );
        Ok(path)
    }
}

impl TmapClient {
    fn classify(&self, err: reqwest::Error) -> RouteProviderError {
        if err.is_timeout() {
            RouteProviderError::Timeout(self.timeout)
        } else {
            RouteProviderError::Transport(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serve;
    use axum::{http::HeaderMap, http::StatusCode, routing::post, Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn sample_payload() -> Value {
        json!({
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "geometry": {"type": "Point", "coordinates": [126.978, 37.5665]},
                    "properties": {"totalDistance": 250, "totalTime": 180}
                },
                {
                    "type": "Feature",
                    "geometry": {"type": "LineString", "coordinates": [[126.978, 37.5665], [126.979, 37.5670]]},
                    "properties": {"distance": 100, "time": 72}
                },
                {
                    "type": "Feature",
                    "geometry": {"type": "LineString", "coordinates": [[126.979, 37.5670], [126.980, 37.5675]]},
                    "properties": {"distance": 150, "time": 108}
                }
            ]
        })
    }

    fn start() -> Coordinate {
        Coordinate {
            latitude: 37.5665,
            longitude: 126.978,
        }
    }

    fn goal() -> Coordinate {
        Coordinate {
            latitude: 37.5675,
            longitude: 126.980,
        }
    }

    #[test]
    fn test_merge_concatenates_and_dedups() {
        let path = merge_features(&sample_payload()).unwrap();
        assert_eq!(path.coordinates.len(), 3);
        assert_eq!(path.coordinates[0], start());
        assert_eq!(path.coordinates[2], goal());
        assert_eq!(path.total_distance, 250.0);
        assert_eq!(path.total_time, 180.0);
    }

    #[test]
    fn test_merge_dedup_is_global() {
        // A route that doubles back keeps only the first visit of each vertex.
        let payload = json!({"features": [
            {"geometry": {"type": "LineString", "coordinates": [[1.0, 1.0], [2.0, 2.0]]}, "properties": {}},
            {"geometry": {"type": "LineString", "coordinates": [[3.0, 3.0], [1.0, 1.0], [4.0, 4.0]]}, "properties": {}}
        ]});
        let path = merge_features(&payload).unwrap();
        let lngs: Vec<f64> = path.coordinates.iter().map(|c| c.longitude).collect();
        assert_eq!(lngs, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_merge_rejects_missing_features() {
        for payload in [json!({}), json!({"features": {}}), json!({"features": "x"})] {
            assert!(matches!(
                merge_features(&payload),
                Err(RouteProviderError::InvalidRouteData(_))
            ));
        }
    }

    #[test]
    fn test_merge_rejects_route_without_lines() {
        let payload = json!({"features": [
            {"geometry": {"type": "Point", "coordinates": [1.0, 1.0]}, "properties": {"distance": 0}}
        ]});
        assert!(matches!(
            merge_features(&payload),
            Err(RouteProviderError::InvalidRouteData(_))
        ));
    }

    #[test]
    fn test_merge_rejects_malformed_coordinates() {
        let payload = json!({"features": [
            {"geometry": {"type": "LineString", "coordinates": [[1.0], ["a", "b"]]}}
        ]});
        assert!(merge_features(&payload).is_err());
    }

    #[test]
    fn test_search_option_codes() {
        let codes: Vec<u8> = SearchOption::ALL.iter().map(|o| o.code()).collect();
        assert_eq!(codes, vec![0, 4, 10]);
    }

    fn client(base: String, timeout: Duration) -> TmapClient {
        TmapClient::new(
            reqwest::Client::new(),
            base,
            Some("tmap-key".to_string()),
            timeout,
        )
    }

    #[tokio::test]
    async fn test_tmap_client_posts_wgs84_request() {
        let app = Router::new().route(
            "/tmap/routes/pedestrian",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(headers["appkey"], "tmap-key");
                assert_eq!(body["startX"], "126.978");
                assert_eq!(body["startY"], "37.5665");
                assert_eq!(body["reqCoordType"], "WGS84GEO");
                assert_eq!(body["searchOption"], "4");
                Json(sample_payload())
            }),
        );
        let base = serve(app).await;

        let path = client(base, Duration::from_secs(5))
            .fetch_route(start(), goal(), SearchOption::MajorRoadFirst)
            .await
            .unwrap();
        assert_eq!(path.coordinates.len(), 3);
    }

    #[tokio::test]
    async fn test_tmap_error_status_is_invalid_route_data() {
        let app = Router::new().route(
            "/tmap/routes/pedestrian",
            post(|| async { (StatusCode::BAD_REQUEST, "{\"error\":\"out of range\"}") }),
        );
        let base = serve(app).await;

        let err = client(base, Duration::from_secs(5))
            .fetch_route(start(), goal(), SearchOption::Shortest)
            .await
            .unwrap_err();
        assert!(matches!(err, RouteProviderError::InvalidRouteData(msg) if msg.contains("400")));
    }

    #[tokio::test]
    async fn test_tmap_timeout() {
        let app = Router::new().route(
            "/tmap/routes/pedestrian",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Json(sample_payload())
            }),
        );
        let base = serve(app).await;

        let err = client(base, Duration::from_millis(100))
            .fetch_route(start(), goal(), SearchOption::Shortest)
            .await
            .unwrap_err();
        assert!(matches!(err, RouteProviderError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_missing_key_is_not_configured() {
        let tmap = TmapClient::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9",
            None,
            Duration::from_secs(1),
        );
        let err = tmap
            .fetch_route(start(), goal(), SearchOption::Shortest)
            .await
            .unwrap_err();
        assert!(matches!(err, RouteProviderError::NotConfigured(_)));
    }

    struct CountingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RouteProvider for CountingProvider {
        async fn fetch_route(
            &self,
            start: Coordinate,
            goal: Coordinate,
            option: SearchOption,
        ) -> Result<RoutePath, RouteProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if option == SearchOption::MajorRoadFirst {
                return Err(RouteProviderError::InvalidRouteData("no route".into()));
            }
            Ok(RoutePath {
                coordinates: vec![start, goal],
                total_distance: 1.0,
                total_time: 1.0,
            })
        }
    }

    #[tokio::test]
    async fn test_fetch_multiple_routes_keeps_order_and_failures() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
        });
        let results = fetch_multiple_routes(provider.as_ref(), start(), goal()).await;

        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        let options: Vec<SearchOption> = results.iter().map(|(o, _)| *o).collect();
        assert_eq!(options, SearchOption::ALL.to_vec());
        assert!(results[0].1.is_ok());
        assert!(results[1].1.is_err());
        assert!(results[2].1.is_ok());
    }
}
