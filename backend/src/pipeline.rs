use std::sync::Arc;

use shared::{DirectionData, DirectionResponse};
use tokio::task::JoinError;

use crate::{
    cache::{CacheEntry, CacheKey, FetchResult, RouteCache},
    geo::distance_meters,
    models::{AssetCategory, Coordinate, RoutePath, RouteRequest, RouteType, SafetyResult},
    places::PlaceAggregator,
    route_provider::{fetch_multiple_routes, RouteProvider, RouteProviderError, SearchOption},
    safety::{score_route, select_best, COVERAGE_RADIUS_M},
    zones::ZonePredicate,
};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Route(#[from] RouteProviderError),
    #[error("route computation task failed: {0}")]
    Task(#[from] JoinError),
}

/// A scored route ready to be served.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteOutcome {
    pub route_type: RouteType,
    pub search_option: SearchOption,
    pub path: RoutePath,
    pub safety: SafetyResult,
}

impl RouteOutcome {
    pub fn to_response(&self) -> DirectionResponse {
        DirectionResponse {
            success: true,
            data: DirectionData {
                kind: "FeatureCollection".to_string(),
                features: vec![self.path.to_feature()],
                safety: self.safety.summary(),
                nearby_cctvs: self.safety.nearby_cctvs.iter().map(|a| a.to_nearby()).collect(),
                nearby_stores: self
                    .safety
                    .nearby_stores
                    .iter()
                    .map(|a| a.to_nearby())
                    .collect(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    /// Minimum search radius for CCTV and store lookups.
    pub asset_radius_m: f64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            asset_radius_m: 1000.0,
        }
    }
}

/// Route fetch → asset lookup → scoring, behind the route cache.
pub struct SafeRouteService {
    provider: Arc<dyn RouteProvider>,
    places: Arc<PlaceAggregator>,
    zones: Arc<dyn ZonePredicate>,
    cache: RouteCache<RouteOutcome, PipelineError>,
    settings: PipelineSettings,
}

impl SafeRouteService {
    pub fn new(
        provider: Arc<dyn RouteProvider>,
        places: Arc<PlaceAggregator>,
        zones: Arc<dyn ZonePredicate>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            provider,
            places,
            zones,
            cache: RouteCache::new(),
            settings,
        }
    }

    pub fn cache(&self) -> &RouteCache<RouteOutcome, PipelineError> {
        &self.cache
    }

    /// Scored route for `request`. `scope` is the caller's client context;
    /// it decides which cached pair the request replaces.
    pub async fn route(
        &self,
        request: RouteRequest,
        scope: Option<&str>,
    ) -> FetchResult<RouteOutcome, PipelineError> {
        let key = CacheKey::for_request(&request);
        let provider = Arc::clone(&self.provider);
        let places = Arc::clone(&self.places);
        let zones = Arc::clone(&self.zones);
        let settings = self.settings;

        self.cache
            .get_or_fetch(scope, key, move || async move {
                compute(provider.as_ref(), &places, zones.as_ref(), settings, request, key).await
            })
            .await
    }

    pub fn cached(&self, request: &RouteRequest) -> Option<CacheEntry<RouteOutcome>> {
        self.cache.get(&CacheKey::for_request(request))
    }
}

/// Center and radius for asset lookups: the start/goal midpoint, wide enough
/// to reach both ends of the straight line plus the coverage radius.
fn asset_search_area(start: Coordinate, goal: Coordinate, min_radius_m: f64) -> (Coordinate, f64) {
    let center = Coordinate {
        latitude: (start.latitude + goal.latitude) / 2.0,
        longitude: (start.longitude + goal.longitude) / 2.0,
    };
    let reach = distance_meters(start, goal) / 2.0 + COVERAGE_RADIUS_M;
    (center, reach.max(min_radius_m))
}

async fn candidate_routes(
    provider: &dyn RouteProvider,
    request: RouteRequest,
    key: CacheKey,
) -> Result<Vec<(SearchOption, RoutePath)>, PipelineError> {
    match request.route_type {
        RouteType::Normal => {
            let option = SearchOption::Shortest;
            let path = provider.fetch_route(request.start, request.goal, option).await?;
            Ok(vec![(option, path)])
        }
        RouteType::Safe => {
            let mut candidates = Vec::new();
            let mut first_error = None;
            for (option, result) in fetch_multiple_routes(provider, request.start, request.goal).await
            {
                match result {
                    Ok(path) => candidates.push((option, path)),
                    Err(err) => {
                        tracing::warn!("[{}] {:?} route candidate failed: {}", key, option, err);
                        first_error.get_or_insert(err);
                    }
                }
            }
            match (candidates.is_empty(), first_error) {
                (true, Some(err)) => Err(err.into()),
                _ => Ok(candidates),
            }
        }
    }
}

async fn compute(
    provider: &dyn RouteProvider,
    places: &PlaceAggregator,
    zones: &dyn ZonePredicate,
    settings: PipelineSettings,
    request: RouteRequest,
    key: CacheKey,
) -> Result<RouteOutcome, PipelineError> {
    let (center, radius) = asset_search_area(request.start, request.goal, settings.asset_radius_m);

    let (routes, cctvs, stores) = tokio::join!(
        candidate_routes(provider, request, key),
        places.assets_near(AssetCategory::Cctv, center, radius),
        places.assets_near(AssetCategory::Store, center, radius),
    );
    let routes = routes?;

    let outcomes = routes.into_iter().map(|(search_option, path)| {
        let safety = score_route(&path, &cctvs, &stores, zones);
        tracing::debug!(
            "[{}] candidate {:?}: score {:.2} grade {:?}",
            key,
            search_option,
            safety.final_score,
            safety.grade
        );
        RouteOutcome {
            route_type: request.route_type,
            search_option,
            path,
            safety,
        }
    });

    let best = select_best(outcomes, |o| o.safety.final_score).ok_or_else(|| {
        RouteProviderError::InvalidRouteData("routing provider returned no routes".to_string())
    })?;
    tracing::info!(
        "[{}] selected {:?}: grade {:?}, score {:.2}",
        key,
        best.search_option,
        best.safety.grade,
        best.safety.final_score
    );
    Ok(best)
}
