pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod geo;
pub mod geocode;
pub mod gpx_export;
pub mod models;
pub mod pipeline;
pub mod places;
pub mod places_handlers;
pub mod risk;
pub mod risk_report_handlers;
pub mod route_provider;
pub mod safety;
pub mod sequence;
pub mod zones;

#[cfg(test)]
mod test_support;

use std::{path::PathBuf, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use shared::DirectionResponse;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::cache::CacheEntry;
use crate::database::ReportStore;
use crate::error::AppError;
use crate::geocode::Geocoder;
use crate::gpx_export::encode_route_as_gpx;
use crate::models::{Coordinate, RouteRequest, RouteType};
use crate::pipeline::{RouteOutcome, SafeRouteService};
use crate::places::PlaceAggregator;
use crate::sequence::RequestSequencer;

/// Header carrying the caller's request context for "latest request wins".
pub const CLIENT_ID_HEADER: &str = "x-client-id";

#[derive(Clone)]
pub struct AppState {
    pub routes: Arc<SafeRouteService>,
    pub places: Arc<PlaceAggregator>,
    pub places_data_dir: PathBuf,
    pub geocoder: Arc<Geocoder>,
    pub reports: Option<Arc<dyn ReportStore>>,
    pub sequencer: Arc<RequestSequencer>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/direction/:route_type", get(direction_handler))
        .route("/direction/:route_type/gpx", get(direction_gpx_handler))
        .route("/api/places", get(places_handlers::search_places))
        .route("/api/places/categories", get(places_handlers::list_categories))
        .route("/api/places/health", get(places_handlers::places_health))
        .route("/geocode", get(places_handlers::geocode))
        .route(
            "/api/risk-report-submit",
            post(risk_report_handlers::submit_report),
        )
        .route("/api/complaintsmap", get(risk_report_handlers::list_reports))
        .route("/api/complaintsmap/:id", get(risk_report_handlers::get_report))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct DirectionParams {
    start: Option<String>,
    goal: Option<String>,
    /// Fallback for clients that cannot set [`CLIENT_ID_HEADER`].
    client: Option<String>,
}

fn parse_direction(route_type: &str, params: &DirectionParams) -> Result<RouteRequest, AppError> {
    let route_type: RouteType = route_type.parse().map_err(AppError::InvalidParameter)?;
    let (Some(start), Some(goal)) = (params.start.as_deref(), params.goal.as_deref()) else {
        return Err(AppError::MissingFields("start, goal".to_string()));
    };
    Ok(RouteRequest {
        start: Coordinate::parse_pair(start)?,
        goal: Coordinate::parse_pair(goal)?,
        route_type,
    })
}

fn client_context<'a>(headers: &'a HeaderMap, params: &'a DirectionParams) -> Option<&'a str> {
    headers
        .get(CLIENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .or(params.client.as_deref())
        .map(str::trim)
        .filter(|c| !c.is_empty())
}

async fn resolve_route(
    state: &AppState,
    request: RouteRequest,
    context: Option<&str>,
) -> Result<CacheEntry<RouteOutcome>, AppError> {
    let Some(context) = context else {
        return Ok(state.routes.route(request, None).await?);
    };

    let ticket = state.sequencer.issue(context);
    tracing::debug!("request {} for client {}", ticket.seq, context);
    let outcome = state
        .sequencer
        .run(&ticket, state.routes.route(request, Some(context)))
        .await??;
    Ok(outcome)
}

/// GET /direction/{normal|safe}?start=lat,lng&goal=lat,lng
async fn direction_handler(
    State(state): State<AppState>,
    Path(route_type): Path<String>,
    Query(params): Query<DirectionParams>,
    headers: HeaderMap,
) -> Result<Json<DirectionResponse>, AppError> {
    let request = parse_direction(&route_type, &params)?;
    let entry = resolve_route(&state, request, client_context(&headers, &params)).await?;
    Ok(Json(entry.value.to_response()))
}

/// GET /direction/{normal|safe}/gpx?start=lat,lng&goal=lat,lng
async fn direction_gpx_handler(
    State(state): State<AppState>,
    Path(route_type): Path<String>,
    Query(params): Query<DirectionParams>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let request = parse_direction(&route_type, &params)?;
    let entry = resolve_route(&state, request, client_context(&headers, &params)).await?;
    let xml = encode_route_as_gpx(&entry.value)?;
    Ok(([(header::CONTENT_TYPE, "application/gpx+xml")], xml))
}

async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "cachedRoutes": state.routes.cache().status(),
        "inFlight": state.routes.cache().in_flight(),
        "trackedClients": state.sequencer.tracked_clients(),
        "reportsEnabled": state.reports.is_some(),
    }))
}
