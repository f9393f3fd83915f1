//! HTTP handlers for place search and address geocoding.

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use shared::{
    CategoryInfo, GeocodeResponse, LatLng, PlacesMeta, PlacesRequestParams, PlacesResponse,
};

use crate::{
    error::AppError,
    models::Coordinate,
    places::{PlaceCategory, PlaceQuery},
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct PlacesParams {
    category: Option<String>,
    lat: Option<String>,
    lng: Option<String>,
    radius: Option<String>,
    limit: Option<String>,
}

fn parse_optional<T: std::str::FromStr>(name: &str, raw: Option<&str>) -> Result<Option<T>, AppError> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<T>()
                .map_err(|_| AppError::InvalidParameter(format!("{name} must be a number, got {s:?}")))
        })
        .transpose()
}

/// GET /api/places?category=&lat=&lng=&radius=&limit=
pub async fn search_places(
    State(state): State<AppState>,
    Query(params): Query<PlacesParams>,
) -> Result<Json<PlacesResponse>, AppError> {
    let category_id = params
        .category
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::MissingFields("category".to_string()))?;
    let category: PlaceCategory = category_id.parse()?;

    let (Some(lat), Some(lng)) = (params.lat.as_deref(), params.lng.as_deref()) else {
        return Err(AppError::MissingFields("lat, lng".to_string()));
    };
    let center = Coordinate::parse_pair(&format!("{lat},{lng}"))?;

    let radius = parse_optional::<f64>("radius", params.radius.as_deref())?;
    let limit = parse_optional::<usize>("limit", params.limit.as_deref())?;
    let query = PlaceQuery::new(category, center, radius, limit);

    let search = state.places.search(query).await?;

    Ok(Json(PlacesResponse {
        success: true,
        message: format!("{}개의 {}을(를) 찾았습니다", search.places.len(), category.display_name()),
        data: search.places,
        meta: PlacesMeta {
            total: search.total,
            source: search.source.to_string(),
            request_params: PlacesRequestParams {
                category: category.id().to_string(),
                location: LatLng {
                    lat: center.latitude,
                    lng: center.longitude,
                },
                radius: query.radius_m,
                limit: query.limit,
            },
            timestamp: Utc::now().to_rfc3339(),
        },
    }))
}

/// GET /api/places/categories
pub async fn list_categories(State(state): State<AppState>) -> Json<Value> {
    let categories: Vec<CategoryInfo> = state.places.categories();
    Json(json!({
        "success": true,
        "data": categories,
    }))
}

/// GET /api/places/health
pub async fn places_health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "success": true,
        "status": "ok",
        "categories": PlaceCategory::ALL.len(),
        "localDataDir": state.places_data_dir.is_dir(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct GeocodeParams {
    address: Option<String>,
}

/// GET /geocode?address=
pub async fn geocode(
    State(state): State<AppState>,
    Query(params): Query<GeocodeParams>,
) -> Result<Json<GeocodeResponse>, AppError> {
    let address = params
        .address
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .ok_or_else(|| AppError::MissingFields("address".to_string()))?;

    let data = state.geocoder.geocode(address).await?;
    Ok(Json(GeocodeResponse {
        success: true,
        data,
    }))
}
