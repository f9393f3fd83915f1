use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use shared::ApiError;
use thiserror::Error;

use crate::{
    database::DatabaseError,
    geocode::GeocodeError,
    models::InvalidCoordinates,
    pipeline::PipelineError,
    places::PlaceError,
    route_provider::RouteProviderError,
    sequence::Superseded,
};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    InvalidCoordinates(#[from] InvalidCoordinates),
    #[error("{0}")]
    InvalidParameter(String),
    #[error("missing required fields: {0}")]
    MissingFields(String),
    #[error(transparent)]
    Place(#[from] PlaceError),
    #[error(transparent)]
    Pipeline(#[from] Arc<PipelineError>),
    #[error(transparent)]
    Geocode(#[from] GeocodeError),
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error("risk reports are unavailable: no database configured")]
    StorageUnavailable,
    #[error(transparent)]
    Superseded(#[from] Superseded),
    #[error("failed to build GPX document: {0}")]
    Gpx(#[from] gpx::errors::GpxError),
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::InvalidCoordinates(_) => (StatusCode::BAD_REQUEST, "INVALID_COORDINATES"),
            AppError::InvalidParameter(_) => (StatusCode::BAD_REQUEST, "INVALID_PARAMETER"),
            AppError::MissingFields(_) => (StatusCode::BAD_REQUEST, "MISSING_FIELDS"),
            AppError::Place(PlaceError::UnsupportedCategory(_)) => {
                (StatusCode::BAD_REQUEST, "UNSUPPORTED_CATEGORY")
            }
            AppError::Place(PlaceError::ExternalSource { .. }) => {
                (StatusCode::BAD_GATEWAY, "EXTERNAL_SOURCE_ERROR")
            }
            AppError::Place(PlaceError::DataSource(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "DATA_SOURCE_ERROR")
            }
            AppError::Pipeline(err) => match err.as_ref() {
                PipelineError::Route(RouteProviderError::Timeout(_)) => {
                    (StatusCode::GATEWAY_TIMEOUT, "UPSTREAM_TIMEOUT")
                }
                PipelineError::Route(RouteProviderError::NotConfigured(_)) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "ROUTING_UNAVAILABLE")
                }
                PipelineError::Route(_) => (StatusCode::BAD_GATEWAY, "INVALID_ROUTE_DATA"),
                PipelineError::Task(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            },
            AppError::Geocode(GeocodeError::NotFound(_)) => (StatusCode::NOT_FOUND, "ADDRESS_NOT_FOUND"),
            AppError::Geocode(GeocodeError::NotConfigured) => {
                (StatusCode::SERVICE_UNAVAILABLE, "GEOCODING_UNAVAILABLE")
            }
            AppError::Geocode(_) => (StatusCode::BAD_GATEWAY, "EXTERNAL_SOURCE_ERROR"),
            AppError::Database(DatabaseError::NotFound(_)) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::Database(_) | AppError::StorageUnavailable => {
                (StatusCode::SERVICE_UNAVAILABLE, "STORAGE_UNAVAILABLE")
            }
            AppError::Superseded(_) => (StatusCode::CONFLICT, "SUPERSEDED"),
            AppError::Gpx(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!("{} {}: {}", status.as_u16(), code, self);
        } else {
            tracing::warn!("{} {}: {}", status.as_u16(), code, self);
        }
        (status, Json(ApiError::new(code, self.to_string()))).into_response()
    }
}
