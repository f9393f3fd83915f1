use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::Parser;

use crate::{pipeline::PipelineSettings, places::PlaceSourcesConfig};

#[derive(Debug, Clone, Parser)]
#[command(
    author,
    version,
    about = "Pedestrian route server that grades routes by nearby CCTV and stores"
)]
pub struct ServerConfig {
    /// Address the HTTP server listens on
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:3001")]
    pub bind_addr: SocketAddr,

    /// SK TMap application key
    #[arg(long, env = "TMAP_API_KEY")]
    pub tmap_api_key: Option<String>,

    #[arg(long, env = "TMAP_BASE_URL", default_value = "https://apis.openapi.sk.com")]
    pub tmap_base_url: String,

    /// Kakao REST key, used for keyword search and address geocoding
    #[arg(long, env = "KAKAO_REST_API_KEY")]
    pub kakao_api_key: Option<String>,

    #[arg(long, env = "KAKAO_BASE_URL", default_value = "https://dapi.kakao.com")]
    pub kakao_base_url: String,

    /// Service key for the public CCTV installation feed
    #[arg(long, env = "CCTV_API_KEY")]
    pub cctv_api_key: Option<String>,

    #[arg(long, env = "CCTV_API_URL")]
    pub cctv_api_url: Option<String>,

    /// Directory holding the local place datasets
    #[arg(long, env = "PLACES_DATA_DIR", default_value = "backend/data/places")]
    pub places_data_dir: PathBuf,

    /// JSON file of caution zones (coordinates or addresses)
    #[arg(long, env = "CAUTION_ZONES_PATH", default_value = "backend/data/caution_zones.json")]
    pub caution_zones_path: PathBuf,

    /// PostgreSQL URL for risk reports; report endpoints answer 503 without it
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Per-request timeout for every upstream call, in seconds
    #[arg(long, env = "UPSTREAM_TIMEOUT_SECS", default_value_t = 10)]
    pub upstream_timeout_secs: u64,

    /// Minimum radius for CCTV and store lookups around a route, in meters
    #[arg(long, env = "ASSET_SEARCH_RADIUS_M", default_value_t = 1000.0)]
    pub asset_search_radius_m: f64,
}

impl ServerConfig {
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs.max(1))
    }

    pub fn place_sources(&self) -> PlaceSourcesConfig {
        PlaceSourcesConfig {
            kakao_base_url: self.kakao_base_url.clone(),
            kakao_api_key: self.kakao_api_key.clone(),
            cctv_api_url: self.cctv_api_url.clone(),
            cctv_api_key: self.cctv_api_key.clone(),
            data_dir: self.places_data_dir.clone(),
            timeout: self.upstream_timeout(),
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            asset_radius_m: self.asset_search_radius_m,
        }
    }

    /// Log which upstreams are missing credentials.
    pub fn log_missing_credentials(&self) {
        for (name, value) in [
            ("TMAP_API_KEY", &self.tmap_api_key),
            ("KAKAO_REST_API_KEY", &self.kakao_api_key),
            ("CCTV_API_KEY", &self.cctv_api_key),
            ("CCTV_API_URL", &self.cctv_api_url),
        ] {
            if value.is_none() {
                tracing::warn!("{} is not set; dependent features will fail or degrade", name);
            }
        }
    }
}
