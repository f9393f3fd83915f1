use std::sync::Arc;

use clap::Parser;
use saferoute::{
    config::ServerConfig,
    create_router,
    database::{Database, ReportStore},
    geocode::Geocoder,
    pipeline::SafeRouteService,
    places::PlaceAggregator,
    route_provider::TmapClient,
    sequence::RequestSequencer,
    zones::CautionZones,
    AppState,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "saferoute=debug,tower_http=info,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::parse();
    config.log_missing_credentials();

    let http = reqwest::Client::builder()
        .timeout(config.upstream_timeout())
        .build()?;

    let geocoder = Arc::new(Geocoder::new(
        http.clone(),
        config.kakao_base_url.clone(),
        config.kakao_api_key.clone(),
        config.upstream_timeout(),
    ));

    let zones = match CautionZones::load(&config.caution_zones_path, &geocoder).await {
        Ok(zones) => zones,
        Err(e) => {
            tracing::warn!("caution zones unavailable, routes will not be penalised: {}", e);
            CautionZones::default()
        }
    };

    let places = Arc::new(PlaceAggregator::from_config(&config.place_sources(), http.clone()));
    let provider = Arc::new(TmapClient::new(
        http,
        config.tmap_base_url.clone(),
        config.tmap_api_key.clone(),
        config.upstream_timeout(),
    ));
    let routes = Arc::new(SafeRouteService::new(
        provider,
        Arc::clone(&places),
        Arc::new(zones),
        config.pipeline_settings(),
    ));

    let reports: Option<Arc<dyn ReportStore>> = match &config.database_url {
        Some(url) => match Database::connect(url).await {
            Ok(db) => {
                db.migrate().await?;
                Some(Arc::new(db))
            }
            Err(e) => {
                tracing::warn!("risk reports disabled, database unreachable: {}", e);
                None
            }
        },
        None => {
            tracing::warn!("DATABASE_URL not set, risk report endpoints will answer 503");
            None
        }
    };

    let state = AppState {
        routes,
        places,
        places_data_dir: config.places_data_dir.clone(),
        geocoder,
        reports,
        sequencer: Arc::new(RequestSequencer::new()),
    };
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!("starting saferoute on http://{}", config.bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}
