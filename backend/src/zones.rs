use std::{path::Path, time::Duration};

use serde::Deserialize;

use crate::{geo::distance_meters, geocode::Geocoder, models::Coordinate};

/// A path point closer than this to a caution zone is flagged.
pub const CAUTION_RADIUS_M: f64 = 100.0;
/// Delay between uncached address lookups while loading zones.
const GEOCODE_PACING: Duration = Duration::from_millis(200);

/// Decides whether a path point falls inside a caution area.
pub trait ZonePredicate: Send + Sync {
    fn is_flagged(&self, point: Coordinate) -> bool;
}

impl<F> ZonePredicate for F
where
    F: Fn(Coordinate) -> bool + Send + Sync,
{
    fn is_flagged(&self, point: Coordinate) -> bool {
        self(point)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ZoneError {
    #[error("failed to read caution zones: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse caution zones: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CautionZone {
    pub label: String,
    pub location: Coordinate,
}

/// One entry of the zones file: either explicit coordinates or an address
/// resolved at load time.
#[derive(Debug, Deserialize)]
struct ZoneEntry {
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lng: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct CautionZones {
    zones: Vec<CautionZone>,
}

impl CautionZones {
    pub fn new(zones: Vec<CautionZone>) -> Self {
        Self { zones }
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn zones(&self) -> &[CautionZone] {
        &self.zones
    }

    /// Load zones from a JSON array. Entries that cannot be placed are
    /// skipped with a warning; a missing file yields no zones.
    pub async fn load(path: &Path, geocoder: &Geocoder) -> Result<Self, ZoneError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("no caution zones file at {}", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        let entries: Vec<ZoneEntry> = serde_json::from_slice(&bytes)?;

        let mut zones = Vec::with_capacity(entries.len());
        for entry in entries {
            if let Some(zone) = resolve(entry, geocoder).await {
                zones.push(zone);
            }
        }
        tracing::info!("loaded {} caution zones from {}", zones.len(), path.display());
        Ok(Self::new(zones))
    }
}

async fn resolve(entry: ZoneEntry, geocoder: &Geocoder) -> Option<CautionZone> {
    if let (Some(lat), Some(lng)) = (entry.lat, entry.lng) {
        return match Coordinate::new(lat, lng) {
            Ok(location) => Some(CautionZone {
                label: entry
                    .label
                    .or(entry.address)
                    .unwrap_or_else(|| location.to_string()),
                location,
            }),
            Err(e) => {
                tracing::warn!("skipping caution zone: {}", e);
                None
            }
        };
    }

    let address = entry.address?;
    if geocoder.cached(&address).is_none() {
        tokio::time::sleep(GEOCODE_PACING).await;
    }
    match geocoder.geocode(&address).await {
        Ok(found) => Some(CautionZone {
            label: entry.label.unwrap_or_else(|| address.clone()),
            location: Coordinate {
                latitude: found.lat,
                longitude: found.lng,
            },
        }),
        Err(e) => {
            tracing::warn!("skipping caution zone {:?}: {}", address, e);
            None
        }
    }
}

impl ZonePredicate for CautionZones {
    fn is_flagged(&self, point: Coordinate) -> bool {
        self.zones
            .iter()
            .any(|zone| distance_meters(point, zone.location) <= CAUTION_RADIUS_M)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coord(latitude: f64, longitude: f64) -> Coordinate {
        Coordinate {
            latitude,
            longitude,
        }
    }

    fn offline_geocoder() -> Geocoder {
        Geocoder::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9",
            None,
            Duration::from_secs(1),
        )
    }

    #[test]
    fn flags_points_within_radius() {
        let zones = CautionZones::new(vec![CautionZone {
            label: "역 앞".to_string(),
            location: coord(37.5665, 126.978),
        }]);
        // ~55 m north
        assert!(zones.is_flagged(coord(37.5670, 126.978)));
        // ~111 m north
        assert!(!zones.is_flagged(coord(37.5675, 126.978)));
    }

    #[test]
    fn empty_zones_flag_nothing() {
        assert!(!CautionZones::default().is_flagged(coord(37.5665, 126.978)));
    }

    #[test]
    fn closures_are_predicates() {
        let always = |_: Coordinate| true;
        let predicate: &dyn ZonePredicate = &always;
        assert!(predicate.is_flagged(coord(0.0, 0.0)));
    }

    #[tokio::test]
    async fn loads_coordinate_entries_and_skips_unresolvable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zones.json");
        std::fs::write(
            &path,
            r#"[
                {"label": "골목", "lat": 37.5665, "lng": 126.978},
                {"label": "범위 밖", "lat": 95.0, "lng": 126.978},
                {"address": "서울 어딘가"},
                {"label": "빈 항목"}
            ]"#,
        )
        .unwrap();

        let zones = CautionZones::load(&path, &offline_geocoder()).await.unwrap();
        assert_eq!(zones.len(), 1);
        assert_eq!(zones.zones()[0].label, "골목");
    }

    #[tokio::test]
    async fn missing_file_means_no_zones() {
        let zones = CautionZones::load(Path::new("/nonexistent/zones.json"), &offline_geocoder())
            .await
            .unwrap();
        assert!(zones.is_empty());
    }

    #[tokio::test]
    async fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zones.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            CautionZones::load(&path, &offline_geocoder()).await,
            Err(ZoneError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn repeated_addresses_geocode_once_without_pacing() {
        use crate::test_support::serve;
        use axum::{routing::get, Json, Router};
        use std::sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        };

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let app = Router::new().route(
            "/v2/local/search/address.json",
            get(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Json(serde_json::json!({"documents": [{
                        "address_name": "서울 중구 세종대로 110",
                        "x": "126.9779",
                        "y": "37.5663"
                    }]}))
                }
            }),
        );
        let geocoder = Geocoder::new(
            reqwest::Client::new(),
            serve(app).await,
            Some("key".to_string()),
            Duration::from_secs(5),
        );

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zones.json");
        std::fs::write(
            &path,
            r#"[
                {"address": "세종대로 110"},
                {"label": "시청 앞", "address": "세종대로 110"},
                {"label": "광장", "address": "세종대로 110"}
            ]"#,
        )
        .unwrap();

        let started = std::time::Instant::now();
        let zones = CautionZones::load(&path, &geocoder).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(zones.len(), 3);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        // One paced lookup; the cached repeats do not wait.
        assert!(elapsed >= GEOCODE_PACING);
        assert!(elapsed < GEOCODE_PACING * 2, "took {elapsed:?}");
    }
}
