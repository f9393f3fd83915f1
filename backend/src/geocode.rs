use std::{
    num::NonZeroUsize,
    sync::{Mutex, PoisonError},
    time::{Duration, Instant},
};

use lru::LruCache;
use serde::Deserialize;
use shared::GeocodeData;

const CACHE_CAPACITY: usize = 256;
pub const CACHE_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, thiserror::Error)]
pub enum GeocodeError {
    #[error("address not found: {0}")]
    NotFound(String),
    #[error("geocoding request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("geocoding service returned status {0}")]
    Status(u16),
    #[error("geocoding is not configured: KAKAO_REST_API_KEY is missing")]
    NotConfigured,
}

#[derive(Debug, Deserialize)]
struct AddressResponse {
    #[serde(default)]
    documents: Vec<AddressDocument>,
}

#[derive(Debug, Deserialize)]
struct AddressDocument {
    address_name: String,
    x: String,
    y: String,
}

struct CachedAddress {
    data: GeocodeData,
    stored_at: Instant,
}

/// Address → coordinate lookups through the Kakao address search, with a
/// small TTL cache in front.
pub struct Geocoder {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
    ttl: Duration,
    cache: Mutex<LruCache<String, CachedAddress>>,
}

impl Geocoder {
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
            ttl: CACHE_TTL,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub async fn geocode(&self, address: &str) -> Result<GeocodeData, GeocodeError> {
        let address = address.trim();
        if let Some(hit) = self.cached(address) {
            tracing::debug!("geocode cache hit: {}", address);
            return Ok(hit);
        }

        let api_key = self.api_key.as_deref().ok_or(GeocodeError::NotConfigured)?;
        let response = self
            .client
            .get(format!("{}/v2/local/search/address.json", self.base_url))
            .header("Authorization", format!("KakaoAK {api_key}"))
            .query(&[("query", address)])
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GeocodeError::Status(status.as_u16()));
        }

        let body: AddressResponse = response.json().await?;
        let data = body
            .documents
            .into_iter()
            .find_map(|doc| {
                Some(GeocodeData {
                    lat: doc.y.parse().ok()?,
                    lng: doc.x.parse().ok()?,
                    address: doc.address_name,
                })
            })
            .ok_or_else(|| GeocodeError::NotFound(address.to_string()))?;

        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(
                address.to_string(),
                CachedAddress {
                    data: data.clone(),
                    stored_at: Instant::now(),
                },
            );
        Ok(data)
    }

    /// Unexpired cache entry for `address`, without touching the network.
    pub fn cached(&self, address: &str) -> Option<GeocodeData> {
        let address = address.trim();
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        let lookup = cache
            .get(address)
            .map(|entry| (entry.stored_at.elapsed() < self.ttl, entry.data.clone()));
        match lookup {
            Some((true, data)) => Some(data),
            Some((false, _)) => {
                cache.pop(address);
                None
            }
            None => None,
        }
    }
}
