use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{PlaceError, PlaceQuery, PlaceSource, RawPlace, MAX_LIMIT};

const SERVICE: &str = "kakao-local";
/// Kakao rejects radii above 20 km.
const MAX_SEARCH_RADIUS_M: f64 = 20_000.0;

/// Keyword search against the Kakao Local API.
pub struct KakaoKeywordSearch {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct KeywordResponse {
    #[serde(default)]
    documents: Vec<KeywordDocument>,
}

#[derive(Debug, Deserialize)]
struct KeywordDocument {
    id: Option<String>,
    place_name: Option<String>,
    category_name: Option<String>,
    phone: Option<String>,
    address_name: Option<String>,
    road_address_name: Option<String>,
    x: Option<String>,
    y: Option<String>,
    place_url: Option<String>,
}

impl KakaoKeywordSearch {
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
impl PlaceSource for KakaoKeywordSearch {
    fn name(&self) -> &'static str {
        SERVICE
    }

    async fn nearby(&self, query: &PlaceQuery) -> Result<Vec<RawPlace>, PlaceError> {
        let keyword = query
            .category
            .keyword()
            .ok_or_else(|| PlaceError::UnsupportedCategory(query.category.id().to_string()))?;
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| PlaceError::external(SERVICE, "KAKAO_REST_API_KEY is not configured"))?;

        let radius = query.radius_m.min(MAX_SEARCH_RADIUS_M).round() as u32;
        let response = self
            .client
            .get(format!("{}/v2/local/search/keyword.json", self.base_url))
            .header("Authorization", format!("KakaoAK {api_key}"))
            .query(&[
                ("query", keyword.to_string()),
                ("x", query.center.longitude.to_string()),
                ("y", query.center.latitude.to_string()),
                ("radius", radius.to_string()),
                ("size", MAX_LIMIT.to_string()),
            ])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| PlaceError::external(SERVICE, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PlaceError::external(SERVICE, format!("status {status}")));
        }

        let body: KeywordResponse = response
            .json()
            .await
            .map_err(|e| PlaceError::external(SERVICE, e))?;

        Ok(body.documents.into_iter().map(to_raw).collect())
    }
}

fn to_raw(doc: KeywordDocument) -> RawPlace {
    let mut attributes = Map::new();
    for (key, value) in [
        ("categoryName", doc.category_name),
        ("phone", doc.phone.filter(|p| !p.is_empty())),
        ("roadAddress", doc.road_address_name.clone()),
        ("placeUrl", doc.place_url),
    ] {
        if let Some(value) = value {
            attributes.insert(key.to_string(), Value::String(value));
        }
    }

    RawPlace {
        id: doc.id,
        name: doc.place_name,
        latitude: doc.y.and_then(|y| y.parse().ok()),
        longitude: doc.x.and_then(|x| x.parse().ok()),
        address: doc
            .road_address_name
            .filter(|a| !a.is_empty())
            .or(doc.address_name),
        attributes,
    }
}
