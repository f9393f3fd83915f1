use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{number_field, text_field, PlaceError, PlaceQuery, PlaceSource, RawPlace};

const SERVICE: &str = "cctv-feed";
const PAGE_SIZE: u32 = 1000;

/// Public-data CCTV installation feed. The feed has no spatial filter, so one
/// page is fetched and the aggregator filters by distance.
pub struct CctvFeed {
    client: reqwest::Client,
    url: Option<String>,
    api_key: Option<String>,
    timeout: Duration,
}

impl CctvFeed {
    pub fn new(
        client: reqwest::Client,
        url: Option<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            url,
            api_key,
            timeout,
        }
    }
}

#[async_trait]
impl PlaceSource for CctvFeed {
    fn name(&self) -> &'static str {
        SERVICE
    }

    async fn nearby(&self, _query: &PlaceQuery) -> Result<Vec<RawPlace>, PlaceError> {
        let (Some(url), Some(api_key)) = (self.url.as_deref(), self.api_key.as_deref()) else {
            return Err(PlaceError::external(
                SERVICE,
                "CCTV_API_URL and CCTV_API_KEY must both be configured",
            ));
        };

        let response = self
            .client
            .get(url)
            .query(&[
                ("page", "1".to_string()),
                ("perPage", PAGE_SIZE.to_string()),
                ("serviceKey", api_key.to_string()),
                ("returnType", "JSON".to_string()),
            ])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| PlaceError::external(SERVICE, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PlaceError::external(SERVICE, format!("status {status}")));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| PlaceError::external(SERVICE, e))?;
        parse_feed(&body)
    }
}

fn parse_feed(body: &Value) -> Result<Vec<RawPlace>, PlaceError> {
    let records = body
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| PlaceError::external(SERVICE, "response has no `data` array"))?;

    Ok(records
        .iter()
        .filter_map(Value::as_object)
        .map(to_raw)
        .collect())
}

fn to_raw(record: &Map<String, Value>) -> RawPlace {
    let mut attributes = Map::new();
    if let Some(purpose) = text_field(record, &["설치목적구분"]) {
        attributes.insert("purpose".to_string(), Value::String(purpose));
    }
    let cameras = number_field(record, &["카메라대수"])
        .filter(|n| *n >= 1.0)
        .unwrap_or(1.0) as u64;
    attributes.insert("cameraCount".to_string(), Value::from(cameras));

    RawPlace {
        id: None,
        name: text_field(record, &["관리기관명"]).map(|agency| format!("{agency} CCTV")),
        latitude: number_field(record, &["위도", "WGS84위도"]),
        longitude: number_field(record, &["경도", "WGS84경도"]),
        address: text_field(record, &["소재지도로명주소", "소재지지번주소"]),
        attributes,
    }
}
