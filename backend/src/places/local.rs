use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::OnceCell;

use super::{
    number_field, text_field, PlaceCategory, PlaceError, PlaceQuery, PlaceSource, RawPlace,
    SourceKind,
};

type Records = Arc<Vec<Map<String, Value>>>;

const LATITUDE_KEYS: &[&str] = &["위도", "WGS84위도", "latitude", "lat"];
const LONGITUDE_KEYS: &[&str] = &["경도", "WGS84경도", "longitude", "lng"];

/// Static JSON datasets shipped with the server. Each file is read on first
/// use and kept in memory; a failed read is retried on the next request.
pub struct LocalDatasets {
    dir: PathBuf,
    files: HashMap<&'static str, OnceCell<Records>>,
}

impl LocalDatasets {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        let files = PlaceCategory::ALL
            .into_iter()
            .filter_map(|category| match category.source_kind() {
                SourceKind::LocalDataset { file } => Some((file, OnceCell::new())),
                _ => None,
            })
            .collect();
        Self {
            dir: dir.as_ref().to_path_buf(),
            files,
        }
    }

    async fn records(&self, file: &'static str) -> Result<Records, PlaceError> {
        let cell = self
            .files
            .get(file)
            .ok_or_else(|| PlaceError::DataSource(format!("unknown dataset {file}")))?;
        cell.get_or_try_init(|| load(self.dir.join(file)))
            .await
            .cloned()
    }
}

async fn load(path: PathBuf) -> Result<Records, PlaceError> {
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| PlaceError::DataSource(format!("{}: {e}", path.display())))?;
    let value: Value = serde_json::from_slice(&bytes)
        .map_err(|e| PlaceError::DataSource(format!("{}: {e}", path.display())))?;

    // Either a bare array or the open-data `{ "records": [...] }` envelope.
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("records").or_else(|| obj.remove("data")) {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(PlaceError::DataSource(format!(
                    "{}: expected an array of records",
                    path.display()
                )))
            }
        },
        _ => {
            return Err(PlaceError::DataSource(format!(
                "{}: expected an array of records",
                path.display()
            )))
        }
    };

    let records: Vec<Map<String, Value>> = items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(record) => Some(record),
            _ => None,
        })
        .collect();
    tracing::info!("loaded {} records from {}", records.len(), path.display());
    Ok(Arc::new(records))
}

fn to_raw(category: PlaceCategory, record: &Map<String, Value>) -> RawPlace {
    let mut attributes = Map::new();
    let mut put = |key: &str, value: Option<String>| {
        if let Some(value) = value {
            attributes.insert(key.to_string(), Value::String(value));
        }
    };

    let name = match category {
        PlaceCategory::WheelchairAccessible => {
            put("installationPlace", text_field(record, &["설치장소설명"]));
            let open = text_field(record, &["평일운영시작시각"]);
            let close = text_field(record, &["평일운영종료시각"]);
            if let (Some(open), Some(close)) = (open, close) {
                put("weekdayHours", Some(format!("{open}-{close}")));
            }
            put("simultaneousUse", text_field(record, &["동시사용가능대수"]));
            put("airInjection", text_field(record, &["공기주입가능여부"]));
            put("phoneCharging", text_field(record, &["휴대전화충전가능여부"]));
            text_field(record, &["시설명", "name"])
        }
        PlaceCategory::WomenSafe => {
            put("purpose", text_field(record, &["설치목적"]));
            put("placeType", text_field(record, &["설치장소유형"]));
            put("linkage", text_field(record, &["연계방식"]));
            put("policeLinked", text_field(record, &["경찰연계유무"]));
            put("manager", text_field(record, &["관리기관명"]));
            text_field(record, &["설치위치", "name"])
        }
        _ => text_field(record, &["name"]),
    };

    RawPlace {
        id: None,
        name,
        latitude: number_field(record, LATITUDE_KEYS),
        longitude: number_field(record, LONGITUDE_KEYS),
        address: text_field(record, &["소재지도로명주소", "소재지지번주소", "address"]),
        attributes,
    }
}

#[async_trait]
impl PlaceSource for LocalDatasets {
    fn name(&self) -> &'static str {
        "local-datasets"
    }

    async fn nearby(&self, query: &PlaceQuery) -> Result<Vec<RawPlace>, PlaceError> {
        let SourceKind::LocalDataset { file } = query.category.source_kind() else {
            return Err(PlaceError::UnsupportedCategory(query.category.id().to_string()));
        };
        let records = self.records(file).await?;
        Ok(records
            .iter()
            .map(|record| to_raw(query.category, record))
            .collect())
    }
}
