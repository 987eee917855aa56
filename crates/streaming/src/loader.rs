//! Data Loader contract and the loaders shipped with the cache.
//!
//! A loader must fail (not return an empty list) when the data could not be
//! reached, so the cache can tell "legitimately empty" from "failed".

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use foundation::{DataRange, Feature, Properties};
use parking_lot::RwLock;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::source::{DataSource, DataSourceKind, SourceKey};
use crate::tabular::decode_csv_at;

/// Type alias for a boxed future that can be sent between threads.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("{location} is unreachable: {error}")]
    Unreachable {
        location: String,
        #[source]
        error: reqwest::Error,
    },
    #[error("{location} answered with status {status}")]
    Status { location: String, status: u16 },
    #[error("failed to read {location}: {error}")]
    Io {
        location: String,
        #[source]
        error: std::io::Error,
    },
    #[error("{location} is not valid GeoJSON: {reason}")]
    Decode { location: String, reason: String },
    #[error("data source has neither a url nor an inline value")]
    MissingLocation,
    #[error("{location} was not found")]
    NotFound { location: String },
}

/// Fetches the features of one `(source, range)` pair.
///
/// Implementations must be `Send + Sync` for use across async tasks.
/// Methods return boxed futures for dyn-compatibility.
pub trait DataLoader: Send + Sync {
    fn load<'a>(
        &'a self,
        source: &'a DataSource,
        range: Option<DataRange>,
    ) -> BoxFuture<'a, Result<Vec<Feature>, LoadError>>;
}

type BatchKey = (SourceKey, String);

/// Serves preloaded batches; used by tests and embedders that already hold
/// their data.
///
/// A gated loader holds every load until [`MemoryLoader::release`] hands out
/// a permit, which lets callers observe the in-between state.
#[derive(Debug, Default)]
pub struct MemoryLoader {
    batches: RwLock<BTreeMap<BatchKey, Vec<Feature>>>,
    failures: RwLock<BTreeMap<BatchKey, u16>>,
    seen: RwLock<BTreeSet<BatchKey>>,
    calls: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::default()
        }
    }

    pub fn insert(&self, source: &DataSource, range: Option<DataRange>, features: Vec<Feature>) {
        self.batches
            .write()
            .insert(batch_key(source, range.as_ref()), features);
    }

    /// Makes loads of this pair fail with an HTTP-like status until cleared.
    pub fn fail(&self, source: &DataSource, range: Option<DataRange>, status: u16) {
        self.failures
            .write()
            .insert(batch_key(source, range.as_ref()), status);
    }

    pub fn clear_failure(&self, source: &DataSource, range: Option<DataRange>) {
        self.failures.write().remove(&batch_key(source, range.as_ref()));
    }

    /// Lets `permits` held loads proceed.
    pub fn release(&self, permits: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(permits);
        }
    }

    /// Number of `load` invocations so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Whether any load for this pair has started.
    pub fn was_requested(&self, source: &DataSource, range: Option<DataRange>) -> bool {
        self.seen.read().contains(&batch_key(source, range.as_ref()))
    }
}

fn batch_key(source: &DataSource, range: Option<&DataRange>) -> BatchKey {
    (source.key(), DataRange::key_of(range))
}

impl DataLoader for MemoryLoader {
    fn load<'a>(
        &'a self,
        source: &'a DataSource,
        range: Option<DataRange>,
    ) -> BoxFuture<'a, Result<Vec<Feature>, LoadError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let key = batch_key(source, range.as_ref());
        self.seen.write().insert(key.clone());

        Box::pin(async move {
            if let Some(gate) = &self.gate
                && let Ok(permit) = gate.acquire().await
            {
                permit.forget();
            }

            if let Some(status) = self.failures.read().get(&key) {
                return Err(LoadError::Status {
                    location: key.0.to_string(),
                    status: *status,
                });
            }
            Ok(self.batches.read().get(&key).cloned().unwrap_or_default())
        })
    }
}

/// Loads GeoJSON and CSV from inline values, local files or HTTP(S) URLs.
///
/// URLs may carry `{z}`/`{x}`/`{y}` placeholders filled from the range.
#[derive(Debug, Clone, Default)]
pub struct SourceLoader {
    client: reqwest::Client,
    base_dir: Option<PathBuf>,
}

impl SourceLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves relative file locations against `dir`.
    pub fn with_base_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.base_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    async fn fetch_http(&self, location: &str) -> Result<Vec<u8>, LoadError> {
        let resp = self
            .client
            .get(location)
            .send()
            .await
            .map_err(|error| LoadError::Unreachable {
                location: location.to_string(),
                error,
            })?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(LoadError::NotFound {
                location: location.to_string(),
            });
        }
        if !resp.status().is_success() {
            return Err(LoadError::Status {
                location: location.to_string(),
                status: resp.status().as_u16(),
            });
        }

        let body = resp.bytes().await.map_err(|error| LoadError::Unreachable {
            location: location.to_string(),
            error,
        })?;
        Ok(body.to_vec())
    }

    async fn read_file(&self, location: &str) -> Result<Vec<u8>, LoadError> {
        let path = Path::new(location.strip_prefix("file://").unwrap_or(location));
        let path = match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        };

        tokio::fs::read(&path).await.map_err(|error| {
            if error.kind() == std::io::ErrorKind::NotFound {
                LoadError::NotFound {
                    location: location.to_string(),
                }
            } else {
                LoadError::Io {
                    location: location.to_string(),
                    error,
                }
            }
        })
    }
}

/// Decodes fetched bytes according to the source kind.
fn decode_body(
    source: &DataSource,
    body: &[u8],
    range: Option<DataRange>,
    location: &str,
) -> Result<Vec<Feature>, LoadError> {
    let invalid = |reason: String| LoadError::Decode {
        location: location.to_string(),
        reason,
    };
    match source.kind {
        DataSourceKind::Csv => {
            let text = std::str::from_utf8(body).map_err(|e| invalid(e.to_string()))?;
            decode_csv_at(text, &source.csv.clone().unwrap_or_default(), range, location)
        }
        _ => {
            let value: Value = serde_json::from_slice(body).map_err(|e| invalid(e.to_string()))?;
            decode_at(&value, range, location)
        }
    }
}

impl DataLoader for SourceLoader {
    fn load<'a>(
        &'a self,
        source: &'a DataSource,
        range: Option<DataRange>,
    ) -> BoxFuture<'a, Result<Vec<Feature>, LoadError>> {
        Box::pin(async move {
            if !source.kind.has_features() {
                debug!(source = %source.key(), "renderer-native source, no features to load");
                return Ok(Vec::new());
            }
            if let Some(value) = &source.value {
                return match (source.kind, value) {
                    (DataSourceKind::Csv, Value::String(text)) => decode_csv_at(
                        text,
                        &source.csv.clone().unwrap_or_default(),
                        range,
                        "inline",
                    ),
                    _ => decode_at(value, range, "inline"),
                };
            }
            let Some(url) = &source.url else {
                return Err(LoadError::MissingLocation);
            };

            let location = match &range {
                Some(r) => r.expand(url),
                None => url.clone(),
            };
            debug!(%location, kind = %source.kind, "loading");
            let body = if location.starts_with("http://") || location.starts_with("https://") {
                self.fetch_http(&location).await?
            } else {
                self.read_file(&location).await?
            };
            decode_body(source, &body, range, &location)
        })
    }
}

/// Decodes a FeatureCollection, a single Feature or a bare geometry.
///
/// Features without an id get `<range key>#<index>`; every feature is tagged
/// with `range`.
pub fn decode_geojson(value: &Value, range: Option<DataRange>) -> Result<Vec<Feature>, LoadError> {
    decode_at(value, range, "inline")
}

fn decode_at(value: &Value, range: Option<DataRange>, location: &str) -> Result<Vec<Feature>, LoadError> {
    let invalid = |reason: &str| LoadError::Decode {
        location: location.to_string(),
        reason: reason.to_string(),
    };
    let prefix = DataRange::key_of(range.as_ref());

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("missing \"type\""))?;
    let raw: Vec<&Value> = match kind {
        "FeatureCollection" => value
            .get("features")
            .and_then(Value::as_array)
            .ok_or_else(|| invalid("FeatureCollection without a \"features\" array"))?
            .iter()
            .collect(),
        "Feature" => vec![value],
        "Point" | "MultiPoint" | "LineString" | "MultiLineString" | "Polygon" | "MultiPolygon"
        | "GeometryCollection" => {
            let mut feature = Feature::new(format!("{prefix}#0")).with_geometry(value.clone());
            feature.range = range;
            return Ok(vec![feature]);
        }
        other => return Err(invalid(&format!("unsupported type \"{other}\""))),
    };

    raw.into_iter()
        .enumerate()
        .map(|(index, item)| {
            if item.get("type").and_then(Value::as_str) != Some("Feature") {
                return Err(invalid(&format!("item {index} is not a Feature")));
            }
            let id = match item.get("id") {
                Some(Value::String(id)) => id.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _ => format!("{prefix}#{index}"),
            };
            let properties = match item.get("properties") {
                Some(Value::Object(map)) => map.clone(),
                _ => Properties::new(),
            };
            Ok(Feature {
                id,
                geometry: item.get("geometry").filter(|g| !g.is_null()).cloned(),
                properties,
                range,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{DataLoader, SourceLoader, LoadError, MemoryLoader, decode_geojson};
    use crate::source::{CsvColumn, CsvOptions, DataSource, DataSourceKind};
    use foundation::{DataRange, Feature};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn decodes_collections_and_fills_missing_ids() {
        let value = json!({
            "type": "FeatureCollection",
            "features": [
                { "type": "Feature", "id": "a", "properties": { "n": 1 }, "geometry": null },
                { "type": "Feature", "id": 7, "geometry": { "type": "Point", "coordinates": [1, 2] } },
                { "type": "Feature", "properties": null }
            ]
        });
        let range = DataRange::new(1, 2, 3);
        let features = decode_geojson(&value, Some(range)).unwrap();
        let ids: Vec<&str> = features.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "7", "1:2:3#2"]);
        assert_eq!(features[0].property("n"), Some(&json!(1)));
        assert_eq!(features[0].geometry, None);
        assert!(features.iter().all(|f| f.range == Some(range)));
    }

    #[test]
    fn decodes_single_features_and_geometries() {
        let single = decode_geojson(&json!({ "type": "Feature", "id": "x", "properties": {} }), None).unwrap();
        assert_eq!(single, vec![Feature::new("x")]);

        let geometry = decode_geojson(&json!({ "type": "Point", "coordinates": [0, 0] }), None).unwrap();
        assert_eq!(geometry[0].id, "#0");
        assert!(geometry[0].geometry.is_some());

        assert!(matches!(
            decode_geojson(&json!({ "type": "Topology" }), None).unwrap_err(),
            LoadError::Decode { .. }
        ));
    }

    #[tokio::test]
    async fn source_loader_reads_inline_values() {
        let source = DataSource::inline(
            DataSourceKind::GeoJson,
            json!({ "type": "FeatureCollection", "features": [{ "type": "Feature", "id": "a" }] }),
        );
        let features = SourceLoader::new().load(&source, None).await.unwrap();
        assert_eq!(features, vec![Feature::new("a")]);
    }

    #[tokio::test]
    async fn source_loader_reads_files_relative_to_base_dir() {
        let dir = std::env::temp_dir().join(format!("streaming-loader-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(
            dir.join("points.json"),
            r#"{ "type": "FeatureCollection", "features": [{ "type": "Feature", "id": "p" }] }"#,
        )
        .await
        .unwrap();

        let loader = SourceLoader::new().with_base_dir(&dir);
        let source = DataSource::url(DataSourceKind::GeoJson, "points.json");
        let features = loader.load(&source, None).await.unwrap();
        assert_eq!(features[0].id, "p");

        let missing = DataSource::url(DataSourceKind::GeoJson, "nope.json");
        assert!(matches!(
            loader.load(&missing, None).await.unwrap_err(),
            LoadError::NotFound { .. }
        ));
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn source_loader_decodes_csv_files_and_inline_text() {
        let dir = std::env::temp_dir().join(format!("streaming-csv-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("stops.csv"), "stop;name;lat;lng\nS1;Hub;35.5;139.5\n")
            .await
            .unwrap();
        let options = CsvOptions {
            id_column: Some(CsvColumn::Name("stop".into())),
            lat_column: Some(CsvColumn::Name("lat".into())),
            lng_column: Some(CsvColumn::Name("lng".into())),
            no_header: false,
        };

        let loader = SourceLoader::new().with_base_dir(&dir);
        let source = DataSource::url(DataSourceKind::Csv, "stops.csv").with_csv(options.clone());
        let features = loader.load(&source, None).await.unwrap();
        assert_eq!(features[0].id, "S1");
        assert_eq!(features[0].property("name"), Some(&json!("Hub")));
        assert_eq!(
            features[0].geometry,
            Some(json!({ "type": "Point", "coordinates": [139.5, 35.5] }))
        );

        let inline = DataSource::inline(DataSourceKind::Csv, json!("stop,lat,lng\nS2,1,2\n")).with_csv(options);
        assert_eq!(loader.load(&inline, None).await.unwrap()[0].id, "S2");
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn renderer_native_kinds_have_no_features() {
        let source = DataSource::url(DataSourceKind::Tiles3d, "https://example.invalid/tileset.json");
        assert!(SourceLoader::new().load(&source, None).await.unwrap().is_empty());
        assert!(matches!(
            SourceLoader::new()
                .load(&DataSource::new(DataSourceKind::GeoJson), None)
                .await
                .unwrap_err(),
            LoadError::MissingLocation
        ));
    }

    #[tokio::test]
    async fn memory_loader_serves_batches_and_failures() {
        let loader = MemoryLoader::new();
        let source = DataSource::url(DataSourceKind::GeoJson, "mem://a");
        loader.insert(&source, None, vec![Feature::new("a")]);
        assert_eq!(loader.load(&source, None).await.unwrap(), vec![Feature::new("a")]);

        let range = DataRange::new(0, 0, 1);
        loader.fail(&source, Some(range), 503);
        assert!(matches!(
            loader.load(&source, Some(range)).await.unwrap_err(),
            LoadError::Status { status: 503, .. }
        ));
        loader.clear_failure(&source, Some(range));
        assert!(loader.load(&source, Some(range)).await.unwrap().is_empty());
        assert_eq!(loader.calls(), 3);
        assert!(loader.was_requested(&source, Some(range)));
    }
}
