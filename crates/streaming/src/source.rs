use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of data a source points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSourceKind {
    GeoJson,
    Csv,
    #[serde(rename = "3dtiles")]
    Tiles3d,
    Gltf,
    Wms,
    Wmts,
    Mvt,
}

impl DataSourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DataSourceKind::GeoJson => "geojson",
            DataSourceKind::Csv => "csv",
            DataSourceKind::Tiles3d => "3dtiles",
            DataSourceKind::Gltf => "gltf",
            DataSourceKind::Wms => "wms",
            DataSourceKind::Wmts => "wmts",
            DataSourceKind::Mvt => "mvt",
        }
    }

    /// Whether this kind decodes into features; the others are drawn by the
    /// renderer straight from the source.
    pub fn has_features(self) -> bool {
        matches!(self, DataSourceKind::GeoJson | DataSourceKind::Csv)
    }
}

impl fmt::Display for DataSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Time-dynamic data: which property holds each feature's time (seconds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeConfig {
    pub property: String,
    /// Fixed interval length in seconds; without it a feature lasts until
    /// the next distinct time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<f64>,
}

/// A CSV column, by header name or by zero-based position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CsvColumn {
    Index(usize),
    Name(String),
}

impl CsvColumn {
    pub fn matches(&self, header: Option<&str>, index: usize) -> bool {
        match self {
            CsvColumn::Index(i) => *i == index,
            CsvColumn::Name(name) => header == Some(name.as_str()),
        }
    }
}

/// How CSV rows map onto features. Latitude and longitude columns become a
/// `Point` geometry; every other named column becomes a string property.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsvOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_column: Option<CsvColumn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat_column: Option<CsvColumn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lng_column: Option<CsvColumn>,
    /// The first row is data, so only positional columns can match.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub no_header: bool,
}

/// Reference to remote or inline data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSource {
    #[serde(rename = "type")]
    pub kind: DataSourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, alias = "layers", skip_serializing_if = "Option::is_none")]
    pub layer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Properties whose string value holds JSON text to parse before evaluation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub json_properties: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<TimeConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csv: Option<CsvOptions>,
}

impl DataSource {
    pub fn new(kind: DataSourceKind) -> Self {
        Self {
            kind,
            url: None,
            layer_name: None,
            value: None,
            json_properties: Vec::new(),
            time: None,
            csv: None,
        }
    }

    pub fn url(kind: DataSourceKind, url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::new(kind)
        }
    }

    pub fn inline(kind: DataSourceKind, value: Value) -> Self {
        Self {
            value: Some(value),
            ..Self::new(kind)
        }
    }

    pub fn with_layer_name(mut self, name: impl Into<String>) -> Self {
        self.layer_name = Some(name.into());
        self
    }

    pub fn with_json_properties(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.json_properties = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_time(mut self, time: TimeConfig) -> Self {
        self.time = Some(time);
        self
    }

    pub fn with_csv(mut self, options: CsvOptions) -> Self {
        self.csv = Some(options);
        self
    }

    /// Cache identity: `kind::url[::layerName]`, or a content hash for inline
    /// data without a URL. CSV options change the decoded features, so they
    /// add a `::csv:<hash>` suffix.
    pub fn key(&self) -> SourceKey {
        let location = match (&self.url, &self.value) {
            (Some(url), _) => url.clone(),
            (None, Some(value)) => {
                let hash = blake3::hash(value.to_string().as_bytes());
                format!("inline:{}", &hash.to_hex()[..16])
            }
            (None, None) => String::new(),
        };
        let mut key = format!("{}::{location}", self.kind);
        if let Some(layer) = &self.layer_name {
            key.push_str("::");
            key.push_str(layer);
        }
        if let Some(csv) = &self.csv {
            let options = serde_json::to_string(csv).unwrap_or_default();
            let hash = blake3::hash(options.as_bytes());
            key.push_str("::csv:");
            key.push_str(&hash.to_hex()[..8]);
        }
        SourceKey(key)
    }
}

/// Identity of a data source within the feature cache.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceKey(pub String);

impl SourceKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::{CsvColumn, CsvOptions, DataSource, DataSourceKind};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn key_includes_kind_url_and_layer() {
        let source = DataSource::url(DataSourceKind::Mvt, "https://example.com/{z}/{x}/{y}.mvt")
            .with_layer_name("roads");
        assert_eq!(
            source.key().as_str(),
            "mvt::https://example.com/{z}/{x}/{y}.mvt::roads"
        );
    }

    #[test]
    fn inline_sources_key_on_content() {
        let a = DataSource::inline(DataSourceKind::GeoJson, json!({ "type": "Point", "coordinates": [0, 0] }));
        let b = DataSource::inline(DataSourceKind::GeoJson, json!({ "type": "Point", "coordinates": [1, 0] }));
        assert!(a.key().as_str().starts_with("geojson::inline:"));
        assert_ne!(a.key(), b.key());
        assert_eq!(a.key(), a.clone().key());
    }

    #[test]
    fn csv_options_deserialize_and_change_the_key() {
        let source: DataSource = serde_json::from_value(json!({
            "type": "csv",
            "url": "stops.csv",
            "csv": { "idColumn": "stop_id", "latColumn": 2, "lngColumn": "lon", "noHeader": false }
        }))
        .unwrap();
        let options = source.csv.clone().unwrap();
        assert_eq!(options.id_column, Some(CsvColumn::Name("stop_id".into())));
        assert_eq!(options.lat_column, Some(CsvColumn::Index(2)));
        assert!(source.kind.has_features());

        let plain = DataSource::url(DataSourceKind::Csv, "stops.csv");
        assert_eq!(plain.key().as_str(), "csv::stops.csv");
        assert!(source.key().as_str().starts_with("csv::stops.csv::csv:"));
        assert_ne!(
            source.key(),
            plain.with_csv(CsvOptions { no_header: true, ..CsvOptions::default() }).key()
        );
    }

    #[test]
    fn deserializes_layer_definition_fields() {
        let source: DataSource = serde_json::from_value(json!({
            "type": "3dtiles",
            "url": "https://example.com/tileset.json",
            "layers": "buildings",
            "jsonProperties": ["attributes"],
            "time": { "property": "t", "interval": 60.0 }
        }))
        .unwrap();
        assert_eq!(source.kind, DataSourceKind::Tiles3d);
        assert_eq!(source.layer_name.as_deref(), Some("buildings"));
        assert_eq!(source.json_properties, vec!["attributes".to_string()]);
        assert_eq!(source.time.unwrap().interval, Some(60.0));

        let round = serde_json::to_value(DataSource::url(DataSourceKind::GeoJson, "a.json")).unwrap();
        assert_eq!(round, json!({ "type": "geojson", "url": "a.json" }));
    }
}
