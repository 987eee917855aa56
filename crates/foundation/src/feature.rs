use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::range::DataRange;

pub type Properties = Map<String, Value>;

/// One geometry + property record belonging to a data source.
///
/// `id` is unique within a source. Features are treated as immutable once
/// fetched; edits replace them wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Value>,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<DataRange>,
}

impl Feature {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            geometry: None,
            properties: Properties::new(),
            range: None,
        }
    }

    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_geometry(mut self, geometry: Value) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn with_range(mut self, range: DataRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    pub fn range_key(&self) -> String {
        DataRange::key_of(self.range.as_ref())
    }

    /// Direct attribute of the feature object (`feature['properties']`).
    pub fn attribute(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(Value::String(self.id.clone())),
            "properties" => Some(Value::Object(self.properties.clone())),
            "geometry" => self.geometry.clone(),
            "range" => self
                .range
                .map(|r| json!({ "x": r.x, "y": r.y, "z": r.z })),
            _ => None,
        }
    }

    /// The whole feature as a JSON object.
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        object.insert("id".to_string(), Value::String(self.id.clone()));
        for key in ["geometry", "range"] {
            if let Some(value) = self.attribute(key) {
                object.insert(key.to_string(), value);
            }
        }
        object.insert(
            "properties".to_string(),
            Value::Object(self.properties.clone()),
        );
        Value::Object(object)
    }
}
