use std::collections::BTreeMap;

use foundation::{Feature, TimeInterval};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::appearance::AppearanceKind;
use crate::layer::Layer;

/// Evaluated appearance: plain JSON per kind, undefined properties omitted.
pub type ResolvedAppearance = BTreeMap<AppearanceKind, Map<String, Value>>;

/// A feature with its resolved appearance merged alongside.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComputedFeature {
    #[serde(flatten)]
    pub feature: Feature,
    #[serde(flatten)]
    pub appearance: ResolvedAppearance,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<TimeInterval>,
}

impl ComputedFeature {
    pub fn id(&self) -> &str {
        &self.feature.id
    }

    /// One resolved property, e.g. `("marker", "pointColor")`.
    pub fn property(&self, kind: AppearanceKind, name: &str) -> Option<&Value> {
        self.appearance.get(&kind).and_then(|spec| spec.get(name))
    }
}

/// Visual-only patch merged over computed features at read time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppearanceOverrides(ResolvedAppearance);

impl AppearanceOverrides {
    /// Keeps the appearance-kind keys of `value` and drops everything else.
    pub fn from_json(value: &Value) -> Self {
        let Value::Object(object) = value else {
            return Self::default();
        };
        let kinds = object
            .iter()
            .filter_map(|(key, spec)| {
                let kind = AppearanceKind::from_key(key)?;
                let Value::Object(spec) = spec else {
                    return None;
                };
                Some((kind, spec.clone()))
            })
            .collect();
        Self(kinds)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn kinds(&self) -> impl Iterator<Item = AppearanceKind> + '_ {
        self.0.keys().copied()
    }

    /// Deep-merges the patch onto `appearance`.
    pub fn apply(&self, appearance: &mut ResolvedAppearance) {
        for (kind, patch) in &self.0 {
            let target = appearance.entry(*kind).or_default();
            for (key, value) in patch {
                merge_value(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }

    pub fn apply_to(&self, feature: &ComputedFeature) -> ComputedFeature {
        let mut merged = feature.clone();
        self.apply(&mut merged.appearance);
        merged
    }
}

fn merge_value(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                merge_value(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerStatus {
    Fetching,
    Ready,
}

/// Snapshot handed to the renderer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputedLayer {
    pub id: String,
    pub layer: Layer,
    pub status: LayerStatus,
    pub original_features: Vec<Feature>,
    pub features: Vec<ComputedFeature>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appearance: Option<ResolvedAppearance>,
}

impl ComputedLayer {
    pub fn is_ready(&self) -> bool {
        self.status == LayerStatus::Ready
    }

    pub fn feature(&self, id: &str) -> Option<&ComputedFeature> {
        self.features.iter().find(|f| f.id() == id)
    }
}

#[cfg(test)]
mod tests {
    use super::{AppearanceOverrides, ComputedFeature, ResolvedAppearance};
    use crate::appearance::AppearanceKind;
    use foundation::Feature;
    use pretty_assertions::assert_eq;
    use serde_json::{Map, json};

    fn computed() -> ComputedFeature {
        let mut marker = Map::new();
        marker.insert("pointColor".into(), json!("red"));
        marker.insert("label".into(), json!({ "text": "a", "size": 10 }));
        ComputedFeature {
            feature: Feature::new("a").with_property("speed", 12),
            appearance: ResolvedAppearance::from([(AppearanceKind::Marker, marker)]),
            interval: None,
        }
    }

    #[test]
    fn overrides_keep_only_appearance_keys() {
        let overrides = AppearanceOverrides::from_json(&json!({
            "marker": { "pointColor": "blue" },
            "data": { "url": "elsewhere" },
            "polygon": "not an object"
        }));
        assert_eq!(overrides.kinds().collect::<Vec<_>>(), vec![AppearanceKind::Marker]);
        assert!(AppearanceOverrides::from_json(&json!(null)).is_empty());
    }

    #[test]
    fn overrides_deep_merge_without_touching_the_source() {
        let base = computed();
        let overrides = AppearanceOverrides::from_json(&json!({
            "marker": { "label": { "size": 14 } },
            "polyline": { "width": 2 }
        }));
        let merged = overrides.apply_to(&base);

        assert_eq!(
            merged.property(AppearanceKind::Marker, "label"),
            Some(&json!({ "text": "a", "size": 14 }))
        );
        assert_eq!(
            merged.property(AppearanceKind::Marker, "pointColor"),
            Some(&json!("red"))
        );
        assert_eq!(merged.property(AppearanceKind::Polyline, "width"), Some(&json!(2)));
        assert_eq!(base, computed());
    }

    #[test]
    fn serializes_flat() {
        assert_eq!(
            serde_json::to_value(computed()).unwrap(),
            json!({
                "id": "a",
                "properties": { "speed": 12 },
                "marker": { "label": { "size": 10, "text": "a" }, "pointColor": "red" }
            })
        );
    }
}
