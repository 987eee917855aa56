use std::collections::BTreeMap;
use std::fmt;

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Groups of visual properties a renderer understands.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AppearanceKind {
    #[serde(rename = "marker")]
    Marker,
    #[serde(rename = "polyline")]
    Polyline,
    #[serde(rename = "polygon")]
    Polygon,
    #[serde(rename = "model")]
    Model,
    #[serde(rename = "3dtiles")]
    Tiles3d,
    #[serde(rename = "ellipsoid")]
    Ellipsoid,
    #[serde(rename = "photooverlay")]
    PhotoOverlay,
    #[serde(rename = "legacy_resource")]
    LegacyResource,
}

impl AppearanceKind {
    pub const ALL: [AppearanceKind; 8] = [
        AppearanceKind::Marker,
        AppearanceKind::Polyline,
        AppearanceKind::Polygon,
        AppearanceKind::Model,
        AppearanceKind::Tiles3d,
        AppearanceKind::Ellipsoid,
        AppearanceKind::PhotoOverlay,
        AppearanceKind::LegacyResource,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AppearanceKind::Marker => "marker",
            AppearanceKind::Polyline => "polyline",
            AppearanceKind::Polygon => "polygon",
            AppearanceKind::Model => "model",
            AppearanceKind::Tiles3d => "3dtiles",
            AppearanceKind::Ellipsoid => "ellipsoid",
            AppearanceKind::PhotoOverlay => "photooverlay",
            AppearanceKind::LegacyResource => "legacy_resource",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == key)
    }
}

impl fmt::Display for AppearanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{ "conditions": [["cond", "value"], ...] }`, first match wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionsSpec {
    pub conditions: Vec<(String, String)>,
}

/// Payload of an expression container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StyleExpression {
    Conditions(ConditionsSpec),
    Text(String),
    /// Booleans, numbers and anything else stored directly; passed through.
    Literal(Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionContainer {
    pub expression: StyleExpression,
}

/// One visual property: a literal or `{ "expression": ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StyleValue {
    Expression(ExpressionContainer),
    Literal(Value),
}

impl StyleValue {
    pub fn expression(expression: StyleExpression) -> Self {
        StyleValue::Expression(ExpressionContainer { expression })
    }

    pub fn text(expression: impl Into<String>) -> Self {
        Self::expression(StyleExpression::Text(expression.into()))
    }

    pub fn conditions<C, V>(pairs: impl IntoIterator<Item = (C, V)>) -> Self
    where
        C: Into<String>,
        V: Into<String>,
    {
        Self::expression(StyleExpression::Conditions(ConditionsSpec {
            conditions: pairs
                .into_iter()
                .map(|(c, v)| (c.into(), v.into()))
                .collect(),
        }))
    }
}

pub type AppearanceSpec = BTreeMap<String, StyleValue>;

/// Appearance declared on a simple layer, keyed by kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Appearance(pub BTreeMap<AppearanceKind, AppearanceSpec>);

impl Appearance {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert of one property.
    pub fn with(mut self, kind: AppearanceKind, property: impl Into<String>, value: StyleValue) -> Self {
        self.0.entry(kind).or_default().insert(property.into(), value);
        self
    }

    pub fn get(&self, kind: AppearanceKind) -> Option<&AppearanceSpec> {
        self.0.get(&kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = (AppearanceKind, &AppearanceSpec)> {
        self.0.iter().map(|(kind, spec)| (*kind, spec))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for Appearance {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (kind, spec) in &self.0 {
            map.serialize_entry(kind.as_str(), spec)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Appearance {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AppearanceVisitor;

        impl<'de> Visitor<'de> for AppearanceVisitor {
            type Value = Appearance;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of appearance kinds")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Appearance, A::Error> {
                let mut appearance = Appearance::default();
                while let Some(key) = access.next_key::<String>()? {
                    match AppearanceKind::from_key(&key) {
                        Some(kind) => {
                            let spec: AppearanceSpec = access.next_value()?;
                            appearance.0.insert(kind, spec);
                        }
                        None => {
                            access.next_value::<serde::de::IgnoredAny>()?;
                        }
                    }
                }
                Ok(appearance)
            }
        }

        deserializer.deserialize_map(AppearanceVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::{Appearance, AppearanceKind, ConditionsSpec, StyleExpression, StyleValue};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn kinds_round_trip_their_keys() {
        for kind in AppearanceKind::ALL {
            assert_eq!(AppearanceKind::from_key(kind.as_str()), Some(kind));
        }
        assert_eq!(AppearanceKind::from_key("3dtiles"), Some(AppearanceKind::Tiles3d));
        assert_eq!(AppearanceKind::from_key("label"), None);
    }

    #[test]
    fn style_values_distinguish_containers_from_literals() {
        let parse = |v| serde_json::from_value::<StyleValue>(v).unwrap();
        assert_eq!(parse(json!("#fff")), StyleValue::Literal(json!("#fff")));
        assert_eq!(
            parse(json!({ "color": "red" })),
            StyleValue::Literal(json!({ "color": "red" }))
        );
        assert_eq!(parse(json!({ "expression": "${a}" })), StyleValue::text("${a}"));
        assert_eq!(
            parse(json!({ "expression": { "conditions": [["true", "1"]] } })),
            StyleValue::expression(StyleExpression::Conditions(ConditionsSpec {
                conditions: vec![("true".into(), "1".into())]
            }))
        );
        assert_eq!(
            parse(json!({ "expression": 3 })),
            StyleValue::expression(StyleExpression::Literal(json!(3)))
        );
    }

    #[test]
    fn appearance_ignores_unknown_keys_and_serializes_by_kind() {
        let appearance: Appearance = serde_json::from_value(json!({
            "polygon": { "fill": true },
            "id": "not-an-appearance"
        }))
        .unwrap();
        assert_eq!(
            appearance,
            Appearance::new().with(AppearanceKind::Polygon, "fill", StyleValue::Literal(json!(true)))
        );
        assert_eq!(
            serde_json::to_value(&appearance).unwrap(),
            json!({ "polygon": { "fill": true } })
        );
    }
}
