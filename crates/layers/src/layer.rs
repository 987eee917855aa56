use expression::Defines;
use foundation::Properties;
use serde::{Deserialize, Serialize};
use streaming::DataSource;

use crate::appearance::Appearance;

/// A node of the visualization tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Layer {
    Group(GroupLayer),
    Simple(SimpleLayer),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupLayer {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub children: Vec<Layer>,
}

/// Data plus appearance. Appearance kinds sit at the top level of the
/// definition (`"marker": { ... }`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimpleLayer {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default = "visible_by_default")]
    pub visible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<DataSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Properties>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defines: Option<Defines>,
    #[serde(flatten)]
    pub appearance: Appearance,
}

fn visible_by_default() -> bool {
    true
}

impl SimpleLayer {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
            visible: true,
            data: None,
            properties: None,
            defines: None,
            appearance: Appearance::default(),
        }
    }

    pub fn with_data(mut self, data: DataSource) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_appearance(mut self, appearance: Appearance) -> Self {
        self.appearance = appearance;
        self
    }

    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = Some(properties);
        self
    }

    pub fn with_defines(mut self, defines: Defines) -> Self {
        self.defines = Some(defines);
        self
    }
}

impl Layer {
    pub fn id(&self) -> &str {
        match self {
            Layer::Group(group) => &group.id,
            Layer::Simple(simple) => &simple.id,
        }
    }

    pub fn as_simple(&self) -> Option<&SimpleLayer> {
        match self {
            Layer::Simple(simple) => Some(simple),
            Layer::Group(_) => None,
        }
    }

    /// Data source of a simple layer.
    pub fn data(&self) -> Option<&DataSource> {
        self.as_simple().and_then(|s| s.data.as_ref())
    }

    /// Simple layers of the tree in depth-first order.
    pub fn leaves(&self) -> Vec<&SimpleLayer> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(layer) = stack.pop() {
            match layer {
                Layer::Simple(simple) => out.push(simple),
                Layer::Group(group) => stack.extend(group.children.iter().rev()),
            }
        }
        out
    }
}

impl From<SimpleLayer> for Layer {
    fn from(layer: SimpleLayer) -> Self {
        Layer::Simple(layer)
    }
}
