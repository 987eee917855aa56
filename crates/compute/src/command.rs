use foundation::{DataRange, Feature};
use layers::Layer;
use serde_json::Value;

/// Input to a layer's compute engine, applied strictly in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `None` clears the layer and returns the engine to idle.
    SetLayer(Option<Layer>),
    RequestFetch(DataRange),
    WriteFeatures(Vec<Feature>),
    DeleteFeatures(Vec<String>),
    /// Appearance patch merged at read time; `None` clears it.
    Override(Option<Value>),
    /// Re-read the cache and re-evaluate.
    Refresh,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::SetLayer(_) => "setLayer",
            Command::RequestFetch(_) => "requestFetch",
            Command::WriteFeatures(_) => "writeFeatures",
            Command::DeleteFeatures(_) => "deleteFeatures",
            Command::Override(_) => "override",
            Command::Refresh => "refresh",
        }
    }

    /// Whether a newer command of the same kind makes this one redundant.
    pub fn supersedes(&self, older: &Command) -> bool {
        matches!(
            (older, self),
            (Command::SetLayer(_), Command::SetLayer(_))
                | (Command::Override(_), Command::Override(_))
                | (Command::Refresh, Command::Refresh)
        )
    }
}
