use serde::{Deserialize, Serialize};

/// Time primitives
#[derive(Copy, Clone, Debug, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Time(pub f64); // seconds

/// Half-open interval `[start, end)`; a missing end never closes.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeInterval {
    pub start: Time,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<Time>,
}

impl TimeInterval {
    pub fn open(start: Time) -> Self {
        Self { start, end: None }
    }

    pub fn bounded(start: Time, end: Time) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    pub fn contains(&self, t: Time) -> bool {
        t.0 >= self.start.0 && self.end.is_none_or(|end| t.0 < end.0)
    }

    pub fn duration(&self) -> Option<f64> {
        self.end.map(|end| (end.0 - self.start.0).max(0.0))
    }
}
