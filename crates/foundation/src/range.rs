use serde::{Deserialize, Serialize};

/// Tile coordinate partitioning a paged data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DataRange {
    pub x: u32,
    pub y: u32,
    pub z: u8,
}

impl DataRange {
    pub fn new(x: u32, y: u32, z: u8) -> Self {
        Self { x, y, z }
    }

    /// Secondary cache key, `x:y:z`.
    pub fn key(&self) -> String {
        format!("{}:{}:{}", self.x, self.y, self.z)
    }

    /// Key of an optional range; the whole source is the empty string.
    pub fn key_of(range: Option<&DataRange>) -> String {
        range.map(DataRange::key).unwrap_or_default()
    }

    /// Substitutes `{x}`, `{y}` and `{z}` placeholders in a location template.
    pub fn expand(&self, template: &str) -> String {
        template
            .replace("{z}", &self.z.to_string())
            .replace("{x}", &self.x.to_string())
            .replace("{y}", &self.y.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::DataRange;

    #[test]
    fn keys_are_stable() {
        let r = DataRange::new(3, 5, 7);
        assert_eq!(r.key(), "3:5:7");
        assert_eq!(DataRange::key_of(Some(&r)), "3:5:7");
        assert_eq!(DataRange::key_of(None), "");
    }

    #[test]
    fn expands_location_templates() {
        let r = DataRange::new(1, 2, 3);
        assert_eq!(
            r.expand("https://tiles.example/{z}/{x}/{y}.json"),
            "https://tiles.example/3/1/2.json"
        );
    }
}
