use std::num::NonZeroUsize;
use std::sync::Arc;

use expression::{Defines, References, Syntax, Value, parse, references};
use foundation::Feature;
use lru::LruCache;
use serde_json::{Map, json};

/// Parsed form of one expanded expression text.
#[derive(Debug)]
pub struct Parsed {
    pub syntax: Syntax,
    pub references: References,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct EvaluationStats {
    pub hits: u64,
    pub misses: u64,
}

impl EvaluationStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Bounded memo of expression results and parsed syntax.
///
/// Results are keyed by expression identity, the referenced slice of the
/// feature and the layer's defines, so unrelated property edits keep hitting.
/// Owned by one resolver; never shared across threads.
pub struct EvaluationCache {
    results: LruCache<String, Value>,
    parsed: LruCache<String, Arc<Parsed>>,
    stats: EvaluationStats,
}

impl EvaluationCache {
    pub const DEFAULT_CAPACITY: usize = 10_000;

    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            results: LruCache::new(capacity),
            parsed: LruCache::new(capacity),
            stats: EvaluationStats::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.results.cap().get()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn stats(&self) -> EvaluationStats {
        self.stats
    }

    pub fn get(&mut self, key: &str) -> Option<Value> {
        match self.results.get(key) {
            Some(value) => {
                self.stats.hits += 1;
                Some(value.clone())
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, key: String, value: Value) {
        self.results.put(key, value);
    }

    /// Parses `text` (already define-expanded) once per distinct text.
    pub fn parsed(&mut self, text: &str) -> Result<Arc<Parsed>, expression::ParseError> {
        if let Some(parsed) = self.parsed.get(text) {
            return Ok(Arc::clone(parsed));
        }
        let parsed = Arc::new(Parsed {
            syntax: parse(text)?,
            references: references(text),
        });
        self.parsed.put(text.to_string(), Arc::clone(&parsed));
        Ok(parsed)
    }

    pub fn clear(&mut self) {
        self.results.clear();
        self.parsed.clear();
    }
}

impl std::fmt::Debug for EvaluationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationCache")
            .field("len", &self.results.len())
            .field("capacity", &self.capacity())
            .field("stats", &self.stats)
            .finish()
    }
}

/// Result key for `identity` evaluated against `feature`.
pub fn cache_key(
    identity: &str,
    refs: &References,
    feature: &Feature,
    defines: Option<&Defines>,
) -> String {
    let observed = if refs.whole_feature {
        feature.to_json()
    } else {
        let mut picked = Map::new();
        for name in &refs.names {
            if let Some(value) = feature.property(name) {
                picked.insert(name.clone(), value.clone());
            }
        }
        if refs.uses_id() {
            json!({ "id": feature.id, "properties": picked })
        } else {
            json!({ "properties": picked })
        }
    };
    json!([identity, observed, defines]).to_string()
}

#[cfg(test)]
mod tests {
    use super::{EvaluationCache, cache_key};
    use expression::{Defines, Value, references};
    use foundation::Feature;
    use pretty_assertions::assert_eq;

    #[test]
    fn key_ignores_unreferenced_properties() {
        let refs = references("${speed} > 10");
        let a = Feature::new("a").with_property("speed", 12).with_property("name", "x");
        let b = Feature::new("b").with_property("speed", 12).with_property("name", "y");
        assert_eq!(
            cache_key("${speed} > 10", &refs, &a, None),
            cache_key("${speed} > 10", &refs, &b, None)
        );

        let c = Feature::new("c").with_property("speed", 5);
        assert!(cache_key("${speed} > 10", &refs, &a, None) != cache_key("${speed} > 10", &refs, &c, None));
    }

    #[test]
    fn key_tracks_id_and_defines() {
        let refs = references("${id}");
        assert!(
            cache_key("${id}", &refs, &Feature::new("a"), None)
                != cache_key("${id}", &refs, &Feature::new("b"), None)
        );

        let refs = references("${limit}");
        let one = Defines::from([("limit".to_string(), "1".to_string())]);
        let two = Defines::from([("limit".to_string(), "2".to_string())]);
        let f = Feature::new("a");
        assert!(cache_key("x", &refs, &f, Some(&one)) != cache_key("x", &refs, &f, Some(&two)));
    }

    #[test]
    fn whole_feature_expressions_key_on_everything() {
        let refs = references("feature.geometry");
        let a = Feature::new("a").with_property("other", 1);
        let b = Feature::new("a").with_property("other", 2);
        assert!(cache_key("e", &refs, &a, None) != cache_key("e", &refs, &b, None));
    }

    #[test]
    fn evicts_least_recently_used() {
        let mut cache = EvaluationCache::new(2);
        cache.insert("a".into(), Value::Number(1.0));
        cache.insert("b".into(), Value::Number(2.0));
        assert_eq!(cache.get("a"), Some(Value::Number(1.0)));
        cache.insert("c".into(), Value::Number(3.0));

        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("c"), Some(Value::Number(3.0)));
        assert_eq!(cache.stats().hits, 2);
        assert_eq!(cache.stats().misses, 1);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn zero_capacity_still_holds_one_entry() {
        let mut cache = EvaluationCache::new(0);
        assert_eq!(cache.capacity(), 1);
        cache.insert("k".into(), Value::Bool(true));
        assert_eq!(cache.get("k"), Some(Value::Bool(true)));
    }

    #[test]
    fn parsed_text_is_reused() {
        let mut cache = EvaluationCache::new(4);
        let first = cache.parsed("${a} + 1").unwrap();
        let second = cache.parsed("${a} + 1").unwrap();
        assert!(std::sync::Arc::ptr_eq(&first, &second));
        assert!(first.references.names.contains("a"));
        assert!(cache.parsed("1 +").is_err());
    }
}
