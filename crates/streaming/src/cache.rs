use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use foundation::{DataRange, Feature};
use futures_util::FutureExt;
use futures_util::future::Shared;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::loader::{BoxFuture, DataLoader, LoadError};
use crate::residency::ResidencyState;
use crate::source::{DataSource, SourceKey};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Failure of one `(source, range)` fetch. Cheap to clone so every joined
/// requester receives it.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("loading {source_key} [{range}] failed: {error}")]
    Load {
        source_key: SourceKey,
        range: String,
        #[source]
        error: Arc<LoadError>,
    },
    #[error("loading {source_key} [{range}] was aborted")]
    Aborted { source_key: SourceKey, range: String },
}

/// Published after every mutation of a source's entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEvent {
    pub source_key: SourceKey,
    pub revision: u64,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Fetches answered from resident entries.
    pub hits: u64,
    pub misses: u64,
    /// Loader invocations.
    pub loads: u64,
    /// Fetches that joined a load already in flight.
    pub joined: u64,
    pub failures: u64,
}

type SharedFetch = Shared<BoxFuture<'static, Result<(), FetchError>>>;
type FlightKey = (SourceKey, String);

#[derive(Debug, Default)]
struct SourceEntry {
    revision: u64,
    /// Counts buckets that have received their first features.
    arrivals: u64,
    ranges: BTreeMap<String, RangeEntry>,
}

impl SourceEntry {
    /// Replaces one bucket. A bucket takes its place in the batch order the
    /// first time it holds features and keeps it afterwards.
    fn fill(&mut self, range_key: String, state: ResidencyState, features: Vec<Feature>) {
        let slot = self
            .ranges
            .entry(range_key)
            .or_insert_with(|| RangeEntry::with_state(state));
        if slot.arrival.is_none() && !features.is_empty() {
            self.arrivals += 1;
            slot.arrival = Some(self.arrivals);
        }
        slot.state = state;
        slot.features = Arc::new(features);
    }

    fn resident_batches(&self) -> Vec<Arc<Vec<Feature>>> {
        let mut resident: Vec<&RangeEntry> = self
            .ranges
            .values()
            .filter(|e| e.state.is_resident())
            .collect();
        resident.sort_by_key(|e| e.arrival);
        resident.into_iter().map(|e| e.features.clone()).collect()
    }
}

#[derive(Debug, Clone)]
struct RangeEntry {
    state: ResidencyState,
    /// While a load is in flight this holds only features written meanwhile.
    features: Arc<Vec<Feature>>,
    arrival: Option<u64>,
}

impl RangeEntry {
    fn with_state(state: ResidencyState) -> Self {
        Self {
            state,
            features: Arc::new(Vec::new()),
            arrival: None,
        }
    }
}

/// Replaces features with a known id in place and appends the rest.
fn upsert(merged: &mut Vec<Feature>, incoming: impl IntoIterator<Item = Feature>) {
    for feature in incoming {
        match merged.iter_mut().find(|f| f.id == feature.id) {
            Some(existing) => *existing = feature,
            None => merged.push(feature),
        }
    }
}

struct Inner {
    loader: Arc<dyn DataLoader>,
    entries: RwLock<BTreeMap<SourceKey, SourceEntry>>,
    in_flight: Mutex<BTreeMap<FlightKey, SharedFetch>>,
    stats: Mutex<CacheStats>,
    events: broadcast::Sender<CacheEvent>,
}

/// Two-level feature cache: data-source identity, then range key (`""` for
/// the whole source).
///
/// Shared between layers reading the same source. At most one load per
/// `(source, range)` is in flight; concurrent fetches join it. Loads run on
/// their own task so they finish even when every requester has gone away.
#[derive(Clone)]
pub struct FeatureCache {
    inner: Arc<Inner>,
}

impl FeatureCache {
    pub fn new(loader: Arc<dyn DataLoader>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                loader,
                entries: RwLock::new(BTreeMap::new()),
                in_flight: Mutex::new(BTreeMap::new()),
                stats: Mutex::new(CacheStats::default()),
                events,
            }),
        }
    }

    /// Features resident under exactly this range.
    pub fn get(&self, source: &DataSource, range: Option<&DataRange>) -> Option<Arc<Vec<Feature>>> {
        let entries = self.inner.entries.read();
        let entry = entries.get(&source.key())?.ranges.get(&DataRange::key_of(range))?;
        entry.state.is_resident().then(|| entry.features.clone())
    }

    /// Every resident batch of the source, in the order the batches first
    /// received features.
    pub fn get_all(&self, source: &DataSource) -> Option<Vec<Arc<Vec<Feature>>>> {
        let batches = self.inner.entries.read().get(&source.key())?.resident_batches();
        (!batches.is_empty()).then_some(batches)
    }

    /// All resident features of the source, flattened.
    pub fn features(&self, source: &DataSource) -> Vec<Feature> {
        self.get_all(source)
            .unwrap_or_default()
            .iter()
            .flat_map(|batch| batch.iter().cloned())
            .collect()
    }

    /// Buckets `features` by their own range tag and merges each bucket:
    /// features with a known id are replaced in place, new ones appended.
    ///
    /// A bucket whose load is in flight stays `Fetching`; the written
    /// features are merged over the loaded batch when it lands.
    pub fn set(&self, source: &DataSource, features: Vec<Feature>) {
        if features.is_empty() {
            return;
        }
        let mut buckets: BTreeMap<String, Vec<Feature>> = BTreeMap::new();
        for feature in features {
            buckets.entry(feature.range_key()).or_default().push(feature);
        }

        let key = source.key();
        let revision = {
            let mut entries = self.inner.entries.write();
            let entry = entries.entry(key.clone()).or_default();
            for (range_key, incoming) in buckets {
                let (state, mut merged) = match entry.ranges.get(&range_key) {
                    Some(slot) if slot.state == ResidencyState::Fetching => {
                        (ResidencyState::Fetching, slot.features.as_ref().clone())
                    }
                    Some(slot) => (ResidencyState::Resident, slot.features.as_ref().clone()),
                    None => (ResidencyState::Resident, Vec::new()),
                };
                upsert(&mut merged, incoming);
                entry.fill(range_key, state, merged);
            }
            entry.revision += 1;
            entry.revision
        };
        self.inner.publish(key, revision);
    }

    /// Removes the named features from every range of the source.
    ///
    /// Only buckets that contained one of `ids` are rewritten; returns their
    /// range keys. Nothing is published when nothing changed.
    pub fn delete_all(&self, source: &DataSource, ids: &[String]) -> Vec<String> {
        let key = source.key();
        let (changed, revision) = {
            let mut entries = self.inner.entries.write();
            let Some(entry) = entries.get_mut(&key) else {
                return Vec::new();
            };
            let mut changed = Vec::new();
            for (range_key, slot) in entry.ranges.iter_mut() {
                if !slot.features.iter().any(|f| ids.contains(&f.id)) {
                    continue;
                }
                let kept: Vec<Feature> = slot
                    .features
                    .iter()
                    .filter(|f| !ids.contains(&f.id))
                    .cloned()
                    .collect();
                slot.features = Arc::new(kept);
                changed.push(range_key.clone());
            }
            if changed.is_empty() {
                return changed;
            }
            entry.revision += 1;
            (changed, entry.revision)
        };
        self.inner.publish(key, revision);
        changed
    }

    /// Revision of the source's entries; 0 when nothing is known.
    pub fn revision(&self, source: &DataSource) -> u64 {
        self.revision_of(&source.key())
    }

    pub fn revision_of(&self, key: &SourceKey) -> u64 {
        self.inner
            .entries
            .read()
            .get(key)
            .map_or(0, |entry| entry.revision)
    }

    pub fn state(&self, source: &DataSource, range: Option<&DataRange>) -> Option<ResidencyState> {
        self.inner.state(&source.key(), &DataRange::key_of(range))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.events.subscribe()
    }

    pub fn stats(&self) -> CacheStats {
        *self.inner.stats.lock()
    }

    /// Makes `(source, range)` resident, loading it if needed.
    ///
    /// Returns at once for resident entries and joins a load already in
    /// flight. A failed load leaves the entry `Failed` so a later fetch
    /// retries it.
    pub async fn fetch(&self, source: &DataSource, range: Option<DataRange>) -> Result<(), FetchError> {
        let key = source.key();
        let range_key = DataRange::key_of(range.as_ref());

        let shared = {
            let mut in_flight = self.inner.in_flight.lock();
            if self
                .inner
                .state(&key, &range_key)
                .is_some_and(ResidencyState::is_resident)
            {
                self.inner.stats.lock().hits += 1;
                return Ok(());
            }

            let flight_key = (key.clone(), range_key.clone());
            match in_flight.get(&flight_key) {
                Some(existing) => {
                    self.inner.stats.lock().joined += 1;
                    debug!(source = %key, range = %range_key, "joining in-flight load");
                    existing.clone()
                }
                None => {
                    {
                        let mut stats = self.inner.stats.lock();
                        stats.misses += 1;
                        stats.loads += 1;
                    }
                    self.inner.mark(&key, &range_key, ResidencyState::Fetching);
                    let shared = self.start_load(source.clone(), range, flight_key.clone());
                    in_flight.insert(flight_key, shared.clone());
                    shared
                }
            }
        };
        shared.await
    }

    fn start_load(&self, source: DataSource, range: Option<DataRange>, flight_key: FlightKey) -> SharedFetch {
        let inner = self.inner.clone();
        let task_key = flight_key.clone();
        let task = tokio::spawn(async move {
            let result = inner.loader.load(&source, range).await;
            inner.complete(&task_key, range, result)
        });

        let inner = self.inner.clone();
        let (source_key, range_key) = flight_key;
        let fut: BoxFuture<'static, Result<(), FetchError>> = Box::pin(async move {
            match task.await {
                Ok(result) => result,
                Err(join_error) => {
                    warn!(source = %source_key, range = %range_key, %join_error, "load task died");
                    inner.mark(&source_key, &range_key, ResidencyState::Failed);
                    inner.in_flight.lock().remove(&(source_key.clone(), range_key.clone()));
                    Err(FetchError::Aborted {
                        source_key,
                        range: range_key,
                    })
                }
            }
        });
        fut.shared()
    }
}

impl fmt::Debug for FeatureCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureCache")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn state(&self, key: &SourceKey, range_key: &str) -> Option<ResidencyState> {
        self.entries
            .read()
            .get(key)
            .and_then(|entry| entry.ranges.get(range_key))
            .map(|e| e.state)
    }

    fn mark(&self, key: &SourceKey, range_key: &str, state: ResidencyState) {
        let mut entries = self.entries.write();
        let entry = entries.entry(key.clone()).or_default();
        entry
            .ranges
            .entry(range_key.to_string())
            .and_modify(|e| {
                if !e.state.is_resident() {
                    e.state = state;
                }
            })
            .or_insert_with(|| RangeEntry::with_state(state));
    }

    fn complete(
        &self,
        flight_key: &FlightKey,
        range: Option<DataRange>,
        result: Result<Vec<Feature>, LoadError>,
    ) -> Result<(), FetchError> {
        let (key, range_key) = flight_key;
        let outcome = match result {
            Ok(features) => {
                let revision = self.store(key, range_key, range, features);
                self.publish(key.clone(), revision);
                Ok(())
            }
            Err(error) => {
                warn!(source = %key, range = %range_key, %error, "load failed");
                self.stats.lock().failures += 1;
                self.mark(key, range_key, ResidencyState::Failed);
                Err(FetchError::Load {
                    source_key: key.clone(),
                    range: range_key.clone(),
                    error: Arc::new(error),
                })
            }
        };
        self.in_flight.lock().remove(flight_key);
        outcome
    }

    /// Stores a loaded batch; untagged features take the requested range.
    /// The requested range becomes resident even when the batch is empty.
    ///
    /// Features written while the load was in flight win over loaded ones
    /// with the same id and follow the loaded batch otherwise.
    fn store(
        &self,
        key: &SourceKey,
        range_key: &str,
        range: Option<DataRange>,
        features: Vec<Feature>,
    ) -> u64 {
        let mut buckets: BTreeMap<String, Vec<Feature>> = BTreeMap::new();
        buckets.insert(range_key.to_string(), Vec::new());
        for mut feature in features {
            if feature.range.is_none() {
                feature.range = range;
            }
            buckets.entry(feature.range_key()).or_default().push(feature);
        }

        let mut entries = self.entries.write();
        let entry = entries.entry(key.clone()).or_default();
        for (bucket_key, loaded) in buckets {
            let merged = match entry.ranges.get(&bucket_key) {
                Some(slot) if slot.state.is_resident() => {
                    let mut merged = slot.features.as_ref().clone();
                    upsert(&mut merged, loaded);
                    merged
                }
                Some(slot) => {
                    let mut merged = loaded;
                    upsert(&mut merged, slot.features.iter().cloned());
                    merged
                }
                None => loaded,
            };
            debug!(source = %key, range = %bucket_key, count = merged.len(), "range resident");
            entry.fill(bucket_key, ResidencyState::Resident, merged);
        }
        entry.revision += 1;
        entry.revision
    }

    fn publish(&self, source_key: SourceKey, revision: u64) {
        // No receivers is fine.
        let _ = self.events.send(CacheEvent {
            source_key,
            revision,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::{CacheEvent, FeatureCache, FetchError};
    use crate::loader::MemoryLoader;
    use crate::residency::ResidencyState;
    use crate::source::{DataSource, DataSourceKind};
    use foundation::{DataRange, Feature};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn source() -> DataSource {
        DataSource::url(DataSourceKind::GeoJson, "mem://roads")
    }

    fn ids(features: &[Feature]) -> Vec<&str> {
        features.iter().map(|f| f.id.as_str()).collect()
    }

    #[test]
    fn set_buckets_by_range_and_get_returns_exact_subset() {
        let cache = FeatureCache::new(Arc::new(MemoryLoader::new()));
        let r1 = DataRange::new(0, 0, 1);
        let r2 = DataRange::new(1, 0, 1);
        cache.set(
            &source(),
            vec![
                Feature::new("a").with_range(r1),
                Feature::new("b").with_range(r2),
                Feature::new("c").with_range(r1),
            ],
        );

        assert_eq!(ids(&cache.get(&source(), Some(&r1)).unwrap()), vec!["a", "c"]);
        assert_eq!(ids(&cache.get(&source(), Some(&r2)).unwrap()), vec!["b"]);
        assert!(cache.get(&source(), None).is_none());
        assert_eq!(cache.get_all(&source()).unwrap().len(), 2);
    }

    #[test]
    fn set_replaces_known_ids_and_appends_new_ones() {
        let cache = FeatureCache::new(Arc::new(MemoryLoader::new()));
        cache.set(&source(), vec![Feature::new("a"), Feature::new("b")]);
        cache.set(
            &source(),
            vec![Feature::new("a").with_property("v", 2), Feature::new("c")],
        );
        let all = cache.features(&source());
        assert_eq!(ids(&all), vec!["a", "b", "c"]);
        assert_eq!(all[0].property("v"), Some(&serde_json::json!(2)));
    }

    #[test]
    fn delete_all_rewrites_only_changed_buckets() {
        let cache = FeatureCache::new(Arc::new(MemoryLoader::new()));
        let r1 = DataRange::new(0, 0, 1);
        let r2 = DataRange::new(1, 0, 1);
        cache.set(
            &source(),
            vec![Feature::new("a").with_range(r1), Feature::new("b").with_range(r2)],
        );
        let untouched = cache.get(&source(), Some(&r2)).unwrap();

        let changed = cache.delete_all(&source(), &["a".to_string()]);
        assert_eq!(changed, vec![r1.key()]);
        assert!(cache.get(&source(), Some(&r1)).unwrap().is_empty());
        assert!(Arc::ptr_eq(&untouched, &cache.get(&source(), Some(&r2)).unwrap()));
        assert_eq!(cache.features(&source())[0].range, Some(r2));

        let revision = cache.revision(&source());
        assert!(cache.delete_all(&source(), &["zzz".to_string()]).is_empty());
        assert_eq!(cache.revision(&source()), revision);
    }

    #[tokio::test]
    async fn concurrent_fetches_share_one_load() {
        let loader = Arc::new(MemoryLoader::gated());
        loader.insert(&source(), None, vec![Feature::new("a")]);
        let cache = FeatureCache::new(loader.clone());

        let first = tokio::spawn({
            let cache = cache.clone();
            async move { cache.fetch(&source(), None).await }
        });
        let second = tokio::spawn({
            let cache = cache.clone();
            async move { cache.fetch(&source(), None).await }
        });
        while cache.stats().loads + cache.stats().joined < 2 {
            tokio::task::yield_now().await;
        }
        assert_eq!(cache.state(&source(), None), Some(ResidencyState::Fetching));

        loader.release(1);
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        assert_eq!(loader.calls(), 1);
        assert_eq!(ids(&cache.features(&source())), vec!["a"]);

        cache.fetch(&source(), None).await.unwrap();
        assert_eq!(loader.calls(), 1);
        let stats = cache.stats();
        assert_eq!((stats.loads, stats.joined, stats.hits), (1, 1, 1));
    }

    #[tokio::test]
    async fn failed_loads_clear_the_marker_and_allow_retry() {
        let loader = Arc::new(MemoryLoader::new());
        let range = DataRange::new(3, 4, 5);
        loader.fail(&source(), Some(range), 500);
        let cache = FeatureCache::new(loader.clone());

        let err = cache.fetch(&source(), Some(range)).await.unwrap_err();
        assert!(matches!(err, FetchError::Load { .. }));
        assert_eq!(cache.state(&source(), Some(&range)), Some(ResidencyState::Failed));
        assert!(cache.get(&source(), Some(&range)).is_none());

        loader.clear_failure(&source(), Some(range));
        cache.fetch(&source(), Some(range)).await.unwrap();
        assert_eq!(loader.calls(), 2);
        assert_eq!(cache.state(&source(), Some(&range)), Some(ResidencyState::Resident));
        assert_eq!(cache.stats().failures, 1);
    }

    #[tokio::test]
    async fn empty_loads_are_resident_and_tagged_with_the_range() {
        let loader = Arc::new(MemoryLoader::new());
        let range = DataRange::new(1, 1, 2);
        loader.insert(&source(), Some(range), vec![Feature::new("x")]);
        let cache = FeatureCache::new(loader);

        cache.fetch(&source(), None).await.unwrap();
        assert_eq!(cache.get(&source(), None).unwrap().len(), 0);

        cache.fetch(&source(), Some(range)).await.unwrap();
        assert_eq!(cache.get(&source(), Some(&range)).unwrap()[0].range, Some(range));
    }

    #[tokio::test]
    async fn mutations_publish_revisions() {
        let cache = FeatureCache::new(Arc::new(MemoryLoader::new()));
        let mut events = cache.subscribe();
        cache.set(&source(), vec![Feature::new("a")]);
        cache.delete_all(&source(), &["a".to_string()]);

        assert_eq!(
            events.recv().await.unwrap(),
            CacheEvent {
                source_key: source().key(),
                revision: 1
            }
        );
        assert_eq!(events.recv().await.unwrap().revision, 2);
        assert_eq!(cache.revision(&source()), 2);
    }

    #[tokio::test]
    async fn writes_during_a_load_merge_over_the_loaded_batch() {
        let loader = Arc::new(MemoryLoader::gated());
        loader.insert(
            &source(),
            None,
            vec![Feature::new("a"), Feature::new("b").with_property("v", 1)],
        );
        let cache = FeatureCache::new(loader.clone());

        let load = tokio::spawn({
            let cache = cache.clone();
            async move { cache.fetch(&source(), None).await }
        });
        while loader.calls() == 0 {
            tokio::task::yield_now().await;
        }
        cache.set(
            &source(),
            vec![Feature::new("c"), Feature::new("b").with_property("v", 2)],
        );
        assert_eq!(cache.state(&source(), None), Some(ResidencyState::Fetching));
        assert!(cache.get(&source(), None).is_none());

        loader.release(1);
        load.await.unwrap().unwrap();

        let all = cache.features(&source());
        assert_eq!(ids(&all), vec!["a", "b", "c"]);
        assert_eq!(all[1].property("v"), Some(&serde_json::json!(2)));
        assert_eq!(cache.state(&source(), None), Some(ResidencyState::Resident));
    }

    #[tokio::test]
    async fn batches_keep_arrival_order() {
        let loader = Arc::new(MemoryLoader::new());
        let late = DataRange::new(0, 0, 1);
        let early = DataRange::new(1, 2, 3);
        loader.insert(&source(), Some(early), vec![Feature::new("a")]);
        loader.insert(&source(), Some(late), vec![Feature::new("t")]);
        let cache = FeatureCache::new(loader);

        cache.fetch(&source(), None).await.unwrap();
        cache.fetch(&source(), Some(early)).await.unwrap();
        cache.fetch(&source(), Some(late)).await.unwrap();
        cache.set(&source(), vec![Feature::new("b")]);

        assert_eq!(ids(&cache.features(&source())), vec!["a", "t", "b"]);
    }

    #[tokio::test]
    async fn loads_outlive_dropped_requesters() {
        let loader = Arc::new(MemoryLoader::gated());
        loader.insert(&source(), None, vec![Feature::new("a")]);
        let cache = FeatureCache::new(loader.clone());
        let mut events = cache.subscribe();

        let requester = tokio::spawn({
            let cache = cache.clone();
            async move { cache.fetch(&source(), None).await }
        });
        while loader.calls() == 0 {
            tokio::task::yield_now().await;
        }
        requester.abort();
        loader.release(1);

        assert_eq!(events.recv().await.unwrap().revision, 1);
        assert_eq!(ids(&cache.features(&source())), vec!["a"]);
    }
}
