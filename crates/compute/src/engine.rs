use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use foundation::{DataRange, Feature};
use layers::{
    AppearanceOverrides, AppearanceResolver, ComputedFeature, ComputedLayer, Layer, LayerStatus,
    ResolvedAppearance, SimpleLayer, time_intervals,
};
use runtime::{DiagnosticKind, Diagnostics};
use streaming::{CacheEvent, DataSource, FeatureCache, FetchError, SourceKey};
use tracing::{debug, info};

use crate::command::Command;
use crate::config::EngineConfig;
use crate::pool::EvaluationPool;
use crate::queue::{CommandQueue, CommandQueueFull};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EngineStatus {
    /// No layer set.
    Idle,
    /// Some required range is not resident yet, or evaluation is pending.
    Fetching,
    Ready,
}

/// A load the driver should start on the engine's behalf.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub source: DataSource,
    pub range: Option<DataRange>,
}

#[derive(Debug)]
pub struct FetchOutcome {
    pub source_key: SourceKey,
    pub range: Option<DataRange>,
    pub result: Result<(), FetchError>,
}

/// Runs `request` against the shared cache.
pub async fn run_fetch(cache: FeatureCache, request: FetchRequest) -> FetchOutcome {
    let result = cache.fetch(&request.source, request.range).await;
    FetchOutcome {
        source_key: request.source.key(),
        range: request.range,
        result,
    }
}

/// What one `run_pending` pass produced.
#[derive(Debug, Default)]
pub struct Step {
    pub fetches: Vec<FetchRequest>,
    /// The published snapshot differs from the previous one.
    pub changed: bool,
}

/// Per-layer computation state machine.
///
/// Commands are queued and applied strictly in arrival order. The engine
/// never awaits a load itself: it hands out [`FetchRequest`]s and is told
/// about their outcome through [`LayerEngine::fetch_finished`].
pub struct LayerEngine {
    cache: FeatureCache,
    pool: Arc<EvaluationPool>,
    diagnostics: Diagnostics,
    queue: CommandQueue,
    layer: Option<Layer>,
    simple: Option<Arc<SimpleLayer>>,
    layer_resolver: AppearanceResolver,
    status: EngineStatus,
    overrides: AppearanceOverrides,
    original: Vec<Feature>,
    evaluated: Vec<ComputedFeature>,
    layer_appearance: Option<ResolvedAppearance>,
    /// Ranges the current definition needs, by range key.
    required: BTreeMap<String, Option<DataRange>>,
    failed: BTreeSet<String>,
    in_flight: BTreeSet<(SourceKey, String)>,
    seen_revision: Option<u64>,
    dirty: bool,
    snapshot: Option<ComputedLayer>,
}

impl LayerEngine {
    pub fn new(
        cache: FeatureCache,
        pool: Arc<EvaluationPool>,
        config: &EngineConfig,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            cache,
            pool,
            layer_resolver: AppearanceResolver::new(
                config.evaluation_cache_capacity,
                diagnostics.clone(),
            ),
            diagnostics,
            queue: CommandQueue::new(config.max_pending_commands),
            layer: None,
            simple: None,
            status: EngineStatus::Idle,
            overrides: AppearanceOverrides::default(),
            original: Vec::new(),
            evaluated: Vec::new(),
            layer_appearance: None,
            required: BTreeMap::new(),
            failed: BTreeSet::new(),
            in_flight: BTreeSet::new(),
            seen_revision: None,
            dirty: false,
            snapshot: None,
        }
    }

    pub fn cache(&self) -> &FeatureCache {
        &self.cache
    }

    pub fn status(&self) -> EngineStatus {
        self.status
    }

    pub fn layer(&self) -> Option<&Layer> {
        self.layer.as_ref()
    }

    pub fn source(&self) -> Option<&DataSource> {
        self.layer.as_ref().and_then(Layer::data)
    }

    /// Last published view; `None` while idle.
    pub fn snapshot(&self) -> Option<&ComputedLayer> {
        self.snapshot.as_ref()
    }

    pub fn failed_ranges(&self) -> impl Iterator<Item = &str> {
        self.failed.iter().map(String::as_str)
    }

    pub fn enqueue(&mut self, command: Command) -> Result<(), CommandQueueFull> {
        self.queue.push(command).map(|_| ())
    }

    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }

    /// No queued commands, no loads outstanding, nothing left to evaluate.
    pub fn is_settled(&self) -> bool {
        self.queue.is_empty() && self.in_flight.is_empty() && !self.dirty
    }

    /// Whether `event` carries data this engine has not evaluated yet.
    pub fn is_stale(&self, event: &CacheEvent) -> bool {
        let Some(source) = self.source() else {
            return false;
        };
        source.key() == event.source_key
            && self.seen_revision.is_none_or(|seen| event.revision > seen)
    }

    pub fn fetch_finished(&mut self, outcome: FetchOutcome) {
        let range_key = DataRange::key_of(outcome.range.as_ref());
        self.in_flight
            .remove(&(outcome.source_key.clone(), range_key.clone()));
        if self.source().is_none_or(|s| s.key() != outcome.source_key) {
            debug!(source = %outcome.source_key, "ignoring fetch for a previous source");
            return;
        }
        match outcome.result {
            Ok(()) => {
                self.failed.remove(&range_key);
            }
            Err(err) => {
                self.failed.insert(range_key);
                self.diagnostics
                    .report(DiagnosticKind::Fetch, self.layer_id(), err.to_string());
            }
        }
        self.dirty = true;
    }

    /// Applies every queued command, re-evaluates if needed and publishes.
    pub async fn run_pending(&mut self) -> Step {
        let mut step = Step::default();
        let mut republish = false;
        while let Some(command) = self.queue.pop_next() {
            debug!(layer = self.layer_id().unwrap_or("-"), command = command.name(), "applying");
            republish |= self.apply(command, &mut step.fetches);
        }
        if self.dirty {
            self.recompute().await;
            republish = true;
        }
        if republish {
            step.changed = self.publish();
        }
        step
    }

    /// Drives the engine on the current task until nothing is pending,
    /// awaiting each load in turn.
    pub async fn settle(&mut self) {
        loop {
            let step = self.run_pending().await;
            if step.fetches.is_empty() && self.is_settled() {
                return;
            }
            for request in step.fetches {
                let outcome = run_fetch(self.cache.clone(), request).await;
                self.fetch_finished(outcome);
            }
        }
    }

    fn layer_id(&self) -> Option<&str> {
        self.layer.as_ref().map(Layer::id)
    }

    fn apply(&mut self, command: Command, fetches: &mut Vec<FetchRequest>) -> bool {
        match command {
            Command::SetLayer(None) => {
                self.layer = None;
                self.simple = None;
                self.reset_source();
                self.original.clear();
                self.evaluated.clear();
                self.layer_appearance = None;
                self.dirty = false;
                true
            }
            Command::SetLayer(Some(layer)) => {
                let same_source =
                    self.source().map(DataSource::key) == layer.data().map(DataSource::key);
                self.simple = layer.as_simple().cloned().map(Arc::new);
                self.layer = Some(layer);
                if !same_source {
                    self.reset_source();
                }
                self.request_all(fetches);
                self.dirty = true;
                true
            }
            Command::RequestFetch(range) => {
                if !self.has_source("requestFetch") {
                    return false;
                }
                self.request(Some(range), fetches);
                true
            }
            Command::WriteFeatures(features) => {
                let Some(source) = self.source().cloned() else {
                    self.has_source("writeFeatures");
                    return false;
                };
                self.cache.set(&source, features);
                self.dirty = true;
                true
            }
            Command::DeleteFeatures(ids) => {
                let Some(source) = self.source().cloned() else {
                    self.has_source("deleteFeatures");
                    return false;
                };
                if !self.cache.delete_all(&source, &ids).is_empty() {
                    self.dirty = true;
                }
                self.dirty
            }
            Command::Override(patch) => {
                self.overrides = patch
                    .as_ref()
                    .map(AppearanceOverrides::from_json)
                    .unwrap_or_default();
                self.layer.is_some()
            }
            Command::Refresh => {
                if self.layer.is_some() {
                    self.dirty = true;
                }
                self.dirty
            }
        }
    }

    fn has_source(&self, command: &str) -> bool {
        if self.source().is_some() {
            return true;
        }
        self.diagnostics.report(
            DiagnosticKind::Command,
            self.layer_id(),
            format!("{command} ignored: layer has no data source"),
        );
        false
    }

    fn reset_source(&mut self) {
        self.required.clear();
        self.failed.clear();
        self.seen_revision = None;
    }

    /// Everything fetched so far, or one unranged load when nothing is.
    fn request_all(&mut self, fetches: &mut Vec<FetchRequest>) {
        let Some(source) = self.source() else {
            return;
        };
        if self.cache.get_all(source).is_none() {
            self.request(None, fetches);
        }
    }

    fn request(&mut self, range: Option<DataRange>, fetches: &mut Vec<FetchRequest>) {
        let Some(source) = self.source().cloned() else {
            return;
        };
        let range_key = DataRange::key_of(range.as_ref());
        self.required.insert(range_key.clone(), range);
        if self
            .cache
            .state(&source, range.as_ref())
            .is_some_and(|state| state.is_resident())
        {
            return;
        }
        if self.in_flight.insert((source.key(), range_key)) {
            fetches.push(FetchRequest { source, range });
        }
    }

    async fn recompute(&mut self) {
        self.dirty = false;
        let Some(layer) = self.simple.clone() else {
            self.original.clear();
            self.evaluated.clear();
            self.layer_appearance = None;
            return;
        };
        self.layer_appearance = self.layer_resolver.resolve_layer(&layer);

        let features = match &layer.data {
            Some(source) => {
                self.seen_revision = Some(self.cache.revision(source));
                self.cache.features(source)
            }
            None => Vec::new(),
        };
        let time = layer.data.as_ref().and_then(|data| data.time.as_ref());
        let intervals = time_intervals(&features, time).map(Arc::new);
        let features = Arc::new(features);

        match self
            .pool
            .evaluate(Arc::clone(&layer), Arc::clone(&features), intervals)
            .await
        {
            Ok(computed) => self.evaluated = computed,
            Err(err) => {
                self.diagnostics.report(
                    DiagnosticKind::Command,
                    Some(&layer.id),
                    format!("evaluation skipped: {err}"),
                );
            }
        }
        self.original = Arc::unwrap_or_clone(features);
    }

    fn current_status(&self) -> EngineStatus {
        if self.layer.is_none() {
            return EngineStatus::Idle;
        }
        let Some(source) = self.source() else {
            return EngineStatus::Ready;
        };
        let key = source.key();
        let waiting = self.required.iter().any(|(range_key, range)| {
            self.in_flight.contains(&(key.clone(), range_key.clone()))
                || !self
                    .cache
                    .state(source, range.as_ref())
                    .is_some_and(|state| state.is_resident())
        });
        if waiting || self.dirty {
            EngineStatus::Fetching
        } else {
            EngineStatus::Ready
        }
    }

    fn publish(&mut self) -> bool {
        let status = self.current_status();
        if status != self.status {
            info!(layer = self.layer_id().unwrap_or("-"), ?status, "layer status");
        }
        self.status = status;

        let snapshot = self.layer.as_ref().map(|layer| ComputedLayer {
            id: layer.id().to_string(),
            layer: layer.clone(),
            status: match status {
                EngineStatus::Ready => LayerStatus::Ready,
                EngineStatus::Idle | EngineStatus::Fetching => LayerStatus::Fetching,
            },
            original_features: self.original.clone(),
            features: if self.overrides.is_empty() {
                self.evaluated.clone()
            } else {
                self.evaluated
                    .iter()
                    .map(|f| self.overrides.apply_to(f))
                    .collect()
            },
            appearance: self.layer_appearance.clone(),
        });
        let changed = snapshot != self.snapshot;
        self.snapshot = snapshot;
        changed
    }
}

impl std::fmt::Debug for LayerEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerEngine")
            .field("layer", &self.layer_id())
            .field("status", &self.status)
            .field("pending", &self.queue.len())
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}
