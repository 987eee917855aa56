use std::sync::Arc;

use foundation::{DataRange, Feature};
use layers::{ComputedLayer, Layer};
use runtime::{DiagnosticKind, Diagnostics};
use serde_json::Value;
use streaming::{CacheEvent, FeatureCache};
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::command::Command;
use crate::config::EngineConfig;
use crate::engine::{FetchOutcome, LayerEngine, run_fetch};
use crate::pool::EvaluationPool;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
#[error("layer engine has shut down")]
pub struct EngineClosed;

#[derive(Debug)]
enum Request {
    Command(Command),
    Flush(oneshot::Sender<()>),
}

/// Owner of one layer engine running as a tokio task.
///
/// Snapshots are published on a `watch` channel. Dropping the handle stops
/// the task; loads it already started still land in the shared cache.
#[derive(Debug)]
pub struct LayerHandle {
    requests: mpsc::UnboundedSender<Request>,
    snapshots: watch::Receiver<Option<ComputedLayer>>,
    task: JoinHandle<()>,
}

impl LayerHandle {
    /// Starts an idle engine. Must be called inside a tokio runtime.
    pub fn spawn(
        cache: FeatureCache,
        pool: Arc<EvaluationPool>,
        config: &EngineConfig,
        diagnostics: Diagnostics,
    ) -> Self {
        let events = cache.subscribe();
        let engine = LayerEngine::new(cache, pool, config, diagnostics.clone());
        let (requests, request_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshots) = watch::channel(None);
        let (done_tx, done_rx) = mpsc::unbounded_channel();

        let actor = Actor {
            engine,
            diagnostics,
            snapshots: snapshot_tx,
            done_tx,
            waiters: Vec::new(),
        };
        let task = tokio::spawn(actor.run(request_rx, events, done_rx));
        Self {
            requests,
            snapshots,
            task,
        }
    }

    pub fn send(&self, command: Command) -> Result<(), EngineClosed> {
        self.requests
            .send(Request::Command(command))
            .map_err(|_| EngineClosed)
    }

    pub fn set_layer(&self, layer: Option<Layer>) -> Result<(), EngineClosed> {
        self.send(Command::SetLayer(layer))
    }

    pub fn request_fetch(&self, range: DataRange) -> Result<(), EngineClosed> {
        self.send(Command::RequestFetch(range))
    }

    pub fn write_features(&self, features: Vec<Feature>) -> Result<(), EngineClosed> {
        self.send(Command::WriteFeatures(features))
    }

    pub fn delete_features(&self, ids: Vec<String>) -> Result<(), EngineClosed> {
        self.send(Command::DeleteFeatures(ids))
    }

    pub fn override_appearance(&self, patch: Option<Value>) -> Result<(), EngineClosed> {
        self.send(Command::Override(patch))
    }

    pub fn callbacks(&self) -> RendererCallbacks {
        RendererCallbacks {
            requests: self.requests.clone(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<ComputedLayer>> {
        self.snapshots.clone()
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> Option<ComputedLayer> {
        self.snapshots.borrow().clone()
    }

    /// Waits until every command sent so far is applied, outstanding loads
    /// have finished and the result is published.
    pub async fn flush(&self) -> Result<Option<ComputedLayer>, EngineClosed> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(Request::Flush(tx))
            .map_err(|_| EngineClosed)?;
        rx.await.map_err(|_| EngineClosed)?;
        Ok(self.snapshot())
    }
}

impl Drop for LayerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Hooks a renderer uses to drive paging and local edits.
#[derive(Debug, Clone)]
pub struct RendererCallbacks {
    requests: mpsc::UnboundedSender<Request>,
}

impl RendererCallbacks {
    fn send(&self, command: Command) -> Result<(), EngineClosed> {
        self.requests
            .send(Request::Command(command))
            .map_err(|_| EngineClosed)
    }

    pub fn on_feature_request(&self, range: DataRange) -> Result<(), EngineClosed> {
        self.send(Command::RequestFetch(range))
    }

    pub fn on_feature_fetch(&self, features: Vec<Feature>) -> Result<(), EngineClosed> {
        self.send(Command::WriteFeatures(features))
    }

    pub fn on_feature_delete(&self, ids: Vec<String>) -> Result<(), EngineClosed> {
        self.send(Command::DeleteFeatures(ids))
    }
}

struct Actor {
    engine: LayerEngine,
    diagnostics: Diagnostics,
    snapshots: watch::Sender<Option<ComputedLayer>>,
    done_tx: mpsc::UnboundedSender<FetchOutcome>,
    waiters: Vec<oneshot::Sender<()>>,
}

impl Actor {
    async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<Request>,
        mut events: broadcast::Receiver<CacheEvent>,
        mut done: mpsc::UnboundedReceiver<FetchOutcome>,
    ) {
        loop {
            tokio::select! {
                request = requests.recv() => {
                    let Some(request) = request else {
                        break;
                    };
                    self.accept(request).await;
                    while let Ok(request) = requests.try_recv() {
                        self.accept(request).await;
                    }
                }
                event = events.recv() => match event {
                    Ok(event) => {
                        if self.engine.is_stale(&event) {
                            self.push(Command::Refresh).await;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "cache events lagged");
                        self.push(Command::Refresh).await;
                    }
                    Err(RecvError::Closed) => break,
                },
                Some(outcome) = done.recv() => self.engine.fetch_finished(outcome),
            }
            self.step().await;
            if self.engine.is_settled() {
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(());
                }
            }
        }
        debug!(engine = ?self.engine, "layer engine stopped");
    }

    async fn accept(&mut self, request: Request) {
        match request {
            Request::Command(command) => self.push(command).await,
            Request::Flush(waiter) => self.waiters.push(waiter),
        }
    }

    /// Queues `command`, applying what is pending first when the queue is full.
    async fn push(&mut self, command: Command) {
        if self.engine.is_full() {
            self.step().await;
        }
        if let Err(err) = self.engine.enqueue(command) {
            warn!(%err, "command dropped");
            self.diagnostics.report(
                DiagnosticKind::Command,
                self.engine.layer().map(Layer::id),
                err.to_string(),
            );
        }
    }

    async fn step(&mut self) {
        let step = self.engine.run_pending().await;
        for request in step.fetches {
            let cache = self.engine.cache().clone();
            let done = self.done_tx.clone();
            tokio::spawn(async move {
                let outcome = run_fetch(cache, request).await;
                let _ = done.send(outcome);
            });
        }
        if step.changed {
            self.snapshots.send_replace(self.engine.snapshot().cloned());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{EngineClosed, LayerHandle};
    use crate::config::EngineConfig;
    use crate::pool::EvaluationPool;
    use foundation::{DataRange, Feature};
    use layers::{LayerStatus, SimpleLayer};
    use pretty_assertions::assert_eq;
    use runtime::Diagnostics;
    use serde_json::json;
    use std::sync::Arc;
    use streaming::{DataSource, DataSourceKind, FeatureCache, MemoryLoader};

    fn source() -> DataSource {
        DataSource::url(DataSourceKind::GeoJson, "https://example.com/a.geojson")
    }

    fn spawn(cache: FeatureCache) -> LayerHandle {
        let config = EngineConfig {
            workers: Some(1),
            ..EngineConfig::default()
        };
        let pool = Arc::new(EvaluationPool::new(&config, Diagnostics::default()).unwrap());
        LayerHandle::spawn(cache, pool, &config, Diagnostics::default())
    }

    fn ids(handle: &LayerHandle) -> Vec<String> {
        handle
            .snapshot()
            .map(|s| s.features.iter().map(|f| f.id().to_string()).collect())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn publishes_fetching_then_ready() {
        let loader = Arc::new(MemoryLoader::gated());
        loader.insert(&source(), None, vec![Feature::new("a")]);
        let handle = spawn(FeatureCache::new(loader.clone()));
        let mut snapshots = handle.subscribe();

        handle
            .set_layer(Some(SimpleLayer::new("xxx").with_data(source()).into()))
            .unwrap();
        let first = snapshots.wait_for(Option::is_some).await.unwrap().clone().unwrap();
        assert_eq!(first.status, LayerStatus::Fetching);
        assert!(first.features.is_empty());

        loader.release(1);
        let ready = handle.flush().await.unwrap().unwrap();
        assert_eq!(ready.status, LayerStatus::Ready);
        assert_eq!(ready.original_features, vec![Feature::new("a")]);
        assert_eq!(ids(&handle), vec!["a"]);
    }

    #[tokio::test]
    async fn renderer_callbacks_feed_the_engine() {
        let loader = Arc::new(MemoryLoader::new());
        loader.insert(&source(), None, vec![Feature::new("a")]);
        let range = DataRange::new(0, 0, 2);
        loader.insert(&source(), Some(range), vec![Feature::new("tile")]);
        let handle = spawn(FeatureCache::new(loader.clone()));
        handle
            .set_layer(Some(SimpleLayer::new("xxx").with_data(source()).into()))
            .unwrap();
        handle.flush().await.unwrap();

        let callbacks = handle.callbacks();
        callbacks.on_feature_request(range).unwrap();
        callbacks.on_feature_fetch(vec![Feature::new("b")]).unwrap();
        handle.flush().await.unwrap();
        assert_eq!(ids(&handle), vec!["a", "b", "tile"]);
        assert!(loader.was_requested(&source(), Some(range)));

        callbacks.on_feature_delete(vec!["b".into()]).unwrap();
        handle.flush().await.unwrap();
        assert_eq!(ids(&handle), vec!["a", "tile"]);
    }

    #[tokio::test]
    async fn two_layers_share_one_load() {
        let loader = Arc::new(MemoryLoader::gated());
        loader.insert(&source(), None, vec![Feature::new("a")]);
        let cache = FeatureCache::new(loader.clone());
        let first = spawn(cache.clone());
        let second = spawn(cache);

        for (handle, id) in [(&first, "one"), (&second, "two")] {
            handle
                .set_layer(Some(SimpleLayer::new(id).with_data(source()).into()))
                .unwrap();
        }
        loader.release(1);
        first.flush().await.unwrap();
        second.flush().await.unwrap();

        assert_eq!(loader.calls(), 1);
        assert_eq!(ids(&first), vec!["a"]);
        assert_eq!(ids(&second), vec!["a"]);
    }

    #[tokio::test]
    async fn edits_from_another_layer_propagate() {
        let loader = Arc::new(MemoryLoader::new());
        let cache = FeatureCache::new(loader);
        let writer = spawn(cache.clone());
        let reader = spawn(cache.clone());
        for handle in [&writer, &reader] {
            handle
                .set_layer(Some(SimpleLayer::new("l").with_data(source()).into()))
                .unwrap();
            handle.flush().await.unwrap();
        }

        writer.write_features(vec![Feature::new("new")]).unwrap();
        writer.flush().await.unwrap();
        let mut snapshots = reader.subscribe();
        let seen = snapshots
            .wait_for(|s| s.as_ref().is_some_and(|s| s.features.len() == 1))
            .await
            .unwrap()
            .clone()
            .unwrap();
        assert_eq!(seen.features[0].id(), "new");
    }

    #[tokio::test]
    async fn overrides_round_trip_through_the_handle() {
        let handle = spawn(FeatureCache::new(Arc::new(MemoryLoader::new())));
        handle
            .set_layer(Some(SimpleLayer::new("plain").into()))
            .unwrap();
        let before = handle.flush().await.unwrap();
        handle
            .override_appearance(Some(json!({ "marker": { "pointColor": "red" } })))
            .unwrap();
        handle.override_appearance(None).unwrap();
        assert_eq!(handle.flush().await.unwrap(), before);
    }

    #[tokio::test]
    async fn callbacks_fail_once_the_handle_is_gone() {
        let handle = spawn(FeatureCache::new(Arc::new(MemoryLoader::new())));
        let callbacks = handle.callbacks();
        drop(handle);
        let mut result = Ok(());
        for _ in 0..100 {
            tokio::task::yield_now().await;
            result = callbacks.on_feature_delete(vec![]);
            if result.is_err() {
                break;
            }
        }
        assert_eq!(result, Err(EngineClosed));
    }
}
