use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use layers::{ComputedLayer, Layer, SimpleLayer};
use runtime::{DiagnosticKind, Diagnostics};
use streaming::FeatureCache;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::handle::{EngineClosed, LayerHandle};
use crate::pool::EvaluationPool;

struct Entry {
    handle: LayerHandle,
    layer: SimpleLayer,
}

/// One engine per simple layer of the tree, all sharing a cache and an
/// evaluation pool.
pub struct ComputeRegistry {
    cache: FeatureCache,
    pool: Arc<EvaluationPool>,
    config: EngineConfig,
    diagnostics: Diagnostics,
    entries: BTreeMap<String, Entry>,
}

impl ComputeRegistry {
    pub fn new(cache: FeatureCache, config: EngineConfig) -> std::io::Result<Self> {
        let diagnostics = Diagnostics::new(config.diagnostics_capacity);
        let pool = Arc::new(EvaluationPool::new(&config, diagnostics.clone())?);
        info!(workers = pool.size(), "compute registry ready");
        Ok(Self {
            cache,
            pool,
            config,
            diagnostics,
            entries: BTreeMap::new(),
        })
    }

    pub fn cache(&self) -> &FeatureCache {
        &self.cache
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Brings the engines in line with the simple layers under `roots`.
    ///
    /// New ids get an engine, changed definitions are re-sent, and engines
    /// whose layer disappeared are dropped. Must run inside a tokio runtime.
    pub fn sync(&mut self, roots: &[Layer]) -> Result<(), EngineClosed> {
        let mut seen = BTreeSet::new();
        for leaf in roots.iter().flat_map(Layer::leaves) {
            if !seen.insert(leaf.id.clone()) {
                self.diagnostics.report(
                    DiagnosticKind::Command,
                    Some(&leaf.id),
                    "duplicate layer id; keeping the first definition",
                );
                continue;
            }
            match self.entries.get_mut(&leaf.id) {
                Some(entry) if entry.layer == *leaf => {}
                Some(entry) => {
                    entry.handle.set_layer(Some(leaf.clone().into()))?;
                    entry.layer = leaf.clone();
                }
                None => {
                    let handle = LayerHandle::spawn(
                        self.cache.clone(),
                        Arc::clone(&self.pool),
                        &self.config,
                        self.diagnostics.clone(),
                    );
                    handle.set_layer(Some(leaf.clone().into()))?;
                    debug!(layer = %leaf.id, "engine created");
                    self.entries.insert(
                        leaf.id.clone(),
                        Entry {
                            handle,
                            layer: leaf.clone(),
                        },
                    );
                }
            }
        }

        let removed: Vec<String> = self
            .entries
            .keys()
            .filter(|id| !seen.contains(*id))
            .cloned()
            .collect();
        for id in removed {
            self.remove(&id);
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&LayerHandle> {
        self.entries.get(id).map(|entry| &entry.handle)
    }

    /// Drops the engine for `id`; cached data stays for other layers.
    pub fn remove(&mut self, id: &str) -> bool {
        let removed = self.entries.remove(id).is_some();
        if removed {
            debug!(layer = id, "engine destroyed");
        }
        removed
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Latest snapshot of every engine that has published one.
    pub fn snapshots(&self) -> BTreeMap<String, ComputedLayer> {
        self.entries
            .iter()
            .filter_map(|(id, entry)| Some((id.clone(), entry.handle.snapshot()?)))
            .collect()
    }

    /// Flushes every engine and returns their snapshots.
    pub async fn settle(&self) -> Result<BTreeMap<String, ComputedLayer>, EngineClosed> {
        for entry in self.entries.values() {
            entry.handle.flush().await?;
        }
        Ok(self.snapshots())
    }
}

impl std::fmt::Debug for ComputeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeRegistry")
            .field("layers", &self.entries.keys().collect::<Vec<_>>())
            .field("pool", &self.pool)
            .finish()
    }
}
