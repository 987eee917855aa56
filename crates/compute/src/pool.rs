use std::sync::Arc;

use foundation::{Feature, TimeInterval};
use layers::{AppearanceResolver, ComputedFeature, ResolvedAppearance, SimpleLayer};
use runtime::{DiagnosticKind, Diagnostics, PoolClosed, WorkerPool, catch_panic};
use tokio::sync::oneshot;
use tracing::debug;

use crate::config::EngineConfig;

/// Persistent evaluation threads, each with its own resolver and cache.
pub struct EvaluationPool {
    workers: WorkerPool<AppearanceResolver>,
}

impl EvaluationPool {
    pub fn new(config: &EngineConfig, diagnostics: Diagnostics) -> std::io::Result<Self> {
        let capacity = config.evaluation_cache_capacity;
        let workers = WorkerPool::new(config.worker_count(), move |_| {
            AppearanceResolver::new(capacity, diagnostics.clone())
        })?;
        Ok(Self { workers })
    }

    pub fn size(&self) -> usize {
        self.workers.size()
    }

    /// Resolves `features` in `ceil(n / workers)` sized chunks and returns
    /// the results in input order.
    pub async fn evaluate(
        &self,
        layer: Arc<SimpleLayer>,
        features: Arc<Vec<Feature>>,
        intervals: Option<Arc<Vec<Option<TimeInterval>>>>,
    ) -> Result<Vec<ComputedFeature>, PoolClosed> {
        if features.is_empty() {
            return Ok(Vec::new());
        }
        let chunk = features.len().div_ceil(self.size());
        let mut replies = Vec::new();
        for start in (0..features.len()).step_by(chunk) {
            let end = (start + chunk).min(features.len());
            let (tx, rx) = oneshot::channel();
            let layer = Arc::clone(&layer);
            let features = Arc::clone(&features);
            let intervals = intervals.clone();
            self.workers.execute(move |resolver: &mut AppearanceResolver| {
                let computed: Vec<ComputedFeature> = (start..end)
                    .map(|i| {
                        let interval = intervals.as_ref().and_then(|all| all.get(i).copied().flatten());
                        compute_guarded(resolver, &layer, &features[i], interval)
                    })
                    .collect();
                let _ = tx.send(computed);
            })?;
            replies.push(rx);
        }
        debug!(layer = %layer.id, features = features.len(), chunks = replies.len(), "evaluating");

        let mut out = Vec::with_capacity(features.len());
        for reply in replies {
            out.extend(reply.await.map_err(|_| PoolClosed)?);
        }
        Ok(out)
    }
}

/// Evaluates one feature; a panic leaves it without appearance and is
/// reported instead of reaching the worker.
fn compute_guarded(
    resolver: &mut AppearanceResolver,
    layer: &SimpleLayer,
    feature: &Feature,
    interval: Option<TimeInterval>,
) -> ComputedFeature {
    match catch_panic(|| resolver.compute_feature(layer, feature, interval)) {
        Ok(computed) => computed,
        Err(message) => {
            resolver.diagnostics().report(
                DiagnosticKind::Eval,
                Some(&layer.id),
                format!("evaluating feature {} panicked: {message}", feature.id),
            );
            ComputedFeature {
                feature: feature.clone(),
                appearance: ResolvedAppearance::new(),
                interval,
            }
        }
    }
}

impl std::fmt::Debug for EvaluationPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationPool")
            .field("size", &self.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::EvaluationPool;
    use crate::config::EngineConfig;
    use foundation::Feature;
    use layers::{Appearance, AppearanceKind, SimpleLayer, StyleValue};
    use pretty_assertions::assert_eq;
    use runtime::Diagnostics;
    use serde_json::json;
    use std::sync::Arc;

    fn pool(workers: usize) -> EvaluationPool {
        let config = EngineConfig {
            workers: Some(workers),
            ..EngineConfig::default()
        };
        EvaluationPool::new(&config, Diagnostics::default()).unwrap()
    }

    #[tokio::test]
    async fn results_keep_input_order() {
        let layer = Arc::new(SimpleLayer::new("l").with_appearance(Appearance::new().with(
            AppearanceKind::Marker,
            "double",
            StyleValue::text("${n} * 2"),
        )));
        let features: Vec<Feature> = (0..10)
            .map(|n| Feature::new(format!("f{n}")).with_property("n", n))
            .collect();

        let computed = pool(3)
            .evaluate(layer, Arc::new(features), None)
            .await
            .unwrap();

        let ids: Vec<&str> = computed.iter().map(|c| c.id()).collect();
        assert_eq!(ids, (0..10).map(|n| format!("f{n}")).collect::<Vec<_>>());
        assert_eq!(
            computed[7].property(AppearanceKind::Marker, "double"),
            Some(&json!(14))
        );
    }

    #[tokio::test]
    async fn extreme_json_path_slices_evaluate_every_feature() {
        let layer = Arc::new(SimpleLayer::new("l").with_appearance(Appearance::new().with(
            AppearanceKind::Marker,
            "picked",
            StyleValue::text("${$.a[1::9223372036854775807]}"),
        )));
        let features: Vec<Feature> = (0..4)
            .map(|n| Feature::new(format!("f{n}")).with_property("a", json!([n, n + 1, n + 2])))
            .collect();

        let pool = pool(2);
        let computed = pool.evaluate(Arc::clone(&layer), Arc::new(features), None).await.unwrap();
        assert_eq!(computed.len(), 4);
        assert_eq!(computed[3].property(AppearanceKind::Marker, "picked"), Some(&json!(4)));

        // The workers are still there for the next batch.
        let again = pool
            .evaluate(layer, Arc::new(vec![Feature::new("x").with_property("a", json!([0, 9]))]), None)
            .await
            .unwrap();
        assert_eq!(again[0].property(AppearanceKind::Marker, "picked"), Some(&json!(9)));
    }

    #[tokio::test]
    async fn empty_batches_skip_the_workers() {
        let computed = pool(2)
            .evaluate(Arc::new(SimpleLayer::new("l")), Arc::new(Vec::new()), None)
            .await
            .unwrap();
        assert!(computed.is_empty());
    }
}
