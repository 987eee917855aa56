use std::env;

use layers::EvaluationCache;
use runtime::{Diagnostics, WorkerPool};
use serde::{Deserialize, Serialize};

/// Tuning knobs for the compute engines of one application instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Entries per worker evaluation cache.
    pub evaluation_cache_capacity: usize,
    /// Evaluation threads; `None` uses the available hardware concurrency.
    pub workers: Option<usize>,
    pub max_pending_commands: usize,
    pub diagnostics_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            evaluation_cache_capacity: EvaluationCache::DEFAULT_CAPACITY,
            workers: None,
            max_pending_commands: 256,
            diagnostics_capacity: Diagnostics::DEFAULT_CAPACITY,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `STRATA_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().with_env(|key| env::var(key).ok())
    }

    /// Applies overrides looked up through `var`; unparsable values are ignored.
    pub fn with_env(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        let usize_var = |key: &str| var(key).and_then(|v| v.trim().parse::<usize>().ok());

        if let Some(capacity) = usize_var("STRATA_EVAL_CACHE_CAPACITY") {
            self.evaluation_cache_capacity = capacity;
        }
        if let Some(workers) = usize_var("STRATA_WORKERS") {
            self.workers = Some(workers);
        }
        if let Some(max) = usize_var("STRATA_MAX_PENDING_COMMANDS") {
            self.max_pending_commands = max;
        }
        if let Some(capacity) = usize_var("STRATA_DIAGNOSTICS_CAPACITY") {
            self.diagnostics_capacity = capacity;
        }
        self
    }

    pub fn worker_count(&self) -> usize {
        self.workers
            .filter(|n| *n > 0)
            .unwrap_or_else(WorkerPool::<()>::default_size)
    }
}
