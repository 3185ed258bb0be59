//! Candidate generators (C5): four independent algorithms, each producing
//! a `Vec<AlgorithmResult>` for one user. Every generator consults C10 first
//! with a fingerprint of its own key inputs plus the model version, and
//! caches its result list on miss, per §4.5's closing paragraph.
//!
//! The orchestrator (C6) is the one that applies the per-request deadline —
//! it wraps each generator's `generate` call in `tokio::time::timeout`, the
//! same semaphore-bounded + per-task-timeout shape the teacher's
//! `DAGExecutor::execute_batch` uses for fanning out agents.

pub mod collaborative;
pub mod graph_signal;
pub mod pagerank;
pub mod popularity;
pub mod semantic;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use pirex_types::{AlgorithmConfig, AlgorithmResult, AlgorithmTag, CacheConfig, ContentKind, ItemId, Result, UserId, UserProfile};
use sha2::{Digest, Sha256};

use pirex_infra::cache_keys::{algorithm_results_key, cache_kind_for_algorithm};
use pirex_infra::stores::kv::{get_json, set_json};
use pirex_infra::stores::{GraphStore, ItemStore, SharedCache};

pub use collaborative::CollaborativeGenerator;
pub use graph_signal::GraphSignalGenerator;
pub use pagerank::PagerankGenerator;
pub use popularity::PopularityGenerator;
pub use semantic::SemanticGenerator;

/// Per-request inputs a generator needs, built once by the orchestrator from
/// a single up-front `UserProfile` read (§5: "generators observe a
/// consistent UserProfile snapshot").
#[derive(Debug, Clone)]
pub struct GenerationContext {
    pub user_id: UserId,
    pub profile: UserProfile,
    pub kind: Option<ContentKind>,
    pub categories: Option<Vec<String>>,
    /// Items to exclude: caller-supplied exclusions unioned with the user's
    /// explicit-interaction history, per §4.6 step 8 applied early so
    /// generators never waste a slot on an item that will be filtered later.
    pub exclusions: HashSet<ItemId>,
    pub limit: usize,
}

/// Shared, cheaply-cloned dependencies every generator needs.
pub struct GeneratorDeps {
    pub item_store: Arc<dyn ItemStore>,
    pub graph_store: Arc<dyn GraphStore>,
    pub cache: SharedCache,
    pub algorithms: AlgorithmConfig,
    pub cache_config: CacheConfig,
    pub model_version: String,
}

#[async_trait]
pub trait CandidateGenerator: Send + Sync {
    fn tag(&self) -> AlgorithmTag;
    async fn generate(&self, ctx: &GenerationContext) -> Result<Vec<AlgorithmResult>>;
}

/// Fingerprint of an algorithm's key inputs, used to build its cache key.
/// Not cryptographically important; just needs to be stable and to change
/// whenever any input that affects the result set changes.
pub fn fingerprint_inputs(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(b"\0");
    }
    format!("{:x}", hasher.finalize())
}

/// Cache-first lookup for a generator's result list, recording a hit/miss
/// metric either way.
pub async fn lookup_cached(deps: &GeneratorDeps, algorithm: AlgorithmTag, user: UserId, fingerprint: &str) -> Option<Vec<AlgorithmResult>> {
    let kind = cache_kind_for_algorithm(algorithm);
    let key = algorithm_results_key(algorithm, user, fingerprint, &deps.model_version);
    let hit = get_json::<Vec<AlgorithmResult>>(deps.cache.as_ref(), kind.tier(), &key).await;
    pirex_infra::metrics::record_cache_lookup(algorithm.as_str(), hit.is_some());
    hit
}

pub async fn store_cached(deps: &GeneratorDeps, algorithm: AlgorithmTag, user: UserId, fingerprint: &str, results: &[AlgorithmResult]) {
    let kind = cache_kind_for_algorithm(algorithm);
    let key = algorithm_results_key(algorithm, user, fingerprint, &deps.model_version);
    set_json(deps.cache.as_ref(), kind.tier(), &key, &results.to_vec(), kind.ttl(&deps.cache_config)).await;
}
