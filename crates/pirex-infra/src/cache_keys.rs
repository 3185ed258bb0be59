//! Cache coherence (C10): `:`-namespaced key builders and the TTL table
//! from §4.10, defined in exactly one place so every writer consults the
//! same policy. Every key encodes the model/version/fingerprint that
//! produced the value it names, per §4.10's opening invariant.

use std::time::Duration;

use pirex_types::{AlgorithmTag, CacheConfig, ItemId, JobId, UserId};

use crate::stores::kv::CacheTier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    ItemMetadata,
    ItemEmbedding,
    SemanticResults,
    CollaborativeSimilarities,
    PagerankResults,
    GraphSignalCommunity,
    OrchestratorResponse,
    JobActive,
    JobTerminal,
}

impl CacheKind {
    pub fn tier(self) -> CacheTier {
        match self {
            CacheKind::ItemEmbedding => CacheTier::Cold,
            _ => CacheTier::Warm,
        }
    }

    /// `None` means no TTL (active job state).
    pub fn ttl(self, cfg: &CacheConfig) -> Option<Duration> {
        let secs = match self {
            CacheKind::ItemMetadata => cfg.item_metadata_ttl_secs,
            CacheKind::ItemEmbedding => cfg.item_embedding_ttl_secs,
            CacheKind::SemanticResults => cfg.semantic_results_ttl_secs,
            CacheKind::CollaborativeSimilarities => cfg.collaborative_similarities_ttl_secs,
            CacheKind::PagerankResults => cfg.pagerank_results_ttl_secs,
            CacheKind::GraphSignalCommunity => cfg.graph_signal_community_ttl_secs,
            CacheKind::OrchestratorResponse => cfg.orchestrator_response_ttl_secs,
            CacheKind::JobTerminal => cfg.job_terminal_ttl_secs,
            CacheKind::JobActive => return None,
        };
        Some(Duration::from_secs(secs))
    }
}

pub fn item_metadata_key(item: ItemId) -> String {
    format!("item:{item}")
}

pub fn item_embedding_key(item: ItemId) -> String {
    format!("embedding:{item}")
}

pub fn user_recs_key(user: UserId, fingerprint: &str) -> String {
    format!("recs:user:{user}:{fingerprint}")
}

/// Prefix covering every cached response for a user, regardless of
/// fingerprint — used by §4.8's invalidation, which deletes `recs:user:<id>`
/// wholesale rather than one fingerprint at a time.
pub fn user_recs_prefix(user: UserId) -> String {
    format!("recs:user:{user}")
}

pub fn profile_key(user: UserId) -> String {
    format!("profile:{user}")
}

pub fn user_similarity_key(user: UserId) -> String {
    format!("sim:user:{user}")
}

pub fn algorithm_results_key(algorithm: AlgorithmTag, user: UserId, fingerprint: &str, model_version: &str) -> String {
    format!("alg:{}:{user}:{fingerprint}:{model_version}", algorithm.as_str())
}

pub fn job_key(job: JobId) -> String {
    format!("job:{job}")
}

pub fn cache_kind_for_algorithm(algorithm: AlgorithmTag) -> CacheKind {
    match algorithm {
        AlgorithmTag::Semantic => CacheKind::SemanticResults,
        AlgorithmTag::Collaborative => CacheKind::CollaborativeSimilarities,
        AlgorithmTag::Pagerank => CacheKind::PagerankResults,
        AlgorithmTag::GraphSignal => CacheKind::GraphSignalCommunity,
        // Popularity fallback has no dedicated TTL row in §4.10; reuse the
        // orchestrator-response tier since it is only ever computed as part
        // of a response.
        AlgorithmTag::Popularity => CacheKind::OrchestratorResponse,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_job_ttl_is_24_hours() {
        let cfg = CacheConfig::default();
        assert_eq!(CacheKind::JobTerminal.ttl(&cfg), Some(Duration::from_secs(86_400)));
    }

    #[test]
    fn active_job_has_no_ttl() {
        let cfg = CacheConfig::default();
        assert_eq!(CacheKind::JobActive.ttl(&cfg), None);
    }

    #[test]
    fn item_embedding_lives_in_cold_tier() {
        assert_eq!(CacheKind::ItemEmbedding.tier(), CacheTier::Cold);
    }
}
