//! Collaborative filtering generator: correlation-weighted neighbor ratings,
//! per §4.5, falling back to popularity for users with too few neighbors.

use std::sync::Arc;

use async_trait::async_trait;
use pirex_types::{AlgorithmResult, AlgorithmTag, Result};

use super::popularity::popularity_results;
use super::{fingerprint_inputs, lookup_cached, store_cached, CandidateGenerator, GenerationContext, GeneratorDeps};

pub struct CollaborativeGenerator {
    deps: Arc<GeneratorDeps>,
}

impl CollaborativeGenerator {
    pub fn new(deps: Arc<GeneratorDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl CandidateGenerator for CollaborativeGenerator {
    fn tag(&self) -> AlgorithmTag {
        AlgorithmTag::Collaborative
    }

    async fn generate(&self, ctx: &GenerationContext) -> Result<Vec<AlgorithmResult>> {
        let fingerprint = fingerprint_inputs(&["collaborative", &ctx.user_id.to_string(), &ctx.limit.to_string()]);
        if let Some(cached) = lookup_cached(&self.deps, AlgorithmTag::Collaborative, ctx.user_id, &fingerprint).await {
            return Ok(cached);
        }

        let cfg = &self.deps.algorithms;
        let neighbors = self
            .deps
            .graph_store
            .similar_users(ctx.user_id, cfg.collaborative_min_shared_items, cfg.collaborative_min_correlation, cfg.collaborative_top_neighbors)
            .await?;

        if neighbors.is_empty() {
            // Cold start: no correlated neighbors to borrow ratings from.
            // Popularity results are marked with the low confidence ceiling
            // §4.5 prescribes so the fusion stage never mistakes them for a
            // genuine personalized signal.
            let results = popularity_results(&self.deps, ctx, AlgorithmTag::Collaborative, 0.3).await?;
            store_cached(&self.deps, AlgorithmTag::Collaborative, ctx.user_id, &fingerprint, &results).await;
            return Ok(results);
        }

        let neighbor_ids: Vec<_> = neighbors.iter().map(|(u, _)| *u).collect();
        let weight_by_user: std::collections::HashMap<_, _> = neighbors.iter().copied().collect();
        let ratings_by_item = self.deps.graph_store.ratings_by_items(&neighbor_ids).await?;

        let mut results: Vec<AlgorithmResult> = Vec::new();
        for (item_id, raters) in ratings_by_item {
            if ctx.exclusions.contains(&item_id) {
                continue;
            }
            let mut weighted_sum = 0.0_f64;
            let mut weight_total = 0.0_f64;
            let mut contributors = 0usize;
            for (user, rating) in &raters {
                let Some(weight) = weight_by_user.get(user) else { continue };
                weighted_sum += weight * rating;
                weight_total += weight.abs();
                contributors += 1;
            }
            if weight_total <= 0.0 || contributors == 0 {
                continue;
            }
            let avg_rating = weighted_sum / weight_total;
            let raw_score = (avg_rating / 5.0).clamp(0.0, 1.0);
            let confidence = (((contributors as f64 / 10.0).min(1.0)) + ((weight_total / 5.0).min(1.0))) / 2.0;
            results.push(AlgorithmResult { item_id, raw_score, confidence, algorithm: AlgorithmTag::Collaborative });
        }

        results.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| a.item_id.cmp(&b.item_id))
        });
        results.truncate(ctx.limit);

        store_cached(&self.deps, AlgorithmTag::Collaborative, ctx.user_id, &fingerprint, &results).await;
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pirex_infra::stores::{EdgeKind, InMemoryItemStore, InMemoryTieredCache, SqliteGraphStore};
    use pirex_types::{AlgorithmConfig, CacheConfig, UserProfile};
    use std::collections::HashSet;

    async fn deps() -> (Arc<GeneratorDeps>, Arc<SqliteGraphStore>) {
        let pool = sqlx::sqlite::SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        let graph = Arc::new(SqliteGraphStore::new(pool).await.unwrap());
        let deps = Arc::new(GeneratorDeps {
            item_store: Arc::new(InMemoryItemStore::new()),
            graph_store: graph.clone(),
            cache: Arc::new(InMemoryTieredCache::new()),
            algorithms: AlgorithmConfig::default(),
            cache_config: CacheConfig::default(),
            model_version: "test-v1".to_string(),
        });
        (deps, graph)
    }

    #[tokio::test]
    async fn no_neighbors_falls_back_to_popularity_with_capped_confidence() {
        let (deps, _graph) = deps().await;
        let generator = CollaborativeGenerator::new(deps);
        let user = pirex_types::new_id();
        let ctx = GenerationContext {
            user_id: user,
            profile: UserProfile::new_empty(user, 2),
            kind: None,
            categories: None,
            exclusions: HashSet::new(),
            limit: 10,
        };
        let results = generator.generate(&ctx).await.unwrap();
        assert!(results.iter().all(|r| r.confidence <= 0.3));
    }

    #[tokio::test]
    async fn correlated_neighbor_ratings_surface_unrated_items() {
        let (deps, graph) = deps().await;
        let user = pirex_types::new_id();
        let neighbor = pirex_types::new_id();
        let shared_a = pirex_types::new_id();
        let shared_b = pirex_types::new_id();
        let shared_c = pirex_types::new_id();
        let candidate = pirex_types::new_id();

        for (item, rating) in [(shared_a, 5.0), (shared_b, 3.0), (shared_c, 4.0)] {
            graph.record_edge(user, item, EdgeKind::Rated, 1.0, Some(rating)).await.unwrap();
            graph.record_edge(neighbor, item, EdgeKind::Rated, 1.0, Some(rating)).await.unwrap();
        }
        graph.record_edge(neighbor, candidate, EdgeKind::Rated, 1.0, Some(4.0)).await.unwrap();

        let generator = CollaborativeGenerator::new(deps);
        let ctx = GenerationContext {
            user_id: user,
            profile: UserProfile::new_empty(user, 2),
            kind: None,
            categories: None,
            exclusions: HashSet::new(),
            limit: 10,
        };
        let results = generator.generate(&ctx).await.unwrap();
        assert!(results.iter().any(|r| r.item_id == candidate));
    }
}
