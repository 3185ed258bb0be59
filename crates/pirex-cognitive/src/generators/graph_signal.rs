//! Graph-signal generator: two-hop propagation from a user's highly-rated
//! items through their Louvain community to other members' highly-rated
//! items, per §4.5.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use pirex_core::graph::{louvain_communities, two_hop_path_counts, two_hop_propagation};
use pirex_types::{AlgorithmResult, AlgorithmTag, Result, UserId};

use pirex_infra::stores::GraphNode;

use super::{fingerprint_inputs, lookup_cached, store_cached, CandidateGenerator, GenerationContext, GeneratorDeps};

const HIGH_RATING_THRESHOLD: f64 = 4.0;
/// §4.1's two-hop signal floor: a target needs at least this many distinct
/// reinforcing paths from the seed user's highly-rated items before it
/// counts as a community signal.
const MIN_PROPAGATION_PATHS: usize = 2;

pub struct GraphSignalGenerator {
    deps: Arc<GeneratorDeps>,
}

impl GraphSignalGenerator {
    pub fn new(deps: Arc<GeneratorDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl CandidateGenerator for GraphSignalGenerator {
    fn tag(&self) -> AlgorithmTag {
        AlgorithmTag::GraphSignal
    }

    async fn generate(&self, ctx: &GenerationContext) -> Result<Vec<AlgorithmResult>> {
        let fingerprint = fingerprint_inputs(&["graph_signal", &ctx.user_id.to_string(), &ctx.limit.to_string()]);
        if let Some(cached) = lookup_cached(&self.deps, AlgorithmTag::GraphSignal, ctx.user_id, &fingerprint).await {
            return Ok(cached);
        }

        let graph = self.deps.graph_store.full_projection().await?;
        let seed = GraphNode::User(ctx.user_id);
        if !graph.contains_key(&seed) {
            store_cached(&self.deps, AlgorithmTag::GraphSignal, ctx.user_id, &fingerprint, &[]).await;
            return Ok(Vec::new());
        }

        let communities = louvain_communities(&graph);
        let Some(&my_community) = communities.get(&seed) else {
            store_cached(&self.deps, AlgorithmTag::GraphSignal, ctx.user_id, &fingerprint, &[]).await;
            return Ok(Vec::new());
        };

        let community_members: Vec<GraphNode> = communities
            .iter()
            .filter(|(node, community)| **community == my_community && matches!(**node, GraphNode::User(_)) && **node != seed)
            .map(|(node, _)| *node)
            .collect();

        let source_items = self.deps.graph_store.items_rated_at_least(ctx.user_id, HIGH_RATING_THRESHOLD).await?;
        let sources: Vec<GraphNode> = source_items.into_iter().map(GraphNode::Item).collect();

        let member_ids: Vec<UserId> = community_members
            .iter()
            .filter_map(|node| match node {
                GraphNode::User(id) => Some(*id),
                _ => None,
            })
            .collect();

        let mut targets: HashSet<GraphNode> = HashSet::new();
        for member_id in &member_ids {
            let rated = self.deps.graph_store.items_rated_at_least(*member_id, HIGH_RATING_THRESHOLD).await?;
            for item_id in rated {
                if ctx.exclusions.contains(&item_id) {
                    continue;
                }
                targets.insert(GraphNode::Item(item_id));
            }
        }

        if sources.is_empty() || targets.is_empty() {
            store_cached(&self.deps, AlgorithmTag::GraphSignal, ctx.user_id, &fingerprint, &[]).await;
            return Ok(Vec::new());
        }

        // True per-item average across the community's own ratings, not a
        // stand-in constant, so `raw_score` actually reflects how strongly
        // the community rates each candidate.
        let community_ratings = self.deps.graph_store.ratings_by_items(&member_ids).await?;

        let strengths = two_hop_propagation(&graph, &sources, &targets);
        let path_counts = two_hop_path_counts(&graph, &sources, &targets);

        let mut results: Vec<AlgorithmResult> = strengths
            .into_iter()
            .filter(|(node, _)| path_counts.get(node).copied().unwrap_or(0) >= MIN_PROPAGATION_PATHS)
            .filter_map(|(node, strength)| match node {
                GraphNode::Item(item_id) => Some((item_id, strength)),
                _ => None,
            })
            .map(|(item_id, strength)| {
                let avg_rating = community_ratings
                    .get(&item_id)
                    .filter(|ratings| !ratings.is_empty())
                    .map(|ratings| ratings.iter().map(|(_, r)| *r).sum::<f64>() / ratings.len() as f64)
                    .unwrap_or(HIGH_RATING_THRESHOLD);
                let raw_score = ((strength * avg_rating) / 5.0).min(1.0);
                AlgorithmResult { item_id, raw_score, confidence: (raw_score * 0.8).min(1.0), algorithm: AlgorithmTag::GraphSignal }
            })
            .collect();

        results.sort_by(|a, b| {
            b.raw_score.partial_cmp(&a.raw_score).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.item_id.cmp(&b.item_id))
        });
        results.truncate(ctx.limit);

        store_cached(&self.deps, AlgorithmTag::GraphSignal, ctx.user_id, &fingerprint, &results).await;
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pirex_infra::stores::{EdgeKind, InMemoryItemStore, InMemoryTieredCache, SqliteGraphStore};
    use pirex_types::{AlgorithmConfig, CacheConfig, UserProfile};

    #[tokio::test]
    async fn isolated_user_yields_no_candidates() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        let graph = Arc::new(SqliteGraphStore::new(pool).await.unwrap());
        let deps = Arc::new(GeneratorDeps {
            item_store: Arc::new(InMemoryItemStore::new()),
            graph_store: graph,
            cache: Arc::new(InMemoryTieredCache::new()),
            algorithms: AlgorithmConfig::default(),
            cache_config: CacheConfig::default(),
            model_version: "test-v1".to_string(),
        });
        let generator = GraphSignalGenerator::new(deps);
        let user = pirex_types::new_id();
        let ctx = GenerationContext {
            user_id: user,
            profile: UserProfile::new_empty(user, 2),
            kind: None,
            categories: None,
            exclusions: HashSet::new(),
            limit: 10,
        };
        assert!(generator.generate(&ctx).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn community_members_reinforcing_item_propagates_with_true_average() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        let graph = Arc::new(SqliteGraphStore::new(pool).await.unwrap());
        let user = pirex_types::new_id();
        let peer1 = pirex_types::new_id();
        let peer2 = pirex_types::new_id();
        let shared_item = pirex_types::new_id();
        let recommended_item = pirex_types::new_id();

        graph.record_edge(user, shared_item, EdgeKind::Rated, 1.0, Some(5.0)).await.unwrap();
        graph.record_edge(peer1, shared_item, EdgeKind::Rated, 1.0, Some(5.0)).await.unwrap();
        graph.record_edge(peer2, shared_item, EdgeKind::Rated, 1.0, Some(5.0)).await.unwrap();
        // Two distinct community members both reinforce recommended_item, so
        // it clears the >= 2 path floor; their ratings differ so avg_rating
        // must reflect the true mean rather than a stand-in constant. Edge
        // weight kept below 1.0 so the score doesn't saturate at the [0,1]
        // cap, which would hide a wrong avg_rating behind the clamp.
        graph.record_edge(peer1, recommended_item, EdgeKind::Rated, 0.5, Some(4.5)).await.unwrap();
        graph.record_edge(peer2, recommended_item, EdgeKind::Rated, 0.5, Some(4.0)).await.unwrap();

        let deps = Arc::new(GeneratorDeps {
            item_store: Arc::new(InMemoryItemStore::new()),
            graph_store: graph,
            cache: Arc::new(InMemoryTieredCache::new()),
            algorithms: AlgorithmConfig::default(),
            cache_config: CacheConfig::default(),
            model_version: "test-v1".to_string(),
        });
        let generator = GraphSignalGenerator::new(deps);
        let ctx = GenerationContext {
            user_id: user,
            profile: UserProfile::new_empty(user, 2),
            kind: None,
            categories: None,
            exclusions: HashSet::new(),
            limit: 10,
        };
        let results = generator.generate(&ctx).await.unwrap();
        let hit = results.iter().find(|r| r.item_id == recommended_item).expect("recommended item should propagate");
        let expected_avg_rating = (4.5 + 4.0) / 2.0;
        let expected_score = ((2.0 * expected_avg_rating) / 5.0).min(1.0);
        assert!((hit.raw_score - expected_score).abs() < 1e-6);
    }

    #[tokio::test]
    async fn single_reinforcing_path_does_not_clear_the_propagation_floor() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        let graph = Arc::new(SqliteGraphStore::new(pool).await.unwrap());
        let user = pirex_types::new_id();
        let peer = pirex_types::new_id();
        let shared_item = pirex_types::new_id();
        let recommended_item = pirex_types::new_id();

        graph.record_edge(user, shared_item, EdgeKind::Rated, 1.0, Some(5.0)).await.unwrap();
        graph.record_edge(peer, shared_item, EdgeKind::Rated, 1.0, Some(5.0)).await.unwrap();
        graph.record_edge(peer, recommended_item, EdgeKind::Rated, 1.0, Some(4.5)).await.unwrap();

        let deps = Arc::new(GeneratorDeps {
            item_store: Arc::new(InMemoryItemStore::new()),
            graph_store: graph,
            cache: Arc::new(InMemoryTieredCache::new()),
            algorithms: AlgorithmConfig::default(),
            cache_config: CacheConfig::default(),
            model_version: "test-v1".to_string(),
        });
        let generator = GraphSignalGenerator::new(deps);
        let ctx = GenerationContext {
            user_id: user,
            profile: UserProfile::new_empty(user, 2),
            kind: None,
            categories: None,
            exclusions: HashSet::new(),
            limit: 10,
        };
        let results = generator.generate(&ctx).await.unwrap();
        assert!(!results.iter().any(|r| r.item_id == recommended_item));
    }
}
