//! Semantic search generator: cosine-similarity over the user's preference
//! vector against active, sufficiently-high-quality items, per §4.5.

use std::sync::Arc;

use async_trait::async_trait;
use pirex_types::{AlgorithmResult, AlgorithmTag, Result};

use pirex_infra::stores::ItemFilter;

use super::{fingerprint_inputs, lookup_cached, store_cached, CandidateGenerator, GenerationContext, GeneratorDeps};

pub struct SemanticGenerator {
    deps: Arc<GeneratorDeps>,
}

impl SemanticGenerator {
    pub fn new(deps: Arc<GeneratorDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl CandidateGenerator for SemanticGenerator {
    fn tag(&self) -> AlgorithmTag {
        AlgorithmTag::Semantic
    }

    async fn generate(&self, ctx: &GenerationContext) -> Result<Vec<AlgorithmResult>> {
        // A zero preference vector (brand-new user) carries no directional
        // signal; searching with it would just rank by the embedding space's
        // arbitrary origin. The orchestrator's new-user strategy leans on
        // the popularity fallback instead.
        if ctx.profile.preference_vector.is_zero() {
            return Ok(Vec::new());
        }

        let fingerprint = fingerprint_inputs(&[
            "semantic",
            &ctx.user_id.to_string(),
            &format!("{:?}", ctx.kind),
            &format!("{:?}", ctx.categories),
            &ctx.limit.to_string(),
        ]);
        if let Some(cached) = lookup_cached(&self.deps, AlgorithmTag::Semantic, ctx.user_id, &fingerprint).await {
            return Ok(cached);
        }

        let filter = ItemFilter {
            kind: ctx.kind,
            categories: ctx.categories.clone(),
            active_only: true,
            min_quality: Some(0.5),
            exclude: ctx.exclusions.clone(),
        };
        let threshold = self.deps.algorithms.semantic_similarity_threshold;

        // Over-fetch before the threshold filter so a similarity cutoff
        // doesn't starve the final list below `ctx.limit`.
        let hits = self.deps.item_store.search_similar(&ctx.profile.preference_vector, &filter, ctx.limit * 4).await?;

        let results: Vec<AlgorithmResult> = hits
            .into_iter()
            .filter(|hit| hit.similarity >= threshold)
            .take(ctx.limit)
            .map(|hit| AlgorithmResult {
                item_id: hit.item_id,
                raw_score: hit.similarity,
                confidence: (hit.similarity * 1.2).min(1.0),
                algorithm: AlgorithmTag::Semantic,
            })
            .collect();

        store_cached(&self.deps, AlgorithmTag::Semantic, ctx.user_id, &fingerprint, &results).await;
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pirex_infra::stores::{InMemoryItemStore, InMemoryTieredCache, SqliteGraphStore};
    use pirex_types::{AlgorithmConfig, CacheConfig, ContentItem, ContentKind, Embedding, UserProfile};
    use std::collections::HashSet;

    async fn deps() -> Arc<GeneratorDeps> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        Arc::new(GeneratorDeps {
            item_store: Arc::new(InMemoryItemStore::new()),
            graph_store: Arc::new(SqliteGraphStore::new(pool).await.unwrap()),
            cache: Arc::new(InMemoryTieredCache::new()),
            algorithms: AlgorithmConfig::default(),
            cache_config: CacheConfig::default(),
            model_version: "test-v1".to_string(),
        })
    }

    fn item(id: pirex_types::ItemId, embedding: Vec<f32>) -> ContentItem {
        ContentItem {
            id,
            kind: ContentKind::Article,
            title: "t".into(),
            description: None,
            image_urls: vec![],
            categories: vec![],
            attributes: Default::default(),
            embedding: Embedding::normalized(embedding),
            quality_score: 0.9,
            active: true,
            created_at: pirex_types::now(),
            updated_at: pirex_types::now(),
        }
    }

    #[tokio::test]
    async fn zero_preference_vector_yields_no_candidates() {
        let deps = deps().await;
        let generator = SemanticGenerator::new(deps);
        let ctx = GenerationContext {
            user_id: pirex_types::new_id(),
            profile: UserProfile::new_empty(pirex_types::new_id(), 2),
            kind: None,
            categories: None,
            exclusions: HashSet::new(),
            limit: 10,
        };
        assert!(generator.generate(&ctx).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn returns_items_above_similarity_threshold() {
        let deps = deps().await;
        let matching_id = pirex_types::new_id();
        deps.item_store.upsert(item(matching_id, vec![1.0, 0.0])).await.unwrap();
        deps.item_store.upsert(item(pirex_types::new_id(), vec![0.0, 1.0])).await.unwrap();

        let generator = SemanticGenerator::new(deps.clone());
        let mut profile = UserProfile::new_empty(pirex_types::new_id(), 2);
        profile.preference_vector = Embedding::normalized(vec![1.0, 0.0]).unwrap();
        let ctx = GenerationContext {
            user_id: profile.id,
            profile,
            kind: None,
            categories: None,
            exclusions: HashSet::new(),
            limit: 10,
        };

        let results = generator.generate(&ctx).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].item_id, matching_id);
    }
}
