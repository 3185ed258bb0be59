//! Recommendation orchestrator (C6): the deterministic
//! lookup → classify → fan_out → fuse → filter → diversify → explain →
//! finalize pipeline from §4.6, handing off to diversity (C7) and the
//! learning controller (C9) for per-user fusion weights.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use pirex_core::diversity::{diversify, DiversityCandidate};
use pirex_core::fusion::{logistic_calibrate, min_max_normalize, rank_order, weighted_fuse, FusedScore, ScoredContribution};
use pirex_types::{
    AlgorithmResult, AlgorithmTag, CacheConfig, ContentKind, DiversityConfig, Explanation, ItemId,
    Recommendation, RecommendationResponse, Result, UserId, UserTier,
};
use tokio::time::timeout;

use pirex_infra::cache_keys;
use pirex_infra::profile::ProfileManager;
use pirex_infra::stores::kv::{get_json, set_json, CacheTier};
use pirex_infra::stores::profile_store::UserProfileStore;
use pirex_infra::stores::{GraphStore, ItemStore, SharedCache};

use crate::generators::{fingerprint_inputs, popularity::popularity_results, CandidateGenerator, GenerationContext, GeneratorDeps};
use crate::learning::LearningController;

const CALIBRATION_STEEPNESS: f64 = 6.0;
/// Multiplier over the requested count when over-fetching candidates for
/// the diversity pass, so it has room to reject near-duplicates.
const DIVERSITY_OVERFETCH_FACTOR: usize = 3;
const FALLBACK_CONFIDENCE_CEILING: f64 = 0.3;
/// Evidence items shown per explanation, per §4.7's "up to three".
const MAX_EVIDENCE_ITEMS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecommendContext {
    Home,
    Search,
    Category,
    Product,
    Similar,
}

impl RecommendContext {
    fn as_str(self) -> &'static str {
        match self {
            RecommendContext::Home => "home",
            RecommendContext::Search => "search",
            RecommendContext::Category => "category",
            RecommendContext::Product => "product",
            RecommendContext::Similar => "similar",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecommendRequest {
    pub user_id: UserId,
    pub count: usize,
    pub context: RecommendContext,
    pub content_kind: Option<ContentKind>,
    pub categories: Option<Vec<String>>,
    pub excludes: HashSet<ItemId>,
    pub explain: bool,
    pub seed_item_id: Option<ItemId>,
    pub deadline: Duration,
}

pub struct OrchestratorDeps<S: UserProfileStore> {
    pub item_store: Arc<dyn ItemStore>,
    pub graph_store: Arc<dyn GraphStore>,
    pub cache: SharedCache,
    pub cache_config: CacheConfig,
    pub diversity_config: DiversityConfig,
    pub generators: HashMap<AlgorithmTag, Arc<dyn CandidateGenerator>>,
    pub generator_deps: Arc<GeneratorDeps>,
    pub profiles: Arc<ProfileManager<S>>,
    pub learning: Arc<LearningController<S>>,
    pub model_version: String,
}

pub struct Orchestrator<S: UserProfileStore> {
    deps: Arc<OrchestratorDeps<S>>,
}

impl<S: UserProfileStore> Orchestrator<S> {
    pub fn new(deps: OrchestratorDeps<S>) -> Self {
        Self { deps: Arc::new(deps) }
    }

    /// §4.6 step 3: which algorithms run for a tier. Inactive reuses
    /// Active's set; the "exploration boost" it additionally receives is
    /// the serendipity ratio, left at its configured default rather than a
    /// per-tier override since the spec doesn't name a distinct value.
    fn strategy_for(tier: UserTier) -> Vec<AlgorithmTag> {
        match tier {
            UserTier::New => vec![AlgorithmTag::Semantic],
            UserTier::Active | UserTier::Inactive => {
                vec![AlgorithmTag::Semantic, AlgorithmTag::Collaborative, AlgorithmTag::Pagerank]
            }
            UserTier::Power => vec![AlgorithmTag::Collaborative, AlgorithmTag::Pagerank, AlgorithmTag::GraphSignal],
        }
    }

    pub async fn recommend(&self, request: &RecommendRequest) -> Result<RecommendationResponse> {
        let started_at = std::time::Instant::now();
        let result = self.recommend_inner(request).await;
        if let Ok(response) = &result {
            pirex_infra::metrics::record_orchestrator_latency(started_at.elapsed(), response.degraded);
        }
        result
    }

    async fn recommend_inner(&self, request: &RecommendRequest) -> Result<RecommendationResponse> {
        let fingerprint = self.fingerprint_request(request);
        let cache_key = cache_keys::user_recs_key(request.user_id, &fingerprint);

        if let Some(mut cached) =
            get_json::<RecommendationResponse>(self.deps.cache.as_ref(), CacheTier::Warm, &cache_key).await
        {
            cached.cache_hit = true;
            return Ok(cached);
        }

        let profile = self.deps.profiles.get(request.user_id).await?;
        let tier = UserTier::classify(&profile, pirex_types::now());
        let strategy = Self::strategy_for(tier);

        let mut exclusions = request.excludes.clone();
        if let Ok(interacted) = self.deps.graph_store.items_rated_at_least(request.user_id, f64::NEG_INFINITY).await {
            exclusions.extend(interacted);
        }

        let ctx = GenerationContext {
            user_id: request.user_id,
            profile: profile.clone(),
            kind: request.content_kind,
            categories: request.categories.clone(),
            exclusions: exclusions.clone(),
            limit: request.count * DIVERSITY_OVERFETCH_FACTOR,
        };

        let generator_results = self.fan_out(&strategy, &ctx, request.deadline).await;
        let contributing: Vec<(AlgorithmTag, Vec<AlgorithmResult>)> =
            generator_results.into_iter().filter(|(_, results)| !results.is_empty()).collect();

        let (response, degraded) = if contributing.is_empty() {
            (self.popularity_fallback(request, &ctx).await?, true)
        } else {
            let weights = self.deps.learning.weights_for(request.user_id, tier, profile.algorithm_weight_overrides.as_ref()).await;
            (self.fuse_and_finalize(request, &ctx, contributing, &weights, tier).await?, false)
        };

        let mut response = response;
        response.degraded = response.degraded || degraded;
        response.cache_hit = false;

        set_json(
            self.deps.cache.as_ref(),
            CacheTier::Warm,
            &cache_key,
            &response,
            Some(Duration::from_secs(self.deps.cache_config.orchestrator_response_ttl_secs)),
        )
        .await;

        Ok(response)
    }

    fn fingerprint_request(&self, request: &RecommendRequest) -> String {
        let mut excludes: Vec<String> = request.excludes.iter().map(|id| id.to_string()).collect();
        excludes.sort();
        fingerprint_inputs(&[
            &request.user_id.to_string(),
            &request.count.to_string(),
            request.context.as_str(),
            &format!("{:?}", request.content_kind),
            &format!("{:?}", request.categories),
            &excludes.join(","),
            &request.explain.to_string(),
            &format!("{:?}", request.seed_item_id),
            &self.deps.model_version,
        ])
    }

    /// Launches every strategy-selected, enabled generator concurrently,
    /// each bounded by the request's remaining deadline. A timed-out or
    /// erroring generator contributes an empty list rather than failing the
    /// whole request, per §4.6 step 4 and §4.6's closing failure semantics.
    async fn fan_out(
        &self,
        strategy: &[AlgorithmTag],
        ctx: &GenerationContext,
        deadline: Duration,
    ) -> Vec<(AlgorithmTag, Vec<AlgorithmResult>)> {
        let tasks = strategy.iter().filter_map(|tag| {
            let enabled = self.deps.generator_deps.algorithms.enabled.get(tag).copied().unwrap_or(false);
            let generator = self.deps.generators.get(tag).cloned();
            match (enabled, generator) {
                (true, Some(generator)) => Some((*tag, generator)),
                _ => None,
            }
        });

        let futures = tasks.map(|(tag, generator)| {
            let ctx = ctx.clone();
            async move {
                match timeout(deadline, generator.generate(&ctx)).await {
                    Ok(Ok(results)) => {
                        pirex_infra::metrics::record_generator_outcome(tag.as_str(), "succeeded");
                        (tag, results)
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(algorithm = tag.as_str(), error = %e, "generator failed, degrading");
                        pirex_infra::metrics::record_generator_outcome(tag.as_str(), "failed");
                        (tag, Vec::new())
                    }
                    Err(_) => {
                        tracing::warn!(algorithm = tag.as_str(), "generator timed out, degrading");
                        pirex_infra::metrics::record_generator_outcome(tag.as_str(), "timed_out");
                        (tag, Vec::new())
                    }
                }
            }
        });

        futures::future::join_all(futures).await
    }

    async fn popularity_fallback(&self, request: &RecommendRequest, ctx: &GenerationContext) -> Result<RecommendationResponse> {
        let results = popularity_results(&self.deps.generator_deps, ctx, AlgorithmTag::Popularity, FALLBACK_CONFIDENCE_CEILING).await?;
        let recommendations = results
            .into_iter()
            .take(request.count)
            .enumerate()
            .map(|(idx, r)| Recommendation {
                item_id: r.item_id,
                score: r.raw_score,
                confidence: r.confidence,
                position: idx as u32 + 1,
                algorithms: vec![AlgorithmTag::Popularity],
                explanation: None,
            })
            .collect();

        Ok(RecommendationResponse {
            user_id: request.user_id,
            recommendations,
            cache_hit: false,
            degraded: true,
            strategy: "popularity_with_exploration".to_string(),
        })
    }

    async fn fuse_and_finalize(
        &self,
        request: &RecommendRequest,
        ctx: &GenerationContext,
        contributing: Vec<(AlgorithmTag, Vec<AlgorithmResult>)>,
        weights: &HashMap<AlgorithmTag, f64>,
        tier: UserTier,
    ) -> Result<RecommendationResponse> {
        let mut contributions = Vec::new();
        let mut confidences: HashMap<ItemId, Vec<f64>> = HashMap::new();
        let mut algo_magnitude: HashMap<ItemId, Vec<(AlgorithmTag, f64)>> = HashMap::new();

        for (tag, results) in &contributing {
            let normalized = min_max_normalize(results);
            for (result, normalized_score) in results.iter().zip(normalized) {
                confidences.entry(result.item_id).or_default().push(result.confidence);
                let w = weights.get(tag).copied().unwrap_or(0.0);
                algo_magnitude.entry(result.item_id).or_default().push((*tag, w * normalized_score * result.confidence));
                contributions.push(ScoredContribution {
                    item_id: result.item_id,
                    algorithm: *tag,
                    normalized_score,
                    confidence: result.confidence,
                });
            }
        }

        let mut fused: Vec<FusedScore> = weighted_fuse(&contributions, weights);
        for f in &mut fused {
            f.score = logistic_calibrate(f.score, CALIBRATION_STEEPNESS);
        }
        fused.sort_by(rank_order);
        fused.retain(|f| !ctx.exclusions.contains(&f.item_id));

        let overfetch = (request.count * DIVERSITY_OVERFETCH_FACTOR).max(request.count);
        fused.truncate(overfetch);

        let fused_by_id: HashMap<ItemId, FusedScore> = fused.iter().map(|f| (f.item_id, f.clone())).collect();

        let mut candidates = Vec::with_capacity(fused.len());
        for f in &fused {
            if let Ok(item) = self.deps.item_store.get(f.item_id).await {
                if let Some(embedding) = item.embedding {
                    candidates.push(DiversityCandidate {
                        item_id: f.item_id,
                        score: f.score,
                        confidence: confidences.get(&f.item_id).map(|c| c.iter().sum::<f64>() / c.len() as f64).unwrap_or(0.0),
                        embedding,
                        categories: item.categories,
                    });
                }
            }
        }

        let diversified = diversify(&candidates, request.count, &self.deps.diversity_config);

        let recommendations = diversified
            .into_iter()
            .enumerate()
            .map(|(idx, candidate)| {
                let avg_confidence = confidences
                    .get(&candidate.item_id)
                    .map(|c| c.iter().sum::<f64>() / c.len() as f64)
                    .unwrap_or(candidate.confidence);
                let algorithms = fused_by_id
                    .get(&candidate.item_id)
                    .map(|f| f.contributing_algorithms.clone())
                    .unwrap_or_default();
                let explanation = if request.explain {
                    Some(self.build_explanation(candidate.item_id, &algorithms, &algo_magnitude, &ctx.exclusions))
                } else {
                    None
                };
                Recommendation {
                    item_id: candidate.item_id,
                    score: candidate.score,
                    confidence: avg_confidence,
                    position: idx as u32 + 1,
                    algorithms,
                    explanation,
                }
            })
            .collect();

        Ok(RecommendationResponse {
            user_id: request.user_id,
            recommendations,
            cache_hit: false,
            degraded: false,
            strategy: format!("{:?}", tier).to_lowercase(),
        })
    }

    /// Dominant algorithm = the one with the largest weighted contribution
    /// to this item's fused score; evidence = up to three items the user
    /// has already explicitly interacted with, a simple stand-in for the
    /// richer per-algorithm evidence trail (e.g. "the user the collaborative
    /// neighbor shares taste with") the spec leaves unspecified.
    fn build_explanation(
        &self,
        item_id: ItemId,
        contributing_algorithms: &[AlgorithmTag],
        algo_magnitude: &HashMap<ItemId, Vec<(AlgorithmTag, f64)>>,
        exclusions: &HashSet<ItemId>,
    ) -> Explanation {
        let dominant = algo_magnitude
            .get(&item_id)
            .and_then(|contributions| contributions.iter().max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal)))
            .map(|(tag, _)| *tag)
            .unwrap_or(AlgorithmTag::Popularity);
        let evidence_item_ids: Vec<ItemId> = exclusions.iter().take(MAX_EVIDENCE_ITEMS).copied().collect();

        Explanation {
            dominant_algorithm: dominant,
            contributing_algorithms: contributing_algorithms.to_vec(),
            summary: format!("recommended primarily by {}", dominant.as_str()),
            evidence_item_ids,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::SemanticGenerator;
    use pirex_infra::stores::profile_store::InMemoryUserProfileStore;
    use pirex_infra::stores::{InMemoryItemStore, InMemoryTieredCache, SqliteGraphStore};
    use pirex_types::{new_id, AlgorithmConfig, ContentItem, ContentKind, Embedding};

    fn item(id: ItemId, embedding: Embedding) -> ContentItem {
        let now = pirex_types::now();
        ContentItem {
            id,
            kind: ContentKind::Article,
            title: "t".into(),
            description: None,
            image_urls: vec![],
            categories: vec!["tech".into()],
            attributes: Default::default(),
            embedding: Some(embedding),
            quality_score: 0.9,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    async fn orchestrator() -> (Orchestrator<InMemoryUserProfileStore>, Arc<InMemoryItemStore>) {
        let item_store = Arc::new(InMemoryItemStore::new());
        let pool = sqlx::sqlite::SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        let graph_store: Arc<dyn GraphStore> = Arc::new(SqliteGraphStore::new(pool).await.unwrap());
        let cache: SharedCache = Arc::new(InMemoryTieredCache::new());

        let generator_deps = Arc::new(GeneratorDeps {
            item_store: item_store.clone(),
            graph_store: graph_store.clone(),
            cache: cache.clone(),
            algorithms: AlgorithmConfig::default(),
            cache_config: CacheConfig::default(),
            model_version: "test-v1".to_string(),
        });

        let mut generators: HashMap<AlgorithmTag, Arc<dyn CandidateGenerator>> = HashMap::new();
        generators.insert(AlgorithmTag::Semantic, Arc::new(SemanticGenerator::new(generator_deps.clone())));

        let profiles = Arc::new(ProfileManager::new(InMemoryUserProfileStore::new(), cache.clone(), CacheConfig::default(), 4));
        let learning = Arc::new(LearningController::new(profiles.clone(), AlgorithmConfig::default()));

        let deps = OrchestratorDeps {
            item_store: item_store.clone(),
            graph_store,
            cache,
            cache_config: CacheConfig::default(),
            diversity_config: DiversityConfig::default(),
            generators,
            generator_deps,
            profiles,
            learning,
            model_version: "test-v1".to_string(),
        };

        (Orchestrator::new(deps), item_store)
    }

    fn request(user_id: UserId) -> RecommendRequest {
        RecommendRequest {
            user_id,
            count: 2,
            context: RecommendContext::Home,
            content_kind: None,
            categories: None,
            excludes: HashSet::new(),
            explain: false,
            seed_item_id: None,
            deadline: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn brand_new_user_falls_back_to_popularity() {
        let (orchestrator, items) = orchestrator().await;
        let popular = new_id();
        items.upsert(item(popular, Embedding::normalized(vec![1.0, 0.0, 0.0, 0.0]).unwrap())).await.unwrap();
        items.bump_interaction_count(popular).await;

        let user = new_id();
        let response = orchestrator.recommend(&request(user)).await.unwrap();
        assert!(response.degraded);
        assert_eq!(response.strategy, "popularity_with_exploration");
        assert!(!response.recommendations.is_empty());
        assert_eq!(response.recommendations[0].position, 1);
    }

    #[tokio::test]
    async fn second_identical_request_is_served_from_cache() {
        let (orchestrator, items) = orchestrator().await;
        let popular = new_id();
        items.upsert(item(popular, Embedding::normalized(vec![1.0, 0.0, 0.0, 0.0]).unwrap())).await.unwrap();
        items.bump_interaction_count(popular).await;

        let user = new_id();
        let req = request(user);
        let first = orchestrator.recommend(&req).await.unwrap();
        assert!(!first.cache_hit);

        let second = orchestrator.recommend(&req).await.unwrap();
        assert!(second.cache_hit);
        assert_eq!(second.recommendations.len(), first.recommendations.len());
    }
}
