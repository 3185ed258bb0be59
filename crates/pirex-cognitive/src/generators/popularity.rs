//! Popularity generator: the most-interacted-with active items, per §4.5.
//! Doubles as the cold-start fallback other generators (and the
//! orchestrator's all-failed path) reach for when personalized signal is
//! unavailable.

use std::sync::Arc;

use async_trait::async_trait;
use pirex_types::{AlgorithmResult, AlgorithmTag, Result};

use pirex_infra::stores::ItemFilter;

use super::{fingerprint_inputs, lookup_cached, store_cached, CandidateGenerator, GenerationContext, GeneratorDeps};

/// Shared helper: popularity-ranked `AlgorithmResult`s tagged as `algorithm`,
/// each confidence capped at `confidence_ceiling`. Used both by
/// `PopularityGenerator` itself (ceiling 1.0) and by other generators'
/// cold-start fallback (a lower ceiling, so fusion never mistakes a
/// fallback list for genuine personalized signal).
pub async fn popularity_results(
    deps: &GeneratorDeps,
    ctx: &GenerationContext,
    algorithm: AlgorithmTag,
    confidence_ceiling: f64,
) -> Result<Vec<AlgorithmResult>> {
    let filter = ItemFilter {
        kind: ctx.kind,
        categories: ctx.categories.clone(),
        active_only: true,
        min_quality: None,
        exclude: ctx.exclusions.clone(),
    };
    let ids = deps.item_store.most_popular(&filter, ctx.limit).await?;
    let n = ids.len().max(1) as f64;
    Ok(ids
        .into_iter()
        .enumerate()
        .map(|(rank, item_id)| {
            let raw_score = 1.0 - (rank as f64 / n);
            AlgorithmResult { item_id, raw_score, confidence: confidence_ceiling.min(raw_score.max(0.1)), algorithm }
        })
        .collect())
}

pub struct PopularityGenerator {
    deps: Arc<GeneratorDeps>,
}

impl PopularityGenerator {
    pub fn new(deps: Arc<GeneratorDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl CandidateGenerator for PopularityGenerator {
    fn tag(&self) -> AlgorithmTag {
        AlgorithmTag::Popularity
    }

    async fn generate(&self, ctx: &GenerationContext) -> Result<Vec<AlgorithmResult>> {
        let fingerprint = fingerprint_inputs(&[
            "popularity",
            &format!("{:?}", ctx.kind),
            &format!("{:?}", ctx.categories),
            &ctx.limit.to_string(),
        ]);
        if let Some(cached) = lookup_cached(&self.deps, AlgorithmTag::Popularity, ctx.user_id, &fingerprint).await {
            return Ok(cached);
        }
        let results = popularity_results(&self.deps, ctx, AlgorithmTag::Popularity, 1.0).await?;
        store_cached(&self.deps, AlgorithmTag::Popularity, ctx.user_id, &fingerprint, &results).await;
        Ok(results)
    }
}
