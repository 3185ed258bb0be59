//! Personalized PageRank generator: restart-biased random walk over a
//! user-seeded subgraph of neighbors and their rated items, per §4.5.

use std::sync::Arc;

use async_trait::async_trait;
use pirex_core::graph::personalized_pagerank;
use pirex_types::{AlgorithmResult, AlgorithmTag, Result};

use pirex_infra::stores::GraphNode;

use super::{fingerprint_inputs, lookup_cached, store_cached, CandidateGenerator, GenerationContext, GeneratorDeps};

pub struct PagerankGenerator {
    deps: Arc<GeneratorDeps>,
}

impl PagerankGenerator {
    pub fn new(deps: Arc<GeneratorDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl CandidateGenerator for PagerankGenerator {
    fn tag(&self) -> AlgorithmTag {
        AlgorithmTag::Pagerank
    }

    async fn generate(&self, ctx: &GenerationContext) -> Result<Vec<AlgorithmResult>> {
        let fingerprint = fingerprint_inputs(&["pagerank", &ctx.user_id.to_string(), &ctx.limit.to_string()]);
        if let Some(cached) = lookup_cached(&self.deps, AlgorithmTag::Pagerank, ctx.user_id, &fingerprint).await {
            return Ok(cached);
        }

        let cfg = &self.deps.algorithms;
        let graph = self
            .deps
            .graph_store
            .user_subgraph(ctx.user_id, cfg.collaborative_top_neighbors, cfg.collaborative_min_shared_items, cfg.collaborative_min_correlation)
            .await?;

        if graph.is_empty() {
            store_cached(&self.deps, AlgorithmTag::Pagerank, ctx.user_id, &fingerprint, &[]).await;
            return Ok(Vec::new());
        }

        let seed = GraphNode::User(ctx.user_id);
        let scores = personalized_pagerank(&graph, &seed, cfg.pagerank_damping, cfg.pagerank_max_iterations, cfg.pagerank_tolerance);

        let mut results: Vec<AlgorithmResult> = scores
            .into_iter()
            .filter_map(|(node, score)| match node {
                GraphNode::Item(item_id) if !ctx.exclusions.contains(&item_id) => Some((item_id, score)),
                _ => None,
            })
            .map(|(item_id, score)| AlgorithmResult {
                item_id,
                raw_score: score,
                confidence: (score * 10.0).min(1.0),
                algorithm: AlgorithmTag::Pagerank,
            })
            .collect();

        results.sort_by(|a, b| {
            b.raw_score.partial_cmp(&a.raw_score).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.item_id.cmp(&b.item_id))
        });
        results.truncate(ctx.limit);

        store_cached(&self.deps, AlgorithmTag::Pagerank, ctx.user_id, &fingerprint, &results).await;
        Ok(results)
    }
}
