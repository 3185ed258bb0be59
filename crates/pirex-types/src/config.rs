//! Configuration structures for the Pirex recommendation core.
//!
//! All sections here are hot-reloadable unless the field's doc comment
//! says otherwise. Defaults match the values fixed in §6 of the
//! recommendation-core specification.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::AlgorithmTag;

/// Top-level configuration for the recommendation core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PirexConfig {
    pub algorithms: AlgorithmConfig,
    pub diversity: DiversityConfig,
    pub cache: CacheConfig,
    pub pipeline: PipelineConfig,
    pub feedback: FeedbackConfig,
    pub embedding: EmbeddingConfig,
}

impl Default for PirexConfig {
    fn default() -> Self {
        Self {
            algorithms: AlgorithmConfig::default(),
            diversity: DiversityConfig::default(),
            cache: CacheConfig::default(),
            pipeline: PipelineConfig::default(),
            feedback: FeedbackConfig::default(),
            embedding: EmbeddingConfig::default(),
        }
    }
}

/// Per-algorithm enabled/weight/threshold tuples.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgorithmConfig {
    pub enabled: HashMap<AlgorithmTag, bool>,
    /// Default fusion weights; overridden per-user by the learning
    /// controller (§4.9) and per-request by `UserProfile::algorithm_weight_overrides`.
    pub default_weights: HashMap<AlgorithmTag, f64>,
    pub semantic_similarity_threshold: f64,
    pub collaborative_min_shared_items: usize,
    pub collaborative_min_correlation: f64,
    pub collaborative_top_neighbors: usize,
    pub pagerank_damping: f64,
    pub pagerank_max_iterations: usize,
    pub pagerank_tolerance: f64,
    pub graph_signal_min_propagation_strength: f64,
}

impl Default for AlgorithmConfig {
    fn default() -> Self {
        let mut enabled = HashMap::new();
        for tag in [
            AlgorithmTag::Semantic,
            AlgorithmTag::Collaborative,
            AlgorithmTag::Pagerank,
            AlgorithmTag::GraphSignal,
            AlgorithmTag::Popularity,
        ] {
            enabled.insert(tag, true);
        }

        let mut default_weights = HashMap::new();
        default_weights.insert(AlgorithmTag::Semantic, 0.4);
        default_weights.insert(AlgorithmTag::Collaborative, 0.3);
        default_weights.insert(AlgorithmTag::Pagerank, 0.3);

        Self {
            enabled,
            default_weights,
            semantic_similarity_threshold: 0.7,
            collaborative_min_shared_items: 3,
            collaborative_min_correlation: 0.5,
            collaborative_top_neighbors: 50,
            pagerank_damping: 0.85,
            pagerank_max_iterations: 20,
            pagerank_tolerance: 1e-4,
            graph_signal_min_propagation_strength: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiversityConfig {
    pub intra_list_diversity_threshold: f64,
    pub category_max_items: usize,
    pub serendipity_ratio: f64,
    pub max_similarity_threshold: f64,
}

impl Default for DiversityConfig {
    fn default() -> Self {
        Self {
            intra_list_diversity_threshold: 0.3,
            category_max_items: 3,
            serendipity_ratio: 0.15,
            max_similarity_threshold: 0.8,
        }
    }
}

/// Cache TTLs per §4.10. Expressed in seconds; `None` means "no TTL".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub item_metadata_ttl_secs: u64,
    pub item_embedding_ttl_secs: u64,
    pub semantic_results_ttl_secs: u64,
    pub collaborative_similarities_ttl_secs: u64,
    pub pagerank_results_ttl_secs: u64,
    pub graph_signal_community_ttl_secs: u64,
    pub orchestrator_response_ttl_secs: u64,
    pub job_terminal_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            item_metadata_ttl_secs: 3600,
            item_embedding_ttl_secs: 86_400,
            semantic_results_ttl_secs: 1800,
            collaborative_similarities_ttl_secs: 3600,
            pagerank_results_ttl_secs: 1800,
            graph_signal_community_ttl_secs: 7200,
            orchestrator_response_ttl_secs: 900,
            job_terminal_ttl_secs: 86_400,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub worker_count: usize,
    pub queue_size: usize,
    pub max_retries: u32,
    pub allowed_kinds: Vec<crate::model::ContentKind>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_count: 5,
            queue_size: 100,
            max_retries: 3,
            allowed_kinds: crate::model::ContentKind::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackConfig {
    pub explicit_workers: usize,
    pub implicit_workers: usize,
    pub batch_size: usize,
    pub batch_interval_secs: u64,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            explicit_workers: 10,
            implicit_workers: 5,
            batch_size: 100,
            batch_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub text_dimension: usize,
    pub image_dimension: usize,
    pub fused_dimension: usize,
    pub model_version: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            text_dimension: 384,
            image_dimension: 512,
            fused_dimension: 768,
            model_version: "synthetic-v1".to_string(),
        }
    }
}
