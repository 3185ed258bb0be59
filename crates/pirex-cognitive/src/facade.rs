//! The recommendation-core facade (§6): the single entry point the
//! transport layer calls into. Wires the orchestrator (C6/C7), the
//! feedback processor (C8), the learning controller (C9), the content
//! pipeline (C4), and the job manager (C3) behind the six external
//! operations, and is where raw interactions turn into graph edges (§4.1)
//! and learning-controller performance signals (§4.9) before reaching the
//! feedback lane.

use std::sync::Arc;

use pirex_types::{
    ContentItem, FeedbackEvent, Interaction, InteractionKind, Job, JobId, PirexError, Result, UserId, UserTier,
};

use pirex_infra::jobs::{JobManager, JobProgress, JobStore};
use pirex_infra::profile::ProfileManager;
use pirex_infra::stores::graph_store::{rating_edge_weight, view_edge_weight, EdgeKind, GraphStore, NEUTRAL_EDGE_WEIGHT};
use pirex_infra::stores::profile_store::UserProfileStore;

use crate::feedback::FeedbackProcessor;
use crate::learning::LearningController;
use crate::orchestrator::{Orchestrator, RecommendRequest};
use crate::pipeline::ContentPipeline;

/// §6's `RecordInteraction` request shape: one explicit event, a batch of
/// implicit ones, or a mix — the facade treats all of them uniformly.
pub struct InteractionBatch {
    pub interactions: Vec<Interaction>,
}

/// §6's `RecordInteraction` response: the ids the core accepted, in
/// request order. A caller can diff this against its own ids to learn
/// which interactions were dropped (the facade only drops on a hard
/// store failure; partial success is normal for a batch).
pub struct RecordedInteractions {
    pub interaction_ids: Vec<pirex_types::InteractionId>,
}

pub struct PirexFacade<P: UserProfileStore + 'static, J: JobStore + 'static> {
    orchestrator: Arc<Orchestrator<P>>,
    feedback: Arc<FeedbackProcessor<P>>,
    learning: Arc<LearningController<P>>,
    profiles: Arc<ProfileManager<P>>,
    pipeline: Arc<ContentPipeline<J>>,
    jobs: Arc<JobManager<J>>,
    graph: Arc<dyn GraphStore>,
}

impl<P: UserProfileStore + 'static, J: JobStore + 'static> PirexFacade<P, J> {
    pub fn new(
        orchestrator: Arc<Orchestrator<P>>,
        feedback: Arc<FeedbackProcessor<P>>,
        learning: Arc<LearningController<P>>,
        profiles: Arc<ProfileManager<P>>,
        pipeline: Arc<ContentPipeline<J>>,
        jobs: Arc<JobManager<J>>,
        graph: Arc<dyn GraphStore>,
    ) -> Self {
        Self { orchestrator, feedback, learning, profiles, pipeline, jobs, graph }
    }

    /// `Recommend` (§6). `request.count` must already be validated by the
    /// transport layer against the `[1,100]` range; the facade re-checks it
    /// here since it's the last line of defense before the orchestrator.
    pub async fn recommend(&self, request: RecommendRequest) -> Result<pirex_types::RecommendationResponse> {
        if request.count == 0 || request.count > 100 {
            return Err(PirexError::validation("count must be in [1, 100]"));
        }
        self.orchestrator.recommend(&request).await
    }

    /// `RecommendBatch` (§6). At most 50 requests; each is handled
    /// independently and a failure in one does not drop the others, since
    /// the operation's contract is "list of responses" rather than an
    /// all-or-nothing batch.
    pub async fn recommend_batch(&self, requests: Vec<RecommendRequest>) -> Result<Vec<Result<pirex_types::RecommendationResponse>>> {
        if requests.is_empty() {
            return Err(PirexError::validation("batch recommend requires at least one request"));
        }
        if requests.len() > 50 {
            return Err(PirexError::validation("batch recommend accepts at most 50 requests"));
        }
        let mut responses = Vec::with_capacity(requests.len());
        for request in requests {
            responses.push(self.recommend(request).await);
        }
        Ok(responses)
    }

    /// `IngestContent`, single-item form (§6).
    pub async fn ingest_content(&self, item: ContentItem) -> Result<Job> {
        self.pipeline.submit(item).await
    }

    /// `IngestContent`, batch form (§6). `items.len()` must not exceed 100;
    /// `ContentPipeline::submit_batch` already enforces this.
    pub async fn ingest_content_batch(&self, items: Vec<ContentItem>) -> Result<Job> {
        self.pipeline.submit_batch(items).await
    }

    /// `GetJob` (§6).
    pub async fn get_job(&self, job_id: JobId) -> Result<JobProgress> {
        self.jobs.get(job_id).await
    }

    /// `RecordInteraction` (§6). Writes a graph edge for every interaction
    /// (the orchestrator's exclusion step and the collaborative/pagerank/
    /// graph-signal generators all read off this graph) and rolls implicit
    /// engagement into the learning controller's per-algorithm performance
    /// counters when the interaction names the algorithm that produced the
    /// impression (carried in `Interaction::context` as `"algorithm"` by
    /// the transport layer, since `Interaction` itself has no such field).
    pub async fn record_interaction(&self, batch: InteractionBatch) -> Result<RecordedInteractions> {
        if batch.interactions.is_empty() {
            return Err(PirexError::validation("interaction batch requires at least one event"));
        }
        let mut ids = Vec::with_capacity(batch.interactions.len());
        for interaction in &batch.interactions {
            self.record_graph_edge(interaction).await?;
            self.maybe_record_learning_signal(interaction).await;
            ids.push(interaction.id);
        }
        Ok(RecordedInteractions { interaction_ids: ids })
    }

    async fn record_graph_edge(&self, interaction: &Interaction) -> Result<()> {
        let Some(item_id) = interaction.item_id else {
            // Search interactions carry no item id and have nothing to graph.
            return Ok(());
        };
        let (kind, weight, rating) = match interaction.kind {
            InteractionKind::Rating | InteractionKind::Like | InteractionKind::Dislike | InteractionKind::Purchase => {
                let rating = interaction.value.unwrap_or(0.0);
                (EdgeKind::Rated, rating_edge_weight(rating), Some(rating))
            }
            InteractionKind::View => {
                let progress = interaction.value.unwrap_or(0.0);
                (EdgeKind::Viewed, view_edge_weight(progress), None)
            }
            InteractionKind::Click | InteractionKind::Search => (EdgeKind::Neutral, NEUTRAL_EDGE_WEIGHT, None),
        };
        self.graph.record_edge(interaction.user_id, item_id, kind, weight, rating).await
    }

    async fn maybe_record_learning_signal(&self, interaction: &Interaction) {
        let Some(algorithm) = interaction_algorithm_tag(interaction) else {
            return;
        };
        let profile = match self.profiles.get(interaction.user_id).await {
            Ok(profile) => profile,
            Err(_) => return,
        };
        let tier = UserTier::classify(&profile, pirex_types::now());
        match interaction.kind {
            InteractionKind::Click => self.learning.record_click(interaction.user_id, tier, algorithm).await,
            InteractionKind::Purchase => self.learning.record_conversion(interaction.user_id, tier, algorithm).await,
            _ => {}
        }
    }

    /// `RecordFeedback` (§6). Enqueues onto the feedback processor's
    /// explicit or implicit lane per the event's class; the ack here means
    /// "accepted for processing", not "preference vector updated" — that
    /// happens asynchronously on the lane's worker pool.
    pub async fn record_feedback(&self, event: FeedbackEvent) -> Result<()> {
        self.feedback.ingest(event).await
    }
}

/// Recovers the algorithm tag an impression was attributed to, if the
/// transport layer stashed one in `context["algorithm"]`. Interactions with
/// no recorded impression (e.g. a user typing a search query) simply don't
/// feed the learning controller.
fn interaction_algorithm_tag(interaction: &Interaction) -> Option<pirex_types::AlgorithmTag> {
    let context = interaction.context.as_ref()?;
    let value = context.get("algorithm")?;
    match value {
        pirex_types::AttributeValue::Text(tag) => serde_json::from_value(serde_json::Value::String(tag.clone())).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;

    use pirex_infra::embedding::DeterministicHashEmbedder;
    use pirex_infra::jobs::SqliteJobStore;
    use pirex_infra::rate_limit::{SlidingWindowLimiter, SpamFilter};
    use pirex_infra::stores::graph_store::SqliteGraphStore;
    use pirex_infra::stores::profile_store::InMemoryUserProfileStore;
    use pirex_infra::stores::{InMemoryEventLog, InMemoryItemStore, InMemoryTieredCache};
    use pirex_types::{AlgorithmConfig, CacheConfig, DiversityConfig, EmbeddingConfig, FeedbackClass, FeedbackConfig, PipelineConfig};

    use crate::feedback::FeedbackDeps;
    use crate::generators::semantic::SemanticGenerator;
    use crate::generators::GeneratorDeps;
    use crate::orchestrator::OrchestratorDeps;
    use crate::pipeline::PipelineDeps;

    async fn facade() -> PirexFacade<InMemoryUserProfileStore, SqliteJobStore> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        let job_store = SqliteJobStore::new(pool.clone()).await.unwrap();
        let cache: pirex_infra::stores::kv::SharedCache = Arc::new(InMemoryTieredCache::new());
        let cache_config = CacheConfig::default();

        let item_store: Arc<dyn pirex_infra::stores::ItemStore> = Arc::new(InMemoryItemStore::new());
        let graph_store: Arc<dyn GraphStore> = Arc::new(SqliteGraphStore::new(pool).await.unwrap());
        let event_log: Arc<dyn pirex_infra::stores::EventLog> = Arc::new(InMemoryEventLog::new());

        let profile_store = InMemoryUserProfileStore::new();
        let profiles = Arc::new(ProfileManager::new(profile_store, cache.clone(), cache_config.clone(), 8));

        let algorithms = AlgorithmConfig::default();
        let learning = Arc::new(LearningController::new(profiles.clone(), algorithms.clone()));

        let mut generators: std::collections::HashMap<pirex_types::AlgorithmTag, Arc<dyn crate::generators::CandidateGenerator>> =
            std::collections::HashMap::new();
        let generator_deps = Arc::new(GeneratorDeps {
            item_store: item_store.clone(),
            graph_store: graph_store.clone(),
            cache: cache.clone(),
            algorithms: algorithms.clone(),
            cache_config: cache_config.clone(),
            model_version: "test".to_string(),
        });
        generators.insert(pirex_types::AlgorithmTag::Semantic, Arc::new(SemanticGenerator::new(generator_deps.clone())));

        let orchestrator = Arc::new(Orchestrator::new(OrchestratorDeps {
            item_store: item_store.clone(),
            graph_store: graph_store.clone(),
            cache: cache.clone(),
            cache_config: cache_config.clone(),
            diversity_config: DiversityConfig::default(),
            generators,
            generator_deps,
            profiles: profiles.clone(),
            learning: learning.clone(),
            model_version: "test".to_string(),
        }));

        let feedback = Arc::new(FeedbackProcessor::new(FeedbackDeps {
            profiles: profiles.clone(),
            items: item_store.clone(),
            cache: cache.clone(),
            event_log: event_log.clone(),
            rate_limiter: Arc::new(SlidingWindowLimiter::new()),
            spam_filter: Arc::new(SpamFilter::default()),
            config: FeedbackConfig::default(),
        }));

        let jobs_for_pipeline_pool = sqlx::sqlite::SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        let jobs_for_pipeline = Arc::new(JobManager::new(
            SqliteJobStore::new(jobs_for_pipeline_pool).await.unwrap(),
            cache.clone(),
            cache_config.clone(),
        ));
        let pipeline = Arc::new(ContentPipeline::new(Arc::new(PipelineDeps {
            event_log,
            item_store,
            embedding: Arc::new(DeterministicHashEmbedder::new(384, 512)),
            cache: cache.clone(),
            cache_config: cache_config.clone(),
            pipeline_config: PipelineConfig::default(),
            embedding_config: EmbeddingConfig::default(),
            jobs: jobs_for_pipeline,
        })));

        let jobs = Arc::new(JobManager::new(job_store, cache, cache_config));
        PirexFacade::new(orchestrator, feedback, learning, profiles, pipeline, jobs, graph_store)
    }

    fn interaction(user: UserId, item: pirex_types::ItemId, kind: InteractionKind, value: Option<f64>) -> Interaction {
        Interaction {
            id: pirex_types::new_id(),
            user_id: user,
            item_id: Some(item),
            session_id: "s1".to_string(),
            kind,
            value,
            query: None,
            context: None,
            timestamp: pirex_types::now(),
        }
    }

    #[tokio::test]
    async fn recommend_rejects_out_of_range_count() {
        let facade = facade().await;
        let request = RecommendRequest {
            user_id: pirex_types::new_id(),
            count: 0,
            context: crate::orchestrator::RecommendContext::Home,
            content_kind: None,
            categories: None,
            excludes: HashSet::new(),
            explain: false,
            seed_item_id: None,
            deadline: Duration::from_millis(500),
        };
        assert!(facade.recommend(request).await.is_err());
    }

    #[tokio::test]
    async fn record_interaction_writes_a_rated_edge() {
        let facade = facade().await;
        let user = pirex_types::new_id();
        let item = pirex_types::new_id();
        let batch = InteractionBatch { interactions: vec![interaction(user, item, InteractionKind::Rating, Some(4.0))] };
        let recorded = facade.record_interaction(batch).await.unwrap();
        assert_eq!(recorded.interaction_ids.len(), 1);

        let excluded = facade.graph.items_rated_at_least(user, f64::NEG_INFINITY).await.unwrap();
        assert_eq!(excluded, vec![item]);
    }

    #[tokio::test]
    async fn record_feedback_ingests_an_explicit_event() {
        let facade = facade().await;
        let user = pirex_types::new_id();
        let item = pirex_types::new_id();
        let event = FeedbackEvent {
            interaction: interaction(user, item, InteractionKind::Like, None),
            algorithm: Some(pirex_types::AlgorithmTag::Semantic),
            position: Some(1),
            class: FeedbackClass::Explicit,
            sentiment: None,
        };
        facade.record_feedback(event).await.unwrap();
    }

    #[tokio::test]
    async fn record_interaction_rejects_empty_batch() {
        let facade = facade().await;
        assert!(facade.record_interaction(InteractionBatch { interactions: vec![] }).await.is_err());
    }
}
