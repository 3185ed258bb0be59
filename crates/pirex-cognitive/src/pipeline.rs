//! Content pipeline (C4): a fixed worker pool consuming the
//! `content-ingestion` topic, running the five-stage
//! validate -> preprocess -> embed -> persist -> cache sequence per §4.4.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use pirex_core::text::{
    compute_quality_score, detect_language, extract_emails, extract_keywords, extract_numeric_tokens, extract_urls,
    normalize_category, remove_stop_words, strip_html, tokenize, whitelist_attributes, QualitySignals,
};
use pirex_types::{
    AttributeValue, CacheConfig, ContentItem, EmbeddingConfig, Job, JobId, JobKind, JobStatus, PipelineConfig,
    PirexError, Result,
};

use pirex_infra::cache_keys::{item_embedding_key, item_metadata_key, CacheKind};
use pirex_infra::embedding::EmbeddingBackend;
use pirex_infra::jobs::{JobManager, JobStore};
use pirex_infra::stores::kv::{set_json, SharedCache};
use pirex_infra::stores::{IngestionMessage, ItemStore, SharedEventLog};

/// Metadata-only projection cached in warm KV, per §4.4 stage 5 ("no
/// embedding" — the embedding is cached separately, in cold KV).
#[derive(serde::Serialize)]
struct ItemMetadataProjection<'a> {
    id: pirex_types::ItemId,
    kind: pirex_types::ContentKind,
    title: &'a str,
    categories: &'a [String],
    quality_score: f64,
    active: bool,
}

pub struct PipelineDeps<S: JobStore> {
    pub event_log: SharedEventLog,
    pub item_store: Arc<dyn ItemStore>,
    pub embedding: Arc<dyn EmbeddingBackend>,
    pub cache: SharedCache,
    pub cache_config: CacheConfig,
    pub pipeline_config: PipelineConfig,
    pub embedding_config: EmbeddingConfig,
    pub jobs: Arc<JobManager<S>>,
}

pub struct ContentPipeline<S: JobStore> {
    deps: Arc<PipelineDeps<S>>,
}

impl<S: JobStore + 'static> ContentPipeline<S> {
    pub fn new(deps: Arc<PipelineDeps<S>>) -> Self {
        Self { deps }
    }

    /// `IngestContent`, single-item form (§6). Creates a job and enqueues
    /// the item on the `content-ingestion` topic; workers pick it up
    /// asynchronously.
    pub async fn submit(&self, item: ContentItem) -> Result<Job> {
        let job = self.deps.jobs.create(JobKind::Single, 1).await?;
        self.deps.event_log.publish_ingestion(item, job.id).await?;
        Ok(job)
    }

    /// `IngestContent`, batch form. `items.len()` must not exceed 100 per §6.
    pub async fn submit_batch(&self, items: Vec<ContentItem>) -> Result<Job> {
        if items.is_empty() {
            return Err(PirexError::validation("batch ingestion requires at least one item"));
        }
        if items.len() > 100 {
            return Err(PirexError::validation("batch ingestion accepts at most 100 items"));
        }
        let job = self.deps.jobs.create(JobKind::Batch, items.len() as u64).await?;
        for item in items {
            self.deps.event_log.publish_ingestion(item, job.id).await?;
        }
        Ok(job)
    }

    /// Spawn the fixed worker pool. Each worker polls the event log in a
    /// loop, backing off briefly when the queue is empty rather than
    /// busy-waiting, per §5's "there is no busy-wait."
    pub fn spawn_workers(self: &Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) -> Vec<tokio::task::JoinHandle<()>> {
        (0..self.deps.pipeline_config.worker_count)
            .map(|_| {
                let pipeline = self.clone();
                let mut shutdown = shutdown.clone();
                tokio::spawn(async move {
                    loop {
                        if *shutdown.borrow() {
                            break;
                        }
                        tokio::select! {
                            _ = shutdown.changed() => {
                                if *shutdown.borrow() {
                                    break;
                                }
                            }
                            _ = pipeline.run_once() => {}
                        }
                    }
                })
            })
            .collect()
    }

    async fn run_once(&self) {
        match self.deps.event_log.poll_ingestion().await {
            Some(message) => self.process_message(message).await,
            None => tokio::time::sleep(Duration::from_millis(50)).await,
        }
    }

    /// Runs the five-stage sequence for one message, acking or nacking it
    /// according to the §4.4 failure table, and reports outcome to C3.
    async fn process_message(&self, message: IngestionMessage) {
        let job_id = message.job_id;
        let _ = self.deps.jobs.transition(job_id, JobStatus::Processing).await;

        let mut item = message.item.clone();
        let mut stage_timings: HashMap<&'static str, Duration> = HashMap::new();

        if let Err(reason) = self.validate(&item) {
            self.deps.event_log.ack_ingestion(item.id).await;
            self.record_item_failure(job_id, &reason).await;
            pirex_infra::metrics::record_pipeline_outcome("validate", "rejected");
            return;
        }

        let preprocess_start = Instant::now();
        let cleaned_text = self.preprocess(&mut item);
        stage_timings.insert("preprocess", preprocess_start.elapsed());
        pirex_infra::metrics::record_pipeline_stage("preprocess", preprocess_start.elapsed());

        let embed_start = Instant::now();
        match self.deps.embedding.embed_text(&cleaned_text).await {
            Ok(embedding) => item.embedding = Some(embedding),
            Err(err) => {
                pirex_infra::metrics::record_pipeline_outcome("embed", "failed");
                self.retry_or_drop(message, "embed", err).await;
                return;
            }
        }
        stage_timings.insert("embed", embed_start.elapsed());
        pirex_infra::metrics::record_pipeline_stage("embed", embed_start.elapsed());

        item.active = true;
        item.updated_at = pirex_types::now();

        let persist_start = Instant::now();
        if let Err(err) = self.deps.item_store.upsert(item.clone()).await {
            pirex_infra::metrics::record_pipeline_outcome("persist", "failed");
            self.retry_or_drop(IngestionMessage { item: message.item, retry_count: message.retry_count, job_id }, "persist", err).await;
            return;
        }
        stage_timings.insert("persist", persist_start.elapsed());
        pirex_infra::metrics::record_pipeline_stage("persist", persist_start.elapsed());

        let cache_start = Instant::now();
        self.cache_item(&item).await;
        stage_timings.insert("cache", cache_start.elapsed());
        pirex_infra::metrics::record_pipeline_stage("cache", cache_start.elapsed());

        self.deps.event_log.ack_ingestion(item.id).await;
        pirex_infra::metrics::record_pipeline_outcome("persist", "succeeded");
        let _ = self.deps.jobs.record_progress(job_id, 1, 0).await;
        self.maybe_complete(job_id).await;
    }

    fn validate(&self, item: &ContentItem) -> std::result::Result<(), String> {
        if item.title.trim().is_empty() {
            return Err("title must not be empty".to_string());
        }
        if !self.deps.pipeline_config.allowed_kinds.contains(&item.kind) {
            return Err(format!("content kind {:?} is not allowed", item.kind));
        }
        Ok(())
    }

    /// Runs §4.4 step 2's extractions and folds their output into the item
    /// rather than discarding it, then returns the cleaned (stop-word-free)
    /// token text that step 3 embeds in place of the raw title/description.
    fn preprocess(&self, item: &mut ContentItem) -> String {
        item.title = strip_html(&item.title);
        item.description = item.description.as_deref().map(strip_html);

        let body = format!("{} {}", item.title, item.description.clone().unwrap_or_default());
        let tokens = remove_stop_words(&tokenize(&body));
        let keywords = extract_keywords(&tokens, 10);
        let emails = extract_emails(&body);
        let urls = extract_urls(&body);
        let numeric_tokens = extract_numeric_tokens(&body);
        let language = detect_language(&body);

        item.categories = item.categories.iter().map(|c| normalize_category(c)).collect();
        item.attributes = whitelist_attributes(item.kind, &item.attributes);

        if !keywords.is_empty() {
            item.attributes.insert("keywords".to_string(), AttributeValue::List(keywords));
        }
        item.attributes.insert("language".to_string(), AttributeValue::Text(language));
        if !emails.is_empty() {
            item.attributes.insert("emails".to_string(), AttributeValue::List(emails));
        }
        if !urls.is_empty() {
            item.attributes.insert("urls".to_string(), AttributeValue::List(urls));
        }
        if !numeric_tokens.is_empty() {
            item.attributes.insert("numeric_tokens".to_string(), AttributeValue::List(numeric_tokens));
        }

        let signals = QualitySignals {
            title_len: item.title.len(),
            has_description: item.description.is_some(),
            image_count: item.image_urls.len(),
            category_count: item.categories.len(),
            attribute_count: item.attributes.len(),
        };
        item.quality_score = compute_quality_score(&signals);

        tokens.join(" ")
    }

    async fn cache_item(&self, item: &ContentItem) {
        let projection = ItemMetadataProjection {
            id: item.id,
            kind: item.kind,
            title: &item.title,
            categories: &item.categories,
            quality_score: item.quality_score,
            active: item.active,
        };
        set_json(
            self.deps.cache.as_ref(),
            CacheKind::ItemMetadata.tier(),
            &item_metadata_key(item.id),
            &projection,
            CacheKind::ItemMetadata.ttl(&self.deps.cache_config),
        )
        .await;

        if let Some(embedding) = &item.embedding {
            set_json(
                self.deps.cache.as_ref(),
                CacheKind::ItemEmbedding.tier(),
                &item_embedding_key(item.id),
                &embedding.as_slice().to_vec(),
                CacheKind::ItemEmbedding.ttl(&self.deps.cache_config),
            )
            .await;
        }
    }

    /// Transient-stage failure: retry with exponential backoff up to the
    /// configured max, then drop to the dead-letter path (logged and acked,
    /// counted as a job failure) per §4.4's failure table.
    async fn retry_or_drop(&self, message: IngestionMessage, stage: &'static str, err: PirexError) {
        let job_id = message.job_id;
        if message.retry_count < self.deps.pipeline_config.max_retries {
            let backoff = Duration::from_millis(50 * 2u64.pow(message.retry_count.min(10)));
            tokio::time::sleep(backoff).await;
            tracing::warn!(stage, retry_count = message.retry_count, error = %err, "retrying transient pipeline failure");
            self.deps.event_log.nack_ingestion(message).await;
            return;
        }

        tracing::error!(stage, item_id = %message.item.id, error = %err, "pipeline stage exhausted retries, dead-lettering item");
        self.deps.event_log.ack_ingestion(message.item.id).await;
        self.record_item_failure(job_id, &format!("{stage} stage failed after max retries: {err}")).await;
    }

    /// Record one item's permanent failure against its job. For a
    /// single-item job this fails the whole job; for a batch job it records
    /// one failed unit and lets the remaining items continue, matching
    /// §4.4's per-message failure table applied to a job that may cover many
    /// messages.
    async fn record_item_failure(&self, job_id: JobId, reason: &str) {
        if let Ok(job) = self.deps.jobs.get(job_id).await {
            if job.job.kind == JobKind::Single {
                let _ = self.deps.jobs.fail(job_id, reason.to_string()).await;
                return;
            }
        }
        let _ = self.deps.jobs.record_progress(job_id, 0, 1).await;
        self.maybe_complete(job_id).await;
    }

    async fn maybe_complete(&self, job_id: JobId) {
        if let Ok(progress) = self.deps.jobs.get(job_id).await {
            let job = &progress.job;
            if job.status == JobStatus::Processing && job.processed + job.failed >= job.total {
                let _ = self.deps.jobs.transition(job_id, JobStatus::Completed).await;
            }
        }
    }
}
