//! Feedback processor (C8): the two-lane preference-vector updater, per
//! §4.8. Explicit interactions (rating/like/dislike/purchase) update
//! immediately; implicit ones (click/view/search) batch per user before a
//! single aggregated update. Both lanes go through the same ingress gate:
//! validation, rate limiting, spam filtering.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use pirex_types::{
    Embedding, FeedbackClass, FeedbackConfig, FeedbackEvent, InteractionKind, PirexError, Result, UserId,
};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use pirex_infra::cache_keys;
use pirex_infra::profile::ProfileManager;
use pirex_infra::rate_limit::{SlidingWindowLimiter, SpamFilter};
use pirex_infra::stores::event_log::SharedEventLog;
use pirex_infra::stores::item_store::ItemStore;
use pirex_infra::stores::kv::{CacheTier, SharedCache};
use pirex_infra::stores::profile_store::UserProfileStore;

/// Not in §4.10's TTL table since it governs ingress, not a cached value;
/// a calibration choice rather than a spec-given constant.
const FEEDBACK_RATE_LIMIT: u32 = 120;
const FEEDBACK_RATE_WINDOW: Duration = Duration::from_secs(60);

const FEEDBACK_CHANNEL_CAPACITY: usize = 512;
const PERSIST_MAX_RETRIES: u32 = 3;

pub struct FeedbackDeps<S: UserProfileStore> {
    pub profiles: Arc<ProfileManager<S>>,
    pub items: Arc<dyn ItemStore>,
    pub cache: SharedCache,
    pub event_log: SharedEventLog,
    pub rate_limiter: Arc<SlidingWindowLimiter>,
    pub spam_filter: Arc<SpamFilter>,
    pub config: FeedbackConfig,
}

type ImplicitEvent = (Embedding, InteractionKind, Option<f64>);

pub struct FeedbackProcessor<S: UserProfileStore> {
    deps: Arc<FeedbackDeps<S>>,
    explicit_tx: mpsc::Sender<FeedbackEvent>,
    explicit_rx: Mutex<Option<mpsc::Receiver<FeedbackEvent>>>,
    implicit_tx: mpsc::Sender<FeedbackEvent>,
    implicit_rx: Mutex<Option<mpsc::Receiver<FeedbackEvent>>>,
    implicit_buffers: Mutex<HashMap<UserId, Vec<ImplicitEvent>>>,
    last_seen: Mutex<HashMap<UserId, (DateTime<Utc>, String)>>,
}

impl<S: UserProfileStore + 'static> FeedbackProcessor<S> {
    pub fn new(deps: FeedbackDeps<S>) -> Self {
        let (explicit_tx, explicit_rx) = mpsc::channel(FEEDBACK_CHANNEL_CAPACITY);
        let (implicit_tx, implicit_rx) = mpsc::channel(FEEDBACK_CHANNEL_CAPACITY);
        Self {
            deps: Arc::new(deps),
            explicit_tx,
            explicit_rx: Mutex::new(Some(explicit_rx)),
            implicit_tx,
            implicit_rx: Mutex::new(Some(implicit_rx)),
            implicit_buffers: Mutex::new(HashMap::new()),
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    /// Validates, rate-limits, and spam-checks `event`, then enqueues it
    /// onto the lane its class selects. Rejects with a non-retryable error
    /// on rate-limit/spam, a retryable one if the lane's queue is full.
    pub async fn ingest(&self, event: FeedbackEvent) -> Result<()> {
        self.validate(&event)?;
        self.check_rate_limit(&event).await?;
        self.check_spam(&event).await?;

        let sender = match event.class {
            FeedbackClass::Explicit => &self.explicit_tx,
            FeedbackClass::Implicit => &self.implicit_tx,
        };
        sender.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PirexError::capacity("feedback queue full"),
            mpsc::error::TrySendError::Closed(_) => PirexError::fatal("feedback channel closed"),
        })
    }

    fn validate(&self, event: &FeedbackEvent) -> Result<()> {
        let interaction = &event.interaction;
        if interaction.kind != InteractionKind::Search && interaction.item_id.is_none() {
            return Err(PirexError::validation("feedback event missing item id"));
        }
        Ok(())
    }

    async fn check_rate_limit(&self, event: &FeedbackEvent) -> Result<()> {
        let subject = event.interaction.user_id.to_string();
        if !self.deps.rate_limiter.allow(&subject, "feedback", FEEDBACK_RATE_LIMIT, FEEDBACK_RATE_WINDOW).await {
            return Err(PirexError::validation("feedback rate limit exceeded"));
        }
        Ok(())
    }

    async fn check_spam(&self, event: &FeedbackEvent) -> Result<()> {
        let user = event.interaction.user_id;
        let now = event.interaction.timestamp;
        let context_bucket =
            format!("{:?}:{:?}:{:?}", event.interaction.item_id, event.interaction.kind, event.interaction.value);
        let fingerprint = SpamFilter::fingerprint(&user.to_string(), &context_bucket);

        let mut guard = self.last_seen.lock().await;
        let previous = guard.get(&user).cloned();
        let (last_event_at, repeated) = match previous {
            Some((t, ref fp)) => (Some(t), *fp == fingerprint),
            None => (None, false),
        };
        if !self.deps.spam_filter.is_genuine(now, last_event_at, repeated) {
            return Err(PirexError::validation("feedback rejected as spam"));
        }
        guard.insert(user, (now, fingerprint));
        Ok(())
    }

    /// Spawns the explicit-lane workers, the implicit-lane workers, and the
    /// implicit batch-interval ticker. Returns their join handles so the
    /// caller can await clean shutdown.
    pub fn spawn_workers(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        for _ in 0..self.deps.config.explicit_workers {
            let processor = Arc::clone(self);
            let mut shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => if *shutdown.borrow() { break },
                        event = Self::recv_explicit(&processor) => {
                            match event {
                                Some(event) => processor.process_explicit(event).await,
                                None => break,
                            }
                        }
                    }
                }
            }));
        }

        for _ in 0..self.deps.config.implicit_workers {
            let processor = Arc::clone(self);
            let mut shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => if *shutdown.borrow() { break },
                        event = Self::recv_implicit(&processor) => {
                            match event {
                                Some(event) => processor.buffer_implicit(event).await,
                                None => break,
                            }
                        }
                    }
                }
            }));
        }

        {
            let processor = Arc::clone(self);
            let mut shutdown = shutdown.clone();
            let interval = Duration::from_secs(self.deps.config.batch_interval_secs);
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => if *shutdown.borrow() { break },
                        _ = ticker.tick() => processor.flush_all_implicit().await,
                    }
                }
            }));
        }

        handles
    }

    async fn recv_explicit(processor: &Arc<Self>) -> Option<FeedbackEvent> {
        processor.explicit_rx.lock().await.as_mut()?.recv().await
    }

    async fn recv_implicit(processor: &Arc<Self>) -> Option<FeedbackEvent> {
        processor.implicit_rx.lock().await.as_mut()?.recv().await
    }

    async fn process_explicit(&self, event: FeedbackEvent) {
        if let Err(e) = self.apply_explicit(&event).await {
            tracing::warn!(error = %e, user = %event.interaction.user_id, "explicit feedback update failed, dropping");
            return;
        }
        if let Err(e) = self.deps.event_log.publish_feedback(event).await {
            tracing::warn!(error = %e, "feedback event-log publish failed, continuing");
        }
    }

    async fn apply_explicit(&self, event: &FeedbackEvent) -> Result<()> {
        let interaction = &event.interaction;
        let Some(item_id) = interaction.item_id else { return Ok(()) };

        let mut attempt = 0;
        loop {
            match self.try_apply_explicit(item_id, interaction).await {
                Ok(()) => break,
                Err(e) if e.is_retryable() && attempt < PERSIST_MAX_RETRIES => {
                    attempt += 1;
                    tokio::time::sleep(Duration::from_millis(50 * 2u64.pow(attempt))).await;
                }
                Err(e) => return Err(e),
            }
        }

        self.invalidate_explicit(interaction.user_id).await;
        Ok(())
    }

    async fn try_apply_explicit(&self, item_id: pirex_types::ItemId, interaction: &pirex_types::Interaction) -> Result<()> {
        let item = self.deps.items.get(item_id).await?;
        let Some(item_embedding) = item.embedding else { return Ok(()) };
        let now = interaction.timestamp;
        let kind = interaction.kind;
        let value = interaction.value;

        self.deps
            .profiles
            .update(interaction.user_id, |p| {
                p.preference_vector = pirex_core::feedback::apply_feedback(&p.preference_vector, &item_embedding, kind, value);
                p.interaction_count += 1;
                p.last_interaction = Some(now);
            })
            .await?;
        Ok(())
    }

    /// Explicit updates invalidate every user-specific cache entry §4.8
    /// names: the profile is already refreshed by `ProfileManager::update`,
    /// but recommendations and user-similarity results are caches this
    /// processor owns the invalidation of.
    async fn invalidate_explicit(&self, user: UserId) {
        self.deps.cache.delete_prefix(CacheTier::Warm, &cache_keys::user_recs_prefix(user)).await;
        self.deps.cache.delete(CacheTier::Warm, &cache_keys::user_similarity_key(user)).await;
    }

    async fn buffer_implicit(&self, event: FeedbackEvent) {
        let interaction = &event.interaction;
        let Some(item_id) = interaction.item_id else { return };
        let item = match self.deps.items.get(item_id).await {
            Ok(item) => item,
            Err(e) => {
                tracing::warn!(error = %e, "implicit feedback item lookup failed, dropping");
                return;
            }
        };
        let Some(embedding) = item.embedding else { return };

        let user = interaction.user_id;
        let should_flush = {
            let mut guard = self.implicit_buffers.lock().await;
            let buffer = guard.entry(user).or_default();
            buffer.push((embedding, interaction.kind, interaction.value));
            buffer.len() >= self.deps.config.batch_size
        };
        if should_flush {
            self.flush_user_implicit(user).await;
        }
    }

    async fn flush_all_implicit(&self) {
        let users: Vec<UserId> = self.implicit_buffers.lock().await.keys().copied().collect();
        for user in users {
            self.flush_user_implicit(user).await;
        }
    }

    async fn flush_user_implicit(&self, user: UserId) {
        let events = match self.implicit_buffers.lock().await.remove(&user) {
            Some(events) if !events.is_empty() => events,
            _ => return,
        };

        let result = self
            .deps
            .profiles
            .update(user, |p| {
                p.preference_vector = pirex_core::feedback::apply_feedback_batch(&p.preference_vector, &events);
                p.interaction_count += events.len() as u64;
                p.last_interaction = Some(Utc::now());
            })
            .await;

        match result {
            Ok(_) => self.deps.cache.delete_prefix(CacheTier::Warm, &cache_keys::user_recs_prefix(user)).await,
            Err(e) => tracing::warn!(error = %e, %user, "implicit feedback batch update failed, dropping batch"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pirex_infra::stores::event_log::InMemoryEventLog;
    use pirex_infra::stores::item_store::InMemoryItemStore;
    use pirex_infra::stores::kv::InMemoryTieredCache;
    use pirex_infra::stores::profile_store::InMemoryUserProfileStore;
    use pirex_types::{new_id, CacheConfig, ContentItem, ContentKind, Interaction};

    fn sample_item(embedding: Embedding) -> ContentItem {
        let now = Utc::now();
        ContentItem {
            id: new_id(),
            kind: ContentKind::Article,
            title: "sample".into(),
            description: None,
            image_urls: Vec::new(),
            categories: Vec::new(),
            attributes: Default::default(),
            embedding: Some(embedding),
            quality_score: 0.5,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    async fn processor() -> (Arc<FeedbackProcessor<InMemoryUserProfileStore>>, Arc<InMemoryItemStore>, Arc<ProfileManager<InMemoryUserProfileStore>>) {
        let cache: SharedCache = Arc::new(InMemoryTieredCache::new());
        let items: Arc<InMemoryItemStore> = Arc::new(InMemoryItemStore::default());
        let profiles = Arc::new(ProfileManager::new(InMemoryUserProfileStore::new(), cache.clone(), CacheConfig::default(), 4));
        let deps = FeedbackDeps {
            profiles: profiles.clone(),
            items: items.clone() as Arc<dyn ItemStore>,
            cache,
            event_log: Arc::new(InMemoryEventLog::default()),
            rate_limiter: Arc::new(SlidingWindowLimiter::new()),
            spam_filter: Arc::new(SpamFilter::default()),
            config: FeedbackConfig::default(),
        };
        (Arc::new(FeedbackProcessor::new(deps)), items, profiles)
    }

    fn interaction(user: UserId, item: pirex_types::ItemId, kind: InteractionKind, value: Option<f64>) -> Interaction {
        Interaction {
            id: new_id(),
            user_id: user,
            item_id: Some(item),
            session_id: "s-1".into(),
            kind,
            value,
            query: None,
            context: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn explicit_like_updates_profile_immediately() {
        let (processor, items, profiles) = processor().await;
        let embedding = Embedding::normalized(vec![0.0, 1.0, 0.0, 0.0]).unwrap();
        let item = sample_item(embedding);
        items.upsert(item.clone()).await.unwrap();

        let user = new_id();
        let event = FeedbackEvent {
            interaction: interaction(user, item.id, InteractionKind::Like, None),
            algorithm: None,
            position: None,
            class: FeedbackClass::Explicit,
            sentiment: None,
        };
        processor.apply_explicit(&event).await.unwrap();

        let profile = profiles.get(user).await.unwrap();
        assert_eq!(profile.interaction_count, 1);
        assert!(profile.preference_vector.as_slice()[1] > 0.0);
    }

    #[tokio::test]
    async fn ingest_accepts_a_well_formed_explicit_event() {
        let (processor, items, _profiles) = processor().await;
        let embedding = Embedding::normalized(vec![0.0, 1.0, 0.0, 0.0]).unwrap();
        let item = sample_item(embedding);
        items.upsert(item.clone()).await.unwrap();

        let user = new_id();
        let event = FeedbackEvent {
            interaction: interaction(user, item.id, InteractionKind::Like, None),
            algorithm: None,
            position: None,
            class: FeedbackClass::Explicit,
            sentiment: None,
        };
        processor.ingest(event).await.unwrap();
    }

    #[tokio::test]
    async fn implicit_batch_flushes_once_threshold_reached() {
        let (processor, items, profiles) = processor().await;
        let embedding = Embedding::normalized(vec![1.0, 0.0, 0.0, 0.0]).unwrap();
        let item = sample_item(embedding);
        items.upsert(item.clone()).await.unwrap();
        let user = new_id();

        for _ in 0..processor.deps.config.batch_size {
            processor
                .buffer_implicit(FeedbackEvent {
                    interaction: interaction(user, item.id, InteractionKind::Click, None),
                    algorithm: None,
                    position: None,
                    class: FeedbackClass::Implicit,
                    sentiment: None,
                })
                .await;
        }

        let profile = profiles.get(user).await.unwrap();
        assert_eq!(profile.interaction_count, processor.deps.config.batch_size as u64);
        assert!(processor.implicit_buffers.lock().await.get(&user).is_none());
    }

    #[tokio::test]
    async fn spam_filter_rejects_repeated_identical_event() {
        let (processor, items, _profiles) = processor().await;
        let embedding = Embedding::normalized(vec![0.0, 1.0, 0.0, 0.0]).unwrap();
        let item = sample_item(embedding);
        items.upsert(item.clone()).await.unwrap();

        let user = new_id();
        let make_event = || FeedbackEvent {
            interaction: interaction(user, item.id, InteractionKind::Like, None),
            algorithm: None,
            position: None,
            class: FeedbackClass::Explicit,
            sentiment: None,
        };
        processor.ingest(make_event()).await.unwrap();
        let second = processor.ingest(make_event()).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn search_event_without_item_is_accepted() {
        let (processor, _items, _profiles) = processor().await;
        let user = new_id();
        let event = FeedbackEvent {
            interaction: Interaction {
                id: new_id(),
                user_id: user,
                item_id: None,
                session_id: "s-1".into(),
                kind: InteractionKind::Search,
                value: None,
                query: Some("shoes".into()),
                context: None,
                timestamp: Utc::now(),
            },
            algorithm: None,
            position: None,
            class: FeedbackClass::Implicit,
            sentiment: None,
        };
        processor.ingest(event).await.unwrap();
    }
}
