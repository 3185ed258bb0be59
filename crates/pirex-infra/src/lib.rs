//! Infrastructure layer: concrete implementations of the stores
//! abstraction (C1), the rate limiter and spam filter (C2), the durable job
//! manager (C3), the embedding backend contract, operational metrics, and
//! configuration loading. Everything here is I/O-facing; the pure
//! algorithms it calls into live in `pirex_core`.

pub mod cache_keys;
pub mod config;
pub mod embedding;
pub mod jobs;
pub mod metrics;
pub mod profile;
pub mod rate_limit;
pub mod stores;

pub use cache_keys::{
    algorithm_results_key, cache_kind_for_algorithm, item_embedding_key, item_metadata_key, job_key, profile_key,
    user_recs_key, user_recs_prefix, user_similarity_key, CacheKind,
};
pub use embedding::{DeterministicHashEmbedder, EmbeddingBackend};
pub use jobs::{JobManager, JobProgress, JobStore, SqliteJobStore};
pub use profile::ProfileManager;
pub use rate_limit::{SlidingWindowLimiter, SpamFilter};
pub use stores::{
    EdgeKind, EventLog, GraphNode, GraphStore, InMemoryEventLog, InMemoryItemStore, InMemoryTieredCache,
    InMemoryUserProfileStore, IngestionMessage, ItemFilter, ItemStore, SharedCache, SharedEventLog, SimilarityHit,
    SqliteGraphStore, SqliteItemStore, SqliteUserProfileStore, TieredCache, UserProfileStore,
};
