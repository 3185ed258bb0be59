//! Stores abstraction (C1): typed access to the item store, graph store,
//! user profile store, tiered KV cache, and event log, per §4.1.

pub mod event_log;
pub mod graph_store;
pub mod item_store;
pub mod kv;
pub mod profile_store;

pub use event_log::{EventLog, InMemoryEventLog, IngestionMessage, SharedEventLog};
pub use graph_store::{EdgeKind, GraphNode, GraphStore, SqliteGraphStore};
pub use item_store::{InMemoryItemStore, ItemFilter, ItemStore, SimilarityHit, SqliteItemStore};
pub use kv::{get_json, set_json, CacheTier, InMemoryTieredCache, SharedCache, TieredCache};
pub use profile_store::{InMemoryUserProfileStore, SqliteUserProfileStore, UserProfileStore};
