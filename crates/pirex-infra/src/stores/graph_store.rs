//! The graph store (C1's "graph store" capability set): Pearson user
//! similarity, personalized PageRank, Louvain community detection, and
//! two-hop signal propagation, per §4.1.
//!
//! Persisted layout: a `graph_edges` table holding User->Content edges
//! (`RATED`/`VIEWED`/`INTERACTED_WITH` in spec terms, collapsed here to a
//! `kind` + `weight` column since the math only needs the weight). Per
//! Design Note 3, the in-memory projection handed to `pirex_core::graph`
//! is an id-based `Adjacency<GraphNode>` — never object ownership — built
//! fresh from a bounded read of this table for each request, since the
//! graph algorithms need the whole projected subgraph in memory anyway and
//! sqlite has no native graph-traversal operator to push this into.

use std::collections::{HashMap, HashSet};

use pirex_core::graph::{self, Adjacency};
use pirex_types::{ItemId, PirexError, Result, UserId};
use sqlx::{Row, SqlitePool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GraphNode {
    User(UserId),
    Item(ItemId),
}

#[derive(Debug, Clone, Copy)]
pub enum EdgeKind {
    Rated,
    Viewed,
    Neutral,
}

impl EdgeKind {
    fn as_str(self) -> &'static str {
        match self {
            EdgeKind::Rated => "rated",
            EdgeKind::Viewed => "viewed",
            EdgeKind::Neutral => "neutral",
        }
    }
}

#[async_trait::async_trait]
pub trait GraphStore: Send + Sync {
    /// Record a User->Content edge. `weight` is the caller-computed edge
    /// weight per §4.1: `rating/5`, view progress, or `0.5` for neutral
    /// interactions (click/search with no rating).
    async fn record_edge(&self, user: UserId, item: ItemId, kind: EdgeKind, weight: f32, rating: Option<f64>) -> Result<()>;

    /// Pearson correlation between `user` and every other user with at
    /// least `min_shared` commonly-rated items and correlation at or above
    /// `min_correlation`, sorted by descending correlation, truncated to
    /// `top_k`.
    async fn similar_users(&self, user: UserId, min_shared: usize, min_correlation: f64, top_k: usize) -> Result<Vec<(UserId, f64)>>;

    /// The full known User/Content adjacency projection, used directly by
    /// Louvain (which needs the whole graph, not a user-seeded subgraph).
    async fn full_projection(&self) -> Result<Adjacency<GraphNode>>;

    /// A user-centric subgraph: `seed` + its `top_similar` nearest
    /// neighbors by Pearson correlation + everything they've rated/viewed,
    /// with edges weighted per §4.1. Feeds personalized PageRank.
    async fn user_subgraph(&self, seed: UserId, top_similar: usize, min_shared: usize, min_correlation: f64) -> Result<Adjacency<GraphNode>>;

    /// Items `user` rated at or above `min_rating`.
    async fn items_rated_at_least(&self, user: UserId, min_rating: f64) -> Result<Vec<ItemId>>;

    /// Every user who rated `item` at or above `min_rating`.
    async fn raters_at_least(&self, item: ItemId, min_rating: f64) -> Result<Vec<UserId>>;

    /// All ratings given by any of `users`, keyed by item — the data the
    /// collaborative generator needs to compute a correlation-weighted
    /// average rating per candidate item without re-deriving Pearson
    /// correlation's own shared-ratings map.
    async fn ratings_by_items(&self, users: &[UserId]) -> Result<HashMap<ItemId, Vec<(UserId, f64)>>>;
}

pub struct SqliteGraphStore {
    pool: SqlitePool,
}

impl SqliteGraphStore {
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.initialize_schema().await?;
        Ok(store)
    }

    async fn initialize_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS graph_edges (
                user_id TEXT NOT NULL,
                item_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                weight REAL NOT NULL,
                rating REAL,
                PRIMARY KEY (user_id, item_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| PirexError::transient(format!("schema init failed: {e}")))?;
        Ok(())
    }

    async fn all_edges(&self) -> Result<Vec<(UserId, ItemId, f32, Option<f64>)>> {
        let rows = sqlx::query("SELECT user_id, item_id, weight, rating FROM graph_edges")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| PirexError::transient(format!("edge scan failed: {e}")))?;
        rows.iter()
            .map(|row| {
                Ok((
                    row.try_get::<UserId, _>("user_id").map_err(|e| PirexError::fatal(e.to_string()))?,
                    row.try_get::<ItemId, _>("item_id").map_err(|e| PirexError::fatal(e.to_string()))?,
                    row.try_get::<f64, _>("weight").map_err(|e| PirexError::fatal(e.to_string()))? as f32,
                    row.try_get::<Option<f64>, _>("rating").map_err(|e| PirexError::fatal(e.to_string()))?,
                ))
            })
            .collect()
    }

    fn ratings_by_user(edges: &[(UserId, ItemId, f32, Option<f64>)]) -> HashMap<UserId, HashMap<ItemId, f64>> {
        let mut out: HashMap<UserId, HashMap<ItemId, f64>> = HashMap::new();
        for (user, item, _, rating) in edges {
            if let Some(r) = rating {
                out.entry(*user).or_default().insert(*item, *r);
            }
        }
        out
    }

    fn projection_from_edges(edges: &[(UserId, ItemId, f32, Option<f64>)]) -> Adjacency<GraphNode> {
        let mut adjacency: Adjacency<GraphNode> = HashMap::new();
        for (user, item, weight, _) in edges {
            let user_node = GraphNode::User(*user);
            let item_node = GraphNode::Item(*item);
            adjacency.entry(user_node).or_default().push((item_node, *weight));
            adjacency.entry(item_node).or_default().push((user_node, *weight));
        }
        adjacency
    }
}

#[async_trait::async_trait]
impl GraphStore for SqliteGraphStore {
    async fn record_edge(&self, user: UserId, item: ItemId, kind: EdgeKind, weight: f32, rating: Option<f64>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO graph_edges (user_id, item_id, kind, weight, rating)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(user_id, item_id) DO UPDATE SET
                kind = excluded.kind, weight = excluded.weight, rating = excluded.rating
            "#,
        )
        .bind(user)
        .bind(item)
        .bind(kind.as_str())
        .bind(weight as f64)
        .bind(rating)
        .execute(&self.pool)
        .await
        .map_err(|e| PirexError::transient(format!("record_edge failed: {e}")))?;
        Ok(())
    }

    async fn similar_users(&self, user: UserId, min_shared: usize, min_correlation: f64, top_k: usize) -> Result<Vec<(UserId, f64)>> {
        let edges = self.all_edges().await?;
        let ratings = Self::ratings_by_user(&edges);
        let Some(target) = ratings.get(&user) else { return Ok(Vec::new()) };

        let mut scored: Vec<(UserId, f64)> = ratings
            .iter()
            .filter(|(other, _)| **other != user)
            .filter_map(|(other, other_ratings)| graph::pearson_correlation(target, other_ratings, min_shared).map(|c| (*other, c)))
            .filter(|(_, c)| *c >= min_correlation)
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn full_projection(&self) -> Result<Adjacency<GraphNode>> {
        let edges = self.all_edges().await?;
        Ok(Self::projection_from_edges(&edges))
    }

    async fn user_subgraph(&self, seed: UserId, top_similar: usize, min_shared: usize, min_correlation: f64) -> Result<Adjacency<GraphNode>> {
        let neighbors = self.similar_users(seed, min_shared, min_correlation, top_similar).await?;
        let mut relevant_users: HashSet<UserId> = neighbors.iter().map(|(u, _)| *u).collect();
        relevant_users.insert(seed);

        let edges = self.all_edges().await?;
        let filtered: Vec<_> = edges.into_iter().filter(|(user, ..)| relevant_users.contains(user)).collect();
        Ok(Self::projection_from_edges(&filtered))
    }

    async fn items_rated_at_least(&self, user: UserId, min_rating: f64) -> Result<Vec<ItemId>> {
        let edges = self.all_edges().await?;
        Ok(edges
            .into_iter()
            .filter(|(u, _, _, rating)| *u == user && rating.map(|r| r >= min_rating).unwrap_or(false))
            .map(|(_, item, _, _)| item)
            .collect())
    }

    async fn raters_at_least(&self, item: ItemId, min_rating: f64) -> Result<Vec<UserId>> {
        let edges = self.all_edges().await?;
        Ok(edges
            .into_iter()
            .filter(|(_, i, _, rating)| *i == item && rating.map(|r| r >= min_rating).unwrap_or(false))
            .map(|(user, ..)| user)
            .collect())
    }

    async fn ratings_by_items(&self, users: &[UserId]) -> Result<HashMap<ItemId, Vec<(UserId, f64)>>> {
        let wanted: HashSet<UserId> = users.iter().copied().collect();
        let edges = self.all_edges().await?;
        let mut by_item: HashMap<ItemId, Vec<(UserId, f64)>> = HashMap::new();
        for (user, item, _, rating) in edges {
            if let Some(r) = rating {
                if wanted.contains(&user) {
                    by_item.entry(item).or_default().push((user, r));
                }
            }
        }
        Ok(by_item)
    }
}

/// Edge weight for a rating interaction, per §4.1: `rating / 5`.
pub fn rating_edge_weight(rating: f64) -> f32 {
    (rating / 5.0) as f32
}

/// Edge weight for a view interaction: the view-progress fraction.
pub fn view_edge_weight(progress: f64) -> f32 {
    progress.clamp(0.0, 1.0) as f32
}

/// Edge weight for any other ("neutral") interaction.
pub const NEUTRAL_EDGE_WEIGHT: f32 = 0.5;

#[cfg(test)]
mod tests {
    use super::*;
    use pirex_types::new_id;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_store() -> SqliteGraphStore {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        SqliteGraphStore::new(pool).await.unwrap()
    }

    #[tokio::test]
    async fn similar_users_requires_minimum_overlap() {
        let store = memory_store().await;
        let (u1, u2) = (new_id(), new_id());
        let item = new_id();
        store.record_edge(u1, item, EdgeKind::Rated, 1.0, Some(5.0)).await.unwrap();
        store.record_edge(u2, item, EdgeKind::Rated, 1.0, Some(5.0)).await.unwrap();

        let similar = store.similar_users(u1, 3, 0.5, 50).await.unwrap();
        assert!(similar.is_empty());
    }

    #[tokio::test]
    async fn full_projection_has_bidirectional_edges() {
        let store = memory_store().await;
        let (user, item) = (new_id(), new_id());
        store.record_edge(user, item, EdgeKind::Rated, 1.0, Some(5.0)).await.unwrap();
        let projection = store.full_projection().await.unwrap();
        assert!(projection.contains_key(&GraphNode::User(user)));
        assert!(projection.contains_key(&GraphNode::Item(item)));
    }

    #[test]
    fn rating_weight_is_scaled_to_unit_interval() {
        assert!((rating_edge_weight(5.0) - 1.0).abs() < 1e-6);
        assert!((rating_edge_weight(2.5) - 0.5).abs() < 1e-6);
    }
}
