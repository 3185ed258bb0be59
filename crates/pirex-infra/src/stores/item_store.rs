//! The item store (C1's "item store" capability set): typed access to
//! `ContentItem` rows plus cosine-similarity vector search.
//!
//! §4.1's Open Question #2 resolution: sqlite has no native vector index
//! and this crate does not fabricate one, so `SqliteItemStore` filters by
//! the relational predicates in SQL (kind, active, quality threshold) and
//! ranks the filtered rows by cosine similarity in Rust. The embedding is
//! persisted as a bincode-encoded `BLOB`, matching the teacher's
//! `semantic_memory.embedding BLOB` column convention.

use std::collections::HashSet;

use pirex_core::vector::cosine_similarity;
use pirex_types::{ContentItem, ContentKind, Embedding, ItemId, PirexError, Result};
use sqlx::{Row, SqlitePool};

/// One hit from a similarity search: the item id and its cosine similarity
/// to the query embedding, in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct SimilarityHit {
    pub item_id: ItemId,
    pub similarity: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    pub kind: Option<ContentKind>,
    pub categories: Option<Vec<String>>,
    pub active_only: bool,
    pub min_quality: Option<f64>,
    pub exclude: HashSet<ItemId>,
}

#[async_trait::async_trait]
pub trait ItemStore: Send + Sync {
    async fn upsert(&self, item: ContentItem) -> Result<()>;
    async fn get(&self, id: ItemId) -> Result<ContentItem>;
    /// Cosine-similarity search over items matching `filter`, sorted by
    /// descending similarity with item-id tie-break, truncated to `limit`.
    async fn search_similar(&self, query: &Embedding, filter: &ItemFilter, limit: usize) -> Result<Vec<SimilarityHit>>;
    /// Popularity fallback: the `limit` most recently/frequently interacted-with
    /// active items, used by §4.6 step 4's all-failed fallback and the
    /// collaborative generator's cold-start path.
    async fn most_popular(&self, filter: &ItemFilter, limit: usize) -> Result<Vec<ItemId>>;
}

pub struct SqliteItemStore {
    pool: SqlitePool,
}

impl SqliteItemStore {
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.initialize_schema().await?;
        Ok(store)
    }

    async fn initialize_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS content_items (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                image_urls TEXT NOT NULL,
                categories TEXT NOT NULL,
                attributes TEXT NOT NULL,
                embedding BLOB,
                quality_score REAL NOT NULL,
                active INTEGER NOT NULL,
                interaction_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| PirexError::transient(format!("schema init failed: {e}")))?;
        Ok(())
    }

    fn row_to_item(row: &sqlx::sqlite::SqliteRow) -> Result<ContentItem> {
        let kind_str: String = row.try_get("kind").map_err(|e| PirexError::fatal(e.to_string()))?;
        let kind = serde_json::from_str(&format!("\"{kind_str}\"")).map_err(|e| PirexError::fatal(e.to_string()))?;
        let embedding_blob: Option<Vec<u8>> = row.try_get("embedding").ok();
        let embedding = embedding_blob
            .and_then(|b| bincode::deserialize::<Vec<f32>>(&b).ok())
            .and_then(Embedding::from_unit);

        Ok(ContentItem {
            id: row.try_get("id").map_err(|e| PirexError::fatal(e.to_string()))?,
            kind,
            title: row.try_get("title").map_err(|e| PirexError::fatal(e.to_string()))?,
            description: row.try_get("description").ok(),
            image_urls: serde_json::from_str(row.try_get::<String, _>("image_urls").unwrap_or_default().as_str()).unwrap_or_default(),
            categories: serde_json::from_str(row.try_get::<String, _>("categories").unwrap_or_default().as_str()).unwrap_or_default(),
            attributes: serde_json::from_str(row.try_get::<String, _>("attributes").unwrap_or_default().as_str()).unwrap_or_default(),
            embedding,
            quality_score: row.try_get("quality_score").map_err(|e| PirexError::fatal(e.to_string()))?,
            active: row.try_get::<i64, _>("active").map_err(|e| PirexError::fatal(e.to_string()))? != 0,
            created_at: row.try_get("created_at").map_err(|e| PirexError::fatal(e.to_string()))?,
            updated_at: row.try_get("updated_at").map_err(|e| PirexError::fatal(e.to_string()))?,
        })
    }
}

#[async_trait::async_trait]
impl ItemStore for SqliteItemStore {
    async fn upsert(&self, item: ContentItem) -> Result<()> {
        let kind_str = serde_json::to_string(&item.kind)
            .map_err(|e| PirexError::fatal(e.to_string()))?
            .trim_matches('"')
            .to_string();
        let embedding_blob = item
            .embedding
            .as_ref()
            .map(|e| bincode::serialize(&e.as_slice().to_vec()))
            .transpose()
            .map_err(|e| PirexError::fatal(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO content_items
                (id, kind, title, description, image_urls, categories, attributes, embedding,
                 quality_score, active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                title = excluded.title,
                description = excluded.description,
                image_urls = excluded.image_urls,
                categories = excluded.categories,
                attributes = excluded.attributes,
                embedding = excluded.embedding,
                quality_score = excluded.quality_score,
                active = excluded.active,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(item.id)
        .bind(kind_str)
        .bind(&item.title)
        .bind(&item.description)
        .bind(serde_json::to_string(&item.image_urls).unwrap_or_default())
        .bind(serde_json::to_string(&item.categories).unwrap_or_default())
        .bind(serde_json::to_string(&item.attributes).unwrap_or_default())
        .bind(embedding_blob)
        .bind(item.quality_score)
        .bind(item.active as i64)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| PirexError::transient(format!("upsert failed: {e}")))?;
        Ok(())
    }

    async fn get(&self, id: ItemId) -> Result<ContentItem> {
        let row = sqlx::query("SELECT * FROM content_items WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PirexError::transient(format!("get failed: {e}")))?
            .ok_or_else(|| PirexError::not_found(format!("item {id} not found")))?;
        Self::row_to_item(&row)
    }

    async fn search_similar(&self, query: &Embedding, filter: &ItemFilter, limit: usize) -> Result<Vec<SimilarityHit>> {
        let rows = sqlx::query("SELECT * FROM content_items WHERE active = 1")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| PirexError::transient(format!("search failed: {e}")))?;

        let mut hits: Vec<SimilarityHit> = Vec::new();
        for row in &rows {
            let item = match Self::row_to_item(row) {
                Ok(i) => i,
                Err(_) => continue,
            };
            if !item_matches(&item, filter) {
                continue;
            }
            let Some(embedding) = &item.embedding else { continue };
            let similarity = cosine_similarity(query, embedding);
            hits.push(SimilarityHit { item_id: item.id, similarity });
        }

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.item_id.cmp(&b.item_id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn most_popular(&self, filter: &ItemFilter, limit: usize) -> Result<Vec<ItemId>> {
        let rows = sqlx::query("SELECT * FROM content_items WHERE active = 1 ORDER BY interaction_count DESC, id ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| PirexError::transient(format!("popularity query failed: {e}")))?;

        let mut ids = Vec::new();
        for row in &rows {
            if ids.len() >= limit {
                break;
            }
            if let Ok(item) = Self::row_to_item(row) {
                if item_matches(&item, filter) {
                    ids.push(item.id);
                }
            }
        }
        Ok(ids)
    }
}

fn item_matches(item: &ContentItem, filter: &ItemFilter) -> bool {
    if filter.active_only && !item.active {
        return false;
    }
    if let Some(kind) = filter.kind {
        if item.kind != kind {
            return false;
        }
    }
    if let Some(categories) = &filter.categories {
        if !categories.iter().any(|c| item.categories.contains(c)) {
            return false;
        }
    }
    if let Some(min_quality) = filter.min_quality {
        if item.quality_score < min_quality {
            return false;
        }
    }
    if filter.exclude.contains(&item.id) {
        return false;
    }
    true
}

/// In-process store for tests and local running without a database file.
#[derive(Default)]
pub struct InMemoryItemStore {
    items: tokio::sync::RwLock<std::collections::HashMap<ItemId, ContentItem>>,
    interaction_counts: tokio::sync::RwLock<std::collections::HashMap<ItemId, u64>>,
}

impl InMemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn bump_interaction_count(&self, id: ItemId) {
        *self.interaction_counts.write().await.entry(id).or_insert(0) += 1;
    }
}

#[async_trait::async_trait]
impl ItemStore for InMemoryItemStore {
    async fn upsert(&self, item: ContentItem) -> Result<()> {
        self.items.write().await.insert(item.id, item);
        Ok(())
    }

    async fn get(&self, id: ItemId) -> Result<ContentItem> {
        self.items
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| PirexError::not_found(format!("item {id} not found")))
    }

    async fn search_similar(&self, query: &Embedding, filter: &ItemFilter, limit: usize) -> Result<Vec<SimilarityHit>> {
        let items = self.items.read().await;
        let mut hits: Vec<SimilarityHit> = items
            .values()
            .filter(|item| item_matches(item, filter))
            .filter_map(|item| item.embedding.as_ref().map(|e| (item.id, cosine_similarity(query, e))))
            .map(|(item_id, similarity)| SimilarityHit { item_id, similarity })
            .collect();
        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.item_id.cmp(&b.item_id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn most_popular(&self, filter: &ItemFilter, limit: usize) -> Result<Vec<ItemId>> {
        let items = self.items.read().await;
        let counts = self.interaction_counts.read().await;
        let mut ranked: Vec<(ItemId, u64)> = items
            .values()
            .filter(|item| item_matches(item, filter))
            .map(|item| (item.id, counts.get(&item.id).copied().unwrap_or(0)))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(limit);
        Ok(ranked.into_iter().map(|(id, _)| id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pirex_types::new_id;

    fn item(id: ItemId, embedding: Vec<f32>, active: bool) -> ContentItem {
        ContentItem {
            id,
            kind: ContentKind::Article,
            title: "t".into(),
            description: None,
            image_urls: vec![],
            categories: vec![],
            attributes: Default::default(),
            embedding: Embedding::normalized(embedding),
            quality_score: 0.9,
            active,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn in_memory_search_orders_by_similarity_then_id() {
        let store = InMemoryItemStore::new();
        let a = new_id();
        let b = new_id();
        store.upsert(item(a, vec![1.0, 0.0], true)).await.unwrap();
        store.upsert(item(b, vec![0.0, 1.0], true)).await.unwrap();

        let query = Embedding::normalized(vec![1.0, 0.0]).unwrap();
        let hits = store.search_similar(&query, &ItemFilter::default(), 10).await.unwrap();
        assert_eq!(hits[0].item_id, a);
    }

    #[tokio::test]
    async fn inactive_items_are_excluded_from_search() {
        let store = InMemoryItemStore::new();
        let id = new_id();
        store.upsert(item(id, vec![1.0, 0.0], false)).await.unwrap();
        let query = Embedding::normalized(vec![1.0, 0.0]).unwrap();
        let filter = ItemFilter { active_only: true, ..Default::default() };
        let hits = store.search_similar(&query, &filter, 10).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn get_missing_item_is_not_found() {
        let store = InMemoryItemStore::new();
        let err = store.get(new_id()).await.unwrap_err();
        assert_eq!(err.code(), "not_found");
    }
}
