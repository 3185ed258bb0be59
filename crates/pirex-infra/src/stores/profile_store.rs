//! The user profile store (C1's "profile store" capability set): durable
//! `UserProfile` rows, created lazily on first interaction per §3's
//! lifecycle note.
//!
//! Two independent writers touch the same row — C8 rewrites the preference
//! vector in place, C9 rewrites the algorithm-weight overrides and
//! reliability score — so persistence alone isn't enough to avoid a lost
//! update; `ProfileManager` in `crate::profile` adds the per-user advisory
//! lock that serializes those two read-modify-write cycles, the same way
//! `JobManager` adds cache-aside dual-writes on top of `JobStore`.

use std::collections::HashMap;

use pirex_types::{AlgorithmTag, Embedding, PirexError, Result, UserId, UserProfile};
use sqlx::{Row, SqlitePool};

#[async_trait::async_trait]
pub trait UserProfileStore: Send + Sync {
    /// Fetch a profile, creating a fresh zero-vector one of `dim` dimensions
    /// if none exists yet.
    async fn get_or_create(&self, user: UserId, dim: usize) -> Result<UserProfile>;
    async fn save(&self, profile: &UserProfile) -> Result<()>;
}

pub struct SqliteUserProfileStore {
    pool: SqlitePool,
}

impl SqliteUserProfileStore {
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.initialize_schema().await?;
        Ok(store)
    }

    async fn initialize_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_profiles (
                id TEXT PRIMARY KEY,
                preference_vector BLOB NOT NULL,
                interaction_count INTEGER NOT NULL,
                last_interaction TEXT,
                reliability_score INTEGER NOT NULL,
                algorithm_weight_overrides TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| PirexError::transient(format!("schema init failed: {e}")))?;
        Ok(())
    }

    fn row_to_profile(row: &sqlx::sqlite::SqliteRow) -> Result<UserProfile> {
        let vector_blob: Vec<u8> = row.try_get("preference_vector").map_err(|e| PirexError::fatal(e.to_string()))?;
        let raw: Vec<f32> = bincode::deserialize(&vector_blob).map_err(|e| PirexError::fatal(e.to_string()))?;
        let preference_vector = Embedding::from_unit(raw)
            .ok_or_else(|| PirexError::fatal("stored preference vector is malformed"))?;
        let overrides_str: Option<String> = row.try_get("algorithm_weight_overrides").ok();
        let algorithm_weight_overrides = overrides_str
            .filter(|s| !s.is_empty())
            .and_then(|s| serde_json::from_str::<HashMap<AlgorithmTag, f64>>(&s).ok());

        Ok(UserProfile {
            id: row.try_get("id").map_err(|e| PirexError::fatal(e.to_string()))?,
            preference_vector,
            interaction_count: row.try_get::<i64, _>("interaction_count").map_err(|e| PirexError::fatal(e.to_string()))? as u64,
            last_interaction: row.try_get("last_interaction").ok(),
            reliability_score: row.try_get::<i64, _>("reliability_score").map_err(|e| PirexError::fatal(e.to_string()))? as i32,
            algorithm_weight_overrides,
        })
    }
}

#[async_trait::async_trait]
impl UserProfileStore for SqliteUserProfileStore {
    async fn get_or_create(&self, user: UserId, dim: usize) -> Result<UserProfile> {
        let row = sqlx::query("SELECT * FROM user_profiles WHERE id = ?")
            .bind(user)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PirexError::transient(format!("profile lookup failed: {e}")))?;

        match row {
            Some(row) => Self::row_to_profile(&row),
            None => {
                let fresh = UserProfile::new_empty(user, dim);
                self.save(&fresh).await?;
                Ok(fresh)
            }
        }
    }

    async fn save(&self, profile: &UserProfile) -> Result<()> {
        let vector_blob = bincode::serialize(&profile.preference_vector.as_slice().to_vec())
            .map_err(|e| PirexError::fatal(e.to_string()))?;
        let overrides_str = profile
            .algorithm_weight_overrides
            .as_ref()
            .map(|m| serde_json::to_string(m).unwrap_or_default());

        sqlx::query(
            r#"
            INSERT INTO user_profiles
                (id, preference_vector, interaction_count, last_interaction, reliability_score, algorithm_weight_overrides)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                preference_vector = excluded.preference_vector,
                interaction_count = excluded.interaction_count,
                last_interaction = excluded.last_interaction,
                reliability_score = excluded.reliability_score,
                algorithm_weight_overrides = excluded.algorithm_weight_overrides
            "#,
        )
        .bind(profile.id)
        .bind(vector_blob)
        .bind(profile.interaction_count as i64)
        .bind(profile.last_interaction)
        .bind(profile.reliability_score as i64)
        .bind(overrides_str)
        .execute(&self.pool)
        .await
        .map_err(|e| PirexError::transient(format!("profile save failed: {e}")))?;
        Ok(())
    }
}

/// In-process store for tests and local running without a database file.
#[derive(Default)]
pub struct InMemoryUserProfileStore {
    profiles: tokio::sync::RwLock<HashMap<UserId, UserProfile>>,
}

impl InMemoryUserProfileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl UserProfileStore for InMemoryUserProfileStore {
    async fn get_or_create(&self, user: UserId, dim: usize) -> Result<UserProfile> {
        if let Some(profile) = self.profiles.read().await.get(&user) {
            return Ok(profile.clone());
        }
        let fresh = UserProfile::new_empty(user, dim);
        self.profiles.write().await.insert(user, fresh.clone());
        Ok(fresh)
    }

    async fn save(&self, profile: &UserProfile) -> Result<()> {
        self.profiles.write().await.insert(profile.id, profile.clone());
        Ok(())
    }
}
