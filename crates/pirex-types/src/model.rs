//! Data model for the Pirex recommendation core.
//!
//! Types here are the shared vocabulary of every crate in the workspace:
//! the item/user/interaction/job entities stores persist, the scored
//! intermediates generators and the orchestrator pass around, and the
//! experiment/feedback types the learning loop consumes.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ItemId = Uuid;
pub type UserId = Uuid;
pub type SessionId = String;
pub type InteractionId = Uuid;
pub type JobId = Uuid;
pub type ExperimentId = Uuid;

pub fn new_id() -> Uuid {
    Uuid::new_v4()
}

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// A dense, unit-L2-normalized embedding vector.
///
/// The ContentItem invariant that "embedding is present iff active" and
/// that its dimension matches the configured model dimension is enforced
/// at construction time rather than left to convention.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    /// Wrap a vector, re-normalizing it to unit L2 norm. Returns `None` for
    /// a zero vector, which has no meaningful direction.
    pub fn normalized(values: Vec<f32>) -> Option<Self> {
        let norm = (values.iter().map(|v| v * v).sum::<f32>()).sqrt();
        if norm == 0.0 || !norm.is_finite() {
            return None;
        }
        Some(Self(values.into_iter().map(|v| v / norm).collect()))
    }

    /// Wrap an already-normalized vector without re-normalizing, checking
    /// the norm is within tolerance of 1.0.
    pub fn from_unit(values: Vec<f32>) -> Option<Self> {
        let norm = (values.iter().map(|v| v * v).sum::<f32>()).sqrt();
        if (norm - 1.0).abs() > 1e-3 {
            return None;
        }
        Some(Self(values))
    }

    pub fn zero(dim: usize) -> Self {
        Self(vec![0.0; dim])
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|v| *v == 0.0)
    }
}

/// A whitelisted attribute value. Free-form JSON is deliberately not
/// accepted here: the content pipeline's preprocess stage filters incoming
/// attribute maps down to this tagged representation per content kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value")]
pub enum AttributeValue {
    Text(String),
    Number(f64),
    Bool(bool),
    List(Vec<String>),
}

pub type Attributes = HashMap<String, AttributeValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Product,
    Video,
    Article,
    Course,
    Book,
}

impl ContentKind {
    pub const ALL: [ContentKind; 5] = [
        ContentKind::Product,
        ContentKind::Video,
        ContentKind::Article,
        ContentKind::Course,
        ContentKind::Book,
    ];
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: ItemId,
    pub kind: ContentKind,
    pub title: String,
    pub description: Option<String>,
    pub image_urls: Vec<String>,
    pub categories: Vec<String>,
    pub attributes: Attributes,
    /// Present iff `active`; dimension must equal the configured text
    /// embedding dimension.
    pub embedding: Option<Embedding>,
    pub quality_score: f64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContentItem {
    /// Whether this item satisfies its own embedding-presence invariant.
    pub fn embedding_invariant_holds(&self, expected_dim: usize) -> bool {
        match (&self.embedding, self.active) {
            (Some(e), true) => e.dim() == expected_dim,
            (None, false) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub preference_vector: Embedding,
    pub interaction_count: u64,
    pub last_interaction: Option<DateTime<Utc>>,
    /// Integer in [0, 100].
    pub reliability_score: i32,
    pub algorithm_weight_overrides: Option<HashMap<AlgorithmTag, f64>>,
}

impl UserProfile {
    pub fn new_empty(id: UserId, dim: usize) -> Self {
        Self {
            id,
            preference_vector: Embedding::zero(dim),
            interaction_count: 0,
            last_interaction: None,
            reliability_score: 50,
            algorithm_weight_overrides: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserTier {
    New,
    Active,
    Power,
    Inactive,
}

impl UserTier {
    /// Classify a profile per §4.6 step 2. `now` is injected for testability.
    pub fn classify(profile: &UserProfile, now: DateTime<Utc>) -> Self {
        if profile.interaction_count < 5 {
            return UserTier::New;
        }
        if let Some(last) = profile.last_interaction {
            if now.signed_duration_since(last).num_days() > 30 {
                return UserTier::Inactive;
            }
        }
        if profile.interaction_count > 50 {
            return UserTier::Power;
        }
        UserTier::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Rating,
    Like,
    Dislike,
    View,
    Click,
    Search,
    Purchase,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub id: InteractionId,
    pub user_id: UserId,
    pub item_id: Option<ItemId>,
    pub session_id: SessionId,
    pub kind: InteractionKind,
    /// Ratings 1-5, view duration seconds, or progress percent.
    pub value: Option<f64>,
    pub query: Option<String>,
    pub context: Option<HashMap<String, AttributeValue>>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Single,
    Batch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Whether `self -> next` is a legal transition in the §4.3 state machine.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Processing)
                | (Queued, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub total: u64,
    pub processed: u64,
    pub failed: u64,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub detail: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmTag {
    Semantic,
    Collaborative,
    Pagerank,
    GraphSignal,
    Popularity,
}

impl AlgorithmTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlgorithmTag::Semantic => "semantic",
            AlgorithmTag::Collaborative => "collaborative",
            AlgorithmTag::Pagerank => "pagerank",
            AlgorithmTag::GraphSignal => "graph_signal",
            AlgorithmTag::Popularity => "popularity",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgorithmResult {
    pub item_id: ItemId,
    pub raw_score: f64,
    pub confidence: f64,
    pub algorithm: AlgorithmTag,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Explanation {
    pub dominant_algorithm: AlgorithmTag,
    pub contributing_algorithms: Vec<AlgorithmTag>,
    pub evidence_item_ids: Vec<ItemId>,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub item_id: ItemId,
    pub score: f64,
    pub confidence: f64,
    pub position: u32,
    pub algorithms: Vec<AlgorithmTag>,
    pub explanation: Option<Explanation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationResponse {
    pub user_id: UserId,
    pub recommendations: Vec<Recommendation>,
    pub cache_hit: bool,
    pub degraded: bool,
    pub strategy: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentVariant {
    pub id: String,
    pub traffic_share: f64,
    pub is_control: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    Draft,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub id: ExperimentId,
    pub variants: Vec<ExperimentVariant>,
    pub success_metrics: Vec<String>,
    pub min_sample_size: u64,
    pub target_power: f64,
    pub significance_level: f64,
    pub status: ExperimentStatus,
}

impl Experiment {
    /// Invariant 5: traffic shares sum to 1.0 (within tolerance) and exactly
    /// one variant is control.
    pub fn is_well_formed(&self) -> bool {
        let sum: f64 = self.variants.iter().map(|v| v.traffic_share).sum();
        let controls = self.variants.iter().filter(|v| v.is_control).count();
        (sum - 1.0).abs() <= 1e-3 && controls == 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackClass {
    Explicit,
    Implicit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackSentiment {
    Positive,
    Negative,
    NotInterested,
    NotRelevant,
    Inappropriate,
}

/// A Feedback event: a superset of `Interaction` carrying the algorithm tag
/// and displayed position that produced the impression, plus its lane class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackEvent {
    pub interaction: Interaction,
    pub algorithm: Option<AlgorithmTag>,
    pub position: Option<u32>,
    pub class: FeedbackClass,
    pub sentiment: Option<FeedbackSentiment>,
}

impl FeedbackClass {
    pub fn of(kind: InteractionKind) -> Self {
        match kind {
            InteractionKind::Rating
            | InteractionKind::Like
            | InteractionKind::Dislike
            | InteractionKind::Purchase => FeedbackClass::Explicit,
            InteractionKind::View | InteractionKind::Click | InteractionKind::Search => {
                FeedbackClass::Implicit
            }
        }
    }
}
