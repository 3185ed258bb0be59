//! `pirex`: a thin command-line harness around the recommendation core.
//! Boots a SQLite-backed `PirexFacade` in-process (no separate transport
//! layer — §6 specifies the core's external interfaces but leaves the
//! HTTP/gRPC binding to callers) and dispatches one operation per
//! invocation. Background workers (content pipeline, feedback lanes) are
//! spawned so a long-running `serve` invocation can actually drain queued
//! work; a one-shot command only enqueues and should be followed by
//! `get-job` against a persistent `--database-url` to observe completion.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use sqlx::sqlite::SqlitePoolOptions;

use pirex_cognitive::facade::InteractionBatch;
use pirex_cognitive::feedback::{FeedbackDeps, FeedbackProcessor};
use pirex_cognitive::generators::collaborative::CollaborativeGenerator;
use pirex_cognitive::generators::graph_signal::GraphSignalGenerator;
use pirex_cognitive::generators::pagerank::PagerankGenerator;
use pirex_cognitive::generators::semantic::SemanticGenerator;
use pirex_cognitive::generators::{CandidateGenerator, GeneratorDeps};
use pirex_cognitive::learning::LearningController;
use pirex_cognitive::orchestrator::{Orchestrator, OrchestratorDeps, RecommendContext, RecommendRequest};
use pirex_cognitive::pipeline::{ContentPipeline, PipelineDeps};
use pirex_cognitive::PirexFacade;
use pirex_infra::embedding::DeterministicHashEmbedder;
use pirex_infra::jobs::{JobManager, SqliteJobStore};
use pirex_infra::profile::ProfileManager;
use pirex_infra::rate_limit::{SlidingWindowLimiter, SpamFilter};
use pirex_infra::stores::graph_store::SqliteGraphStore;
use pirex_infra::stores::item_store::SqliteItemStore;
use pirex_infra::stores::kv::{InMemoryTieredCache, SharedCache};
use pirex_infra::stores::profile_store::SqliteUserProfileStore;
use pirex_infra::stores::{InMemoryEventLog, SharedEventLog};
use pirex_types::{AlgorithmTag, ContentItem, FeedbackEvent, Interaction, InteractionKind, UserId};

type Facade = PirexFacade<SqliteUserProfileStore, SqliteJobStore>;

#[derive(Parser)]
#[command(name = "pirex", about = "Multi-algorithm recommendation engine", version)]
struct Cli {
    /// Path to a TOML config file layered over the built-in defaults.
    #[arg(long, global = true)]
    config: Option<String>,
    /// SQLite database file or URL; defaults to an in-memory database that
    /// does not persist across invocations.
    #[arg(long, global = true, default_value = "sqlite::memory:")]
    database_url: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch recommendations for one user.
    Recommend {
        user_id: UserId,
        #[arg(long, default_value_t = 10)]
        count: usize,
        #[arg(long, default_value = "home")]
        context: String,
        #[arg(long)]
        explain: bool,
    },
    /// Ingest a single ContentItem from a JSON file.
    IngestContent { path: String },
    /// Look up a job's progress.
    GetJob { job_id: uuid::Uuid },
    /// Record one interaction (rating/view/click/etc).
    RecordInteraction {
        user_id: UserId,
        item_id: uuid::Uuid,
        #[arg(long, value_enum)]
        kind: InteractionKindArg,
        #[arg(long)]
        value: Option<f64>,
    },
    /// Record an explicit feedback event.
    RecordFeedback {
        user_id: UserId,
        item_id: uuid::Uuid,
        #[arg(long, value_enum)]
        kind: InteractionKindArg,
    },
    /// Run the background workers (pipeline + feedback lanes) and serve a
    /// Prometheus metrics endpoint, for a long-lived deployment.
    Serve {
        #[arg(long, default_value_t = 9090)]
        metrics_port: u16,
    },
}

#[derive(Clone, clap::ValueEnum)]
enum InteractionKindArg {
    Rating,
    Like,
    Dislike,
    View,
    Click,
    Search,
    Purchase,
}

impl From<InteractionKindArg> for InteractionKind {
    fn from(value: InteractionKindArg) -> Self {
        match value {
            InteractionKindArg::Rating => InteractionKind::Rating,
            InteractionKindArg::Like => InteractionKind::Like,
            InteractionKindArg::Dislike => InteractionKind::Dislike,
            InteractionKindArg::View => InteractionKind::View,
            InteractionKindArg::Click => InteractionKind::Click,
            InteractionKindArg::Search => InteractionKind::Search,
            InteractionKindArg::Purchase => InteractionKind::Purchase,
        }
    }
}

fn parse_context(raw: &str) -> Result<RecommendContext> {
    Ok(match raw {
        "home" => RecommendContext::Home,
        "search" => RecommendContext::Search,
        "category" => RecommendContext::Category,
        "product" => RecommendContext::Product,
        "similar" => RecommendContext::Similar,
        other => anyhow::bail!("unknown context '{other}', expected home|search|category|product|similar"),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).json().init();

    let cli = Cli::parse();
    let config = pirex_infra::config::load(cli.config.as_deref()).context("loading configuration")?;
    pirex_infra::config::validate(&config).context("validating configuration")?;

    let built = build_facade(&cli.database_url, &config).await?;

    match cli.command {
        Commands::Recommend { user_id, count, context, explain } => {
            let request = RecommendRequest {
                user_id,
                count,
                context: parse_context(&context)?,
                content_kind: None,
                categories: None,
                excludes: HashSet::new(),
                explain,
                seed_item_id: None,
                deadline: Duration::from_millis(800),
            };
            let response = built.facade.recommend(request).await.map_err(|e| anyhow::anyhow!(e.to_string()))?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::IngestContent { path } => {
            let raw = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            let item: ContentItem = serde_json::from_str(&raw).context("parsing ContentItem JSON")?;
            let job = built.facade.ingest_content(item).await.map_err(|e| anyhow::anyhow!(e.to_string()))?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        Commands::GetJob { job_id } => {
            let progress = built.facade.get_job(job_id).await.map_err(|e| anyhow::anyhow!(e.to_string()))?;
            println!("{}", serde_json::to_string_pretty(&progress)?);
        }
        Commands::RecordInteraction { user_id, item_id, kind, value } => {
            let interaction = Interaction {
                id: pirex_types::new_id(),
                user_id,
                item_id: Some(item_id),
                session_id: "cli".to_string(),
                kind: kind.into(),
                value,
                query: None,
                context: None,
                timestamp: pirex_types::now(),
            };
            let recorded = built
                .facade
                .record_interaction(InteractionBatch { interactions: vec![interaction] })
                .await
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
            println!("recorded: {:?}", recorded.interaction_ids);
        }
        Commands::RecordFeedback { user_id, item_id, kind } => {
            let interaction_kind: InteractionKind = kind.into();
            let interaction = Interaction {
                id: pirex_types::new_id(),
                user_id,
                item_id: Some(item_id),
                session_id: "cli".to_string(),
                kind: interaction_kind,
                value: None,
                query: None,
                context: None,
                timestamp: pirex_types::now(),
            };
            let event = FeedbackEvent {
                class: pirex_types::FeedbackClass::of(interaction_kind),
                interaction,
                algorithm: None,
                position: None,
                sentiment: None,
            };
            built.facade.record_feedback(event).await.map_err(|e| anyhow::anyhow!(e.to_string()))?;
            println!("feedback accepted");
        }
        Commands::Serve { metrics_port } => {
            let builder = PrometheusBuilder::new().with_http_listener(([0, 0, 0, 0], metrics_port));
            builder.install().context("installing Prometheus exporter")?;
            tracing::info!(port = metrics_port, "metrics exporter listening");
            // Workers were already spawned in build_facade; this loop just
            // keeps the process (and its workers) alive.
            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
        }
    }

    Ok(())
}

struct BuiltFacade {
    facade: Facade,
}

async fn build_facade(database_url: &str, config: &pirex_types::PirexConfig) -> Result<BuiltFacade> {
    let pool = SqlitePoolOptions::new().connect(database_url).await.context("connecting to database")?;

    let item_store: Arc<dyn pirex_infra::stores::ItemStore> = Arc::new(SqliteItemStore::new(pool.clone()).await?);
    let graph_store: Arc<dyn pirex_infra::stores::GraphStore> = Arc::new(SqliteGraphStore::new(pool.clone()).await?);
    let event_log: SharedEventLog = Arc::new(InMemoryEventLog::new());
    let cache: SharedCache = Arc::new(InMemoryTieredCache::new());

    let profile_store = SqliteUserProfileStore::new(pool.clone()).await?;
    let profiles =
        Arc::new(ProfileManager::new(profile_store, cache.clone(), config.cache.clone(), config.embedding.fused_dimension));

    let learning = Arc::new(LearningController::new(profiles.clone(), config.algorithms.clone()));

    let generator_deps = Arc::new(GeneratorDeps {
        item_store: item_store.clone(),
        graph_store: graph_store.clone(),
        cache: cache.clone(),
        algorithms: config.algorithms.clone(),
        cache_config: config.cache.clone(),
        model_version: config.embedding.model_version.clone(),
    });
    let mut generators: HashMap<AlgorithmTag, Arc<dyn CandidateGenerator>> = HashMap::new();
    generators.insert(AlgorithmTag::Semantic, Arc::new(SemanticGenerator::new(generator_deps.clone())));
    generators.insert(AlgorithmTag::Collaborative, Arc::new(CollaborativeGenerator::new(generator_deps.clone())));
    generators.insert(AlgorithmTag::Pagerank, Arc::new(PagerankGenerator::new(generator_deps.clone())));
    generators.insert(AlgorithmTag::GraphSignal, Arc::new(GraphSignalGenerator::new(generator_deps.clone())));

    let orchestrator = Arc::new(Orchestrator::new(OrchestratorDeps {
        item_store: item_store.clone(),
        graph_store: graph_store.clone(),
        cache: cache.clone(),
        cache_config: config.cache.clone(),
        diversity_config: config.diversity.clone(),
        generators,
        generator_deps,
        profiles: profiles.clone(),
        learning: learning.clone(),
        model_version: config.embedding.model_version.clone(),
    }));

    let feedback = Arc::new(FeedbackProcessor::new(FeedbackDeps {
        profiles: profiles.clone(),
        items: item_store.clone(),
        cache: cache.clone(),
        event_log: event_log.clone(),
        rate_limiter: Arc::new(SlidingWindowLimiter::new()),
        spam_filter: Arc::new(SpamFilter::default()),
        config: config.feedback.clone(),
    }));
    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    for handle in feedback.spawn_workers(shutdown_rx) {
        // Detached: the process either exits right after this command (the
        // handles are simply dropped) or runs forever under `serve`.
        std::mem::drop(handle);
    }

    let jobs = Arc::new(JobManager::new(SqliteJobStore::new(pool.clone()).await?, cache.clone(), config.cache.clone()));
    let pipeline = Arc::new(ContentPipeline::new(Arc::new(PipelineDeps {
        event_log,
        item_store,
        embedding: Arc::new(DeterministicHashEmbedder::new(config.embedding.text_dimension, config.embedding.image_dimension)),
        cache,
        cache_config: config.cache.clone(),
        pipeline_config: config.pipeline.clone(),
        embedding_config: config.embedding.clone(),
        jobs: jobs.clone(),
    })));
    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    for handle in pipeline.spawn_workers(shutdown_rx) {
        std::mem::drop(handle);
    }

    Ok(BuiltFacade { facade: PirexFacade::new(orchestrator, feedback, learning, profiles, pipeline, jobs, graph_store) })
}
