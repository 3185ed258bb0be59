//! Learning controller (C9): per-user algorithm-weight optimization,
//! experiment assignment, and reliability-score adjustment, per §4.9.
//!
//! Per-(user, algorithm) performance counters and per-(experiment, variant)
//! event counts live in memory, windowed by wall-clock bucket; the pure
//! reward/normalization/hashing math is `pirex_core::weights`. Persisted
//! output (the re-derived weight table, the reliability score) goes through
//! `ProfileManager::update`, which supplies the per-user advisory lock §5
//! requires since C8 writes the same row concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use pirex_core::weights::{self, AlgorithmPerformance};
use pirex_types::{AlgorithmConfig, AlgorithmTag, Experiment, ExperimentId, Result, UserId, UserTier};
use tokio::sync::Mutex;

use pirex_infra::profile::ProfileManager;
use pirex_infra::stores::profile_store::UserProfileStore;

/// Below this many accumulated impressions, a user's personal weights are
/// considered too noisy to trust; segment-level defaults back-fill instead,
/// per §4.9's "segment-level defaults back-fill users with insufficient
/// data." The spec leaves the exact threshold open; 50 is the calibration
/// chosen here.
const MIN_IMPRESSIONS_FOR_PERSONAL_WEIGHTS: u64 = 50;

const WEIGHT_FLOOR: f64 = 0.05;

const MIN_DETECTABLE_DIFFERENCE: f64 = 0.01;
const MIN_SAMPLE_SIZE: u64 = 1000;

#[derive(Debug, Clone, Copy, Default)]
struct ExperimentVariantCounts {
    impressions: u64,
    clicks: u64,
}

impl ExperimentVariantCounts {
    fn ctr(&self) -> f64 {
        if self.impressions == 0 {
            0.0
        } else {
            self.clicks as f64 / self.impressions as f64
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignificanceResult {
    pub variant_id: String,
    pub ctr_delta_vs_control: f64,
    pub significant: bool,
}

pub struct LearningController<S: UserProfileStore> {
    profiles: Arc<ProfileManager<S>>,
    algorithms: AlgorithmConfig,
    user_performance: Mutex<HashMap<(UserId, AlgorithmTag), AlgorithmPerformance>>,
    segment_performance: Mutex<HashMap<(UserTier, AlgorithmTag), AlgorithmPerformance>>,
    experiments: Mutex<HashMap<ExperimentId, Experiment>>,
    experiment_counts: Mutex<HashMap<(ExperimentId, String), ExperimentVariantCounts>>,
}

impl<S: UserProfileStore> LearningController<S> {
    pub fn new(profiles: Arc<ProfileManager<S>>, algorithms: AlgorithmConfig) -> Self {
        Self {
            profiles,
            algorithms,
            user_performance: Mutex::new(HashMap::new()),
            segment_performance: Mutex::new(HashMap::new()),
            experiments: Mutex::new(HashMap::new()),
            experiment_counts: Mutex::new(HashMap::new()),
        }
    }

    fn enabled_algorithms(&self) -> Vec<AlgorithmTag> {
        self.algorithms.enabled.iter().filter(|(_, enabled)| **enabled).map(|(tag, _)| *tag).collect()
    }

    /// Record one impression of `algorithm` recommending to `user`, counted
    /// against both that user's personal counters and their segment's.
    pub async fn record_impression(&self, user: UserId, tier: UserTier, algorithm: AlgorithmTag) {
        self.user_performance.lock().await.entry((user, algorithm)).or_default().impressions += 1;
        self.segment_performance.lock().await.entry((tier, algorithm)).or_default().impressions += 1;
    }

    pub async fn record_click(&self, user: UserId, tier: UserTier, algorithm: AlgorithmTag) {
        self.user_performance.lock().await.entry((user, algorithm)).or_default().clicks += 1;
        self.segment_performance.lock().await.entry((tier, algorithm)).or_default().clicks += 1;
    }

    pub async fn record_conversion(&self, user: UserId, tier: UserTier, algorithm: AlgorithmTag) {
        self.user_performance.lock().await.entry((user, algorithm)).or_default().conversions += 1;
        self.segment_performance.lock().await.entry((tier, algorithm)).or_default().conversions += 1;
    }

    /// Folds a new satisfaction sample into a running mean, avoided doing a
    /// full EMA since the reward formula only needs a representative average
    /// over the window.
    pub async fn record_satisfaction(&self, user: UserId, tier: UserTier, algorithm: AlgorithmTag, sample: f64) {
        for (key, map) in [
            (Some((user, algorithm)), None),
            (None, Some((tier, algorithm))),
        ] {
            if let Some(key) = key {
                let mut guard = self.user_performance.lock().await;
                let perf = guard.entry(key).or_default();
                perf.satisfaction = blend_running_mean(perf.satisfaction, sample, perf.impressions.max(1));
            }
            if let Some(key) = map {
                let mut guard = self.segment_performance.lock().await;
                let perf = guard.entry(key).or_default();
                perf.satisfaction = blend_running_mean(perf.satisfaction, sample, perf.impressions.max(1));
            }
        }
    }

    /// The weight table the orchestrator should fuse with for this request:
    /// an explicit per-request override on the profile, else the learned
    /// per-user weights persisted by a prior `retrain_user`, else the
    /// segment default, else the static config default.
    pub async fn weights_for(&self, user: UserId, tier: UserTier, profile_overrides: Option<&HashMap<AlgorithmTag, f64>>) -> HashMap<AlgorithmTag, f64> {
        if let Some(overrides) = profile_overrides {
            if !overrides.is_empty() {
                return overrides.clone();
            }
        }

        let enabled = self.enabled_algorithms();
        let user_total: u64 = {
            let guard = self.user_performance.lock().await;
            enabled.iter().map(|tag| guard.get(&(user, *tag)).map(|p| p.impressions).unwrap_or(0)).sum()
        };

        if user_total >= MIN_IMPRESSIONS_FOR_PERSONAL_WEIGHTS {
            let guard = self.user_performance.lock().await;
            let performance: HashMap<AlgorithmTag, AlgorithmPerformance> =
                enabled.iter().map(|tag| (*tag, guard.get(&(user, *tag)).copied().unwrap_or_default())).collect();
            return weights::normalize_weights(&performance, &enabled, WEIGHT_FLOOR);
        }

        let guard = self.segment_performance.lock().await;
        let segment_total: u64 = enabled.iter().map(|tag| guard.get(&(tier, *tag)).map(|p| p.impressions).unwrap_or(0)).sum();
        if segment_total > 0 {
            let performance: HashMap<AlgorithmTag, AlgorithmPerformance> =
                enabled.iter().map(|tag| (*tag, guard.get(&(tier, *tag)).copied().unwrap_or_default())).collect();
            return weights::normalize_weights(&performance, &enabled, WEIGHT_FLOOR);
        }

        self.algorithms.default_weights.clone()
    }

    /// Re-derive and persist `user`'s algorithm weights from their
    /// accumulated performance, under the profile's advisory lock (§5).
    /// Falls back to segment defaults rather than writing an override when
    /// the user's own data is still too sparse, so a near-empty table never
    /// overwrites a more reliable segment signal.
    pub async fn retrain_user(&self, user: UserId, tier: UserTier) -> Result<()> {
        let weights = self.weights_for(user, tier, None).await;
        self.profiles.update(user, |p| p.algorithm_weight_overrides = Some(weights)).await?;
        Ok(())
    }

    pub async fn adjust_reliability(&self, user: UserId, delta: i32) -> Result<i32> {
        let profile = self.profiles.update(user, |p| p.reliability_score = weights::adjust_reliability(p.reliability_score, delta)).await?;
        Ok(profile.reliability_score)
    }

    pub async fn register_experiment(&self, experiment: Experiment) {
        self.experiments.lock().await.insert(experiment.id, experiment);
    }

    /// `AssignUserToExperiment`: a stable variant assignment via
    /// `hash(user_id || exp_id) mod 10000`, or `None` if the experiment is
    /// unknown or not `Running`.
    pub async fn assign_variant(&self, user: UserId, experiment_id: ExperimentId) -> Option<String> {
        let experiments = self.experiments.lock().await;
        let experiment = experiments.get(&experiment_id)?;
        if experiment.status != pirex_types::ExperimentStatus::Running {
            return None;
        }
        let bands: Vec<(String, f64)> = experiment.variants.iter().map(|v| (v.id.clone(), v.traffic_share)).collect();
        weights::assign_variant(&user.to_string(), &experiment_id.to_string(), &bands).map(|s| s.to_string())
    }

    pub async fn record_experiment_event(&self, experiment_id: ExperimentId, variant_id: &str, clicked: bool) {
        let mut guard = self.experiment_counts.lock().await;
        let counts = guard.entry((experiment_id, variant_id.to_string())).or_default();
        counts.impressions += 1;
        if clicked {
            counts.clicks += 1;
        }
    }

    /// Significance of every non-control variant's CTR delta against
    /// control, per §4.9's declared thresholds.
    pub async fn check_significance(&self, experiment_id: ExperimentId) -> Vec<SignificanceResult> {
        let experiments = self.experiments.lock().await;
        let Some(experiment) = experiments.get(&experiment_id) else { return Vec::new() };
        let Some(control) = experiment.variants.iter().find(|v| v.is_control) else { return Vec::new() };

        let counts = self.experiment_counts.lock().await;
        let control_counts = counts.get(&(experiment_id, control.id.clone())).copied().unwrap_or_default();

        experiment
            .variants
            .iter()
            .filter(|v| !v.is_control)
            .map(|v| {
                let variant_counts = counts.get(&(experiment_id, v.id.clone())).copied().unwrap_or_default();
                let delta = variant_counts.ctr() - control_counts.ctr();
                SignificanceResult {
                    variant_id: v.id.clone(),
                    ctr_delta_vs_control: delta,
                    significant: weights::is_significant(delta, variant_counts.impressions, MIN_DETECTABLE_DIFFERENCE, MIN_SAMPLE_SIZE),
                }
            })
            .collect()
    }
}

fn blend_running_mean(current: f64, sample: f64, count: u64) -> f64 {
    let n = count as f64;
    current + (sample - current) / n
}
