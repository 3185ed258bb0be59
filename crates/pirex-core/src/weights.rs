//! Learning-controller math: reward-weighted algorithm-weight normalization
//! and stable experiment-assignment hashing. No I/O; `pirex-cognitive::learning`
//! owns the windowed counters this operates on.

use std::collections::HashMap;

use pirex_types::AlgorithmTag;
use sha2::{Digest, Sha256};

/// Per-(algorithm) performance accumulated over a window, used as the
/// reward signal for weight re-derivation.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlgorithmPerformance {
    pub impressions: u64,
    pub clicks: u64,
    pub conversions: u64,
    /// A satisfaction proxy in `[0, 1]`, e.g. mean post-click dwell signal.
    pub satisfaction: f64,
}

impl AlgorithmPerformance {
    /// Reward combines click-through rate, conversion rate, and the
    /// satisfaction proxy in equal thirds; zero-impression algorithms
    /// contribute zero reward rather than dividing by zero.
    pub fn reward(&self) -> f64 {
        if self.impressions == 0 {
            return 0.0;
        }
        let ctr = self.clicks as f64 / self.impressions as f64;
        let conversion_rate = self.conversions as f64 / self.impressions as f64;
        (ctr + conversion_rate + self.satisfaction) / 3.0
    }
}

/// Re-derive per-user algorithm weights by normalizing reward across the
/// enabled algorithm set, applying a floor of `floor` to prevent any
/// algorithm's weight from collapsing to zero, then renormalizing so
/// weights sum to 1.
pub fn normalize_weights(
    performance: &HashMap<AlgorithmTag, AlgorithmPerformance>,
    enabled: &[AlgorithmTag],
    floor: f64,
) -> HashMap<AlgorithmTag, f64> {
    if enabled.is_empty() {
        return HashMap::new();
    }

    let rewards: HashMap<AlgorithmTag, f64> = enabled
        .iter()
        .map(|tag| (*tag, performance.get(tag).map(|p| p.reward()).unwrap_or(0.0)))
        .collect();

    let total_reward: f64 = rewards.values().sum();

    let raw: HashMap<AlgorithmTag, f64> = if total_reward <= 1e-12 {
        let even = 1.0 / enabled.len() as f64;
        enabled.iter().map(|tag| (*tag, even)).collect()
    } else {
        rewards.iter().map(|(tag, r)| (*tag, r / total_reward)).collect()
    };

    let floored: HashMap<AlgorithmTag, f64> = raw.into_iter().map(|(tag, w)| (tag, w.max(floor))).collect();

    let floored_total: f64 = floored.values().sum();
    floored.into_iter().map(|(tag, w)| (tag, w / floored_total)).collect()
}

/// Stable experiment-variant assignment: `hash(user_id || exp_id) mod 10000`,
/// mapped into cumulative variant traffic bands. Uses SHA-256 rather than
/// `std::hash`'s randomized-per-process default so assignment is stable
/// across restarts.
pub fn assign_variant<'a>(user_id: &str, experiment_id: &str, variants: &'a [(String, f64)]) -> Option<&'a str> {
    if variants.is_empty() {
        return None;
    }
    let bucket = stable_bucket(user_id, experiment_id);
    let fraction = bucket as f64 / 10_000.0;

    let mut cumulative = 0.0;
    for (variant_id, traffic_share) in variants {
        cumulative += traffic_share;
        if fraction < cumulative {
            return Some(variant_id.as_str());
        }
    }
    variants.last().map(|(id, _)| id.as_str())
}

/// `hash(user_id || exp_id) mod 10000` via SHA-256, truncated to a `u64`.
pub fn stable_bucket(user_id: &str, experiment_id: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(experiment_id.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[0..8]);
    u64::from_be_bytes(bytes) % 10_000
}

/// Adjust a reliability score by an integer delta, clamped to `[0, 100]`.
pub fn adjust_reliability(current: i32, delta: i32) -> i32 {
    (current + delta).clamp(0, 100)
}

/// Whether an observed CTR delta against control is statistically
/// actionable per the spec's declared thresholds.
pub fn is_significant(ctr_delta: f64, sample_size: u64, min_detectable_difference: f64, min_sample_size: u64) -> bool {
    ctr_delta.abs() > min_detectable_difference && sample_size > min_sample_size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_reward_falls_back_to_even_split() {
        let performance = HashMap::new();
        let enabled = vec![AlgorithmTag::Semantic, AlgorithmTag::Collaborative];
        let weights = normalize_weights(&performance, &enabled, 0.05);
        assert!((weights[&AlgorithmTag::Semantic] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn weights_sum_to_one() {
        let mut performance = HashMap::new();
        performance.insert(
            AlgorithmTag::Semantic,
            AlgorithmPerformance { impressions: 100, clicks: 50, conversions: 5, satisfaction: 0.6 },
        );
        performance.insert(
            AlgorithmTag::Collaborative,
            AlgorithmPerformance { impressions: 100, clicks: 5, conversions: 1, satisfaction: 0.1 },
        );
        let enabled = vec![AlgorithmTag::Semantic, AlgorithmTag::Collaborative];
        let weights = normalize_weights(&performance, &enabled, 0.05);
        let total: f64 = weights.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn floor_prevents_collapse_to_zero() {
        let mut performance = HashMap::new();
        performance.insert(
            AlgorithmTag::Semantic,
            AlgorithmPerformance { impressions: 1000, clicks: 500, conversions: 100, satisfaction: 0.9 },
        );
        let enabled = vec![AlgorithmTag::Semantic, AlgorithmTag::Pagerank];
        let weights = normalize_weights(&performance, &enabled, 0.05);
        assert!(weights[&AlgorithmTag::Pagerank] >= 0.05 - 1e-9);
    }

    #[test]
    fn stable_bucket_is_deterministic() {
        let a = stable_bucket("user-1", "exp-1");
        let b = stable_bucket("user-1", "exp-1");
        assert_eq!(a, b);
        assert!(a < 10_000);
    }

    #[test]
    fn assign_variant_respects_traffic_bands() {
        let variants = vec![("control".to_string(), 1.0)];
        let assigned = assign_variant("user-1", "exp-1", &variants);
        assert_eq!(assigned, Some("control"));
    }

    #[test]
    fn reliability_clamps_to_bounds() {
        assert_eq!(adjust_reliability(95, 20), 100);
        assert_eq!(adjust_reliability(5, -20), 0);
    }
}
