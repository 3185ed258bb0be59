//! Score normalization, fusion, and calibration domain logic.
//!
//! These are the pure-math steps of the orchestration pipeline: once every
//! candidate generator has produced raw, incomparable scores, this module
//! turns them into a single ranked, calibrated list. No I/O, no knowledge
//! of stores or caches.

use std::cmp::Ordering;

use pirex_types::{AlgorithmResult, AlgorithmTag, ItemId};

/// Min-max normalize a set of raw scores for one algorithm into `[0, 1]`.
/// A degenerate set (all equal, or a single element) normalizes to 1.0 for
/// every element rather than dividing by zero.
pub fn min_max_normalize(results: &[AlgorithmResult]) -> Vec<f64> {
    if results.is_empty() {
        return Vec::new();
    }
    let min = results.iter().map(|r| r.raw_score).fold(f64::INFINITY, f64::min);
    let max = results
        .iter()
        .map(|r| r.raw_score)
        .fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    results
        .iter()
        .map(|r| if range <= 1e-12 { 1.0 } else { (r.raw_score - min) / range })
        .collect()
}

/// A normalized contribution from one algorithm toward one item's fused score.
#[derive(Debug, Clone)]
pub struct ScoredContribution {
    pub item_id: ItemId,
    pub algorithm: AlgorithmTag,
    pub normalized_score: f64,
    pub confidence: f64,
}

/// Fused, pre-calibration score for a single item. `confidence` is the mean
/// confidence across the algorithms that actually contributed (weight > 0),
/// used only as `rank_order`'s secondary tie-break per §4.6.
#[derive(Debug, Clone)]
pub struct FusedScore {
    pub item_id: ItemId,
    pub score: f64,
    pub confidence: f64,
    pub contributing_algorithms: Vec<AlgorithmTag>,
}

/// Weighted fusion: `score(item) = sum(weight(algorithm) * normalized_score * confidence)`
/// across every contribution for that item, where `weight` comes from the
/// caller-supplied per-(user, algorithm) weight table. Algorithms absent
/// from the table contribute nothing, per the fallback-weight invariant
/// being the caller's responsibility to apply before calling this.
pub fn weighted_fuse(
    contributions: &[ScoredContribution],
    weights: &std::collections::HashMap<AlgorithmTag, f64>,
) -> Vec<FusedScore> {
    use std::collections::HashMap;

    struct Accumulator {
        score: f64,
        confidence_sum: f64,
        confidence_count: usize,
        algorithms: Vec<AlgorithmTag>,
    }

    let mut by_item: HashMap<ItemId, Accumulator> = HashMap::new();
    for c in contributions {
        let w = weights.get(&c.algorithm).copied().unwrap_or(0.0);
        if w <= 0.0 {
            continue;
        }
        let entry = by_item.entry(c.item_id).or_insert(Accumulator {
            score: 0.0,
            confidence_sum: 0.0,
            confidence_count: 0,
            algorithms: Vec::new(),
        });
        entry.score += w * c.normalized_score * c.confidence;
        entry.confidence_sum += c.confidence;
        entry.confidence_count += 1;
        entry.algorithms.push(c.algorithm);
    }

    by_item
        .into_iter()
        .map(|(item_id, acc)| FusedScore {
            item_id,
            score: acc.score,
            confidence: if acc.confidence_count > 0 { acc.confidence_sum / acc.confidence_count as f64 } else { 0.0 },
            contributing_algorithms: acc.algorithms,
        })
        .collect()
}

/// Logistic calibration `sigma(k * (x - 0.5))`, mapping a fused score into
/// a probability-like `[0, 1]` range with a steepness of `k`.
pub fn logistic_calibrate(x: f64, k: f64) -> f64 {
    1.0 / (1.0 + (-k * (x - 0.5)).exp())
}

/// Order two fused scores for final ranking per §4.6's stated total order:
/// higher fused score first, ties broken by higher confidence, remaining
/// ties broken by lexicographically smaller item id for determinism.
pub fn rank_order(a: &FusedScore, b: &FusedScore) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.confidence.partial_cmp(&a.confidence).unwrap_or(Ordering::Equal))
        .then_with(|| a.item_id.cmp(&b.item_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn result(item: ItemId, score: f64) -> AlgorithmResult {
        AlgorithmResult {
            item_id: item,
            raw_score: score,
            confidence: 1.0,
            algorithm: AlgorithmTag::Semantic,
        }
    }

    #[test]
    fn min_max_normalize_spans_zero_to_one() {
        let items: Vec<_> = (0..3).map(|_| Uuid::new_v4()).collect();
        let results = vec![
            result(items[0], 10.0),
            result(items[1], 20.0),
            result(items[2], 30.0),
        ];
        let normalized = min_max_normalize(&results);
        assert_eq!(normalized[0], 0.0);
        assert_eq!(normalized[2], 1.0);
        assert!((normalized[1] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn degenerate_scores_normalize_to_one() {
        let item = Uuid::new_v4();
        let results = vec![result(item, 5.0)];
        assert_eq!(min_max_normalize(&results), vec![1.0]);
    }

    #[test]
    fn weighted_fuse_accumulates_across_algorithms() {
        let item = Uuid::new_v4();
        let contributions = vec![
            ScoredContribution {
                item_id: item,
                algorithm: AlgorithmTag::Semantic,
                normalized_score: 1.0,
                confidence: 1.0,
            },
            ScoredContribution {
                item_id: item,
                algorithm: AlgorithmTag::Collaborative,
                normalized_score: 1.0,
                confidence: 1.0,
            },
        ];
        let mut weights = std::collections::HashMap::new();
        weights.insert(AlgorithmTag::Semantic, 0.4);
        weights.insert(AlgorithmTag::Collaborative, 0.3);
        let fused = weighted_fuse(&contributions, &weights);
        assert_eq!(fused.len(), 1);
        assert!((fused[0].score - 0.7).abs() < 1e-9);
        assert!((fused[0].confidence - 1.0).abs() < 1e-9);
        assert_eq!(fused[0].contributing_algorithms.len(), 2);
    }

    #[test]
    fn zero_weight_algorithm_does_not_contribute() {
        let item = Uuid::new_v4();
        let contributions = vec![ScoredContribution {
            item_id: item,
            algorithm: AlgorithmTag::Popularity,
            normalized_score: 1.0,
            confidence: 1.0,
        }];
        let weights = std::collections::HashMap::new();
        let fused = weighted_fuse(&contributions, &weights);
        assert!(fused.is_empty());
    }

    #[test]
    fn logistic_calibration_is_centered_at_half() {
        assert!((logistic_calibrate(0.5, 6.0) - 0.5).abs() < 1e-9);
        assert!(logistic_calibrate(1.0, 6.0) > 0.9);
        assert!(logistic_calibrate(0.0, 6.0) < 0.1);
    }

    #[test]
    fn rank_order_breaks_ties_by_confidence_then_id() {
        let a_id = Uuid::new_v4();
        let b_id = Uuid::new_v4();
        let (first_id, second_id) = if a_id < b_id { (a_id, b_id) } else { (b_id, a_id) };
        let higher_confidence = FusedScore {
            item_id: second_id,
            score: 0.5,
            confidence: 0.9,
            contributing_algorithms: vec![AlgorithmTag::Semantic],
        };
        let lower_confidence = FusedScore {
            item_id: first_id,
            score: 0.5,
            confidence: 0.2,
            contributing_algorithms: vec![AlgorithmTag::Semantic],
        };
        assert_eq!(rank_order(&higher_confidence, &lower_confidence), Ordering::Less);
    }

    #[test]
    fn rank_order_falls_back_to_item_id_when_score_and_confidence_tie() {
        let a_id = Uuid::new_v4();
        let b_id = Uuid::new_v4();
        let (first_id, second_id) = if a_id < b_id { (a_id, b_id) } else { (b_id, a_id) };
        let a = FusedScore { item_id: first_id, score: 0.5, confidence: 0.5, contributing_algorithms: vec![] };
        let b = FusedScore { item_id: second_id, score: 0.5, confidence: 0.5, contributing_algorithms: vec![] };
        assert_eq!(rank_order(&a, &b), Ordering::Less);
    }
}
