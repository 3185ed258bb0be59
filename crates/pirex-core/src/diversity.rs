//! Diversity filtering domain logic, no I/O.
//!
//! Takes a fused, ranked candidate list and enforces the three diversity
//! constraints: an intra-list similarity cap, a per-category cap, and a
//! reserved serendipity slice. Pure function of its inputs so it is testable
//! without a ranking pipeline behind it.

use pirex_types::{DiversityConfig, Embedding, ItemId};

use crate::vector::cosine_similarity;

/// One ranked candidate entering the diversity filter.
#[derive(Debug, Clone)]
pub struct DiversityCandidate {
    pub item_id: ItemId,
    pub score: f64,
    pub confidence: f64,
    pub embedding: Embedding,
    /// Leaf categories this item belongs to.
    pub categories: Vec<String>,
}

/// Select up to `limit` candidates from `candidates` (assumed pre-sorted by
/// descending fused score, ties already broken) honoring:
///
/// - intra-list diversity: reject a candidate whose max cosine similarity to
///   an already-selected item exceeds `max_similarity_threshold`.
/// - category cap: at most `category_max_items` selections per leaf category.
/// - serendipity: the last `serendipity_ratio` fraction of slots are filled,
///   after the constrained main pass, from the highest-confidence remaining
///   candidates whose categories are least represented in the list so far,
///   still respecting the similarity cap but not the category cap (those
///   slots exist specifically to surface underused categories).
///
/// Candidates that never fit are dropped silently; order is preserved within
/// equivalence classes of the input.
pub fn diversify(
    candidates: &[DiversityCandidate],
    limit: usize,
    config: &DiversityConfig,
) -> Vec<DiversityCandidate> {
    if limit == 0 || candidates.is_empty() {
        return Vec::new();
    }

    let serendipity_slots = ((limit as f64) * config.serendipity_ratio).round() as usize;
    let main_slots = limit.saturating_sub(serendipity_slots);

    let mut selected: Vec<DiversityCandidate> = Vec::with_capacity(limit);
    let mut category_counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    let mut used: Vec<bool> = vec![false; candidates.len()];

    // Main pass: fill main_slots honoring both constraints.
    for (idx, candidate) in candidates.iter().enumerate() {
        if selected.len() >= main_slots {
            break;
        }
        if exceeds_similarity_cap(candidate, &selected, config.max_similarity_threshold) {
            continue;
        }
        if category_cap_exceeded(candidate, &category_counts, config.category_max_items) {
            continue;
        }
        for cat in &candidate.categories {
            *category_counts.entry(cat.clone()).or_insert(0) += 1;
        }
        selected.push(candidate.clone());
        used[idx] = true;
    }

    // Serendipity pass: remaining candidates, ranked by (confidence desc,
    // category underuse), still honoring similarity, not category cap.
    if selected.len() < limit {
        let mut remaining: Vec<(usize, &DiversityCandidate)> = candidates
            .iter()
            .enumerate()
            .filter(|(idx, _)| !used[*idx])
            .collect();

        remaining.sort_by(|(_, a), (_, b)| {
            let underuse_a = category_underuse(a, &category_counts);
            let underuse_b = category_underuse(b, &category_counts);
            underuse_b
                .cmp(&underuse_a)
                .then_with(|| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal))
        });

        for (idx, candidate) in remaining {
            if selected.len() >= limit {
                break;
            }
            if exceeds_similarity_cap(candidate, &selected, config.max_similarity_threshold) {
                continue;
            }
            for cat in &candidate.categories {
                *category_counts.entry(cat.clone()).or_insert(0) += 1;
            }
            selected.push(candidate.clone());
            used[idx] = true;
        }
    }

    // Backfill: if constraints starved the list, relax everything and take
    // the best remaining candidates in input order to reach `limit`.
    if selected.len() < limit {
        for (idx, candidate) in candidates.iter().enumerate() {
            if selected.len() >= limit {
                break;
            }
            if used[idx] {
                continue;
            }
            selected.push(candidate.clone());
        }
    }

    selected
}

fn exceeds_similarity_cap(candidate: &DiversityCandidate, selected: &[DiversityCandidate], threshold: f64) -> bool {
    selected
        .iter()
        .any(|s| cosine_similarity(&candidate.embedding, &s.embedding) > threshold)
}

fn category_cap_exceeded(
    candidate: &DiversityCandidate,
    counts: &std::collections::HashMap<String, usize>,
    cap: usize,
) -> bool {
    candidate
        .categories
        .iter()
        .any(|cat| counts.get(cat).copied().unwrap_or(0) >= cap)
}

/// Lower count so far in `category_counts` means more "underused"; returns a
/// sortable underuse score where higher is more underused.
fn category_underuse(candidate: &DiversityCandidate, counts: &std::collections::HashMap<String, usize>) -> i64 {
    if candidate.categories.is_empty() {
        return 0;
    }
    let total: i64 = candidate
        .categories
        .iter()
        .map(|cat| counts.get(cat).copied().unwrap_or(0) as i64)
        .sum();
    -(total / candidate.categories.len() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn candidate(score: f64, confidence: f64, embedding: Vec<f32>, categories: &[&str]) -> DiversityCandidate {
        DiversityCandidate {
            item_id: Uuid::new_v4(),
            score,
            confidence,
            embedding: Embedding::normalized(embedding).unwrap(),
            categories: categories.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn rejects_near_duplicate_embeddings() {
        let config = DiversityConfig {
            intra_list_diversity_threshold: 0.3,
            category_max_items: 10,
            serendipity_ratio: 0.0,
            max_similarity_threshold: 0.8,
        };
        let candidates = vec![
            candidate(1.0, 1.0, vec![1.0, 0.0], &["a"]),
            candidate(0.9, 1.0, vec![0.99, 0.01], &["a"]),
            candidate(0.8, 1.0, vec![0.0, 1.0], &["b"]),
        ];
        let result = diversify(&candidates, 2, &config);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].categories, vec!["a".to_string()]);
        assert_eq!(result[1].categories, vec!["b".to_string()]);
    }

    #[test]
    fn enforces_category_cap() {
        let config = DiversityConfig {
            intra_list_diversity_threshold: 0.3,
            category_max_items: 1,
            serendipity_ratio: 0.0,
            max_similarity_threshold: 0.99,
        };
        let candidates = vec![
            candidate(1.0, 1.0, vec![1.0, 0.0], &["a"]),
            candidate(0.9, 1.0, vec![0.0, 1.0], &["a"]),
            candidate(0.8, 1.0, vec![0.5, 0.5], &["b"]),
        ];
        let result = diversify(&candidates, 2, &config);
        assert_eq!(result.len(), 2);
        let a_count = result.iter().filter(|c| c.categories.contains(&"a".to_string())).count();
        assert_eq!(a_count, 1);
    }

    #[test]
    fn empty_candidates_yield_empty_result() {
        let config = DiversityConfig {
            intra_list_diversity_threshold: 0.3,
            category_max_items: 3,
            serendipity_ratio: 0.15,
            max_similarity_threshold: 0.8,
        };
        assert!(diversify(&[], 10, &config).is_empty());
    }
}
