//! Vector math domain logic, no I/O.
//!
//! Every function here is pure: given the same inputs it returns the same
//! outputs, which is what lets the recommendation-scoring properties in the
//! test suite hold without standing up any infrastructure.

use pirex_types::Embedding;

/// Cosine similarity between two embeddings of equal dimension.
///
/// Both embeddings are already unit-normalized per the `Embedding`
/// invariant, so this reduces to a dot product, but the function does not
/// assume that: it divides by the product of norms so it stays correct if
/// called with `Embedding::zero` or a vector built outside the normal
/// constructors.
pub fn cosine_similarity(a: &Embedding, b: &Embedding) -> f64 {
    if a.dim() != b.dim() {
        return 0.0;
    }
    let (a, b) = (a.as_slice(), b.as_slice());
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = (a.iter().map(|v| v * v).sum::<f32>()).sqrt();
    let norm_b = (b.iter().map(|v| v * v).sum::<f32>()).sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot as f64 / (norm_a as f64 * norm_b as f64)).clamp(-1.0, 1.0)
}

/// Average of a non-empty slice of same-dimension embeddings, re-normalized
/// to unit length. Returns `None` if the slice is empty or the average is
/// the zero vector (opposing vectors cancelling out).
pub fn centroid(embeddings: &[Embedding]) -> Option<Embedding> {
    let dim = embeddings.first()?.dim();
    let mut sum = vec![0.0f32; dim];
    for e in embeddings {
        if e.dim() != dim {
            continue;
        }
        for (s, v) in sum.iter_mut().zip(e.as_slice()) {
            *s += v;
        }
    }
    Embedding::normalized(sum)
}

/// Blend `old` and `new` as `alpha * new + (1 - alpha) * old`, re-normalized
/// to unit length. Falls back to `old` if the blend collapses to zero.
pub fn blend(old: &Embedding, new: &Embedding, alpha: f64) -> Embedding {
    if old.dim() != new.dim() {
        return old.clone();
    }
    let alpha = alpha.clamp(0.0, 1.0) as f32;
    let blended: Vec<f32> = old
        .as_slice()
        .iter()
        .zip(new.as_slice())
        .map(|(o, n)| (1.0 - alpha) * o + alpha * n)
        .collect();
    Embedding::normalized(blended).unwrap_or_else(|| old.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_have_similarity_one() {
        let e = Embedding::normalized(vec![1.0, 2.0, 3.0]).unwrap();
        assert!((cosine_similarity(&e, &e) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_have_similarity_zero() {
        let a = Embedding::normalized(vec![1.0, 0.0]).unwrap();
        let b = Embedding::normalized(vec![0.0, 1.0]).unwrap();
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn opposite_vectors_have_similarity_minus_one() {
        let a = Embedding::normalized(vec![1.0, 0.0]).unwrap();
        let b = Embedding::normalized(vec![-1.0, 0.0]).unwrap();
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn mismatched_dimensions_yield_zero() {
        let a = Embedding::normalized(vec![1.0, 0.0]).unwrap();
        let b = Embedding::normalized(vec![1.0, 0.0, 0.0]).unwrap();
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn blend_moves_toward_new_vector() {
        let old = Embedding::normalized(vec![1.0, 0.0]).unwrap();
        let new = Embedding::normalized(vec![0.0, 1.0]).unwrap();
        let blended = blend(&old, &new, 0.5);
        let sim_to_new = cosine_similarity(&blended, &new);
        let sim_to_old = cosine_similarity(&blended, &old);
        assert!((sim_to_new - sim_to_old).abs() < 1e-6);
    }
}
