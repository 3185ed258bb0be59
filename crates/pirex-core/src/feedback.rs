//! Preference-vector update math: the feedback-weight table, the
//! action-dependent learning-rate table, and the blend formula itself. No
//! I/O; the feedback processor in `pirex-cognitive` is the caller that owns
//! persistence and cache invalidation.

use pirex_types::{Embedding, InteractionKind};

/// Feedback weight `w` for an interaction, given its optional numeric value
/// (rating 1-5, or view duration in seconds). Returns `None` for kinds that
/// don't update the preference vector (search has no item).
pub fn feedback_weight(kind: InteractionKind, value: Option<f64>) -> Option<f64> {
    match kind {
        InteractionKind::Rating => value.map(|v| (v - 2.5) / 2.5),
        InteractionKind::Like => Some(1.0),
        InteractionKind::Dislike => Some(-1.0),
        InteractionKind::Click => Some(0.3),
        InteractionKind::View => value.map(|duration_s| (0.1 * (duration_s / 60.0)).min(1.0)),
        InteractionKind::Purchase => Some(2.0),
        InteractionKind::Search => None,
    }
}

/// Learning rate `alpha` for an interaction. Rating scales with its own
/// value; all other kinds use a fixed rate.
pub fn learning_rate(kind: InteractionKind, value: Option<f64>) -> f64 {
    match kind {
        InteractionKind::Rating => 0.1 * 2.0 * value.unwrap_or(0.0) / 5.0,
        InteractionKind::Like => 0.15,
        InteractionKind::Dislike => 0.18,
        InteractionKind::Click => 0.05,
        InteractionKind::View => 0.03,
        InteractionKind::Purchase => 0.3,
        InteractionKind::Search => 0.0,
    }
}

/// Apply one feedback event's preference-vector update: `p' = alpha * f + (1
/// - alpha) * p`, where `f = w * e`, re-unit-normalized. Returns the
/// unchanged vector if the interaction kind carries no feedback weight.
///
/// `w` is folded into the blend directly rather than via `vector::blend`
/// (which takes two unit vectors): wrapping `w * e` in an `Embedding` first
/// would re-normalize it to unit length and discard `w`'s magnitude,
/// leaving only its sign — collapsing a duration-capped view weight of
/// 0.05 and a full-strength purchase weight of 2.0 to an identical update.
pub fn apply_feedback(
    current: &Embedding,
    item_embedding: &Embedding,
    kind: InteractionKind,
    value: Option<f64>,
) -> Embedding {
    let Some(w) = feedback_weight(kind, value) else {
        return current.clone();
    };
    if current.dim() != item_embedding.dim() {
        return current.clone();
    }
    let alpha = learning_rate(kind, value).clamp(0.0, 1.0) as f32;
    let w = w as f32;

    let blended: Vec<f32> = current
        .as_slice()
        .iter()
        .zip(item_embedding.as_slice())
        .map(|(p, e)| (1.0 - alpha) * p + alpha * w * e)
        .collect();
    Embedding::normalized(blended).unwrap_or_else(|| current.clone())
}

/// Aggregate a batch of same-user implicit events into a single preference
/// vector update, applied in chronological order so later events dominate
/// per the standard exponential blend, matching the batch-is-equivalent-to
/// sequential-application invariant.
pub fn apply_feedback_batch(
    current: &Embedding,
    events: &[(Embedding, InteractionKind, Option<f64>)],
) -> Embedding {
    let mut vector = current.clone();
    for (item_embedding, kind, value) in events {
        vector = apply_feedback(&vector, item_embedding, *kind, *value);
    }
    vector
}
