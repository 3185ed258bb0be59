//! Operational metrics: thin named wrappers over the `metrics` crate's
//! macros, replacing the teacher's hand-rolled performance monitor with the
//! ambient-stack crate chosen for this project (see `DESIGN.md`). Recording
//! call sites stay one-liners; this module is just where the metric names
//! live so they don't drift across the pipeline, orchestrator, and cache.

use std::time::Duration;

pub fn record_pipeline_stage(stage: &'static str, elapsed: Duration) {
    metrics::histogram!("pirex_pipeline_stage_seconds", "stage" => stage).record(elapsed.as_secs_f64());
}

pub fn record_pipeline_outcome(stage: &'static str, outcome: &'static str) {
    metrics::counter!("pirex_pipeline_outcomes_total", "stage" => stage, "outcome" => outcome).increment(1);
}

pub fn record_generator_latency(algorithm: &'static str, elapsed: Duration) {
    metrics::histogram!("pirex_generator_latency_seconds", "algorithm" => algorithm).record(elapsed.as_secs_f64());
}

pub fn record_generator_outcome(algorithm: &'static str, outcome: &'static str) {
    metrics::counter!("pirex_generator_outcomes_total", "algorithm" => algorithm, "outcome" => outcome).increment(1);
}

pub fn record_orchestrator_latency(elapsed: Duration, degraded: bool) {
    metrics::histogram!("pirex_orchestrator_latency_seconds", "degraded" => degraded.to_string()).record(elapsed.as_secs_f64());
}

pub fn record_cache_lookup(kind: &'static str, hit: bool) {
    metrics::counter!("pirex_cache_lookups_total", "kind" => kind, "hit" => hit.to_string()).increment(1);
}

pub fn set_queue_depth(queue: &'static str, depth: u64) {
    metrics::gauge!("pirex_queue_depth", "queue" => queue).set(depth as f64);
}

pub fn record_rate_limit_decision(action: &'static str, allowed: bool) {
    metrics::counter!("pirex_rate_limit_decisions_total", "action" => action, "allowed" => allowed.to_string()).increment(1);
}
