//! Pure progress/ETA formulas for the job manager. No I/O, no clock reads —
//! elapsed time is passed in so the formulas stay testable.

/// Progress percent, floored to an integer in `[0, 100]`.
pub fn progress_percent(processed: u64, failed: u64, total: u64) -> u64 {
    if total == 0 {
        return 0;
    }
    (((processed + failed) as f64 / total as f64) * 100.0).floor() as u64
}

/// Estimated seconds remaining, recomputed from elapsed time and throughput
/// so far. Returns `None` when nothing has been processed yet (rate
/// undefined) or the job is already done.
pub fn estimated_seconds_remaining(elapsed_secs: f64, processed: u64, failed: u64, total: u64) -> Option<f64> {
    if processed == 0 || total <= processed + failed {
        return None;
    }
    let rate = elapsed_secs / processed as f64;
    Some(rate * (total - processed - failed) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_percent_floors() {
        assert_eq!(progress_percent(1, 0, 3), 33);
        assert_eq!(progress_percent(2, 1, 3), 100);
    }

    #[test]
    fn progress_percent_zero_total_is_zero() {
        assert_eq!(progress_percent(0, 0, 0), 0);
    }

    #[test]
    fn eta_is_none_before_any_progress() {
        assert_eq!(estimated_seconds_remaining(10.0, 0, 0, 100), None);
    }

    #[test]
    fn eta_scales_with_remaining_work() {
        let eta = estimated_seconds_remaining(10.0, 10, 0, 100).unwrap();
        assert!((eta - 90.0).abs() < 1e-9);
    }
}
