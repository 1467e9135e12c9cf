//! Derived scores.

use serde_json::json;

pub const BIAS_ALPHA: f64 = 1.0;
pub const BIAS_BETA: f64 = 1.0;

/// Confidence floor and the value used for net/NCS profiles without text.
pub const CONFIDENCE_FLOOR: f64 = 0.4;
pub const CONFIDENCE_WITH_TEXT: f64 = 0.6;

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Open-vs-net bias in (-1, 1): `tanh(ln((net + α) / (open + α)) / β)` with
/// α = β = 1. Zero when both counts match, positive when net participation
/// dominates.
pub fn compute_bias_score(net_count: i64, open_count: i64) -> f64 {
    bias_score_with(net_count, open_count, BIAS_ALPHA, BIAS_BETA)
}

pub fn bias_score_with(net_count: i64, open_count: i64, alpha: f64, beta: f64) -> f64 {
    let net = net_count.max(0) as f64;
    let open = open_count.max(0) as f64;
    (((net + alpha) / (open + alpha)).ln() / beta).tanh()
}

/// Stored next to the bias score so readers know how it was derived.
pub fn bias_method() -> serde_json::Value {
    json!({
        "method": "tanh_log_ratio",
        "params": {"alpha": BIAS_ALPHA, "beta": BIAS_BETA}
    })
}

/// Callsign confidence from segment volume: rises from 0.4 past roughly ten
/// segments and saturates near 1.0.
pub fn evidence_confidence(segment_count: i64) -> f64 {
    let x = (segment_count as f64 - 10.0) / 20.0;
    (CONFIDENCE_FLOOR + 0.6 * sigmoid(x)).min(1.0)
}

/// Net and NCS confidence only reflects whether any text was sampled.
pub fn presence_confidence(has_text: bool) -> f64 {
    if has_text {
        CONFIDENCE_WITH_TEXT
    } else {
        CONFIDENCE_FLOOR
    }
}

/// Clamp a model score into [0, 1]; non-finite values become unset.
pub fn clamp_score(score: Option<f64>) -> Option<f64> {
    score.filter(|s| s.is_finite()).map(|s| s.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_counts_have_no_bias() {
        for n in [0, 1, 5, 1000] {
            assert_eq!(compute_bias_score(n, n), 0.0);
        }
    }

    #[test]
    fn bias_is_monotonic() {
        for open in 0..20 {
            for net in 0..20 {
                assert!(compute_bias_score(net + 1, open) > compute_bias_score(net, open));
                assert!(compute_bias_score(net, open + 1) < compute_bias_score(net, open));
            }
        }
    }

    #[test]
    fn bias_stays_inside_open_interval() {
        for (net, open) in [(0, 500), (500, 0), (0, 0), (3, 90)] {
            let b = compute_bias_score(net, open);
            assert!(b > -1.0 && b < 1.0, "{b}");
        }
    }

    #[test]
    fn bias_matches_formula() {
        let expected = (6.0f64 / 11.0).ln().tanh();
        assert!((compute_bias_score(5, 10) - expected).abs() < 1e-12);
        assert!((compute_bias_score(5, 10) + 0.5412).abs() < 1e-3);
    }

    #[test]
    fn confidence_is_bounded_and_non_decreasing() {
        let mut prev = 0.0;
        for n in 0..500 {
            let c = evidence_confidence(n);
            assert!((0.4..=1.0).contains(&c));
            assert!(c >= prev);
            prev = c;
        }
    }

    #[test]
    fn confidence_at_known_points() {
        assert!((evidence_confidence(10) - 0.7).abs() < 1e-12);
        let expected = 0.4 + 0.6 * sigmoid(0.25);
        assert!((evidence_confidence(15) - expected).abs() < 1e-12);
    }

    #[test]
    fn scores_are_clamped() {
        assert_eq!(clamp_score(Some(1.7)), Some(1.0));
        assert_eq!(clamp_score(Some(-0.2)), Some(0.0));
        assert_eq!(clamp_score(Some(f64::NAN)), None);
        assert_eq!(clamp_score(None), None);
    }
}
