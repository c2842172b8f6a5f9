//! Two-proportion significance testing
//!
//! Closed-form normal approximation for comparing two variants' accuracy.
//! Exact parity with a statistics package is a non-goal; the approximation
//! is explainable and accurate to well below the decision thresholds used.

use serde::{Deserialize, Serialize};

/// Minimum observations per variant before a test statistic is computed
pub const MIN_OBSERVATIONS: u64 = 30;

/// Which variant won a significance test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestWinner {
    A,
    B,
    Tie,
}

/// Interval around the accuracy difference `pA - pB`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
}

/// Outcome of a two-proportion z-test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignificanceOutcome {
    pub winner: Option<TestWinner>,
    pub is_significant: bool,
    pub p_value: f64,
    pub confidence_interval: ConfidenceInterval,
}

/// Standard normal CDF via the Abramowitz-Stegun erf approximation
/// (maximum absolute error ~1.5e-7).
pub fn normal_cdf(x: f64) -> f64 {
    const A1: f64 = 0.254829592;
    const A2: f64 = -0.284496736;
    const A3: f64 = 1.421413741;
    const A4: f64 = -1.453152027;
    const A5: f64 = 1.061405429;
    const P: f64 = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs() / std::f64::consts::SQRT_2;
    let t = 1.0 / (1.0 + P * x);
    let y = 1.0 - (((((A5 * t + A4) * t) + A3) * t + A2) * t + A1) * t * (-x * x).exp();
    0.5 * (1.0 + sign * y)
}

/// Critical z value for the supported confidence levels; anything
/// unrecognized falls back to the 95% value.
pub fn z_critical(confidence_level: f64) -> f64 {
    if (confidence_level - 0.90).abs() < 1e-9 {
        1.645
    } else if (confidence_level - 0.95).abs() < 1e-9 {
        1.96
    } else if (confidence_level - 0.99).abs() < 1e-9 {
        2.576
    } else {
        1.96
    }
}

/// Two-proportion z-test on variant accuracies.
///
/// With fewer than [`MIN_OBSERVATIONS`] on either side the result is the
/// degenerate not-significant outcome (p = 1, interval ±1) so callers can
/// keep polling instead of handling an error. A zero pooled standard error
/// means both proportions are pinned at a boundary and is reported as a tie.
pub fn two_proportion_test(
    p_a: f64,
    n_a: u64,
    p_b: f64,
    n_b: u64,
    confidence_level: f64,
) -> SignificanceOutcome {
    if n_a < MIN_OBSERVATIONS || n_b < MIN_OBSERVATIONS {
        return SignificanceOutcome {
            winner: None,
            is_significant: false,
            p_value: 1.0,
            confidence_interval: ConfidenceInterval {
                lower: -1.0,
                upper: 1.0,
            },
        };
    }

    let diff = p_a - p_b;
    let pooled_se = (p_a * (1.0 - p_a) / n_a as f64 + p_b * (1.0 - p_b) / n_b as f64).sqrt();

    if pooled_se == 0.0 {
        return SignificanceOutcome {
            winner: Some(TestWinner::Tie),
            is_significant: false,
            p_value: 1.0,
            confidence_interval: ConfidenceInterval {
                lower: 0.0,
                upper: 0.0,
            },
        };
    }

    let z = diff / pooled_se;
    let p_value = 2.0 * (1.0 - normal_cdf(z.abs()));

    let margin = z_critical(confidence_level) * pooled_se;
    let confidence_interval = ConfidenceInterval {
        lower: diff - margin,
        upper: diff + margin,
    };

    let alpha = 1.0 - confidence_level;
    let is_significant = p_value < alpha;

    let winner = if is_significant {
        if diff > 0.0 {
            Some(TestWinner::A)
        } else if diff < 0.0 {
            Some(TestWinner::B)
        } else {
            Some(TestWinner::Tie)
        }
    } else {
        None
    };

    SignificanceOutcome {
        winner,
        is_significant,
        p_value,
        confidence_interval,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_cdf_reference_values() {
        assert!((normal_cdf(0.0) - 0.5).abs() < 0.01);
        assert!((normal_cdf(1.0) - 0.8413).abs() < 0.01);
        assert!((normal_cdf(-1.0) - 0.1587).abs() < 0.01);
        assert!((normal_cdf(2.0) - 0.9772).abs() < 0.01);
    }

    #[test]
    fn test_normal_cdf_symmetry() {
        for x in [0.3, 1.1, 2.7] {
            assert!((normal_cdf(x) + normal_cdf(-x) - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_small_samples_never_significant() {
        let outcome = two_proportion_test(0.95, 29, 0.10, 5000, 0.95);
        assert!(!outcome.is_significant);
        assert_eq!(outcome.p_value, 1.0);
        assert_eq!(outcome.winner, None);
        assert_eq!(outcome.confidence_interval.lower, -1.0);
        assert_eq!(outcome.confidence_interval.upper, 1.0);
    }

    #[test]
    fn test_clear_winner() {
        let outcome = two_proportion_test(0.80, 1000, 0.60, 1000, 0.95);
        assert!(outcome.is_significant);
        assert_eq!(outcome.winner, Some(TestWinner::A));
        assert!(outcome.p_value < 0.05);
        assert!(outcome.confidence_interval.lower > 0.0);
    }

    #[test]
    fn test_identical_boundary_proportions_tie() {
        let outcome = two_proportion_test(1.0, 100, 1.0, 100, 0.95);
        assert_eq!(outcome.winner, Some(TestWinner::Tie));
        assert!(!outcome.is_significant);
    }

    #[test]
    fn test_close_proportions_not_significant() {
        let outcome = two_proportion_test(0.71, 100, 0.70, 100, 0.95);
        assert!(!outcome.is_significant);
        assert_eq!(outcome.winner, None);
    }

    #[test]
    fn test_z_critical_table() {
        assert_eq!(z_critical(0.90), 1.645);
        assert_eq!(z_critical(0.95), 1.96);
        assert_eq!(z_critical(0.99), 2.576);
        assert_eq!(z_critical(0.80), 1.96);
    }
}
