//! Threshold derivation algorithms

use chrono::Utc;

use crate::error::ModelWatchError;
use crate::Result;

use super::{
    AlgorithmSuggestion, CalculatedThresholds, DriftMetricPoint, EffectivenessReport,
    ThresholdAlgorithm, ThresholdConfig,
};

/// Smoothing factor for the exponentially weighted estimators
const EWMA_ALPHA: f64 = 0.3;

/// Fixed ground-truth rule used when replaying history: a window counts as
/// real drift when any metric is clearly elevated.
const TRUTH_ACCURACY_DROP: f64 = 0.1;
const TRUTH_FEATURE_DRIFT: f64 = 0.2;
const TRUTH_PREDICTION_DRIFT: f64 = 0.15;

/// Either error rate above this triggers a retuning recommendation.
const RATE_TOLERANCE: f64 = 0.3;

/// Validate a threshold config before it is persisted.
pub fn validate_config(config: &ThresholdConfig) -> Result<()> {
    if !(10..=1000).contains(&config.window_size) {
        return Err(ModelWatchError::Validation(format!(
            "window_size must be within [10, 1000], got {}",
            config.window_size
        )));
    }
    if !(0.1..=5.0).contains(&config.sensitivity_factor) {
        return Err(ModelWatchError::Validation(format!(
            "sensitivity_factor must be within [0.1, 5.0], got {}",
            config.sensitivity_factor
        )));
    }
    for (name, value) in [
        ("min_threshold", config.min_threshold),
        ("max_threshold", config.max_threshold),
    ] {
        if !(0.0..=1.0).contains(&value) {
            return Err(ModelWatchError::Validation(format!(
                "{} must be within [0, 1], got {}",
                name, value
            )));
        }
    }
    if config.min_threshold >= config.max_threshold {
        return Err(ModelWatchError::Validation(format!(
            "min_threshold ({}) must be below max_threshold ({})",
            config.min_threshold, config.max_threshold
        )));
    }
    Ok(())
}

/// Derive the three alert thresholds from a historical window, oldest
/// sample first. Every threshold is clamped into the configured bounds;
/// confidence reports how much of the window was actually available.
pub fn calculate_thresholds(
    history: &[DriftMetricPoint],
    config: &ThresholdConfig,
) -> CalculatedThresholds {
    let accuracy: Vec<f64> = history.iter().map(|p| p.accuracy_drop).collect();
    let feature: Vec<f64> = history.iter().map(|p| p.feature_drift).collect();
    let prediction: Vec<f64> = history.iter().map(|p| p.prediction_drift).collect();

    let confidence = if config.window_size == 0 {
        0.0
    } else {
        (history.len() as f64 / config.window_size as f64).min(1.0)
    };

    CalculatedThresholds {
        accuracy_drop: threshold_for(&accuracy, config),
        feature_drift: threshold_for(&feature, config),
        prediction_drift: threshold_for(&prediction, config),
        confidence,
        data_points: history.len(),
        calculated_at: Utc::now(),
    }
}

fn threshold_for(values: &[f64], config: &ThresholdConfig) -> f64 {
    if values.is_empty() {
        // No history: stay at the loose end until data arrives.
        return config.max_threshold;
    }

    let raw = match config.algorithm {
        ThresholdAlgorithm::MovingAverage => {
            let (mean, std_dev) = mean_std(values);
            mean + config.sensitivity_factor * std_dev
        }
        ThresholdAlgorithm::Percentile => {
            let percentile = (95.0 - (config.sensitivity_factor - 1.0) * 10.0).clamp(0.0, 100.0);
            nearest_rank(values, percentile)
        }
        ThresholdAlgorithm::StdDeviation => {
            let (mean, std_dev) = mean_std(values);
            mean + 2.0 * config.sensitivity_factor * std_dev
        }
        ThresholdAlgorithm::Adaptive => {
            let (ewma, ewvar) = ewma_stats(values);
            ewma + config.sensitivity_factor * ewvar.sqrt()
        }
    };

    raw.clamp(config.min_threshold, config.max_threshold)
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|&v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Nearest-rank percentile over a copy of the values.
fn nearest_rank(values: &[f64], percentile: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let idx = ((percentile / 100.0) * sorted.len() as f64).floor() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Exponentially weighted mean and variance, oldest value first.
fn ewma_stats(values: &[f64]) -> (f64, f64) {
    let mut ewma = values[0];
    let mut ewvar = 0.0;
    for &v in &values[1..] {
        let diff = v - ewma;
        ewma += EWMA_ALPHA * diff;
        ewvar = (1.0 - EWMA_ALPHA) * (ewvar + EWMA_ALPHA * diff * diff);
    }
    (ewma, ewvar)
}

/// Replay history against the computed thresholds to estimate how often
/// they would misfire relative to the fixed ground-truth rule.
pub fn analyze_effectiveness(
    history: &[DriftMetricPoint],
    thresholds: &CalculatedThresholds,
) -> EffectivenessReport {
    let mut false_positives = 0u32;
    let mut false_negatives = 0u32;
    let mut truth_positives = 0u32;
    let mut truth_negatives = 0u32;

    for point in history {
        let is_drift = point.accuracy_drop > TRUTH_ACCURACY_DROP
            || point.feature_drift > TRUTH_FEATURE_DRIFT
            || point.prediction_drift > TRUTH_PREDICTION_DRIFT;
        let would_trigger = point.accuracy_drop > thresholds.accuracy_drop
            || point.feature_drift > thresholds.feature_drift
            || point.prediction_drift > thresholds.prediction_drift;

        if is_drift {
            truth_positives += 1;
            if !would_trigger {
                false_negatives += 1;
            }
        } else {
            truth_negatives += 1;
            if would_trigger {
                false_positives += 1;
            }
        }
    }

    let rate = |num: u32, denom: u32| if denom > 0 { num as f64 / denom as f64 } else { 0.0 };
    let false_positive_rate = rate(false_positives, truth_negatives);
    let false_negative_rate = rate(false_negatives, truth_positives);

    let recommendation = if false_positive_rate > RATE_TOLERANCE {
        format!(
            "Thresholds are too tight: {:.0}% of benign windows would alert. Raise the sensitivity factor or switch to the percentile algorithm.",
            false_positive_rate * 100.0
        )
    } else if false_negative_rate > RATE_TOLERANCE {
        format!(
            "Thresholds are too loose: {:.0}% of drift windows would pass unflagged. Lower the sensitivity factor.",
            false_negative_rate * 100.0
        )
    } else {
        "Thresholds are well calibrated for the recent window. Keep the current configuration.".to_string()
    };

    EffectivenessReport {
        false_positive_rate,
        false_negative_rate,
        recommendation,
    }
}

/// Pick an algorithm for the observed metric behavior. Operates on the
/// per-sample mean of the three drift metrics; the heuristics (trend shift,
/// coefficient of variation) are scale free, so the combination choice does
/// not affect the verdict.
pub fn suggest_algorithm(history: &[DriftMetricPoint]) -> AlgorithmSuggestion {
    if history.len() < 30 {
        return AlgorithmSuggestion {
            algorithm: ThresholdAlgorithm::Percentile,
            reason: format!(
                "Only {} samples available. Percentile thresholds are robust to outliers in small windows.",
                history.len()
            ),
        };
    }

    let signal: Vec<f64> = history
        .iter()
        .map(|p| (p.accuracy_drop + p.feature_drift + p.prediction_drift) / 3.0)
        .collect();

    let mid = signal.len() / 2;
    let (first_mean, _) = mean_std(&signal[..mid]);
    let (second_mean, _) = mean_std(&signal[mid..]);
    if first_mean > 0.0 {
        let shift = ((second_mean - first_mean) / first_mean).abs();
        if shift > 0.2 {
            return AlgorithmSuggestion {
                algorithm: ThresholdAlgorithm::Adaptive,
                reason: format!(
                    "Metric level shifted {:.0}% between window halves. The adaptive estimator tracks trends.",
                    shift * 100.0
                ),
            };
        }
    }

    let (mean, std_dev) = mean_std(&signal);
    if mean > 0.0 && std_dev / mean > 0.5 {
        return AlgorithmSuggestion {
            algorithm: ThresholdAlgorithm::Percentile,
            reason: format!(
                "High volatility (coefficient of variation {:.2}). Percentile thresholds resist spikes.",
                std_dev / mean
            ),
        };
    }

    AlgorithmSuggestion {
        algorithm: ThresholdAlgorithm::MovingAverage,
        reason: "Metrics are stable. A moving average with a standard-deviation band is sufficient.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points(values: &[f64]) -> Vec<DriftMetricPoint> {
        values
            .iter()
            .map(|&v| DriftMetricPoint {
                accuracy_drop: v,
                feature_drift: v,
                prediction_drift: v,
            })
            .collect()
    }

    fn config(algorithm: ThresholdAlgorithm) -> ThresholdConfig {
        ThresholdConfig {
            algorithm,
            ..ThresholdConfig::default_for(1)
        }
    }

    #[test]
    fn test_outputs_clamped_for_extreme_inputs() {
        for algorithm in [
            ThresholdAlgorithm::MovingAverage,
            ThresholdAlgorithm::Percentile,
            ThresholdAlgorithm::StdDeviation,
            ThresholdAlgorithm::Adaptive,
        ] {
            let cfg = config(algorithm);
            let huge = calculate_thresholds(&points(&[1e9; 40]), &cfg);
            assert_eq!(huge.accuracy_drop, cfg.max_threshold);
            assert_eq!(huge.feature_drift, cfg.max_threshold);

            let zero = calculate_thresholds(&points(&[0.0; 40]), &cfg);
            assert_eq!(zero.accuracy_drop, cfg.min_threshold);
            assert_eq!(zero.prediction_drift, cfg.min_threshold);
        }
    }

    #[test]
    fn test_confidence_scales_with_window_fill() {
        let cfg = config(ThresholdAlgorithm::MovingAverage);
        let half = calculate_thresholds(&points(&[0.05; 50]), &cfg);
        assert!((half.confidence - 0.5).abs() < 1e-9);
        assert_eq!(half.data_points, 50);

        let full = calculate_thresholds(&points(&[0.05; 200]), &cfg);
        assert_eq!(full.confidence, 1.0);
    }

    #[test]
    fn test_empty_history_defaults_to_loose_end() {
        let cfg = config(ThresholdAlgorithm::Adaptive);
        let result = calculate_thresholds(&[], &cfg);
        assert_eq!(result.accuracy_drop, cfg.max_threshold);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.data_points, 0);
    }

    #[test]
    fn test_moving_average_band() {
        let mut cfg = config(ThresholdAlgorithm::MovingAverage);
        cfg.min_threshold = 0.0;
        cfg.max_threshold = 1.0;
        // constant 0.05 with zero variance: threshold equals the mean
        let result = calculate_thresholds(&points(&[0.05; 40]), &cfg);
        assert!((result.accuracy_drop - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_percentile_sensitivity_shifts_rank() {
        let mut cfg = config(ThresholdAlgorithm::Percentile);
        cfg.min_threshold = 0.0;
        cfg.max_threshold = 1.0;
        let data: Vec<f64> = (0..100).map(|i| i as f64 / 100.0).collect();

        cfg.sensitivity_factor = 1.0; // p95
        let tight = calculate_thresholds(&points(&data), &cfg);
        cfg.sensitivity_factor = 3.0; // p75
        let loose = calculate_thresholds(&points(&data), &cfg);
        assert!(tight.accuracy_drop > loose.accuracy_drop);
        assert!((tight.accuracy_drop - 0.95).abs() < 1e-9);
        assert!((loose.accuracy_drop - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_adaptive_tracks_recent_level() {
        let mut cfg = config(ThresholdAlgorithm::Adaptive);
        cfg.min_threshold = 0.0;
        cfg.max_threshold = 1.0;

        // level change: EWMA should sit near the recent level, not the mean
        let mut data = vec![0.02; 50];
        data.extend(vec![0.2; 20]);
        let result = calculate_thresholds(&points(&data), &cfg);
        assert!(
            result.accuracy_drop > 0.15,
            "adaptive threshold {} should track the recent level",
            result.accuracy_drop
        );
    }

    #[test]
    fn test_validate_config_bounds() {
        let mut cfg = ThresholdConfig::default_for(1);
        cfg.window_size = 5;
        assert!(validate_config(&cfg).is_err());

        let mut cfg = ThresholdConfig::default_for(1);
        cfg.sensitivity_factor = 9.0;
        assert!(validate_config(&cfg).is_err());

        let mut cfg = ThresholdConfig::default_for(1);
        cfg.min_threshold = 0.4;
        cfg.max_threshold = 0.2;
        assert!(validate_config(&cfg).is_err());

        assert!(validate_config(&ThresholdConfig::default_for(1)).is_ok());
    }

    #[test]
    fn test_effectiveness_flags_loose_thresholds() {
        // every window is real drift, but thresholds sit far above the data
        let history = points(&[0.3; 20]);
        let thresholds = CalculatedThresholds {
            accuracy_drop: 0.5,
            feature_drift: 0.5,
            prediction_drift: 0.5,
            confidence: 1.0,
            data_points: 20,
            calculated_at: Utc::now(),
        };
        let report = analyze_effectiveness(&history, &thresholds);
        assert_eq!(report.false_negative_rate, 1.0);
        assert!(report.recommendation.contains("too loose"));
    }

    #[test]
    fn test_effectiveness_flags_tight_thresholds() {
        // benign windows, but thresholds hug zero
        let history = points(&[0.02; 20]);
        let thresholds = CalculatedThresholds {
            accuracy_drop: 0.01,
            feature_drift: 0.01,
            prediction_drift: 0.01,
            confidence: 1.0,
            data_points: 20,
            calculated_at: Utc::now(),
        };
        let report = analyze_effectiveness(&history, &thresholds);
        assert_eq!(report.false_positive_rate, 1.0);
        assert!(report.recommendation.contains("too tight"));
    }

    #[test]
    fn test_effectiveness_keeps_calibrated_thresholds() {
        let mut history = points(&[0.02; 15]);
        history.extend(points(&[0.3; 15]));
        let thresholds = CalculatedThresholds {
            accuracy_drop: 0.08,
            feature_drift: 0.15,
            prediction_drift: 0.12,
            confidence: 1.0,
            data_points: 30,
            calculated_at: Utc::now(),
        };
        let report = analyze_effectiveness(&history, &thresholds);
        assert_eq!(report.false_positive_rate, 0.0);
        assert_eq!(report.false_negative_rate, 0.0);
        assert!(report.recommendation.contains("well calibrated"));
    }

    #[test]
    fn test_suggest_percentile_for_small_windows() {
        let suggestion = suggest_algorithm(&points(&[0.05; 10]));
        assert_eq!(suggestion.algorithm, ThresholdAlgorithm::Percentile);
    }

    #[test]
    fn test_suggest_adaptive_for_trending_metrics() {
        let mut data = vec![0.05; 30];
        data.extend(vec![0.12; 30]);
        let suggestion = suggest_algorithm(&points(&data));
        assert_eq!(suggestion.algorithm, ThresholdAlgorithm::Adaptive);
    }

    #[test]
    fn test_suggest_percentile_for_volatile_metrics() {
        let data: Vec<f64> = (0..60)
            .map(|i| if i % 5 == 0 { 0.5 } else { 0.02 })
            .collect();
        let suggestion = suggest_algorithm(&points(&data));
        assert_eq!(suggestion.algorithm, ThresholdAlgorithm::Percentile);
    }

    #[test]
    fn test_suggest_moving_average_for_stable_metrics() {
        let data: Vec<f64> = (0..60).map(|i| 0.05 + (i % 3) as f64 * 0.001).collect();
        let suggestion = suggest_algorithm(&points(&data));
        assert_eq!(suggestion.algorithm, ThresholdAlgorithm::MovingAverage);
    }
}
