use crate::config::TrendConfig;
use crate::models::{StudentCourseAggregate, TrendDirection, TrendFit, TrendResult};

/// Ordinary least squares of `values` against their 0-based index.
///
/// Returns `(slope, intercept, r_squared)`, or `None` with fewer than two
/// points. An exact fit (including a flat series) has R² = 1.
pub fn least_squares(values: &[f64]) -> Option<(f64, f64, f64)> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let nf = n as f64;
    let mean_x = (nf - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / nf;

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        sxx += dx * dx;
        sxy += dx * (y - mean_y);
    }
    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;

    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for (i, y) in values.iter().enumerate() {
        let fitted = intercept + slope * i as f64;
        ss_res += (y - fitted).powi(2);
        ss_tot += (y - mean_y).powi(2);
    }
    let r_squared = if ss_tot <= f64::EPSILON {
        if ss_res <= f64::EPSILON {
            1.0
        } else {
            0.0
        }
    } else {
        1.0 - ss_res / ss_tot
    };

    Some((slope, intercept, r_squared))
}

pub fn direction_for(slope: f64, epsilon: f64) -> TrendDirection {
    if slope > epsilon {
        TrendDirection::Improving
    } else if slope < -epsilon {
        TrendDirection::Declining
    } else {
        TrendDirection::Stable
    }
}

pub fn predict(aggregate: &StudentCourseAggregate, config: &TrendConfig) -> TrendResult {
    let pcts: Vec<f64> = aggregate.attempt_sequence.iter().map(|p| p.pct).collect();

    let (direction, fit) = match least_squares(&pcts) {
        Some((slope, intercept, r_squared)) => {
            let next = intercept + slope * pcts.len() as f64;
            let fit = TrendFit {
                slope,
                intercept,
                predicted_next_pct: next.clamp(0.0, 100.0),
                fit_quality: r_squared,
                sample_size: pcts.len(),
                low_confidence: pcts.len() < config.min_confident_samples,
            };
            (direction_for(slope, config.epsilon), Some(fit))
        }
        None => (TrendDirection::InsufficientData, None),
    };

    TrendResult {
        student_id: aggregate.student_id.clone(),
        course_id: aggregate.course_id.clone(),
        direction,
        fit,
    }
}

/// One trend per aggregate, in aggregate order.
pub fn predict_all(
    aggregates: &[StudentCourseAggregate],
    config: &TrendConfig,
) -> Vec<TrendResult> {
    let results: Vec<TrendResult> = aggregates.iter().map(|a| predict(a, config)).collect();
    tracing::debug!(
        fitted = results.iter().filter(|r| r.fit.is_some()).count(),
        insufficient = results.iter().filter(|r| r.fit.is_none()).count(),
        "fitted attempt trends"
    );
    results
}
