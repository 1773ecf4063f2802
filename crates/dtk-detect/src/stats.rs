//! Weighted statistics shared by the detectors.
//!
//! Weights are frequency-style: a uniform window has weight 1.0 per
//! sample and the recent-weight amplification keeps the total equal to
//! the sample count, so the unbiased variance denominator stays `n - 1`.

/// Per-sample weights for a window of `n` samples under recent-weight `w`.
///
/// The trailing 20% band carries total weight `w * n`, the leading band
/// `(1 - w) * n`. `w = 0` means uniform weighting.
pub fn recent_weights(n: usize, recent_weight: f64) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    if recent_weight <= 0.0 {
        return vec![1.0; n];
    }
    let n_recent = ((n as f64) * 0.2).ceil().max(1.0) as usize;
    let n_lead = n - n_recent;
    if n_lead == 0 {
        return vec![1.0; n];
    }
    let lead = (1.0 - recent_weight) * n as f64 / n_lead as f64;
    let recent = recent_weight * n as f64 / n_recent as f64;
    let mut weights = vec![lead; n_lead];
    weights.extend(std::iter::repeat(recent).take(n_recent));
    weights
}

/// Weighted percentile with centered cumulative weights.
///
/// Each sorted sample sits at the midpoint of its weight mass, and the
/// target quantile interpolates linearly between neighbours. With uniform
/// weights this reproduces the ordinary sample median for both odd and
/// even counts.
pub fn weighted_percentile(data: &[f64], weights: &[f64], percentile: f64) -> f64 {
    debug_assert_eq!(data.len(), weights.len());
    debug_assert!((0.0..=100.0).contains(&percentile));
    if data.is_empty() {
        return f64::NAN;
    }
    if data.len() == 1 {
        return data[0];
    }

    let mut order: Vec<usize> = (0..data.len()).collect();
    order.sort_by(|&a, &b| data[a].partial_cmp(&data[b]).unwrap_or(std::cmp::Ordering::Equal));

    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return data[order[data.len() / 2]];
    }
    let target = percentile / 100.0;

    // Centered cumulative positions in (0, 1).
    let mut cum = 0.0;
    let mut positions = Vec::with_capacity(order.len());
    for &idx in &order {
        let w = weights[idx] / total;
        positions.push(cum + w / 2.0);
        cum += w;
    }

    if target <= positions[0] {
        return data[order[0]];
    }
    if target >= *positions.last().unwrap() {
        return data[*order.last().unwrap()];
    }
    for i in 1..positions.len() {
        if target <= positions[i] {
            let span = positions[i] - positions[i - 1];
            if span <= f64::EPSILON {
                return data[order[i]];
            }
            let fraction = (target - positions[i - 1]) / span;
            let lo = data[order[i - 1]];
            let hi = data[order[i]];
            return lo + fraction * (hi - lo);
        }
    }
    data[*order.last().unwrap()]
}

pub fn weighted_median(data: &[f64], weights: &[f64]) -> f64 {
    weighted_percentile(data, weights, 50.0)
}

/// Weighted median absolute deviation around `center`.
pub fn weighted_mad(data: &[f64], weights: &[f64], center: f64) -> f64 {
    let deviations: Vec<f64> = data.iter().map(|x| (x - center).abs()).collect();
    weighted_median(&deviations, weights)
}

pub fn weighted_mean(data: &[f64], weights: &[f64]) -> f64 {
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return f64::NAN;
    }
    data.iter().zip(weights).map(|(x, w)| x * w).sum::<f64>() / total
}

/// Unbiased weighted standard deviation (frequency weights).
pub fn weighted_stddev(data: &[f64], weights: &[f64], mean: f64) -> f64 {
    let total: f64 = weights.iter().sum();
    if total <= 1.0 {
        return 0.0;
    }
    let ss: f64 = data
        .iter()
        .zip(weights)
        .map(|(x, w)| w * (x - mean).powi(2))
        .sum();
    (ss / (total - 1.0)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_median_matches_sample_median() {
        let data = [1.0, 2.0, 3.0, 4.0, 5.0];
        let w = vec![1.0; 5];
        assert!((weighted_median(&data, &w) - 3.0).abs() < 1e-12);

        let even = [1.0, 2.0, 3.0, 4.0];
        let w = vec![1.0; 4];
        assert!((weighted_median(&even, &w) - 2.5).abs() < 1e-12);
    }

    #[test]
    fn weighted_median_follows_the_mass() {
        let data = [1.0, 2.0, 3.0, 4.0, 5.0];
        let w = [0.1, 0.2, 0.4, 0.2, 0.1];
        assert!((weighted_median(&data, &w) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn percentile_handles_unsorted_input() {
        let data = [5.0, 1.0, 3.0, 2.0, 4.0];
        let w = vec![1.0; 5];
        assert!((weighted_median(&data, &w) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn mad_of_symmetric_data() {
        let data = [1.0, 2.0, 3.0, 4.0, 5.0];
        let w = vec![1.0; 5];
        let center = weighted_median(&data, &w);
        // deviations [2, 1, 0, 1, 2] -> median 1
        assert!((weighted_mad(&data, &w, center) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn stddev_matches_unbiased_formula() {
        let data = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let w = vec![1.0; 8];
        let mean = weighted_mean(&data, &w);
        assert!((mean - 5.0).abs() < 1e-12);
        // Sample variance 32/7.
        let expected = (32.0f64 / 7.0).sqrt();
        assert!((weighted_stddev(&data, &w, mean) - expected).abs() < 1e-12);
    }

    #[test]
    fn recent_weights_sum_to_sample_count() {
        for (n, w) in [(10usize, 0.5f64), (100, 0.9), (7, 0.2), (3, 1.0)] {
            let weights = recent_weights(n, w);
            let sum: f64 = weights.iter().sum();
            assert!((sum - n as f64).abs() < 1e-9, "n={n} w={w} sum={sum}");
        }
    }

    #[test]
    fn zero_recent_weight_is_uniform() {
        assert_eq!(recent_weights(5, 0.0), vec![1.0; 5]);
    }

    #[test]
    fn neutral_recent_weight_stays_uniform() {
        // w = 0.2 assigns the trailing 20% exactly its uniform share.
        let weights = recent_weights(10, 0.2);
        for w in weights {
            assert!((w - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn high_recent_weight_amplifies_tail() {
        let weights = recent_weights(10, 0.8);
        assert!(weights[9] > weights[0]);
        assert!((weights[9] - 4.0).abs() < 1e-12); // 0.8 * 10 / 2
        assert!((weights[0] - 0.25).abs() < 1e-12); // 0.2 * 10 / 8
    }
}
