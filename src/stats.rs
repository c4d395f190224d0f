// SMALL SHARED STATISTICS HELPERS
// KEPT SEPARATE FROM fence.rs/gmm.rs SO BOTH CAN SHARE EXACT, REVIEWABLE MATH.

pub fn mean(sample: &[f64]) -> f64 {
    sample.iter().sum::<f64>() / sample.len() as f64
}

/// Unbiased (n-1 denominator) sample variance. Caller guarantees n >= 2.
pub fn variance_unbiased(sample: &[f64], mean: f64) -> f64 {
    let n = sample.len() as f64;
    sample.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0)
}

/// Population (n denominator) variance, matching the MLE fit scipy.stats.norm.fit
/// and scikit-learn's GaussianMixture use internally. Caller guarantees n >= 1.
pub fn variance_population(sample: &[f64], mean: f64) -> f64 {
    let n = sample.len() as f64;
    sample.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n
}

pub fn std_dev_unbiased(sample: &[f64], mean: f64) -> f64 {
    variance_unbiased(sample, mean).sqrt()
}

pub fn min_of(sample: &[f64]) -> f64 {
    sample.iter().cloned().fold(f64::INFINITY, f64::min)
}

pub fn max_of(sample: &[f64]) -> f64 {
    sample.iter().cloned().fold(f64::NEG_INFINITY, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_and_variance() {
        let s = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let m = mean(&s);
        assert!((m - 5.0).abs() < 1e-9);
        assert!((variance_population(&s, m) - 4.0).abs() < 1e-9);
    }
}
