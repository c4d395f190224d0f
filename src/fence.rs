// FENCE ESTIMATOR (COMPONENT A)
// FOUR POLYMORPHIC STRATEGIES OVER A ONE-DIMENSIONAL SAMPLE.
// NEVER PANICS ON EMPTY/DEGENERATE INPUT -- RETURNS A SENTINEL THE DETECTOR
// TREATS AS "NEVER TRIGGERS" (+INF FOR UPPER FENCES, -INF FOR LOWER ONES).

use std::collections::HashSet;

use crate::gmm;
use crate::stats;

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum FenceKind {
    Quartile,
    Normal,
    #[value(name = "gmm-strict")]
    GmmStrict,
    #[value(name = "gmm-normal")]
    GmmNormal,
}

#[derive(Clone, Copy, Debug)]
pub struct FenceParams {
    /// `t` in the quartile/normal formulas (CLI: --thresh, default 4).
    pub thresh: f64,
    /// `p` in the GMM weight-accumulation walk (fixed at 0.1 per contract).
    pub gmm_prob_thresh: f64,
    /// `s` in the GMM mean +/- s*std normal candidate (fixed at 3).
    pub gmm_span: f64,
}

impl Default for FenceParams {
    fn default() -> Self {
        Self {
            thresh: 4.0,
            gmm_prob_thresh: 0.1,
            gmm_span: 3.0,
        }
    }
}

fn sentinel(is_upper: bool) -> f64 {
    if is_upper {
        f64::INFINITY
    } else {
        f64::NEG_INFINITY
    }
}

fn is_degenerate(sample: &[f64]) -> bool {
    sample.is_empty() || stats::min_of(sample) == stats::max_of(sample)
}

pub fn estimate(kind: FenceKind, sample: &[f64], is_upper: bool, params: &FenceParams) -> f64 {
    if is_degenerate(sample) {
        return sentinel(is_upper);
    }
    match kind {
        FenceKind::Quartile => quartile_fence(sample, is_upper, params.thresh),
        FenceKind::Normal => normal_fence(sample, is_upper, params.thresh),
        FenceKind::GmmStrict => gmm_strict_fence(sample, is_upper, params),
        FenceKind::GmmNormal => gmm_normal_fence(sample, is_upper, params),
    }
}

/// Turkey/quartile fence. Indices are the exact `floor(n/4)`/`floor(3n/4)`
/// positions into the sorted sample -- NOT a "proper" quantile interpolation.
/// Reproducing the original off-by-convention indexing is part of the contract.
fn quartile_fence(sample: &[f64], is_upper: bool, t: f64) -> f64 {
    let mut sorted = sample.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = sorted.len();
    let q1 = sorted[(n / 4).min(n - 1)];
    let q3 = sorted[(3 * n / 4).min(n - 1)];
    let iqr = q3 - q1;
    let val = iqr * (3.0 * t / 4.0 - 2.0 / 3.0);
    if is_upper {
        q3 + val
    } else {
        q1 - val
    }
}

fn normal_fence(sample: &[f64], is_upper: bool, t: f64) -> f64 {
    let mean = stats::mean(sample);
    let std = stats::std_dev_unbiased(sample, mean);
    if is_upper {
        mean + t * std
    } else {
        mean - t * std
    }
}

/// Walks the sample (sorted descending for upper, ascending for lower),
/// accumulating mixture weight as newly-encountered components are crossed.
/// Returns (strict candidate, normal candidate) at the point the accumulated
/// weight first exceeds `gmm_prob_thresh`.
fn gmm_walk(sample: &[f64], is_upper: bool, params: &FenceParams) -> Option<(f64, f64)> {
    let fit = gmm::fit_best(sample);

    let mut sorted = sample.to_vec();
    if is_upper {
        sorted.sort_by(|a, b| b.partial_cmp(a).unwrap());
    } else {
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    }

    let mut seen = HashSet::new();
    let mut prob = 0.0;
    for &x in &sorted {
        let idx = gmm::predict(&fit.components, x);
        if seen.insert(idx) {
            prob += fit.components[idx].weight;
            if prob > params.gmm_prob_thresh {
                let c = fit.components[idx];
                let std = c.variance.max(1e-12).sqrt();
                let normal = if is_upper {
                    c.mean + params.gmm_span * std
                } else {
                    c.mean - params.gmm_span * std
                };
                return Some((x, normal));
            }
        }
    }
    None
}

fn gmm_strict_fence(sample: &[f64], is_upper: bool, params: &FenceParams) -> f64 {
    match gmm_walk(sample, is_upper, params) {
        Some((strict, normal)) => {
            if is_upper {
                strict.min(normal)
            } else {
                strict.max(normal)
            }
        }
        None => sentinel(is_upper),
    }
}

fn gmm_normal_fence(sample: &[f64], is_upper: bool, params: &FenceParams) -> f64 {
    match gmm_walk(sample, is_upper, params) {
        Some((_, normal)) => normal,
        None => sentinel(is_upper),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sample_is_sentinel() {
        let params = FenceParams::default();
        assert_eq!(estimate(FenceKind::Quartile, &[], true, &params), f64::INFINITY);
        assert_eq!(estimate(FenceKind::Normal, &[], false, &params), f64::NEG_INFINITY);
    }

    #[test]
    fn degenerate_sample_is_sentinel() {
        let params = FenceParams::default();
        let sample = [3.0; 10];
        assert_eq!(estimate(FenceKind::Quartile, &sample, true, &params), f64::INFINITY);
    }

    #[test]
    fn quartile_matches_reference_formula() {
        let sample: Vec<f64> = (1..=100).map(|i| i as f64).collect();
        let t = 4.0;
        let upper = estimate(FenceKind::Quartile, &sample, true, &FenceParams { thresh: t, ..Default::default() });
        let mut sorted = sample.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let n = sorted.len();
        let q1 = sorted[n / 4];
        let q3 = sorted[3 * n / 4];
        let iqr = q3 - q1;
        let expected = q3 + iqr * (3.0 * t / 4.0 - 2.0 / 3.0);
        assert!((upper - expected).abs() < 1e-9);
    }

    #[test]
    fn normal_and_quartile_agree_on_symmetric_unimodal_sample() {
        let params = FenceParams::default();
        let sample: Vec<f64> = (-50..=50).map(|i| i as f64).collect();
        let q_upper = estimate(FenceKind::Quartile, &sample, true, &params);
        let n_upper = estimate(FenceKind::Normal, &sample, true, &params);
        assert!((q_upper - n_upper).abs() < params.thresh * 5.0);
    }
}
