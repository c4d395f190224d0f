// ONE-DIMENSIONAL GAUSSIAN MIXTURE FITTING
// REPRODUCES THE CONTRACT OF THE REFERENCE TOOL'S sklearn.mixture.GaussianMixture
// USE, SEEDED FOR DETERMINISM (§4.A.1 OF SPEC_FULL.md). PRIVATE TO fence.rs --
// NO OTHER MODULE SHOULD DEPEND ON THIS FILE'S INTERNALS.

use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};
use statrs::distribution::{Continuous, Normal};

use crate::stats;

const SEED: u64 = 1005;
const MAX_K: usize = 10;
const VAR_FLOOR: f64 = 1e-12;
const EM_TOL: f64 = 1e-6;
const EM_MAX_ITERS: usize = 100;

#[derive(Clone, Copy, Debug)]
pub struct Component {
    pub weight: f64,
    pub mean: f64,
    pub variance: f64,
}

impl Component {
    fn std_dev(&self) -> f64 {
        self.variance.max(VAR_FLOOR).sqrt()
    }

    fn pdf(&self, x: f64) -> f64 {
        match Normal::new(self.mean, self.std_dev()) {
            Ok(n) => n.pdf(x),
            Err(_) => 0.0,
        }
    }
}

pub struct GmmFit {
    pub components: Vec<Component>,
}

/// Search k in [1..=min(MAX_K, n)] and keep the fit with the lowest BIC,
/// matching the reference tool's model-selection loop.
pub fn fit_best(data: &[f64]) -> GmmFit {
    let n = data.len();
    let max_k = MAX_K.min(n);
    let mut rng = StdRng::seed_from_u64(SEED);

    let mut best: Option<(f64, GmmFit)> = None;
    for k in 1..=max_k {
        let fit = fit_k(data, k, &mut rng);
        let ll = log_likelihood(data, &fit.components);
        let score = bic(ll, k, n);
        let better = match &best {
            None => true,
            Some((best_score, _)) => score < *best_score,
        };
        if better {
            best = Some((score, fit));
        }
    }
    best.expect("max_k >= 1 for nonempty data").1
}

fn fit_k(data: &[f64], k: usize, rng: &mut StdRng) -> GmmFit {
    let n = data.len();
    let overall_mean = stats::mean(data);
    let overall_var = stats::variance_population(data, overall_mean).max(VAR_FLOOR);

    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(rng);
    let mut components: Vec<Component> = indices[..k]
        .iter()
        .map(|&i| Component {
            weight: 1.0 / k as f64,
            mean: data[i],
            variance: overall_var,
        })
        .collect();

    let mut prev_ll = log_likelihood(data, &components);
    let mut resp = vec![vec![0.0_f64; k]; n];

    for _ in 0..EM_MAX_ITERS {
        // E-STEP
        for (i, &x) in data.iter().enumerate() {
            let mut denom = 0.0;
            for (j, c) in components.iter().enumerate() {
                let v = c.weight * c.pdf(x);
                resp[i][j] = v;
                denom += v;
            }
            if denom > 0.0 {
                for v in resp[i].iter_mut() {
                    *v /= denom;
                }
            } else {
                // NO COMPONENT EXPLAINS THIS POINT -- SPREAD RESPONSIBILITY EVENLY
                for v in resp[i].iter_mut() {
                    *v = 1.0 / k as f64;
                }
            }
        }

        // M-STEP
        for j in 0..k {
            let nj: f64 = resp.iter().map(|r| r[j]).sum::<f64>().max(1e-12);
            let mean_j = resp.iter().zip(data).map(|(r, &x)| r[j] * x).sum::<f64>() / nj;
            let var_j = resp
                .iter()
                .zip(data)
                .map(|(r, &x)| r[j] * (x - mean_j).powi(2))
                .sum::<f64>()
                / nj;
            components[j] = Component {
                weight: nj / n as f64,
                mean: mean_j,
                variance: var_j.max(VAR_FLOOR),
            };
        }

        let ll = log_likelihood(data, &components);
        if (ll - prev_ll).abs() < EM_TOL {
            prev_ll = ll;
            break;
        }
        prev_ll = ll;
    }

    let _ = prev_ll;
    GmmFit { components }
}

fn log_likelihood(data: &[f64], components: &[Component]) -> f64 {
    data.iter()
        .map(|&x| {
            let density: f64 = components.iter().map(|c| c.weight * c.pdf(x)).sum();
            density.max(f64::MIN_POSITIVE).ln()
        })
        .sum()
}

fn bic(log_likelihood: f64, k: usize, n: usize) -> f64 {
    let num_params = (3 * k - 1) as f64;
    -2.0 * log_likelihood + num_params * (n as f64).ln()
}

/// Hard-assign `x` to its most probable component (matches `predict`).
pub fn predict(components: &[Component], x: f64) -> usize {
    components
        .iter()
        .enumerate()
        .map(|(j, c)| (j, c.weight * c.pdf(x)))
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(j, _)| j)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fits_single_cluster() {
        let data: Vec<f64> = (0..50).map(|i| 10.0 + (i as f64 % 3.0 - 1.0) * 0.01).collect();
        let fit = fit_best(&data);
        assert!(!fit.components.is_empty());
        let total_weight: f64 = fit.components.iter().map(|c| c.weight).sum();
        assert!((total_weight - 1.0).abs() < 1e-6);
    }

    #[test]
    fn predict_picks_closest_component() {
        let components = vec![
            Component { weight: 0.5, mean: 0.0, variance: 1.0 },
            Component { weight: 0.5, mean: 100.0, variance: 1.0 },
        ];
        assert_eq!(predict(&components, 0.5), 0);
        assert_eq!(predict(&components, 99.5), 1);
    }
}
