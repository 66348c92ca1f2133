extern crate statrs;

use itertools::{Itertools, MinMaxResult};
use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, Normal};

/// default number of iterations of the 1-D fit
pub const NORM_UNIF_EM_ITERATIONS: usize = 16;

/// default number of iterations of the 2-D fit
pub const TWO_D_EM_ITERATIONS: usize = 40;

/// variance below which the 1-D fit stops iterating
pub const MIN_VARIANCE: f64 = 1e-4;

/// variance reported for empty or constant samples
pub const DEGENERATE_VARIANCE: f64 = 0.1;

// lower bound for per-axis std of the 2-D fit, keeps the normal densities finite
const MIN_STD_2D: f64 = 1e-10;

/// Result of the 1-D normal/uniform mixture fit.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormUnifFit {
    pub mean: f64,
    pub variance: f64,
    pub normal_fraction: f64,
}

impl NormUnifFit {
    pub fn std(&self) -> f64 {
        self.variance.sqrt()
    }
}

/// Result of the 2-D normal/uniform mixture fit with diagonal covariance.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TwoDemFit {
    pub mean_x: f64,
    pub std_x: f64,
    pub mean_y: f64,
    pub std_y: f64,
    pub normal_fraction: f64,
}

fn range_of(samples: &[f64]) -> Option<(f64, f64)> {
    match samples.iter().copied().minmax() {
        MinMaxResult::NoElements => None,
        MinMaxResult::OneElement(v) => Some((v, v)),
        MinMaxResult::MinMax(lo, hi) => Some((lo, hi)),
    }
}

// true if the extent is indistinguishable from rounding noise
fn is_flat(min: f64, max: f64) -> bool {
    let scale = min.abs().max(max.abs()).max(1.0);
    max - min <= 16.0 * f64::EPSILON * scale
}

fn mean_of(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        0.0
    } else {
        samples.iter().sum::<f64>() / samples.len() as f64
    }
}

/// fit a mixture of a normal and a uniform distribution to `samples`
///
/// Arguments:
///
/// * `samples` - observed values, e.g. mass errors of candidate matches
/// * `num_iterations` - maximum number of EM iterations
///
/// Returns:
///
/// * `NormUnifFit` - mean and variance of the normal component and its mixing fraction
///
/// # Examples
///
/// ```
/// use lcmswarp::algorithm::mixture::norm_unif_em;
///
/// let fit = norm_unif_em(&[], 16);
/// assert_eq!((fit.mean, fit.variance, fit.normal_fraction), (0.0, 0.1, 0.0));
///
/// let fit = norm_unif_em(&[3.0, 3.0, 3.0], 16);
/// assert_eq!((fit.mean, fit.variance, fit.normal_fraction), (3.0, 0.1, 0.0));
/// ```
pub fn norm_unif_em(samples: &[f64], num_iterations: usize) -> NormUnifFit {
    let (min, max) = match range_of(samples) {
        Some(range) => range,
        None => return NormUnifFit { mean: 0.0, variance: DEGENERATE_VARIANCE, normal_fraction: 0.0 },
    };
    if is_flat(min, max) {
        return NormUnifFit { mean: mean_of(samples), variance: DEGENERATE_VARIANCE, normal_fraction: 0.0 };
    }

    let unif = 1.0 / (max - min);
    let n = samples.len() as f64;

    let mut mean = 0.0;
    let mut variance: f64 = 10.0;
    let mut normal_fraction = 0.5;
    let mut posterior = vec![0.0; samples.len()];

    for _ in 0..num_iterations {
        let normal = match Normal::new(mean, variance.sqrt()) {
            Ok(normal) => normal,
            Err(_) => break,
        };

        // E-step
        for (p, &x) in posterior.iter_mut().zip(samples.iter()) {
            let p_norm = normal_fraction * normal.pdf(x);
            let p_unif = (1.0 - normal_fraction) * unif;
            let total = p_norm + p_unif;
            *p = if total > 0.0 { p_norm / total } else { 0.0 };
        }

        // M-step
        let weight: f64 = posterior.iter().sum();
        if !(weight > 0.0) {
            break;
        }
        normal_fraction = weight / n;
        mean = posterior.iter().zip(samples.iter()).map(|(p, x)| p * x).sum::<f64>() / weight;
        variance = posterior
            .iter()
            .zip(samples.iter())
            .map(|(p, x)| p * (x - mean) * (x - mean))
            .sum::<f64>()
            / weight;

        if variance < MIN_VARIANCE {
            variance = MIN_VARIANCE;
            break;
        }
    }

    NormUnifFit { mean, variance, normal_fraction }
}

/// fit a mixture of a 2-D normal with diagonal covariance and a uniform distribution
/// over the bounding box of the samples
///
/// Arguments:
///
/// * `xs` - first coordinate of every sample, e.g. ppm mass errors
/// * `ys` - second coordinate of every sample, e.g. NET errors
/// * `num_iterations` - number of EM iterations
///
/// Returns:
///
/// * `TwoDemFit` - per-axis mean and std of the normal component and its mixing fraction
///
/// Empty samples or a bounding box without area fall back to the sample means,
/// `std = sqrt(0.1)` on both axes and a normal fraction of zero.
pub fn two_d_em(xs: &[f64], ys: &[f64], num_iterations: usize) -> TwoDemFit {
    let n = xs.len().min(ys.len());
    let (xs, ys) = (&xs[..n], &ys[..n]);

    let fallback = TwoDemFit {
        mean_x: mean_of(xs),
        std_x: DEGENERATE_VARIANCE.sqrt(),
        mean_y: mean_of(ys),
        std_y: DEGENERATE_VARIANCE.sqrt(),
        normal_fraction: 0.0,
    };

    let ((min_x, max_x), (min_y, max_y)) = match (range_of(xs), range_of(ys)) {
        (Some(rx), Some(ry)) => (rx, ry),
        _ => return fallback,
    };
    if is_flat(min_x, max_x) || is_flat(min_y, max_y) {
        return fallback;
    }

    let unif = 1.0 / ((max_x - min_x) * (max_y - min_y));
    let count = n as f64;

    let mut mean_x = fallback.mean_x;
    let mut mean_y = fallback.mean_y;
    let mut std_x = (xs.iter().map(|x| (x - mean_x).powi(2)).sum::<f64>() / count).sqrt().max(MIN_STD_2D);
    let mut std_y = (ys.iter().map(|y| (y - mean_y).powi(2)).sum::<f64>() / count).sqrt().max(MIN_STD_2D);
    let mut normal_fraction = 0.5;
    let mut posterior = vec![0.0; n];

    for _ in 0..num_iterations {
        let (normal_x, normal_y) = match (Normal::new(mean_x, std_x), Normal::new(mean_y, std_y)) {
            (Ok(nx), Ok(ny)) => (nx, ny),
            _ => break,
        };

        for i in 0..n {
            let p_norm = normal_fraction * normal_x.pdf(xs[i]) * normal_y.pdf(ys[i]);
            let p_unif = (1.0 - normal_fraction) * unif;
            let total = p_norm + p_unif;
            posterior[i] = if total > 0.0 { p_norm / total } else { 0.0 };
        }

        let weight: f64 = posterior.iter().sum();
        if !(weight > 0.0) {
            break;
        }
        normal_fraction = weight / count;

        mean_x = (0..n).map(|i| posterior[i] * xs[i]).sum::<f64>() / weight;
        mean_y = (0..n).map(|i| posterior[i] * ys[i]).sum::<f64>() / weight;

        let var_x = (0..n).map(|i| posterior[i] * (xs[i] - mean_x).powi(2)).sum::<f64>() / weight;
        let var_y = (0..n).map(|i| posterior[i] * (ys[i] - mean_y).powi(2)).sum::<f64>() / weight;
        std_x = var_x.sqrt().max(MIN_STD_2D);
        std_y = var_y.sqrt().max(MIN_STD_2D);
    }

    TwoDemFit { mean_x, std_x, mean_y, std_y, normal_fraction }
}
