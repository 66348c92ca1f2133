use itertools::{Itertools, MinMaxResult};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::algorithm::mixture::{norm_unif_em, NORM_UNIF_EM_ITERATIONS};
use crate::algorithm::spline::{linear_interpolate, NaturalCubicSpline};

/// Least-squares line `y = slope * x + intercept` with its coefficient of determination.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinearRegression {
    pub slope: f64,
    pub intercept: f64,
    pub rsquared: f64,
}

impl LinearRegression {
    pub fn identity() -> Self {
        LinearRegression { slope: 1.0, intercept: 0.0, rsquared: 0.0 }
    }

    pub fn predict(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

/// ordinary least squares fit of `ys` against `xs`
///
/// Fewer than two points or no spread in `xs` give the identity line with `rsquared = 0`.
///
/// # Examples
///
/// ```
/// use lcmswarp::algorithm::regression::linear_regression;
///
/// let fit = linear_regression(&[0.0, 1.0, 2.0], &[1.0, 3.0, 5.0]);
/// assert!((fit.slope - 2.0).abs() < 1e-12);
/// assert!((fit.intercept - 1.0).abs() < 1e-12);
/// assert!((fit.rsquared - 1.0).abs() < 1e-12);
/// ```
pub fn linear_regression(xs: &[f64], ys: &[f64]) -> LinearRegression {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return LinearRegression::identity();
    }
    let len = n as f64;
    let x_mean = xs[..n].iter().sum::<f64>() / len;
    let y_mean = ys[..n].iter().sum::<f64>() / len;

    let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
    for i in 0..n {
        let dx = xs[i] - x_mean;
        let dy = ys[i] - y_mean;
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }
    if sxx <= 0.0 {
        return LinearRegression::identity();
    }

    let slope = sxy / sxx;
    let intercept = y_mean - slope * x_mean;
    let ss_res: f64 = (0..n).map(|i| (ys[i] - (slope * xs[i] + intercept)).powi(2)).sum();
    let rsquared = if syy > 0.0 { 1.0 - ss_res / syy } else { 1.0 };

    LinearRegression { slope, intercept, rsquared }
}

/// Settings of the slice-grid regression.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CentralRegressionParams {
    pub num_x_slices: usize,
    pub num_y_slices: usize,
    pub window: f64,
    pub max_z_score: f64,
}

/// fit a piecewise linear error curve by locating the densest error band in each x slice
///
/// Arguments:
///
/// * `xs` - independent variable of every match, e.g. m/z
/// * `errors` - error of every match, e.g. ppm mass error
/// * `params` - grid size, error window and z-score cutoff
/// * `center` - mean of the true-match error component
/// * `spread` - std of the true-match error component
///
/// Returns:
///
/// * `(Vec<f64>, Vec<f64>, usize)` - surviving grid points as knots, sorted by x, empty if none
///   survive; and the number of errors inside the bands of the surviving slices
pub fn central_regression(
    xs: &[f64],
    errors: &[f64],
    params: &CentralRegressionParams,
    center: f64,
    spread: f64,
) -> (Vec<f64>, Vec<f64>, usize) {
    let n = xs.len().min(errors.len());
    let (min_x, max_x) = match xs[..n].iter().copied().minmax() {
        MinMaxResult::NoElements => return (Vec::new(), Vec::new(), 0),
        MinMaxResult::OneElement(v) => (v, v),
        MinMaxResult::MinMax(lo, hi) => (lo, hi),
    };

    let num_x = params.num_x_slices.max(1);
    let num_y = params.num_y_slices.max(1);
    let x_width = (max_x - min_x) / num_x as f64;
    let y_width = 2.0 * params.window / num_y as f64;

    let mut slices: Vec<Vec<f64>> = vec![Vec::new(); num_x];
    for i in 0..n {
        if errors[i].abs() > params.window {
            continue;
        }
        let slice = if x_width > 0.0 {
            (((xs[i] - min_x) / x_width).floor() as usize).min(num_x - 1)
        } else {
            0
        };
        slices[slice].push(errors[i]);
    }

    let y_bin = |e: f64| -> usize {
        if y_width > 0.0 {
            (((e + params.window) / y_width).floor() as usize).min(num_y - 1)
        } else {
            0
        }
    };

    // one bin of the error grid cannot resolve biases any finer
    let threshold = (params.max_z_score * spread).max(y_width);

    let mut knots_x = Vec::new();
    let mut knots_y = Vec::new();
    let mut support = 0;

    for (s, slice) in slices.iter().enumerate() {
        if slice.is_empty() {
            continue;
        }
        let mut counts = vec![0usize; num_y];
        for &e in slice {
            counts[y_bin(e)] += 1;
        }
        let mut mode = 0;
        for (bin, &count) in counts.iter().enumerate() {
            if count > counts[mode] {
                mode = bin;
            }
        }

        let band: Vec<f64> = slice
            .iter()
            .copied()
            .filter(|&e| y_bin(e).abs_diff(mode) <= 1)
            .collect();
        let bias = band.iter().sum::<f64>() / band.len() as f64;

        if (bias - center).abs() > threshold {
            continue;
        }
        knots_x.push(min_x + (s as f64 + 0.5) * x_width);
        knots_y.push(bias);
        support += band.len();
    }

    (knots_x, knots_y, support)
}

// least-squares spline with `num_knots` equally spaced knots over the range of `xs`
fn fit_regression_spline(xs: &[f64], errors: &[f64], num_knots: usize) -> Option<NaturalCubicSpline> {
    let (min_x, max_x) = match xs.iter().copied().minmax() {
        MinMaxResult::NoElements => return None,
        MinMaxResult::MinMax(lo, hi) if hi > lo => (lo, hi),
        _ => {
            let mean = errors.iter().sum::<f64>() / errors.len() as f64;
            return Some(NaturalCubicSpline::natural(&[xs[0]], &[mean]));
        }
    };

    let step = (max_x - min_x) / (num_knots - 1) as f64;
    let knots: Vec<f64> = (0..num_knots).map(|k| min_x + k as f64 * step).collect();

    // the spline is linear in its knot values, column k is the spline through the k-th unit vector
    let mut design = DMatrix::<f64>::zeros(xs.len(), num_knots);
    for k in 0..num_knots {
        let mut unit = vec![0.0; num_knots];
        unit[k] = 1.0;
        let basis = NaturalCubicSpline::natural(&knots, &unit);
        for (row, &x) in xs.iter().enumerate() {
            design[(row, k)] = basis.evaluate(x);
        }
    }

    let target = DVector::from_column_slice(errors);
    let solution = design.svd(true, true).solve(&target, 1e-12).ok()?;
    let values: Vec<f64> = solution.iter().copied().collect();

    let spline = NaturalCubicSpline::natural(&knots, &values);
    if spline.is_degenerate() {
        None
    } else {
        Some(spline)
    }
}

/// fit a natural cubic regression spline with `num_knots` equally spaced knots
///
/// A first fit over all points yields residuals; residuals farther than `max_z_score`
/// standard deviations from the normal component of a normal/uniform fit mark outliers,
/// and the spline is refit without them. Returns `None` if fewer than two points per
/// knot are available.
pub fn lsq_spline_regression(
    xs: &[f64],
    errors: &[f64],
    num_knots: usize,
    max_z_score: f64,
) -> Option<NaturalCubicSpline> {
    lsq_spline_fit(xs, errors, num_knots, max_z_score).0
}

/// `lsq_spline_regression` that also returns the number of points left after outlier
/// rejection, or the number of points offered if it never got that far
pub fn lsq_spline_fit(
    xs: &[f64],
    errors: &[f64],
    num_knots: usize,
    max_z_score: f64,
) -> (Option<NaturalCubicSpline>, usize) {
    let n = xs.len().min(errors.len());
    let num_knots = num_knots.max(2);
    if n < 2 * num_knots {
        return (None, n);
    }
    let (xs, errors) = (&xs[..n], &errors[..n]);

    let first = match fit_regression_spline(xs, errors, num_knots) {
        Some(first) => first,
        None => return (None, n),
    };
    let residuals: Vec<f64> = (0..n).map(|i| errors[i] - first.evaluate(xs[i])).collect();
    let fit = norm_unif_em(&residuals, NORM_UNIF_EM_ITERATIONS);
    let cutoff = max_z_score * fit.std();

    let (kept_x, kept_e): (Vec<f64>, Vec<f64>) = (0..n)
        .filter(|&i| (residuals[i] - fit.mean).abs() <= cutoff)
        .map(|i| (xs[i], errors[i]))
        .unzip();

    let support = kept_x.len();
    if support < 2 * num_knots {
        return (None, support);
    }
    (fit_regression_spline(&kept_x, &kept_e, num_knots), support)
}

/// A ppm bias as a function of one coordinate.
///
/// The piecewise linear part comes from the slice-grid regression, the spline part from
/// the least-squares regression; both are held constant beyond their knot range and
/// their values add up.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BiasCurve {
    pub knots_x: Vec<f64>,
    pub knots_y: Vec<f64>,
    pub spline: Option<NaturalCubicSpline>,
    /// number of points the curve rests on
    #[serde(default)]
    pub support: usize,
}

impl BiasCurve {
    pub fn is_identity(&self) -> bool {
        self.knots_x.is_empty() && self.spline.is_none()
    }

    pub fn evaluate(&self, x: f64) -> f64 {
        let mut bias = if self.knots_x.is_empty() {
            0.0
        } else {
            linear_interpolate(&self.knots_x, &self.knots_y, x)
        };
        if let Some(spline) = &self.spline {
            let (xs, _) = spline.knots();
            if let (Some(&lo), Some(&hi)) = (xs.first(), xs.last()) {
                bias += spline.evaluate(x.clamp(lo, hi));
            }
        }
        bias
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::distributions::Distribution;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use statrs::distribution::Normal;

    #[test]
    fn test_flat_regression_is_identity() {
        let fit = linear_regression(&[1.0, 1.0, 1.0], &[0.0, 1.0, 2.0]);
        assert_eq!(fit, LinearRegression::identity());
        assert_eq!(linear_regression(&[1.0], &[2.0]), LinearRegression::identity());
    }

    #[test]
    fn test_central_regression_follows_trend_and_ignores_noise() {
        // bias grows linearly from 0 to 11 ppm over m/z 400..1500, with a few far outliers
        let mut xs = Vec::new();
        let mut errors = Vec::new();
        for i in 0..600 {
            let mz = 400.0 + i as f64 * (1100.0 / 600.0);
            xs.push(mz);
            errors.push((mz - 400.0) / 100.0 + if i % 2 == 0 { 0.3 } else { -0.3 });
        }
        for i in 0..30 {
            xs.push(400.0 + i as f64 * 35.0);
            errors.push(if i % 2 == 0 { 40.0 } else { -45.0 });
        }

        let params = CentralRegressionParams { num_x_slices: 11, num_y_slices: 50, window: 50.0, max_z_score: 3.0 };
        let (kx, ky, support) = central_regression(&xs, &errors, &params, 5.5, 3.5);

        assert_eq!(kx.len(), 11);
        assert_eq!(support, 600);
        let curve = BiasCurve { knots_x: kx, knots_y: ky, ..Default::default() };
        for mz in [500.0, 800.0, 1200.0] {
            let expected = (mz - 400.0) / 100.0;
            assert!((curve.evaluate(mz) - expected).abs() < 1.0, "mz {} -> {}", mz, curve.evaluate(mz));
        }
    }

    #[test]
    fn test_central_regression_rejects_off_center_slices() {
        let xs = vec![1.0, 1.1, 1.2, 5.0, 5.1, 5.2];
        let errors = vec![0.1, 0.0, -0.1, 30.0, 30.2, 29.8];
        let params = CentralRegressionParams { num_x_slices: 2, num_y_slices: 50, window: 50.0, max_z_score: 3.0 };
        let (kx, ky, support) = central_regression(&xs, &errors, &params, 0.0, 1.0);
        assert_eq!(kx.len(), 1);
        assert_eq!(support, 3);
        assert!(ky[0].abs() < 0.2);
    }

    #[test]
    fn test_lsq_spline_recovers_smooth_curve() {
        let xs: Vec<f64> = (0..400).map(|i| i as f64 / 400.0).collect();
        let errors: Vec<f64> = xs.iter().map(|x| 5.0 + 2.0 * (3.0 * x).sin()).collect();

        let spline = lsq_spline_regression(&xs, &errors, 8, 3.0).unwrap();
        for &x in &[0.1f64, 0.37, 0.5, 0.81] {
            let expected = 5.0 + 2.0 * (3.0 * x).sin();
            assert!((spline.evaluate(x) - expected).abs() < 0.05, "x {}", x);
        }
    }

    #[test]
    fn test_lsq_spline_ignores_outliers() {
        let mut rng = StdRng::seed_from_u64(5);
        let noise = Normal::new(0.0, 0.5).unwrap();
        let xs: Vec<f64> = (0..400).map(|i| i as f64 / 400.0).collect();
        let mut errors: Vec<f64> = xs.iter().map(|x| 5.0 + 2.0 * (3.0 * x).sin() + noise.sample(&mut rng)).collect();
        for i in (0..400).step_by(10) {
            errors[i] += if i % 20 == 0 { 25.0 } else { -25.0 };
        }

        let spline = lsq_spline_regression(&xs, &errors, 8, 2.5).unwrap();
        for &x in &[0.1f64, 0.37, 0.5, 0.81] {
            let expected = 5.0 + 2.0 * (3.0 * x).sin();
            assert!((spline.evaluate(x) - expected).abs() < 0.3, "x {}", x);
        }
    }

    #[test]
    fn test_lsq_spline_needs_enough_points() {
        let xs = vec![0.0, 0.5, 1.0];
        let errors = vec![1.0, 2.0, 3.0];
        assert!(lsq_spline_regression(&xs, &errors, 4, 3.0).is_none());
        assert_eq!(lsq_spline_fit(&xs, &errors, 4, 3.0), (None, 3));
    }

    #[test]
    fn test_lsq_spline_gives_up_when_outliers_leave_too_few_points() {
        // 26 points for 12 knots: rejecting the four 12 ppm outliers drops below the floor
        let xs: Vec<f64> = (0..26).map(|i| 400.0 + i as f64 * 20.0).collect();
        let mut errors = vec![5.0; 26];
        for (i, delta) in [(3, 12.0), (11, -12.0), (19, 12.0), (24, -12.0)] {
            errors[i] += delta;
        }

        let (spline, support) = lsq_spline_fit(&xs, &errors, 12, 2.5);
        assert!(spline.is_none());
        assert_eq!(support, 22);
    }

    #[test]
    fn test_bias_curve_sums_parts_and_clamps() {
        let spline = NaturalCubicSpline::natural(&[0.0, 1.0], &[1.0, 2.0]);
        let curve = BiasCurve { knots_x: vec![0.0, 1.0], knots_y: vec![10.0, 10.0], spline: Some(spline), support: 0 };
        assert!((curve.evaluate(0.5) - 11.5).abs() < 1e-12);
        assert!((curve.evaluate(3.0) - 12.0).abs() < 1e-12);
        assert!(BiasCurve::default().is_identity());
        assert_eq!(BiasCurve::default().evaluate(42.0), 0.0);
    }
}
