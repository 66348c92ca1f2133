use serde::{Deserialize, Serialize};

/// boundary derivatives at or above this value select a natural (zero curvature) end
pub const NATURAL_BOUNDARY: f64 = 1e30;

/// returned by `evaluate` when the spline could not be fit
pub const SPLINE_ERROR_VALUE: f64 = -1.0;

/// Cubic spline through a set of knots with precomputed second derivatives.
///
/// # Description
///
/// Fitting solves the tridiagonal system for the second derivatives at every knot.
/// Knots with repeated or decreasing x mark the spline as degenerate, after which
/// `evaluate` answers `SPLINE_ERROR_VALUE` instead of panicking, so the spline can sit
/// inside bulk transform loops.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NaturalCubicSpline {
    xs: Vec<f64>,
    ys: Vec<f64>,
    y2: Vec<f64>,
    degenerate: bool,
}

impl NaturalCubicSpline {
    /// fit a spline with natural boundary conditions on both ends
    ///
    /// # Examples
    ///
    /// ```
    /// use lcmswarp::algorithm::spline::NaturalCubicSpline;
    ///
    /// let spline = NaturalCubicSpline::natural(&[0.0, 1.0, 2.0], &[0.0, 2.0, 4.0]);
    /// assert!((spline.evaluate(1.5) - 3.0).abs() < 1e-12);
    /// ```
    pub fn natural(xs: &[f64], ys: &[f64]) -> Self {
        Self::fit(xs, ys, NATURAL_BOUNDARY, NATURAL_BOUNDARY)
    }

    /// fit a spline through the knots `(xs, ys)`
    ///
    /// Arguments:
    ///
    /// * `xs` - knot positions, strictly increasing
    /// * `ys` - knot values
    /// * `yp1` - first derivative at the first knot, `>= 0.99e30` for a natural end
    /// * `ypn` - first derivative at the last knot, `>= 0.99e30` for a natural end
    ///
    /// Returns:
    ///
    /// * `NaturalCubicSpline` - the fitted spline, degenerate if the knots are unusable
    pub fn fit(xs: &[f64], ys: &[f64], yp1: f64, ypn: f64) -> Self {
        let n = xs.len().min(ys.len());
        let xs = xs[..n].to_vec();
        let ys = ys[..n].to_vec();

        let degenerate = n == 0
            || xs.windows(2).any(|w| !(w[1] > w[0]))
            || xs.iter().chain(ys.iter()).any(|v| !v.is_finite());

        if degenerate || n < 2 {
            return NaturalCubicSpline { y2: vec![0.0; n], xs, ys, degenerate };
        }

        let mut y2 = vec![0.0; n];
        let mut u = vec![0.0; n];

        if yp1 > 0.99 * NATURAL_BOUNDARY {
            y2[0] = 0.0;
            u[0] = 0.0;
        } else {
            let h = xs[1] - xs[0];
            y2[0] = -0.5;
            u[0] = (3.0 / h) * ((ys[1] - ys[0]) / h - yp1);
        }

        for i in 1..n - 1 {
            let sig = (xs[i] - xs[i - 1]) / (xs[i + 1] - xs[i - 1]);
            let p = sig * y2[i - 1] + 2.0;
            y2[i] = (sig - 1.0) / p;
            let slope_diff = (ys[i + 1] - ys[i]) / (xs[i + 1] - xs[i])
                - (ys[i] - ys[i - 1]) / (xs[i] - xs[i - 1]);
            u[i] = (6.0 * slope_diff / (xs[i + 1] - xs[i - 1]) - sig * u[i - 1]) / p;
        }

        let (qn, un) = if ypn > 0.99 * NATURAL_BOUNDARY {
            (0.0, 0.0)
        } else {
            let h = xs[n - 1] - xs[n - 2];
            (0.5, (3.0 / h) * (ypn - (ys[n - 1] - ys[n - 2]) / h))
        };

        y2[n - 1] = (un - qn * u[n - 2]) / (qn * y2[n - 2] + 1.0);
        for k in (0..n - 1).rev() {
            y2[k] = y2[k] * y2[k + 1] + u[k];
        }

        NaturalCubicSpline { xs, ys, y2, degenerate: false }
    }

    pub fn is_degenerate(&self) -> bool {
        self.degenerate
    }

    pub fn knots(&self) -> (&[f64], &[f64]) {
        (&self.xs, &self.ys)
    }

    /// bracketing interval `(klo, khi)` for `x`, clamped to the end intervals
    fn bracket(&self, x: f64) -> (usize, usize) {
        let n = self.xs.len();
        let mut klo = 0;
        let mut khi = n - 1;
        while khi - klo > 1 {
            let k = (khi + klo) >> 1;
            if self.xs[k] > x {
                khi = k;
            } else {
                klo = k;
            }
        }
        (klo, khi)
    }

    /// evaluate the spline at `x`
    ///
    /// Outside the knot range the cubic of the end interval is continued.
    pub fn evaluate(&self, x: f64) -> f64 {
        if self.degenerate {
            return SPLINE_ERROR_VALUE;
        }
        if self.xs.len() == 1 {
            return self.ys[0];
        }

        let (klo, khi) = self.bracket(x);
        let h = self.xs[khi] - self.xs[klo];
        if h == 0.0 {
            return SPLINE_ERROR_VALUE;
        }
        let a = (self.xs[khi] - x) / h;
        let b = (x - self.xs[klo]) / h;
        a * self.ys[klo]
            + b * self.ys[khi]
            + ((a * a * a - a) * self.y2[klo] + (b * b * b - b) * self.y2[khi]) * (h * h) / 6.0
    }

    pub fn evaluate_many(&self, xs: &[f64]) -> Vec<f64> {
        xs.iter().map(|&x| self.evaluate(x)).collect()
    }

    /// true if the first derivative is non-negative between the first and last knot
    ///
    /// On each interval the derivative is a quadratic in the local coordinate, so its
    /// minimum is found exactly at the interval ends or the vertex.
    pub fn is_monotone_increasing(&self) -> bool {
        if self.degenerate {
            return false;
        }
        for k in 0..self.xs.len().saturating_sub(1) {
            let h = self.xs[k + 1] - self.xs[k];
            let d = (self.ys[k + 1] - self.ys[k]) / h;
            let (m0, m1) = (self.y2[k], self.y2[k + 1]);

            // S'(b) = a2 * b^2 + a1 * b + a0, b in [0, 1]
            let a2 = h * (m1 - m0) / 2.0;
            let a1 = h * m0;
            let a0 = d - h * (2.0 * m0 + m1) / 6.0;

            let mut min = a0.min(a0 + a1 + a2);
            if a2 > 0.0 {
                let vertex = -a1 / (2.0 * a2);
                if vertex > 0.0 && vertex < 1.0 {
                    min = min.min(a0 - a1 * a1 / (4.0 * a2));
                }
            }
            if min < 0.0 {
                return false;
            }
        }
        true
    }
}

/// piecewise linear interpolation through `(xs, ys)`, constant beyond the ends
///
/// # Examples
///
/// ```
/// use lcmswarp::algorithm::spline::linear_interpolate;
///
/// let xs = [0.0, 1.0, 3.0];
/// let ys = [0.0, 1.0, 2.0];
/// assert_eq!(linear_interpolate(&xs, &ys, 2.0), 1.5);
/// assert_eq!(linear_interpolate(&xs, &ys, -1.0), 0.0);
/// assert_eq!(linear_interpolate(&xs, &ys, 5.0), 2.0);
/// ```
pub fn linear_interpolate(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    let n = xs.len().min(ys.len());
    if n == 0 {
        return 0.0;
    }
    if x <= xs[0] {
        return ys[0];
    }
    if x >= xs[n - 1] {
        return ys[n - 1];
    }
    let hi = xs[..n].partition_point(|&v| v <= x);
    let lo = hi - 1;
    let h = xs[hi] - xs[lo];
    if h <= 0.0 {
        return ys[lo];
    }
    ys[lo] + (ys[hi] - ys[lo]) * (x - xs[lo]) / h
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cubic(x: f64) -> f64 {
        x * x * x - 2.0 * x * x + x + 1.0
    }

    fn cubic_derivative(x: f64) -> f64 {
        3.0 * x * x - 4.0 * x + 1.0
    }

    #[test]
    fn test_reproduces_cubic_with_exact_end_slopes() {
        let xs: Vec<f64> = (0..=8).map(|i| i as f64 * 0.5).collect();
        let ys: Vec<f64> = xs.iter().map(|&x| cubic(x)).collect();
        let spline = NaturalCubicSpline::fit(&xs, &ys, cubic_derivative(0.0), cubic_derivative(4.0));

        for i in 0..=40 {
            let x = 0.05 + i as f64 * 0.0975;
            assert!((spline.evaluate(x) - cubic(x)).abs() < 1e-9, "x = {}", x);
        }
    }

    #[test]
    fn test_natural_spline_reproduces_line() {
        let xs = vec![0.0, 0.3, 0.5, 0.9, 1.0];
        let ys: Vec<f64> = xs.iter().map(|x| 2.0 * x - 1.0).collect();
        let spline = NaturalCubicSpline::natural(&xs, &ys);
        for x in [0.1, 0.42, 0.77, 0.99] {
            assert!((spline.evaluate(x) - (2.0 * x - 1.0)).abs() < 1e-12);
        }
        assert!(spline.is_monotone_increasing());
    }

    #[test]
    fn test_duplicate_knots_yield_error_value() {
        let spline = NaturalCubicSpline::natural(&[0.0, 1.0, 1.0, 2.0], &[0.0, 1.0, 2.0, 3.0]);
        assert!(spline.is_degenerate());
        assert_eq!(spline.evaluate(0.5), SPLINE_ERROR_VALUE);
        assert_eq!(spline.evaluate(1.5), SPLINE_ERROR_VALUE);
        assert!(!spline.is_monotone_increasing());
    }

    #[test]
    fn test_empty_and_single_knot() {
        assert_eq!(NaturalCubicSpline::natural(&[], &[]).evaluate(1.0), SPLINE_ERROR_VALUE);
        let single = NaturalCubicSpline::natural(&[0.5], &[2.0]);
        assert!(!single.is_degenerate());
        assert_eq!(single.evaluate(10.0), 2.0);
    }

    #[test]
    fn test_detects_overshoot() {
        // step-like data makes the natural spline dip between the flat knots
        let xs = [0.0, 1.0, 2.0, 3.0, 4.0];
        let ys = [0.0, 0.0, 0.0, 10.0, 10.0];
        let spline = NaturalCubicSpline::natural(&xs, &ys);
        assert!(!spline.is_monotone_increasing());
    }

    #[test]
    fn test_knots_are_interpolated() {
        let xs = [0.0, 0.2, 0.7, 1.0];
        let ys = [1.0, -1.0, 0.5, 3.0];
        let spline = NaturalCubicSpline::natural(&xs, &ys);
        for (x, y) in xs.iter().zip(ys.iter()) {
            assert!((spline.evaluate(*x) - y).abs() < 1e-12);
        }
    }
}
