use serde::{Deserialize, Serialize};

use crate::algorithm::mixture::{norm_unif_em, NORM_UNIF_EM_ITERATIONS};
use crate::algorithm::regression::{central_regression, lsq_spline_fit, BiasCurve, CentralRegressionParams};
use crate::chemistry::utility::remove_ppm_bias;
use crate::data::options::{AlignmentOptions, CalibrationType, MassRegressionMethod};

/// Systematic ppm mass bias as a function of m/z, alignee NET, or both.
///
/// # Description
///
/// `MzRegression` only evaluates `mz_curve`, `ScanRegression` only `net_curve`.
/// `HybridRegression` adds both, the NET curve having been fit on what the m/z curve left.
/// An identity calibration has empty curves and leaves every mass untouched.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MassCalibration {
    pub calibration_type: CalibrationType,
    pub mz_curve: BiasCurve,
    pub net_curve: BiasCurve,
}

impl MassCalibration {
    pub fn identity(calibration_type: CalibrationType) -> Self {
        MassCalibration {
            calibration_type,
            mz_curve: BiasCurve::default(),
            net_curve: BiasCurve::default(),
        }
    }

    pub fn is_identity(&self) -> bool {
        self.mz_curve.is_identity() && self.net_curve.is_identity()
    }

    /// number of matches the fitted curves rest on, the larger of both axes
    pub fn support(&self) -> usize {
        match self.calibration_type {
            CalibrationType::MzRegression => self.mz_curve.support,
            CalibrationType::ScanRegression => self.net_curve.support,
            CalibrationType::HybridRegression => self.mz_curve.support.max(self.net_curve.support),
        }
    }

    /// the ppm bias predicted for a feature at `mz` eluting at `net`
    pub fn ppm_bias(&self, mz: f64, net: f64) -> f64 {
        match self.calibration_type {
            CalibrationType::MzRegression => self.mz_curve.evaluate(mz),
            CalibrationType::ScanRegression => self.net_curve.evaluate(net),
            CalibrationType::HybridRegression => self.mz_curve.evaluate(mz) + self.net_curve.evaluate(net),
        }
    }

    /// remove the predicted bias from `mass`
    ///
    /// # Examples
    ///
    /// ```
    /// use lcmswarp::algorithm::calibration::MassCalibration;
    /// use lcmswarp::data::options::CalibrationType;
    ///
    /// let calibration = MassCalibration::identity(CalibrationType::MzRegression);
    /// assert_eq!(calibration.calibrate(1000.01, 501.0, 0.3), 1000.01);
    /// ```
    pub fn calibrate(&self, mass: f64, mz: f64, net: f64) -> f64 {
        if self.is_identity() {
            return mass;
        }
        remove_ppm_bias(mass, self.ppm_bias(mz, net))
    }
}

/// number of matches below which no calibration is attempted
///
/// Two matches per knot of the curve being fit; the hybrid method needs enough for
/// the larger of its two stages.
pub fn required_matches(options: &AlignmentOptions) -> usize {
    let central = options.mass_calib_num_x_slices;
    let lsq = options.mass_calib_lsq_num_knots;
    let knots = match options.mass_calibration_method {
        MassRegressionMethod::Central => central,
        MassRegressionMethod::LeastSquares => lsq,
        MassRegressionMethod::Hybrid => central.max(lsq),
    };
    2 * knots
}

fn central_params(options: &AlignmentOptions) -> CentralRegressionParams {
    CentralRegressionParams {
        num_x_slices: options.mass_calib_num_x_slices,
        num_y_slices: options.mass_calib_num_y_slices,
        window: options.mass_calib_window,
        max_z_score: options.mass_calib_max_z_score,
    }
}

/// fit one bias curve of `errors` over `xs`
///
/// Arguments:
///
/// * `xs` - calibration coordinate of every match
/// * `errors` - ppm error of every match
/// * `options` - selects the regression method and its grid and knot settings
/// * `center` - mean of the true-match error component
/// * `spread` - std of the true-match error component
///
/// Returns:
///
/// * `BiasCurve` - empty if no grid point or spline survived, `support` then tells how many
///   matches were left
pub fn fit_bias_curve(
    xs: &[f64],
    errors: &[f64],
    options: &AlignmentOptions,
    center: f64,
    spread: f64,
) -> BiasCurve {
    let lsq = |errors: &[f64]| {
        lsq_spline_fit(
            xs,
            errors,
            options.mass_calib_lsq_num_knots,
            options.mass_calib_lsq_max_z_score,
        )
    };

    match options.mass_calibration_method {
        MassRegressionMethod::Central => {
            let (knots_x, knots_y, support) = central_regression(xs, errors, &central_params(options), center, spread);
            BiasCurve { knots_x, knots_y, spline: None, support }
        }
        MassRegressionMethod::LeastSquares => {
            let (spline, support) = lsq(errors);
            BiasCurve { knots_x: Vec::new(), knots_y: Vec::new(), spline, support }
        }
        MassRegressionMethod::Hybrid => {
            let (knots_x, knots_y, grid_support) = central_regression(xs, errors, &central_params(options), center, spread);
            let grid = BiasCurve { knots_x, knots_y, spline: None, support: grid_support };
            let residual: Vec<f64> = xs.iter().zip(errors).map(|(&x, &e)| e - grid.evaluate(x)).collect();
            let (spline, lsq_support) = lsq(&residual);
            BiasCurve { spline, support: grid_support.max(lsq_support), ..grid }
        }
    }
}

/// fit the mass calibration of a set of matches
///
/// Arguments:
///
/// * `mz` - alignee m/z of every match
/// * `net` - alignee NET of every match
/// * `ppm_errors` - ppm mass error of every match
/// * `options` - calibration type, regression method and their settings
/// * `center` - mean ppm error of true matches, from the mixture fit
/// * `spread` - std of the ppm error of true matches
///
/// Returns:
///
/// * `MassCalibration` - fitted curves; callers check `required_matches` beforehand
pub fn fit_mass_calibration(
    mz: &[f64],
    net: &[f64],
    ppm_errors: &[f64],
    options: &AlignmentOptions,
    center: f64,
    spread: f64,
) -> MassCalibration {
    let calibration_type = options.calibration_type;
    let mut calibration = MassCalibration::identity(calibration_type);

    match calibration_type {
        CalibrationType::MzRegression => {
            calibration.mz_curve = fit_bias_curve(mz, ppm_errors, options, center, spread);
        }
        CalibrationType::ScanRegression => {
            calibration.net_curve = fit_bias_curve(net, ppm_errors, options, center, spread);
        }
        CalibrationType::HybridRegression => {
            let mz_curve = fit_bias_curve(mz, ppm_errors, options, center, spread);
            let residual: Vec<f64> = mz
                .iter()
                .zip(ppm_errors)
                .map(|(&x, &e)| e - mz_curve.evaluate(x))
                .collect();
            // the residual is centered again, its spread comes from a fresh mixture fit
            let fit = norm_unif_em(&residual, NORM_UNIF_EM_ITERATIONS);
            calibration.net_curve = fit_bias_curve(net, &residual, options, fit.mean, fit.std());
            calibration.mz_curve = mz_curve;
        }
    }

    calibration
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options_with(method: MassRegressionMethod, calibration_type: CalibrationType) -> AlignmentOptions {
        AlignmentOptions {
            mass_calibration_method: method,
            calibration_type,
            mass_calib_num_x_slices: 6,
            mass_calib_lsq_num_knots: 6,
            ..Default::default()
        }
    }

    #[test]
    fn test_constant_bias_removed() {
        let mz: Vec<f64> = (0..200).map(|i| 400.0 + i as f64 * 5.0).collect();
        let net: Vec<f64> = (0..200).map(|i| i as f64 / 200.0).collect();
        let errors = vec![10.0; 200];

        for method in [MassRegressionMethod::Central, MassRegressionMethod::LeastSquares, MassRegressionMethod::Hybrid] {
            let options = options_with(method, CalibrationType::MzRegression);
            let calibration = fit_mass_calibration(&mz, &net, &errors, &options, 10.0, 0.3);
            assert!(!calibration.is_identity(), "{}", method);
            let corrected = calibration.calibrate(1000.01, 700.0, 0.5);
            assert!((corrected - 1000.0).abs() < 1e-3, "{}: {}", method, corrected);
        }
    }

    #[test]
    fn test_scan_regression_follows_net_drift() {
        let mz: Vec<f64> = (0..300).map(|i| 400.0 + (i % 7) as f64 * 100.0).collect();
        let net: Vec<f64> = (0..300).map(|i| i as f64 / 300.0).collect();
        let errors: Vec<f64> = net.iter().map(|t| 4.0 * t).collect();

        let options = options_with(MassRegressionMethod::LeastSquares, CalibrationType::ScanRegression);
        let calibration = fit_mass_calibration(&mz, &net, &errors, &options, 2.0, 1.0);
        assert!(calibration.mz_curve.is_identity());
        assert!((calibration.ppm_bias(900.0, 0.25) - 1.0).abs() < 0.05);
        assert!((calibration.ppm_bias(400.0, 0.75) - 3.0).abs() < 0.05);
    }

    #[test]
    fn test_hybrid_regression_splits_axes() {
        let mz: Vec<f64> = (0..400).map(|i| 400.0 + (i * 37 % 400) as f64 * 2.0).collect();
        let net: Vec<f64> = (0..400).map(|i| i as f64 / 400.0).collect();
        let errors: Vec<f64> = mz.iter().zip(&net).map(|(m, t)| 5.0 + (m - 400.0) / 400.0 + 2.0 * t).collect();

        let options = options_with(MassRegressionMethod::LeastSquares, CalibrationType::HybridRegression);
        let calibration = fit_mass_calibration(&mz, &net, &errors, &options, 6.0, 1.0);
        for (m, t) in [(500.0, 0.2), (900.0, 0.6), (1100.0, 0.9)] {
            let expected = 5.0 + (m - 400.0) / 400.0 + 2.0 * t;
            assert!((calibration.ppm_bias(m, t) - expected).abs() < 0.3, "({}, {})", m, t);
        }
    }

    #[test]
    fn test_rejected_fit_reports_support() {
        let mz: Vec<f64> = (0..26).map(|i| 400.0 + i as f64 * 20.0).collect();
        let net: Vec<f64> = (0..26).map(|i| i as f64 / 26.0).collect();
        let mut errors = vec![5.0; 26];
        for (i, delta) in [(3, 12.0), (11, -12.0), (19, 12.0), (24, -12.0)] {
            errors[i] += delta;
        }

        let mut options = options_with(MassRegressionMethod::LeastSquares, CalibrationType::MzRegression);
        options.mass_calib_lsq_num_knots = 12;
        let calibration = fit_mass_calibration(&mz, &net, &errors, &options, 5.0, 4.0);
        assert!(calibration.is_identity());
        assert_eq!(calibration.support(), 22);
        assert_eq!(calibration.calibrate(1000.01, 700.0, 0.5), 1000.01);
    }

    #[test]
    fn test_required_matches() {
        let mut options = AlignmentOptions::default();
        assert_eq!(required_matches(&options), 24);
        options.mass_calibration_method = MassRegressionMethod::Hybrid;
        options.mass_calib_lsq_num_knots = 20;
        assert_eq!(required_matches(&options), 40);
    }
}
