use log::{debug, warn};

use crate::algorithm::calibration::{fit_mass_calibration, required_matches, MassCalibration};
use crate::algorithm::matching::build_match_set;
use crate::algorithm::mixture::{two_d_em, TWO_D_EM_ITERATIONS};
use crate::algorithm::regression::LinearRegression;
use crate::algorithm::warp::{fit_net_warp, section_heat_map, NetWarp, WarpParams};
use crate::chemistry::utility::ppm_error;
use crate::data::alignment::{
    AlignmentData, AlignmentFunction, AlignmentStage, AlignmentWarning, HeatMap, ResidualData,
};
use crate::data::feature::{FeatureMatch, MassTimeFeature};
use crate::data::histogram::Histogram;
use crate::data::options::{AlignmentOptions, MzBoundary};

/// Fits the NET warp and mass calibration of one m/z boundary.
///
/// # Description
///
/// A processor is created for a single pass and consumed by `process`; concurrent
/// alignments each build their own.
///
pub struct AlignmentProcessor<'a> {
    options: &'a AlignmentOptions,
    boundary: MzBoundary,
    use_drift_times: bool,
}

impl<'a> AlignmentProcessor<'a> {
    /// Creates a processor for the features of `boundary`.
    ///
    /// # Arguments
    ///
    /// * `options` - validated alignment options
    /// * `boundary` - m/z range the alignee features were taken from
    /// * `use_drift_times` - whether both sides carry drift times worth comparing
    pub fn new(options: &'a AlignmentOptions, boundary: MzBoundary, use_drift_times: bool) -> Self {
        AlignmentProcessor { options, boundary, use_drift_times }
    }

    fn low_match_count(&self, stage: AlignmentStage, found: usize, required: usize) -> AlignmentWarning {
        let warning = AlignmentWarning::LowMatchCount { stage, found, required, boundary: self.boundary };
        warn!("{}", warning);
        warning
    }

    /// Aligns `alignee` onto `baseline`.
    ///
    /// Never fails: stages without enough matches fall back to identity transforms and
    /// leave a `LowMatchCount` warning in the result.
    pub fn process(self, alignee: &[MassTimeFeature], baseline: &[MassTimeFeature]) -> AlignmentData {
        let options = self.options;
        let mut warnings = Vec::new();

        let match_set = build_match_set(
            alignee,
            baseline,
            options.mass_tolerance,
            options.net_tolerance,
            options.max_promiscuity,
        );
        debug!(
            "m/z {}: {} candidates, {} matches kept, {} promiscuous features excluded",
            self.boundary,
            match_set.num_candidates,
            match_set.matches.len(),
            match_set.promiscuous.len()
        );
        let matches = match_set.matches;

        let mass_errors: Vec<f64> = matches.iter().map(|m| m.ppm_mass_error).collect();
        let net_errors: Vec<f64> = matches.iter().map(|m| m.net_error).collect();
        let stats = two_d_em(&mass_errors, &net_errors, TWO_D_EM_ITERATIONS);
        debug!(
            "m/z {}: mass error {:.3} +- {:.3} ppm, NET error {:.4} +- {:.4}, normal fraction {:.3}",
            self.boundary, stats.mean_x, stats.std_x, stats.mean_y, stats.std_y, stats.normal_fraction
        );

        let params = WarpParams {
            num_sections: options.num_time_sections,
            contraction_factor: options.contraction_factor,
            max_time_distortion: options.max_time_distortion,
        };

        let (net_warp, regression, heat_map) = match fit_net_warp(&matches, &params, stats.std_y) {
            Ok(fit) => {
                debug!(
                    "m/z {}: warp over {} sections, {} kept, spline: {}",
                    self.boundary,
                    fit.sections.len(),
                    fit.sections.iter().filter(|s| s.kept).count(),
                    fit.warp.uses_spline()
                );
                let heat_map = section_heat_map(&matches, fit.sections.len(), stats.std_y, stats.normal_fraction);
                (fit.warp, fit.regression, heat_map)
            }
            Err(low) => {
                warnings.push(self.low_match_count(AlignmentStage::NetWarp, low.found, low.required));
                (NetWarp::identity(), LinearRegression::identity(), HeatMap::default())
            }
        };

        let mass_calibration = if options.mass_calibration_enabled() {
            let required = required_matches(options);
            if matches.len() < required {
                warnings.push(self.low_match_count(AlignmentStage::MassCalibration, matches.len(), required));
                MassCalibration::identity(options.calibration_type)
            } else {
                let mz: Vec<f64> = matches.iter().map(|m| alignee[m.aligned_index].mz).collect();
                let net: Vec<f64> = matches.iter().map(|m| m.net_alignee).collect();
                let calibration = fit_mass_calibration(&mz, &net, &mass_errors, options, stats.mean_x, stats.std_x);
                // outlier rejection can leave too little to fit a curve through
                if calibration.is_identity() {
                    warnings.push(self.low_match_count(AlignmentStage::MassCalibration, calibration.support(), required));
                }
                calibration
            }
        } else {
            MassCalibration::identity(options.calibration_type)
        };

        let function = AlignmentFunction { boundary: self.boundary, net_warp, mass_calibration };
        let residuals = residuals(&matches, alignee, baseline, &function, &regression);

        let drift_errors: Vec<f64> = if self.use_drift_times {
            matches.iter().map(|m| m.drift_error).collect()
        } else {
            Vec::new()
        };

        AlignmentData {
            net_slope: regression.slope,
            net_intercept: regression.intercept,
            net_rsquared: regression.rsquared,
            mass_mean: stats.mean_x,
            mass_std: stats.std_x,
            net_mean: stats.mean_y,
            net_std: stats.std_y,
            normal_fraction: stats.normal_fraction,
            mass_error_histogram: Histogram::from_samples(&residuals.mass_error_corrected, options.mass_bin_size),
            net_error_histogram: Histogram::from_samples(&residuals.custom_net, options.net_bin_size),
            drift_error_histogram: Histogram::from_samples(&drift_errors, options.drift_time_bin_size),
            heat_map,
            residuals,
            num_matches: matches.len(),
            functions: vec![function],
            warnings,
            ..Default::default()
        }
    }
}

fn residuals(
    matches: &[FeatureMatch],
    alignee: &[MassTimeFeature],
    baseline: &[MassTimeFeature],
    function: &AlignmentFunction,
    regression: &LinearRegression,
) -> ResidualData {
    let mut residuals = ResidualData::default();

    for m in matches {
        let feature = &alignee[m.aligned_index];
        let reference = &baseline[m.baseline_index];

        let warped = function.warp_net(m.net_alignee);
        let linear = regression.predict(m.net_alignee);
        let calibrated = function.calibrate_mass(feature.mono_mass, feature.mz, feature.net);
        let corrected = ppm_error(calibrated, reference.mono_mass);
        let mz_corrected = m.ppm_mass_error - function.mass_calibration.mz_curve.evaluate(feature.mz);

        residuals.net.push(m.net_alignee);
        residuals.linear_net.push(m.net_baseline - linear);
        residuals.custom_net.push(m.net_baseline - warped);
        residuals.linear_custom_net.push(warped - linear);
        residuals.mass_error.push(m.ppm_mass_error);
        residuals.mass_error_corrected.push(corrected);
        residuals.mz.push(feature.mz);
        residuals.mz_mass_error.push(m.ppm_mass_error);
        residuals.mz_mass_error_corrected.push(mz_corrected);
    }

    residuals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chemistry::utility::calculate_mz;
    use crate::data::options::{AlignmentType, CalibrationType, MassRegressionMethod};

    fn features(n: usize, shift: f64, ppm: f64) -> Vec<MassTimeFeature> {
        (0..n)
            .map(|i| {
                let mass = (800.0 + i as f64 * 0.5) * (1.0 + ppm / 1e6);
                let net = i as f64 / (n - 1) as f64 + shift;
                MassTimeFeature::new(i as i32, mass, calculate_mz(mass, 1), net, 1.0)
            })
            .collect()
    }

    #[test]
    fn test_empty_alignee_falls_back_to_identity() {
        let options = AlignmentOptions::default();
        let baseline = features(50, 0.0, 0.0);
        let data = AlignmentProcessor::new(&options, MzBoundary::unbounded(), false).process(&[], &baseline);

        assert_eq!(data.num_matches, 0);
        assert_eq!(data.warnings.len(), 2);
        assert!(data.is_low_confidence());
        assert!(data.functions[0].net_warp.is_identity());
        assert!(data.functions[0].mass_calibration.is_identity());
    }

    #[test]
    fn test_net_only_alignment_skips_calibration() {
        let options = AlignmentOptions { alignment_type: AlignmentType::NetWarp, mass_tolerance: 25.0, ..Default::default() };
        let baseline = features(100, 0.0, 0.0);
        let alignee = features(100, 0.03, 10.0);
        let data = AlignmentProcessor::new(&options, MzBoundary::unbounded(), false).process(&alignee, &baseline);

        assert!(data.warnings.is_empty());
        assert!(data.functions[0].mass_calibration.is_identity());
        assert!((data.functions[0].warp_net(0.5) - 0.47).abs() < 1e-6);
        assert!((data.mass_mean - 10.0).abs() < 1e-3);
    }

    #[test]
    fn test_residuals_and_histograms_cover_matches() {
        let options = AlignmentOptions { mass_tolerance: 25.0, ..Default::default() };
        let baseline = features(100, 0.0, 0.0);
        let alignee = features(100, 0.03, 10.0);
        let data = AlignmentProcessor::new(&options, MzBoundary::unbounded(), false).process(&alignee, &baseline);

        assert_eq!(data.num_matches, 100);
        assert_eq!(data.residuals.len(), 100);
        assert_eq!(data.mass_error_histogram.total_count(), 100.0);
        assert_eq!(data.net_error_histogram.total_count(), 100.0);
        assert!(data.drift_error_histogram.is_empty());
        assert!(data.residuals.mass_error_corrected.iter().all(|e| e.abs() < 0.1));
        assert!(data.residuals.custom_net.iter().all(|e| e.abs() < 1e-6));
        assert_eq!(data.heat_map.scores.len(), 50);
    }

    #[test]
    fn test_rejected_calibration_is_reported() {
        // 26 matches clear the floor of 24, but four 12 ppm outliers are rejected before the fit
        let baseline = features(26, 0.0, 0.0);
        let mut alignee = features(26, 0.0, 5.0);
        for (i, ppm) in [(3, 17.0), (11, -7.0), (19, 17.0), (24, -7.0)] {
            let mass = (800.0 + i as f64 * 0.5) * (1.0 + ppm / 1e6);
            alignee[i] = MassTimeFeature::new(i as i32, mass, calculate_mz(mass, 1), alignee[i].net, 1.0);
        }
        let options = AlignmentOptions {
            mass_tolerance: 25.0,
            mass_calibration_method: MassRegressionMethod::LeastSquares,
            ..Default::default()
        };
        let data = AlignmentProcessor::new(&options, MzBoundary::unbounded(), false).process(&alignee, &baseline);

        assert_eq!(data.num_matches, 26);
        assert!(data.functions[0].mass_calibration.is_identity());
        assert!(data.is_low_confidence());
        assert_eq!(
            data.warnings,
            vec![AlignmentWarning::LowMatchCount {
                stage: AlignmentStage::MassCalibration,
                found: 22,
                required: 24,
                boundary: MzBoundary::unbounded(),
            }]
        );
    }

    #[test]
    fn test_mz_residuals_only_remove_mz_curve() {
        let options = AlignmentOptions {
            mass_tolerance: 25.0,
            calibration_type: CalibrationType::HybridRegression,
            mass_calibration_method: MassRegressionMethod::LeastSquares,
            ..Default::default()
        };
        let baseline = features(100, 0.0, 0.0);
        let alignee = features(100, 0.0, 10.0);
        let data = AlignmentProcessor::new(&options, MzBoundary::unbounded(), false).process(&alignee, &baseline);

        let calibration = &data.functions[0].mass_calibration;
        let residuals = &data.residuals;
        assert_eq!(residuals.mz_mass_error, residuals.mass_error);
        for i in 0..residuals.len() {
            let expected = residuals.mass_error[i] - calibration.mz_curve.evaluate(residuals.mz[i]);
            assert!((residuals.mz_mass_error_corrected[i] - expected).abs() < 1e-9);
        }
        assert!(residuals.mz_mass_error_corrected.iter().all(|e| e.abs() < 0.1));
    }
}
