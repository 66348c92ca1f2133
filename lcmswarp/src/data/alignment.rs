use std::fmt;
use std::fmt::{Display, Formatter};
use serde::{Deserialize, Serialize};

use crate::algorithm::calibration::MassCalibration;
use crate::algorithm::warp::NetWarp;
use crate::data::feature::MassTimeFeature;
use crate::data::histogram::Histogram;
use crate::data::options::MzBoundary;

/// Step of the alignment that fell back to an identity transform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlignmentStage {
    NetWarp,
    MassCalibration,
}

impl Display for AlignmentStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            AlignmentStage::NetWarp => write!(f, "NET warp"),
            AlignmentStage::MassCalibration => write!(f, "mass calibration"),
        }
    }
}

/// Non-fatal conditions recorded while aligning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum AlignmentWarning {
    /// too few matches survived, the stage uses an identity transform
    LowMatchCount {
        stage: AlignmentStage,
        found: usize,
        required: usize,
        boundary: MzBoundary,
    },
    /// only one side carries drift times, drift information is ignored
    DriftTimeMismatch {
        alignee_has_drift: bool,
        baseline_has_drift: bool,
    },
}

impl Display for AlignmentWarning {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            AlignmentWarning::LowMatchCount { stage, found, required, boundary } => write!(
                f,
                "{} in m/z {} uses identity: {} matches, {} required",
                stage, boundary, found, required
            ),
            AlignmentWarning::DriftTimeMismatch { alignee_has_drift, baseline_has_drift } => write!(
                f,
                "drift time mismatch (alignee: {}, baseline: {}), drift times ignored",
                alignee_has_drift, baseline_has_drift
            ),
        }
    }
}

/// Transform fitted on the features of one m/z boundary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlignmentFunction {
    pub boundary: MzBoundary,
    pub net_warp: NetWarp,
    pub mass_calibration: MassCalibration,
}

impl AlignmentFunction {
    pub fn warp_net(&self, net: f64) -> f64 {
        self.net_warp.evaluate(net)
    }

    /// calibrated mass, the calibration is evaluated at the alignee coordinates
    pub fn calibrate_mass(&self, mass: f64, mz: f64, net: f64) -> f64 {
        self.mass_calibration.calibrate(mass, mz, net)
    }
}

/// Section-to-section log-likelihood matrix with the section edges of both axes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HeatMap {
    /// rows alignee sections, columns baseline sections
    pub scores: Vec<Vec<f64>>,
    pub alignee_intervals: Vec<f64>,
    pub baseline_intervals: Vec<f64>,
}

/// Per-match residuals, concatenated across passes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResidualData {
    pub net: Vec<f64>,
    pub linear_net: Vec<f64>,
    pub custom_net: Vec<f64>,
    pub linear_custom_net: Vec<f64>,
    pub mass_error: Vec<f64>,
    pub mass_error_corrected: Vec<f64>,
    pub mz: Vec<f64>,
    /// ppm error against m/z, before any correction
    pub mz_mass_error: Vec<f64>,
    /// ppm error left after removing only the m/z bias curve
    pub mz_mass_error_corrected: Vec<f64>,
}

impl ResidualData {
    pub fn len(&self) -> usize {
        self.net.len()
    }

    pub fn is_empty(&self) -> bool {
        self.net.is_empty()
    }

    pub fn extend(&mut self, other: &ResidualData) {
        self.net.extend_from_slice(&other.net);
        self.linear_net.extend_from_slice(&other.linear_net);
        self.custom_net.extend_from_slice(&other.custom_net);
        self.linear_custom_net.extend_from_slice(&other.linear_custom_net);
        self.mass_error.extend_from_slice(&other.mass_error);
        self.mass_error_corrected.extend_from_slice(&other.mass_error_corrected);
        self.mz.extend_from_slice(&other.mz);
        self.mz_mass_error.extend_from_slice(&other.mz_mass_error);
        self.mz_mass_error_corrected.extend_from_slice(&other.mz_mass_error_corrected);
    }
}

/// Result of aligning one feature set onto a baseline.
///
/// # Description
///
/// Holds one `AlignmentFunction` per m/z boundary, the regression and mixture statistics,
/// error histograms, the heat map and residuals. Scalar statistics and the heat map describe
/// the last pass; histograms, residuals, warnings and match counts cover every pass.
///
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AlignmentData {
    pub functions: Vec<AlignmentFunction>,
    pub net_slope: f64,
    pub net_intercept: f64,
    pub net_rsquared: f64,
    pub mass_mean: f64,
    pub mass_std: f64,
    pub net_mean: f64,
    pub net_std: f64,
    pub normal_fraction: f64,
    pub mass_error_histogram: Histogram,
    pub net_error_histogram: Histogram,
    pub drift_error_histogram: Histogram,
    pub heat_map: HeatMap,
    pub residuals: ResidualData,
    pub min_baseline_net: f64,
    pub max_baseline_net: f64,
    pub min_scan: i32,
    pub max_scan: i32,
    pub num_matches: usize,
    pub warnings: Vec<AlignmentWarning>,
}

impl AlignmentData {
    /// true if any stage of any pass fell back to an identity transform
    pub fn is_low_confidence(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| matches!(w, AlignmentWarning::LowMatchCount { .. }))
    }

    /// the function of the first boundary containing `mz`
    pub fn function_for(&self, mz: f64) -> Option<&AlignmentFunction> {
        self.functions.iter().find(|f| f.boundary.contains(mz))
    }

    /// aligned NET of a feature at `mz`, unchanged outside every boundary
    pub fn net_warp(&self, mz: f64, net: f64) -> f64 {
        self.function_for(mz).map_or(net, |f| f.warp_net(net))
    }

    /// calibrated mass of a feature, unchanged outside every boundary
    pub fn calibrate_mass(&self, mass: f64, mz: f64, net: f64) -> f64 {
        self.function_for(mz).map_or(mass, |f| f.calibrate_mass(mass, mz, net))
    }

    /// a copy of `feature` with aligned NET and calibrated mass filled in
    pub fn transform(&self, feature: &MassTimeFeature) -> MassTimeFeature {
        let mut aligned = feature.clone();
        aligned.aligned_net = self.net_warp(feature.mz, feature.net);
        aligned.mono_mass_calibrated = self.calibrate_mass(feature.mono_mass, feature.mz, feature.net);
        aligned
    }

    /// fold a later pass into this one
    ///
    /// Histogram counts are added bin by nearest value, residuals appended, scalar
    /// statistics and the heat map replaced by those of `pass`.
    pub fn merge_pass(&mut self, pass: AlignmentData) {
        self.mass_error_histogram.merge_nearest(&pass.mass_error_histogram);
        self.net_error_histogram.merge_nearest(&pass.net_error_histogram);
        self.drift_error_histogram.merge_nearest(&pass.drift_error_histogram);
        self.residuals.extend(&pass.residuals);

        self.net_slope = pass.net_slope;
        self.net_intercept = pass.net_intercept;
        self.net_rsquared = pass.net_rsquared;
        self.mass_mean = pass.mass_mean;
        self.mass_std = pass.mass_std;
        self.net_mean = pass.net_mean;
        self.net_std = pass.net_std;
        self.normal_fraction = pass.normal_fraction;
        self.heat_map = pass.heat_map;

        self.functions.extend(pass.functions);
        self.warnings.extend(pass.warnings);
        self.num_matches += pass.num_matches;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::options::CalibrationType;

    fn shifted_function(boundary: MzBoundary, shift: f64) -> AlignmentFunction {
        AlignmentFunction {
            boundary,
            net_warp: NetWarp::from_knots(vec![0.1, 0.5, 0.9], vec![0.1 + shift, 0.5 + shift, 0.9 + shift]),
            mass_calibration: MassCalibration::identity(CalibrationType::MzRegression),
        }
    }

    #[test]
    fn test_transform_uses_matching_boundary() {
        let data = AlignmentData {
            functions: vec![
                shifted_function(MzBoundary::new(0.0, 600.0), 0.1),
                shifted_function(MzBoundary::new(600.0, 1200.0), -0.1),
            ],
            ..Default::default()
        };

        let low = MassTimeFeature::new(0, 1000.0, 500.0, 0.5, 1.0);
        let high = MassTimeFeature::new(1, 1500.0, 751.0, 0.5, 1.0);
        let outside = MassTimeFeature::new(2, 3000.0, 1501.0, 0.5, 1.0);

        assert!((data.transform(&low).aligned_net - 0.6).abs() < 1e-12);
        assert!((data.transform(&high).aligned_net - 0.4).abs() < 1e-12);
        let untouched = data.transform(&outside);
        assert_eq!(untouched.aligned_net, 0.5);
        assert_eq!(untouched.mono_mass_calibrated, 3000.0);
        assert_eq!(outside.aligned_net, 0.5);
    }

    #[test]
    fn test_merge_pass() {
        let mut first = AlignmentData {
            net_slope: 0.9,
            num_matches: 10,
            mass_error_histogram: Histogram::from_samples(&[0.0, 1.0], 1.0),
            residuals: ResidualData { net: vec![0.1, 0.2], ..Default::default() },
            ..Default::default()
        };
        let second = AlignmentData {
            net_slope: 1.1,
            num_matches: 5,
            mass_error_histogram: Histogram::from_samples(&[0.2, 1.1, 1.3], 1.0),
            residuals: ResidualData { net: vec![0.3], ..Default::default() },
            warnings: vec![AlignmentWarning::LowMatchCount {
                stage: AlignmentStage::MassCalibration,
                found: 3,
                required: 24,
                boundary: MzBoundary::new(0.0, 500.0),
            }],
            ..Default::default()
        };

        first.merge_pass(second);
        assert_eq!(first.net_slope, 1.1);
        assert_eq!(first.num_matches, 15);
        assert_eq!(first.mass_error_histogram.total_count(), 5.0);
        assert_eq!(first.residuals.net, vec![0.1, 0.2, 0.3]);
        assert!(first.is_low_confidence());
    }

    #[test]
    fn test_warning_display() {
        let warning = AlignmentWarning::DriftTimeMismatch { alignee_has_drift: true, baseline_has_drift: false };
        assert!(warning.to_string().contains("drift"));
    }
}
