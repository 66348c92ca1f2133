use std::fmt;
use std::fmt::{Display, Formatter};
use std::path::Path;
use serde::{Deserialize, Serialize};

use crate::error::{AlignmentError, Result};

/// Selects which coordinates the aligner corrects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlignmentType {
    /// NET warp only, masses pass through unchanged
    NetWarp,
    /// NET warp followed by mass recalibration
    NetMassWarp,
}

/// The independent variable of the mass calibration function.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalibrationType {
    /// ppm bias as a function of m/z
    MzRegression,
    /// ppm bias as a function of (warped) NET
    ScanRegression,
    /// m/z regression first, then NET regression on its residual
    HybridRegression,
}

/// How a ppm-bias curve is fit along one calibration axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MassRegressionMethod {
    /// slice grid + 2-D normal/uniform EM outlier rejection
    Central,
    /// least-squares natural cubic regression spline
    LeastSquares,
    /// central grid fit, refined by a least-squares spline over its residual
    Hybrid,
}

impl Display for MassRegressionMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            MassRegressionMethod::Central => write!(f, "Central"),
            MassRegressionMethod::LeastSquares => write!(f, "LeastSquares"),
            MassRegressionMethod::Hybrid => write!(f, "Hybrid"),
        }
    }
}

/// Half-open m/z range `[low, high)` aligned as one pass.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MzBoundary {
    pub low: f64,
    pub high: f64,
}

impl MzBoundary {
    pub fn new(low: f64, high: f64) -> Self {
        MzBoundary { low, high }
    }

    /// boundary covering every m/z value
    pub fn unbounded() -> Self {
        MzBoundary { low: f64::MIN, high: f64::MAX }
    }

    pub fn contains(&self, mz: f64) -> bool {
        self.low <= mz && mz < self.high
    }
}

impl Display for MzBoundary {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.low, self.high)
    }
}

/// Configuration for a feature alignment
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentOptions {
    /// Number of equal-width alignee NET sections (default: 100)
    pub num_time_sections: usize,
    /// Maximum local stretch of the warp; the minimum is its reciprocal (default: 3)
    pub contraction_factor: usize,
    /// Maximum offset from the 1:1 mapping, in sections (default: 10)
    pub max_time_distortion: usize,
    /// Alignee features with more baseline candidates are not used for fitting (default: 3)
    pub max_promiscuity: usize,
    /// Candidate match mass tolerance in ppm (default: 10.0)
    pub mass_tolerance: f64,
    /// Candidate match NET tolerance (default: 0.1)
    pub net_tolerance: f64,
    pub alignment_type: AlignmentType,
    pub calibration_type: CalibrationType,
    pub mass_calibration_method: MassRegressionMethod,
    /// Half-width of the mass error window of the calibration grid in ppm (default: 50.0)
    pub mass_calib_window: f64,
    pub mass_calib_num_x_slices: usize,
    pub mass_calib_num_y_slices: usize,
    /// Grid points farther from the fitted bias than this many std are rejected (default: 3.0)
    pub mass_calib_max_z_score: f64,
    pub mass_calib_lsq_num_knots: usize,
    pub mass_calib_lsq_max_z_score: f64,
    /// Histogram bin widths
    pub mass_bin_size: f64,
    pub net_bin_size: f64,
    pub drift_time_bin_size: f64,
    /// Percentage of most abundant alignee features used for fitting (default: 100.0)
    pub top_feature_abundance_percent: f64,
    pub align_split_mzs: bool,
    pub mz_boundaries: Vec<MzBoundary>,
    pub align_drift_times: bool,
}

impl Default for AlignmentOptions {
    fn default() -> Self {
        AlignmentOptions {
            num_time_sections: 100,
            contraction_factor: 3,
            max_time_distortion: 10,
            max_promiscuity: 3,
            mass_tolerance: 10.0,
            net_tolerance: 0.1,
            alignment_type: AlignmentType::NetMassWarp,
            calibration_type: CalibrationType::MzRegression,
            mass_calibration_method: MassRegressionMethod::Central,
            mass_calib_window: 50.0,
            mass_calib_num_x_slices: 12,
            mass_calib_num_y_slices: 50,
            mass_calib_max_z_score: 3.0,
            mass_calib_lsq_num_knots: 12,
            mass_calib_lsq_max_z_score: 2.5,
            mass_bin_size: 0.2,
            net_bin_size: 0.001,
            drift_time_bin_size: 0.03,
            top_feature_abundance_percent: 100.0,
            align_split_mzs: false,
            mz_boundaries: vec![MzBoundary::new(0.0, 10_000.0)],
            align_drift_times: false,
        }
    }
}

impl AlignmentOptions {
    /// Parse options from a JSON string, missing fields take their defaults.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use lcmswarp::data::options::AlignmentOptions;
    /// let options = AlignmentOptions::from_json_str(r#"{"num_time_sections": 50}"#).unwrap();
    /// assert_eq!(options.num_time_sections, 50);
    /// assert_eq!(options.contraction_factor, 3);
    /// ```
    pub fn from_json_str(content: &str) -> Result<Self> {
        let options: AlignmentOptions = serde_json::from_str(content)?;
        options.validate()?;
        Ok(options)
    }

    /// Load options from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AlignmentError::InvalidOptions(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&content)
    }

    /// The m/z boundaries aligned as separate passes
    pub fn passes(&self) -> Vec<MzBoundary> {
        if self.align_split_mzs {
            self.mz_boundaries.clone()
        } else {
            vec![MzBoundary::unbounded()]
        }
    }

    pub fn mass_calibration_enabled(&self) -> bool {
        self.alignment_type == AlignmentType::NetMassWarp
    }

    /// Reject structurally invalid options before any work is done.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| -> Result<()> { Err(AlignmentError::InvalidOptions(msg)) };

        if self.num_time_sections == 0 {
            return fail("num_time_sections must be positive".to_string());
        }
        if self.contraction_factor == 0 {
            return fail("contraction_factor must be at least 1".to_string());
        }
        if self.mass_calib_num_x_slices == 0 || self.mass_calib_num_y_slices == 0 {
            return fail("mass calibration grid needs at least one slice per axis".to_string());
        }
        if self.mass_calib_lsq_num_knots < 2 {
            return fail("mass_calib_lsq_num_knots must be at least 2".to_string());
        }

        let non_negative = [
            ("mass_tolerance", self.mass_tolerance),
            ("net_tolerance", self.net_tolerance),
            ("mass_calib_window", self.mass_calib_window),
            ("mass_calib_max_z_score", self.mass_calib_max_z_score),
            ("mass_calib_lsq_max_z_score", self.mass_calib_lsq_max_z_score),
        ];
        for (name, value) in non_negative {
            if !(value >= 0.0) {
                return fail(format!("{} must be non-negative, got {}", name, value));
            }
        }

        let bins = [
            ("mass_bin_size", self.mass_bin_size),
            ("net_bin_size", self.net_bin_size),
            ("drift_time_bin_size", self.drift_time_bin_size),
        ];
        for (name, value) in bins {
            if !(value > 0.0) {
                return fail(format!("{} must be positive, got {}", name, value));
            }
        }

        let pct = self.top_feature_abundance_percent;
        if !(pct > 0.0 && pct <= 100.0) {
            return fail(format!("top_feature_abundance_percent must be in (0, 100], got {}", pct));
        }

        if self.align_split_mzs {
            if self.mz_boundaries.is_empty() {
                return fail("align_split_mzs requires at least one m/z boundary".to_string());
            }
            let mut sorted = self.mz_boundaries.clone();
            sorted.sort_by(|a, b| a.low.total_cmp(&b.low));
            for boundary in &sorted {
                if !(boundary.low < boundary.high) {
                    return fail(format!("m/z boundary {} is empty", boundary));
                }
            }
            for pair in sorted.windows(2) {
                if pair[1].low < pair[0].high {
                    return fail(format!("m/z boundaries {} and {} overlap", pair[0], pair[1]));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(AlignmentOptions::default().validate().is_ok());
    }

    #[test]
    fn test_parse_partial_json() {
        let json = r#"
            {
                "mass_tolerance": 20.0,
                "align_split_mzs": true,
                "mz_boundaries": [{"low": 0.0, "high": 700.0}, {"low": 700.0, "high": 5000.0}],
                "calibration_type": "HybridRegression"
            }
        "#;
        let options = AlignmentOptions::from_json_str(json).unwrap();
        assert_eq!(options.mass_tolerance, 20.0);
        assert_eq!(options.calibration_type, CalibrationType::HybridRegression);
        assert_eq!(options.passes().len(), 2);
        assert_eq!(options.num_time_sections, 100);
    }

    #[test]
    fn test_overlapping_boundaries_rejected() {
        let options = AlignmentOptions {
            align_split_mzs: true,
            mz_boundaries: vec![MzBoundary::new(500.0, 900.0), MzBoundary::new(0.0, 600.0)],
            ..Default::default()
        };
        assert!(matches!(options.validate(), Err(AlignmentError::InvalidOptions(_))));
    }

    #[test]
    fn test_empty_split_rejected() {
        let options = AlignmentOptions {
            align_split_mzs: true,
            mz_boundaries: Vec::new(),
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_invalid_scalars_rejected() {
        let zero_sections = AlignmentOptions { num_time_sections: 0, ..Default::default() };
        assert!(zero_sections.validate().is_err());

        let bad_percent = AlignmentOptions { top_feature_abundance_percent: 0.0, ..Default::default() };
        assert!(bad_percent.validate().is_err());

        let nan_tolerance = AlignmentOptions { mass_tolerance: f64::NAN, ..Default::default() };
        assert!(nan_tolerance.validate().is_err());
    }

    #[test]
    fn test_unsplit_runs_single_unbounded_pass() {
        let passes = AlignmentOptions::default().passes();
        assert_eq!(passes.len(), 1);
        assert!(passes[0].contains(1e9));
        assert!(passes[0].contains(-1.0));
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        assert!(matches!(
            AlignmentOptions::from_json_str("{ not json"),
            Err(AlignmentError::Json(_))
        ));
    }
}
