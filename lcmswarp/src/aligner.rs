use itertools::{Itertools, MinMaxResult};
use log::{info, warn};
use ordered_float::OrderedFloat;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;

use crate::data::alignment::{AlignmentData, AlignmentWarning};
use crate::data::feature::{any_drift_time, MassTag, MassTimeFeature};
use crate::data::options::AlignmentOptions;
use crate::error::{AlignmentError, Result};
use crate::processor::AlignmentProcessor;

/// Alignment statistics together with the transformed alignee features.
#[derive(Clone, Debug)]
pub struct AlignmentResult {
    pub alignment: AlignmentData,
    /// copies of every alignee feature, in input order, with aligned NET and calibrated mass
    pub features: Vec<MassTimeFeature>,
}

/// smallest abundance among the top `percent` percent of `abundances`
///
/// # Examples
///
/// ```
/// use lcmswarp::aligner::abundance_threshold;
///
/// let abundances: Vec<f64> = (1..=10).map(|a| a as f64).collect();
/// assert_eq!(abundance_threshold(&abundances, 30.0), 8.0);
/// assert_eq!(abundance_threshold(&abundances, 100.0), 1.0);
/// ```
pub fn abundance_threshold(abundances: &[f64], percent: f64) -> f64 {
    if abundances.is_empty() {
        return f64::NEG_INFINITY;
    }
    let mut sorted = abundances.to_vec();
    sorted.sort_by_key(|&a| OrderedFloat(a));
    let n = sorted.len();
    let index = ((n as f64 * (100.0 - percent) / 100.0).floor().max(0.0) as usize).min(n - 1);
    sorted[index]
}

/// Aligns feature sets onto a baseline with a section warp of NET and a ppm calibration
/// of mass.
///
/// # Description
///
/// The aligner owns its options and no other state, so one instance can serve any number
/// of alignments, also concurrently.
///
/// # Example
///
/// ```rust
/// use lcmswarp::aligner::LcmsWarpFeatureAligner;
/// use lcmswarp::data::feature::MassTimeFeature;
/// use lcmswarp::data::options::AlignmentOptions;
///
/// let features: Vec<MassTimeFeature> = (0..100)
///     .map(|i| MassTimeFeature::new(i, 900.0 + i as f64, 901.0 + i as f64, i as f64 / 99.0, 1.0))
///     .collect();
///
/// let aligner = LcmsWarpFeatureAligner::new(AlignmentOptions::default());
/// let result = aligner.align_features(&features, &features).unwrap();
/// assert_eq!(result.features.len(), 100);
/// assert!((result.features[40].aligned_net - features[40].net).abs() < 1e-9);
/// ```
#[derive(Clone, Debug, Default)]
pub struct LcmsWarpFeatureAligner {
    options: AlignmentOptions,
}

impl LcmsWarpFeatureAligner {
    pub fn new(options: AlignmentOptions) -> Self {
        LcmsWarpFeatureAligner { options }
    }

    pub fn options(&self) -> &AlignmentOptions {
        &self.options
    }

    /// align `alignee` onto a baseline feature set
    ///
    /// Arguments:
    ///
    /// * `baseline` - reference features
    /// * `alignee` - features to be aligned, left untouched
    ///
    /// Returns:
    ///
    /// * `Result<AlignmentResult>` - fails only on empty input or invalid options
    pub fn align_features(&self, baseline: &[MassTimeFeature], alignee: &[MassTimeFeature]) -> Result<AlignmentResult> {
        if baseline.is_empty() {
            return Err(AlignmentError::InsufficientData("baseline contains no features".to_string()));
        }
        if alignee.is_empty() {
            return Err(AlignmentError::InsufficientData("alignee contains no features".to_string()));
        }
        self.options.validate()?;
        let options = &self.options;

        let mut warnings = Vec::new();
        let use_drift_times = if options.align_drift_times {
            let alignee_has_drift = any_drift_time(alignee);
            let baseline_has_drift = any_drift_time(baseline);
            if alignee_has_drift != baseline_has_drift {
                let warning = AlignmentWarning::DriftTimeMismatch { alignee_has_drift, baseline_has_drift };
                warn!("{}", warning);
                warnings.push(warning);
            }
            alignee_has_drift && baseline_has_drift
        } else {
            false
        };

        let abundances: Vec<f64> = alignee.iter().map(|f| f.abundance).collect();
        let threshold = abundance_threshold(&abundances, options.top_feature_abundance_percent);
        let filtered: Vec<&MassTimeFeature> = alignee.iter().filter(|f| f.abundance >= threshold).collect();
        info!(
            "aligning {} of {} features (abundance >= {}) onto {} baseline features",
            filtered.len(),
            alignee.len(),
            threshold,
            baseline.len()
        );

        let (min_baseline_net, max_baseline_net) = match baseline.iter().map(|f| f.net).minmax() {
            MinMaxResult::NoElements => (0.0, 0.0),
            MinMaxResult::OneElement(v) => (v, v),
            MinMaxResult::MinMax(lo, hi) => (lo, hi),
        };

        let mut merged: Option<AlignmentData> = None;
        for boundary in options.passes() {
            let subset: Vec<MassTimeFeature> = filtered
                .iter()
                .filter(|f| boundary.contains(f.mz))
                .map(|&f| f.clone())
                .collect();

            let pass = AlignmentProcessor::new(options, boundary, use_drift_times).process(&subset, baseline);
            info!("m/z {}: {} features, {} matches", boundary, subset.len(), pass.num_matches);

            match merged.as_mut() {
                Some(data) => data.merge_pass(pass),
                None => merged = Some(pass),
            }
        }

        let mut alignment = merged.unwrap_or_default();
        warnings.append(&mut alignment.warnings);
        alignment.warnings = warnings;
        alignment.min_baseline_net = min_baseline_net;
        alignment.max_baseline_net = max_baseline_net;

        let features: Vec<MassTimeFeature> = alignee.iter().map(|f| alignment.transform(f)).collect();
        let (min_scan, max_scan) = match features.iter().map(|f| f.scan).minmax() {
            MinMaxResult::NoElements => (0, 0),
            MinMaxResult::OneElement(scan) => (scan, scan),
            MinMaxResult::MinMax(lo, hi) => (lo, hi),
        };
        alignment.min_scan = min_scan;
        alignment.max_scan = max_scan;

        info!(
            "alignment done: {} matches, NET slope {:.4}, intercept {:.4}, R2 {:.4}, {} warnings",
            alignment.num_matches,
            alignment.net_slope,
            alignment.net_intercept,
            alignment.net_rsquared,
            alignment.warnings.len()
        );

        Ok(AlignmentResult { alignment, features })
    }

    /// align `alignee` onto a mass tag database
    pub fn align_to_database(&self, mass_tags: &[MassTag], alignee: &[MassTimeFeature]) -> Result<AlignmentResult> {
        let baseline: Vec<MassTimeFeature> = mass_tags.iter().map(MassTimeFeature::from).collect();
        self.align_features(&baseline, alignee)
    }

    /// align several feature sets onto the same baseline in parallel
    ///
    /// Arguments:
    ///
    /// * `baseline` - reference features shared by all alignments
    /// * `alignees` - independent feature sets
    /// * `num_threads` - size of the worker pool
    ///
    /// Returns:
    ///
    /// * `Result<Vec<Result<AlignmentResult>>>` - one result per alignee in input order
    pub fn align_many(
        &self,
        baseline: &[MassTimeFeature],
        alignees: &[Vec<MassTimeFeature>],
        num_threads: usize,
    ) -> Result<Vec<Result<AlignmentResult>>> {
        let thread_pool = ThreadPoolBuilder::new().num_threads(num_threads).build()?;
        let results: Vec<Result<AlignmentResult>> = thread_pool.install(|| {
            alignees
                .par_iter()
                .map(|alignee| self.align_features(baseline, alignee))
                .collect()
        });
        Ok(results)
    }
}
