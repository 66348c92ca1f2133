use std::collections::HashMap;

use ordered_float::OrderedFloat;

use crate::chemistry::utility::ppm_window;
use crate::data::feature::{FeatureMatch, MassTimeFeature};

/// Candidate matches after promiscuity pruning.
#[derive(Clone, Debug, Default)]
pub struct MatchSet {
    /// matches used for fitting, ordered by alignee NET
    pub matches: Vec<FeatureMatch>,
    /// number of candidates before pruning
    pub num_candidates: usize,
    /// alignee indices excluded for having too many candidates, ascending
    pub promiscuous: Vec<usize>,
}

/// find every baseline feature within the mass and NET tolerance of each alignee feature
///
/// Arguments:
///
/// * `alignee` - features to be aligned
/// * `baseline` - reference features
/// * `mass_tolerance` - maximum absolute ppm error
/// * `net_tolerance` - maximum absolute NET difference
///
/// Returns:
///
/// * `Vec<FeatureMatch>` - candidates ordered by alignee index, then baseline mass
///
/// # Examples
///
/// ```
/// use lcmswarp::algorithm::matching::find_candidate_matches;
/// use lcmswarp::data::feature::MassTimeFeature;
///
/// let baseline = vec![MassTimeFeature::new(0, 1000.0, 1001.0, 0.40, 1.0)];
/// let alignee = vec![
///     MassTimeFeature::new(0, 1000.005, 1001.0, 0.42, 1.0),
///     MassTimeFeature::new(1, 1000.5, 1001.5, 0.40, 1.0),
/// ];
/// let matches = find_candidate_matches(&alignee, &baseline, 10.0, 0.1);
/// assert_eq!(matches.len(), 1);
/// assert_eq!(matches[0].aligned_index, 0);
/// ```
pub fn find_candidate_matches(
    alignee: &[MassTimeFeature],
    baseline: &[MassTimeFeature],
    mass_tolerance: f64,
    net_tolerance: f64,
) -> Vec<FeatureMatch> {
    let mut by_mass: Vec<usize> = (0..baseline.len()).collect();
    by_mass.sort_by_key(|&i| OrderedFloat(baseline[i].mono_mass));
    let masses: Vec<f64> = by_mass.iter().map(|&i| baseline[i].mono_mass).collect();

    let mut matches = Vec::new();

    for (a, feature) in alignee.iter().enumerate() {
        let (low, high) = ppm_window(feature.mono_mass, mass_tolerance);
        let start = masses.partition_point(|&m| m < low);
        let end = masses.partition_point(|&m| m <= high);

        for &b in &by_mass[start..end] {
            let candidate = FeatureMatch::new(a, b, feature, &baseline[b]);
            if candidate.ppm_mass_error.abs() <= mass_tolerance && candidate.net_error.abs() <= net_tolerance {
                matches.push(candidate);
            }
        }
    }

    matches
}

/// drop every match of alignee features with more than `max_promiscuity` candidates
pub fn prune_promiscuous(candidates: Vec<FeatureMatch>, max_promiscuity: usize) -> MatchSet {
    let num_candidates = candidates.len();

    let mut counts: HashMap<usize, usize> = HashMap::new();
    for m in &candidates {
        *counts.entry(m.aligned_index).or_insert(0) += 1;
    }

    let mut promiscuous: Vec<usize> = counts
        .iter()
        .filter(|&(_, &count)| count > max_promiscuity)
        .map(|(&index, _)| index)
        .collect();
    promiscuous.sort_unstable();

    let mut matches: Vec<FeatureMatch> = candidates
        .into_iter()
        .filter(|m| counts.get(&m.aligned_index).map_or(false, |&c| c <= max_promiscuity))
        .collect();
    matches.sort_by_key(|m| (OrderedFloat(m.net_alignee), m.aligned_index, m.baseline_index));

    MatchSet { matches, num_candidates, promiscuous }
}

/// candidate search followed by promiscuity pruning
pub fn build_match_set(
    alignee: &[MassTimeFeature],
    baseline: &[MassTimeFeature],
    mass_tolerance: f64,
    net_tolerance: f64,
    max_promiscuity: usize,
) -> MatchSet {
    let candidates = find_candidate_matches(alignee, baseline, mass_tolerance, net_tolerance);
    prune_promiscuous(candidates, max_promiscuity)
}
