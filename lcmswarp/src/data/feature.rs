use std::fmt;
use std::fmt::{Display, Formatter};
use serde::{Deserialize, Serialize};

use crate::chemistry::utility::{calculate_mz, ppm_error};

/// Represents a single LC-MS feature as seen by the warp engine.
///
/// # Description
///
/// Input features are owned by the caller and never mutated. The aligner hands back
/// copies with `aligned_net` and `mono_mass_calibrated` filled in.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MassTimeFeature {
    pub id: i32,
    pub mono_mass: f64,
    pub mono_mass_calibrated: f64,
    pub mz: f64,
    pub net: f64,
    pub aligned_net: f64,
    pub scan: i32,
    pub abundance: f64,
    pub drift_time: f64,
    pub conformer_id: i32,
    pub charge: i32,
}

impl MassTimeFeature {
    /// Constructs a new `MassTimeFeature` with identity alignment.
    ///
    /// # Arguments
    ///
    /// * `id` - feature identifier
    /// * `mono_mass` - monoisotopic mass
    /// * `mz` - observed m/z
    /// * `net` - normalized elution time
    /// * `abundance` - feature abundance used for filtering
    ///
    /// # Example
    ///
    /// ```rust
    /// # use lcmswarp::data::feature::MassTimeFeature;
    /// let feature = MassTimeFeature::new(1, 1000.0, 501.007, 0.5, 1e5);
    /// assert_eq!(feature.aligned_net, 0.5);
    /// assert_eq!(feature.mono_mass_calibrated, 1000.0);
    /// assert!(!feature.has_drift_time());
    /// ```
    pub fn new(id: i32, mono_mass: f64, mz: f64, net: f64, abundance: f64) -> Self {
        MassTimeFeature {
            id,
            mono_mass,
            mono_mass_calibrated: mono_mass,
            mz,
            net,
            aligned_net: net,
            scan: 0,
            abundance,
            drift_time: 0.0,
            conformer_id: 0,
            charge: 1,
        }
    }

    pub fn with_scan(mut self, scan: i32) -> Self {
        self.scan = scan;
        self
    }

    pub fn with_drift_time(mut self, drift_time: f64, conformer_id: i32) -> Self {
        self.drift_time = drift_time;
        self.conformer_id = conformer_id;
        self
    }

    pub fn with_charge(mut self, charge: i32) -> Self {
        self.charge = charge;
        self
    }

    pub fn has_drift_time(&self) -> bool {
        self.drift_time > 0.0
    }
}

impl Display for MassTimeFeature {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MassTimeFeature(id: {}, mass: {:.5}, mz: {:.5}, net: {:.4}, aligned_net: {:.4})",
            self.id, self.mono_mass, self.mz, self.net, self.aligned_net
        )
    }
}

/// A mass tag database entry that can serve as alignment baseline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MassTag {
    pub id: i32,
    pub mono_mass: f64,
    pub net: f64,
    pub drift_time: f64,
    pub charge: i32,
}

impl MassTag {
    pub fn new(id: i32, mono_mass: f64, net: f64) -> Self {
        MassTag { id, mono_mass, net, drift_time: 0.0, charge: 1 }
    }

    /// reduce the tag to a baseline feature, deriving m/z from mass and charge
    pub fn to_feature(&self) -> MassTimeFeature {
        MassTimeFeature::new(self.id, self.mono_mass, calculate_mz(self.mono_mass, self.charge), self.net, 1.0)
            .with_drift_time(self.drift_time, 0)
            .with_charge(self.charge.max(1))
    }
}

impl From<&MassTag> for MassTimeFeature {
    fn from(tag: &MassTag) -> Self {
        tag.to_feature()
    }
}

/// A candidate pairing of an alignee feature with a baseline feature.
///
/// Indices refer to positions in the slices handed to the match search.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatch {
    pub aligned_index: usize,
    pub baseline_index: usize,
    pub net_alignee: f64,
    pub net_baseline: f64,
    pub ppm_mass_error: f64,
    pub net_error: f64,
    pub drift_error: f64,
}

impl FeatureMatch {
    pub fn new(
        aligned_index: usize,
        baseline_index: usize,
        alignee: &MassTimeFeature,
        baseline: &MassTimeFeature,
    ) -> Self {
        let drift_error = if alignee.has_drift_time() && baseline.has_drift_time() {
            alignee.drift_time - baseline.drift_time
        } else {
            0.0
        };

        FeatureMatch {
            aligned_index,
            baseline_index,
            net_alignee: alignee.net,
            net_baseline: baseline.net,
            ppm_mass_error: ppm_error(alignee.mono_mass, baseline.mono_mass),
            net_error: baseline.net - alignee.net,
            drift_error,
        }
    }
}

/// true if at least one feature carries drift time information
pub fn any_drift_time(features: &[MassTimeFeature]) -> bool {
    features.iter().any(|f| f.has_drift_time())
}
