// chemistry module
pub mod chemistry {
    pub mod constants;
    pub mod utility;
}

// algorithm module
pub mod algorithm {
    pub mod spline;
    pub mod mixture;
    pub mod regression;
    pub mod calibration;
    pub mod matching;
    pub mod warp;
}

// data module
pub mod data {
    pub mod feature;
    pub mod options;
    pub mod histogram;
    pub mod alignment;
}

pub mod error;
pub mod processor;
pub mod aligner;

pub use aligner::{AlignmentResult, LcmsWarpFeatureAligner};
pub use data::alignment::{AlignmentData, AlignmentWarning};
pub use data::feature::{FeatureMatch, MassTag, MassTimeFeature};
pub use data::options::AlignmentOptions;
pub use error::{AlignmentError, Result};
