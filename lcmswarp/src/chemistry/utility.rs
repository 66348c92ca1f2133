use crate::chemistry::constants::{MASS_PROTON, PPM};

/// calculate the m/z of an ion
///
/// Arguments:
///
/// * `mono_mass` - monoisotopic mass of the ion
/// * `charge` - charge state of the ion, values below 1 are treated as singly charged
///
/// Returns:
///
/// * `mz` - mass-over-charge of the ion
///
/// # Examples
///
/// ```
/// use lcmswarp::chemistry::utility::calculate_mz;
///
/// let mz = calculate_mz(1000.0, 2);
/// assert!((mz - 501.007276466621).abs() < 1e-9);
/// ```
pub fn calculate_mz(mono_mass: f64, charge: i32) -> f64 {
    let charge = charge.max(1) as f64;
    (mono_mass + charge * MASS_PROTON) / charge
}

/// relative mass error of `observed` against `reference` in ppm
///
/// # Examples
///
/// ```
/// use lcmswarp::chemistry::utility::ppm_error;
///
/// let ppm = ppm_error(1000.01, 1000.0);
/// assert!((ppm - 10.0).abs() < 1e-6);
/// ```
pub fn ppm_error(observed: f64, reference: f64) -> f64 {
    (observed - reference) / reference * PPM
}

/// lower and upper reference masses that keep `ppm_error(mass, reference)` within `tolerance_ppm`
pub fn ppm_window(mass: f64, tolerance_ppm: f64) -> (f64, f64) {
    let tol = tolerance_ppm / PPM;
    let low = mass / (1.0 + tol);
    let high = if tol < 1.0 { mass / (1.0 - tol) } else { f64::INFINITY };
    (low, high)
}

/// remove a systematic bias of `ppm_bias` ppm from `mass`
pub fn remove_ppm_bias(mass: f64, ppm_bias: f64) -> f64 {
    mass - mass * ppm_bias / PPM
}
