extern crate statrs;

use itertools::{Itertools, MinMaxResult};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, Normal};

use crate::algorithm::regression::{linear_regression, LinearRegression};
use crate::algorithm::spline::{linear_interpolate, NaturalCubicSpline};
use crate::data::alignment::HeatMap;
use crate::data::feature::FeatureMatch;

/// fewest sections a warp is fit over
pub const MIN_WARP_SECTIONS: usize = 3;

/// Settings of the section warp.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WarpParams {
    pub num_sections: usize,
    pub contraction_factor: usize,
    pub max_time_distortion: usize,
}

/// Monotone NET mapping from alignee to baseline coordinates.
///
/// # Description
///
/// The warp is defined by knots at section midpoints. Between the first and last knot it
/// follows a natural cubic spline when that spline is monotone, the piecewise linear
/// interpolant otherwise. Beyond the knots the offset of the nearest end knot is kept,
/// so the warp continues with slope one.
///
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NetWarp {
    knots_x: Vec<f64>,
    knots_y: Vec<f64>,
    spline: Option<NaturalCubicSpline>,
}

impl NetWarp {
    /// warp mapping every NET onto itself
    ///
    /// # Examples
    ///
    /// ```
    /// use lcmswarp::algorithm::warp::NetWarp;
    ///
    /// let warp = NetWarp::identity();
    /// assert!(warp.is_identity());
    /// assert_eq!(warp.evaluate(0.37), 0.37);
    /// ```
    pub fn identity() -> Self {
        NetWarp::default()
    }

    /// warp through `(knots_x, knots_y)`, knots sorted by x and non-decreasing in y
    pub fn from_knots(knots_x: Vec<f64>, knots_y: Vec<f64>) -> Self {
        let spline = NaturalCubicSpline::natural(&knots_x, &knots_y);
        let spline = if spline.is_monotone_increasing() { Some(spline) } else { None };
        NetWarp { knots_x, knots_y, spline }
    }

    pub fn is_identity(&self) -> bool {
        self.knots_x.is_empty()
    }

    pub fn uses_spline(&self) -> bool {
        self.spline.is_some()
    }

    pub fn knots(&self) -> (&[f64], &[f64]) {
        (&self.knots_x, &self.knots_y)
    }

    pub fn evaluate(&self, net: f64) -> f64 {
        let (first, last) = match (self.knots_x.first(), self.knots_x.last()) {
            (Some(&first), Some(&last)) => (first, last),
            _ => return net,
        };
        let n = self.knots_x.len();
        if net <= first {
            return net + (self.knots_y[0] - first);
        }
        if net >= last {
            return net + (self.knots_y[n - 1] - last);
        }
        match &self.spline {
            Some(spline) => spline.evaluate(net),
            None => linear_interpolate(&self.knots_x, &self.knots_y, net),
        }
    }
}

/// Median NET offset of the matches in one alignee section.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SectionOffset {
    pub midpoint: f64,
    pub offset: f64,
    /// matches agreeing with the median offset
    pub support: usize,
    /// whether the section is part of the monotone chain
    pub kept: bool,
}

/// Everything the section warp produces for one set of matches.
#[derive(Clone, Debug)]
pub struct WarpFit {
    pub warp: NetWarp,
    pub sections: Vec<SectionOffset>,
    pub regression: LinearRegression,
    pub section_width: f64,
    pub alignee_range: (f64, f64),
}

/// Too few matches to fit a warp.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LowSupport {
    pub found: usize,
    pub required: usize,
}

/// sections actually used for `num_matches` matches, at least two matches per section
pub fn effective_sections(requested: usize, num_matches: usize) -> usize {
    requested.min(num_matches / 2)
}

fn range_of(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    match values.minmax() {
        MinMaxResult::NoElements => None,
        MinMaxResult::OneElement(v) => Some((v, v)),
        MinMaxResult::MinMax(lo, hi) => Some((lo, hi)),
    }
}

fn section_of(value: f64, min: f64, width: f64, k: usize) -> usize {
    (((value - min) / width).floor().max(0.0) as usize).min(k - 1)
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by_key(|&v| OrderedFloat(v));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    }
}

/// per-section median offsets and their support
///
/// Arguments:
///
/// * `matches` - pruned candidate matches
/// * `k` - number of sections
/// * `min` - lower end of the alignee NET range
/// * `width` - section width
/// * `net_std` - std of the NET error of true matches
///
/// Returns:
///
/// * `Vec<SectionOffset>` - one entry per section, empty sections have zero support
pub fn section_offsets(matches: &[FeatureMatch], k: usize, min: f64, width: f64, net_std: f64) -> Vec<SectionOffset> {
    let mut errors: Vec<Vec<f64>> = vec![Vec::new(); k];
    for m in matches {
        errors[section_of(m.net_alignee, min, width, k)].push(m.net_error);
    }

    let tolerance = (3.0 * net_std).max(width);

    errors
        .iter_mut()
        .enumerate()
        .map(|(s, section)| {
            let midpoint = min + (s as f64 + 0.5) * width;
            if section.is_empty() {
                return SectionOffset { midpoint, offset: 0.0, support: 0, kept: false };
            }
            let offset = median(section);
            let support = section.iter().filter(|&&e| (e - offset).abs() <= tolerance).count();
            SectionOffset { midpoint, offset, support, kept: false }
        })
        .collect()
}

/// mark the chain of sections with the largest total support that forms a monotone,
/// bounded-stretch mapping
///
/// Every kept section lies within `max_time_distortion` sections of the 1:1 mapping, and
/// the local slope between consecutive kept sections lies in
/// `[1 / contraction_factor, contraction_factor]`.
pub fn select_monotone_chain(sections: &mut [SectionOffset], width: f64, params: &WarpParams) -> usize {
    let max_offset = params.max_time_distortion as f64 * width;
    let max_slope = params.contraction_factor.max(1) as f64;
    let min_slope = 1.0 / max_slope;

    let eligible: Vec<bool> = sections
        .iter()
        .map(|s| s.support > 0 && s.offset.abs() <= max_offset + 1e-12)
        .collect();

    let k = sections.len();
    let mut best = vec![0usize; k];
    let mut previous: Vec<Option<usize>> = vec![None; k];

    for i in 0..k {
        if !eligible[i] {
            continue;
        }
        best[i] = sections[i].support;
        for j in 0..i {
            if !eligible[j] {
                continue;
            }
            let run = sections[i].midpoint - sections[j].midpoint;
            let slope = (run + sections[i].offset - sections[j].offset) / run;
            if slope < min_slope - 1e-12 || slope > max_slope + 1e-12 {
                continue;
            }
            let total = best[j] + sections[i].support;
            if total > best[i] {
                best[i] = total;
                previous[i] = Some(j);
            }
        }
    }

    let end = match (0..k).filter(|&i| eligible[i]).max_by_key(|&i| (best[i], std::cmp::Reverse(i))) {
        Some(end) => end,
        None => return 0,
    };

    let mut cursor = Some(end);
    while let Some(i) = cursor {
        sections[i].kept = true;
        cursor = previous[i];
    }
    best[end]
}

/// fit the section warp of `matches`
///
/// Arguments:
///
/// * `matches` - pruned candidate matches
/// * `params` - section count and stretch bounds
/// * `net_std` - std of the NET error of true matches
///
/// Returns:
///
/// * `Result<WarpFit, LowSupport>` - the warp, or how many matches were found and needed
pub fn fit_net_warp(matches: &[FeatureMatch], params: &WarpParams, net_std: f64) -> Result<WarpFit, LowSupport> {
    let required = 2 * MIN_WARP_SECTIONS;
    let k = effective_sections(params.num_sections, matches.len());
    if k < MIN_WARP_SECTIONS {
        return Err(LowSupport { found: matches.len(), required });
    }

    let (min, max) = match range_of(matches.iter().map(|m| m.net_alignee)) {
        Some((min, max)) if max > min => (min, max),
        _ => return Err(LowSupport { found: matches.len(), required }),
    };
    let width = (max - min) / k as f64;

    let mut sections = section_offsets(matches, k, min, width, net_std);
    let support = select_monotone_chain(&mut sections, width, params);
    if support == 0 {
        return Err(LowSupport { found: 0, required });
    }

    let (kept_x, kept_offsets): (Vec<f64>, Vec<f64>) = sections
        .iter()
        .filter(|s| s.kept)
        .map(|s| (s.midpoint, s.offset))
        .unzip();

    // skipped sections follow their kept neighbours
    for section in sections.iter_mut().filter(|s| !s.kept) {
        section.offset = linear_interpolate(&kept_x, &kept_offsets, section.midpoint);
    }

    let knots_x: Vec<f64> = sections.iter().map(|s| s.midpoint).collect();
    let knots_y: Vec<f64> = sections.iter().map(|s| s.midpoint + s.offset).collect();

    let kept_y: Vec<f64> = kept_x.iter().zip(&kept_offsets).map(|(x, o)| x + o).collect();
    let regression = linear_regression(&kept_x, &kept_y);

    Ok(WarpFit {
        warp: NetWarp::from_knots(knots_x, knots_y),
        sections,
        regression,
        section_width: width,
        alignee_range: (min, max),
    })
}

/// log-likelihood of mapping each alignee section onto each baseline section
///
/// Arguments:
///
/// * `matches` - pruned candidate matches
/// * `k` - sections per axis
/// * `net_std` - std of the NET error of true matches
/// * `normal_fraction` - share of true matches
///
/// Returns:
///
/// * `HeatMap` - `k x k` scores, rows alignee sections, columns baseline sections
pub fn section_heat_map(matches: &[FeatureMatch], k: usize, net_std: f64, normal_fraction: f64) -> HeatMap {
    let alignee = range_of(matches.iter().map(|m| m.net_alignee));
    let baseline = range_of(matches.iter().map(|m| m.net_baseline));

    let ((a_min, a_max), (b_min, b_max)) = match (alignee, baseline) {
        (Some(a), Some(b)) if k > 0 && a.1 > a.0 && b.1 > b.0 => (a, b),
        _ => return HeatMap::default(),
    };

    let a_width = (a_max - a_min) / k as f64;
    let b_width = (b_max - b_min) / k as f64;
    let edges = |min: f64, width: f64| -> Vec<f64> { (0..=k).map(|i| min + i as f64 * width).collect() };

    let normal = match Normal::new(0.0, net_std.max(b_width)) {
        Ok(normal) => normal,
        Err(_) => return HeatMap::default(),
    };
    let fraction = normal_fraction.clamp(1e-3, 1.0 - 1e-3);
    let uniform = 1.0 / (b_max - b_min);

    let mut sections: Vec<Vec<&FeatureMatch>> = vec![Vec::new(); k];
    for m in matches {
        sections[section_of(m.net_alignee, a_min, a_width, k)].push(m);
    }

    let scores: Vec<Vec<f64>> = sections
        .iter()
        .enumerate()
        .map(|(i, section)| {
            let a_mid = a_min + (i as f64 + 0.5) * a_width;
            (0..k)
                .map(|j| {
                    let b_mid = b_min + (j as f64 + 0.5) * b_width;
                    section
                        .iter()
                        .map(|m| {
                            let residual = m.net_baseline - (b_mid + m.net_alignee - a_mid);
                            (fraction * normal.pdf(residual) + (1.0 - fraction) * uniform).ln()
                        })
                        .sum::<f64>()
                })
                .collect()
        })
        .collect();

    HeatMap {
        scores,
        alignee_intervals: edges(a_min, a_width),
        baseline_intervals: edges(b_min, b_width),
    }
}
