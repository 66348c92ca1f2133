use itertools::{Itertools, MinMaxResult};
use serde::{Deserialize, Serialize};

/// most bins a histogram is split into, wider ranges get wider bins
pub const MAX_HISTOGRAM_BINS: usize = 100_000;

/// Fixed-width histogram of error values.
///
/// `values` holds the bin centers in ascending order, `counts` the number of samples per bin.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub bin_width: f64,
    pub values: Vec<f64>,
    pub counts: Vec<f64>,
}

impl Histogram {
    /// Bins `samples` into bins of width `bin_width` starting at the smallest sample.
    ///
    /// If the samples span more than `MAX_HISTOGRAM_BINS` bins, the bin width grows until
    /// they fit.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use lcmswarp::data::histogram::Histogram;
    /// let histogram = Histogram::from_samples(&[0.0, 0.05, 0.25, 0.35], 0.1);
    /// assert_eq!(histogram.len(), 4);
    /// assert_eq!(histogram.counts, vec![2.0, 0.0, 1.0, 1.0]);
    /// assert_eq!(histogram.total_count(), 4.0);
    /// ```
    pub fn from_samples(samples: &[f64], bin_width: f64) -> Self {
        let finite = samples.iter().copied().filter(|v| v.is_finite());
        let (min, max) = match finite.clone().minmax() {
            MinMaxResult::NoElements => return Histogram { bin_width, ..Default::default() },
            MinMaxResult::OneElement(v) => (v, v),
            MinMaxResult::MinMax(lo, hi) => (lo, hi),
        };

        let bin_width = if bin_width > 0.0 {
            bin_width.max((max - min) / (MAX_HISTOGRAM_BINS - 1) as f64)
        } else {
            bin_width
        };
        let num_bins = if bin_width > 0.0 {
            (((max - min) / bin_width).floor() as usize + 1).min(MAX_HISTOGRAM_BINS)
        } else {
            1
        };

        let values: Vec<f64> = (0..num_bins)
            .map(|i| min + (i as f64 + 0.5) * bin_width)
            .collect();
        let mut counts = vec![0.0; num_bins];

        for v in finite {
            let index = if bin_width > 0.0 {
                (((v - min) / bin_width).floor() as usize).min(num_bins - 1)
            } else {
                0
            };
            counts[index] += 1.0;
        }

        Histogram { bin_width, values, counts }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn total_count(&self) -> f64 {
        self.counts.iter().sum()
    }

    /// `[value, count]` rows
    pub fn as_pairs(&self) -> Vec<[f64; 2]> {
        self.values.iter().zip(self.counts.iter()).map(|(&v, &c)| [v, c]).collect()
    }

    /// index of the bin whose value is closest to `value`
    fn nearest_bin(&self, value: f64) -> Option<usize> {
        if self.values.is_empty() {
            return None;
        }
        let pos = self.values.partition_point(|&v| v < value);
        if pos == 0 {
            return Some(0);
        }
        if pos == self.values.len() {
            return Some(pos - 1);
        }
        if (self.values[pos] - value).abs() < (value - self.values[pos - 1]).abs() {
            Some(pos)
        } else {
            Some(pos - 1)
        }
    }

    /// Adds the counts of `other` into this histogram.
    ///
    /// Bins are paired by nearest value rather than index, so histograms built over
    /// different ranges can be combined. An empty histogram takes over `other` as is.
    pub fn merge_nearest(&mut self, other: &Histogram) {
        if self.is_empty() {
            *self = other.clone();
            return;
        }
        for (&value, &count) in other.values.iter().zip(other.counts.iter()) {
            if let Some(index) = self.nearest_bin(value) {
                self.counts[index] += count;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_samples() {
        let histogram = Histogram::from_samples(&[], 0.5);
        assert!(histogram.is_empty());
        assert_eq!(histogram.total_count(), 0.0);
    }

    #[test]
    fn test_single_value() {
        let histogram = Histogram::from_samples(&[2.0, 2.0, 2.0], 0.5);
        assert_eq!(histogram.len(), 1);
        assert_eq!(histogram.counts, vec![3.0]);
    }

    #[test]
    fn test_bin_count_is_bounded() {
        let histogram = Histogram::from_samples(&[-5000.0, 0.0, 1e4], 1e-9);
        assert!(histogram.len() <= MAX_HISTOGRAM_BINS);
        assert!(histogram.bin_width > 1e-9);
        assert_eq!(histogram.total_count(), 3.0);
        assert_eq!(histogram.counts[0], 1.0);
        assert_eq!(histogram.counts[histogram.len() - 1], 1.0);
    }

    #[test]
    fn test_merge_by_nearest_value() {
        let mut first = Histogram::from_samples(&[0.0, 1.0, 2.0], 1.0);
        // shifted bin edges: centers at 0.6, 1.6, 2.6
        let second = Histogram::from_samples(&[0.1, 1.1, 1.2, 2.1, 5.0], 1.0);

        let expected_total = first.total_count() + second.total_count();
        first.merge_nearest(&second);

        assert_eq!(first.len(), 3);
        assert_eq!(first.total_count(), expected_total);
        // values beyond the last bin fall into it
        assert_eq!(first.counts[2], 3.0);
    }

    #[test]
    fn test_merge_into_empty() {
        let mut first = Histogram::default();
        let second = Histogram::from_samples(&[0.1, 0.2], 0.1);
        first.merge_nearest(&second);
        assert_eq!(first, second);
    }
}
