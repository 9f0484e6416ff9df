use hdrhistogram::Histogram;

/// Significant figures kept by the approximate distribution, about 0.1% relative error.
const SIGNIFICANT_FIGURES: u8 = 3;

/// Approximate samples are recorded in microseconds so that sub-millisecond durations keep their
/// precision.
const UNITS_PER_MS: f64 = 1000.0;

/// Sample storage for a trend metric.
///
/// Every sample is kept until the configured limit is reached, which gives exact nearest-rank
/// percentiles. Past the limit the non-negative samples are folded into an HdrHistogram and the
/// store stays approximate for the rest of the run. Negative samples, which only custom trends can
/// produce, are always kept exactly. Count, sum, min and max are always exact.
#[derive(Debug, Clone)]
pub(crate) struct TrendStore {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    limit: usize,
    samples: Distribution,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Distribution {
    Exact(Vec<f64>),
    Approximate(Approximate),
}

impl Distribution {
    /// Sort the exact samples so that rank queries are direct lookups.
    ///
    /// Called on a copy, after the metric's lock has been released.
    pub(crate) fn sorted(self) -> Self {
        match self {
            Distribution::Exact(mut samples) => {
                samples.sort_by(f64::total_cmp);
                Distribution::Exact(samples)
            }
            Distribution::Approximate(mut approximate) => {
                approximate.negative.sort_by(f64::total_cmp);
                Distribution::Approximate(approximate)
            }
        }
    }
}

impl TrendStore {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            limit,
            samples: Distribution::Exact(Vec::new()),
        }
    }

    /// Add a sample. Returns true if this sample caused the store to switch to approximate mode.
    pub(crate) fn push(&mut self, value: f64) -> bool {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);

        match &mut self.samples {
            Distribution::Exact(samples) if samples.len() < self.limit => {
                samples.push(value);
                false
            }
            Distribution::Exact(samples) => match Approximate::new() {
                Ok(mut approximate) => {
                    samples.iter().for_each(|v| approximate.add(*v));
                    approximate.add(value);
                    self.samples = Distribution::Approximate(approximate);
                    true
                }
                Err(e) => {
                    log::error!("Could not create a histogram, keeping exact samples: {e}");
                    samples.push(value);
                    false
                }
            },
            Distribution::Approximate(approximate) => {
                approximate.add(value);
                false
            }
        }
    }

    pub(crate) fn count(&self) -> u64 {
        self.count
    }

    pub(crate) fn sum(&self) -> f64 {
        self.sum
    }

    pub(crate) fn min(&self) -> f64 {
        self.min
    }

    pub(crate) fn max(&self) -> f64 {
        self.max
    }

    /// Unsorted copy of the distribution. See [Distribution::sorted].
    pub(crate) fn distribution(&self) -> Distribution {
        self.samples.clone()
    }
}

/// 1-based nearest-rank position of the `p`th percentile in `n` sorted samples.
pub(crate) fn nearest_rank(p: f64, n: u64) -> u64 {
    // The small epsilon keeps products like 99.9 * 1000 from landing just above an integer.
    let rank = ((p * n as f64) / 100.0 - 1e-9).ceil();
    (rank.max(1.0) as u64).min(n)
}

/// Approximate distribution: an HdrHistogram of non-negative samples in microseconds, plus the
/// exact negative samples which rank below all of them.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Approximate {
    histogram: Histogram<u64>,
    negative: Vec<f64>,
}

impl Approximate {
    fn new() -> Result<Self, hdrhistogram::CreationError> {
        Ok(Self {
            histogram: Histogram::new(SIGNIFICANT_FIGURES)?,
            negative: Vec::new(),
        })
    }

    fn add(&mut self, value: f64) {
        if value < 0.0 {
            self.negative.push(value);
        } else {
            self.histogram
                .saturating_record((value * UNITS_PER_MS).round() as u64);
        }
    }

    /// Estimated value at the given 1-based rank. Expects [Distribution::sorted] to have run.
    pub(crate) fn value_at_rank(&self, rank: u64) -> f64 {
        let below_zero = self.negative.len() as u64;
        if rank <= below_zero {
            return self.negative[(rank.max(1) - 1) as usize];
        }

        let recorded = self.histogram.len();
        if recorded == 0 {
            return self.negative.last().copied().unwrap_or(0.0);
        }

        let quantile = (rank - below_zero) as f64 / recorded as f64;
        self.histogram.value_at_quantile(quantile.min(1.0)) as f64 / UNITS_PER_MS
    }
}
