use hdrhistogram::Histogram;
use serde::Serialize;

/// HdrHistogram range: 1 μs → 1 h, 3 significant figures.
/// LLM completions routinely run for minutes, so the ceiling is generous.
pub(crate) const HIST_LOW: u64 = 1;
pub(crate) const HIST_HIGH: u64 = 3_600_000_000;
pub(crate) const HIST_SIGFIG: u8 = 3;

pub(crate) fn new_histogram() -> Histogram<u64> {
    Histogram::<u64>::new_with_bounds(HIST_LOW, HIST_HIGH, HIST_SIGFIG)
        .expect("static histogram bounds are valid")
}

/// Record a latency in seconds, clamped to the histogram range.
pub(crate) fn record_secs(hist: &mut Histogram<u64>, secs: f64) {
    let us = (secs.max(0.0) * 1_000_000.0).round() as u64;
    let _ = hist.record(us.clamp(HIST_LOW, HIST_HIGH));
}

// ─── Recent-window statistics ────────────────────────────────────

/// Summary of one recent-window latency buffer, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatencyStats {
    pub mean: f64,
    pub median: f64,
    pub p90: f64,
    pub p95: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

impl LatencyStats {
    /// `None` for an empty sample.
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let sum: f64 = sorted.iter().sum();
        Some(Self {
            mean: sum / sorted.len() as f64,
            median: percentile(&sorted, 50.0),
            p90: percentile(&sorted, 90.0),
            p95: percentile(&sorted, 95.0),
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            count: sorted.len(),
        })
    }
}

/// Linear interpolation between closest ranks over an already sorted
/// sample: rank = p/100 · (n − 1).
pub fn percentile(sorted: &[f64], pct: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = (pct.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            let frac = rank - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}

/// TTFT and TTCT statistics over the recent windows. Either side is
/// `None` while its window is empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencyPercentiles {
    pub ttft: Option<LatencyStats>,
    pub ttct: Option<LatencyStats>,
}

impl LatencyPercentiles {
    pub fn is_empty(&self) -> bool {
        self.ttft.is_none() && self.ttct.is_none()
    }
}

// ─── Session-wide statistics ─────────────────────────────────────

/// Whole-session percentile breakdown backed by an HdrHistogram (μs).
/// Unlike `LatencyStats` this never forgets old samples.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PercentileSet {
    pub min_us: u64,
    pub max_us: u64,
    pub mean_us: f64,
    pub p50_us: u64,
    pub p90_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub count: u64,
}

impl PercentileSet {
    /// Returns zeroed values if the histogram is empty.
    pub fn from_histogram(hist: &Histogram<u64>) -> Self {
        if hist.len() == 0 {
            return Self::empty();
        }

        Self {
            min_us: hist.min(),
            max_us: hist.max(),
            mean_us: hist.mean(),
            p50_us: hist.value_at_percentile(50.0),
            p90_us: hist.value_at_percentile(90.0),
            p95_us: hist.value_at_percentile(95.0),
            p99_us: hist.value_at_percentile(99.0),
            count: hist.len(),
        }
    }

    pub fn empty() -> Self {
        Self {
            min_us: 0,
            max_us: 0,
            mean_us: 0.0,
            p50_us: 0,
            p90_us: 0,
            p95_us: 0,
            p99_us: 0,
            count: 0,
        }
    }

    pub fn has_data(&self) -> bool {
        self.count > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn interpolates_between_ranks() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert!(approx(percentile(&sorted, 50.0), 2.5));
        assert!(approx(percentile(&sorted, 90.0), 3.7));
        assert!(approx(percentile(&sorted, 0.0), 1.0));
        assert!(approx(percentile(&sorted, 100.0), 4.0));
    }

    #[test]
    fn stats_over_unsorted_sample() {
        let stats = LatencyStats::from_samples(&[0.5, 0.1, 0.3]).unwrap();
        assert!(approx(stats.mean, 0.3));
        assert!(approx(stats.median, 0.3));
        assert!(approx(stats.min, 0.1));
        assert!(approx(stats.max, 0.5));
        assert!(approx(stats.p90, 0.46));
        assert_eq!(stats.count, 3);
    }

    #[test]
    fn empty_sample_has_no_stats() {
        assert!(LatencyStats::from_samples(&[]).is_none());
    }

    #[test]
    fn single_sample_is_every_percentile() {
        let stats = LatencyStats::from_samples(&[1.25]).unwrap();
        assert_eq!(stats.median, 1.25);
        assert_eq!(stats.p95, 1.25);
    }

    #[test]
    fn histogram_set_tracks_recorded_values() {
        let mut hist = new_histogram();
        record_secs(&mut hist, 0.001);
        record_secs(&mut hist, 0.002);
        let set = PercentileSet::from_histogram(&hist);
        assert_eq!(set.count, 2);
        assert!(set.has_data());
        assert!(set.min_us >= 999 && set.min_us <= 1001);
        assert!(!PercentileSet::from_histogram(&new_histogram()).has_data());
    }
}
