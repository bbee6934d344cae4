//! Plateau level estimation for smoothed frames.

use serde::{Deserialize, Serialize};

use super::smooth::boxcar_smooth;

const FALLBACK_MARGIN_FRACTION: f64 = 0.05;

/// Strategy used to estimate the blocked (`lo`) and open (`hi`) levels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LevelEstimator {
    /// `lo` = minimum of the smoothed trace, `hi` = mean of both end margins.
    ///
    /// The raw maximum is avoided because transmission overshoots near fast
    /// edges.
    Margins {
        /// Fraction of the frame length averaged at each end.
        margin_fraction: f64,
    },
    /// Three-peak histogram search over the smoothed trace (lo, mid, hi).
    ///
    /// Falls back to [`LevelEstimator::Margins`] when fewer than three
    /// plateaus are found.
    Histogram {
        /// Number of unit histogram bins.
        bins: usize,
        /// Upper edge of the histogram range (ADC units).
        max_value: f64,
        /// Minimum drop of the smoothed histogram slope to count as a peak.
        sharp_threshold: f64,
        /// Peaks closer than this (bins) are merged.
        merge_distance: usize,
        /// Half-width (bins) of the weighted average around each peak.
        window: usize,
    },
}

impl Default for LevelEstimator {
    fn default() -> Self {
        Self::Margins {
            margin_fraction: FALLBACK_MARGIN_FRACTION,
        }
    }
}

impl LevelEstimator {
    /// Histogram estimator tuned for 10-bit ADC frames.
    pub fn histogram_10bit() -> Self {
        Self::Histogram {
            bins: 1023,
            max_value: 1023.0,
            sharp_threshold: 20.0,
            merge_distance: 10,
            window: 10,
        }
    }
}

/// Estimated signal plateaus of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Levels {
    /// Fully blocked level.
    pub lo: f64,
    /// Intermediate notch level, when the estimator resolves one.
    pub mid: Option<f64>,
    /// Fully open level.
    pub hi: f64,
}

pub(crate) fn estimate_levels(smooth: &[f64], estimator: &LevelEstimator) -> Option<Levels> {
    match *estimator {
        LevelEstimator::Margins { margin_fraction } => margin_levels(smooth, margin_fraction),
        LevelEstimator::Histogram {
            bins,
            max_value,
            sharp_threshold,
            merge_distance,
            window,
        } => histogram_levels(
            smooth,
            bins,
            max_value,
            sharp_threshold,
            merge_distance,
            window,
        )
        .or_else(|| {
            tracing::debug!("histogram level search found < 3 plateaus, using margins");
            margin_levels(smooth, FALLBACK_MARGIN_FRACTION)
        }),
    }
}

fn margin_levels(smooth: &[f64], margin_fraction: f64) -> Option<Levels> {
    let n = smooth.len();
    if n < 2 {
        return None;
    }
    let m = ((n as f64 * margin_fraction.max(0.0)).floor() as usize).clamp(1, n / 2);

    let lo = smooth.iter().copied().fold(f64::INFINITY, f64::min);
    let margin_sum: f64 = smooth[..m].iter().chain(&smooth[n - m..]).sum();
    let hi = margin_sum / (2 * m) as f64;
    if !lo.is_finite() || !hi.is_finite() {
        return None;
    }
    Some(Levels { lo, mid: None, hi })
}

fn histogram_levels(
    smooth: &[f64],
    bins: usize,
    max_value: f64,
    sharp_threshold: f64,
    merge_distance: usize,
    window: usize,
) -> Option<Levels> {
    const N_PEAKS: usize = 3;
    if bins < 8 || !(max_value > 0.0) {
        return None;
    }

    let width = max_value / bins as f64;
    let mut hist = vec![0.0f64; bins];
    for &v in smooth {
        if v >= 0.0 && v < max_value {
            let k = ((v / width) as usize).min(bins - 1);
            hist[k] += 1.0;
        }
    }

    let diff: Vec<f64> = hist.windows(2).map(|w| w[1] - w[0]).collect();
    let slope = boxcar_smooth(&diff, 1)?;

    // Slope sign changes with a sharp drop mark histogram maxima.
    let mut candidates: Vec<(f64, usize)> = Vec::new();
    let mut last = 0.0f64;
    for (i, &e) in slope.iter().enumerate() {
        let sign_change = (e <= 0.0 && last >= 0.0) || (e >= 0.0 && last <= 0.0);
        if sign_change && last - e > sharp_threshold {
            candidates.push((e - last, i));
        }
        last = e;
    }

    if candidates.len() > N_PEAKS {
        let mut merged = Vec::with_capacity(candidates.len());
        let mut prev_idx: Option<usize> = None;
        for &(strength, idx) in &candidates {
            match prev_idx {
                Some(p) if idx - p < merge_distance => {}
                _ => merged.push((strength, idx)),
            }
            prev_idx = Some(idx);
        }
        candidates = merged;
    }
    if candidates.len() < N_PEAKS {
        return None;
    }

    candidates.sort_by(|a, b| a.0.total_cmp(&b.0));
    let mut levels = [0.0f64; N_PEAKS];
    for (level, &(_, peak)) in levels.iter_mut().zip(candidates.iter().take(N_PEAKS)) {
        let lower = peak.saturating_sub(window);
        let upper = (peak + window).min(bins);
        let (mut num, mut den) = (0.0, 0.0);
        for (k, &count) in hist.iter().enumerate().take(upper).skip(lower) {
            num += count * k as f64 * width;
            den += count;
        }
        if den <= 0.0 {
            return None;
        }
        *level = num / den;
    }
    levels.sort_by(f64::total_cmp);

    Some(Levels {
        lo: levels[0],
        mid: Some(levels[1]),
        hi: levels[2],
    })
}
