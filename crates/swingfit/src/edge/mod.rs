//! Quick fit: coarse geometry of one frame from its threshold crossings.
//!
//! Stages:
//! 1. **Smooth** – boxcar running mean of the raw samples.
//! 2. **Levels** – blocked/open plateau estimate, midpoint threshold.
//! 3. **Crossings** – rising/falling threshold crossings (hysteresis-debounced).
//! 4. **Refine** – local line fit per crossing for sub-sample edge times.
//! 5. **Canonicalize** – direction, center `t0`, direction-independent edges.

pub(crate) mod crossings;

use serde::{Deserialize, Serialize};

use crate::frame::{samples_as_f64, Direction};
use crate::signal::levels::estimate_levels;
use crate::signal::regress::line_zero_crossing;
use crate::signal::smooth::{boxcar_smooth, window_mean};
use crate::signal::LevelEstimator;

use crossings::find_crossings;

/// Configuration for [`detect_edges`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeDetectConfig {
    /// Number of fingers `K`; exactly `K` rising and `K` falling edges are required.
    pub n_fingers: usize,
    /// Half-width of the boxcar smoothing window (window = `2h + 1`).
    pub smoothing_halfwidth: usize,
    /// Half-width of the per-edge line fit window.
    pub fit_halfwidth: usize,
    /// Half-width of the raw-sample window averaged around `t0` for `height`.
    pub height_halfwidth: usize,
    /// Plateau level estimator.
    pub levels: LevelEstimator,
    /// Hysteresis band around the threshold, as a fraction of `hi - lo`.
    pub hysteresis_fraction: f64,
    /// Minimum first-finger duration (samples) that identifies forward travel.
    ///
    /// `None` uses half the nominal finger spacing, `n_samples / (2K)`.
    pub direction_threshold: Option<f64>,
    /// Index of the rise/fall pair whose midpoint defines `t0`.
    ///
    /// `None` uses the middle finger, `K / 2`.
    pub center_index: Option<usize>,
}

impl Default for EdgeDetectConfig {
    fn default() -> Self {
        Self {
            n_fingers: 5,
            smoothing_halfwidth: 15,
            fit_halfwidth: 5,
            height_halfwidth: 10,
            levels: LevelEstimator::default(),
            hysteresis_fraction: 0.05,
            direction_threshold: None,
            center_index: None,
        }
    }
}

impl EdgeDetectConfig {
    /// Resolved center pair index.
    pub fn center(&self) -> usize {
        self.center_index.unwrap_or(self.n_fingers / 2)
    }
}

/// Edge polarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgePolarity {
    /// Transmission increasing (finger leaving the beam).
    Rising,
    /// Transmission decreasing (finger entering the beam).
    Falling,
}

impl std::fmt::Display for EdgePolarity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rising => write!(f, "rising"),
            Self::Falling => write!(f, "falling"),
        }
    }
}

/// Reasons a frame yields no [`EdgeFix`].
#[derive(Debug, Clone, PartialEq)]
pub enum EdgeError {
    /// The frame is not longer than the smoothing window.
    FrameTooShort {
        /// Frame length.
        len: usize,
        /// Smoothing window length.
        window: usize,
    },
    /// Open and blocked levels are indistinguishable.
    FlatSignal {
        /// Estimated blocked level.
        lo: f64,
        /// Estimated open level.
        hi: f64,
    },
    /// Wrong number of edges of one polarity.
    EdgeCountMismatch {
        /// Polarity that failed the count.
        polarity: EdgePolarity,
        /// Configured finger count.
        expected: usize,
        /// Edges found.
        found: usize,
    },
    /// The local line fit around an edge is flat.
    DegenerateEdge {
        /// Polarity of the failed edge.
        polarity: EdgePolarity,
        /// Coarse sample index of the failed edge.
        index: usize,
    },
    /// `center_index` does not address a finger.
    CenterIndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Configured finger count.
        n_fingers: usize,
    },
}

impl std::fmt::Display for EdgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FrameTooShort { len, window } => {
                write!(f, "frame of {} samples is too short for window {}", len, window)
            }
            Self::FlatSignal { lo, hi } => {
                write!(f, "flat signal: lo={:.1} hi={:.1}", lo, hi)
            }
            Self::EdgeCountMismatch {
                polarity,
                expected,
                found,
            } => write!(
                f,
                "expected {} {} edges but found {}",
                expected, polarity, found
            ),
            Self::DegenerateEdge { polarity, index } => {
                write!(f, "degenerate {} edge near sample {}", polarity, index)
            }
            Self::CenterIndexOutOfRange { index, n_fingers } => write!(
                f,
                "center index {} out of range for {} fingers",
                index, n_fingers
            ),
        }
    }
}

impl std::error::Error for EdgeError {}

/// Coarse geometric features of one frame.
///
/// All times are in ADC samples. `rise`/`fall` are relative to `t0` and
/// canonicalized so both directions of travel report the same layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeFix {
    /// Direction of travel.
    pub direction: Direction,
    /// Blocked level (ADC units).
    pub lo: f64,
    /// Open level (ADC units).
    pub hi: f64,
    /// Mean raw level in a window around `t0` (ADC units).
    pub height: f64,
    /// Fiducial center crossing, relative to the first sample.
    pub t0: f64,
    /// Rising edge offsets from `t0`.
    pub rise: Vec<f64>,
    /// Falling edge offsets from `t0`.
    pub fall: Vec<f64>,
}

impl EdgeFix {
    /// Number of fingers resolved.
    #[inline]
    pub fn n_fingers(&self) -> usize {
        self.rise.len()
    }

    /// Half the span between the outermost falling and rising edges (samples).
    pub fn duration(&self) -> f64 {
        match (self.fall.first(), self.rise.last()) {
            (Some(f), Some(r)) => 0.5 * (r - f),
            _ => 0.0,
        }
    }
}

/// Extract an [`EdgeFix`] from one frame of raw samples.
pub fn detect_edges(samples: &[u16], config: &EdgeDetectConfig) -> Result<EdgeFix, EdgeError> {
    let k = config.n_fingers;
    let center = config.center();
    if center >= k {
        return Err(EdgeError::CenterIndexOutOfRange {
            index: center,
            n_fingers: k,
        });
    }

    let raw = samples_as_f64(samples);
    let window = 2 * config.smoothing_halfwidth + 1;
    let mut smooth =
        boxcar_smooth(&raw, config.smoothing_halfwidth).ok_or(EdgeError::FrameTooShort {
            len: raw.len(),
            window,
        })?;

    let levels = estimate_levels(&smooth, &config.levels).ok_or(EdgeError::FlatSignal {
        lo: f64::NAN,
        hi: f64::NAN,
    })?;
    let (lo, hi) = (levels.lo, levels.hi);
    if !(hi - lo > f64::EPSILON) {
        return Err(EdgeError::FlatSignal { lo, hi });
    }

    let midpoint = 0.5 * (lo + hi);
    for v in &mut smooth {
        *v -= midpoint;
    }
    let crossings = find_crossings(&smooth, config.hysteresis_fraction * (hi - lo));
    if crossings.rising.len() != k {
        return Err(EdgeError::EdgeCountMismatch {
            polarity: EdgePolarity::Rising,
            expected: k,
            found: crossings.rising.len(),
        });
    }
    if crossings.falling.len() != k {
        return Err(EdgeError::EdgeCountMismatch {
            polarity: EdgePolarity::Falling,
            expected: k,
            found: crossings.falling.len(),
        });
    }

    let rise_fit = refine_edges(
        &smooth,
        &crossings.rising,
        config.fit_halfwidth,
        EdgePolarity::Rising,
    )?;
    let fall_fit = refine_edges(
        &smooth,
        &crossings.falling,
        config.fit_halfwidth,
        EdgePolarity::Falling,
    )?;

    let t0 = 0.5 * (fall_fit[center] + rise_fit[center]);

    // The first finger's blocked duration differs between the two directions.
    let threshold = config
        .direction_threshold
        .unwrap_or(raw.len() as f64 / (2.0 * k as f64));
    let first_span = crossings.rising[0] as f64 - crossings.falling[0] as f64;
    let direction = if first_span > threshold {
        Direction::Forward
    } else {
        Direction::Reverse
    };

    let (rise, fall) = match direction {
        Direction::Forward => (
            rise_fit.iter().map(|t| t - t0).collect(),
            fall_fit.iter().map(|t| t - t0).collect(),
        ),
        Direction::Reverse => (
            fall_fit.iter().rev().map(|t| t0 - t).collect(),
            rise_fit.iter().rev().map(|t| t0 - t).collect(),
        ),
    };

    let hw = config.height_halfwidth as isize;
    let t0_idx = (t0.round() as isize).clamp(0, raw.len() as isize - 1);
    let height = window_mean(&raw, t0_idx - hw, t0_idx + hw + 1).unwrap_or(lo);

    let fix = EdgeFix {
        direction,
        lo,
        hi,
        height,
        t0,
        rise,
        fall,
    };
    tracing::trace!(
        "quick fit: dir={:?} lo={:.1} hi={:.1} t0={:.2} height={:.1}",
        fix.direction,
        fix.lo,
        fix.hi,
        fix.t0,
        fix.height
    );
    Ok(fix)
}

fn refine_edges(
    centered: &[f64],
    coarse: &[usize],
    fit_halfwidth: usize,
    polarity: EdgePolarity,
) -> Result<Vec<f64>, EdgeError> {
    let hw = fit_halfwidth as isize;
    coarse
        .iter()
        .map(|&i| {
            let i_s = i as isize;
            line_zero_crossing(centered, i_s - hw, i_s + hw + 1)
                .ok_or(EdgeError::DegenerateEdge { polarity, index: i })
        })
        .collect()
}
