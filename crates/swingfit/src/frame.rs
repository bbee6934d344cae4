//! Raw ADC frames and direction of travel.

use serde::{Deserialize, Serialize};

/// Direction the fiducial travels through the optical gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Travel in the layout's increasing-position order (`+1`).
    Forward,
    /// Travel in the opposite order (`-1`).
    Reverse,
}

impl Direction {
    /// `+1.0` for [`Direction::Forward`], `-1.0` for [`Direction::Reverse`].
    #[inline]
    pub fn sign(self) -> f64 {
        match self {
            Self::Forward => 1.0,
            Self::Reverse => -1.0,
        }
    }

    /// The opposite direction.
    #[inline]
    pub fn flipped(self) -> Self {
        match self {
            Self::Forward => Self::Reverse,
            Self::Reverse => Self::Forward,
        }
    }
}

/// ADC sampling parameters shared by every stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Number of samples per frame.
    pub n_samples: usize,
    /// Duration of one ADC sample in seconds.
    pub adc_tick_s: f64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            n_samples: 1024,
            adc_tick_s: 1664e-7,
        }
    }
}

/// One fixed-length batch of ADC samples from a single sweep through the gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Samples elapsed between the reference event and the first sample of
    /// this frame.
    pub samples_since_boot: i64,
    /// Raw ADC values.
    pub samples: Vec<u16>,
}

impl Frame {
    pub fn new(samples_since_boot: i64, samples: Vec<u16>) -> Self {
        Self {
            samples_since_boot,
            samples,
        }
    }

    /// Number of samples in the frame.
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Convert raw ADC counts to floating point.
pub(crate) fn samples_as_f64(samples: &[u16]) -> Vec<f64> {
    samples.iter().map(|&v| f64::from(v)).collect()
}
