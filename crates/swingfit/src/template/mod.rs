//! Empirical transmission-vs-phase templates.
//!
//! A [`Template`] is built once from many phase-aligned frames
//! ([`build_template`]), persisted through a [`TemplateStore`], and shared
//! read-only as `Arc<Template>` through the tracker's [`TemplateCache`].

mod builder;
mod cache;
mod store;

pub use builder::{build_template, TemplateBuildConfig};
pub use cache::{BootstrapConfig, TemplateCache};
pub use store::{
    DirectoryStore, FileTemplateStore, NoTemplateStore, RawFrames, StoreError, TemplateStore,
};

use serde::{Deserialize, Serialize};

use crate::spline::{CubicSpline, SplineError};

/// Template revision stamp (milliseconds since the Unix epoch).
pub type Timestamp = i64;

/// Errors from building or parsing templates.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateError {
    /// Too few frames survived edge detection.
    InsufficientFrames {
        /// Frames with a usable quick fit.
        usable: usize,
        /// Configured minimum.
        required: usize,
    },
    /// Phase grid is not a valid spline domain.
    InvalidCurve(SplineError),
    /// Malformed tabulated text.
    Parse {
        /// 1-based line number.
        line: usize,
        /// What went wrong.
        message: String,
    },
}

impl std::fmt::Display for TemplateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientFrames { usable, required } => write!(
                f,
                "insufficient frames for template: {} usable, {} required",
                usable, required
            ),
            Self::InvalidCurve(e) => write!(f, "invalid template curve: {}", e),
            Self::Parse { line, message } => write!(f, "line {}: {}", line, message),
        }
    }
}

impl std::error::Error for TemplateError {}

impl From<SplineError> for TemplateError {
    fn from(e: SplineError) -> Self {
        Self::InvalidCurve(e)
    }
}

/// Tabulated `(phase, normalized transmission)` pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateCurve {
    pub phase: Vec<f64>,
    pub value: Vec<f64>,
}

impl TemplateCurve {
    #[inline]
    pub fn len(&self) -> usize {
        self.phase.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.phase.is_empty()
    }

    /// Render as a two-column whitespace-delimited table.
    pub fn to_table(&self) -> String {
        let mut out = String::with_capacity(self.len() * 52);
        for (p, v) in self.phase.iter().zip(&self.value) {
            out.push_str(&format!("{:.18e} {:.18e}\n", p, v));
        }
        out
    }

    /// Parse a two-column whitespace-delimited table.
    ///
    /// Blank lines and lines starting with `#` are ignored.
    pub fn from_table(text: &str) -> Result<Self, TemplateError> {
        let mut phase = Vec::new();
        let mut value = Vec::new();
        for (i, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() != 2 {
                return Err(TemplateError::Parse {
                    line: i + 1,
                    message: format!("expected 2 columns, found {}", cols.len()),
                });
            }
            let parse = |s: &str| {
                s.parse::<f64>().map_err(|e| TemplateError::Parse {
                    line: i + 1,
                    message: format!("{}: {}", s, e),
                })
            };
            phase.push(parse(cols[0])?);
            value.push(parse(cols[1])?);
        }
        Ok(Self { phase, value })
    }
}

/// Immutable, timestamped template with its interpolating spline.
#[derive(Debug, Clone)]
pub struct Template {
    curve: TemplateCurve,
    timestamp: Timestamp,
    spline: CubicSpline,
}

impl Template {
    pub fn new(curve: TemplateCurve, timestamp: Timestamp) -> Result<Self, TemplateError> {
        let spline = CubicSpline::interpolate(&curve.phase, &curve.value)?;
        Ok(Self {
            curve,
            timestamp,
            spline,
        })
    }

    #[inline]
    pub fn curve(&self) -> &TemplateCurve {
        &self.curve
    }

    #[inline]
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    #[inline]
    pub fn spline(&self) -> &CubicSpline {
        &self.spline
    }

    /// Normalized transmission at phase `s`; fully open (1) outside the domain.
    pub fn eval(&self, s: f64) -> f64 {
        let (a, b) = self.spline.domain();
        if s < a || s > b {
            1.0
        } else {
            self.spline.eval(s)
        }
    }
}
