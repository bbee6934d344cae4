//! ModelFitter: refine a quick fit against a full-frame prediction.
//!
//! Both variants minimize the squared per-sample residuals
//! `observed - predicted` with Levenberg-Marquardt (`tiny_solver`), seeded
//! from an [`EdgeFix`](crate::EdgeFix). Residuals are generic over the
//! solver's scalar type so Jacobians come from automatic differentiation.

mod physical;
mod template;

pub use physical::{fit_physical, PhysicalFit, PhysicalModel, PhysicalParams};
pub use template::{fit_template, TemplateFit};

use serde::{Deserialize, Serialize};
use tiny_solver::factors::na as ts_na;

/// Which refinement follows the quick fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitMode {
    /// Edge crossings only.
    #[default]
    Quick,
    /// Closed-form tab transmission and pendulum motion.
    Physical,
    /// Empirical template.
    Template,
}

/// What to report when a refinement diverges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitFailurePolicy {
    /// Use the quick-fit offset and duration.
    #[default]
    UseQuickEstimate,
    /// Drop the frame.
    SkipFrame,
}

/// Configuration for the refinement stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    pub mode: FitMode,
    /// Levenberg-Marquardt iteration cap.
    pub max_iters: usize,
    /// Fit the pendulum length in physical mode.
    pub float_length: bool,
    /// Exclude samples within this many samples of the seed `t0` from the
    /// template residuals (notch region).
    pub notch_exclusion_halfwidth: Option<usize>,
    pub on_failure: FitFailurePolicy,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            mode: FitMode::Quick,
            max_iters: 100,
            float_length: false,
            notch_exclusion_halfwidth: None,
            on_failure: FitFailurePolicy::UseQuickEstimate,
        }
    }
}

/// Reasons a refinement result is discarded.
#[derive(Debug, Clone, PartialEq)]
pub enum FitDivergence {
    /// The optimizer returned no solution.
    NoSolution,
    /// A fitted parameter is NaN or infinite.
    NonFinite {
        /// Parameter name.
        param: &'static str,
    },
    /// A fitted parameter left its valid range.
    OutOfRange {
        /// Parameter name.
        param: &'static str,
        /// Fitted value.
        value: f64,
    },
}

impl std::fmt::Display for FitDivergence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoSolution => write!(f, "optimizer returned no solution"),
            Self::NonFinite { param } => write!(f, "non-finite fitted {}", param),
            Self::OutOfRange { param, value } => {
                write!(f, "fitted {} = {:.6} out of range", param, value)
            }
        }
    }
}

impl std::error::Error for FitDivergence {}

fn solver_options(max_iters: usize) -> tiny_solver::OptimizerOptions {
    tiny_solver::OptimizerOptions {
        max_iteration: max_iters.clamp(1, 500),
        verbosity_level: 0,
        ..Default::default()
    }
}

/// Check `value` is finite and satisfies `valid`.
fn check(
    param: &'static str,
    value: f64,
    valid: impl FnOnce(f64) -> bool,
) -> Result<f64, FitDivergence> {
    if !value.is_finite() {
        return Err(FitDivergence::NonFinite { param });
    }
    if !valid(value) {
        return Err(FitDivergence::OutOfRange { param, value });
    }
    Ok(value)
}

#[inline]
fn constant<T: ts_na::RealField>(v: f64) -> T {
    ts_na::convert(v)
}

fn rms_residual(observed: &[u16], predicted: &[f64]) -> f64 {
    if observed.is_empty() {
        return 0.0;
    }
    let ss: f64 = observed
        .iter()
        .zip(predicted)
        .map(|(&o, p)| {
            let r = f64::from(o) - p;
            r * r
        })
        .sum();
    (ss / observed.len() as f64).sqrt()
}
