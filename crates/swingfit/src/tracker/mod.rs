//! PeriodTracker: period and swing from alternating gate crossings.
//!
//! Each analyzed frame yields one crossing: a direction, a sub-sample offset
//! of the marker center within the frame, and optionally an amplitude. A
//! period is measured between same-direction crossings two frames apart; the
//! swing is the sum of the two latest opposite-direction amplitudes.

mod amplitude;
mod series;

pub use amplitude::amplitude_from_duration;
pub use series::{format_series, SeriesSink, SwingSample, TabulatedSeriesFile};

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, PipelineConfig, TemplateSource};
use crate::edge::{detect_edges, EdgeError, EdgeFix};
use crate::fit::{
    fit_physical, fit_template, FitDivergence, FitFailurePolicy, FitMode, PhysicalModel,
};
use crate::frame::{Direction, Frame};
use crate::template::{Template, TemplateCache, TemplateStore};

/// Acceptance window and template polling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Expected period (s).
    pub nominal_period_s: f64,
    /// Periods further than this from nominal are not accepted (s).
    pub period_tolerance_s: f64,
    /// Poll the template store every this many frames; `0` polls only at
    /// construction.
    pub template_refresh_interval: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            nominal_period_s: 2.0,
            period_tolerance_s: 0.1,
            template_refresh_interval: 1,
        }
    }
}

/// Summary of the last two crossings.
///
/// `last_*` describe the previous frame, `prior_*` the frame before it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackerState {
    pub last_direction: Option<Direction>,
    pub last_offset: Option<f64>,
    pub last_samples_since_boot: Option<i64>,
    pub prior_offset: Option<f64>,
    pub prior_samples_since_boot: Option<i64>,
    pub last_amplitude: Option<f64>,
}

impl TrackerState {
    /// Fold one crossing into the history and return `(period_s, swing_deg)`.
    ///
    /// Same-direction crossings return `(-1, -1)`; missing history yields `0`
    /// for the affected quantity. History shifts in every case.
    pub fn advance(&mut self, obs: &SwingObservation, adc_tick_s: f64) -> (f64, f64) {
        let (period, swing) = if self.last_direction != Some(obs.direction) {
            let period = match (self.prior_samples_since_boot, self.prior_offset) {
                (Some(ssb), Some(offset)) => {
                    (obs.samples_since_boot - ssb) as f64 * adc_tick_s
                        + (obs.offset - offset) * adc_tick_s
                }
                _ => 0.0,
            };
            let swing = match (obs.amplitude, self.last_amplitude) {
                (Some(a), Some(b)) => a + b,
                _ => 0.0,
            };
            (period, swing)
        } else {
            (-1.0, -1.0)
        };

        self.last_direction = Some(obs.direction);
        self.prior_offset = self.last_offset.replace(obs.offset);
        self.prior_samples_since_boot = self
            .last_samples_since_boot
            .replace(obs.samples_since_boot);
        self.last_amplitude = obs.amplitude;
        (period, swing)
    }
}

/// One crossing, as seen by the state machine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwingObservation {
    pub direction: Direction,
    /// Marker center offset within the frame (samples).
    pub offset: f64,
    /// Reference clock at the first sample of the frame.
    pub samples_since_boot: i64,
    /// Swing amplitude (degrees), when the fit provides one.
    pub amplitude: Option<f64>,
}

/// Outcome of one state step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwingUpdate {
    pub period_s: f64,
    pub swing_deg: f64,
    /// Whether the pair entered the accepted series.
    pub accepted: bool,
}

/// Per-frame result.
#[derive(Debug, Clone, PartialEq)]
pub struct SwingMeasurement {
    pub period_s: f64,
    pub swing_deg: f64,
    /// Mean raw level around the marker center (ADC units).
    pub height: f64,
    pub accepted: bool,
    pub observation: SwingObservation,
    /// Quick-fit geometry of the frame.
    pub edges: EdgeFix,
    /// Whether the refinement diverged and the quick estimate was used.
    pub fell_back: bool,
}

/// Why a frame produced no measurement.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameReject {
    /// Sample count differs from the configured frame length.
    BadLength { expected: usize, found: usize },
    /// Template mode without a loaded template.
    NoTemplate,
    Edges(EdgeError),
    Fit(FitDivergence),
}

impl FrameReject {
    /// Output triple reported in place of `period swing height`, if any.
    pub fn sentinel(&self) -> Option<(f64, f64, f64)> {
        match self {
            Self::BadLength { .. } => Some((-2.0, -2.0, -2.0)),
            Self::NoTemplate => Some((-3.0, -3.0, -3.0)),
            Self::Edges(_) | Self::Fit(_) => None,
        }
    }
}

impl std::fmt::Display for FrameReject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadLength { expected, found } => {
                write!(f, "frame has {} samples, expected {}", found, expected)
            }
            Self::NoTemplate => write!(f, "no template loaded"),
            Self::Edges(e) => write!(f, "edge detection failed: {}", e),
            Self::Fit(e) => write!(f, "fit diverged: {}", e),
        }
    }
}

impl std::error::Error for FrameReject {}

/// Stateful per-stream analysis: quick fit, optional refinement, period and
/// swing bookkeeping.
pub struct PeriodTracker {
    config: PipelineConfig,
    model: PhysicalModel,
    marker_width_mm: f64,
    store: Box<dyn TemplateStore>,
    cache: TemplateCache,
    state: TrackerState,
    series: Vec<SwingSample>,
    frames_seen: usize,
}

impl std::fmt::Debug for PeriodTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodTracker")
            .field("state", &self.state)
            .field("series_len", &self.series.len())
            .field("frames_seen", &self.frames_seen)
            .finish()
    }
}

impl PeriodTracker {
    /// Validate `config` and poll `store` for an initial template.
    pub fn new(config: PipelineConfig, store: Box<dyn TemplateStore>) -> Result<Self, ConfigError> {
        config.validate()?;
        let model = PhysicalModel::new(&config.fiducial, &config.pendulum, &config.sampling);
        let marker_width_mm = config.pendulum.marker_width(&config.fiducial);
        let cache = match config.template_source {
            TemplateSource::Directory { .. } => TemplateCache::with_bootstrap(
                config.bootstrap.clone(),
                config.edges.clone(),
                config.template_build.clone(),
                config.sampling.n_samples,
            ),
            _ => TemplateCache::new(),
        };
        let mut tracker = Self {
            config,
            model,
            marker_width_mm,
            store,
            cache,
            state: TrackerState::default(),
            series: Vec::new(),
            frames_seen: 0,
        };
        if tracker.config.fit.mode == FitMode::Template {
            tracker.cache.refresh(tracker.store.as_mut());
        }
        Ok(tracker)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn state(&self) -> &TrackerState {
        &self.state
    }

    /// Accepted `(period, swing)` pairs so far.
    pub fn series(&self) -> &[SwingSample] {
        &self.series
    }

    /// Current template revision, if any.
    pub fn template(&self) -> Option<std::sync::Arc<Template>> {
        self.cache.current()
    }

    /// Install a template directly, bypassing the store.
    pub fn set_template(&mut self, template: Template) {
        self.cache.set(template);
    }

    /// Analyze one frame.
    ///
    /// Rejected frames leave the tracker state untouched.
    pub fn process(&mut self, frame: &Frame) -> Result<SwingMeasurement, FrameReject> {
        let result = self.process_inner(frame);
        if let Err(e) = &result {
            tracing::warn!("frame at {} discarded: {}", frame.samples_since_boot, e);
        }
        result
    }

    fn process_inner(&mut self, frame: &Frame) -> Result<SwingMeasurement, FrameReject> {
        self.frames_seen += 1;
        let expected = self.config.sampling.n_samples;
        if frame.len() != expected {
            return Err(FrameReject::BadLength {
                expected,
                found: frame.len(),
            });
        }

        let mode = self.config.fit.mode;
        if mode == FitMode::Template {
            let interval = self.config.tracker.template_refresh_interval;
            if interval > 0 && self.frames_seen % interval == 0 {
                self.cache.refresh(self.store.as_mut());
            }
            if self.cache.current().is_none() {
                return Err(FrameReject::NoTemplate);
            }
        }

        let fix = detect_edges(&frame.samples, &self.config.edges).map_err(FrameReject::Edges)?;
        let (offset, amplitude, fell_back) = self.refine(frame, &fix)?;

        let observation = SwingObservation {
            direction: fix.direction,
            offset,
            samples_since_boot: frame.samples_since_boot,
            amplitude,
        };
        let update = self.update(observation);
        tracing::debug!(
            "frame at {}: dir={:?} offset={:.3} period={:.6} swing={:.4} accepted={}",
            frame.samples_since_boot,
            fix.direction,
            offset,
            update.period_s,
            update.swing_deg,
            update.accepted
        );
        Ok(SwingMeasurement {
            period_s: update.period_s,
            swing_deg: update.swing_deg,
            height: fix.height,
            accepted: update.accepted,
            observation,
            edges: fix,
            fell_back,
        })
    }

    /// Offset, amplitude, and whether the quick estimate stood in for a
    /// diverged fit.
    fn refine(
        &self,
        frame: &Frame,
        fix: &EdgeFix,
    ) -> Result<(f64, Option<f64>, bool), FrameReject> {
        let fit = &self.config.fit;
        let refined = match fit.mode {
            FitMode::Quick => Ok((fix.t0, self.amplitude(fix.duration()))),
            FitMode::Physical => fit_physical(
                &frame.samples,
                fix,
                &self.model,
                &self.config.pendulum,
                fit,
            )
            .map(|f| (f.params.t0, Some(f.params.swing_deg))),
            FitMode::Template => {
                let template = self.cache.current().ok_or(FrameReject::NoTemplate)?;
                fit_template(&frame.samples, fix, &template, fit)
                    .map(|f| (f.t0, self.amplitude(f.duration)))
            }
        };
        match (refined, fit.on_failure) {
            (Ok((offset, amplitude)), _) => Ok((offset, amplitude, false)),
            (Err(e), FitFailurePolicy::UseQuickEstimate) => {
                tracing::warn!("{}; using quick estimate", e);
                Ok((fix.t0, self.amplitude(fix.duration()), true))
            }
            (Err(e), FitFailurePolicy::SkipFrame) => Err(FrameReject::Fit(e)),
        }
    }

    /// Amplitude implied by a marker half-span, using the latest accepted
    /// period (nominal before any).
    fn amplitude(&self, duration: f64) -> Option<f64> {
        let period = self
            .series
            .last()
            .map(|s| s.period_s)
            .unwrap_or(self.config.tracker.nominal_period_s);
        amplitude_from_duration(
            duration,
            self.config.sampling.adc_tick_s,
            self.marker_width_mm,
            period,
            self.config.pendulum.length_mm,
        )
    }

    /// Fold one crossing into the state and accept its period and swing if
    /// they are plausible.
    pub fn update(&mut self, observation: SwingObservation) -> SwingUpdate {
        let (period_s, swing_deg) = self
            .state
            .advance(&observation, self.config.sampling.adc_tick_s);
        let tracker = &self.config.tracker;
        let accepted = (period_s - tracker.nominal_period_s).abs() < tracker.period_tolerance_s
            && swing_deg > 0.0;
        if accepted {
            self.series.push(SwingSample {
                period_s,
                swing_deg,
            });
        }
        SwingUpdate {
            period_s,
            swing_deg,
            accepted,
        }
    }

    /// Write the accepted series to `sink`.
    pub fn finish(&self, sink: &mut dyn SeriesSink) -> std::io::Result<()> {
        tracing::info!("writing {} accepted swings", self.series.len());
        sink.write_series(&self.series)
    }
}
