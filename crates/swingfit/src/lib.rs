//! swingfit: pendulum period and swing estimation from optical-gate frames.
//!
//! A multi-finger fiducial on the pendulum passes an optical gate once per
//! swing; each pass is captured as one fixed-length frame of ADC samples.
//! The pipeline stages are:
//!
//! 1. **Edges** – sub-sample finger edges, direction, center offset
//!    ([`detect_edges`]).
//! 2. **Fit** – optional refinement against a closed-form physical model
//!    ([`fit_physical`]) or an empirical template ([`fit_template`]).
//! 3. **Template** – self-built calibration templates ([`build_template`]),
//!    persisted through a [`TemplateStore`].
//! 4. **Tracker** – period and swing amplitude from alternating crossings
//!    ([`PeriodTracker`]).
//!
//! Frame sources for replay files and live streams live in [`stream`].

mod config;
mod edge;
mod fit;
mod frame;
mod geometry;
mod signal;
mod spline;
pub mod stream;
mod template;
mod tracker;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::{ConfigError, PipelineConfig, TemplateSource};
pub use edge::{detect_edges, EdgeDetectConfig, EdgeError, EdgeFix, EdgePolarity};
pub use fit::{
    fit_physical, fit_template, FitConfig, FitDivergence, FitFailurePolicy, FitMode, PhysicalFit,
    PhysicalModel, PhysicalParams, TemplateFit,
};
pub use frame::{Direction, Frame, SamplingConfig};
pub use geometry::{Fiducial, PendulumSpec};
pub use signal::{LevelEstimator, Levels};
pub use spline::{CubicSpline, SplineError};
pub use stream::{LiveReader, ReferenceMode, ReplayReader, StreamError};
pub use template::{
    build_template, BootstrapConfig, DirectoryStore, FileTemplateStore, NoTemplateStore,
    RawFrames, StoreError, Template, TemplateBuildConfig, TemplateCache, TemplateCurve,
    TemplateError, TemplateStore, Timestamp,
};
pub use tracker::{
    amplitude_from_duration, format_series, FrameReject, PeriodTracker, SeriesSink,
    SwingMeasurement, SwingObservation, SwingSample, SwingUpdate, TabulatedSeriesFile,
    TrackerConfig, TrackerState,
};
