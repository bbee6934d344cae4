//! Pipeline configuration and startup validation.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::edge::EdgeDetectConfig;
use crate::fit::{FitConfig, FitMode};
use crate::frame::SamplingConfig;
use crate::geometry::{Fiducial, PendulumSpec};
use crate::stream::ReferenceMode;
use crate::template::{
    BootstrapConfig, DirectoryStore, FileTemplateStore, NoTemplateStore, TemplateBuildConfig,
    TemplateStore,
};
use crate::tracker::TrackerConfig;

/// Where templates come from.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TemplateSource {
    #[default]
    None,
    /// Two-column table file.
    File { path: PathBuf },
    /// Directory-backed document store (templates and raw frames).
    Directory { path: PathBuf },
}

impl TemplateSource {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// Fatal configuration problems, detected before any frame is processed.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Physical fitting cannot use a template.
    PhysicalWithTemplateSource,
    /// Template fitting needs a template source.
    TemplateModeWithoutSource,
    /// Fiducial layout and edge detector disagree on the finger count.
    FingerCountMismatch {
        /// Fingers expected by the edge detector.
        edges: usize,
        /// Fingers in the fiducial layout.
        fiducial: usize,
    },
    /// `edges.center_index` does not address a finger.
    CenterIndexOutOfRange { index: usize, n_fingers: usize },
    /// A physical constant or size must be positive.
    NonPositive { field: &'static str, value: f64 },
    /// Configuration text could not be parsed.
    Parse(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PhysicalWithTemplateSource => {
                write!(f, "physical fit mode cannot be combined with a template source")
            }
            Self::TemplateModeWithoutSource => {
                write!(f, "template fit mode requires a template source")
            }
            Self::FingerCountMismatch { edges, fiducial } => write!(
                f,
                "edge detector expects {} fingers but fiducial has {}",
                edges, fiducial
            ),
            Self::CenterIndexOutOfRange { index, n_fingers } => write!(
                f,
                "center index {} out of range for {} fingers",
                index, n_fingers
            ),
            Self::NonPositive { field, value } => {
                write!(f, "{} must be positive, got {}", field, value)
            }
            Self::Parse(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Top-level configuration for one processing run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub sampling: SamplingConfig,
    pub edges: EdgeDetectConfig,
    pub fiducial: Fiducial,
    pub pendulum: PendulumSpec,
    pub fit: FitConfig,
    pub template_build: TemplateBuildConfig,
    pub template_source: TemplateSource,
    pub bootstrap: BootstrapConfig,
    pub tracker: TrackerConfig,
    pub reference_mode: ReferenceMode,
}

impl PipelineConfig {
    /// Parse JSON; omitted fields keep their defaults.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Check mode/source compatibility and physical constants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match (self.fit.mode, self.template_source.is_none()) {
            (FitMode::Physical, false) => return Err(ConfigError::PhysicalWithTemplateSource),
            (FitMode::Template, true) => return Err(ConfigError::TemplateModeWithoutSource),
            _ => {}
        }

        let k = self.edges.n_fingers;
        if k == 0 {
            return Err(ConfigError::NonPositive {
                field: "edges.n_fingers",
                value: 0.0,
            });
        }
        if self.fit.mode == FitMode::Physical && self.fiducial.n_fingers() != k {
            return Err(ConfigError::FingerCountMismatch {
                edges: k,
                fiducial: self.fiducial.n_fingers(),
            });
        }
        let center = self.edges.center();
        if center >= k {
            return Err(ConfigError::CenterIndexOutOfRange {
                index: center,
                n_fingers: k,
            });
        }

        let positive = [
            ("sampling.n_samples", self.sampling.n_samples as f64),
            ("sampling.adc_tick_s", self.sampling.adc_tick_s),
            ("fiducial.pitch_mm", self.fiducial.pitch_mm),
            ("pendulum.length_mm", self.pendulum.length_mm),
            ("pendulum.period_s", self.pendulum.period_s),
            ("pendulum.beam_seed_mm", self.pendulum.beam_seed_mm),
            ("pendulum.swing_seed_deg", self.pendulum.swing_seed_deg),
            (
                "pendulum.marker_width_mm",
                self.pendulum.marker_width(&self.fiducial),
            ),
            ("tracker.nominal_period_s", self.tracker.nominal_period_s),
            ("tracker.period_tolerance_s", self.tracker.period_tolerance_s),
        ];
        let widths = self
            .fiducial
            .widths_mm
            .iter()
            .map(|&w| ("fiducial.widths_mm", w));
        for (field, value) in positive.into_iter().chain(widths) {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::NonPositive { field, value });
            }
        }
        Ok(())
    }

    /// Open the configured template store.
    pub fn open_store(&self) -> Box<dyn TemplateStore> {
        match &self.template_source {
            TemplateSource::None => Box::new(NoTemplateStore),
            TemplateSource::File { path } => Box::new(FileTemplateStore::new(path.clone())),
            TemplateSource::Directory { path } => Box::new(DirectoryStore::new(path.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(PipelineConfig::default().validate(), Ok(()));
    }

    #[test]
    fn empty_json_is_default() {
        assert_eq!(
            PipelineConfig::from_json_str("{}").unwrap(),
            PipelineConfig::default()
        );
    }

    #[test]
    fn json_selects_mode_and_source() {
        let cfg = PipelineConfig::from_json_str(
            r#"{
                "sampling": {"n_samples": 3072},
                "fit": {"mode": "template"},
                "template_source": {"kind": "directory", "path": "/tmp/templates"},
                "reference_mode": "since_previous"
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.sampling.n_samples, 3072);
        assert_eq!(cfg.fit.mode, FitMode::Template);
        assert_eq!(
            cfg.template_source,
            TemplateSource::Directory {
                path: "/tmp/templates".into()
            }
        );
        assert_eq!(cfg.reference_mode, ReferenceMode::SincePrevious);
        assert_eq!(cfg.validate(), Ok(()));
    }

    #[test]
    fn physical_with_template_is_rejected() {
        let mut cfg = PipelineConfig::default();
        cfg.fit.mode = FitMode::Physical;
        cfg.template_source = TemplateSource::File {
            path: "template.dat".into(),
        };
        assert_eq!(cfg.validate(), Err(ConfigError::PhysicalWithTemplateSource));
    }

    #[test]
    fn template_mode_needs_source() {
        let mut cfg = PipelineConfig::default();
        cfg.fit.mode = FitMode::Template;
        assert_eq!(cfg.validate(), Err(ConfigError::TemplateModeWithoutSource));
    }

    #[test]
    fn physical_mode_checks_finger_count() {
        let mut cfg = PipelineConfig::default();
        cfg.fit.mode = FitMode::Physical;
        cfg.edges.n_fingers = 4;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::FingerCountMismatch {
                edges: 4,
                fiducial: 5
            })
        );
        // Quick mode does not use the layout for prediction.
        cfg.fit.mode = FitMode::Quick;
        assert_eq!(cfg.validate(), Ok(()));
    }

    #[test]
    fn bad_constants_are_rejected() {
        let mut cfg = PipelineConfig::default();
        cfg.edges.center_index = Some(7);
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::CenterIndexOutOfRange {
                index: 7,
                n_fingers: 5
            })
        );

        let mut cfg = PipelineConfig::default();
        cfg.sampling.adc_tick_s = 0.0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::NonPositive {
                field: "sampling.adc_tick_s",
                ..
            })
        ));

        let mut cfg = PipelineConfig::default();
        cfg.fiducial.widths_mm[2] = -1.0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::NonPositive {
                field: "fiducial.widths_mm",
                ..
            })
        ));
    }

    #[test]
    fn malformed_json_is_parse_error() {
        assert!(matches!(
            PipelineConfig::from_json_str("{\"fit\": 3}"),
            Err(ConfigError::Parse(_))
        ));
    }
}
