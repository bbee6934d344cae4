use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{
    build_template, StoreError, Template, TemplateBuildConfig, TemplateError, TemplateStore,
};
use crate::edge::EdgeDetectConfig;

/// Building a first template from raw frames when the store holds none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Raw frames requested from the store; fewer available frames defer the
    /// build. `0` disables bootstrapping.
    pub fetch_limit: usize,
    /// Cap on frames fed to the builder; `0` means no cap.
    pub max_frames: usize,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            fetch_limit: 100,
            max_frames: 0,
        }
    }
}

#[derive(Debug)]
enum RefreshError {
    Store(StoreError),
    Template(TemplateError),
}

impl std::fmt::Display for RefreshError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(e) => write!(f, "{}", e),
            Self::Template(e) => write!(f, "{}", e),
        }
    }
}

impl From<StoreError> for RefreshError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<TemplateError> for RefreshError {
    fn from(e: TemplateError) -> Self {
        Self::Template(e)
    }
}

#[derive(Debug, Clone)]
struct Bootstrap {
    config: BootstrapConfig,
    edges: EdgeDetectConfig,
    build: TemplateBuildConfig,
    n_samples: usize,
}

/// Look-aside cache of the current template revision.
///
/// The slot holds an `Arc<Template>` replaced as a whole; a template handed
/// out by [`TemplateCache::current`] stays valid across later swaps.
#[derive(Debug, Clone, Default)]
pub struct TemplateCache {
    current: Option<Arc<Template>>,
    bootstrap: Option<Bootstrap>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache that builds and saves a template from the store's raw frames
    /// when neither the store nor the cache holds one.
    pub fn with_bootstrap(
        config: BootstrapConfig,
        edges: EdgeDetectConfig,
        build: TemplateBuildConfig,
        n_samples: usize,
    ) -> Self {
        Self {
            current: None,
            bootstrap: Some(Bootstrap {
                config,
                edges,
                build,
                n_samples,
            }),
        }
    }

    /// Current revision, if any.
    #[inline]
    pub fn current(&self) -> Option<Arc<Template>> {
        self.current.clone()
    }

    /// Replace the current revision.
    pub fn set(&mut self, template: Template) {
        tracing::info!("template revision {} installed", template.timestamp());
        self.current = Some(Arc::new(template));
    }

    /// Poll the store and swap in a newer revision.
    ///
    /// Returns `true` when the current template changed. Store or template
    /// failures are logged and leave the current template in place.
    pub fn refresh(&mut self, store: &mut dyn TemplateStore) -> bool {
        match self.try_refresh(store) {
            Ok(swapped) => swapped,
            Err(e) => {
                match &self.current {
                    Some(t) => tracing::warn!(
                        "template refresh failed: {}; keeping revision {}",
                        e,
                        t.timestamp()
                    ),
                    None => tracing::warn!("template refresh failed: {}; no template", e),
                }
                false
            }
        }
    }

    fn try_refresh(&mut self, store: &mut dyn TemplateStore) -> Result<bool, RefreshError> {
        let mut latest = store.load_most_recent_template()?;
        if latest.is_none() && self.current.is_none() && self.bootstrap_from_raw(store)? {
            latest = store.load_most_recent_template()?;
        }
        let Some((curve, timestamp)) = latest else {
            return Ok(false);
        };
        if self.current.as_ref().map(|t| t.timestamp()) == Some(timestamp) {
            return Ok(false);
        }
        let template = Template::new(curve, timestamp)?;
        tracing::info!(
            "template revision {} loaded ({} points)",
            timestamp,
            template.curve().len()
        );
        self.current = Some(Arc::new(template));
        Ok(true)
    }

    fn bootstrap_from_raw(&self, store: &mut dyn TemplateStore) -> Result<bool, RefreshError> {
        let Some(b) = &self.bootstrap else {
            return Ok(false);
        };
        if b.config.fetch_limit == 0 {
            return Ok(false);
        }
        let raw = store.load_raw_frames(b.config.fetch_limit)?;
        let mut frames: Vec<&[u16]> = raw
            .frames
            .iter()
            .filter(|f| f.len() == b.n_samples)
            .map(|f| f.as_slice())
            .collect();
        if frames.len() < b.config.fetch_limit {
            tracing::debug!(
                "insufficient raw data for a template: {} of {} frames",
                frames.len(),
                b.config.fetch_limit
            );
            return Ok(false);
        }
        if b.config.max_frames > 0 {
            frames.truncate(b.config.max_frames);
        }
        let curve = build_template(frames, &b.edges, &b.build)?;
        store.save_template(&curve, raw.timestamp.unwrap_or(0))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Direction;
    use crate::template::{RawFrames, TemplateCurve, Timestamp};
    use crate::test_utils::{layout_fingers, render_frame};

    #[derive(Default)]
    struct MemoryStore {
        templates: Vec<(TemplateCurve, Timestamp)>,
        raw: Vec<Vec<u16>>,
        fail: bool,
        saves: usize,
    }

    impl TemplateStore for MemoryStore {
        fn load_most_recent_template(
            &mut self,
        ) -> Result<Option<(TemplateCurve, Timestamp)>, StoreError> {
            if self.fail {
                return Err(StoreError::Unavailable("offline".into()));
            }
            Ok(self.templates.iter().max_by_key(|(_, ts)| *ts).cloned())
        }

        fn save_template(
            &mut self,
            curve: &TemplateCurve,
            timestamp: Timestamp,
        ) -> Result<(), StoreError> {
            self.saves += 1;
            self.templates.push((curve.clone(), timestamp));
            Ok(())
        }

        fn load_raw_frames(&mut self, limit: usize) -> Result<RawFrames, StoreError> {
            Ok(RawFrames {
                frames: self.raw.iter().take(limit).cloned().collect(),
                timestamp: Some(42),
            })
        }
    }

    fn curve(mid: f64) -> TemplateCurve {
        TemplateCurve {
            phase: vec![-1.2, 0.0, 1.2],
            value: vec![1.0, mid, 1.0],
        }
    }

    #[test]
    fn swaps_only_on_new_timestamp() {
        let mut store = MemoryStore {
            templates: vec![(curve(0.1), 1)],
            ..Default::default()
        };
        let mut cache = TemplateCache::new();
        assert!(cache.refresh(&mut store));
        let held = cache.current().unwrap();
        assert!(!cache.refresh(&mut store));

        store.templates.push((curve(0.3), 2));
        assert!(cache.refresh(&mut store));
        assert_eq!(cache.current().unwrap().timestamp(), 2);
        // The earlier handle is untouched by the swap.
        assert_eq!(held.timestamp(), 1);
        assert_eq!(held.curve().value[1], 0.1);
    }

    #[test]
    fn store_failure_keeps_last_known_template() {
        let mut store = MemoryStore {
            templates: vec![(curve(0.1), 5)],
            ..Default::default()
        };
        let mut cache = TemplateCache::new();
        assert!(cache.refresh(&mut store));
        store.fail = true;
        assert!(!cache.refresh(&mut store));
        assert_eq!(cache.current().unwrap().timestamp(), 5);
    }

    #[test]
    fn invalid_curve_is_ignored() {
        let mut store = MemoryStore {
            templates: vec![(
                TemplateCurve {
                    phase: vec![0.0],
                    value: vec![1.0],
                },
                9,
            )],
            ..Default::default()
        };
        let mut cache = TemplateCache::new();
        assert!(!cache.refresh(&mut store));
        assert!(cache.current().is_none());
    }

    #[test]
    fn bootstraps_from_raw_frames() {
        let widths = [120.0, 60.0, 80.0, 50.0, 50.0];
        let fingers = layout_fingers(512.0, 160.0, &widths, Direction::Forward);
        let frame = render_frame(1024, 40.0, 860.0, &fingers, 8.0, None);
        let mut store = MemoryStore {
            raw: vec![frame; 3],
            ..Default::default()
        };
        let mut cache = TemplateCache::with_bootstrap(
            BootstrapConfig {
                fetch_limit: 4,
                max_frames: 0,
            },
            EdgeDetectConfig::default(),
            TemplateBuildConfig::default(),
            1024,
        );
        // Three frames available, four required.
        assert!(!cache.refresh(&mut store));
        assert_eq!(store.saves, 0);

        let mut cache = TemplateCache::with_bootstrap(
            BootstrapConfig {
                fetch_limit: 3,
                max_frames: 2,
            },
            EdgeDetectConfig::default(),
            TemplateBuildConfig::default(),
            1024,
        );
        assert!(cache.refresh(&mut store));
        assert_eq!(store.saves, 1);
        assert_eq!(cache.current().unwrap().timestamp(), 42);
        assert_eq!(cache.current().unwrap().curve().len(), 512);
    }
}
