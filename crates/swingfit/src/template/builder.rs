use serde::{Deserialize, Serialize};

use super::{TemplateCurve, TemplateError};
use crate::edge::{detect_edges, EdgeDetectConfig};
use crate::frame::Direction;
use crate::spline::CubicSpline;

/// Configuration for [`build_template`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateBuildConfig {
    /// Number of points on the output phase grid.
    pub grid_points: usize,
    /// Domain padding: the grid spans `[-(1 + padding), 1 + padding]`.
    pub padding: f64,
    /// Minimum number of usable frames.
    pub min_frames: usize,
}

impl Default for TemplateBuildConfig {
    fn default() -> Self {
        Self {
            grid_points: 512,
            padding: 0.2,
            min_frames: 1,
        }
    }
}

impl TemplateBuildConfig {
    /// Uniform phase grid including both ends.
    pub fn grid(&self) -> Vec<f64> {
        let n = self.grid_points.max(2);
        let half = 1.0 + self.padding;
        let step = 2.0 * half / (n - 1) as f64;
        (0..n).map(|i| -half + i as f64 * step).collect()
    }
}

/// Average many phase-aligned frames into one transmission-vs-phase curve.
///
/// Each frame is quick-fit, mapped to phase `s = dir * (t - t0) / stretch`
/// with `stretch` the marker half-span, normalized with the mean `lo`/`hi`
/// of all usable frames, interpolated, and sampled on the shared grid.
/// Frames that fail edge detection are skipped.
pub fn build_template<'a, I>(
    frames: I,
    edges: &EdgeDetectConfig,
    config: &TemplateBuildConfig,
) -> Result<TemplateCurve, TemplateError>
where
    I: IntoIterator<Item = &'a [u16]>,
{
    let mut usable = Vec::new();
    for (i, samples) in frames.into_iter().enumerate() {
        match detect_edges(samples, edges) {
            Ok(fix) if fix.duration() > 0.0 => usable.push((samples, fix)),
            Ok(fix) => {
                tracing::warn!(
                    "template frame {}: non-positive stretch {:.3}, skipped",
                    i,
                    fix.duration()
                );
            }
            Err(e) => tracing::warn!("template frame {}: {}, skipped", i, e),
        }
    }

    let required = config.min_frames.max(1);
    if usable.len() < required {
        return Err(TemplateError::InsufficientFrames {
            usable: usable.len(),
            required,
        });
    }

    let count = usable.len() as f64;
    let lo = usable.iter().map(|(_, f)| f.lo).sum::<f64>() / count;
    let hi = usable.iter().map(|(_, f)| f.hi).sum::<f64>() / count;
    let range = hi - lo;

    let grid = config.grid();
    let mut acc = vec![0.0; grid.len()];
    for (samples, fix) in &usable {
        let stretch = fix.duration();
        let sign = fix.direction.sign();
        let mut s: Vec<f64> = (0..samples.len())
            .map(|t| sign * (t as f64 - fix.t0) / stretch)
            .collect();
        let mut v: Vec<f64> = samples
            .iter()
            .map(|&x| (f64::from(x) - lo) / range)
            .collect();
        if fix.direction == Direction::Reverse {
            s.reverse();
            v.reverse();
        }
        let spline = CubicSpline::interpolate(&s, &v)?;
        for (a, &g) in acc.iter_mut().zip(&grid) {
            *a += spline.eval(g);
        }
    }
    for a in &mut acc {
        *a /= count;
    }

    tracing::info!(
        "built template from {} frames: lo={:.1} hi={:.1} grid={}",
        usable.len(),
        lo,
        hi,
        grid.len()
    );
    Ok(TemplateCurve {
        phase: grid,
        value: acc,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{layout_fingers, render_frame};
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const PITCH: f64 = 160.0;
    const WIDTHS: [f64; 5] = [120.0, 60.0, 80.0, 50.0, 50.0];

    fn noisy_frames(count: usize, seed: u64) -> Vec<Vec<u16>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..count)
            .map(|i| {
                let direction = if i % 2 == 0 {
                    Direction::Forward
                } else {
                    Direction::Reverse
                };
                let t0 = 512.0 + rng.gen_range(-20.0..20.0);
                let fingers = layout_fingers(t0, PITCH, &WIDTHS, direction);
                render_frame(1024, 40.0, 860.0, &fingers, 8.0, None)
                    .into_iter()
                    .map(|v| (f64::from(v) + rng.gen_range(-15.0..15.0)).max(0.0) as u16)
                    .collect()
            })
            .collect()
    }

    fn build(frames: &[Vec<u16>]) -> TemplateCurve {
        build_template(
            frames.iter().map(|f| f.as_slice()),
            &EdgeDetectConfig::default(),
            &TemplateBuildConfig::default(),
        )
        .unwrap()
    }

    fn rms(a: &TemplateCurve, b: &TemplateCurve) -> f64 {
        let ss: f64 = a
            .value
            .iter()
            .zip(&b.value)
            .map(|(x, y)| (x - y) * (x - y))
            .sum();
        (ss / a.len() as f64).sqrt()
    }

    #[test]
    fn grid_spans_padded_domain() {
        let g = TemplateBuildConfig {
            grid_points: 5,
            padding: 0.5,
            min_frames: 1,
        }
        .grid();
        assert_eq!(g.len(), 5);
        assert_abs_diff_eq!(g[0], -1.5);
        assert_abs_diff_eq!(g[2], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(g[4], 1.5, epsilon = 1e-12);
    }

    #[test]
    fn clean_template_has_expected_shape() {
        let fingers = layout_fingers(512.0, PITCH, &WIDTHS, Direction::Forward);
        let frame = render_frame(1024, 40.0, 860.0, &fingers, 8.0, None);
        let t = build(&[frame]);
        assert_eq!(t.len(), 512);
        let at = |s: f64| {
            let i = t.phase.partition_point(|&p| p < s);
            t.value[i]
        };
        // Middle finger blocks the beam at the marker center.
        assert_abs_diff_eq!(at(0.0), 0.0, epsilon = 0.02);
        assert_abs_diff_eq!(at(-1.15), 1.0, epsilon = 0.02);
        assert_abs_diff_eq!(at(1.15), 1.0, epsilon = 0.02);
    }

    /// Template from one noise-free pass in each direction.
    fn canonical() -> TemplateCurve {
        let frames: Vec<Vec<u16>> = [Direction::Forward, Direction::Reverse]
            .into_iter()
            .map(|direction| {
                let fingers = layout_fingers(512.0, PITCH, &WIDTHS, direction);
                render_frame(1024, 40.0, 860.0, &fingers, 8.0, None)
            })
            .collect();
        build(&frames)
    }

    #[test]
    fn averaging_more_frames_approaches_canonical_curve() {
        let reference = canonical();
        let few = build(&noisy_frames(10, 2));
        let many = build(&noisy_frames(40, 3));
        let (e_few, e_many) = (rms(&few, &reference), rms(&many, &reference));
        assert!(
            e_many < e_few,
            "rms with 40 frames {} not below rms with 10 frames {}",
            e_many,
            e_few
        );
        assert!(e_many < 0.03, "rms with 40 frames {}", e_many);
    }

    #[test]
    fn unusable_frames_are_skipped() {
        let fingers = layout_fingers(512.0, PITCH, &WIDTHS, Direction::Reverse);
        let good = render_frame(1024, 40.0, 860.0, &fingers, 8.0, None);
        let flat = vec![500u16; 1024];
        let frames = [good.as_slice(), flat.as_slice()];
        let cfg = TemplateBuildConfig {
            min_frames: 1,
            ..Default::default()
        };
        assert!(build_template(frames, &EdgeDetectConfig::default(), &cfg).is_ok());

        let cfg = TemplateBuildConfig {
            min_frames: 2,
            ..Default::default()
        };
        assert_eq!(
            build_template(frames, &EdgeDetectConfig::default(), &cfg),
            Err(TemplateError::InsufficientFrames {
                usable: 1,
                required: 2,
            })
        );
    }
}
