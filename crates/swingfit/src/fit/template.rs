use std::collections::HashMap;

use tiny_solver::factors::na as ts_na;
use tiny_solver::Optimizer;

use super::{check, constant, rms_residual, solver_options, FitConfig, FitDivergence};
use crate::edge::EdgeFix;
use crate::template::Template;

/// Result of [`fit_template`].
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateFit {
    /// Marker center offset from the first sample (samples).
    pub t0: f64,
    /// Marker half-span (samples).
    pub duration: f64,
    /// Blocked level (ADC units).
    pub lo: f64,
    /// `hi - lo` (ADC units).
    pub range: f64,
    /// Best-fit prediction for every sample.
    pub prediction: Vec<f64>,
    /// RMS of `observed - prediction` over the fitted samples.
    pub rms: f64,
}

/// Spline coefficients copied out of a [`Template`] for generic evaluation.
#[derive(Debug, Clone)]
struct Shape {
    knots: Vec<f64>,
    values: Vec<f64>,
    curvature: Vec<f64>,
}

impl Shape {
    fn new(template: &Template) -> Self {
        let spline = template.spline();
        Self {
            knots: spline.knots().to_vec(),
            values: spline.values().to_vec(),
            curvature: spline.second_derivatives().to_vec(),
        }
    }

    /// Normalized transmission at phase `s`; fully open outside the knots.
    fn eval<T: ts_na::RealField>(&self, s: T) -> T {
        let n = self.knots.len();
        if s < constant::<T>(self.knots[0]) || s > constant::<T>(self.knots[n - 1]) {
            return T::one();
        }
        let i = self
            .knots
            .partition_point(|&k| constant::<T>(k) <= s)
            .saturating_sub(1)
            .min(n - 2);
        let h = self.knots[i + 1] - self.knots[i];
        let a = (constant::<T>(self.knots[i + 1]) - s.clone()) / constant::<T>(h);
        let b = (s - constant::<T>(self.knots[i])) / constant::<T>(h);
        let a3 = a.clone() * a.clone() * a.clone() - a.clone();
        let b3 = b.clone() * b.clone() * b.clone() - b.clone();
        a * constant::<T>(self.values[i])
            + b * constant::<T>(self.values[i + 1])
            + (a3 * constant::<T>(self.curvature[i]) + b3 * constant::<T>(self.curvature[i + 1]))
                * constant::<T>(h * h / 6.0)
    }

    fn predict<T: ts_na::RealField>(
        &self,
        i: usize,
        sign: f64,
        t0: T,
        duration: T,
        lo: T,
        range: T,
    ) -> T {
        let s = constant::<T>(sign) * (constant::<T>(i as f64) - t0) / duration;
        lo + range * self.eval(s)
    }
}

#[derive(Debug, Clone)]
struct TemplateFactor {
    /// `(sample index, observed value)` pairs included in the fit.
    observed: Vec<(usize, f64)>,
    sign: f64,
    shape: Shape,
}

impl<T: ts_na::RealField> tiny_solver::factors::Factor<T> for TemplateFactor {
    fn residual_func(&self, params: &[ts_na::DVector<T>]) -> ts_na::DVector<T> {
        let p = &params[0];
        ts_na::DVector::<T>::from_iterator(
            self.observed.len(),
            self.observed.iter().map(|&(i, y)| {
                constant::<T>(y)
                    - self.shape.predict(
                        i,
                        self.sign,
                        p[0].clone(),
                        p[1].clone(),
                        p[2].clone(),
                        p[3].clone(),
                    )
            }),
        )
    }
}

/// Fit `lo + range * template(dir * (t - t0) / duration)` to one frame.
///
/// Seeds come from the quick fit: `t0`, [`EdgeFix::duration`], `lo` and
/// `hi - lo`.
pub fn fit_template(
    samples: &[u16],
    seed: &EdgeFix,
    template: &Template,
    config: &FitConfig,
) -> Result<TemplateFit, FitDivergence> {
    let n = samples.len();
    let sign = seed.direction.sign();
    let observed: Vec<(usize, f64)> = samples
        .iter()
        .enumerate()
        .filter(|(i, _)| match config.notch_exclusion_halfwidth {
            Some(hw) => (*i as f64 - seed.t0).abs() > hw as f64,
            None => true,
        })
        .map(|(i, &v)| (i, f64::from(v)))
        .collect();
    if observed.is_empty() {
        return Err(FitDivergence::NoSolution);
    }
    let factor = TemplateFactor {
        observed: observed.clone(),
        sign,
        shape: Shape::new(template),
    };

    let init = vec![seed.t0, seed.duration(), seed.lo, seed.hi - seed.lo];
    let mut problem = tiny_solver::Problem::new();
    problem.add_residual_block(observed.len(), &["p"], Box::new(factor), None);
    let mut initial_values = HashMap::<String, ts_na::DVector<f64>>::new();
    initial_values.insert("p".to_string(), ts_na::DVector::<f64>::from_vec(init));

    let optimizer = tiny_solver::LevenbergMarquardtOptimizer::default();
    let result = optimizer
        .optimize(&problem, &initial_values, Some(solver_options(config.max_iters)))
        .ok_or(FitDivergence::NoSolution)?;
    let p = result.get("p").ok_or(FitDivergence::NoSolution)?;

    let n_f = n as f64;
    let t0 = check("t0", p[0], |v| (0.0..n_f).contains(&v))?;
    let duration = check("duration", p[1], |v| v > 0.0)?;
    let lo = check("lo", p[2], |_| true)?;
    let range = check("range", p[3], |v| v > 0.0)?;

    let shape = Shape::new(template);
    let prediction: Vec<f64> = (0..n)
        .map(|i| shape.predict(i, sign, t0, duration, lo, range))
        .collect();
    let (obs, pred): (Vec<u16>, Vec<f64>) = observed
        .iter()
        .map(|&(i, _)| (samples[i], prediction[i]))
        .unzip();
    let rms = rms_residual(&obs, &pred);
    tracing::debug!(
        "template fit: t0={:.3} (seed {:.3}) duration={:.3} (seed {:.3}) rms={:.2}",
        t0,
        seed.t0,
        duration,
        seed.duration(),
        rms
    );
    Ok(TemplateFit {
        t0,
        duration,
        lo,
        range,
        prediction,
        rms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::{detect_edges, EdgeDetectConfig};
    use crate::frame::Direction;
    use crate::template::{build_template, TemplateBuildConfig};
    use crate::test_utils::{layout_fingers, render_frame, Notch};
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    const PITCH: f64 = 160.0;
    const WIDTHS: [f64; 5] = [120.0, 60.0, 80.0, 50.0, 50.0];

    fn frame(t0: f64, direction: Direction, notch: Option<Notch>) -> Vec<u16> {
        let fingers = layout_fingers(t0, PITCH, &WIDTHS, direction);
        render_frame(1024, 40.0, 860.0, &fingers, 8.0, notch)
    }

    fn template() -> Template {
        let frames = [
            frame(510.0, Direction::Forward, None),
            frame(514.0, Direction::Reverse, None),
        ];
        let curve = build_template(
            frames.iter().map(|f| f.as_slice()),
            &EdgeDetectConfig::default(),
            &TemplateBuildConfig::default(),
        )
        .unwrap();
        Template::new(curve, 1).unwrap()
    }

    #[test]
    fn shape_matches_template_eval() {
        let t = template();
        let shape = Shape::new(&t);
        for s in [-1.5, -0.93, -0.2, 0.0, 0.41, 1.07, 1.3] {
            assert_abs_diff_eq!(shape.eval(s), t.eval(s), epsilon = 1e-12);
        }
    }

    #[test]
    fn template_fit_recovers_offset() {
        let t = template();
        for direction in [Direction::Forward, Direction::Reverse] {
            let samples = frame(515.7, direction, None);
            let seed = detect_edges(&samples, &EdgeDetectConfig::default()).unwrap();
            let fit = fit_template(&samples, &seed, &t, &FitConfig::default()).unwrap();
            assert_abs_diff_eq!(fit.t0, 515.7, epsilon = 0.5);
            assert_relative_eq!(fit.duration, seed.duration(), max_relative = 0.01);
            assert_abs_diff_eq!(fit.lo, 40.0, epsilon = 5.0);
            assert_abs_diff_eq!(fit.range, 820.0, epsilon = 10.0);
            assert!(fit.rms < 10.0, "rms {}", fit.rms);
            assert_eq!(fit.prediction.len(), samples.len());
        }
    }

    #[test]
    fn notch_exclusion_ignores_center_samples() {
        let t = template();
        let notch = Notch {
            center: 515.0,
            half_width: 20.0,
            level: 300.0,
        };
        let samples = frame(515.0, Direction::Forward, Some(notch));
        let seed = detect_edges(&samples, &EdgeDetectConfig::default()).unwrap();
        let cfg = FitConfig {
            notch_exclusion_halfwidth: Some(30),
            ..Default::default()
        };
        let fit = fit_template(&samples, &seed, &t, &cfg).unwrap();
        assert_abs_diff_eq!(fit.t0, 515.0, epsilon = 0.5);
        assert!(fit.rms < 10.0, "rms {}", fit.rms);
    }
}
