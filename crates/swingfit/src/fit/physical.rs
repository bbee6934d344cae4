use std::collections::HashMap;

use tiny_solver::factors::na as ts_na;
use tiny_solver::Optimizer;

use super::{check, constant, rms_residual, solver_options, FitConfig, FitDivergence};
use crate::edge::EdgeFix;
use crate::frame::{Direction, SamplingConfig};
use crate::geometry::{Fiducial, PendulumSpec};

/// Parameters of the physical transmission model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicalParams {
    /// Dead-center offset from the first sample (samples).
    pub t0: f64,
    /// Blocked level (ADC units).
    pub lo: f64,
    /// Open level (ADC units).
    pub hi: f64,
    /// Beam diameter (mm).
    pub beam_mm: f64,
    /// Swing amplitude (degrees).
    pub swing_deg: f64,
    /// Effective pendulum length (mm).
    pub length_mm: f64,
}

/// Light transmitted through the fiducial as the pendulum swings past the
/// gate.
///
/// Finger edges are in mm relative to the marker center; the beam is a disc
/// whose overlap with each finger edge is computed in closed form.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalModel {
    tabs: Vec<[f64; 2]>,
    period_s: f64,
    adc_tick_s: f64,
}

impl PhysicalModel {
    pub fn new(fiducial: &Fiducial, pendulum: &PendulumSpec, sampling: &SamplingConfig) -> Self {
        Self {
            tabs: fiducial.tabs(),
            period_s: pendulum.period_s,
            adc_tick_s: sampling.adc_tick_s,
        }
    }

    pub fn tabs(&self) -> &[[f64; 2]] {
        &self.tabs
    }

    /// Predicted ADC trace of `n_samples` samples.
    pub fn predict(
        &self,
        params: &PhysicalParams,
        direction: Direction,
        n_samples: usize,
    ) -> Vec<f64> {
        let kin = Kinematics::new(self, direction);
        (0..n_samples)
            .map(|i| {
                kin.sample(
                    i,
                    params.t0,
                    params.lo,
                    params.hi,
                    params.beam_mm,
                    params.swing_deg,
                    params.length_mm,
                    &self.tabs,
                )
            })
            .collect()
    }
}

/// Transmission (0..1) with the beam center `x` from a single edge that
/// blocks `x > 0`.
fn edge_transmission<T: ts_na::RealField>(x: T, beam: T) -> T {
    let r = constant::<T>(2.0) * x / beam;
    if r <= -T::one() {
        T::one()
    } else if r.clone() * r.clone() < T::one() {
        let root = (T::one() - r.clone() * r.clone()).sqrt();
        (r.clone().acos() - r * root) / T::pi()
    } else {
        T::zero()
    }
}

fn tabs_transmission<T: ts_na::RealField>(x: T, tabs: &[[f64; 2]], beam: T) -> T {
    tabs.iter().fold(T::one(), |acc, &[x1, x2]| {
        acc + edge_transmission(x.clone() - constant::<T>(x1), beam.clone())
            - edge_transmission(x.clone() - constant::<T>(x2), beam.clone())
    })
}

/// Time-to-position constants shared by every sample of one frame.
struct Kinematics {
    omega: f64,
    /// Signed seconds per sample.
    step: f64,
}

impl Kinematics {
    fn new(model: &PhysicalModel, direction: Direction) -> Self {
        Self {
            omega: 2.0 * std::f64::consts::PI / model.period_s,
            step: direction.sign() * model.adc_tick_s,
        }
    }

    /// Transverse marker position (mm) `dt` seconds after dead center.
    ///
    /// Includes the lift of the marker and the slowing of the bob away from
    /// dead center.
    fn position<T: ts_na::RealField>(&self, dt: T, swing_deg: T, length: T) -> T {
        let omega = constant::<T>(self.omega);
        let theta = swing_deg * constant::<T>(std::f64::consts::PI / 180.0);
        let rate = (constant::<T>(2.0) * (T::one() - theta.cos())).sqrt();
        length * (rate * (omega * dt).sin()).sin()
    }

    #[allow(clippy::too_many_arguments)]
    fn sample<T: ts_na::RealField>(
        &self,
        i: usize,
        t0: T,
        lo: T,
        hi: T,
        beam: T,
        swing_deg: T,
        length: T,
        tabs: &[[f64; 2]],
    ) -> T {
        let dt = constant::<T>(self.step) * (constant::<T>(i as f64) - t0);
        let x = self.position(dt, swing_deg, length);
        lo.clone() + (hi - lo) * tabs_transmission(x, tabs, beam)
    }
}

/// Result of [`fit_physical`].
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalFit {
    pub params: PhysicalParams,
    /// Best-fit prediction for every sample.
    pub prediction: Vec<f64>,
    /// RMS of `observed - prediction` (ADC units).
    pub rms: f64,
}

#[derive(Debug, Clone)]
struct PhysicalFactor {
    observed: Vec<f64>,
    tabs: Vec<[f64; 2]>,
    omega: f64,
    step: f64,
    /// `Some` when the length is held fixed.
    fixed_length: Option<f64>,
}

impl<T: ts_na::RealField> tiny_solver::factors::Factor<T> for PhysicalFactor {
    fn residual_func(&self, params: &[ts_na::DVector<T>]) -> ts_na::DVector<T> {
        let p = &params[0];
        let length = match self.fixed_length {
            Some(l) => constant::<T>(l),
            None => p[5].clone(),
        };
        let kin = Kinematics {
            omega: self.omega,
            step: self.step,
        };
        ts_na::DVector::<T>::from_iterator(
            self.observed.len(),
            self.observed.iter().enumerate().map(|(i, &y)| {
                constant::<T>(y)
                    - kin.sample(
                        i,
                        p[0].clone(),
                        p[1].clone(),
                        p[2].clone(),
                        p[3].clone(),
                        p[4].clone(),
                        length.clone(),
                        &self.tabs,
                    )
            }),
        )
    }
}

/// Fit the physical model to one frame, seeded from its quick fit.
///
/// Fits `t0, lo, hi, beam, swing` (and the length when
/// `config.float_length`); the period is held at its nominal value.
pub fn fit_physical(
    samples: &[u16],
    seed: &EdgeFix,
    model: &PhysicalModel,
    pendulum: &PendulumSpec,
    config: &FitConfig,
) -> Result<PhysicalFit, FitDivergence> {
    let n = samples.len();
    let kin = Kinematics::new(model, seed.direction);
    let factor = PhysicalFactor {
        observed: samples.iter().map(|&v| f64::from(v)).collect(),
        tabs: model.tabs.clone(),
        omega: kin.omega,
        step: kin.step,
        fixed_length: (!config.float_length).then_some(pendulum.length_mm),
    };

    let mut init = vec![
        seed.t0,
        seed.lo,
        seed.hi,
        pendulum.beam_seed_mm,
        pendulum.swing_seed_deg,
    ];
    if config.float_length {
        init.push(pendulum.length_mm);
    }

    let mut problem = tiny_solver::Problem::new();
    problem.add_residual_block(n, &["p"], Box::new(factor), None);
    let mut initial_values = HashMap::<String, ts_na::DVector<f64>>::new();
    initial_values.insert("p".to_string(), ts_na::DVector::<f64>::from_vec(init));

    let optimizer = tiny_solver::LevenbergMarquardtOptimizer::default();
    let result = optimizer
        .optimize(&problem, &initial_values, Some(solver_options(config.max_iters)))
        .ok_or(FitDivergence::NoSolution)?;
    let p = result.get("p").ok_or(FitDivergence::NoSolution)?;

    let n_f = n as f64;
    let lo = check("lo", p[1], |_| true)?;
    let params = PhysicalParams {
        t0: check("t0", p[0], |v| (0.0..n_f).contains(&v))?,
        lo,
        hi: check("hi", p[2], |v| v > lo)?,
        beam_mm: check("beam_mm", p[3], |v| v > 0.0)?,
        swing_deg: check("swing_deg", p[4], |v| v > 0.0 && v < 90.0)?,
        length_mm: if config.float_length {
            check("length_mm", p[5], |v| v > 0.0)?
        } else {
            pendulum.length_mm
        },
    };

    let prediction = model.predict(&params, seed.direction, n);
    let rms = rms_residual(samples, &prediction);
    tracing::debug!(
        "physical fit: t0={:.3} (seed {:.3}) beam={:.3}mm swing={:.4}deg rms={:.2}",
        params.t0,
        seed.t0,
        params.beam_mm,
        params.swing_deg,
        rms
    );
    Ok(PhysicalFit {
        params,
        prediction,
        rms,
    })
}
