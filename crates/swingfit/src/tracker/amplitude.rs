/// Swing amplitude (degrees) from the marker transit half-span.
///
/// The marker crosses `width_mm / 2` in `duration` samples at dead center,
/// giving the bob speed `v`; with `v = L * omega * sqrt(2 (1 - cos theta))`
/// the amplitude follows as
/// `cos theta = 1 - (v * period / (2 pi L))^2 / 2`.
///
/// Returns `None` when the inputs are not positive or the implied speed
/// exceeds what any amplitude can produce.
pub fn amplitude_from_duration(
    duration_samples: f64,
    adc_tick_s: f64,
    width_mm: f64,
    period_s: f64,
    length_mm: f64,
) -> Option<f64> {
    let positive = |v: f64| v.is_finite() && v > 0.0;
    if !(positive(duration_samples)
        && positive(adc_tick_s)
        && positive(width_mm)
        && positive(period_s)
        && positive(length_mm))
    {
        return None;
    }
    let speed = 0.5 * width_mm / (duration_samples * adc_tick_s);
    let ratio = speed * period_s / (2.0 * std::f64::consts::PI * length_mm);
    let cos_theta = 1.0 - 0.5 * ratio * ratio;
    if cos_theta < -1.0 {
        return None;
    }
    Some(cos_theta.acos().to_degrees())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Dead-center speed (mm/s) of a pendulum with the given amplitude.
    fn speed(swing_deg: f64, period_s: f64, length_mm: f64) -> f64 {
        let omega = 2.0 * std::f64::consts::PI / period_s;
        length_mm * omega * (2.0 * (1.0 - swing_deg.to_radians().cos())).sqrt()
    }

    #[test]
    fn inverts_dead_center_speed() {
        let (tick, width, period, length) = (1664e-7, 32.0, 2.0, 1020.0);
        for swing in [1.0, 4.66, 12.0] {
            let v = speed(swing, period, length);
            let duration = 0.5 * width / (v * tick);
            let amp = amplitude_from_duration(duration, tick, width, period, length).unwrap();
            assert_relative_eq!(amp, swing, max_relative = 1e-9);
        }
    }

    #[test]
    fn rejects_degenerate_inputs() {
        assert!(amplitude_from_duration(0.0, 1e-4, 32.0, 2.0, 1020.0).is_none());
        assert!(amplitude_from_duration(100.0, 1e-4, -1.0, 2.0, 1020.0).is_none());
        // Far too fast for a 1 m pendulum.
        assert!(amplitude_from_duration(1e-3, 1e-4, 32.0, 2.0, 1020.0).is_none());
    }
}
