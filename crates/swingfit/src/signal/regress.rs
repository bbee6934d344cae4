use nalgebra::{Matrix2, Vector2};

/// Zero crossing of the least-squares line through `(t, y[t])` for
/// `t in [t1, t2)`.
///
/// The window is clamped to the slice. Returns `None` for fewer than two
/// samples or a (numerically) flat line.
pub(crate) fn line_zero_crossing(y: &[f64], t1: isize, t2: isize) -> Option<f64> {
    let n = y.len() as isize;
    let t1 = t1.clamp(0, n) as usize;
    let t2 = t2.clamp(0, n) as usize;
    if t2 < t1 + 2 {
        return None;
    }

    // Center time for conditioning; the normal equations stay 2x2.
    let t_mid = 0.5 * (t1 + t2 - 1) as f64;
    let mut h = Matrix2::<f64>::zeros();
    let mut g = Vector2::<f64>::zeros();
    for (t, &v) in y.iter().enumerate().take(t2).skip(t1) {
        let tc = t as f64 - t_mid;
        let j = Vector2::new(1.0, tc);
        h += j * j.transpose();
        g += j * v;
    }

    let coef = h.lu().solve(&g)?;
    let (intercept, slope) = (coef[0], coef[1]);
    if !slope.is_finite() || slope.abs() < 1e-12 {
        return None;
    }
    let t = t_mid - intercept / slope;
    t.is_finite().then_some(t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn exact_line_crossing() {
        let y: Vec<f64> = (0..20).map(|t| 3.0 * (t as f64 - 7.25)).collect();
        let t = line_zero_crossing(&y, 4, 11).unwrap();
        assert_abs_diff_eq!(t, 7.25, epsilon = 1e-9);
    }

    #[test]
    fn falling_line_crossing() {
        let y: Vec<f64> = (0..20).map(|t| -0.5 * (t as f64 - 12.6)).collect();
        let t = line_zero_crossing(&y, 8, 19).unwrap();
        assert_abs_diff_eq!(t, 12.6, epsilon = 1e-9);
    }

    #[test]
    fn flat_line_has_no_crossing() {
        let y = vec![4.0; 10];
        assert!(line_zero_crossing(&y, 0, 10).is_none());
        assert!(line_zero_crossing(&y, 3, 4).is_none());
    }

    #[test]
    fn window_is_clamped() {
        let y: Vec<f64> = (0..10).map(|t| t as f64 - 1.5).collect();
        let t = line_zero_crossing(&y, -4, 5).unwrap();
        assert_abs_diff_eq!(t, 1.5, epsilon = 1e-9);
    }
}
