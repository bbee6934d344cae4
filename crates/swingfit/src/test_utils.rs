//! Synthetic frame generators shared by unit tests.

use crate::frame::Direction;

/// Flat region overriding the rendered trace, e.g. a partially transparent
/// notch in the middle finger.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Notch {
    pub center: f64,
    pub half_width: f64,
    pub level: f64,
}

/// Finger edges `[fall, rise]` in sample coordinates, sorted by position.
///
/// Finger `i` is centered at `t0 + sign * (i - (K - 1) / 2) * pitch`, so a
/// reverse pass meets the last finger first.
pub(crate) fn layout_fingers(
    t0: f64,
    pitch: f64,
    widths: &[f64],
    direction: Direction,
) -> Vec<[f64; 2]> {
    let mid = (widths.len() as f64 - 1.0) * 0.5;
    let mut fingers: Vec<[f64; 2]> = widths
        .iter()
        .enumerate()
        .map(|(i, &w)| {
            let c = t0 + direction.sign() * (i as f64 - mid) * pitch;
            [c - 0.5 * w, c + 0.5 * w]
        })
        .collect();
    fingers.sort_by(|a, b| a[0].total_cmp(&b[0]));
    fingers
}

/// Render `n` samples of a trace at `hi` blocked down to `lo` by `fingers`.
///
/// Each edge is a linear ramp `ramp` samples wide centered on the edge
/// position, so the midpoint crossing sits exactly at the edge.
pub(crate) fn render_frame(
    n: usize,
    lo: f64,
    hi: f64,
    fingers: &[[f64; 2]],
    ramp: f64,
    notch: Option<Notch>,
) -> Vec<u16> {
    (0..n)
        .map(|i| {
            let t = i as f64;
            let blocked: f64 = fingers
                .iter()
                .map(|&[a, b]| {
                    let enter = (t - a) / ramp + 0.5;
                    let leave = (b - t) / ramp + 0.5;
                    enter.min(leave).clamp(0.0, 1.0)
                })
                .sum();
            let mut v = lo + (hi - lo) * (1.0 - blocked.min(1.0));
            if let Some(n) = notch {
                if (t - n.center).abs() <= n.half_width {
                    v = n.level;
                }
            }
            v.round().clamp(0.0, f64::from(u16::MAX)) as u16
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverse_layout_mirrors_forward() {
        let widths = [30.0, 10.0, 20.0];
        let fwd = layout_fingers(100.0, 40.0, &widths, Direction::Forward);
        let rev = layout_fingers(100.0, 40.0, &widths, Direction::Reverse);
        assert_eq!(fwd, vec![[45.0, 75.0], [95.0, 105.0], [130.0, 150.0]]);
        assert_eq!(rev, vec![[50.0, 70.0], [95.0, 105.0], [125.0, 155.0]]);
    }

    #[test]
    fn rendered_edges_cross_midpoint_at_edge() {
        let f = render_frame(40, 0.0, 100.0, &[[10.0, 30.0]], 4.0, None);
        assert_eq!(f[0], 100);
        assert_eq!(f[10], 50);
        assert_eq!(f[20], 0);
        assert_eq!(f[30], 50);
    }
}
