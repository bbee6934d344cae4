//! Fiducial layout and pendulum constants.

use serde::{Deserialize, Serialize};

/// Finger layout of the fiducial marker.
///
/// Finger `i` is centered at `(i - (K - 1) / 2) * pitch_mm`, so the layout is
/// symmetric about the marker center. Positions increase in the
/// [`Direction::Forward`](crate::Direction::Forward) order of travel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Fiducial {
    /// Center-to-center finger spacing (mm).
    pub pitch_mm: f64,
    /// Width of each finger (mm), in forward order.
    pub widths_mm: Vec<f64>,
}

impl Default for Fiducial {
    fn default() -> Self {
        Self {
            pitch_mm: 7.0,
            widths_mm: vec![5.5, 3.5, 3.5, 2.5, 2.5],
        }
    }
}

impl Fiducial {
    /// Number of fingers `K`.
    #[inline]
    pub fn n_fingers(&self) -> usize {
        self.widths_mm.len()
    }

    /// Finger edges `[x1, x2]` in mm relative to the marker center.
    pub fn tabs(&self) -> Vec<[f64; 2]> {
        let mid = (self.n_fingers() as f64 - 1.0) * 0.5;
        self.widths_mm
            .iter()
            .enumerate()
            .map(|(i, &w)| {
                let c = (i as f64 - mid) * self.pitch_mm;
                [c - 0.5 * w, c + 0.5 * w]
            })
            .collect()
    }

    /// Distance from the first finger's leading edge to the last finger's
    /// trailing edge (mm).
    pub fn span_mm(&self) -> f64 {
        let tabs = self.tabs();
        match (tabs.first(), tabs.last()) {
            (Some(a), Some(b)) => b[1] - a[0],
            _ => 0.0,
        }
    }
}

/// Physical constants of the pendulum and optical gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PendulumSpec {
    /// Effective pendulum length (mm).
    pub length_mm: f64,
    /// Effective period (s); fixed during fits.
    pub period_s: f64,
    /// Seed for the swing amplitude (degrees).
    pub swing_seed_deg: f64,
    /// Seed for the beam diameter (mm).
    pub beam_seed_mm: f64,
    /// Marker width used to convert a fitted duration to a speed (mm).
    ///
    /// `None` uses the fiducial span.
    pub marker_width_mm: Option<f64>,
}

impl Default for PendulumSpec {
    fn default() -> Self {
        Self {
            length_mm: 1020.0,
            period_s: 2.0,
            swing_seed_deg: 4.66,
            beam_seed_mm: 1.7,
            marker_width_mm: None,
        }
    }
}

impl PendulumSpec {
    /// Resolved marker width (mm).
    pub fn marker_width(&self, fiducial: &Fiducial) -> f64 {
        self.marker_width_mm.unwrap_or_else(|| fiducial.span_mm())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn tabs_are_centered_on_pitch() {
        let f = Fiducial {
            pitch_mm: 10.0,
            widths_mm: vec![4.0, 2.0, 2.0],
        };
        let tabs = f.tabs();
        assert_eq!(tabs.len(), 3);
        assert_abs_diff_eq!(tabs[0][0], -12.0);
        assert_abs_diff_eq!(tabs[0][1], -8.0);
        assert_abs_diff_eq!(tabs[1][0], -1.0);
        assert_abs_diff_eq!(tabs[2][1], 11.0);
        assert_abs_diff_eq!(f.span_mm(), 23.0);
    }

    #[test]
    fn default_layout_span() {
        let f = Fiducial::default();
        assert_eq!(f.n_fingers(), 5);
        assert_abs_diff_eq!(f.span_mm(), 32.0, epsilon = 1e-12);
        let p = PendulumSpec::default();
        assert_abs_diff_eq!(p.marker_width(&f), 32.0, epsilon = 1e-12);
        let p = PendulumSpec {
            marker_width_mm: Some(30.0),
            ..Default::default()
        };
        assert_abs_diff_eq!(p.marker_width(&f), 30.0);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let p: PendulumSpec = serde_json::from_str(r#"{"length_mm": 990.0}"#).unwrap();
        assert_abs_diff_eq!(p.length_mm, 990.0);
        assert_abs_diff_eq!(p.period_s, 2.0);
    }
}
