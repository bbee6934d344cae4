//! Threshold crossings with a hysteresis band.

/// Sample indices of rising and falling zero crossings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Crossings {
    /// Indices `i` with `y[i] <= 0 < y[i + 1]`.
    pub(crate) rising: Vec<usize>,
    /// Indices `i` with `y[i] > 0 >= y[i + 1]`.
    pub(crate) falling: Vec<usize>,
}

/// Locate zero crossings of a mean-subtracted trace.
///
/// A crossing is committed only once the trace leaves the band
/// `[-hysteresis, +hysteresis]` on the far side; if the trace wiggles across
/// zero inside the band, the last crossing before leaving it wins.
pub(crate) fn find_crossings(y: &[f64], hysteresis: f64) -> Crossings {
    let mut out = Crossings::default();
    let Some(&first) = y.first() else {
        return out;
    };
    let band = hysteresis.max(0.0);
    let mut above = first > 0.0;
    let mut pending: Option<usize> = None;

    for (i, w) in y.windows(2).enumerate() {
        let (a, b) = (w[0], w[1]);
        if above {
            if a > 0.0 && b <= 0.0 {
                pending = Some(i);
            }
            if b < -band || (band == 0.0 && b <= 0.0) {
                if let Some(p) = pending.take() {
                    out.falling.push(p);
                    above = false;
                }
            }
        } else {
            if a <= 0.0 && b > 0.0 {
                pending = Some(i);
            }
            if b > band {
                if let Some(p) = pending.take() {
                    out.rising.push(p);
                    above = true;
                }
            }
        }
    }
    out
}
