//! Natural cubic interpolating spline.

/// Errors from [`CubicSpline::interpolate`].
#[derive(Debug, Clone, PartialEq)]
pub enum SplineError {
    /// Knot and value arrays differ in length.
    LengthMismatch { knots: usize, values: usize },
    /// At least two knots are required.
    TooFewKnots { n: usize },
    /// Knots must be finite and strictly increasing.
    NotIncreasing { index: usize },
}

impl std::fmt::Display for SplineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LengthMismatch { knots, values } => {
                write!(f, "{} knots but {} values", knots, values)
            }
            Self::TooFewKnots { n } => write!(f, "need at least 2 knots, got {}", n),
            Self::NotIncreasing { index } => {
                write!(f, "knots not strictly increasing at index {}", index)
            }
        }
    }
}

impl std::error::Error for SplineError {}

/// Cubic spline through every knot with zero curvature at both ends.
///
/// Outside the knot range the spline holds the end values.
#[derive(Debug, Clone, PartialEq)]
pub struct CubicSpline {
    x: Vec<f64>,
    y: Vec<f64>,
    /// Second derivative at each knot.
    m: Vec<f64>,
}

impl CubicSpline {
    /// Interpolate `(x[i], y[i])`.
    pub fn interpolate(x: &[f64], y: &[f64]) -> Result<Self, SplineError> {
        if x.len() != y.len() {
            return Err(SplineError::LengthMismatch {
                knots: x.len(),
                values: y.len(),
            });
        }
        let n = x.len();
        if n < 2 {
            return Err(SplineError::TooFewKnots { n });
        }
        for i in 0..n {
            let bad = !x[i].is_finite() || (i > 0 && x[i] <= x[i - 1]);
            if bad {
                return Err(SplineError::NotIncreasing { index: i });
            }
        }

        // Tridiagonal system for interior second derivatives (Thomas algorithm).
        let mut m = vec![0.0; n];
        if n > 2 {
            let inner = n - 2;
            let mut diag = vec![0.0; inner];
            let mut upper = vec![0.0; inner];
            let mut rhs = vec![0.0; inner];
            for k in 0..inner {
                let i = k + 1;
                let h0 = x[i] - x[i - 1];
                let h1 = x[i + 1] - x[i];
                diag[k] = 2.0 * (h0 + h1);
                upper[k] = h1;
                rhs[k] = 6.0 * ((y[i + 1] - y[i]) / h1 - (y[i] - y[i - 1]) / h0);
            }
            for k in 1..inner {
                let lower = x[k + 1] - x[k];
                let w = lower / diag[k - 1];
                diag[k] -= w * upper[k - 1];
                rhs[k] -= w * rhs[k - 1];
            }
            m[inner] = rhs[inner - 1] / diag[inner - 1];
            for k in (0..inner - 1).rev() {
                m[k + 1] = (rhs[k] - upper[k] * m[k + 2]) / diag[k];
            }
        }

        Ok(Self {
            x: x.to_vec(),
            y: y.to_vec(),
            m,
        })
    }

    #[inline]
    pub fn knots(&self) -> &[f64] {
        &self.x
    }

    #[inline]
    pub fn values(&self) -> &[f64] {
        &self.y
    }

    #[inline]
    pub fn second_derivatives(&self) -> &[f64] {
        &self.m
    }

    /// Domain `[x_first, x_last]`.
    pub fn domain(&self) -> (f64, f64) {
        (self.x[0], self.x[self.x.len() - 1])
    }

    /// Index `i` of the segment `[x[i], x[i + 1]]` used for `t`.
    pub(crate) fn segment(&self, t: f64) -> usize {
        let n = self.x.len();
        self.x.partition_point(|&k| k <= t).saturating_sub(1).min(n - 2)
    }

    /// Evaluate at `t`.
    pub fn eval(&self, t: f64) -> f64 {
        let (x0, x1) = self.domain();
        if t <= x0 {
            return self.y[0];
        }
        if t >= x1 {
            return self.y[self.y.len() - 1];
        }
        let i = self.segment(t);
        let h = self.x[i + 1] - self.x[i];
        let a = (self.x[i + 1] - t) / h;
        let b = (t - self.x[i]) / h;
        a * self.y[i]
            + b * self.y[i + 1]
            + ((a * a * a - a) * self.m[i] + (b * b * b - b) * self.m[i + 1]) * h * h / 6.0
    }
}
