//! Running-mean smoothing.

/// Boxcar-smooth `samples` with a window of `2 * half_width + 1` samples.
///
/// Ends are padded by replicating the first/last sample, so the output has the
/// same length as the input. Returns `None` unless the input is strictly longer
/// than the window.
pub(crate) fn boxcar_smooth(samples: &[f64], half_width: usize) -> Option<Vec<f64>> {
    let wlen = 2 * half_width + 1;
    if samples.len() <= wlen {
        return None;
    }
    let first = samples[0];
    let last = samples[samples.len() - 1];

    // Prefix sums over the padded sequence.
    let padded_len = samples.len() + 2 * half_width;
    let mut cumsum = Vec::with_capacity(padded_len + 1);
    cumsum.push(0.0);
    let mut acc = 0.0;
    let padded = std::iter::repeat(first)
        .take(half_width)
        .chain(samples.iter().copied())
        .chain(std::iter::repeat(last).take(half_width));
    for v in padded {
        acc += v;
        cumsum.push(acc);
    }

    let inv = 1.0 / wlen as f64;
    Some(
        (0..samples.len())
            .map(|i| (cumsum[i + wlen] - cumsum[i]) * inv)
            .collect(),
    )
}

/// Mean of `values[lo..hi]` after clamping the range to the slice.
pub(crate) fn window_mean(values: &[f64], lo: isize, hi: isize) -> Option<f64> {
    let n = values.len() as isize;
    let lo = lo.clamp(0, n) as usize;
    let hi = hi.clamp(0, n) as usize;
    if hi <= lo {
        return None;
    }
    let slice = &values[lo..hi];
    Some(slice.iter().sum::<f64>() / slice.len() as f64)
}
