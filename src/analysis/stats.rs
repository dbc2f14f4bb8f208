// =============================================================================
// Descriptive statistics helpers
// =============================================================================
//
// Degenerate inputs produce NaN rather than a substituted default; callers
// decide what an undefined statistic means for them.

/// Arithmetic mean; NaN for an empty slice and whenever any value is NaN.
pub fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Unbiased (N-1) sample variance; NaN for fewer than two values.
pub fn sample_variance(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return f64::NAN;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (n - 1) as f64
}

/// Sign with `sign(0) == 0`, so a zero never matches a non-zero sign.
pub fn sign(x: f64) -> i8 {
    if x > 0.0 {
        1
    } else if x < 0.0 {
        -1
    } else {
        0
    }
}

fn is_constant(values: &[f64]) -> bool {
    values.windows(2).all(|w| w[0] == w[1])
}

/// Pearson correlation of two equal-length series.
///
/// NaN when fewer than two pairs exist or either series is constant. The
/// result is clamped to [-1, 1] to absorb rounding.
pub fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    debug_assert_eq!(xs.len(), ys.len());
    if xs.len() < 2 || is_constant(xs) || is_constant(ys) {
        return f64::NAN;
    }

    let x_mean = mean(xs);
    let y_mean = mean(ys);

    let mut sxy = 0.0_f64;
    let mut sxx = 0.0_f64;
    let mut syy = 0.0_f64;
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - x_mean;
        let dy = y - y_mean;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }

    if sxx == 0.0 || syy == 0.0 {
        return f64::NAN;
    }
    (sxy / (sxx.sqrt() * syy.sqrt())).clamp(-1.0, 1.0)
}

/// Rows where both columns are present and finite, as two aligned vectors.
pub fn complete_pairs(a: &[Option<f64>], b: &[Option<f64>]) -> (Vec<f64>, Vec<f64>) {
    a.iter()
        .zip(b)
        .filter_map(|pair| match pair {
            (Some(x), Some(y)) if x.is_finite() && y.is_finite() => Some((*x, *y)),
            _ => None,
        })
        .unzip()
}

/// Ordinary least-squares line `y = slope * x + intercept`.
///
/// `None` for fewer than two points or a constant `x`.
pub fn linear_fit(xs: &[f64], ys: &[f64]) -> Option<(f64, f64)> {
    if xs.len() < 2 || xs.len() != ys.len() || is_constant(xs) {
        return None;
    }
    let x_mean = mean(xs);
    let y_mean = mean(ys);

    let mut numerator = 0.0_f64;
    let mut denominator = 0.0_f64;
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - x_mean;
        numerator += dx * (y - y_mean);
        denominator += dx * dx;
    }

    let slope = numerator / denominator;
    Some((slope, y_mean - slope * x_mean))
}
