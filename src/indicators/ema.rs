/// Calculate the full Exponential Moving Average series.
///
/// Uses the recursive definition seeded by the first sample:
/// `ema[0] = x[0]`, `ema[i] = ema[i-1] + alpha * (x[i] - ema[i-1])` with
/// `alpha = 2 / (period + 1)`. The first `period - 1` outputs are `None`
/// (warmup), matching the reference platform's display.
pub fn ema_series(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if period == 0 || values.is_empty() {
        return vec![None; values.len()];
    }

    let alpha = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut ema = values[0];

    for (i, &value) in values.iter().enumerate() {
        if i > 0 {
            ema += alpha * (value - ema);
        }
        out.push(if i + 1 >= period { Some(ema) } else { None });
    }

    out
}

/// Rolling SMA over a series that may contain warmup gaps.
///
/// `out[i]` is the mean of `values[i-window+1..=i]` when every sample in the
/// window is defined, `None` otherwise. Used to smooth the slow-EMA display.
pub fn rolling_sma_series(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    if window == 0 {
        return vec![None; values.len()];
    }

    values
        .iter()
        .enumerate()
        .map(|(i, _)| {
            if i + 1 < window {
                return None;
            }
            let slice = &values[i + 1 - window..=i];
            if slice.iter().any(|v| v.is_none()) {
                return None;
            }
            let sum: f64 = slice.iter().flatten().sum();
            Some(sum / window as f64)
        })
        .collect()
}
