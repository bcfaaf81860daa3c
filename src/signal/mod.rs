use crate::engine::EmaState;
use crate::models::{Color, Direction};

/// Detector tunables, lifted out of `Config` for testability.
#[derive(Debug, Clone, Copy)]
pub struct DetectorSettings {
    /// Tolerance in points applied to every fast-EMA side test. 0 = strict.
    pub eps: f64,
    /// Clear a pending arm when the trend flips.
    pub reset_on_trend_change: bool,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            eps: 0.0,
            reset_on_trend_change: true,
        }
    }
}

impl From<&crate::config::Config> for DetectorSettings {
    fn from(config: &crate::config::Config) -> Self {
        Self {
            eps: config.eps,
            reset_on_trend_change: config.arm_reset_on_trend_change,
        }
    }
}

/// Output of one detector pass. `trend` and `armed` are the successor state
/// the caller writes back via `EmaEngine::apply_detection`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub signal: Option<Direction>,
    pub trend: Option<Direction>,
    pub armed: Option<Direction>,
    pub color: Color,
}

/// Pullback arm/trigger signal detection, a pure function of the EMA state.
///
/// The trend is the fast-vs-slow(base) ordering. A close on the opposite
/// side of the fast EMA arms the trend direction; a close back on the trend
/// side while armed fires the signal exactly once and disarms. Signals are
/// only meaningful on the bar where they first trigger.
pub fn detect(state: &EmaState, settings: &DetectorSettings) -> Detection {
    let (prev, curr) = match (state.prev, state.curr) {
        (Some(prev), Some(curr)) => (prev, curr),
        _ => {
            return Detection {
                signal: None,
                trend: state.trend,
                armed: state.armed,
                color: Color::Gray,
            }
        }
    };

    let eps = settings.eps;
    let trend = if curr.ema_fast > curr.ema_slow_base {
        Direction::Long
    } else {
        Direction::Short
    };

    let mut armed = state.armed;
    if settings.reset_on_trend_change && state.trend.is_some() && state.trend != Some(trend) {
        armed = None;
    }

    // Side tests against each bar's own fast EMA, with optional tolerance.
    let opposite_side = |close: f64, fast: f64| match trend {
        Direction::Long => close < fast - eps,
        Direction::Short => close > fast + eps,
    };
    let trend_side = |close: f64, fast: f64| match trend {
        Direction::Long => close > fast + eps,
        Direction::Short => close < fast - eps,
    };

    let mut signal = None;
    if armed == Some(trend) {
        // Trigger: crossed back to the trend side on this bar.
        if opposite_side(prev.close, prev.ema_fast) && trend_side(curr.close, curr.ema_fast) {
            signal = Some(trend);
            armed = None;
        }
    } else if opposite_side(curr.close, curr.ema_fast) {
        // Arm: price pulled back across the fast EMA against the trend.
        armed = Some(trend);
    }

    Detection {
        signal,
        trend: Some(trend),
        armed,
        color: color_from_zone(
            prev.close,
            prev.ema_fast,
            prev.ema_slow_base,
            curr.close,
            curr.ema_fast,
            curr.ema_slow_base,
        ),
    }
}

/// Display-only zone classification: green when the previous close sat
/// inside the fast/slow band, yellow when it just moved inside, red
/// otherwise. Independent of the signal.
fn color_from_zone(
    prev_close: f64,
    prev_fast: f64,
    prev_slow: f64,
    curr_close: f64,
    curr_fast: f64,
    curr_slow: f64,
) -> Color {
    let prev_in =
        prev_close >= prev_fast.min(prev_slow) && prev_close <= prev_fast.max(prev_slow);
    let curr_in =
        curr_close >= curr_fast.min(curr_slow) && curr_close <= curr_fast.max(curr_slow);

    if prev_in {
        Color::Green
    } else if curr_in {
        Color::Yellow
    } else {
        Color::Red
    }
}
