use chrono::{DateTime, Utc};
use chrono_tz::America::New_York;

use crate::config::{Config, Session};
use crate::error::EngineError;
use crate::indicators::{ema_series, rolling_sma_series};
use crate::models::{Bar, Direction, Snapshot};
use crate::signal::Detection;

/// One bar's worth of indicator state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BarPoint {
    pub ts: DateTime<Utc>,
    pub close: f64,
    pub ema_fast: f64,
    /// Slow EMA before display smoothing; all signal logic uses this.
    pub ema_slow_base: f64,
    /// Slow EMA as displayed (SMA-smoothed when enabled).
    pub ema_slow_shown: f64,
}

/// Incremental per-symbol EMA state. Owned and mutated exclusively by one
/// `EmaEngine`; read externally only through `EmaEngine::state`.
#[derive(Debug, Clone, Default)]
pub struct EmaState {
    pub seeded: bool,
    /// Bars in the dataset backing the current EMA values.
    pub bar_count: usize,
    pub prev: Option<BarPoint>,
    pub curr: Option<BarPoint>,
    /// Most recent base slow-EMA values, oldest first, at most `smooth_length`.
    pub smooth_buf: Vec<f64>,
    pub trend: Option<Direction>,
    pub armed: Option<Direction>,
}

/// Indicator parameters, lifted out of `Config` so engines are constructible
/// in tests without an environment.
#[derive(Debug, Clone)]
pub struct EmaSettings {
    pub fast_period: usize,
    pub slow_period: usize,
    pub required_bars: usize,
    pub smooth_slow: bool,
    pub smooth_length: usize,
    pub session: Session,
    pub gap_secs: i64,
}

impl Default for EmaSettings {
    fn default() -> Self {
        Self {
            fast_period: 50,
            slow_period: 200,
            required_bars: 205,
            smooth_slow: true,
            smooth_length: 9,
            session: Session::Eth,
            gap_secs: 20 * 60,
        }
    }
}

impl From<&Config> for EmaSettings {
    fn from(config: &Config) -> Self {
        Self {
            fast_period: config.fast_period,
            slow_period: config.slow_period,
            required_bars: config.required_bars,
            smooth_slow: config.smooth_slow,
            smooth_length: config.smooth_length,
            session: config.session,
            gap_secs: config.gap_secs,
        }
    }
}

/// Computed outputs of a full-window pass, applied atomically on success so
/// a failed recompute never clobbers a good incremental state.
struct Computed {
    bar_count: usize,
    prev: BarPoint,
    curr: BarPoint,
    smooth_buf: Vec<f64>,
}

/// Per-symbol EMA state machine.
///
/// Seeds from history, advances incrementally on each closed bar, and
/// recomputes from a fresh window after every close so the values track the
/// reference platform bar-for-bar (drift from long incremental chains never
/// accumulates).
pub struct EmaEngine {
    symbol: String,
    contract_id: String,
    settings: EmaSettings,
    alpha_fast: f64,
    alpha_slow: f64,
    state: EmaState,
}

impl EmaEngine {
    pub fn new(symbol: &str, contract_id: &str, settings: EmaSettings) -> Self {
        let alpha_fast = 2.0 / (settings.fast_period as f64 + 1.0);
        let alpha_slow = 2.0 / (settings.slow_period as f64 + 1.0);
        Self {
            symbol: symbol.to_string(),
            contract_id: contract_id.to_string(),
            settings,
            alpha_fast,
            alpha_slow,
            state: EmaState::default(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn contract_id(&self) -> &str {
        &self.contract_id
    }

    /// Read-only diagnostic view of the internal state.
    pub fn state(&self) -> &EmaState {
        &self.state
    }

    /// True when the bar's wall-clock time falls inside the configured
    /// trading session (New York time for RTH).
    pub fn in_session(&self, ts: DateTime<Utc>) -> bool {
        match self.settings.session {
            Session::Eth => true,
            Session::Rth { start, end } => {
                let local = ts.with_timezone(&New_York).time();
                local >= start && local <= end
            }
        }
    }

    /// True when a newly observed bar is too far past `curr` to continue
    /// incrementally; the caller must re-seed instead of advancing.
    pub fn gap_exceeded(&self, ts: DateTime<Utc>) -> bool {
        match self.state.curr {
            Some(curr) => (ts - curr.ts).num_seconds() > self.settings.gap_secs,
            None => false,
        }
    }

    /// Seed the EMA state from a historical bar sequence, bootstrapping the
    /// trend and armed direction.
    pub fn seed(&mut self, bars: &[Bar]) -> Result<(), EngineError> {
        let computed = self.compute(bars)?;
        self.apply_computed(computed);
        self.bootstrap_detector_state();
        Ok(())
    }

    /// Re-run the seed computation over a fresh window of recent closed bars.
    ///
    /// Numeric refresh only: the detector's trend/armed state carries over so
    /// a pending pullback arm survives the recompute.
    pub fn recompute_exact(&mut self, bars: &[Bar]) -> Result<(), EngineError> {
        let was_seeded = self.state.seeded;
        let trend = self.state.trend;
        let armed = self.state.armed;

        let computed = self.compute(bars)?;
        self.apply_computed(computed);

        if was_seeded {
            self.state.trend = trend;
            self.state.armed = armed;
        } else {
            self.bootstrap_detector_state();
        }
        Ok(())
    }

    /// Advance the state by one closed bar using the one-step recurrence.
    /// No-op unless seeded and the bar is strictly newer than `curr`.
    pub fn advance(&mut self, bar: &Bar) {
        if !self.state.seeded {
            return;
        }
        let curr = match self.state.curr {
            Some(curr) if bar.timestamp > curr.ts => curr,
            _ => return,
        };

        let ema_fast = curr.ema_fast + self.alpha_fast * (bar.close - curr.ema_fast);
        let ema_slow_base = curr.ema_slow_base + self.alpha_slow * (bar.close - curr.ema_slow_base);

        let window = if self.settings.smooth_slow {
            self.settings.smooth_length
        } else {
            1
        };
        self.state.smooth_buf.push(ema_slow_base);
        while self.state.smooth_buf.len() > window {
            self.state.smooth_buf.remove(0);
        }
        let ema_slow_shown = if self.settings.smooth_slow {
            self.state.smooth_buf.iter().sum::<f64>() / self.state.smooth_buf.len() as f64
        } else {
            ema_slow_base
        };

        self.state.prev = Some(curr);
        self.state.curr = Some(BarPoint {
            ts: bar.timestamp,
            close: bar.close,
            ema_fast,
            ema_slow_base,
            ema_slow_shown,
        });
        self.state.bar_count += 1;
    }

    /// Write the detector's outputs back onto the state.
    pub fn apply_detection(&mut self, detection: &Detection) {
        self.state.trend = detection.trend;
        self.state.armed = detection.armed;
    }

    /// Build an immutable snapshot of the current bar; `None` until seeded.
    pub fn snapshot(&self, detection: &Detection) -> Option<Snapshot> {
        let curr = self.state.curr?;
        Some(Snapshot {
            symbol: self.symbol.clone(),
            contract_id: self.contract_id.clone(),
            as_of: curr.ts,
            close: curr.close,
            ema_fast: curr.ema_fast,
            ema_slow: curr.ema_slow_shown,
            signal: detection.signal,
            color: detection.color,
            bar_count: self.state.bar_count,
        })
    }

    /// Keep only bars inside the configured session, preserving order.
    pub fn session_filter(&self, bars: &[Bar]) -> Vec<Bar> {
        bars.iter()
            .copied()
            .filter(|bar| self.in_session(bar.timestamp))
            .collect()
    }

    fn compute(&self, bars: &[Bar]) -> Result<Computed, EngineError> {
        let filtered = self.session_filter(bars);
        let n = filtered.len();
        if n < self.settings.required_bars {
            return Err(EngineError::InsufficientHistory {
                have: n,
                need: self.settings.required_bars,
            });
        }

        let closes: Vec<f64> = filtered.iter().map(|b| b.close).collect();
        let fast = ema_series(&closes, self.settings.fast_period);
        let slow = ema_series(&closes, self.settings.slow_period);
        let shown = if self.settings.smooth_slow {
            rolling_sma_series(&slow, self.settings.smooth_length)
        } else {
            slow.clone()
        };

        let point_at = |i: usize| -> Option<BarPoint> {
            Some(BarPoint {
                ts: filtered[i].timestamp,
                close: closes[i],
                ema_fast: fast[i]?,
                ema_slow_base: slow[i]?,
                ema_slow_shown: shown[i]?,
            })
        };
        let curr = point_at(n - 1).ok_or(EngineError::IndeterminateEma)?;
        let prev = point_at(n - 2).ok_or(EngineError::IndeterminateEma)?;

        let window = if self.settings.smooth_slow {
            self.settings.smooth_length
        } else {
            1
        };
        let defined: Vec<f64> = slow.iter().filter_map(|v| *v).collect();
        let smooth_buf = defined[defined.len().saturating_sub(window)..].to_vec();

        Ok(Computed {
            bar_count: n,
            prev,
            curr,
            smooth_buf,
        })
    }

    fn apply_computed(&mut self, computed: Computed) {
        self.state.seeded = true;
        self.state.bar_count = computed.bar_count;
        self.state.prev = Some(computed.prev);
        self.state.curr = Some(computed.curr);
        self.state.smooth_buf = computed.smooth_buf;
    }

    /// Initial trend from the fast/slow ordering; armed in the trend's
    /// direction when the latest close already sits on the pullback side of
    /// the fast EMA.
    fn bootstrap_detector_state(&mut self) {
        let curr = match self.state.curr {
            Some(curr) => curr,
            None => return,
        };
        let trend = if curr.ema_fast > curr.ema_slow_base {
            Direction::Long
        } else {
            Direction::Short
        };
        let pulled_back = match trend {
            Direction::Long => curr.close < curr.ema_fast,
            Direction::Short => curr.close > curr.ema_fast,
        };
        self.state.trend = Some(trend);
        self.state.armed = if pulled_back { Some(trend) } else { None };
    }
}
