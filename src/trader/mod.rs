use chrono::{DateTime, Duration as ChronoDuration, Timelike, TimeZone, Utc};
use tracing::{debug, error, info, warn};

use crate::api::{BarQuery, ProjectXClient};
use crate::config::{BarTsMode, Config};
use crate::engine::EmaEngine;
use crate::executor::{BracketExecutor, BracketSpec};
use crate::models::{Bar, TradeEvent, TradeEventKind};
use crate::notify::Notifier;
use crate::persistence::{SeenSignals, TradeLog};
use crate::signal::{detect, DetectorSettings};

/// Next bar-close boundary strictly after `now` in `now`'s timezone.
/// With 15-minute bars that is the next quarter hour.
pub fn next_bar_close<Tz: TimeZone>(now: DateTime<Tz>, bar_minutes: u32) -> DateTime<Tz> {
    let step = bar_minutes.max(1) as i64;
    let truncated = now.clone()
        - ChronoDuration::seconds(now.second() as i64)
        - ChronoDuration::nanoseconds(now.nanosecond() as i64);
    let add = step - (now.minute() as i64 % step);
    truncated + ChronoDuration::minutes(add)
}

/// Timestamp the just-closed bar should carry, given how the gateway stamps
/// bars (open time or close time).
pub fn expected_bar_ts(
    expected_close: DateTime<Utc>,
    mode: BarTsMode,
    bar_minutes: u32,
) -> DateTime<Utc> {
    match mode {
        BarTsMode::Open => expected_close - ChronoDuration::minutes(bar_minutes as i64),
        BarTsMode::Close => expected_close,
    }
}

/// One instrument's engine plus the contract details orders need.
pub struct SymbolTrader {
    pub symbol: String,
    pub contract_id: String,
    pub tick_size: f64,
    pub engine: EmaEngine,
}

/// The bar-close scheduler. Wakes shortly after every bar close, feeds each
/// symbol's engine the new bar, and turns fired signals into bracket orders
/// (or dry-run log entries), at most once per (symbol, bar, direction).
pub struct Trader {
    config: Config,
    api: ProjectXClient,
    account_id: i64,
    detector: DetectorSettings,
    symbols: Vec<SymbolTrader>,
    seen: SeenSignals,
    trade_log: TradeLog,
    notifier: Notifier,
}

impl Trader {
    pub fn new(
        config: Config,
        api: ProjectXClient,
        account_id: i64,
        symbols: Vec<SymbolTrader>,
    ) -> Self {
        let detector = DetectorSettings::from(&config);
        let seen = SeenSignals::load(&config.seen_file);
        let trade_log = TradeLog::new(&config.trades_log);
        let notifier = Notifier::new(config.telegram.clone(), config.notify_on_dry_run);
        Self {
            config,
            api,
            account_id,
            detector,
            symbols,
            seen,
            trade_log,
            notifier,
        }
    }

    /// Seed every engine and log one snapshot per symbol. No orders.
    pub async fn once(&mut self) -> crate::Result<()> {
        let Self {
            config,
            api,
            detector,
            symbols,
            ..
        } = self;
        for st in symbols.iter_mut() {
            let bars = fetch_warmup(api, config, &st.contract_id).await?;
            st.engine.seed(&bars)?;
            let detection = detect(st.engine.state(), detector);
            st.engine.apply_detection(&detection);
            if let Some(snap) = st.engine.snapshot(&detection) {
                info!(
                    symbol = %snap.symbol,
                    as_of = %crate::util::iso_z(snap.as_of),
                    close = snap.close,
                    ema_fast = snap.ema_fast,
                    ema_slow = snap.ema_slow,
                    color = ?snap.color,
                    signal = ?snap.signal,
                    bars = snap.bar_count,
                    "snapshot"
                );
            }
        }
        Ok(())
    }

    /// Run forever: sleep to the next bar close plus the settle lag, then
    /// process every symbol.
    pub async fn run(&mut self) {
        info!(
            symbols = ?self.symbols.iter().map(|s| s.symbol.as_str()).collect::<Vec<_>>(),
            bar_minutes = self.config.bar_minutes,
            dry_run = self.config.dry_run,
            "trader started"
        );
        loop {
            let now = Utc::now().with_timezone(&self.config.align_tz);
            let boundary = next_bar_close(now.clone(), self.config.bar_minutes);
            let until = (boundary.clone() - now).to_std().unwrap_or_default()
                + self.config.close_lag;
            debug!(next_close = %boundary, sleep_secs = until.as_secs(), "waiting for bar close");
            tokio::time::sleep(until).await;

            self.run_cycle(boundary.with_timezone(&Utc)).await;
        }
    }

    /// One pass over all symbols for the bar closing at `expected_close`.
    /// Per-symbol failures are logged and never abort the other symbols.
    pub async fn run_cycle(&mut self, expected_close: DateTime<Utc>) {
        let Self {
            config,
            api,
            account_id,
            detector,
            symbols,
            seen,
            trade_log,
            notifier,
        } = self;
        let config: &Config = config;
        let api: &ProjectXClient = api;
        let account_id = *account_id;

        for st in symbols.iter_mut() {
            if !st.engine.state().seeded {
                match fetch_warmup(api, config, &st.contract_id).await {
                    Ok(bars) => {
                        if let Err(e) = st.engine.seed(&bars) {
                            warn!(symbol = %st.symbol, error = %e, "seed failed, skipping symbol");
                            continue;
                        }
                        info!(symbol = %st.symbol, bars = st.engine.state().bar_count, "seeded");
                    }
                    Err(e) => {
                        warn!(symbol = %st.symbol, error = %e, "warmup fetch failed, skipping symbol");
                        continue;
                    }
                }
            }

            let expected_ts = expected_bar_ts(expected_close, config.bar_ts_mode, config.bar_minutes);
            let bar = {
                let engine = &st.engine;
                let contract_id = st.contract_id.as_str();
                crate::util::poll_until(config.retry_count, config.retry_interval, move || {
                    latest_closed_bar(api, config, engine, contract_id, expected_ts)
                })
                .await
            };

            let Some(bar) = bar else {
                warn!(
                    symbol = %st.symbol,
                    expected = %crate::util::iso_z(expected_ts),
                    "bar never arrived, skipping this close"
                );
                continue;
            };

            if st.engine.gap_exceeded(bar.timestamp) {
                warn!(symbol = %st.symbol, "data gap detected, re-seeding");
                match fetch_warmup(api, config, &st.contract_id).await {
                    Ok(bars) => {
                        if let Err(e) = st.engine.seed(&bars) {
                            warn!(symbol = %st.symbol, error = %e, "re-seed failed, skipping symbol");
                            continue;
                        }
                    }
                    Err(e) => {
                        warn!(symbol = %st.symbol, error = %e, "re-seed fetch failed, skipping symbol");
                        continue;
                    }
                }
            } else {
                st.engine.advance(&bar);
                if config.exact_match_on_close {
                    match fetch_recompute_window(api, config, &st.contract_id).await {
                        Ok(bars) => {
                            if let Err(e) = st.engine.recompute_exact(&bars) {
                                warn!(symbol = %st.symbol, error = %e, "recompute failed, keeping incremental values");
                            }
                        }
                        Err(e) => {
                            warn!(symbol = %st.symbol, error = %e, "recompute fetch failed, keeping incremental values");
                        }
                    }
                }
            }

            let detection = detect(st.engine.state(), detector);
            st.engine.apply_detection(&detection);
            let Some(snap) = st.engine.snapshot(&detection) else {
                continue;
            };
            info!(
                symbol = %snap.symbol,
                as_of = %crate::util::iso_z(snap.as_of),
                close = snap.close,
                ema_fast = snap.ema_fast,
                ema_slow = snap.ema_slow,
                color = ?snap.color,
                signal = ?snap.signal,
                "bar close"
            );

            let Some(direction) = detection.signal else {
                continue;
            };
            let key = SeenSignals::key(&st.symbol, snap.as_of, direction);
            if seen.contains(&key) {
                debug!(symbol = %st.symbol, key = %key, "signal already handled");
                continue;
            }

            let params = config.order_params(&st.symbol);
            let tag = format!(
                "emabot-{}-{}",
                st.symbol,
                snap.as_of.format("%Y%m%d%H%M")
            );
            let mut event = TradeEvent {
                ts: Utc::now(),
                event: TradeEventKind::DryRunSignal,
                symbol: st.symbol.clone(),
                contract_id: st.contract_id.clone(),
                as_of: snap.as_of,
                signal: direction,
                qty: params.size,
                tp_points: params.tp_points,
                sl_points: params.sl_points,
                account_id,
                dry_run: config.dry_run,
                tag: tag.clone(),
                order: None,
                error: None,
            };

            if config.dry_run {
                info!(symbol = %st.symbol, signal = %direction, "dry run, order not sent");
                record(seen, trade_log, key, &event);
            } else {
                let executor =
                    BracketExecutor::new(api, config.fill_attempts, config.fill_interval);
                let spec = BracketSpec {
                    account_id,
                    contract_id: &st.contract_id,
                    side: direction.entry_side(),
                    quantity: params.size,
                    tp_points: params.tp_points,
                    sl_points: params.sl_points,
                    tick_size: st.tick_size,
                    tag: &tag,
                };
                match executor.submit(&spec).await {
                    Ok(order) => {
                        if order.fill_price.is_none() {
                            warn!(symbol = %st.symbol, "entry placed but fill unknown, no protective legs");
                        }
                        event.event = TradeEventKind::OrderSent;
                        event.order = Some(order);
                        record(seen, trade_log, key, &event);
                    }
                    Err(e) => {
                        // Not recorded as seen: the next cycle may retry a
                        // still-valid signal on a fresh bar, never this one.
                        error!(symbol = %st.symbol, error = %e, "order submission failed");
                        event.event = TradeEventKind::OrderError;
                        event.error = Some(e.to_string());
                        if let Err(log_err) = trade_log.append(&event) {
                            error!(error = %log_err, "trade log write failed");
                        }
                    }
                }
            }
            notifier.trade_event(&event).await;
        }
    }
}

fn record(seen: &mut SeenSignals, trade_log: &TradeLog, key: String, event: &TradeEvent) {
    if let Err(e) = trade_log.append(event) {
        error!(error = %e, "trade log write failed");
    }
    if let Err(e) = seen.insert(key) {
        error!(error = %e, "seen-signals write failed");
    }
}

/// Fetch the warmup window used for seeding and re-seeding.
async fn fetch_warmup(
    api: &ProjectXClient,
    config: &Config,
    contract_id: &str,
) -> crate::Result<Vec<Bar>> {
    let limit = (config.warmup_bars as usize).max(config.required_bars + 200) as u32;
    let days = config.lookback_days.max(config.needed_lookback_days());
    let end = Utc::now();
    api.retrieve_bars(&BarQuery {
        contract_id,
        live: config.force_live,
        unit: 2,
        unit_number: config.bar_minutes,
        include_partial: config.include_partial_seed,
        limit,
        start: end - ChronoDuration::days(days),
        end,
    })
    .await
}

/// Fetch the shorter window used for the post-close exact recompute.
async fn fetch_recompute_window(
    api: &ProjectXClient,
    config: &Config,
    contract_id: &str,
) -> crate::Result<Vec<Bar>> {
    let minutes = config.recompute_bars as i64 * config.bar_minutes as i64;
    let days = ((minutes + 24 * 60 - 1) / (24 * 60) + 4).max(7);
    let end = Utc::now();
    api.retrieve_bars(&BarQuery {
        contract_id,
        live: config.force_live,
        unit: 2,
        unit_number: config.bar_minutes,
        include_partial: false,
        limit: config.recompute_bars,
        start: end - ChronoDuration::days(days),
        end,
    })
    .await
}

/// One attempt at fetching the bar for the close that just happened. Returns
/// `None` (poll again) until a closed, in-session bar at or past the expected
/// timestamp shows up.
async fn latest_closed_bar(
    api: &ProjectXClient,
    config: &Config,
    engine: &EmaEngine,
    contract_id: &str,
    expected_ts: DateTime<Utc>,
) -> Option<Bar> {
    let end = Utc::now();
    let result = api
        .retrieve_bars(&BarQuery {
            contract_id,
            live: config.force_live,
            unit: 2,
            unit_number: config.bar_minutes,
            include_partial: false,
            limit: 2,
            start: end - ChronoDuration::days(2),
            end,
        })
        .await;
    let bars = match result {
        Ok(bars) => bars,
        Err(e) => {
            debug!(contract = contract_id, error = %e, "bar fetch attempt failed");
            return None;
        }
    };
    bars.into_iter()
        .rev()
        .find(|bar| engine.in_session(bar.timestamp) && bar.timestamp >= expected_ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_next_bar_close_quarter_hours() {
        let now = Utc.with_ymd_and_hms(2025, 3, 14, 14, 32, 10).unwrap();
        let next = next_bar_close(now, 15);
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 3, 14, 14, 45, 0).unwrap());
    }

    #[test]
    fn test_next_bar_close_on_boundary_is_strictly_after() {
        let now = Utc.with_ymd_and_hms(2025, 3, 14, 14, 45, 0).unwrap();
        let next = next_bar_close(now, 15);
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 3, 14, 15, 0, 0).unwrap());
    }

    #[test]
    fn test_next_bar_close_crosses_the_hour() {
        let now = Utc.with_ymd_and_hms(2025, 3, 14, 14, 59, 59).unwrap();
        let next = next_bar_close(now, 15);
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 3, 14, 15, 0, 0).unwrap());
    }

    #[test]
    fn test_next_bar_close_respects_timezone_wall_clock() {
        use chrono_tz::America::Chicago;
        // 2025-03-14 is CDT (UTC-5): 09:07 Chicago
        let now = Utc
            .with_ymd_and_hms(2025, 3, 14, 14, 7, 30)
            .unwrap()
            .with_timezone(&Chicago);
        let next = next_bar_close(now, 15);
        assert_eq!(
            next.with_timezone(&Utc),
            Utc.with_ymd_and_hms(2025, 3, 14, 14, 15, 0).unwrap()
        );
    }

    #[test]
    fn test_expected_bar_ts_modes() {
        let close = Utc.with_ymd_and_hms(2025, 3, 14, 14, 45, 0).unwrap();
        assert_eq!(
            expected_bar_ts(close, BarTsMode::Open, 15),
            Utc.with_ymd_and_hms(2025, 3, 14, 14, 30, 0).unwrap()
        );
        assert_eq!(expected_bar_ts(close, BarTsMode::Close, 15), close);
    }
}
