use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveTime;
use chrono_tz::Tz;

/// Trading session filter applied to every bar sequence before indicator
/// computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Session {
    /// Electronic trading hours: keep everything.
    Eth,
    /// Regular trading hours: keep bars whose New York wall-clock time falls
    /// inside the window (inclusive).
    Rth { start: NaiveTime, end: NaiveTime },
}

/// Whether bar timestamps mark the bar open or the bar close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarTsMode {
    Open,
    Close,
}

/// Per-symbol entry size and bracket distances (in points).
#[derive(Debug, Clone, Copy)]
pub struct OrderParams {
    pub size: i64,
    pub tp_points: f64,
    pub sl_points: f64,
}

/// Telegram notification settings.
#[derive(Debug, Clone)]
pub struct TelegramSettings {
    pub bot_token: String,
    pub chat_id: String,
}

/// Immutable runtime configuration, built once from the environment at
/// startup and passed by reference into each component. No component reads
/// the environment on its own.
#[derive(Debug, Clone)]
pub struct Config {
    // Gateway
    pub api_base: String,
    pub api_user: String,
    pub api_key: String,
    pub force_live: bool,
    pub practice_account_id: Option<i64>,

    // Instruments
    pub symbols: Vec<String>,
    pub contract_overrides: HashMap<String, String>,

    // Bars / indicator state
    pub bar_minutes: u32,
    pub bar_ts_mode: BarTsMode,
    pub required_bars: usize,
    pub warmup_bars: u32,
    pub lookback_days: i64,
    pub recompute_bars: u32,
    pub include_partial_seed: bool,
    pub exact_match_on_close: bool,
    pub session: Session,
    pub smooth_slow: bool,
    pub smooth_length: usize,
    pub fast_period: usize,
    pub slow_period: usize,
    pub eps: f64,
    pub arm_reset_on_trend_change: bool,
    pub gap_secs: i64,

    // Scheduling
    pub align_tz: Tz,
    pub close_lag: Duration,
    pub retry_count: u32,
    pub retry_interval: Duration,

    // Execution
    pub dry_run: bool,
    pub fill_attempts: u32,
    pub fill_interval: Duration,
    pub orders: HashMap<String, OrderParams>,

    // Persistence
    pub seen_file: PathBuf,
    pub trades_log: PathBuf,

    // Notifications
    pub telegram: Option<TelegramSettings>,
    pub notify_on_dry_run: bool,
}

fn env_str(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => {
            matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
        }
        _ => default,
    }
}

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn parse_hhmm(value: &str, default: NaiveTime) -> NaiveTime {
    NaiveTime::parse_from_str(value, "%H:%M").unwrap_or(default)
}

/// Built-in bracket defaults for the two instruments the bot was written
/// for. Anything else falls back to the generic ORDER_SIZE/TP/SL envs.
fn default_order_params(symbol: &str) -> OrderParams {
    match symbol {
        "MNQ" | "NQ" => OrderParams {
            size: 1,
            tp_points: 60.0,
            sl_points: 30.0,
        },
        "ES" => OrderParams {
            size: 1,
            tp_points: 8.0,
            sl_points: 4.0,
        },
        _ => OrderParams {
            size: 1,
            tp_points: 8.0,
            sl_points: 4.0,
        },
    }
}

impl Config {
    pub fn from_env() -> crate::Result<Self> {
        let api_user = env_str("PROJECTX_USER", "");
        let api_key = env_str("PROJECTX_API_KEY", "");
        if api_user.is_empty() || api_key.is_empty() {
            return Err("Missing PROJECTX_USER / PROJECTX_API_KEY in environment".into());
        }

        let symbols: Vec<String> = env_str("TRADE_SYMBOLS", "MNQ,ES")
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();

        let mut contract_overrides = HashMap::new();
        let mut orders = HashMap::new();
        for symbol in &symbols {
            // CONTRACT_ID_MNQ falls back to CONTRACT_ID_NQ for compatibility
            let override_id = env_opt(&format!("CONTRACT_ID_{}", symbol)).or_else(|| {
                if symbol == "MNQ" {
                    env_opt("CONTRACT_ID_NQ")
                } else {
                    None
                }
            });
            if let Some(id) = override_id {
                contract_overrides.insert(symbol.clone(), id);
            }

            let defaults = default_order_params(symbol);
            let generic_size = env_parse("ORDER_SIZE", defaults.size);
            orders.insert(
                symbol.clone(),
                OrderParams {
                    size: env_parse(&format!("ORDER_SIZE_{}", symbol), generic_size),
                    tp_points: env_parse(&format!("TP_POINTS_{}", symbol), defaults.tp_points),
                    sl_points: env_parse(&format!("SL_POINTS_{}", symbol), defaults.sl_points),
                },
            );
        }

        let session = if env_str("CHART_SESSION", "ETH").to_uppercase() == "RTH" {
            Session::Rth {
                start: parse_hhmm(
                    &env_str("RTH_START", "09:30"),
                    NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
                ),
                end: parse_hhmm(
                    &env_str("RTH_END", "16:15"),
                    NaiveTime::from_hms_opt(16, 15, 0).unwrap(),
                ),
            }
        } else {
            Session::Eth
        };

        let bar_ts_mode = if env_str("BAR_TIMESTAMP_MODE", "open").to_lowercase() == "close" {
            BarTsMode::Close
        } else {
            BarTsMode::Open
        };

        let align_tz: Tz = env_str("ALIGN_TIMEZONE", "UTC").parse().unwrap_or(Tz::UTC);

        // Smoothing: EMA_SLOW_SMOOTH_TYPE="sma" enables the SMA(k) display
        // smoothing of the slow EMA; signals always use the base values.
        let smooth_length: usize = env_parse("EMA_SLOW_SMOOTH_LENGTH", 9);
        let smooth_slow =
            env_str("EMA_SLOW_SMOOTH_TYPE", "sma").to_lowercase() == "sma" && smooth_length > 1;

        Ok(Config {
            api_base: env_str("PROJECTX_API_BASE", "https://api.topstepx.com"),
            api_user,
            api_key,
            force_live: env_bool("FORCE_LIVE", false),
            practice_account_id: env_opt("PRACTICE_ACCOUNT_ID").and_then(|v| v.parse().ok()),
            symbols,
            contract_overrides,
            bar_minutes: env_parse("BAR_MINUTES", 15),
            bar_ts_mode,
            required_bars: env_parse("REQUIRED_BARS", 205),
            warmup_bars: env_parse("WARMUP_BARS", 1000),
            lookback_days: env_parse("BARS_LOOKBACK_DAYS", 14),
            recompute_bars: env_parse("RECOMPUTE_BARS", 1200),
            include_partial_seed: env_bool("INCLUDE_PARTIAL_BARS", false),
            exact_match_on_close: env_bool("EXACT_MATCH_ON_CLOSE", true),
            session,
            smooth_slow,
            smooth_length,
            fast_period: env_parse("EMA_FAST_PERIOD", 50),
            slow_period: env_parse("EMA_SLOW_PERIOD", 200),
            eps: env_parse("EMA_CROSS_EPS", 0.0),
            arm_reset_on_trend_change: env_bool("ARM_RESET_ON_TREND_CHANGE", true),
            gap_secs: env_parse("DATA_GAP_SECONDS", 20 * 60),
            align_tz,
            close_lag: Duration::from_secs_f64(env_parse("CLOSE_LAG_SEC", 1.2)),
            retry_count: env_parse("CLOSE_RETRY_COUNT", 15),
            retry_interval: Duration::from_secs_f64(env_parse("CLOSE_RETRY_INTERVAL", 0.5)),
            dry_run: env_bool("DRY_RUN", true),
            fill_attempts: env_parse("FILL_POLL_ATTEMPTS", 30),
            fill_interval: Duration::from_secs_f64(env_parse("FILL_POLL_INTERVAL", 1.0)),
            orders,
            seen_file: PathBuf::from(env_str("SEEN_SIGNALS_FILE", "seen_signals.json")),
            trades_log: PathBuf::from(env_str("TRADES_LOG", "trades.log")),
            telegram: match (
                env_bool("NOTIFY_TELEGRAM", false),
                env_opt("TELEGRAM_BOT_TOKEN"),
                env_opt("TELEGRAM_CHAT_ID"),
            ) {
                (true, Some(bot_token), Some(chat_id)) => {
                    Some(TelegramSettings { bot_token, chat_id })
                }
                _ => None,
            },
            notify_on_dry_run: env_bool("NOTIFY_ON_DRY_RUN", false),
        })
    }

    /// Bracket parameters for a symbol; unknown symbols get the generic
    /// defaults so a misconfigured list never panics mid-cycle.
    pub fn order_params(&self, symbol: &str) -> OrderParams {
        self.orders
            .get(symbol)
            .copied()
            .unwrap_or_else(|| default_order_params(symbol))
    }

    /// Days of history needed to cover `required_bars` at the configured bar
    /// width, with a few days of weekend/holiday slack.
    pub fn needed_lookback_days(&self) -> i64 {
        let minutes = self.required_bars as i64 * self.bar_minutes as i64;
        let days = (minutes + 24 * 60 - 1) / (24 * 60);
        (days + 4).max(7)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_needed_lookback_days_has_floor() {
        let mut config = test_config();
        config.required_bars = 10;
        config.bar_minutes = 15;
        assert_eq!(config.needed_lookback_days(), 7);

        config.required_bars = 1000;
        // 1000 * 15min = 10.4 days, + 4 slack
        assert_eq!(config.needed_lookback_days(), 15);
    }

    #[test]
    fn test_order_params_fallback() {
        let config = test_config();
        let params = config.order_params("MNQ");
        assert_eq!(params.tp_points, 60.0);
        let unknown = config.order_params("CL");
        assert_eq!(unknown.size, 1);
    }

    fn test_config() -> Config {
        Config {
            api_base: "https://api.example.test".to_string(),
            api_user: "user".to_string(),
            api_key: "key".to_string(),
            force_live: false,
            practice_account_id: None,
            symbols: vec!["MNQ".to_string(), "ES".to_string()],
            contract_overrides: HashMap::new(),
            bar_minutes: 15,
            bar_ts_mode: BarTsMode::Open,
            required_bars: 205,
            warmup_bars: 1000,
            lookback_days: 14,
            recompute_bars: 1200,
            include_partial_seed: false,
            exact_match_on_close: true,
            session: Session::Eth,
            smooth_slow: true,
            smooth_length: 9,
            fast_period: 50,
            slow_period: 200,
            eps: 0.0,
            arm_reset_on_trend_change: true,
            gap_secs: 20 * 60,
            align_tz: Tz::UTC,
            close_lag: Duration::from_secs_f64(1.2),
            retry_count: 15,
            retry_interval: Duration::from_millis(500),
            dry_run: true,
            fill_attempts: 30,
            fill_interval: Duration::from_secs(1),
            orders: [(
                "MNQ".to_string(),
                OrderParams {
                    size: 1,
                    tp_points: 60.0,
                    sl_points: 30.0,
                },
            )]
            .into(),
            seen_file: PathBuf::from("seen_signals.json"),
            trades_log: PathBuf::from("trades.log"),
            telegram: None,
            notify_on_dry_run: false,
        }
    }
}
