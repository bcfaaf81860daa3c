// Technical indicators module
// Recursive EMA series plus the rolling SMA used for display smoothing

pub mod ema;

pub use ema::{ema_series, rolling_sma_series};
