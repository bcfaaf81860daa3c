use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::models::{Direction, TradeEvent};
use crate::util::iso_z;
use crate::Result;

/// Ledger of signals already acted on, persisted as a JSON array of keys.
/// One key per (symbol, bar close, direction) keeps the trader idempotent
/// across restarts: a replayed bar can never produce a second order.
#[derive(Debug)]
pub struct SeenSignals {
    path: PathBuf,
    seen: HashSet<String>,
}

impl SeenSignals {
    /// Load the ledger from disk. A missing or unreadable file starts an
    /// empty ledger rather than refusing to trade.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let seen = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Vec<String>>(&raw) {
                Ok(keys) => keys.into_iter().collect(),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "seen-signals file corrupt, starting empty");
                    HashSet::new()
                }
            },
            Err(_) => HashSet::new(),
        };
        Self { path, seen }
    }

    pub fn key(symbol: &str, as_of: DateTime<Utc>, signal: Direction) -> String {
        format!("{}|{}|{}", symbol, iso_z(as_of), signal.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Record a key and rewrite the file. The write goes through a sibling
    /// temp file and a rename so a crash mid-write cannot truncate the ledger.
    pub fn insert(&mut self, key: String) -> Result<()> {
        if !self.seen.insert(key) {
            return Ok(());
        }
        let mut keys: Vec<&String> = self.seen.iter().collect();
        keys.sort();
        let json = serde_json::to_string_pretty(&keys)?;

        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Append-only NDJSON log of trade decisions and order outcomes.
#[derive(Debug)]
pub struct TradeLog {
    path: PathBuf,
}

impl TradeLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, event: &TradeEvent) -> Result<()> {
        use std::io::Write;

        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(event)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TradeEventKind;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn as_of() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 14, 45, 0).unwrap()
    }

    #[test]
    fn test_key_format() {
        let key = SeenSignals::key("MNQ", as_of(), Direction::Long);
        assert_eq!(key, "MNQ|2025-03-14T14:45:00Z|LONG");
    }

    #[test]
    fn test_missing_file_starts_empty() {
        let dir = tempdir().unwrap();
        let ledger = SeenSignals::load(dir.path().join("seen.json"));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seen.json");
        fs::write(&path, "{not json").unwrap();
        let ledger = SeenSignals::load(&path);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_insert_roundtrips_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seen.json");

        let mut ledger = SeenSignals::load(&path);
        let key = SeenSignals::key("MNQ", as_of(), Direction::Long);
        ledger.insert(key.clone()).unwrap();
        assert!(ledger.contains(&key));

        let reloaded = SeenSignals::load(&path);
        assert!(reloaded.contains(&key));
        assert_eq!(reloaded.len(), 1);
    }

    #[test]
    fn test_insert_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seen.json");

        let mut ledger = SeenSignals::load(&path);
        let key = SeenSignals::key("ES", as_of(), Direction::Short);
        ledger.insert(key.clone()).unwrap();
        ledger.insert(key.clone()).unwrap();
        assert_eq!(ledger.len(), 1);

        let raw = fs::read_to_string(&path).unwrap();
        let keys: Vec<String> = serde_json::from_str(&raw).unwrap();
        assert_eq!(keys, vec![key]);
    }

    fn event(kind: TradeEventKind) -> TradeEvent {
        TradeEvent {
            ts: as_of(),
            event: kind,
            symbol: "MNQ".into(),
            contract_id: "CON.F.US.MNQ.M25".into(),
            as_of: as_of(),
            signal: Direction::Long,
            qty: 1,
            tp_points: 60.0,
            sl_points: 30.0,
            account_id: 42,
            dry_run: false,
            tag: "emabot-test".into(),
            order: None,
            error: None,
        }
    }

    #[test]
    fn test_trade_log_appends_ndjson() {
        let dir = tempdir().unwrap();
        let log = TradeLog::new(dir.path().join("trades.log"));

        log.append(&event(TradeEventKind::DryRunSignal)).unwrap();

        let mut second = event(TradeEventKind::OrderError);
        second.error = Some("boom".into());
        log.append(&second).unwrap();

        let raw = fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"DRY_RUN_SIGNAL\""));
        assert!(lines[1].contains("\"ORDER_ERROR\""));
        assert!(lines[1].contains("boom"));
    }
}
