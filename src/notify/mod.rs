use reqwest::Client;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::TelegramSettings;
use crate::models::{TradeEvent, TradeEventKind};
use crate::util::iso_z;

/// Telegram push notifications for trade events. Delivery is best effort:
/// a failed send is logged and never blocks or fails the trading cycle.
pub struct Notifier {
    client: Client,
    telegram: Option<TelegramSettings>,
    notify_on_dry_run: bool,
}

/// Notifications are best effort; cut a hung Telegram call off quickly so it
/// never holds up the trading cycle.
const SEND_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

impl Notifier {
    pub fn new(telegram: Option<TelegramSettings>, notify_on_dry_run: bool) -> Self {
        let client = Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .expect("reqwest client");
        Self {
            client,
            telegram,
            notify_on_dry_run,
        }
    }

    pub fn disabled() -> Self {
        Self::new(None, false)
    }

    pub async fn trade_event(&self, event: &TradeEvent) {
        let Some(telegram) = &self.telegram else {
            return;
        };
        if event.dry_run && !self.notify_on_dry_run {
            debug!(symbol = %event.symbol, "dry-run event, notification suppressed");
            return;
        }

        let text = format_event(event);
        let url = format!(
            "https://api.telegram.org/bot{}/sendMessage",
            telegram.bot_token
        );
        let body = json!({ "chat_id": telegram.chat_id, "text": text });

        match self.client.post(&url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => {
                warn!(status = %resp.status(), "telegram send rejected");
            }
            Err(e) => {
                warn!(error = %e, "telegram send failed");
            }
        }
    }
}

fn format_event(event: &TradeEvent) -> String {
    let header = match event.event {
        TradeEventKind::DryRunSignal => "DRY RUN",
        TradeEventKind::OrderSent => "ORDER SENT",
        TradeEventKind::OrderError => "ORDER ERROR",
    };
    let mut text = format!(
        "[{}] {} {} x{}\nbar close {}\nTP +{} / SL -{} pts",
        header,
        event.signal,
        event.symbol,
        event.qty,
        iso_z(event.as_of),
        event.tp_points,
        event.sl_points,
    );
    if let Some(order) = &event.order {
        if let Some(fill) = order.fill_price {
            text.push_str(&format!("\nfilled @ {}", fill));
        }
        if let Some(id) = order.parent_order_id {
            text.push_str(&format!("\nparent order {}", id));
        }
    }
    if let Some(err) = &event.error {
        text.push_str(&format!("\nerror: {}", err));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BracketOrder, Direction};
    use chrono::{TimeZone, Utc};

    fn event(kind: TradeEventKind, dry_run: bool) -> TradeEvent {
        TradeEvent {
            ts: Utc.with_ymd_and_hms(2025, 3, 14, 14, 45, 2).unwrap(),
            event: kind,
            symbol: "MNQ".into(),
            contract_id: "CON.F.US.MNQ.M25".into(),
            as_of: Utc.with_ymd_and_hms(2025, 3, 14, 14, 45, 0).unwrap(),
            signal: Direction::Long,
            qty: 1,
            tp_points: 60.0,
            sl_points: 30.0,
            account_id: 42,
            dry_run,
            tag: "emabot-x".into(),
            order: None,
            error: None,
        }
    }

    #[test]
    fn test_format_order_sent() {
        let mut e = event(TradeEventKind::OrderSent, false);
        e.order = Some(BracketOrder {
            parent_order_id: Some(9001),
            fill_price: Some(18123.25),
            ..BracketOrder::default()
        });
        let text = format_event(&e);
        assert!(text.starts_with("[ORDER SENT] LONG MNQ x1"));
        assert!(text.contains("2025-03-14T14:45:00Z"));
        assert!(text.contains("filled @ 18123.25"));
        assert!(text.contains("parent order 9001"));
    }

    #[test]
    fn test_format_error_includes_message() {
        let mut e = event(TradeEventKind::OrderError, false);
        e.error = Some("rejected by risk".into());
        let text = format_event(&e);
        assert!(text.starts_with("[ORDER ERROR]"));
        assert!(text.contains("rejected by risk"));
    }

    #[tokio::test]
    async fn test_disabled_notifier_is_silent() {
        // No telegram settings: must return without any network call.
        let notifier = Notifier::disabled();
        notifier.trade_event(&event(TradeEventKind::OrderSent, false)).await;
    }
}
