use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::api::{OrderRequest, ProjectXClient};
use crate::error::ExecutionError;
use crate::models::{BracketOrder, OrderType, Side};
use crate::util::poll_until;
use crate::Result;

/// Snap a price to the contract's tick grid. The final rounding strips the
/// binary noise f64 multiplication leaves behind (e.g. 92.00000000000001).
pub fn round_to_tick(price: f64, tick: f64) -> f64 {
    if tick <= 0.0 {
        return price;
    }
    let snapped = (price / tick).round() * tick;
    (snapped * 1e10).round() / 1e10
}

/// Everything needed to place one bracket.
#[derive(Debug, Clone)]
pub struct BracketSpec<'a> {
    pub account_id: i64,
    pub contract_id: &'a str,
    pub side: Side,
    pub quantity: i64,
    pub tp_points: f64,
    pub sl_points: f64,
    pub tick_size: f64,
    pub tag: &'a str,
}

/// Places market-entry brackets: a market parent, then take-profit and
/// stop-loss legs priced off the discovered fill and linked to the parent.
pub struct BracketExecutor<'a> {
    api: &'a ProjectXClient,
    fill_attempts: u32,
    fill_interval: Duration,
}

impl<'a> BracketExecutor<'a> {
    pub fn new(api: &'a ProjectXClient, fill_attempts: u32, fill_interval: Duration) -> Self {
        Self {
            api,
            fill_attempts,
            fill_interval,
        }
    }

    /// Submit the bracket. A parent placement failure is an error; a fill
    /// that never shows up within the polling window leaves the entry naked
    /// and returns a partial `BracketOrder` so the caller can record it.
    pub async fn submit(&self, spec: &BracketSpec<'_>) -> Result<BracketOrder> {
        let mut order = BracketOrder::default();

        let parent_id = self
            .api
            .place_order(&OrderRequest {
                account_id: spec.account_id,
                contract_id: spec.contract_id,
                side: spec.side,
                size: spec.quantity,
                order_type: OrderType::Market,
                limit_price: None,
                stop_price: None,
                linked_order_id: None,
                custom_tag: Some(format!("{}-parent", spec.tag)),
            })
            .await
            .map_err(|e| ExecutionError::OrderSubmission {
                leg: "parent",
                message: e.to_string(),
            })?;
        order.parent_order_id = Some(parent_id);
        info!(order_id = parent_id, contract = spec.contract_id, "parent market order placed");

        let Some(fill) = self.poll_fill_price(spec).await else {
            warn!(
                order_id = parent_id,
                "no fill discovered in time, entry left without protective legs"
            );
            return Ok(order);
        };
        order.fill_price = Some(fill);

        let exit_side = spec.side.opposite();
        let (tp_raw, sl_raw) = match spec.side {
            Side::Buy => (fill + spec.tp_points, fill - spec.sl_points),
            Side::Sell => (fill - spec.tp_points, fill + spec.sl_points),
        };
        let tp_price = round_to_tick(tp_raw, spec.tick_size);
        let sl_price = round_to_tick(sl_raw, spec.tick_size);

        let tp_id = self
            .api
            .place_order(&OrderRequest {
                account_id: spec.account_id,
                contract_id: spec.contract_id,
                side: exit_side,
                size: spec.quantity,
                order_type: OrderType::Limit,
                limit_price: Some(tp_price),
                stop_price: None,
                linked_order_id: Some(parent_id),
                custom_tag: Some(format!("{}-TP", spec.tag)),
            })
            .await
            .map_err(|e| ExecutionError::OrderSubmission {
                leg: "take-profit",
                message: e.to_string(),
            })?;
        order.tp_order_id = Some(tp_id);
        order.tp_price = Some(tp_price);

        let sl_id = self
            .api
            .place_order(&OrderRequest {
                account_id: spec.account_id,
                contract_id: spec.contract_id,
                side: exit_side,
                size: spec.quantity,
                order_type: OrderType::Stop,
                limit_price: None,
                stop_price: Some(sl_price),
                linked_order_id: Some(parent_id),
                custom_tag: Some(format!("{}-SL", spec.tag)),
            })
            .await
            .map_err(|e| ExecutionError::OrderSubmission {
                leg: "stop-loss",
                message: e.to_string(),
            })?;
        order.sl_order_id = Some(sl_id);
        order.sl_price = Some(sl_price);

        info!(
            fill = fill,
            tp = tp_price,
            sl = sl_price,
            "bracket complete"
        );
        Ok(order)
    }

    /// Poll the trade feed for the parent's fill price. The gateway has no
    /// per-order fill endpoint, so the newest trade on this contract since
    /// just before placement is taken as the fill.
    async fn poll_fill_price(&self, spec: &BracketSpec<'_>) -> Option<f64> {
        let since = Utc::now() - chrono::Duration::minutes(2);
        let api = self.api;
        let account_id = spec.account_id;
        let contract_id = spec.contract_id;
        poll_until(self.fill_attempts, self.fill_interval, move || async move {
            match api.search_trades(account_id, since).await {
                Ok(trades) => trades
                    .iter()
                    .rev()
                    .find(|t| t.contract_id == contract_id)
                    .and_then(|t| t.price),
                Err(e) => {
                    warn!(error = %e, "trade search failed while polling for fill");
                    None
                }
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[test]
    fn test_round_to_tick_quarters() {
        assert_eq!(round_to_tick(100.13, 0.25), 100.25);
        assert_eq!(round_to_tick(100.12, 0.25), 100.0);
        assert_eq!(round_to_tick(100.0, 0.25), 100.0);
        assert_eq!(round_to_tick(5000.31, 0.25), 5000.25);
    }

    #[test]
    fn test_round_to_tick_degenerate_tick() {
        assert_eq!(round_to_tick(100.13, 0.0), 100.13);
        assert_eq!(round_to_tick(100.13, -1.0), 100.13);
    }

    #[test]
    fn test_short_bracket_prices() {
        // Short entry: TP below the fill, SL above.
        let fill = 100.0;
        let tp = round_to_tick(fill - 8.0, 0.25);
        let sl = round_to_tick(fill + 4.0, 0.25);
        assert_eq!(tp, 92.0);
        assert_eq!(sl, 104.0);
    }

    fn spec(contract_id: &str) -> BracketSpec<'_> {
        BracketSpec {
            account_id: 7,
            contract_id,
            side: Side::Buy,
            quantity: 1,
            tp_points: 60.0,
            sl_points: 30.0,
            tick_size: 0.25,
            tag: "emabot-test",
        }
    }

    #[tokio::test]
    async fn test_submit_places_full_bracket() {
        let mut server = mockito::Server::new_async().await;

        let parent = server
            .mock("POST", "/api/Order/place")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "type": 2,
                "side": 0,
                "customTag": "emabot-test-parent",
            })))
            .with_body(r#"{"success": true, "orderId": 100}"#)
            .create_async()
            .await;
        let trades = server
            .mock("POST", "/api/Trade/search")
            .with_body(
                r#"{"success": true, "trades": [
                    {"contractId": "CON.F.US.MNQ.M25", "price": 18000.13}
                ]}"#,
            )
            .create_async()
            .await;
        let tp = server
            .mock("POST", "/api/Order/place")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "type": 1,
                "side": 1,
                "limitPrice": 18060.25,
                "linkedOrderId": 100,
                "customTag": "emabot-test-TP",
            })))
            .with_body(r#"{"success": true, "orderId": 101}"#)
            .create_async()
            .await;
        let sl = server
            .mock("POST", "/api/Order/place")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "type": 4,
                "side": 1,
                "stopPrice": 17970.25,
                "linkedOrderId": 100,
                "customTag": "emabot-test-SL",
            })))
            .with_body(r#"{"success": true, "orderId": 102}"#)
            .create_async()
            .await;

        let api = ProjectXClient::new(&server.url(), "u", "k");
        let executor = BracketExecutor::new(&api, 3, Duration::from_millis(1));
        let order = executor.submit(&spec("CON.F.US.MNQ.M25")).await.unwrap();

        assert_eq!(order.parent_order_id, Some(100));
        assert_eq!(order.fill_price, Some(18000.13));
        // 18000.13 + 60 = 18060.13 -> 18060.25; 18000.13 - 30 = 17970.13 -> 17970.25
        assert_eq!(order.tp_price, Some(18060.25));
        assert_eq!(order.sl_price, Some(17970.25));
        assert_eq!(order.tp_order_id, Some(101));
        assert_eq!(order.sl_order_id, Some(102));

        parent.assert_async().await;
        trades.assert_async().await;
        tp.assert_async().await;
        sl.assert_async().await;
    }

    #[tokio::test]
    async fn test_submit_fill_timeout_leaves_partial_bracket() {
        let mut server = mockito::Server::new_async().await;

        server
            .mock("POST", "/api/Order/place")
            .match_body(Matcher::PartialJson(serde_json::json!({ "type": 2 })))
            .with_body(r#"{"success": true, "orderId": 200}"#)
            .create_async()
            .await;
        // Trades never show a fill for this contract.
        server
            .mock("POST", "/api/Trade/search")
            .with_body(r#"{"success": true, "trades": []}"#)
            .expect_at_least(2)
            .create_async()
            .await;
        let legs = server
            .mock("POST", "/api/Order/place")
            .match_body(Matcher::PartialJson(serde_json::json!({ "type": 1 })))
            .expect(0)
            .create_async()
            .await;

        let api = ProjectXClient::new(&server.url(), "u", "k");
        let executor = BracketExecutor::new(&api, 3, Duration::from_millis(1));
        let order = executor.submit(&spec("CON.F.US.MNQ.M25")).await.unwrap();

        assert_eq!(order.parent_order_id, Some(200));
        assert_eq!(order.fill_price, None);
        assert_eq!(order.tp_order_id, None);
        assert_eq!(order.sl_order_id, None);
        legs.assert_async().await;
    }

    #[tokio::test]
    async fn test_submit_parent_rejection_is_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/Order/place")
            .with_body(r#"{"success": false}"#)
            .create_async()
            .await;

        let api = ProjectXClient::new(&server.url(), "u", "k");
        let executor = BracketExecutor::new(&api, 1, Duration::from_millis(1));
        let err = executor
            .submit(&spec("CON.F.US.MNQ.M25"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("parent"));
    }
}
