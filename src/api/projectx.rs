use crate::models::{Bar, OrderType, Side};
use crate::util::iso_z;
use crate::Result;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

/// Symbol synonyms tried in order when no contract id override is set.
const SYNONYMS: &[(&str, &[&str])] = &[
    (
        "MNQ",
        &["MNQ", "MICRO NASDAQ", "MICRO E-MINI NASDAQ", "NQ", "E-MINI NASDAQ"],
    ),
    ("ES", &["ES", "E-mini S&P", "S&P 500", "E-MINI S&P"]),
];

/// Client for a ProjectX-style gateway (TopstepX API).
///
/// Every endpoint is a JSON POST returning a `{ success, ... }` envelope;
/// authenticated calls carry a bearer token obtained from `login_with_key`.
pub struct ProjectXClient {
    client: Client,
    base_url: String,
    user: String,
    api_key: String,
    token: Option<String>,
}

// ============== Response Types ==============

#[derive(Debug, Deserialize)]
struct AuthResponse {
    #[serde(default)]
    success: bool,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccountsResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    accounts: Vec<Account>,
}

#[derive(Debug, Deserialize)]
struct ContractsResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    contracts: Vec<Contract>,
}

#[derive(Debug, Deserialize)]
struct BarsResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    bars: Vec<RawBar>,
}

#[derive(Debug, Deserialize)]
struct RawBar {
    t: DateTime<Utc>,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    #[serde(default)]
    v: f64,
}

impl From<RawBar> for Bar {
    fn from(raw: RawBar) -> Self {
        Bar {
            timestamp: raw.t,
            open: raw.o,
            high: raw.h,
            low: raw.l,
            close: raw.c,
            volume: raw.v,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PlaceOrderResponse {
    #[serde(default)]
    success: bool,
    #[serde(rename = "orderId")]
    order_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TradesResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    trades: Vec<TradeRecord>,
}

// ============== Public Types ==============

#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "canTrade", default)]
    pub can_trade: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Contract {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "tickSize")]
    pub tick_size: Option<f64>,
    #[serde(rename = "activeContract", default)]
    pub active_contract: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradeRecord {
    #[serde(rename = "contractId")]
    pub contract_id: String,
    pub price: Option<f64>,
}

/// Parameters for `retrieve_bars`.
#[derive(Debug, Clone)]
pub struct BarQuery<'a> {
    pub contract_id: &'a str,
    pub live: bool,
    /// Bar unit code; 2 = minute.
    pub unit: u32,
    pub unit_number: u32,
    pub include_partial: bool,
    pub limit: u32,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Parameters for `place_order`. The gateway acknowledges placement only;
/// fills are discovered separately through `search_trades`.
#[derive(Debug, Clone)]
pub struct OrderRequest<'a> {
    pub account_id: i64,
    pub contract_id: &'a str,
    pub side: Side,
    pub size: i64,
    pub order_type: OrderType,
    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,
    pub linked_order_id: Option<i64>,
    pub custom_tag: Option<String>,
}

/// Truncate to at most `max` bytes without splitting a UTF-8 character.
/// Gateway error pages are often HTML with multibyte text.
fn truncate(body: &str, max: usize) -> &str {
    let mut end = body.len().min(max);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

// ============== Implementation ==============

/// Upper bound on any single gateway call so a hung request can never stall
/// the trading loop past one bar.
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

impl ProjectXClient {
    pub fn new(base_url: &str, user: &str, api_key: &str) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            user: user.to_string(),
            api_key: api_key.to_string(),
            token: None,
        }
    }

    async fn post<T: serde::de::DeserializeOwned>(&self, path: &str, payload: Value) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.post(&url).json(&payload);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!(
                "gateway error {} on {}: {}",
                status,
                path,
                truncate(&body, 500)
            )
            .into());
        }

        Ok(response.json().await?)
    }

    /// Authenticate with the API key and store the bearer token.
    /// Endpoint: POST /api/Auth/loginKey
    pub async fn login_with_key(&mut self) -> Result<()> {
        let payload = json!({ "userName": self.user, "apiKey": self.api_key });
        let data: AuthResponse = self.post("/api/Auth/loginKey", payload).await?;

        match data.token {
            Some(token) if data.success => {
                self.token = Some(token);
                Ok(())
            }
            _ => Err("gateway auth failed: no token returned".into()),
        }
    }

    /// Endpoint: POST /api/Auth/validate
    pub async fn validate_token(&self) -> Result<bool> {
        let data: AuthResponse = self.post("/api/Auth/validate", json!({})).await?;
        Ok(data.success)
    }

    /// Endpoint: POST /api/Account/search
    pub async fn search_accounts(&self, only_active: bool) -> Result<Vec<Account>> {
        let payload = json!({ "onlyActiveAccounts": only_active });
        let data: AccountsResponse = self.post("/api/Account/search", payload).await?;
        if !data.success {
            return Err("Account/search returned success=false".into());
        }
        Ok(data.accounts)
    }

    /// Endpoint: POST /api/Contract/search
    pub async fn search_contracts(&self, text: &str, live: bool) -> Result<Vec<Contract>> {
        let payload = json!({ "text": text, "live": live });
        let data: ContractsResponse = self.post("/api/Contract/search", payload).await?;
        if !data.success {
            return Err("Contract/search returned success=false".into());
        }
        Ok(data.contracts)
    }

    /// Endpoint: POST /api/Contract/searchById
    pub async fn search_contracts_by_id(&self, contract_id: &str) -> Result<Vec<Contract>> {
        let payload = json!({ "contractId": contract_id });
        let data: ContractsResponse = self.post("/api/Contract/searchById", payload).await?;
        if !data.success {
            return Err("Contract/searchById returned success=false".into());
        }
        Ok(data.contracts)
    }

    /// Resolve a symbol to a contract id: an explicit id passes through, an
    /// override wins, otherwise synonym text search preferring the active
    /// (front) contract.
    pub async fn resolve_contract_id(
        &self,
        symbol: &str,
        override_id: Option<&str>,
        live: bool,
    ) -> Result<String> {
        if symbol.starts_with("CON.") {
            return Ok(symbol.to_string());
        }
        if let Some(id) = override_id {
            return Ok(id.to_string());
        }

        let texts: Vec<&str> = SYNONYMS
            .iter()
            .find(|(sym, _)| *sym == symbol)
            .map(|(_, texts)| texts.to_vec())
            .unwrap_or_else(|| vec![symbol]);

        for text in texts {
            let contracts = match self.search_contracts(text, live).await {
                Ok(contracts) => contracts,
                Err(e) => {
                    tracing::debug!("contract search for {:?} failed: {}", text, e);
                    continue;
                }
            };
            if contracts.is_empty() {
                continue;
            }
            let pick = contracts
                .iter()
                .find(|c| c.active_contract)
                .or_else(|| contracts.first());
            if let Some(contract) = pick {
                return Ok(contract.id.clone());
            }
        }

        Err(format!("no contract id found for {}", symbol).into())
    }

    /// Endpoint: POST /api/History/retrieveBars
    ///
    /// Returns bars ascending by timestamp; the result may be empty.
    pub async fn retrieve_bars(&self, query: &BarQuery<'_>) -> Result<Vec<Bar>> {
        let payload = json!({
            "contractId": query.contract_id,
            "live": query.live,
            "unit": query.unit,
            "unitNumber": query.unit_number,
            "startTime": iso_z(query.start),
            "endTime": iso_z(query.end),
            "limit": query.limit,
            "includePartialBar": query.include_partial,
        });

        let data: BarsResponse = self.post("/api/History/retrieveBars", payload).await?;
        if !data.success {
            return Err("History/retrieveBars returned success=false".into());
        }

        let mut bars: Vec<Bar> = data.bars.into_iter().map(Bar::from).collect();
        bars.sort_by_key(|b| b.timestamp);
        Ok(bars)
    }

    /// Endpoint: POST /api/Order/place
    ///
    /// Synchronous acknowledgment only: returns the order id, never a fill.
    pub async fn place_order(&self, request: &OrderRequest<'_>) -> Result<i64> {
        let mut payload = json!({
            "accountId": request.account_id,
            "contractId": request.contract_id,
            "type": request.order_type.value(),
            "side": request.side.value(),
            "size": request.size,
        });
        if let Some(price) = request.limit_price {
            payload["limitPrice"] = json!(price);
        }
        if let Some(price) = request.stop_price {
            payload["stopPrice"] = json!(price);
        }
        if let Some(id) = request.linked_order_id {
            payload["linkedOrderId"] = json!(id);
        }
        if let Some(tag) = &request.custom_tag {
            payload["customTag"] = json!(tag);
        }

        let data: PlaceOrderResponse = self.post("/api/Order/place", payload).await?;
        match data.order_id {
            Some(order_id) if data.success => Ok(order_id),
            _ => Err("Order/place returned success=false".into()),
        }
    }

    /// Endpoint: POST /api/Trade/search
    pub async fn search_trades(
        &self,
        account_id: i64,
        start: DateTime<Utc>,
    ) -> Result<Vec<TradeRecord>> {
        let payload = json!({ "accountId": account_id, "startTimestamp": iso_z(start) });
        let data: TradesResponse = self.post("/api/Trade/search", payload).await?;
        if !data.success {
            return Err("Trade/search returned success=false".into());
        }
        Ok(data.trades)
    }
}
