use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use common::{
    config::ExchangeConfig,
    models::{AssetBalance, GroupListStatus, GroupStatus, MarketFill, OrderRecord, ProtectiveGroup, Side, SymbolTradingRules},
};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, Response, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, de::DeserializeOwned};
use sha2::Sha256;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{
    account_response::{AccountResponse, TickerPriceResponse},
    exchange_info_response::ExchangeInfoResponse,
    order_response::{OrderListResponse, OrderResponse},
};
use crate::{
    ExchangeError,
    traits::{ExchangeAdapter, ProtectiveGroupRequest, RemoteResponse},
};

type HmacSha256 = Hmac<Sha256>;

const USED_WEIGHT_HEADER: &str = "x-mbx-used-weight-1m";
const WEIGHT_WARN_THRESHOLD: u32 = 1000;

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    code: i64,
    msg: String,
}

/// Signed REST client for the Binance spot API.
pub struct BinanceClient {
    client: Client,
    base_url: String,
    api_key: String,
    secret_key: String,
    recv_window_ms: u64,
    rules_cache: RwLock<HashMap<String, SymbolTradingRules>>,
}

impl BinanceClient {
    pub fn new(config: &ExchangeConfig) -> Result<Self, ExchangeError> {
        let client = Client::builder()
            .user_agent("spot_signal_bot/0.1.0")
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            secret_key: config.secret_key.clone(),
            recv_window_ms: config.recv_window_ms,
            rules_cache: RwLock::new(HashMap::new()),
        })
    }

    async fn public_get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).query(params).send().await?;
        Self::handle_response(path, response).await
    }

    async fn signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        mut params: Vec<(&str, String)>,
    ) -> Result<T, ExchangeError> {
        params.push(("recvWindow", self.recv_window_ms.to_string()));
        params.push(("timestamp", Utc::now().timestamp_millis().to_string()));

        let query = encode_query(&params);
        let signature = sign(&self.secret_key, &query)?;
        let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);

        let response = self
            .client
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        Self::handle_response(path, response).await
    }

    async fn handle_response<T: DeserializeOwned>(path: &str, response: Response) -> Result<T, ExchangeError> {
        if let Some(used_weight) = response
            .headers()
            .get(USED_WEIGHT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u32>().ok())
        {
            if used_weight > WEIGHT_WARN_THRESHOLD {
                warn!(used_weight, path, "High API weight usage");
            } else {
                debug!(used_weight, path, "Used weights");
            }
        }

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(classify_error(status, &body));
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn query_order(&self, symbol: &str, key: &str, value: String) -> Result<OrderResponse, ExchangeError> {
        self.signed(
            Method::GET,
            "/api/v3/order",
            vec![("symbol", symbol.to_string()), (key, value)],
        )
        .await
    }

    /// Order list responses only reference their legs; each one is queried.
    async fn group_legs(&self, symbol: &str, list: &OrderListResponse) -> Result<Vec<OrderRecord>, ExchangeError> {
        let mut legs = Vec::with_capacity(list.orders.len());
        for order in &list.orders {
            let mut leg = self.get_order_status(symbol, order.order_id).await?;
            leg.oco_group_id = Some(list.order_list_id);
            legs.push(leg);
        }
        Ok(legs)
    }
}

/// Hex HMAC-SHA256 of the query string, as Binance expects in `signature`.
pub fn sign(secret_key: &str, query: &str) -> Result<String, ExchangeError> {
    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .map_err(|e| ExchangeError::InvalidResponse(format!("invalid signing key: {e}")))?;
    mac.update(query.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn encode_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn wire(value: Decimal) -> String {
    value.normalize().to_string()
}

/// Maps an HTTP failure onto the error taxonomy used by the retry layer.
fn classify_error(status: StatusCode, body: &str) -> ExchangeError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
        return ExchangeError::RateLimited(format!("HTTP {}: {}", status.as_u16(), body));
    }
    if status.is_server_error() {
        return ExchangeError::Network(format!("HTTP {}: {}", status.as_u16(), body));
    }

    let Ok(ApiErrorResponse { code, msg }) = serde_json::from_str::<ApiErrorResponse>(body) else {
        return ExchangeError::InvalidResponse(format!("HTTP {}: {}", status.as_u16(), body));
    };
    match code {
        -1003 => ExchangeError::RateLimited(msg),
        -1001 | -1021 => ExchangeError::Network(msg),
        -2011 | -2013 => ExchangeError::UnknownOrder(msg),
        -1121 => ExchangeError::UnknownSymbol(msg),
        -2010 => ExchangeError::Rejected { code, msg },
        _ => ExchangeError::Api { code, msg },
    }
}

#[async_trait]
impl ExchangeAdapter for BinanceClient {
    async fn get_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        let ticker: TickerPriceResponse = self
            .public_get("/api/v3/ticker/price", &[("symbol", symbol.to_string())])
            .await?;
        ticker.to_domain()
    }

    async fn get_balance(&self, asset: &str) -> Result<AssetBalance, ExchangeError> {
        let account: AccountResponse = self
            .signed(Method::GET, "/api/v3/account", vec![("omitZeroBalances", "true".to_string())])
            .await?;
        Ok(account.balance_of(asset))
    }

    async fn get_free_balance(&self, asset: &str) -> Result<Decimal, ExchangeError> {
        Ok(self.get_balance(asset).await?.free)
    }

    async fn get_symbol_rules(&self, symbol: &str) -> Result<SymbolTradingRules, ExchangeError> {
        if let Some(rules) = self.rules_cache.read().await.get(symbol) {
            return Ok(rules.clone());
        }

        let info: ExchangeInfoResponse = self
            .public_get("/api/v3/exchangeInfo", &[("symbol", symbol.to_string())])
            .await?;
        let rules = info
            .symbols
            .iter()
            .find(|s| s.symbol == symbol)
            .ok_or_else(|| ExchangeError::UnknownSymbol(symbol.to_string()))?
            .to_domain()?;

        debug!(symbol, step = %rules.step_size, tick = %rules.tick_size, min_notional = %rules.min_notional, "Cached trading rules");
        self.rules_cache
            .write()
            .await
            .insert(symbol.to_string(), rules.clone());
        Ok(rules)
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
        client_order_id: &str,
    ) -> Result<MarketFill, ExchangeError> {
        info!(symbol, side = side.as_str(), %quantity, client_order_id, "Placing market order");
        let response: OrderResponse = self
            .signed(
                Method::POST,
                "/api/v3/order",
                vec![
                    ("symbol", symbol.to_string()),
                    ("side", side.as_str().to_string()),
                    ("type", "MARKET".to_string()),
                    ("quantity", wire(quantity)),
                    ("newClientOrderId", client_order_id.to_string()),
                    ("newOrderRespType", "FULL".to_string()),
                ],
            )
            .await?;
        response.to_domain()
    }

    async fn find_order_by_client_id(
        &self,
        symbol: &str,
        client_order_id: &str,
    ) -> Result<Option<MarketFill>, ExchangeError> {
        match self
            .query_order(symbol, "origClientOrderId", client_order_id.to_string())
            .await
        {
            Ok(response) => Ok(Some(response.to_domain()?)),
            Err(e) if e.is_unknown_order() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn place_protective_group(
        &self,
        request: &ProtectiveGroupRequest,
        list_client_order_id: &str,
    ) -> Result<ProtectiveGroup, ExchangeError> {
        let mut params = vec![
            ("symbol", request.symbol.clone()),
            ("side", request.side.as_str().to_string()),
            ("quantity", wire(request.quantity)),
            ("listClientOrderId", list_client_order_id.to_string()),
            ("newOrderRespType", "FULL".to_string()),
        ];
        // The stop sits below the price for a sell exit and above it for a buy exit.
        match request.side {
            Side::Sell => params.extend([
                ("aboveType", "LIMIT_MAKER".to_string()),
                ("abovePrice", wire(request.take_profit)),
                ("belowType", "STOP_LOSS_LIMIT".to_string()),
                ("belowStopPrice", wire(request.stop_trigger)),
                ("belowPrice", wire(request.stop_limit)),
                ("belowTimeInForce", "GTC".to_string()),
            ]),
            Side::Buy => params.extend([
                ("aboveType", "STOP_LOSS_LIMIT".to_string()),
                ("aboveStopPrice", wire(request.stop_trigger)),
                ("abovePrice", wire(request.stop_limit)),
                ("aboveTimeInForce", "GTC".to_string()),
                ("belowType", "LIMIT_MAKER".to_string()),
                ("belowPrice", wire(request.take_profit)),
            ]),
        }

        info!(
            symbol = %request.symbol,
            side = request.side.as_str(),
            quantity = %request.quantity,
            stop = %request.stop_trigger,
            take_profit = %request.take_profit,
            list_client_order_id,
            "Placing protective group"
        );
        let response: OrderListResponse = self
            .signed(Method::POST, "/api/v3/orderList/oco", params)
            .await?;
        response.to_domain()
    }

    async fn find_group_by_client_id(
        &self,
        symbol: &str,
        list_client_order_id: &str,
    ) -> Result<Option<ProtectiveGroup>, ExchangeError> {
        let list: OrderListResponse = match self
            .signed(
                Method::GET,
                "/api/v3/orderList",
                vec![("origClientOrderId", list_client_order_id.to_string())],
            )
            .await
        {
            Ok(list) => list,
            Err(e) if e.is_unknown_order() => return Ok(None),
            Err(e) => return Err(e),
        };
        if list.list_status() == GroupListStatus::Rejected {
            return Ok(None);
        }

        Ok(Some(ProtectiveGroup {
            group_id: list.order_list_id,
            legs: self.group_legs(symbol, &list).await?,
        }))
    }

    async fn cancel_order(&self, symbol: &str, order_id: u64) -> Result<(), ExchangeError> {
        let _: serde_json::Value = self
            .signed(
                Method::DELETE,
                "/api/v3/order",
                vec![("symbol", symbol.to_string()), ("orderId", order_id.to_string())],
            )
            .await?;
        info!(symbol, order_id, "Order canceled");
        Ok(())
    }

    async fn cancel_group(&self, symbol: &str, group_id: u64) -> Result<(), ExchangeError> {
        let _: serde_json::Value = self
            .signed(
                Method::DELETE,
                "/api/v3/orderList",
                vec![("symbol", symbol.to_string()), ("orderListId", group_id.to_string())],
            )
            .await?;
        info!(symbol, group_id, "Protective group canceled");
        Ok(())
    }

    async fn get_order_status(&self, symbol: &str, order_id: u64) -> Result<OrderRecord, ExchangeError> {
        self.query_order(symbol, "orderId", order_id.to_string())
            .await?
            .to_domain()
    }

    async fn get_group(&self, symbol: &str, group_id: u64) -> Result<GroupStatus, ExchangeError> {
        let list: OrderListResponse = self
            .signed(
                Method::GET,
                "/api/v3/orderList",
                vec![("orderListId", group_id.to_string())],
            )
            .await?;

        Ok(GroupStatus {
            group_id,
            status: list.list_status(),
            legs: self.group_legs(symbol, &list).await?,
        })
    }

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OrderRecord>, ExchangeError> {
        let orders: Vec<OrderResponse> = self
            .signed(Method::GET, "/api/v3/openOrders", vec![("symbol", symbol.to_string())])
            .await?;
        orders.iter().map(|order| order.to_domain()).collect()
    }
}
