use chrono::{DateTime, Utc};
use common::models::{
    GroupListStatus, MarketFill, OrderRecord, OrderStatus, OrderType, ProtectiveGroup, Side,
};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::{ExchangeError, traits::RemoteResponse};

#[derive(Debug, Deserialize)]
pub struct FillResponse {
    pub price: Decimal,
    pub qty: Decimal,
}

/// `/api/v3/order` payload, also used for `openOrders` and OCO order reports.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub symbol: String,
    pub order_id: u64,
    #[serde(default = "no_list")]
    pub order_list_id: i64,
    #[serde(default)]
    pub client_order_id: Option<String>,
    #[serde(default)]
    pub price: Option<Decimal>,
    pub orig_qty: Decimal,
    pub executed_qty: Decimal,
    #[serde(default)]
    pub cummulative_quote_qty: Option<Decimal>,
    pub status: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub side: Side,
    #[serde(default)]
    pub stop_price: Option<Decimal>,
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub transact_time: Option<i64>,
    #[serde(default)]
    pub update_time: Option<i64>,
    #[serde(default)]
    pub fills: Vec<FillResponse>,
}

fn no_list() -> i64 {
    -1
}

fn positive(value: Option<Decimal>) -> Option<Decimal> {
    value.filter(|v| *v > Decimal::ZERO)
}

impl OrderResponse {
    fn timestamp(&self) -> DateTime<Utc> {
        self.update_time
            .or(self.transact_time)
            .or(self.time)
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or_else(Utc::now)
    }

    /// Average execution price. Prefers the quote total, then the fill list.
    pub fn average_price(&self) -> Option<Decimal> {
        if self.executed_qty.is_zero() {
            return None;
        }
        if let Some(quote) = positive(self.cummulative_quote_qty) {
            return Some(quote / self.executed_qty);
        }
        let filled: Decimal = self.fills.iter().map(|f| f.qty).sum();
        if filled.is_zero() {
            return None;
        }
        let quote: Decimal = self.fills.iter().map(|f| f.price * f.qty).sum();
        Some(quote / filled)
    }
}

impl RemoteResponse<OrderRecord> for OrderResponse {
    fn to_domain(&self) -> Result<OrderRecord, ExchangeError> {
        let order_type = OrderType::from_exchange(&self.order_type).ok_or_else(|| {
            ExchangeError::InvalidResponse(format!("unsupported order type {}", self.order_type))
        })?;
        let status = OrderStatus::from_exchange(&self.status).ok_or_else(|| {
            ExchangeError::InvalidResponse(format!("unsupported order status {}", self.status))
        })?;

        Ok(OrderRecord {
            order_id: self.order_id,
            order_type,
            status,
            side: self.side,
            quantity: self.orig_qty,
            executed_qty: self.executed_qty,
            price: positive(self.price),
            stop_price: positive(self.stop_price),
            avg_price: self.average_price(),
            oco_group_id: u64::try_from(self.order_list_id).ok(),
            timestamp: self.timestamp(),
        })
    }
}

impl RemoteResponse<MarketFill> for OrderResponse {
    fn to_domain(&self) -> Result<MarketFill, ExchangeError> {
        let status = OrderStatus::from_exchange(&self.status).ok_or_else(|| {
            ExchangeError::InvalidResponse(format!("unsupported order status {}", self.status))
        })?;

        Ok(MarketFill {
            order_id: self.order_id,
            status,
            executed_qty: self.executed_qty,
            fill_price: self.average_price().unwrap_or(Decimal::ZERO),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRefResponse {
    pub order_id: u64,
}

/// `/api/v3/orderList` and `/api/v3/orderList/oco` payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderListResponse {
    pub order_list_id: u64,
    pub list_order_status: String,
    pub orders: Vec<OrderRefResponse>,
    #[serde(default)]
    pub order_reports: Vec<OrderResponse>,
}

impl OrderListResponse {
    pub fn list_status(&self) -> GroupListStatus {
        match self.list_order_status.as_str() {
            "EXECUTING" => GroupListStatus::Executing,
            "REJECT" => GroupListStatus::Rejected,
            _ => GroupListStatus::AllDone,
        }
    }
}

impl RemoteResponse<ProtectiveGroup> for OrderListResponse {
    fn to_domain(&self) -> Result<ProtectiveGroup, ExchangeError> {
        if self.list_status() == GroupListStatus::Rejected {
            return Err(ExchangeError::Rejected {
                code: 0,
                msg: format!("order list {} rejected", self.order_list_id),
            });
        }
        let legs = self
            .order_reports
            .iter()
            .map(|report| {
                let mut leg: OrderRecord = report.to_domain()?;
                leg.oco_group_id = Some(self.order_list_id);
                Ok(leg)
            })
            .collect::<Result<Vec<_>, ExchangeError>>()?;

        Ok(ProtectiveGroup {
            group_id: self.order_list_id,
            legs,
        })
    }
}
