use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    Limit,
    StopLossLimit,
    LimitMaker,
    #[serde(rename = "OCO")]
    OcoGroup,
}

impl OrderType {
    pub fn from_exchange(raw: &str) -> Option<Self> {
        match raw {
            "MARKET" => Some(Self::Market),
            "LIMIT" => Some(Self::Limit),
            "STOP_LOSS_LIMIT" | "STOP_LOSS" => Some(Self::StopLossLimit),
            "LIMIT_MAKER" | "TAKE_PROFIT_LIMIT" | "TAKE_PROFIT" => Some(Self::LimitMaker),
            "OCO" => Some(Self::OcoGroup),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Expired,
    Rejected,
}

impl OrderStatus {
    /// Maps a raw Binance status. `PENDING_CANCEL` and `EXPIRED_IN_MATCH`
    /// fold into their terminal counterparts.
    pub fn from_exchange(raw: &str) -> Option<Self> {
        match raw {
            "NEW" | "PENDING_NEW" => Some(Self::New),
            "PARTIALLY_FILLED" => Some(Self::PartiallyFilled),
            "FILLED" => Some(Self::Filled),
            "CANCELED" | "PENDING_CANCEL" => Some(Self::Canceled),
            "EXPIRED" | "EXPIRED_IN_MATCH" => Some(Self::Expired),
            "REJECTED" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn is_open(self) -> bool {
        matches!(self, Self::New | Self::PartiallyFilled)
    }
}

/// One exchange order as seen by the bot. Entries in a signal's order log are
/// upserted by `order_id` and frozen once FILLED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    #[serde(rename = "orderId")]
    pub order_id: u64,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub side: Side,
    pub quantity: Decimal,
    #[serde(rename = "executedQty")]
    pub executed_qty: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    #[serde(rename = "stopPrice", default, skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<Decimal>,
    #[serde(rename = "avgPrice", default, skip_serializing_if = "Option::is_none")]
    pub avg_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oco_group_id: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

impl OrderRecord {
    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Filled
    }

    /// Best known execution price: average fill, then limit, then trigger.
    pub fn execution_price(&self) -> Option<Decimal> {
        self.avg_price.or(self.price).or(self.stop_price)
    }
}

/// Result of a market order as reported by the exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketFill {
    pub order_id: u64,
    pub status: OrderStatus,
    pub executed_qty: Decimal,
    pub fill_price: Decimal,
}

impl MarketFill {
    pub fn to_record(&self, side: Side, quantity: Decimal, timestamp: DateTime<Utc>) -> OrderRecord {
        OrderRecord {
            order_id: self.order_id,
            order_type: OrderType::Market,
            status: self.status,
            side,
            quantity,
            executed_qty: self.executed_qty,
            price: None,
            stop_price: None,
            avg_price: Some(self.fill_price),
            oco_group_id: None,
            timestamp,
        }
    }
}

/// A placed OCO group. `legs` holds the stop-loss-limit and limit-maker orders.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtectiveGroup {
    pub group_id: u64,
    pub legs: Vec<OrderRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupListStatus {
    Executing,
    AllDone,
    Rejected,
}

/// Exchange-side view of a protective group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupStatus {
    pub group_id: u64,
    pub status: GroupListStatus,
    pub legs: Vec<OrderRecord>,
}

impl GroupStatus {
    pub fn filled_leg(&self) -> Option<&OrderRecord> {
        self.legs.iter().find(|leg| leg.is_filled())
    }

    pub fn is_active(&self) -> bool {
        self.status == GroupListStatus::Executing && self.legs.iter().any(|leg| leg.status.is_open())
    }
}
