use async_trait::async_trait;
use common::models::{
    AssetBalance, GroupStatus, MarketFill, OrderRecord, ProtectiveGroup, Side, SymbolTradingRules,
};
use rust_decimal::Decimal;

use crate::ExchangeError;

/// Converts a raw wire payload into a validated domain value.
pub trait RemoteResponse<T> {
    fn to_domain(&self) -> Result<T, ExchangeError>;
}

/// Stop-loss-limit plus limit-maker pair on the exit side of a position.
/// Values must already satisfy the symbol's trading rules.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtectiveGroupRequest {
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub stop_trigger: Decimal,
    pub stop_limit: Decimal,
    pub take_profit: Decimal,
}

/// Everything the trading core needs from a spot exchange. The adapter does
/// not round: callers pass exchange-legal numbers.
#[cfg_attr(feature = "mocks", mockall::automock)]
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    async fn get_price(&self, symbol: &str) -> Result<Decimal, ExchangeError>;

    async fn get_balance(&self, asset: &str) -> Result<AssetBalance, ExchangeError>;

    async fn get_free_balance(&self, asset: &str) -> Result<Decimal, ExchangeError>;

    async fn get_symbol_rules(&self, symbol: &str) -> Result<SymbolTradingRules, ExchangeError>;

    async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
        client_order_id: &str,
    ) -> Result<MarketFill, ExchangeError>;

    /// Looks up an order submitted with `client_order_id`; `None` if the
    /// exchange never accepted it.
    async fn find_order_by_client_id(
        &self,
        symbol: &str,
        client_order_id: &str,
    ) -> Result<Option<MarketFill>, ExchangeError>;

    async fn place_protective_group(
        &self,
        request: &ProtectiveGroupRequest,
        list_client_order_id: &str,
    ) -> Result<ProtectiveGroup, ExchangeError>;

    /// Looks up a group submitted with `list_client_order_id`; `None` if the
    /// exchange never accepted it.
    async fn find_group_by_client_id(
        &self,
        symbol: &str,
        list_client_order_id: &str,
    ) -> Result<Option<ProtectiveGroup>, ExchangeError>;

    async fn cancel_order(&self, symbol: &str, order_id: u64) -> Result<(), ExchangeError>;

    async fn cancel_group(&self, symbol: &str, group_id: u64) -> Result<(), ExchangeError>;

    async fn get_order_status(&self, symbol: &str, order_id: u64) -> Result<OrderRecord, ExchangeError>;

    async fn get_group(&self, symbol: &str, group_id: u64) -> Result<GroupStatus, ExchangeError>;

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OrderRecord>, ExchangeError>;
}
