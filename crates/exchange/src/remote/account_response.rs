use common::models::AssetBalance;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::{ExchangeError, traits::RemoteResponse};

#[derive(Debug, Deserialize)]
pub struct TickerPriceResponse {
    pub symbol: String,
    pub price: Decimal,
}

impl RemoteResponse<Decimal> for TickerPriceResponse {
    fn to_domain(&self) -> Result<Decimal, ExchangeError> {
        if self.price <= Decimal::ZERO {
            return Err(ExchangeError::InvalidResponse(format!(
                "non-positive price {} for {}",
                self.price, self.symbol
            )));
        }
        Ok(self.price)
    }
}

#[derive(Debug, Deserialize)]
pub struct BalanceResponse {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountResponse {
    #[serde(default)]
    pub can_trade: bool,
    pub balances: Vec<BalanceResponse>,
}

impl AccountResponse {
    /// Assets the account has never held are reported as an empty balance.
    pub fn balance_of(&self, asset: &str) -> AssetBalance {
        self.balances
            .iter()
            .find(|b| b.asset.eq_ignore_ascii_case(asset))
            .map(|b| AssetBalance {
                free: b.free,
                locked: b.locked,
            })
            .unwrap_or_default()
    }
}
